//! sealdrop: encrypted file drop client
//!
//! Commands:
//!   upload <file>                     - seal a file and stream it to the store
//!   seal <file> --out <dir>           - seal a file into a local envelope directory
//!   open <dir> --key <key> --out <f>  - decrypt a local envelope directory
//!   config show                       - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sealdrop_client::engine::{self, ProgressFn};
use sealdrop_core::config::{SealdropConfig, TransportKind};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdrop",
    version,
    about = "Client-side encrypted file drop",
    long_about = "sealdrop: encrypt files locally and stream the ciphertext to a sealdrop store"
)]
struct Cli {
    /// Path to sealdrop.toml configuration file
    #[arg(long, short = 'c', env = "SEALDROP_CONFIG", default_value = "sealdrop.toml")]
    config: PathBuf,

    /// Log level (overrides log.level from the config file)
    #[arg(long, env = "SEALDROP_LOG_LEVEL")]
    log: Option<String>,

    /// Log format (overrides log.format from the config file)
    #[arg(long, env = "SEALDROP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file and upload it to the store
    ///
    /// Prints the session id and the decryption key. The key never leaves
    /// this machine; whoever should read the file needs both.
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Transport strategy (overrides upload.transport)
        #[arg(long, short = 't')]
        transport: Option<TransportArg>,
        /// Store API root (overrides upload.server)
        #[arg(long, short = 's')]
        server: Option<String>,
        /// Plaintext chunk size in bytes (overrides upload.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Encrypt a file into a local envelope directory
    Seal {
        /// Local file to seal
        file: PathBuf,
        /// Envelope directory to create
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Plaintext chunk size in bytes (overrides upload.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Decrypt a local envelope directory
    Open {
        /// Envelope directory written by `sealdrop seal`
        dir: PathBuf,
        /// Key printed by `seal` or `upload`
        #[arg(long, short = 'k', env = "SEALDROP_KEY", hide_env_values = true)]
        key: String,
        /// Where to write the plaintext
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum TransportArg {
    /// One request per chunk
    Http,
    /// Persistent WebSocket channel with flow control
    Duplex,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Http => TransportKind::Http,
            TransportArg::Duplex => TransportKind::Duplex,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, found) = load_config(&cli.config).await?;
    apply_log_overrides(&mut config, cli.log.as_deref(), cli.log_format);
    config.validate()?;

    init_logging(&config);
    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Upload {
            file,
            transport,
            server,
            chunk_size,
        } => {
            apply_upload_overrides(&mut config, transport, server, chunk_size)?;
            cmd_upload(&config, &file).await
        }
        Commands::Seal {
            file,
            out,
            chunk_size,
        } => {
            let chunk_size = chunk_size.unwrap_or(config.upload.chunk_size);
            cmd_seal(&file, &out, chunk_size).await
        }
        Commands::Open { dir, key, out } => cmd_open(&dir, &key, &out).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, found),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Read the config file, falling back to defaults when it does not exist.
///
/// The flag is `false` when defaults were used.
async fn load_config(path: &Path) -> Result<(SealdropConfig, bool)> {
    if !path.exists() {
        return Ok((SealdropConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    Ok((config, true))
}

fn apply_log_overrides(config: &mut SealdropConfig, level: Option<&str>, format: Option<LogFormat>) {
    if let Some(level) = level {
        config.log.level = level.to_string();
    }
    match format {
        Some(LogFormat::Json) => config.log.format = "json".into(),
        Some(LogFormat::Text) => config.log.format = "text".into(),
        None => {}
    }
}

fn apply_upload_overrides(
    config: &mut SealdropConfig,
    transport: Option<TransportArg>,
    server: Option<String>,
    chunk_size: Option<usize>,
) -> Result<()> {
    if let Some(transport) = transport {
        config.upload.transport = transport.into();
    }
    if let Some(server) = server {
        config.upload.server = server;
    }
    if let Some(chunk_size) = chunk_size {
        config.upload.chunk_size = chunk_size;
    }
    config.validate()?;
    Ok(())
}

/// `SEALDROP_LOG` wins, then `RUST_LOG`, then the configured level.
fn init_logging(config: &SealdropConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("SEALDROP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    // logs go to stderr; stdout carries the session id and key
    if config.log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ── `sealdrop upload` ─────────────────────────────────────────────────────────

/// Bar positions are thousandths of the upload
const PROGRESS_SCALE: u64 = 1000;

fn make_progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(PROGRESS_SCALE);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .context("building progress bar style")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn progress_position(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * PROGRESS_SCALE as f64).round() as u64
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |fraction| pb.set_position(progress_position(fraction)))
}

async fn cmd_upload(config: &SealdropConfig, file: &Path) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("not a file: {}", file.display());
    }

    let pb = make_progress_bar("upload")?;
    pb.set_message(file.display().to_string());
    let progress = progress_callback(&pb);
    let result = engine::upload_file(&config.upload, file, Some(&progress)).await;
    pb.finish_and_clear();
    let outcome = result?;

    println!("uploaded: {}", outcome.path.display());
    println!("  bytes:   {}", outcome.bytes);
    println!("  chunks:  {}", outcome.chunks);
    println!("  session: {}", outcome.session);
    println!("  key:     {}", outcome.key.expose_secret());
    Ok(())
}

// ── `sealdrop seal` / `sealdrop open` ─────────────────────────────────────────

async fn cmd_seal(file: &Path, out: &Path, chunk_size: usize) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("not a file: {}", file.display());
    }

    let sealed = engine::seal_to_dir(file, out, chunk_size).await?;

    println!("sealed: {} -> {}", file.display(), sealed.dir.display());
    println!("  bytes:  {}", sealed.bytes);
    println!("  chunks: {}", sealed.chunks);
    println!("  key:    {}", sealed.key.expose_secret());
    Ok(())
}

async fn cmd_open(dir: &Path, key: &str, out: &Path) -> Result<()> {
    let opened = engine::open_dir(dir, key, out).await?;

    println!("opened: {} -> {}", dir.display(), opened.path.display());
    println!("  bytes: {}", opened.bytes);
    if let Some(name) = &opened.record.name {
        println!("  name:  {name}");
    }
    if let Some(content_type) = &opened.record.content_type {
        println!("  type:  {content_type}");
    }
    Ok(())
}

// ── `sealdrop config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealdropConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
