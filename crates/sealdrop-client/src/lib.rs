//! sealdrop-client: end-to-end encrypted uploads of local files

pub mod engine;
pub mod source;

pub use engine::{
    open_dir, seal_file, seal_to_dir, upload_file, upload_with_channel, upload_with_store,
    OpenedFile, ProgressFn, SealedDir, SealedFile, UploadOutcome,
};
pub use source::SizedSource;
