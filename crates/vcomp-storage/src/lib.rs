//! S3-compatible blob sink for VidCompose final artifacts.

pub mod client;
pub mod error;

pub use client::{final_video_key, StorageClient, StorageConfig};
pub use error::{StorageError, StorageResult};
