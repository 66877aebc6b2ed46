//! Durable storage for finished takes
//!
//! `FileStore` owns the video files in the documents directory and
//! `MediaStore` the metadata records pointing at them.

pub mod files;
pub mod media;
pub mod schema;

pub use files::FileStore;
pub use media::MediaStore;
pub use schema::{Recording, RecordingUpdate, StorageError, StorageResult};
