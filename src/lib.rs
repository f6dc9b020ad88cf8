//! File selection and upload progress, without the widget.
//!
//! [`UploadSession`] is the entry point: mount it inside a Tokio runtime,
//! feed it picker selections and drag events, and render from the
//! snapshots it publishes.

pub mod config;
pub mod logging;
pub mod upload;

pub use config::UploadConfig;
pub use upload::{
    format_size, DragEvent, DragState, DropTargetEvent, EntryId, EntryStatus, FileEntry,
    FileHandle, IngestReport, StoreSnapshot, Transfer, TransferEvent, UploadError, UploadSession,
};
