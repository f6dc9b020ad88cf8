//! Upload session core
//!
//! Tracks files chosen by drag-and-drop or a picker, drives each file's
//! transfer progress independently, and keeps the entry list consistent
//! under interleaved adds, removals and progress updates.

pub mod drag;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod schema;
pub mod session;
pub mod source;
pub mod store;
pub mod transfer;

pub use drag::{DragEvent, DragTracker, DropTargetEvent};
pub use driver::{DriverArena, DriverState, TransferDriver};
pub use error::{TransferError, UploadError};
pub use ingest::{format_size, Ingestor};
pub use schema::{
    DragState, EntryId, EntryStatus, FileEntry, FileHandle, IngestReport, StoreSnapshot,
    StoreSummary,
};
pub use session::UploadSession;
pub use source::FileSource;
pub use store::{DuplicatePolicy, EntryStore};
pub use transfer::{SimulatedTransfer, StepSchedule, Transfer, TransferEvent, TransferStream};
