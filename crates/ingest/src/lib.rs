//! Bulk import and export pipelines for Conduit users, articles and comments.
//!
//! Imports stream a source document through a [`decode::RecordDecoder`] into
//! an [`store::ImportStore`]; exports stream rows from an
//! [`store::ExportStore`] through a [`export::RecordWriter`] into a
//! [`export::ChunkSink`]. Job bookkeeping lives in `conduit-queue`.

pub mod decode;
pub mod error;
pub mod export;
pub mod import;
pub mod progress;
pub mod store;

pub use decode::{Record, RecordDecoder, SourceFormat};
pub use error::{DecodeError, ExportError, ImportFailure, IngestError, StoreError};
pub use export::{ExportFilters, ExportFormat, ExportStream, ExportUpload, Exporter};
pub use import::{ErrorKind, ImportOutcome, ImportSettings, Importer};
pub use progress::{NoProgress, ProgressSink};
pub use store::{ExportStore, ImportStore, PgStore};

#[cfg(any(test, feature = "test-utils"))]
pub use store::memory::MemoryStore;
