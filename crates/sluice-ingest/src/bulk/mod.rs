//! Bulk import of CSV files into the durable log.
//!
//! Rows bypass the admission queue and the rate gate used by the HTTP
//! boundary; the import sets its own pace through
//! [`ImportConfig::rate_limit`].

pub mod pipeline;
pub mod source;

pub use pipeline::{ImportConfig, ImportPipeline, ImportReport, BULK_IMPORT_EVENT_TYPE};
pub use source::{FileSource, LocalFileSource};
