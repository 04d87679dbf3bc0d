//! Recording Indexer
//!
//! Keeps the `recordings` catalog in PostgreSQL consistent with the segments
//! archived in an S3-compatible bucket. Camera identity and time range are
//! inferred from each object's key alone.
//!
//! ## Ingestion paths
//!
//! - **Reconciliation scan**: on a fixed interval, list the whole bucket page
//!   by page and upsert every recognized segment. This is the only
//!   self-healing mechanism; anything missed elsewhere is indexed within one
//!   interval.
//! - **Push ingest**: `POST /api/notify` indexes a single segment as soon as
//!   its writer reports it.
//!
//! Both paths run concurrently and write only through one atomic upsert keyed
//! by (`camera_id`, `started_at`), so repeated and racing observations of a
//! key converge to a single row.
//!
//! ## Architecture
//!
//! ```text
//! S3 Bucket                                          PostgreSQL
//! ┌──────────────┐           ┌──────────────┐       ┌──────────────┐
//! │ {cam}_{ts}   │──pages───▶│ Scanner      │       │ recordings   │
//! │ {cam}/Y/M/D/ │           └──────────────┘       └──────────────┘
//! └──────────────┘              ▲        │                 ▲
//!                               │        ▼                 │
//!                     ┌──────────────┐ ┌──────────────┐    │
//!                     │ Scheduler    │ │ Segment      │────┘
//!                     └──────────────┘ │ Indexer      │ upsert
//!                                      └──────────────┘
//!                                             ▲
//! Segment writer ──── POST /api/notify ───────┘
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod indexer;
pub mod key_parser;
pub mod object_store;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use catalog::{PgCatalog, Recording, RecordingQuery, SegmentCatalog};
pub use config::Config;
pub use error::IndexerError;
pub use indexer::{IndexOutcome, SegmentIndexer};
pub use key_parser::{parse_key, KeyParser, ParseTimezone, ParsedKey};
pub use object_store::{ListedObject, ObjectLister, ObjectPage, S3Bucket};
pub use scanner::{ScanSummary, Scanner};
pub use scheduler::{PassOutcome, ScanScheduler};
