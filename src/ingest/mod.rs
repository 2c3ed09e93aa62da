//! Bulk CSV ingestion pipeline.
//!
//! An uploaded CSV stream is turned into typed rows and written to the store
//! in fixed-size chunks:
//!
//! 1. **Scheduling** (`scheduler`) - Cuts the stream into chunks and runs one task per
//!    chunk behind a counting admission gate
//! 2. **Coercion** (`coerce`) - Converts raw CSV records into metric or user records
//! 3. **Chunk processing** (`processor`) - Bulk writes one chunk with skip-duplicates
//!    semantics and recovers created user identities
//! 4. **Aggregation** (`aggregate`) - Sums row counts and issues tokens for imported users
//!
//! # Failure model
//!
//! The first failing chunk fails the whole run. Chunks that already finished stay
//! written: ingestion is not atomic across chunks, and nothing is rolled back or
//! retried.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use crate::ingest::{IngestConfig, IngestTarget, Ingestor};
//!
//! let ingestor = Ingestor::new(store, passwords, jwt, IngestConfig::default());
//! let result = ingestor.ingest(file, IngestTarget::Metrics).await?;
//!
//! println!("ingested {} rows", result.rows);
//! ```

pub mod aggregate;
pub mod coerce;
pub mod config;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod types;

pub use aggregate::aggregate;
pub use config::IngestConfig;
pub use error::{ChunkError, CoerceError, IngestError};
pub use processor::ChunkProcessor;
pub use scheduler::Ingestor;
pub use types::{
    ChunkSummary, ExistenceMarker, IngestResult, IngestTarget, IssuedToken, MetricRecord,
    RawRow, UserAccount, UserImportRecord,
};
