//! pcp-series - time-series caching and query engine for Performance Co-Pilot metrics
//!
//! This library walks PCP metric sources, caches every distinct series in a
//! Redis-protocol key-value store, and answers predicate queries over the
//! cached data:
//! - Content-derived series identifiers (SHA-1 over canonical metadata)
//! - Interned label, note and name strings with stable numeric ids
//! - Counter rate conversion with optional wrap correction
//! - Set-algebra query solver with time-windowed value retrieval
//!
//! # Example
//!
//! ```rust,no_run
//! use pcp_series::loader::{LoadRequest, Loader};
//! use pcp_series::mapper::Mapper;
//! use pcp_series::query::{parse, Solver};
//! use pcp_series::source::Context;
//! use pcp_series::store::{Keys, MemoryStore, Store};
//! use std::sync::Arc;
//!
//! # async fn example() -> pcp_series::Result<()> {
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let mapper = Arc::new(Mapper::new(store.clone(), Keys::default(), 1024).await?);
//!
//! let request = LoadRequest::new(Context::archive("/var/log/pcp/pmlogger/host/20240101.json"));
//! Loader::new(mapper, false).load(&request).await?;
//!
//! let solver = Solver::new(store, Keys::default());
//! let found = solver.solve(&parse(r#"hostname == "host""#)?, None).await?;
//! println!("{}", serde_json::to_string_pretty(&found)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod identity;
pub mod labels;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Redis-protocol store adapter, key schema and scripts
pub mod store;

/// Interning of label, note and metric names into numeric ids
pub mod mapper;

/// Metric source contract and the JSON archive reader
pub mod source;

/// Source walker that caches series metadata and samples
pub mod loader;

/// Query language, solver and per-series lookups
pub mod query;

// Re-export main types
pub use config::SeriesConfig;
pub use error::{Error, Result};
pub use identity::SeriesId;
pub use loader::{LoadRequest, LoadSummary, Loader};
pub use query::{parse, QueryResult, Solver};
pub use types::{Descriptor, Timestamp, TimeWindow};
