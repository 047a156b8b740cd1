//! Series queries
//!
//! Expressions select series by metric name, instance name, labels and
//! notes, combined with `&&` and `||`:
//!
//! ```text
//! metric.name == "disk.dev.read" && instance.name == "sda"
//! hostname =~ "web[0-9]+" || note.owner == "ops"
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use pcp_series::query::{parse, Solver};
//! use pcp_series::store::{Keys, MemoryStore};
//! use pcp_series::types::TimeWindow;
//! use std::sync::Arc;
//!
//! # async fn example() -> pcp_series::error::Result<()> {
//! let solver = Solver::new(Arc::new(MemoryStore::new()), Keys::default());
//! let tree = parse(r#"metric.name == "kernel.all.load""#)?;
//! let series = solver.solve(&tree, None).await?;
//! let samples = solver.solve(&tree, Some(&TimeWindow::default())).await?;
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod lookup;
pub mod parser;
pub mod report;
pub mod sets;
pub mod solver;

pub use ast::{CompareOp, NameScope, Node};
pub use lookup::{Lookup, SeriesDesc, SeriesInstance, SeriesLabels, SeriesNames};
pub use parser::parse;
pub use report::{QueryResult, ResultKind, Sample, SeriesValues};
pub use solver::{Plan, Resolution, Solver};
