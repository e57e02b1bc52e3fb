//! # datamove
//!
//! Dependency-aware, backpressured transfer engine for tabular data.
//!
//! This library moves rows between data paths (tables, files, queries,
//! buffers) with support for:
//!
//! - **Dependency ordering** from foreign keys, including discovery of
//!   referenced parents that were not registered
//! - **Parallel writes** through a bounded producer/consumer channel
//! - **Lockstep groups** for sources produced by one coupled generator
//! - **Structural policies** for targets (create, truncate, recreate) and
//!   sources (truncate or drop after a successful move)
//! - **Per-unit statistics** with captured exceptions and progress sampling
//!
//! ## Example
//!
//! ```rust,no_run
//! use datamove::drivers::MemoryStore;
//! use datamove::{TransferEngine, TransferProperties};
//!
//! #[tokio::main]
//! async fn main() -> datamove::Result<()> {
//!     let source = MemoryStore::new("src");
//!     let target = MemoryStore::new("dst");
//!
//!     let mut engine = TransferEngine::new(TransferProperties::new().with_workers(4));
//!     engine.register_transfer(source.path("orders"), target.path("orders"));
//!
//!     for listener in engine.run().await? {
//!         println!("{}: {} rows", listener.name(), listener.row_count());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod transfer;

// Re-exports for convenient access
pub use config::{EngineConfig, SourcePolicy, TargetPolicy, TransferProperties};
pub use crate::core::{DataPath, Definition, ForeignKeyResolver, PathRef, Row, Value};
pub use error::{Result, TimeoutStage, TransferError};
pub use orchestrator::TransferEngine;
pub use pipeline::{RunSummary, TransferListener};
pub use transfer::MetricsSink;
