//! Built-in data path implementations.
//!
//! - [`memory`]: in-memory tables and queries with a foreign-key catalog
//! - [`generator`]: streams produced by one shared, order-sensitive generator
//!
//! # Adding New Drivers
//!
//! A driver implements [`DataPath`](crate::core::DataPath) plus its
//! [`ReadCursor`](crate::core::ReadCursor) and
//! [`WriteCursor`](crate::core::WriteCursor). Drivers that know about
//! foreign keys also implement
//! [`ForeignKeyResolver`](crate::core::ForeignKeyResolver).

pub mod generator;
pub mod memory;

pub use generator::{CoupledGenerator, GeneratorPath};
pub use memory::{MemoryPath, MemoryStore};
