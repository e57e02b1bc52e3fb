//! Core abstractions shared by the engine and its collaborators.
//!
//! - [`schema`]: column and structural definition types
//! - [`value`]: owned row values
//! - [`traits`]: data path, cursor and foreign-key traits
//!
//! The engine only talks to storage through [`traits`], so new backends
//! plug in without touching the scheduling or execution code.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{Column, Definition, LogicalType};
pub use traits::{
    CursorStats, DataPath, ForeignKeyEdge, ForeignKeyResolver, PathKind, PathRef, ReadCursor,
    WriteCursor,
};
pub use value::{Row, Value};
