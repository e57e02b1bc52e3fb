//! Collaborator traits consumed by the transfer engine.
//!
//! - [`DataPath`]: a readable/writable tabular resource (table, file, query, buffer)
//! - [`ReadCursor`]: lazy row producer opened on a data path
//! - [`WriteCursor`]: row sink that batches and commits per its own policy
//! - [`ForeignKeyResolver`]: metadata service producing "child references parent" edges
//!
//! The engine never interprets the underlying storage. Cursor creation,
//! statement generation and vendor type mapping all live behind these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TransferProperties;
use crate::error::{Result, TransferError};

use super::schema::Definition;
use super::value::{Row, Value};

/// Shared handle to a data path.
pub type PathRef = Arc<dyn DataPath>;

/// What kind of resource a data path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Table,
    File,
    /// Query definitions are exempt from existence checks.
    Query,
    Buffer,
}

/// Counters reported by a write cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    /// Rows written (flushed) so far.
    pub rows: u64,
    /// Batches flushed so far.
    pub batches: u64,
    /// Commits issued so far.
    pub commits: u64,
}

/// Lazy row producer.
#[async_trait]
pub trait ReadCursor: Send {
    /// Move to the next row. Returns `false` once the cursor is exhausted.
    async fn advance(&mut self) -> Result<bool>;

    /// Current row. Only meaningful after `advance` returned `true`.
    fn row(&self) -> &[Value];

    /// Value of one column of the current row.
    fn get(&self, index: usize) -> Option<&Value> {
        self.row().get(index)
    }

    /// Move the current row out of the cursor.
    fn take_row(&mut self) -> Row {
        self.row().to_vec()
    }

    /// Release the cursor.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Row sink. Implementations batch and commit internally.
#[async_trait]
pub trait WriteCursor: Send {
    /// Accept one row laid out in the target's column order.
    async fn insert(&mut self, row: Row) -> Result<()>;

    /// Counters so far.
    fn stats(&self) -> CursorStats;

    /// Flush pending rows, commit and release the cursor.
    async fn close(&mut self) -> Result<()>;
}

/// An addressable tabular resource.
///
/// Implementations must be cheap to share: the engine holds them behind
/// [`PathRef`] and opens one cursor per worker.
#[async_trait]
pub trait DataPath: Send + Sync + fmt::Debug {
    /// Local name, used when deriving sibling paths.
    fn name(&self) -> &str;

    /// Globally unique identity, used as the dependency-graph node key.
    fn qualified_name(&self) -> String {
        self.name().to_string()
    }

    /// Resource kind.
    fn kind(&self) -> PathKind {
        PathKind::Table
    }

    /// Check whether the resource exists.
    async fn exists(&self) -> Result<bool>;

    /// Ordered column list. Empty for a resource with no structure yet.
    async fn definition(&self) -> Result<Definition>;

    /// Create the resource with the given structure.
    async fn create(&self, definition: &Definition) -> Result<()>;

    /// Give an existing, structureless resource a definition.
    async fn apply_definition(&self, definition: &Definition) -> Result<()> {
        self.create(definition).await
    }

    /// Remove all rows.
    async fn truncate(&self) -> Result<()>;

    /// Remove the resource.
    async fn drop_path(&self) -> Result<()>;

    /// Open a read cursor.
    async fn open_read(&self, props: &TransferProperties) -> Result<Box<dyn ReadCursor>>;

    /// Open a write cursor.
    async fn open_write(&self, props: &TransferProperties) -> Result<Box<dyn WriteCursor>>;

    /// Maximum number of concurrently open write cursors.
    fn max_writer_connections(&self) -> usize {
        usize::MAX
    }

    /// Qualified name of a source this one must be generated in lockstep with.
    fn generation_dependency(&self) -> Option<String> {
        None
    }

    /// Path in the same container, named `name`.
    fn resolve_child(&self, name: &str) -> Result<PathRef> {
        Err(TransferError::Config(format!(
            "{} cannot derive a child path named {}",
            self.qualified_name(),
            name
        )))
    }
}

/// "child references parent": the parent must be loaded first.
#[derive(Debug, Clone)]
pub struct ForeignKeyEdge {
    pub parent: PathRef,
    pub child: PathRef,
}

/// Foreign-key metadata service.
#[async_trait]
pub trait ForeignKeyResolver: Send + Sync {
    /// Edges whose child is one of `paths`. Parents may be paths the
    /// caller has not seen yet.
    async fn foreign_key_edges(&self, paths: &[PathRef]) -> Result<Vec<ForeignKeyEdge>>;
}
