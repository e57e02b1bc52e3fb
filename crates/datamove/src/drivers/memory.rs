//! In-memory data paths.
//!
//! A [`MemoryStore`] is a named container of tables plus a foreign-key
//! catalog. [`MemoryPath`] handles address one table (or a query over it)
//! and open cursors that follow the same batching and commit rules a
//! database writer would: rows are buffered up to `batch_size`, flushed as
//! one batch, and a commit is counted every `commit_frequency` batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::TransferProperties;
use crate::core::{
    CursorStats, DataPath, Definition, ForeignKeyEdge, ForeignKeyResolver, PathKind, PathRef,
    ReadCursor, Row, Value, WriteCursor,
};
use crate::error::{Result, TransferError};

#[derive(Debug, Default)]
struct TableData {
    definition: Definition,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct StoreInner {
    name: String,
    tables: Mutex<HashMap<String, TableData>>,
    /// (child, parent) pairs.
    foreign_keys: Mutex<Vec<(String, String)>>,
}

/// Named container of in-memory tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Create (or replace) a table holding `rows`.
    pub fn insert_table(&self, name: &str, definition: Definition, rows: Vec<Row>) {
        self.inner
            .tables
            .lock()
            .insert(name.to_string(), TableData { definition, rows });
    }

    /// Record that `child` references `parent`.
    pub fn add_foreign_key(&self, child: &str, parent: &str) {
        self.inner
            .foreign_keys
            .lock()
            .push((child.to_string(), parent.to_string()));
    }

    /// Handle on a table with default options.
    pub fn path(&self, name: &str) -> PathRef {
        Arc::new(self.table(name))
    }

    /// Configurable handle on a table.
    pub fn table(&self, name: &str) -> MemoryPath {
        MemoryPath {
            store: self.clone(),
            name: name.to_string(),
            qualified: format!("{}.{}", self.inner.name, name),
            options: PathOptions::default(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.tables.lock().contains_key(name)
    }

    /// Copy of a table's rows.
    pub fn rows(&self, name: &str) -> Option<Vec<Row>> {
        self.inner.tables.lock().get(name).map(|t| t.rows.clone())
    }

    /// Row count of a table.
    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.inner.tables.lock().get(name).map(|t| t.rows.len())
    }

    /// Structure of a table.
    pub fn definition(&self, name: &str) -> Option<Definition> {
        self.inner
            .tables
            .lock()
            .get(name)
            .map(|t| t.definition.clone())
    }

    /// Table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn owns(&self, path: &PathRef) -> Option<String> {
        let prefix = format!("{}.", self.inner.name);
        path.qualified_name()
            .strip_prefix(&prefix)
            .map(str::to_string)
    }
}

#[async_trait]
impl ForeignKeyResolver for MemoryStore {
    async fn foreign_key_edges(&self, paths: &[PathRef]) -> Result<Vec<ForeignKeyEdge>> {
        let by_name: HashMap<String, PathRef> = paths
            .iter()
            .filter_map(|p| self.owns(p).map(|name| (name, p.clone())))
            .collect();

        let foreign_keys = self.inner.foreign_keys.lock().clone();
        let mut seen = HashSet::new();
        let mut edges = Vec::new();

        for (child, parent) in foreign_keys {
            let Some(child_path) = by_name.get(&child) else {
                continue;
            };
            if !seen.insert((child.clone(), parent.clone())) {
                continue;
            }
            let parent_path = by_name
                .get(&parent)
                .cloned()
                .unwrap_or_else(|| self.path(&parent));
            edges.push(ForeignKeyEdge {
                parent: parent_path,
                child: child_path.clone(),
            });
        }

        debug!(
            "{}: {} foreign-key edges for {} paths",
            self.inner.name,
            edges.len(),
            paths.len()
        );
        Ok(edges)
    }
}

/// Behavior knobs of a [`MemoryPath`].
#[derive(Debug, Clone)]
struct PathOptions {
    kind: PathKind,
    max_writers: usize,
    generation_dependency: Option<String>,
    read_delay: Option<Duration>,
    write_delay: Option<Duration>,
    fail_after_rows: Option<u64>,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            kind: PathKind::Table,
            max_writers: usize::MAX,
            generation_dependency: None,
            read_delay: None,
            write_delay: None,
            fail_after_rows: None,
        }
    }
}

/// Handle on one table of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryPath {
    store: MemoryStore,
    name: String,
    qualified: String,
    options: PathOptions,
}

impl MemoryPath {
    /// Treat the path as a query definition.
    pub fn as_query(mut self) -> Self {
        self.options.kind = PathKind::Query;
        self
    }

    /// Limit concurrently open writers.
    pub fn with_max_writers(mut self, max: usize) -> Self {
        self.options.max_writers = max;
        self
    }

    /// Declare a lockstep generation dependency on another source.
    pub fn with_generation_dependency(mut self, qualified_name: impl Into<String>) -> Self {
        self.options.generation_dependency = Some(qualified_name.into());
        self
    }

    /// Sleep before producing each row.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.options.read_delay = Some(delay);
        self
    }

    /// Sleep before accepting each row.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.options.write_delay = Some(delay);
        self
    }

    /// Fail every insert once a writer has accepted `rows` rows.
    pub fn fail_after(mut self, rows: u64) -> Self {
        self.options.fail_after_rows = Some(rows);
        self
    }

    /// Share the handle.
    pub fn into_ref(self) -> PathRef {
        Arc::new(self)
    }

    fn missing(&self) -> TransferError {
        TransferError::transfer(&self.qualified, "table does not exist")
    }
}

#[async_trait]
impl DataPath for MemoryPath {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualified_name(&self) -> String {
        self.qualified.clone()
    }

    fn kind(&self) -> PathKind {
        self.options.kind
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.store.contains(&self.name))
    }

    async fn definition(&self) -> Result<Definition> {
        self.store
            .definition(&self.name)
            .ok_or_else(|| self.missing())
    }

    async fn create(&self, definition: &Definition) -> Result<()> {
        let mut tables = self.store.inner.tables.lock();
        if tables.contains_key(&self.name) {
            return Err(TransferError::transfer(
                &self.qualified,
                "table already exists",
            ));
        }
        tables.insert(
            self.name.clone(),
            TableData {
                definition: definition.clone(),
                rows: Vec::new(),
            },
        );
        debug!("{}: created with {} columns", self.qualified, definition.len());
        Ok(())
    }

    async fn apply_definition(&self, definition: &Definition) -> Result<()> {
        let mut tables = self.store.inner.tables.lock();
        let table = tables.entry(self.name.clone()).or_default();
        if !table.definition.is_empty() {
            return Err(TransferError::transfer(
                &self.qualified,
                "table already has a structure",
            ));
        }
        table.definition = definition.clone();
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        let mut tables = self.store.inner.tables.lock();
        let table = tables.get_mut(&self.name).ok_or_else(|| self.missing())?;
        table.rows.clear();
        Ok(())
    }

    async fn drop_path(&self) -> Result<()> {
        self.store
            .inner
            .tables
            .lock()
            .remove(&self.name)
            .map(|_| ())
            .ok_or_else(|| self.missing())
    }

    async fn open_read(&self, props: &TransferProperties) -> Result<Box<dyn ReadCursor>> {
        if !self.store.contains(&self.name) {
            return Err(self.missing());
        }
        Ok(Box::new(MemoryReadCursor {
            path: self.clone(),
            fetch_size: props.get_fetch_size().max(1),
            buffer: Vec::new(),
            offset: 0,
            current: Vec::new(),
            exhausted: false,
        }))
    }

    async fn open_write(&self, props: &TransferProperties) -> Result<Box<dyn WriteCursor>> {
        let width = self.definition().await?.len();
        Ok(Box::new(MemoryWriteCursor {
            path: self.clone(),
            width,
            batch_size: props.get_batch_size().max(1),
            commit_frequency: props.get_commit_frequency().max(1),
            pending: Vec::new(),
            accepted: 0,
            batches_since_commit: 0,
            stats: CursorStats::default(),
        }))
    }

    fn max_writer_connections(&self) -> usize {
        self.options.max_writers
    }

    fn generation_dependency(&self) -> Option<String> {
        self.options.generation_dependency.clone()
    }

    fn resolve_child(&self, name: &str) -> Result<PathRef> {
        Ok(self.store.path(name))
    }
}

/// Reads a table `fetch_size` rows at a time.
struct MemoryReadCursor {
    path: MemoryPath,
    fetch_size: usize,
    buffer: Vec<Row>,
    offset: usize,
    current: Row,
    exhausted: bool,
}

impl MemoryReadCursor {
    fn fetch(&mut self) -> Result<()> {
        let tables = self.path.store.inner.tables.lock();
        let table = tables
            .get(&self.path.name)
            .ok_or_else(|| self.path.missing())?;
        let end = (self.offset + self.fetch_size).min(table.rows.len());
        // Reverse so rows can be popped off the end in order.
        self.buffer = table.rows[self.offset.min(end)..end]
            .iter()
            .rev()
            .cloned()
            .collect();
        self.offset = end;
        if self.buffer.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[async_trait]
impl ReadCursor for MemoryReadCursor {
    async fn advance(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if let Some(delay) = self.path.options.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.buffer.is_empty() {
            self.fetch()?;
        }
        match self.buffer.pop() {
            Some(row) => {
                self.current = row;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn row(&self) -> &[Value] {
        &self.current
    }

    fn take_row(&mut self) -> Row {
        std::mem::take(&mut self.current)
    }
}

/// Buffers rows and appends them to the table batch by batch.
struct MemoryWriteCursor {
    path: MemoryPath,
    width: usize,
    batch_size: usize,
    commit_frequency: usize,
    pending: Vec<Row>,
    accepted: u64,
    batches_since_commit: usize,
    stats: CursorStats,
}

impl MemoryWriteCursor {
    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut tables = self.path.store.inner.tables.lock();
        let table = tables
            .get_mut(&self.path.name)
            .ok_or_else(|| self.path.missing())?;
        let n = self.pending.len() as u64;
        table.rows.append(&mut self.pending);

        self.stats.rows += n;
        self.stats.batches += 1;
        self.batches_since_commit += 1;
        if self.batches_since_commit >= self.commit_frequency {
            self.stats.commits += 1;
            self.batches_since_commit = 0;
        }
        Ok(())
    }
}

#[async_trait]
impl WriteCursor for MemoryWriteCursor {
    async fn insert(&mut self, row: Row) -> Result<()> {
        if let Some(delay) = self.path.options.write_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(limit) = self.path.options.fail_after_rows {
            if self.accepted >= limit {
                return Err(TransferError::cursor(
                    &self.path.qualified,
                    format!("insert rejected after {} rows", limit),
                ));
            }
        }
        if row.len() != self.width {
            return Err(TransferError::cursor(
                &self.path.qualified,
                format!("row has {} values, table has {} columns", row.len(), self.width),
            ));
        }

        self.pending.push(row);
        self.accepted += 1;
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn stats(&self) -> CursorStats {
        self.stats
    }

    async fn close(&mut self) -> Result<()> {
        self.flush()?;
        if self.batches_since_commit > 0 {
            self.stats.commits += 1;
            self.batches_since_commit = 0;
        }
        Ok(())
    }
}
