//! Coupled row generator.
//!
//! One [`CoupledGenerator`] feeds several output streams from a single
//! shared sequence, the way a benchmark loader fills related tables from
//! one random stream. Every row a stream takes consumes the shared state,
//! so the streams have to be pulled round by round: a stream may only take
//! its next row once no other live stream has taken fewer. Pulling out of
//! turn is reported as a cursor error.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::TransferProperties;
use crate::core::{
    Column, DataPath, Definition, LogicalType, PathKind, PathRef, ReadCursor, Row, Value,
    WriteCursor,
};
use crate::error::{Result, TransferError};

#[derive(Debug)]
struct Stream {
    name: String,
    rows: usize,
    taken: usize,
}

#[derive(Debug)]
struct GeneratorState {
    streams: Vec<Stream>,
    sequence: i64,
}

impl GeneratorState {
    fn take(&mut self, index: usize, generator: &str) -> std::result::Result<Option<Row>, String> {
        let stream = &self.streams[index];
        if stream.taken >= stream.rows {
            return Ok(None);
        }

        let position = stream.taken;
        let behind = self
            .streams
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != index && s.taken < s.rows)
            .find(|(_, s)| s.taken < position);
        if let Some((_, other)) = behind {
            return Err(format!(
                "{}.{} pulled row {} while {} is still at row {}",
                generator, stream.name, position, other.name, other.taken
            ));
        }

        self.sequence += 1;
        let stream = &mut self.streams[index];
        stream.taken += 1;
        Ok(Some(vec![
            Value::I64(position as i64 + 1),
            Value::I64(self.sequence),
            Value::Text(stream.name.clone()),
        ]))
    }
}

/// Shared generator behind a set of [`GeneratorPath`]s.
#[derive(Debug, Clone)]
pub struct CoupledGenerator {
    name: String,
    state: Arc<Mutex<GeneratorState>>,
}

impl CoupledGenerator {
    /// Create a generator with one stream per `(name, row_count)` pair.
    pub fn new(name: impl Into<String>, streams: &[(&str, usize)]) -> Self {
        let streams = streams
            .iter()
            .map(|(name, rows)| Stream {
                name: name.to_string(),
                rows: *rows,
                taken: 0,
            })
            .collect();
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(GeneratorState {
                streams,
                sequence: 0,
            })),
        }
    }

    /// Structure shared by every stream.
    pub fn definition() -> Definition {
        Definition::new(vec![
            Column::new("id", LogicalType::BigInt).not_null(),
            Column::new("seq", LogicalType::BigInt).not_null(),
            Column::new("stream", LogicalType::Text).not_null(),
        ])
    }

    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Path of stream `index`, or `None` if out of range.
    pub fn path(&self, index: usize) -> Option<PathRef> {
        let state = self.state.lock();
        let stream = state.streams.get(index)?;
        let first = &state.streams[0].name;
        let dependency = (index > 0).then(|| format!("{}.{}", self.name, first));
        Some(Arc::new(GeneratorPath {
            generator: self.clone(),
            index,
            name: stream.name.clone(),
            qualified: format!("{}.{}", self.name, stream.name),
            dependency,
        }))
    }

    /// Paths of every stream, first stream first.
    pub fn paths(&self) -> Vec<PathRef> {
        (0..self.stream_count()).filter_map(|i| self.path(i)).collect()
    }

    /// Rows generated so far across all streams.
    pub fn generated(&self) -> i64 {
        self.state.lock().sequence
    }
}

/// One output stream of a [`CoupledGenerator`]. Read-only.
#[derive(Debug)]
pub struct GeneratorPath {
    generator: CoupledGenerator,
    index: usize,
    name: String,
    qualified: String,
    dependency: Option<String>,
}

impl GeneratorPath {
    fn read_only(&self) -> TransferError {
        TransferError::transfer(&self.qualified, "generated source is read-only")
    }
}

#[async_trait]
impl DataPath for GeneratorPath {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualified_name(&self) -> String {
        self.qualified.clone()
    }

    fn kind(&self) -> PathKind {
        PathKind::Query
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn definition(&self) -> Result<Definition> {
        Ok(CoupledGenerator::definition())
    }

    async fn create(&self, _definition: &Definition) -> Result<()> {
        Err(self.read_only())
    }

    async fn truncate(&self) -> Result<()> {
        Err(self.read_only())
    }

    async fn drop_path(&self) -> Result<()> {
        Err(self.read_only())
    }

    async fn open_read(&self, _props: &TransferProperties) -> Result<Box<dyn ReadCursor>> {
        Ok(Box::new(GeneratorCursor {
            generator: self.generator.clone(),
            index: self.index,
            qualified: self.qualified.clone(),
            current: Vec::new(),
        }))
    }

    async fn open_write(&self, _props: &TransferProperties) -> Result<Box<dyn WriteCursor>> {
        Err(self.read_only())
    }

    fn generation_dependency(&self) -> Option<String> {
        self.dependency.clone()
    }
}

struct GeneratorCursor {
    generator: CoupledGenerator,
    index: usize,
    qualified: String,
    current: Row,
}

#[async_trait]
impl ReadCursor for GeneratorCursor {
    async fn advance(&mut self) -> Result<bool> {
        let taken = self
            .generator
            .state
            .lock()
            .take(self.index, &self.generator.name);
        match taken {
            Ok(Some(row)) => {
                self.current = row;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(message) => Err(TransferError::cursor(&self.qualified, message)),
        }
    }

    fn row(&self) -> &[Value] {
        &self.current
    }

    fn take_row(&mut self) -> Row {
        std::mem::take(&mut self.current)
    }
}
