//! Uniform row source/sink over storage cursors and the bounded channel.
//!
//! Producer and consumer loops are written once against [`RowSource`] and
//! [`RowSink`]; whether the other end is a real data path or the
//! intermediate channel is decided when the adapter is built.

use crate::core::{CursorStats, ReadCursor, Row, WriteCursor};
use crate::error::Result;

use super::channel::{ChannelReader, ChannelWriter};

/// Where rows come from.
pub enum RowSource {
    /// Read cursor opened on a data path.
    Storage(Box<dyn ReadCursor>),
    /// Consumer end of the bounded channel.
    Channel(ChannelReader),
}

impl RowSource {
    /// Next row, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        match self {
            RowSource::Storage(cursor) => {
                if cursor.advance().await? {
                    Ok(Some(cursor.take_row()))
                } else {
                    Ok(None)
                }
            }
            RowSource::Channel(reader) => reader.recv().await,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            RowSource::Storage(cursor) => cursor.close().await,
            RowSource::Channel(_) => Ok(()),
        }
    }
}

/// Where rows go.
pub enum RowSink {
    /// Write cursor opened on a data path.
    Storage(Box<dyn WriteCursor>),
    /// Producer end of the bounded channel.
    Channel(ChannelWriter),
}

impl RowSink {
    pub async fn insert(&mut self, row: Row) -> Result<()> {
        match self {
            RowSink::Storage(cursor) => cursor.insert(row).await,
            RowSink::Channel(writer) => writer.send(row).await,
        }
    }

    /// Counters so far. A channel counts every enqueued row as written.
    pub fn stats(&self) -> CursorStats {
        match self {
            RowSink::Storage(cursor) => cursor.stats(),
            RowSink::Channel(writer) => CursorStats {
                rows: writer.sent(),
                ..CursorStats::default()
            },
        }
    }

    /// Flush and release. Closing the channel marks the producer as done.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            RowSink::Storage(cursor) => cursor.close().await,
            RowSink::Channel(writer) => {
                writer.close();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferProperties;
    use crate::core::{Column, Definition, LogicalType, Value};
    use crate::drivers::MemoryStore;
    use crate::transfer::channel::BoundedChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_storage_to_channel_to_storage() {
        let store = MemoryStore::new("db");
        let def = Definition::new(vec![Column::new("a", LogicalType::Int)]);
        store.insert_table("src", def.clone(), vec![vec![Value::I32(1)], vec![Value::I32(2)]]);
        store.insert_table("dst", def, Vec::new());
        let props = TransferProperties::default();

        let (writer, reader) = BoundedChannel::new(4, Duration::from_secs(1)).split();
        let mut source = RowSource::Storage(store.path("src").open_read(&props).await.unwrap());
        let mut to_channel = RowSink::Channel(writer);
        while let Some(row) = source.next().await.unwrap() {
            to_channel.insert(row).await.unwrap();
        }
        assert_eq!(to_channel.stats().rows, 2);
        to_channel.close().await.unwrap();

        let mut from_channel = RowSource::Channel(reader);
        let mut target = RowSink::Storage(store.path("dst").open_write(&props).await.unwrap());
        while let Some(row) = from_channel.next().await.unwrap() {
            target.insert(row).await.unwrap();
        }
        target.close().await.unwrap();
        from_channel.close().await.unwrap();

        assert_eq!(
            store.rows("dst").unwrap(),
            vec![vec![Value::I32(1)], vec![Value::I32(2)]]
        );
        assert_eq!(target.stats().rows, 2);
    }
}
