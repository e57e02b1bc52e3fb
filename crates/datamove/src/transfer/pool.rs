//! Producer / N-consumer worker pool.
//!
//! One producer task copies the source into the bounded channel; `workers`
//! consumer tasks drain it into their own write cursors on the target. The
//! termination sequence is:
//!
//! 1. start the reporter, the producer and every consumer
//! 2. join the producer; its sender is gone, so the channel is closed
//! 3. wait for the consumers to drain and finish, bounded by the timeout
//! 4. stop the reporter (final sample) and hand back
//!
//! Errors are recorded on the listener as they are observed. A failing or
//! panicking consumer cancels the producer; the other consumers finish the
//! rows already buffered. The producer's source reads are bounded by the
//! same timeout as channel puts and takes.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransferProperties;
use crate::core::PathRef;
use crate::error::{Result, TimeoutStage, TransferError};
use crate::pipeline::{CursorCounters, TransferListener, TransferUnit};

use super::channel::{BoundedChannel, ChannelReader, ChannelWriter};
use super::cursor::{RowSink, RowSource};
use super::mapping::ColumnMapping;
use super::progress::{MetricsSink, ProgressReporter};

/// Run one unit through the pool. Every error is recorded on `listener`;
/// the first one is also returned.
pub async fn run_pool(
    unit: &TransferUnit,
    mapping: Arc<ColumnMapping>,
    listener: Arc<TransferListener>,
    sink: &MetricsSink,
) -> Result<()> {
    let props = unit.properties.clone();
    let workers = props.get_workers();
    let timeout = props.get_timeout();

    let channel = BoundedChannel::new(props.get_queue_capacity(), timeout);
    let capacity = channel.capacity();
    let reporter = ProgressReporter::spawn(
        channel.probe(),
        listener.clone(),
        sink,
        props.get_sample_interval(),
    )?;
    let (writer, reader) = channel.split();
    let abort = CancellationToken::new();

    info!(
        "{}: starting pool (consumers: {}, capacity: {}, timeout: {:?})",
        unit.name(),
        workers,
        capacity,
        timeout
    );

    let producer = tokio::spawn(produce(
        unit.source.clone(),
        props.clone(),
        writer,
        abort.clone(),
    ));

    let mut consumers = Vec::with_capacity(workers);
    for id in 0..workers {
        let counters = listener.attach_cursor(format!("consumer-{}", id));
        consumers.push(tokio::spawn(consume(
            id,
            unit.target.clone(),
            props.clone(),
            reader.clone(),
            mapping.clone(),
            counters,
            abort.clone(),
        )));
    }
    // Consumers hold the only readers now.
    drop(reader);

    let mut first_error: Option<TransferError> = None;
    let mut fail = |e: TransferError| {
        // Cancellation only follows a consumer failure, which is recorded.
        if matches!(e, TransferError::Cancelled) {
            return;
        }
        listener.record_error(&e);
        first_error.get_or_insert(e);
    };

    match producer.await {
        Ok(Ok(rows)) => debug!("{}: producer finished after {} rows", unit.name(), rows),
        Ok(Err(e)) => {
            warn!("{}: producer failed: {}", unit.name(), e);
            fail(e);
        }
        Err(e) => fail(TransferError::transfer(
            unit.name(),
            format!("producer task failed: {}", e),
        )),
    }

    for result in join_consumers(consumers, timeout).await {
        if let Err(e) = result {
            fail(e);
        }
    }

    reporter.finish().await;

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wait for every consumer. Past the timeout the stragglers are aborted and
/// a pool-shutdown timeout is reported.
async fn join_consumers(
    consumers: Vec<JoinHandle<Result<u64>>>,
    timeout: std::time::Duration,
) -> Vec<Result<u64>> {
    let aborts: Vec<_> = consumers.iter().map(|h| h.abort_handle()).collect();

    match tokio::time::timeout(timeout, join_all(consumers)).await {
        Ok(results) => results
            .into_iter()
            .enumerate()
            .map(|(id, joined)| {
                joined.unwrap_or_else(|e| {
                    Err(TransferError::transfer(
                        format!("consumer-{}", id),
                        format!("consumer task failed: {}", e),
                    ))
                })
            })
            .collect(),
        Err(_) => {
            error!("Consumers did not finish within {:?}", timeout);
            for abort in aborts {
                abort.abort();
            }
            vec![Err(TransferError::timeout(
                TimeoutStage::PoolShutdown,
                timeout,
            ))]
        }
    }
}

async fn produce(
    source: PathRef,
    props: Arc<TransferProperties>,
    writer: ChannelWriter,
    abort: CancellationToken,
) -> Result<u64> {
    let timeout = props.get_timeout();
    let mut input = RowSource::Storage(source.open_read(&props).await?);
    let mut output = RowSink::Channel(writer);

    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TransferError::Cancelled),
            read = tokio::time::timeout(timeout, input.next()) => read
                .map_err(|_| TransferError::timeout(TimeoutStage::SourceRead, timeout))??,
        };
        let Some(row) = next else {
            break;
        };
        tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(TransferError::Cancelled),
            sent = output.insert(row) => sent?,
        }
    }

    output.close().await?;
    input.close().await?;
    Ok(output.stats().rows)
}

async fn consume(
    id: usize,
    target: PathRef,
    props: Arc<TransferProperties>,
    reader: ChannelReader,
    mapping: Arc<ColumnMapping>,
    counters: Arc<CursorCounters>,
    abort: CancellationToken,
) -> Result<u64> {
    // Cancels the producer on error or panic; disarmed on success.
    let guard = abort.drop_guard();
    let result = drain(&target, &props, reader, &mapping, &counters).await;
    match &result {
        Ok(rows) => {
            debug!("consumer-{}: wrote {} rows", id, rows);
            guard.disarm();
        }
        Err(e) => warn!("consumer-{}: {}", id, e),
    }
    result
}

async fn drain(
    target: &PathRef,
    props: &TransferProperties,
    reader: ChannelReader,
    mapping: &ColumnMapping,
    counters: &CursorCounters,
) -> Result<u64> {
    let mut input = RowSource::Channel(reader);
    let mut output = RowSink::Storage(target.open_write(props).await?);

    while let Some(row) = input.next().await? {
        output.insert(mapping.remap(row)).await?;
        counters.record(output.stats());
    }

    output.close().await?;
    counters.record(output.stats());
    Ok(output.stats().rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Column, CursorStats, DataPath, Definition, LogicalType, ReadCursor, Row, Value,
        WriteCursor,
    };
    use crate::drivers::MemoryStore;
    use async_trait::async_trait;
    use crate::pipeline::ListenerMode;
    use crate::transfer::progress::SharedBuffer;
    use std::time::Duration;

    fn setup(rows: i64) -> (MemoryStore, Definition) {
        let store = MemoryStore::new("db");
        let def = Definition::new(vec![Column::new("id", LogicalType::BigInt)]);
        let data = (0..rows).map(|i| vec![Value::I64(i)]).collect();
        store.insert_table("src", def.clone(), data);
        store.insert_table("dst", def.clone(), Vec::new());
        (store, def)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_moves_every_row() {
        let (store, _) = setup(1_000);
        let props = TransferProperties::new()
            .with_workers(3)
            .with_fetch_size(16)
            .with_batch_size(50);
        let unit = TransferUnit::new(store.path("src"), store.path("dst"), Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));
        let buffer = SharedBuffer::new();

        run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(buffer.clone()),
        )
        .await
        .unwrap();

        let mut ids: Vec<i64> = store
            .rows("dst")
            .unwrap()
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..1_000).collect::<Vec<_>>());
        assert_eq!(listener.row_count(), 1_000);
        assert_eq!(listener.cursors().len(), 3);
        assert!(listener.is_success());
        assert!(buffer.contents().contains(",insert.rows,"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consumer_failure_stops_producer() {
        let (store, _) = setup(500);
        let props = TransferProperties::new()
            .with_workers(2)
            .with_queue_capacity(4);
        let target = store.table("dst").fail_after(10).into_ref();
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));

        let err = run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(SharedBuffer::new()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransferError::Cursor { .. }));
        assert!(listener
            .exceptions()
            .iter()
            .all(|e| !matches!(e, TransferError::Cancelled)));
        assert!(listener.exit_status() >= 1);
        assert!(store.row_count("dst").unwrap() < 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_consumers_time_out_producer() {
        let (store, _) = setup(20);
        let props = TransferProperties::new()
            .with_workers(2)
            .with_queue_capacity(1)
            .with_timeout(Duration::from_millis(50));
        let target = store
            .table("dst")
            .with_write_delay(Duration::from_millis(200))
            .into_ref();
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));

        let err = run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(SharedBuffer::new()),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Timeout {
                stage: TimeoutStage::ProducerWait,
                ..
            }
        ));
        assert!(!listener.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_read_times_out() {
        let (store, _) = setup(10);
        let props = TransferProperties::new()
            .with_workers(2)
            .with_timeout(Duration::from_millis(50));
        let source = store
            .table("src")
            .with_read_delay(Duration::from_secs(3600))
            .into_ref();
        let unit = TransferUnit::new(source, store.path("dst"), Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));

        let started = tokio::time::Instant::now();
        let err = run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(SharedBuffer::new()),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, TransferError::Timeout { .. }));
        assert!(listener
            .exceptions()
            .iter()
            .all(|e| matches!(e, TransferError::Timeout { .. })));
        assert_eq!(store.row_count("dst"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumers_time_out_pool_shutdown() {
        let (store, _) = setup(4);
        let props = TransferProperties::new()
            .with_workers(2)
            .with_timeout(Duration::from_millis(100));
        let target = store
            .table("dst")
            .with_write_delay(Duration::from_millis(80))
            .into_ref();
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));

        let err = run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(SharedBuffer::new()),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Timeout {
                stage: TimeoutStage::PoolShutdown,
                ..
            }
        ));
        let exceptions = listener.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].to_string(),
            "Timed out after 100ms during pool shutdown"
        );
    }

    /// Target whose write cursors panic on the first row.
    #[derive(Debug)]
    struct CrashingTarget(PathRef);

    struct CrashingWriter;

    #[async_trait]
    impl WriteCursor for CrashingWriter {
        async fn insert(&mut self, _row: Row) -> Result<()> {
            panic!("writer crashed");
        }

        fn stats(&self) -> CursorStats {
            CursorStats::default()
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DataPath for CrashingTarget {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn exists(&self) -> Result<bool> {
            self.0.exists().await
        }

        async fn definition(&self) -> Result<Definition> {
            self.0.definition().await
        }

        async fn create(&self, definition: &Definition) -> Result<()> {
            self.0.create(definition).await
        }

        async fn truncate(&self) -> Result<()> {
            self.0.truncate().await
        }

        async fn drop_path(&self) -> Result<()> {
            self.0.drop_path().await
        }

        async fn open_read(&self, props: &TransferProperties) -> Result<Box<dyn ReadCursor>> {
            self.0.open_read(props).await
        }

        async fn open_write(&self, _props: &TransferProperties) -> Result<Box<dyn WriteCursor>> {
            Ok(Box::new(CrashingWriter))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_consumers_release_producer() {
        let (store, _) = setup(100);
        let props = TransferProperties::new()
            .with_workers(2)
            .with_queue_capacity(1)
            .with_timeout(Duration::from_secs(60));
        let target: PathRef = Arc::new(CrashingTarget(store.path("dst")));
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));
        let listener = Arc::new(TransferListener::new(unit.name(), ListenerMode::Summed));

        let started = tokio::time::Instant::now();
        let result = run_pool(
            &unit,
            Arc::new(ColumnMapping::identity(1)),
            listener.clone(),
            &MetricsSink::Buffer(SharedBuffer::new()),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(60));
        let exceptions = listener.exceptions();
        assert_eq!(exceptions.len(), 2);
        assert!(exceptions
            .iter()
            .all(|e| e.to_string().contains("consumer task failed")));
    }
}
