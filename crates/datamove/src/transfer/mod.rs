//! Transfer execution.
//!
//! An independent unit runs either as a direct single-worker copy or
//! through the producer/consumer [`pool`]. A dependent group runs in
//! [`lockstep`]. Both start with the same pre-flight: source existence,
//! target structural policy and column mapping, before any row moves.

pub mod channel;
pub mod cursor;
pub mod lockstep;
pub mod mapping;
pub mod pool;
pub mod progress;

pub use channel::{BoundedChannel, ChannelProbe, ChannelReader, ChannelWriter};
pub use cursor::{RowSink, RowSource};
pub use lockstep::LockstepOutcome;
pub use mapping::ColumnMapping;
pub use progress::{MetricsSink, SharedBuffer};

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::{SourcePolicy, TargetPolicy};
use crate::core::PathKind;
use crate::error::{Result, TransferError};
use crate::pipeline::{ListenerMode, TransferGroup, TransferListener, TransferUnit};

/// Check the source, apply the target policy and compute the mapping.
pub async fn preflight(unit: &TransferUnit) -> Result<ColumnMapping> {
    let props = &unit.properties;
    let source = &unit.source;
    let target = &unit.target;

    if source.kind() != PathKind::Query && !source.exists().await? {
        return Err(TransferError::MissingSource(source.qualified_name()));
    }

    let source_def = source.definition().await?;
    ColumnMapping::check_supported(
        &source.qualified_name(),
        &source_def,
        props.get_unsupported_types(),
    )?;

    let policy = props.get_target_policy();
    let exists = target.exists().await?;
    debug!(
        "{}: target policy {:?} (target exists: {})",
        unit.name(),
        policy,
        exists
    );

    match (policy, exists) {
        (TargetPolicy::Create, true) => {
            return Err(TransferError::Config(format!(
                "target {} already exists",
                target.qualified_name()
            )));
        }
        (TargetPolicy::Truncate, false) => {
            return Err(TransferError::Config(format!(
                "target {} does not exist and cannot be truncated",
                target.qualified_name()
            )));
        }
        (TargetPolicy::Truncate | TargetPolicy::TruncateIfExists, true) => {
            // Validate before destroying rows.
            let mapping = mapping::map_columns(source, &source_def, target, props).await?;
            target.truncate().await?;
            info!("{}: truncated target", unit.name());
            return Ok(mapping);
        }
        (TargetPolicy::DropRecreate, true) => {
            target.drop_path().await?;
            target.create(&source_def).await?;
            info!("{}: dropped and recreated target", unit.name());
        }
        (TargetPolicy::CreateIfAbsent, true) => {}
        (_, false) => {
            target.create(&source_def).await?;
            info!("{}: created target", unit.name());
        }
    }

    mapping::map_columns(source, &source_def, target, props).await
}

/// Apply the source policy of a unit that completed without exceptions.
pub async fn apply_source_policy(unit: &TransferUnit) -> Result<()> {
    match unit.properties.get_source_policy() {
        SourcePolicy::None => Ok(()),
        SourcePolicy::Truncate => {
            unit.source.truncate().await?;
            info!("{}: truncated source", unit.name());
            Ok(())
        }
        SourcePolicy::Drop => {
            unit.source.drop_path().await?;
            info!("{}: dropped source", unit.name());
            Ok(())
        }
    }
}

/// Reject more consumers than the target accepts writers.
pub fn check_worker_limit(unit: &TransferUnit) -> Result<()> {
    let requested = unit.properties.get_workers();
    let max = unit.target.max_writer_connections();
    if requested > 1 && requested > max {
        return Err(TransferError::WorkerLimit {
            target: unit.target.qualified_name(),
            requested,
            max,
        });
    }
    Ok(())
}

/// Run an independent unit. The listener is always returned populated;
/// failures are recorded on it.
pub async fn execute_unit(unit: &TransferUnit, sink: &MetricsSink) -> Arc<TransferListener> {
    let workers = unit.properties.get_workers();
    let mode = if workers > 1 {
        ListenerMode::Summed
    } else {
        ListenerMode::Direct
    };
    let listener = Arc::new(TransferListener::new(unit.name(), mode));

    info!("{}: starting (workers: {})", unit.name(), workers);
    listener.start();

    let result = run_unit(unit, &listener, sink).await;
    if result.is_ok() {
        if let Err(e) = apply_source_policy(unit).await {
            listener.record_error(&e);
        }
    }

    listener.stop();
    log_finished(&listener);
    listener
}

async fn run_unit(
    unit: &TransferUnit,
    listener: &Arc<TransferListener>,
    sink: &MetricsSink,
) -> Result<()> {
    let mapping = listener.observe(preflight(unit).await)?;

    if unit.properties.get_workers() == 1 {
        let copied = copy_direct(unit, &mapping, listener).await;
        listener.observe(copied)
    } else {
        listener.observe(check_worker_limit(unit))?;
        // The pool records its own errors.
        pool::run_pool(unit, Arc::new(mapping), listener.clone(), sink).await
    }
}

/// Single reader, single writer, no channel. Row order is preserved.
async fn copy_direct(
    unit: &TransferUnit,
    mapping: &ColumnMapping,
    listener: &TransferListener,
) -> Result<()> {
    let props = &unit.properties;
    let mut source = RowSource::Storage(unit.source.open_read(props).await?);
    let mut sink = RowSink::Storage(unit.target.open_write(props).await?);

    while let Some(row) = source.next().await? {
        sink.insert(mapping.remap(row)).await?;
        listener.record_stats(sink.stats());
    }

    sink.close().await?;
    listener.record_stats(sink.stats());
    source.close().await
}

/// Run a dependent group in lockstep; one listener per member.
pub async fn execute_group(group: &TransferGroup) -> Vec<Arc<TransferListener>> {
    let listeners: Vec<Arc<TransferListener>> = group
        .units
        .iter()
        .map(|u| Arc::new(TransferListener::new(u.name(), ListenerMode::Direct)))
        .collect();

    info!(
        "Starting lockstep group: {}",
        group.source_keys().join(", ")
    );
    for listener in &listeners {
        listener.start();
    }

    let mut mappings = Vec::with_capacity(group.len());
    let mut ready = true;
    for (index, unit) in group.units.iter().enumerate() {
        match preflight(unit).await {
            Ok(mapping) => mappings.push(mapping),
            Err(e) => {
                error!("{}: pre-flight failed: {}", unit.name(), e);
                lockstep::stop_group(&group.units, &listeners, index, &e);
                ready = false;
                break;
            }
        }
    }

    if ready {
        if let Ok(outcome) = lockstep::run_lockstep(&group.units, mappings, &listeners).await {
            debug!("Lockstep group moved {:?} rows", outcome.rows);
            for (unit, listener) in group.units.iter().zip(&listeners) {
                if let Err(e) = apply_source_policy(unit).await {
                    listener.record_error(&e);
                }
            }
        }
    }

    for listener in &listeners {
        listener.stop();
        log_finished(listener);
    }
    listeners
}

fn log_finished(listener: &TransferListener) {
    if listener.is_success() {
        info!(
            "{}: transferred {} rows in {:?} ({:.0} rows/sec, {} commits)",
            listener.name(),
            listener.row_count(),
            listener.elapsed(),
            listener.rows_per_second(),
            listener.commit_count()
        );
    } else {
        error!(
            "{}: failed with {} exception(s) after {} rows",
            listener.name(),
            listener.exit_status(),
            listener.row_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferProperties;
    use crate::core::{Column, Definition, LogicalType, Value};
    use crate::drivers::MemoryStore;

    fn source_def() -> Definition {
        Definition::new(vec![
            Column::new("a", LogicalType::Int),
            Column::new("b", LogicalType::Text),
        ])
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::I32(1), Value::from("x")],
            vec![Value::I32(2), Value::from("y")],
        ]
    }

    fn unit(store: &MemoryStore, props: TransferProperties) -> TransferUnit {
        TransferUnit::new(store.path("src"), store.path("dst"), Arc::new(props))
    }

    #[tokio::test]
    async fn test_single_worker_creates_target_and_copies() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());

        let unit = unit(&store, TransferProperties::default());
        let listener = execute_unit(&unit, &MetricsSink::Stdout).await;
        assert_eq!(listener.exit_status(), 0);
        assert_eq!(listener.row_count(), 2);
        assert_eq!(listener.commit_count(), 1);
        assert_eq!(store.rows("dst").unwrap(), rows());
        assert_eq!(store.definition("dst"), Some(source_def()));
    }

    #[tokio::test]
    async fn test_missing_source_is_recorded() {
        let store = MemoryStore::new("db");
        let unit = unit(&store, TransferProperties::default());
        let listener = execute_unit(&unit, &MetricsSink::Stdout).await;
        assert_eq!(listener.exit_status(), 1);
        assert!(matches!(
            listener.exceptions()[0],
            TransferError::MissingSource(_)
        ));
        assert!(!store.contains("dst"));
    }

    #[tokio::test]
    async fn test_query_source_skips_existence_check() {
        let store = MemoryStore::new("db");
        let query = store.table("q").as_query().into_ref();
        let unit = TransferUnit::new(
            query,
            store.path("dst"),
            Arc::new(TransferProperties::default()),
        );
        // Passes the existence check, then fails on the missing structure.
        let err = preflight(&unit).await.unwrap_err();
        assert!(!matches!(err, TransferError::MissingSource(_)));
    }

    #[tokio::test]
    async fn test_column_mismatch_leaves_target_untouched() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());
        let narrow = Definition::new(vec![Column::new("a", LogicalType::Int)]);
        store.insert_table("dst", narrow, vec![vec![Value::I32(9)]]);

        let props = TransferProperties::new().with_target_policy(TargetPolicy::Truncate);
        let listener = execute_unit(&unit(&store, props), &MetricsSink::Stdout).await;
        assert!(matches!(
            listener.exceptions()[0],
            TransferError::ColumnMismatch { .. }
        ));
        assert_eq!(store.row_count("dst"), Some(1));
    }

    #[tokio::test]
    async fn test_reordered_target_with_extra_column() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());
        let target_def = Definition::new(vec![
            Column::new("B", LogicalType::Text),
            Column::new("note", LogicalType::Text),
            Column::new("A", LogicalType::Int),
        ]);
        store.insert_table("dst", target_def, Vec::new());

        let unit = unit(&store, TransferProperties::default());
        let listener = execute_unit(&unit, &MetricsSink::Stdout).await;
        assert!(listener.is_success());
        assert_eq!(
            store.rows("dst").unwrap()[0],
            vec![Value::from("x"), Value::Null, Value::I32(1)]
        );
    }

    #[tokio::test]
    async fn test_target_policies() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());
        store.insert_table("dst", source_def(), rows());

        let create = TransferProperties::new().with_target_policy(TargetPolicy::Create);
        assert!(matches!(
            preflight(&unit(&store, create)).await,
            Err(TransferError::Config(_))
        ));

        let append = TransferProperties::default();
        preflight(&unit(&store, append)).await.unwrap();
        assert_eq!(store.row_count("dst"), Some(2));

        let truncate =
            TransferProperties::new().with_target_policy(TargetPolicy::TruncateIfExists);
        preflight(&unit(&store, truncate)).await.unwrap();
        assert_eq!(store.row_count("dst"), Some(0));

        let narrow = Definition::new(vec![Column::new("a", LogicalType::Int)]);
        store.insert_table("dst", narrow, Vec::new());
        let recreate = TransferProperties::new().with_target_policy(TargetPolicy::DropRecreate);
        preflight(&unit(&store, recreate)).await.unwrap();
        assert_eq!(store.definition("dst"), Some(source_def()));

        store.path("dst").drop_path().await.unwrap();
        let truncate = TransferProperties::new().with_target_policy(TargetPolicy::Truncate);
        assert!(preflight(&unit(&store, truncate)).await.is_err());
    }

    #[tokio::test]
    async fn test_source_policy_runs_after_success() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());
        let props = TransferProperties::new().with_source_policy(SourcePolicy::Drop);

        let listener = execute_unit(&unit(&store, props), &MetricsSink::Stdout).await;
        assert!(listener.is_success());
        assert!(!store.contains("src"));
        assert_eq!(store.row_count("dst"), Some(2));
    }

    #[tokio::test]
    async fn test_source_policy_skipped_on_failure() {
        let store = MemoryStore::new("db");
        store.insert_table("src", source_def(), rows());
        store.insert_table("dst", source_def(), Vec::new());
        let target = store.table("dst").fail_after(0).into_ref();
        let props = TransferProperties::new().with_source_policy(SourcePolicy::Truncate);
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));

        let listener = execute_unit(&unit, &MetricsSink::Stdout).await;
        assert!(!listener.is_success());
        assert_eq!(store.row_count("src"), Some(2));
    }

    #[tokio::test]
    async fn test_worker_limit() {
        let store = MemoryStore::new("db");
        let target = store.table("dst").with_max_writers(1).into_ref();
        let props = TransferProperties::new().with_workers(5);
        let unit = TransferUnit::new(store.path("src"), target, Arc::new(props));
        assert!(matches!(
            check_worker_limit(&unit),
            Err(TransferError::WorkerLimit {
                requested: 5,
                max: 1,
                ..
            })
        ));
    }
}
