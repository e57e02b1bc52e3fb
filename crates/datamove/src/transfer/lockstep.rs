//! Lockstep executor for dependent groups.
//!
//! Members are sources produced by one coupled generator, so no member may
//! run ahead of another: each round advances every still-producing member
//! by exactly one row, in member order, on the calling task. Rounds repeat
//! until a full pass produces nothing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::pipeline::{TransferListener, TransferUnit};

use super::cursor::{RowSink, RowSource};
use super::mapping::ColumnMapping;

/// Per-member result of a lockstep run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockstepOutcome {
    /// Rounds in which at least one member produced a row.
    pub rounds: usize,
    /// Rows moved per member.
    pub rows: Vec<u64>,
    /// Last round (1-based) in which each member produced a row; 0 if none.
    pub last_round: Vec<usize>,
}

struct Member {
    source: RowSource,
    sink: RowSink,
    mapping: ColumnMapping,
    exhausted: bool,
}

/// Interleave already pre-flighted members. `mappings[i]` and
/// `listeners[i]` belong to `units[i]`.
///
/// A member failure is recorded on that member's listener, the other
/// members are marked as stopped, and the error is returned.
pub async fn run_lockstep(
    units: &[TransferUnit],
    mappings: Vec<ColumnMapping>,
    listeners: &[Arc<TransferListener>],
) -> Result<LockstepOutcome> {
    let mut members = Vec::with_capacity(units.len());
    for (index, (unit, mapping)) in units.iter().zip(mappings).enumerate() {
        match open_member(unit, mapping).await {
            Ok(member) => members.push(member),
            Err(e) => {
                stop_group(units, listeners, index, &e);
                return Err(e);
            }
        }
    }

    info!("Lockstep group of {} members started", units.len());

    let mut outcome = LockstepOutcome {
        rounds: 0,
        rows: vec![0; members.len()],
        last_round: vec![0; members.len()],
    };

    loop {
        let mut active = false;
        let round = outcome.rounds + 1;

        for (index, member) in members.iter_mut().enumerate() {
            if member.exhausted {
                continue;
            }
            match step(member).await {
                Ok(true) => {
                    active = true;
                    outcome.rows[index] += 1;
                    outcome.last_round[index] = round;
                    listeners[index].record_stats(member.sink.stats());
                }
                Ok(false) => {
                    debug!("{}: exhausted after round {}", units[index].name(), round - 1);
                    member.exhausted = true;
                }
                Err(e) => {
                    warn!("{}: failed in round {}: {}", units[index].name(), round, e);
                    stop_group(units, listeners, index, &e);
                    return Err(e);
                }
            }
        }

        if !active {
            break;
        }
        outcome.rounds = round;
    }

    for (index, member) in members.iter_mut().enumerate() {
        let closed = async {
            member.sink.close().await?;
            member.source.close().await
        }
        .await;
        listeners[index].record_stats(member.sink.stats());
        if let Err(e) = closed {
            stop_group(units, listeners, index, &e);
            return Err(e);
        }
    }

    info!(
        "Lockstep group finished after {} rounds ({} rows)",
        outcome.rounds,
        outcome.rows.iter().sum::<u64>()
    );
    Ok(outcome)
}

async fn open_member(unit: &TransferUnit, mapping: ColumnMapping) -> Result<Member> {
    let source = RowSource::Storage(unit.source.open_read(&unit.properties).await?);
    let sink = RowSink::Storage(unit.target.open_write(&unit.properties).await?);
    Ok(Member {
        source,
        sink,
        mapping,
        exhausted: false,
    })
}

/// Move at most one row.
async fn step(member: &mut Member) -> Result<bool> {
    match member.source.next().await? {
        Some(row) => {
            member.sink.insert(member.mapping.remap(row)).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Record `error` on the failed member and a stop notice on the others.
pub(crate) fn stop_group(
    units: &[TransferUnit],
    listeners: &[Arc<TransferListener>],
    failed: usize,
    error: &TransferError,
) {
    for (index, listener) in listeners.iter().enumerate() {
        if index == failed {
            listener.record_error(error);
        } else {
            listener.record_error(&TransferError::transfer(
                units[index].name(),
                format!("lockstep group stopped: {} failed", units[failed].name()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferProperties;
    use crate::drivers::{CoupledGenerator, MemoryStore};
    use crate::pipeline::ListenerMode;

    fn group(gen: &CoupledGenerator, store: &MemoryStore) -> Vec<TransferUnit> {
        let props = Arc::new(TransferProperties::default());
        gen.paths()
            .into_iter()
            .map(|source| {
                store.insert_table(source.name(), CoupledGenerator::definition(), Vec::new());
                let target = store.path(source.name());
                TransferUnit::new(source, target, props.clone())
            })
            .collect()
    }

    fn listeners(units: &[TransferUnit]) -> Vec<Arc<TransferListener>> {
        units
            .iter()
            .map(|u| Arc::new(TransferListener::new(u.name(), ListenerMode::Direct)))
            .collect()
    }

    #[tokio::test]
    async fn test_rounds_follow_longest_member() {
        let gen = CoupledGenerator::new("gen", &[("a", 5), ("b", 3)]);
        let store = MemoryStore::new("out");
        let units = group(&gen, &store);
        let listeners = listeners(&units);
        let mappings = vec![ColumnMapping::identity(3), ColumnMapping::identity(3)];

        let outcome = run_lockstep(&units, mappings, &listeners).await.unwrap();
        assert_eq!(outcome.rounds, 5);
        assert_eq!(outcome.rows, vec![5, 3]);
        assert_eq!(outcome.last_round, vec![5, 3]);
        assert_eq!(store.row_count("a"), Some(5));
        assert_eq!(store.row_count("b"), Some(3));
        assert_eq!(listeners[0].row_count(), 5);
        assert_eq!(listeners[1].row_count(), 3);
    }

    #[tokio::test]
    async fn test_rounds_interleave_generator_sequence() {
        let gen = CoupledGenerator::new("gen", &[("a", 2), ("b", 2)]);
        let store = MemoryStore::new("out");
        let units = group(&gen, &store);
        let listeners = listeners(&units);
        let mappings = vec![ColumnMapping::identity(3), ColumnMapping::identity(3)];

        run_lockstep(&units, mappings, &listeners).await.unwrap();
        let seq = |table: &str| -> Vec<i64> {
            store
                .rows(table)
                .unwrap()
                .iter()
                .map(|r| r[1].as_i64().unwrap())
                .collect()
        };
        assert_eq!(seq("a"), vec![1, 3]);
        assert_eq!(seq("b"), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_member_failure_stops_group() {
        let gen = CoupledGenerator::new("gen", &[("a", 4), ("b", 4)]);
        let store = MemoryStore::new("out");
        store.insert_table("a", CoupledGenerator::definition(), Vec::new());
        store.insert_table("b", CoupledGenerator::definition(), Vec::new());
        let props = Arc::new(TransferProperties::default());
        let paths = gen.paths();
        let units = vec![
            TransferUnit::new(paths[0].clone(), store.path("a"), props.clone()),
            TransferUnit::new(
                paths[1].clone(),
                store.table("b").fail_after(1).into_ref(),
                props,
            ),
        ];
        let listeners = listeners(&units);
        let mappings = vec![ColumnMapping::identity(3), ColumnMapping::identity(3)];

        let err = run_lockstep(&units, mappings, &listeners).await.unwrap_err();
        assert!(matches!(err, TransferError::Cursor { .. }));
        assert_eq!(listeners[0].exit_status(), 1);
        assert_eq!(listeners[1].exit_status(), 1);
        assert!(listeners[0].exceptions()[0]
            .to_string()
            .contains("lockstep group stopped"));
    }
}
