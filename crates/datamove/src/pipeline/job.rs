//! Transfer units and groups.
//!
//! A [`TransferUnit`] contains everything needed to move one source into one
//! target. Units are grouped by the scheduler: a group of one runs on its
//! own (possibly through the worker pool), a larger group runs in lockstep.

use std::fmt;
use std::sync::Arc;

use crate::config::TransferProperties;
use crate::core::PathRef;

/// One source → target pairing.
#[derive(Clone)]
pub struct TransferUnit {
    /// Data path rows are read from.
    pub source: PathRef,

    /// Data path rows are written to.
    pub target: PathRef,

    /// Effective properties. Shared by reference unless overridden per unit.
    pub properties: Arc<TransferProperties>,

    /// Added by foreign-key expansion rather than registered by the caller.
    pub discovered: bool,
}

impl TransferUnit {
    /// Create a transfer unit.
    pub fn new(source: PathRef, target: PathRef, properties: Arc<TransferProperties>) -> Self {
        Self {
            source,
            target,
            properties,
            discovered: false,
        }
    }

    /// Mark the unit as synthesized by dependency expansion.
    pub fn discovered(mut self) -> Self {
        self.discovered = true;
        self
    }

    /// Display name, `source -> target`.
    pub fn name(&self) -> String {
        format!(
            "{} -> {}",
            self.source.qualified_name(),
            self.target.qualified_name()
        )
    }

    /// Graph key of the source.
    pub fn source_key(&self) -> String {
        self.source.qualified_name()
    }
}

impl fmt::Debug for TransferUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferUnit")
            .field("source", &self.source.qualified_name())
            .field("target", &self.target.qualified_name())
            .field("discovered", &self.discovered)
            .finish()
    }
}

/// Ordered list of one or more units executed together.
#[derive(Debug, Clone)]
pub struct TransferGroup {
    pub units: Vec<TransferUnit>,
}

impl TransferGroup {
    /// Group holding a single unit.
    pub fn single(unit: TransferUnit) -> Self {
        Self { units: vec![unit] }
    }

    /// Whether the members must be interleaved in lockstep.
    pub fn is_dependent(&self) -> bool {
        self.units.len() > 1
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Source keys in member order.
    pub fn source_keys(&self) -> Vec<String> {
        self.units.iter().map(TransferUnit::source_key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;

    #[test]
    fn test_unit_name() {
        let src = MemoryStore::new("src");
        let dst = MemoryStore::new("dst");
        let unit = TransferUnit::new(
            src.path("orders"),
            dst.path("orders"),
            Arc::new(TransferProperties::default()),
        );
        assert_eq!(unit.name(), "src.orders -> dst.orders");
        assert_eq!(unit.source_key(), "src.orders");
        assert!(!unit.discovered);
        assert!(unit.clone().discovered().discovered);
    }

    #[test]
    fn test_group_kinds() {
        let src = MemoryStore::new("src");
        let dst = MemoryStore::new("dst");
        let props = Arc::new(TransferProperties::default());
        let a = TransferUnit::new(src.path("a"), dst.path("a"), props.clone());
        let b = TransferUnit::new(src.path("b"), dst.path("b"), props);

        let single = TransferGroup::single(a.clone());
        assert!(!single.is_dependent());

        let pair = TransferGroup { units: vec![a, b] };
        assert!(pair.is_dependent());
        assert_eq!(pair.source_keys(), vec!["src.a", "src.b"]);
    }
}
