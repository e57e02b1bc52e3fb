//! Transfer engine - registration and scheduled execution.

mod graph;

pub use graph::{schedule, DependencyGraph};

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{validate_properties, EngineConfig, TransferProperties};
use crate::core::{ForeignKeyResolver, PathRef};
use crate::error::{Result, TransferError};
use crate::pipeline::{RunSummary, TransferListener, TransferUnit};
use crate::transfer::{self, MetricsSink};

/// Accumulates source → target registrations and runs them in dependency
/// order.
pub struct TransferEngine {
    properties: Arc<TransferProperties>,
    dependency_resolution: bool,
    resolver: Option<Arc<dyn ForeignKeyResolver>>,
    sink: Option<MetricsSink>,
    pending: Vec<TransferUnit>,
}

impl TransferEngine {
    /// Create an engine whose units share `properties`.
    pub fn new(properties: TransferProperties) -> Self {
        Self {
            properties: Arc::new(properties),
            dependency_resolution: false,
            resolver: None,
            sink: None,
            pending: Vec::new(),
        }
    }

    /// Create an engine from a loaded configuration file.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.properties.clone())
            .with_dependency_resolution(config.dependency_resolution)
    }

    /// Toggle foreign-key driven ordering and expansion.
    pub fn with_dependency_resolution(mut self, enabled: bool) -> Self {
        self.dependency_resolution = enabled;
        self
    }

    /// Foreign-key metadata used when dependency resolution is on.
    pub fn with_foreign_keys(mut self, resolver: Arc<dyn ForeignKeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Send progress samples here instead of the properties' sink.
    pub fn with_metrics_sink(mut self, sink: MetricsSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shared properties.
    pub fn properties(&self) -> &TransferProperties {
        &self.properties
    }

    /// Registered units not yet run.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Register one transfer using the shared properties.
    pub fn register_transfer(&mut self, source: PathRef, target: PathRef) -> &mut Self {
        self.pending
            .push(TransferUnit::new(source, target, self.properties.clone()));
        self
    }

    /// Register one transfer whose set properties override the shared ones.
    pub fn register_transfer_with(
        &mut self,
        source: PathRef,
        target: PathRef,
        overrides: TransferProperties,
    ) -> &mut Self {
        let properties = Arc::new(overrides.merged_over(&self.properties));
        self.pending
            .push(TransferUnit::new(source, target, properties));
        self
    }

    /// Register every source into `target`'s container, each under its own
    /// name.
    pub fn register_transfers<I>(&mut self, sources: I, target: &PathRef) -> Result<&mut Self>
    where
        I: IntoIterator<Item = PathRef>,
    {
        for source in sources {
            let child = target.resolve_child(source.name())?;
            self.register_transfer(source, child);
        }
        Ok(self)
    }

    /// Execute every registered transfer in scheduled order.
    ///
    /// Returns one listener per executed unit, failed or not. Errors found
    /// before any unit starts (invalid properties, worker limits, dependency
    /// cycles) are returned instead. Registrations are consumed either way.
    pub async fn run(&mut self) -> Result<Vec<Arc<TransferListener>>> {
        let units = std::mem::take(&mut self.pending);
        info!("Starting run with {} registered transfers", units.len());

        validate_properties(&self.properties)?;
        for unit in &units {
            validate_properties(&unit.properties)?;
        }

        let resolver = match (self.dependency_resolution, &self.resolver) {
            (false, _) => None,
            (true, Some(resolver)) => Some(resolver.as_ref()),
            (true, None) => {
                return Err(TransferError::Config(
                    "dependency resolution requires a foreign-key resolver".into(),
                ))
            }
        };

        let groups = graph::schedule(units, resolver, self.properties.clone()).await?;

        for group in groups.iter().filter(|g| !g.is_dependent()) {
            for unit in &group.units {
                transfer::check_worker_limit(unit)?;
            }
        }

        let mut listeners = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            debug!(
                "Group {}/{}: {}",
                i + 1,
                groups.len(),
                group.source_keys().join(", ")
            );
            if group.is_dependent() {
                listeners.extend(transfer::execute_group(group).await);
            } else {
                for unit in &group.units {
                    let sink = self.sink_for(unit);
                    listeners.push(transfer::execute_unit(unit, &sink).await);
                }
            }
        }

        info!("{}", RunSummary::from_listeners(&listeners).summary());
        Ok(listeners)
    }

    fn sink_for(&self, unit: &TransferUnit) -> MetricsSink {
        self.sink
            .clone()
            .unwrap_or_else(|| MetricsSink::from_properties(&unit.properties))
    }
}
