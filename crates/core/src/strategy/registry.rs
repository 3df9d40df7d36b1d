//! Adapter registry and strategy resolution.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::planner::ChainPlanner;
use super::types::ConversionStrategy;
use crate::adapter::ToolAdapter;
use crate::config::ChainConfig;
use crate::error::ConversionError;
use crate::format::FormatId;

/// Available adapters in registration order, plus the chaining policy used
/// when no single adapter handles a pair.
pub struct StrategyRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    unavailable: Vec<String>,
    chain_enabled: bool,
    planner: ChainPlanner,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            adapters: Vec::new(),
            unavailable: Vec::new(),
            chain_enabled: chain.enabled,
            planner: ChainPlanner::new(chain.hubs, chain.max_hops),
        }
    }

    /// Probes every adapter concurrently and registers the ones installed on
    /// this host, keeping their order.
    pub async fn discover(adapters: Vec<Arc<dyn ToolAdapter>>, chain: ChainConfig) -> Self {
        let probes = join_all(adapters.iter().map(|a| a.probe())).await;

        let mut registry = Self::new(chain);
        for (adapter, available) in adapters.into_iter().zip(probes) {
            if available {
                debug!(
                    "Adapter {} available (score {}, {} pairs)",
                    adapter.name(),
                    adapter.capability_score(),
                    adapter.supported_pairs().len()
                );
                registry.register(adapter);
            } else {
                warn!("Adapter {} is not installed; skipping", adapter.name());
                registry.unavailable.push(adapter.name().to_string());
            }
        }
        info!(
            "{} adapters available, {} missing",
            registry.adapters.len(),
            registry.unavailable.len()
        );
        registry
    }

    /// Adds an adapter without probing it.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Arc<dyn ToolAdapter>] {
        &self.adapters
    }

    /// Names of adapters that failed their probe during discovery.
    pub fn unavailable(&self) -> &[String] {
        &self.unavailable
    }

    pub fn planner(&self) -> &ChainPlanner {
        &self.planner
    }

    /// Whether at least one critical adapter is installed.
    pub fn critical_available(&self) -> bool {
        self.adapters.iter().any(|a| a.is_critical())
    }

    /// Highest scoring adapter for the exact pair; the earliest registered
    /// wins ties.
    pub fn best_direct(&self, from: &FormatId, to: &FormatId) -> Option<&Arc<dyn ToolAdapter>> {
        let mut best: Option<&Arc<dyn ToolAdapter>> = None;
        for adapter in self.adapters.iter().filter(|a| a.supports(from, to)) {
            match best {
                Some(current) if adapter.capability_score() <= current.capability_score() => {}
                _ => best = Some(adapter),
            }
        }
        best
    }

    /// Every format reachable from `from` in one hop, with its best adapter.
    pub fn edges_from(&self, from: &FormatId) -> Vec<(FormatId, Arc<dyn ToolAdapter>)> {
        let mut targets: Vec<FormatId> = Vec::new();
        for adapter in &self.adapters {
            for pair in adapter.supported_pairs() {
                if &pair.from == from && !targets.contains(&pair.to) {
                    targets.push(pair.to.clone());
                }
            }
        }
        targets
            .into_iter()
            .filter_map(|to| self.best_direct(from, &to).cloned().map(|a| (to, a)))
            .collect()
    }

    /// Picks the strategy for converting `source` into `target`.
    pub fn resolve(
        &self,
        source: &FormatId,
        target: &FormatId,
    ) -> Result<ConversionStrategy, ConversionError> {
        if source == target {
            return Ok(ConversionStrategy::identity(source.clone()));
        }

        if let Some(adapter) = self.best_direct(source, target) {
            return Ok(ConversionStrategy::direct(
                adapter.clone(),
                source.clone(),
                target.clone(),
            ));
        }

        if !self.chain_enabled || self.planner.hubs().is_empty() {
            return Err(ConversionError::ToolUnavailable {
                from: source.clone(),
                to: target.clone(),
            });
        }

        self.planner
            .plan(self, source, target)
            .ok_or_else(|| ConversionError::ChainPlanningFailure {
                from: source.clone(),
                to: target.clone(),
                max_hops: self.planner.max_hops(),
            })
    }
}
