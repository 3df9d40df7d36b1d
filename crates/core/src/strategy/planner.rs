//! Multi-hop chain planning through hub formats.

use tracing::debug;

use super::registry::StrategyRegistry;
use super::types::{ConversionStrategy, Hop};
use crate::format::FormatId;

/// Finds the shortest chain of direct conversions through a fixed set of
/// intermediate ("hub") formats.
///
/// The search proceeds level by level up to `max_hops`. The first level that
/// reaches the target fixes the chain length; among chains of that length
/// the highest total capability score wins, and ties keep discovery order
/// (which follows hub order). A format never appears twice in one chain,
/// and neither the source nor the target is used as an intermediate.
#[derive(Debug, Clone)]
pub struct ChainPlanner {
    hubs: Vec<FormatId>,
    max_hops: usize,
}

impl ChainPlanner {
    pub fn new(hubs: Vec<FormatId>, max_hops: usize) -> Self {
        Self { hubs, max_hops }
    }

    pub fn hubs(&self) -> &[FormatId] {
        &self.hubs
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn plan(
        &self,
        registry: &StrategyRegistry,
        source: &FormatId,
        target: &FormatId,
    ) -> Option<ConversionStrategy> {
        let mut frontier: Vec<Vec<Hop>> = vec![Vec::new()];

        for depth in 1..=self.max_hops {
            let mut complete: Vec<Vec<Hop>> = Vec::new();
            let mut next: Vec<Vec<Hop>> = Vec::new();

            for path in &frontier {
                let at = path.last().map(|h| &h.to).unwrap_or(source);

                if let Some(adapter) = registry.best_direct(at, target) {
                    let mut done = path.clone();
                    done.push(Hop::new(adapter.clone(), at.clone(), target.clone()));
                    complete.push(done);
                }

                if depth == self.max_hops {
                    continue;
                }
                let edges = registry.edges_from(at);
                for hub in &self.hubs {
                    if hub == source || hub == target || path.iter().any(|h| &h.to == hub) {
                        continue;
                    }
                    if let Some((_, adapter)) = edges.iter().find(|(to, _)| to == hub) {
                        let mut extended = path.clone();
                        extended.push(Hop::new(adapter.clone(), at.clone(), hub.clone()));
                        next.push(extended);
                    }
                }
            }

            if !complete.is_empty() {
                let best = pick_highest_score(complete);
                let strategy = ConversionStrategy::chain(source.clone(), target.clone(), best);
                debug!(
                    "Planned {} -> {} in {} hops: {}",
                    source,
                    target,
                    depth,
                    strategy.describe()
                );
                return Some(strategy);
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        None
    }
}

/// First path with the highest total score.
fn pick_highest_score(paths: Vec<Vec<Hop>>) -> Vec<Hop> {
    let score = |path: &[Hop]| -> i64 {
        path.iter()
            .map(|h| h.adapter.capability_score() as i64)
            .sum()
    };

    let mut best: Option<(i64, Vec<Hop>)> = None;
    for path in paths {
        let s = score(&path);
        match best {
            Some((top, _)) if s <= top => {}
            _ => best = Some((s, path)),
        }
    }
    best.map(|(_, path)| path).unwrap_or_default()
}
