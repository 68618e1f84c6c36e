//! Node-selection strategies.
//!
//! Selection operates on [`NodeSnapshot`]s taken under each node's lock, so
//! the scoring itself needs no locks and is directly testable.

use serde::{Deserialize, Serialize};

use crate::types::NodeStats;
use crate::{Error, Result};

/// How the cluster picks a node for a new player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Lowest combined CPU load and player population.
    #[default]
    LoadBalanced,
    /// Prefer nodes in the requested voice region, load-balanced fallback.
    Regional,
    /// Fewest hosted players.
    LeastPlayers,
    /// Lowest reported CPU load.
    LeastLoad,
    /// Lowest configured priority value.
    Priority,
}

/// Point-in-time view of a node used for scoring.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: String,
    pub connected: bool,
    pub ready: bool,
    pub region: Option<String>,
    pub priority: i32,
    pub stats: Option<NodeStats>,
}

impl NodeSnapshot {
    fn players(&self) -> u32 {
        self.stats.as_ref().map(|s| s.players).unwrap_or(0)
    }

    fn lavalink_load(&self) -> f64 {
        self.stats.as_ref().map(|s| s.cpu.lavalink_load).unwrap_or(0.0)
    }

    /// CPU load weighted by population; the default selection key.
    pub(crate) fn load_balanced_key(&self) -> f64 {
        self.lavalink_load() * (1.0 + self.players() as f64 * 0.1)
    }
}

/// Pick a node id. Eligible nodes are connected and ready; ties keep the
/// earliest snapshot.
pub fn select(
    snapshots: &[NodeSnapshot],
    strategy: SelectionStrategy,
    region: Option<&str>,
) -> Result<String> {
    let eligible: Vec<&NodeSnapshot> = snapshots
        .iter()
        .filter(|node| node.connected && node.ready)
        .collect();

    let Some(first) = eligible.first() else {
        return Err(Error::NoAvailableNodes);
    };
    if eligible.len() == 1 {
        return Ok(first.id.clone());
    }

    let chosen = match strategy {
        SelectionStrategy::LoadBalanced => min_by_key_f64(&eligible, |n| n.load_balanced_key()),
        SelectionStrategy::Regional => {
            let regional: Vec<&NodeSnapshot> = eligible
                .iter()
                .copied()
                .filter(|node| {
                    matches!((&node.region, region), (Some(have), Some(want))
                        if have.eq_ignore_ascii_case(want))
                })
                .collect();
            if regional.is_empty() {
                min_by_key_f64(&eligible, |n| n.load_balanced_key())
            } else {
                min_by_key_f64(&regional, |n| n.load_balanced_key())
            }
        }
        SelectionStrategy::LeastPlayers => min_by_key_f64(&eligible, |n| n.players() as f64),
        SelectionStrategy::LeastLoad => min_by_key_f64(&eligible, |n| n.lavalink_load()),
        SelectionStrategy::Priority => min_by_key_f64(&eligible, |n| n.priority as f64),
    };

    Ok(chosen.id.clone())
}

/// Strict minimum keeping the first of equal keys.
fn min_by_key_f64<'a>(
    nodes: &[&'a NodeSnapshot],
    key: impl Fn(&NodeSnapshot) -> f64,
) -> &'a NodeSnapshot {
    let mut best = nodes[0];
    let mut best_key = key(best);
    for node in &nodes[1..] {
        let node_key = key(node);
        if node_key < best_key {
            best = node;
            best_key = node_key;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::stats;

    fn snapshot(id: &str, region: Option<&str>, priority: i32, node_stats: Option<NodeStats>) -> NodeSnapshot {
        NodeSnapshot {
            id: id.to_string(),
            connected: true,
            ready: true,
            region: region.map(str::to_string),
            priority,
            stats: node_stats,
        }
    }

    #[test]
    fn empty_eligible_set_errors() {
        let mut offline = snapshot("a", None, 0, None);
        offline.connected = false;
        let mut not_ready = snapshot("b", None, 0, None);
        not_ready.ready = false;

        let err = select(&[offline, not_ready], SelectionStrategy::LoadBalanced, None);
        assert!(matches!(err, Err(Error::NoAvailableNodes)));
    }

    #[test]
    fn single_eligible_node_short_circuits() {
        let nodes = [snapshot("only", None, 0, None)];
        let id = select(&nodes, SelectionStrategy::Priority, None).unwrap();
        assert_eq!(id, "only");
    }

    #[test]
    fn load_balanced_weighs_cpu_and_population() {
        let nodes = [
            // key = 0.2 * (1 + 10*0.1) = 0.4
            snapshot("busy", None, 0, Some(stats(10, 0.2))),
            // key = 0.3 * (1 + 0*0.1) = 0.3
            snapshot("loaded", None, 0, Some(stats(0, 0.3))),
        ];
        let id = select(&nodes, SelectionStrategy::LoadBalanced, None).unwrap();
        assert_eq!(id, "loaded");
    }

    #[test]
    fn least_players_and_least_load() {
        let nodes = [
            snapshot("a", None, 0, Some(stats(5, 0.1))),
            snapshot("b", None, 0, Some(stats(2, 0.9))),
        ];
        assert_eq!(select(&nodes, SelectionStrategy::LeastPlayers, None).unwrap(), "b");
        assert_eq!(select(&nodes, SelectionStrategy::LeastLoad, None).unwrap(), "a");
    }

    #[test]
    fn priority_lower_wins() {
        let nodes = [
            snapshot("backup", None, 10, None),
            snapshot("primary", None, 1, None),
            snapshot("fallback", None, 5, None),
        ];
        assert_eq!(select(&nodes, SelectionStrategy::Priority, None).unwrap(), "primary");
    }

    #[test]
    fn regional_prefers_matching_region() {
        let nodes = [
            snapshot("us-1", Some("us"), 0, Some(stats(0, 0.1))),
            snapshot("eu-1", Some("eu"), 0, Some(stats(0, 0.9))),
        ];
        let id = select(&nodes, SelectionStrategy::Regional, Some("EU")).unwrap();
        assert_eq!(id, "eu-1");
    }

    #[test]
    fn regional_falls_back_to_load_balanced() {
        let nodes = [
            snapshot("us-1", Some("us"), 0, Some(stats(3, 0.5))),
            snapshot("eu-1", Some("eu"), 0, Some(stats(0, 0.1))),
            snapshot("us-2", Some("us"), 0, Some(stats(1, 0.4))),
        ];
        let id = select(&nodes, SelectionStrategy::Regional, Some("ap-south")).unwrap();
        assert_eq!(id, "eu-1");
    }

    #[test]
    fn ties_keep_first() {
        let nodes = [
            snapshot("first", None, 0, Some(stats(1, 0.5))),
            snapshot("second", None, 0, Some(stats(1, 0.5))),
        ];
        assert_eq!(select(&nodes, SelectionStrategy::LoadBalanced, None).unwrap(), "first");
    }

    #[test]
    fn missing_stats_score_as_unloaded() {
        let nodes = [
            snapshot("loaded", None, 0, Some(stats(4, 0.4))),
            snapshot("fresh", None, 0, None),
        ];
        assert_eq!(select(&nodes, SelectionStrategy::LoadBalanced, None).unwrap(), "fresh");
    }
}
