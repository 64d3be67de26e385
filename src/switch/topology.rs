//! Static relay topology.
//!
//! A [`Topology`] is the fixed adjacency of the switch: which channel pairs can
//! be joined by closing a single relay. It is built once from a
//! [`TopologyConfig`] and never mutated afterwards, so it is shared between
//! readers without locking.
//!
//! # Description Format
//!
//! ```toml
//! [[channels]]
//! name = "CH1"
//! settling_time = "20ms"
//! source = true
//!
//! [channels.limits]
//! dc_voltage_max = 150.0
//!
//! [[channels]]
//! name = "CH2"
//!
//! [[paths]]
//! a = "CH1"
//! b = "CH2"
//! shareable = false
//! ```

use super::channel::{ChannelId, ChannelRoles, ChannelSpec, ElectricalLimits};
use super::registry::ChannelRegistry;
use crate::error::TopologyError;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::HashMap;
use std::time::Duration;

/// Declaration of one channel.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Physical channel name.
    #[validate(min_length = 1)]
    #[validate(max_length = 64)]
    pub name: String,

    /// Reserved for internal routing.
    #[serde(default)]
    pub config: bool,

    /// Drives a signal.
    #[serde(default)]
    pub source: bool,

    /// Electrical ratings.
    #[serde(default)]
    pub limits: ElectricalLimits,

    /// Conductors switched together.
    #[serde(default = "default_wire_mode")]
    #[validate(minimum = 1)]
    pub wire_mode: u32,

    /// Settling delay after a relay change.
    #[serde(default, with = "humantime_serde")]
    pub settling_time: Duration,
}

fn default_wire_mode() -> u32 {
    1
}

impl ChannelConfig {
    /// Plain channel with default ratings and no settling delay.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: false,
            source: false,
            limits: ElectricalLimits::default(),
            wire_mode: default_wire_mode(),
            settling_time: Duration::ZERO,
        }
    }

    /// Mark as configuration channel.
    pub fn config_channel(mut self) -> Self {
        self.config = true;
        self
    }

    /// Mark as source channel.
    pub fn source_channel(mut self) -> Self {
        self.source = true;
        self
    }

    /// Set the settling time.
    pub fn with_settling_time(mut self, settling_time: Duration) -> Self {
        self.settling_time = settling_time;
        self
    }

    /// Set the electrical ratings.
    pub fn with_limits(mut self, limits: ElectricalLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Declaration of one directly closable relay between two channels.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    /// First channel.
    #[validate(min_length = 1)]
    pub a: String,
    /// Second channel.
    #[validate(min_length = 1)]
    pub b: String,
    /// Whether several connections may share the relay (common bus).
    #[serde(default)]
    pub shareable: bool,
}

impl PathConfig {
    /// Exclusive relay between `a` and `b`.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            shareable: false,
        }
    }

    /// Shareable bus relay between `a` and `b`.
    pub fn shared(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            shareable: true,
            ..Self::new(a, b)
        }
    }
}

/// Driver-supplied description of the switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Channels in id order.
    #[validate]
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// Directly closable channel pairs.
    #[validate]
    #[serde(default)]
    pub paths: Vec<PathConfig>,
}

impl TopologyConfig {
    /// Plain channels named in order, joined by exclusive relays.
    ///
    /// ```rust
    /// use rust_ivi::switch::TopologyConfig;
    ///
    /// let topo = TopologyConfig::from_edges(&["CH1", "CH2", "CH3"], &[("CH1", "CH2")]);
    /// assert_eq!(topo.channels.len(), 3);
    /// ```
    pub fn from_edges(channels: &[&str], edges: &[(&str, &str)]) -> Self {
        Self {
            channels: channels.iter().map(|name| ChannelConfig::new(*name)).collect(),
            paths: edges.iter().map(|(a, b)| PathConfig::new(*a, *b)).collect(),
        }
    }
}

/// Index of an edge in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// A relay joining two channels. `a < b` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Lower channel id.
    pub a: ChannelId,
    /// Higher channel id.
    pub b: ChannelId,
    /// Whether several connections may claim it.
    pub shareable: bool,
}

impl Edge {
    /// The endpoint opposite `from`.
    pub fn other(&self, from: ChannelId) -> ChannelId {
        if self.a == from {
            self.b
        } else {
            self.a
        }
    }
}

/// Immutable adjacency of the switch.
#[derive(Debug, Clone)]
pub struct Topology {
    edges: Vec<Edge>,
    by_pair: HashMap<(ChannelId, ChannelId), EdgeId>,
    // Neighbor lists sorted by channel id; the resolver depends on this order.
    adjacency: Vec<Vec<(ChannelId, EdgeId)>>,
}

impl Topology {
    /// Build the registry and the graph from a description.
    pub fn build(config: &TopologyConfig) -> Result<(ChannelRegistry, Topology), TopologyError> {
        let mut specs = Vec::with_capacity(config.channels.len());
        let mut roles = Vec::with_capacity(config.channels.len());
        let mut by_name = HashMap::with_capacity(config.channels.len());

        for (index, channel) in config.channels.iter().enumerate() {
            if channel.name.is_empty() {
                return Err(TopologyError::EmptyName(index));
            }
            if channel.config && channel.source {
                return Err(TopologyError::ConflictingRoles(channel.name.clone()));
            }
            let id = ChannelId(index);
            if by_name.insert(channel.name.clone(), id).is_some() {
                return Err(TopologyError::DuplicateChannel(channel.name.clone()));
            }
            specs.push(ChannelSpec {
                id,
                name: channel.name.clone(),
                limits: channel.limits,
                wire_mode: channel.wire_mode,
                settling_time: channel.settling_time,
            });
            roles.push(ChannelRoles {
                config: channel.config,
                source: channel.source,
            });
        }

        let mut edges: Vec<Edge> = Vec::new();
        let mut by_pair: HashMap<(ChannelId, ChannelId), EdgeId> = HashMap::new();
        let mut adjacency = vec![Vec::new(); specs.len()];

        for path in &config.paths {
            let a = *by_name
                .get(&path.a)
                .ok_or_else(|| TopologyError::UnknownChannel(path.a.clone()))?;
            let b = *by_name
                .get(&path.b)
                .ok_or_else(|| TopologyError::UnknownChannel(path.b.clone()))?;
            if a == b {
                return Err(TopologyError::SelfLoop(path.a.clone()));
            }
            let key = (a.min(b), a.max(b));
            if let Some(existing) = by_pair.get(&key) {
                let edge: &mut Edge = &mut edges[existing.index()];
                edge.shareable |= path.shareable;
                continue;
            }
            let id = EdgeId(edges.len());
            edges.push(Edge {
                a: key.0,
                b: key.1,
                shareable: path.shareable,
            });
            by_pair.insert(key, id);
            adjacency[a.index()].push((b, id));
            adjacency[b.index()].push((a, id));
        }

        for neighbors in &mut adjacency {
            neighbors.sort_by_key(|(channel, _)| *channel);
        }

        tracing::debug!(
            channels = specs.len(),
            edges = edges.len(),
            "Built switch topology"
        );

        let registry = ChannelRegistry::new(specs, roles, by_name);
        Ok((
            registry,
            Topology {
                edges,
                by_pair,
                adjacency,
            },
        ))
    }

    /// Number of channels the graph spans.
    pub fn channel_count(&self) -> usize {
        self.adjacency.len()
    }

    /// All edges in declaration order (duplicates merged).
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edge by id.
    pub fn edge(&self, id: EdgeId) -> Edge {
        self.edges[id.index()]
    }

    /// The relay directly joining `a` and `b`, if any.
    pub fn edge_between(&self, a: ChannelId, b: ChannelId) -> Option<EdgeId> {
        self.by_pair.get(&(a.min(b), a.max(b))).copied()
    }

    /// Neighbors of `channel` in ascending id order.
    pub fn neighbors(&self, channel: ChannelId) -> &[(ChannelId, EdgeId)] {
        self.adjacency
            .get(channel.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl EdgeId {
    /// Position in the edge list.
    pub fn index(self) -> usize {
        self.0
    }
}
