//! Shortest-route search over the topology.
//!
//! Routes are found with an unweighted breadth-first search. Among routes of
//! equal length the one whose channel-id sequence is lexicographically
//! smallest wins: distances are computed backwards from the destination, then
//! the route is walked forwards always taking the lowest-id neighbor that is
//! one step closer.

use super::channel::ChannelId;
use super::topology::{EdgeId, Topology};
use std::collections::VecDeque;

/// Restrictions applied during a search.
pub(crate) trait RouteFilter {
    /// Whether the edge may be used.
    fn edge_allowed(&self, edge: EdgeId) -> bool;
    /// Whether the channel may appear strictly inside the route.
    fn intermediate_allowed(&self, channel: ChannelId) -> bool;
}

/// Searches the raw graph with no restrictions.
pub(crate) struct Unrestricted;

impl RouteFilter for Unrestricted {
    fn edge_allowed(&self, _edge: EdgeId) -> bool {
        true
    }

    fn intermediate_allowed(&self, _channel: ChannelId) -> bool {
        true
    }
}

/// A resolved route: channels plus the edges between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Route {
    pub channels: Vec<ChannelId>,
    pub edges: Vec<EdgeId>,
}

/// Find the preferred shortest route from `from` to `to`.
///
/// Returns `None` when `from == to` or no route satisfies `filter`.
pub(crate) fn shortest_route(
    topology: &Topology,
    from: ChannelId,
    to: ChannelId,
    filter: &impl RouteFilter,
) -> Option<Route> {
    if from == to {
        return None;
    }
    let count = topology.channel_count();
    if from.index() >= count || to.index() >= count {
        return None;
    }

    // Distances to `to`. Only `to` and allowed intermediates are expanded;
    // `from` gets a distance but is never expanded through.
    let mut distance: Vec<Option<usize>> = vec![None; count];
    distance[to.index()] = Some(0);
    let mut queue = VecDeque::from([to]);

    while let Some(current) = queue.pop_front() {
        let next_distance = distance[current.index()].map(|d| d + 1);
        for &(neighbor, edge) in topology.neighbors(current) {
            if distance[neighbor.index()].is_some() || !filter.edge_allowed(edge) {
                continue;
            }
            distance[neighbor.index()] = next_distance;
            if neighbor == from {
                continue;
            }
            if filter.intermediate_allowed(neighbor) {
                queue.push_back(neighbor);
            } else {
                // Reachable, but may not carry the route further.
                distance[neighbor.index()] = None;
            }
        }
        if distance[from.index()].is_some() {
            break;
        }
    }

    let mut remaining = distance[from.index()]?;
    let mut channels = vec![from];
    let mut edges = Vec::with_capacity(remaining);
    let mut current = from;

    while current != to {
        let (next, edge) = topology
            .neighbors(current)
            .iter()
            .copied()
            .find(|&(neighbor, edge)| {
                filter.edge_allowed(edge) && distance[neighbor.index()] == Some(remaining - 1)
            })?;
        channels.push(next);
        edges.push(edge);
        current = next;
        remaining -= 1;
    }

    Some(Route { channels, edges })
}

/// Whether any route exists in the raw graph.
pub(crate) fn route_exists(topology: &Topology, from: ChannelId, to: ChannelId) -> bool {
    shortest_route(topology, from, to, &Unrestricted).is_some()
}
