//! Connection manager for one switch matrix.
//!
//! [`SwitchMatrix`] owns the channel registry, the static topology, the set of
//! active connections and the debounce deadlines. Every mutating operation
//! validates the full request under a single lock before touching state, so
//! a refused request is never observable and two concurrent `connect` calls
//! can never both claim the same relay.
//!
//! The matrix is transport-agnostic. Operations that change relay state
//! return the affected [`Path`]s so a driver can actuate the hardware.

use super::channel::{Channel, ChannelId, ChannelRoles};
use super::connection::{Connection, Path};
use super::debounce::DebounceController;
use super::registry::ChannelRegistry;
use super::resolver::{route_exists, shortest_route, Route, RouteFilter};
use super::topology::{EdgeId, Topology, TopologyConfig};
use crate::error::{EdgeRef, SwitchError, SwitchResult, TopologyError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of a dry-run connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCapability {
    /// `connect` would succeed now.
    Available,
    /// An explicit connection between the endpoints already exists.
    Exists,
    /// No route exists even with nothing connected.
    Unsupported,
    /// A required relay is held by another connection.
    ResourceInUse,
    /// The connection would tie two sources together.
    SourceConflict,
    /// An endpoint is unknown.
    ChannelNotAvailable,
    /// An endpoint is a configuration channel.
    ConfigChannel,
    /// Both endpoints are the same channel.
    SelfConnection,
    /// Routes exist but none is usable right now.
    NotFound,
}

impl From<&SwitchError> for PathCapability {
    fn from(err: &SwitchError) -> Self {
        match err {
            SwitchError::ExplicitConnectionExists { .. } => PathCapability::Exists,
            SwitchError::PathUnsupported { .. } => PathCapability::Unsupported,
            SwitchError::ResourceInUse { .. } => PathCapability::ResourceInUse,
            SwitchError::SourceConflict { .. } | SwitchError::AttemptToConnectSources { .. } => {
                PathCapability::SourceConflict
            }
            SwitchError::ChannelNotAvailable { .. } => PathCapability::ChannelNotAvailable,
            SwitchError::IsConfigChannel { .. } => PathCapability::ConfigChannel,
            SwitchError::CannotConnectToSelf { .. } => PathCapability::SelfConnection,
            _ => PathCapability::NotFound,
        }
    }
}

/// Unordered endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionKey(ChannelId, ChannelId);

impl ConnectionKey {
    fn new(a: ChannelId, b: ChannelId) -> Self {
        Self(a.min(b), a.max(b))
    }
}

#[derive(Debug, Clone)]
struct ActiveConnection {
    key: ConnectionKey,
    endpoints: (ChannelId, ChannelId),
    route: Route,
}

#[derive(Debug, Default)]
struct ConnectionState {
    // Commit order.
    active: Vec<ActiveConnection>,
    claims: HashMap<EdgeId, Vec<ConnectionKey>>,
}

impl ConnectionState {
    fn find(&self, key: ConnectionKey) -> Option<&ActiveConnection> {
        self.active.iter().find(|conn| conn.key == key)
    }

    fn holder(&self, edge: EdgeId) -> Option<ConnectionKey> {
        self.claims.get(&edge).and_then(|keys| keys.first().copied())
    }

    fn is_endpoint(&self, channel: ChannelId) -> bool {
        self.active
            .iter()
            .any(|conn| conn.key.0 == channel || conn.key.1 == channel)
    }
}

/// A validated request ready to commit.
struct Plan {
    endpoints: (ChannelId, ChannelId),
    route: Route,
}

/// Routes through free (or shareable) relays, never through source channels.
struct Available<'a> {
    topology: &'a Topology,
    registry: &'a ChannelRegistry,
    state: &'a ConnectionState,
}

impl RouteFilter for Available<'_> {
    fn edge_allowed(&self, edge: EdgeId) -> bool {
        self.topology.edge(edge).shareable || self.state.holder(edge).is_none()
    }

    fn intermediate_allowed(&self, channel: ChannelId) -> bool {
        !self.registry.roles(channel).source
    }
}

/// [`Available`], also keeping off nets that carry a source the endpoints
/// are not already tied to.
struct SourceDetour<'a> {
    available: Available<'a>,
    // Indexed by channel id.
    foreign_source: Vec<bool>,
}

impl RouteFilter for SourceDetour<'_> {
    fn edge_allowed(&self, edge: EdgeId) -> bool {
        self.available.edge_allowed(edge)
    }

    fn intermediate_allowed(&self, channel: ChannelId) -> bool {
        self.available.intermediate_allowed(channel) && !self.foreign_source[channel.index()]
    }
}

/// Ignores occupancy but still keeps sources off intermediate hops.
struct RoleAware<'a> {
    registry: &'a ChannelRegistry,
}

impl RouteFilter for RoleAware<'_> {
    fn edge_allowed(&self, _edge: EdgeId) -> bool {
        true
    }

    fn intermediate_allowed(&self, channel: ChannelId) -> bool {
        !self.registry.roles(channel).source
    }
}

/// Electrical nets: connected components of the union of active routes.
struct Nets {
    parent: Vec<usize>,
}

impl Nets {
    fn new(state: &ConnectionState, channel_count: usize) -> Self {
        let mut nets = Self {
            parent: (0..channel_count).collect(),
        };
        for conn in &state.active {
            for pair in conn.route.channels.windows(2) {
                nets.union(pair[0].index(), pair[1].index());
            }
        }
        nets
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Stateful connection engine for one switch.
#[derive(Debug)]
pub struct SwitchMatrix {
    registry: ChannelRegistry,
    topology: Topology,
    state: Mutex<ConnectionState>,
    debounce: DebounceController,
}

impl SwitchMatrix {
    /// Build a matrix from a topology description.
    pub fn new(config: &TopologyConfig) -> Result<Self, TopologyError> {
        let (registry, topology) = Topology::build(config)?;
        Ok(Self {
            registry,
            topology,
            state: Mutex::new(ConnectionState::default()),
            debounce: DebounceController::new(),
        })
    }

    /// The static topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    // -------------------------------------------------------------------------
    // Channel registry
    // -------------------------------------------------------------------------

    /// Look up a channel by physical or virtual name.
    pub fn channel(&self, name: &str) -> SwitchResult<Channel> {
        let id = self.registry.resolve(name)?;
        Ok(self.snapshot(id))
    }

    /// Look up a channel by id.
    pub fn channel_by_id(&self, id: usize) -> SwitchResult<Channel> {
        let id = self.registry.check_id(id)?;
        Ok(self.snapshot(id))
    }

    /// All channels in id order.
    pub fn channels(&self) -> Vec<Channel> {
        (0..self.registry.len())
            .map(|index| self.snapshot(ChannelId(index)))
            .collect()
    }

    /// Assign virtual names to every channel at once.
    pub fn set_virtual_names<S: AsRef<str>>(&self, names: &[S]) -> SwitchResult<()> {
        self.registry.set_virtual_names(names)?;
        debug!(count = names.len(), "Assigned virtual channel names");
        Ok(())
    }

    /// Mark or unmark a configuration channel.
    ///
    /// Refused while the channel is an endpoint of an active connection, or
    /// when it is currently a source channel.
    pub fn set_config_channel(&self, name: &str, enabled: bool) -> SwitchResult<()> {
        let state = self.state.lock();
        let id = self.registry.resolve(name)?;
        let roles = self.registry.roles(id);
        if enabled {
            if roles.source {
                return Err(SwitchError::RoleConflict {
                    channel: self.name(id),
                });
            }
            if state.is_endpoint(id) {
                return Err(SwitchError::IsConfigChannel {
                    channel: self.name(id),
                });
            }
        }
        self.registry.set_roles(
            id,
            ChannelRoles {
                config: enabled,
                ..roles
            },
        );
        debug!(channel = %self.registry.name(id), enabled, "Updated configuration role");
        Ok(())
    }

    /// Mark or unmark a source channel.
    ///
    /// Refused when the channel is a configuration channel, or when its net
    /// already carries a different source.
    pub fn set_source_channel(&self, name: &str, enabled: bool) -> SwitchResult<()> {
        let state = self.state.lock();
        let id = self.registry.resolve(name)?;
        let roles = self.registry.roles(id);
        if enabled {
            if roles.config {
                return Err(SwitchError::RoleConflict {
                    channel: self.name(id),
                });
            }
            let mut nets = Nets::new(&state, self.registry.len());
            let net = nets.find(id.index());
            let other = (0..self.registry.len())
                .map(ChannelId)
                .filter(|&c| c != id && self.registry.roles(c).source)
                .find(|c| nets.find(c.index()) == net);
            if let Some(other) = other {
                return Err(SwitchError::SourceConflict {
                    channel: self.name(id),
                    first: self.name(other),
                    second: self.name(id),
                });
            }
        }
        self.registry.set_roles(
            id,
            ChannelRoles {
                source: enabled,
                ..roles
            },
        );
        debug!(channel = %self.registry.name(id), enabled, "Updated source role");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Feasibility and routing
    // -------------------------------------------------------------------------

    /// Whether a route exists in principle, ignoring active connections.
    pub fn can_connect(&self, a: &str, b: &str) -> SwitchResult<()> {
        let (ia, ib) = self.resolve_pair(a, b)?;
        if route_exists(&self.topology, ia, ib) {
            Ok(())
        } else {
            Err(self.unsupported(ia, ib))
        }
    }

    /// Shortest route usable right now, without committing it.
    pub fn get_path(&self, a: &str, b: &str) -> SwitchResult<Path> {
        let (ia, ib) = self.resolve_pair(a, b)?;
        let state = self.state.lock();
        if let Some(route) = self.available_route(&state, ia, ib)? {
            return Ok(self.to_path(&route));
        }
        if route_exists(&self.topology, ia, ib) {
            Err(SwitchError::PathNotFound {
                a: self.name(ia),
                b: self.name(ib),
            })
        } else {
            Err(self.unsupported(ia, ib))
        }
    }

    /// Dry-run `connect` and report what it would do.
    pub fn path_capability(&self, a: &str, b: &str) -> PathCapability {
        let state = self.state.lock();
        match self.plan_connect(&state, a, b) {
            Ok(_) => PathCapability::Available,
            Err(err) => PathCapability::from(&err),
        }
    }

    // -------------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------------

    /// Route and commit a connection between `a` and `b`.
    ///
    /// Returns the committed path. On error nothing changes.
    pub fn connect(&self, a: &str, b: &str) -> SwitchResult<Path> {
        let mut state = self.state.lock();
        let plan = self.plan_connect(&state, a, b)?;
        Ok(self.commit(&mut state, plan))
    }

    /// Commit a caller-specified route.
    ///
    /// Every hop must be a relay of the topology, no channel may repeat, and
    /// no intermediate channel may be a source. Endpoint rules match
    /// [`connect`](Self::connect).
    pub fn set_path<S: AsRef<str>>(&self, channels: &[S]) -> SwitchResult<Path> {
        let mut state = self.state.lock();
        let plan = self.plan_explicit(&state, channels)?;
        Ok(self.commit(&mut state, plan))
    }

    /// Commit a route given in textual form (`"CH1->CH2, CH2->CH3"`).
    pub fn set_path_str(&self, path: &str) -> SwitchResult<Path> {
        let path: Path = path.parse()?;
        self.set_path(path.channels())
    }

    /// Remove the explicit connection between `a` and `b`.
    ///
    /// Returns the released path.
    pub fn disconnect(&self, a: &str, b: &str) -> SwitchResult<Path> {
        let ia = self.registry.resolve(a)?;
        let ib = self.registry.resolve(b)?;
        let key = ConnectionKey::new(ia, ib);

        let mut state = self.state.lock();
        let position = state
            .active
            .iter()
            .position(|conn| conn.key == key)
            .ok_or_else(|| SwitchError::ExplicitConnectionDoesNotExist {
                a: self.name(ia),
                b: self.name(ib),
            })?;
        let released = state.active.remove(position);
        self.release(&mut state, &released);

        let path = self.to_path(&released.route);
        info!(path = %path, "Disconnected");
        Ok(path)
    }

    /// Remove every active connection. Returns the released paths in commit order.
    pub fn disconnect_all(&self) -> Vec<Path> {
        let mut state = self.state.lock();
        let released: Vec<ActiveConnection> = state.active.drain(..).collect();
        for conn in &released {
            self.release(&mut state, conn);
        }
        state.claims.clear();
        if !released.is_empty() {
            info!(count = released.len(), "Disconnected all connections");
        }
        released
            .iter()
            .map(|conn| self.to_path(&conn.route))
            .collect()
    }

    /// Snapshot of the explicit connections in commit order.
    pub fn connections(&self) -> Vec<Connection> {
        let state = self.state.lock();
        state
            .active
            .iter()
            .map(|conn| self.to_connection(conn))
            .collect()
    }

    /// Number of explicit connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// The connection joining `a` and `b`, explicit or implicit.
    ///
    /// An implicit connection is reported when both channels lie on the
    /// path of some explicit connection; its path is the segment between them.
    pub fn connection(&self, a: &str, b: &str) -> SwitchResult<Option<Connection>> {
        let ia = self.registry.resolve(a)?;
        let ib = self.registry.resolve(b)?;
        let state = self.state.lock();
        if let Some(conn) = state.find(ConnectionKey::new(ia, ib)) {
            return Ok(Some(self.to_connection(conn)));
        }
        for conn in &state.active {
            let channels = &conn.route.channels;
            let pa = channels.iter().position(|&c| c == ia);
            let pb = channels.iter().position(|&c| c == ib);
            if let (Some(pa), Some(pb)) = (pa, pb) {
                if pa == pb {
                    continue;
                }
                let segment: Vec<ChannelId> = if pa < pb {
                    channels[pa..=pb].to_vec()
                } else {
                    channels[pb..=pa].iter().rev().copied().collect()
                };
                return Ok(Some(Connection {
                    endpoints: (self.name(ia), self.name(ib)),
                    path: Path::new(segment.into_iter().map(|c| self.name(c))),
                    explicit: false,
                }));
            }
        }
        Ok(None)
    }

    /// Whether the relay between `a` and `b` is held by any connection.
    ///
    /// `false` when no relay joins the two channels.
    pub fn is_relay_closed(&self, a: &str, b: &str) -> SwitchResult<bool> {
        let ia = self.registry.resolve(a)?;
        let ib = self.registry.resolve(b)?;
        let Some(edge) = self.topology.edge_between(ia, ib) else {
            return Ok(false);
        };
        Ok(self.state.lock().holder(edge).is_some())
    }

    /// Whether `a` and `b` are currently joined, explicitly or implicitly.
    pub fn is_connected(&self, a: &str, b: &str) -> SwitchResult<bool> {
        Ok(self.connection(a, b)?.is_some())
    }

    // -------------------------------------------------------------------------
    // Debounce
    // -------------------------------------------------------------------------

    /// Whether one channel has finished settling.
    pub fn is_debounced(&self, name: &str) -> SwitchResult<bool> {
        let id = self.registry.resolve(name)?;
        Ok(self.debounce.is_debounced(id))
    }

    /// Whether every channel has finished settling.
    pub fn all_debounced(&self) -> bool {
        self.debounce.all_debounced()
    }

    /// Wait until every settling channel is debounced or `max_time` elapses.
    pub async fn wait_for_debounce(&self, max_time: Duration) -> SwitchResult<()> {
        self.debounce
            .wait(max_time, |id| self.registry.name(id).to_string())
            .await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn snapshot(&self, id: ChannelId) -> Channel {
        let debounced = self.debounce.is_debounced(id);
        self.registry.snapshot(id, debounced)
    }

    fn name(&self, id: ChannelId) -> String {
        self.registry.name(id).to_string()
    }

    fn unsupported(&self, a: ChannelId, b: ChannelId) -> SwitchError {
        SwitchError::PathUnsupported {
            a: self.name(a),
            b: self.name(b),
        }
    }

    fn available<'a>(&'a self, state: &'a ConnectionState) -> Available<'a> {
        Available {
            topology: &self.topology,
            registry: &self.registry,
            state,
        }
    }

    fn to_path(&self, route: &Route) -> Path {
        Path::new(route.channels.iter().map(|&c| self.name(c)))
    }

    fn to_connection(&self, conn: &ActiveConnection) -> Connection {
        Connection {
            endpoints: (self.name(conn.endpoints.0), self.name(conn.endpoints.1)),
            path: self.to_path(&conn.route),
            explicit: true,
        }
    }

    fn edge_ref(&self, edge: EdgeId) -> EdgeRef {
        let edge = self.topology.edge(edge);
        EdgeRef::new(self.name(edge.a), self.name(edge.b))
    }

    fn key_ref(&self, key: ConnectionKey) -> EdgeRef {
        EdgeRef::new(self.name(key.0), self.name(key.1))
    }

    /// Resolve two names, rejecting self connections.
    fn resolve_pair(&self, a: &str, b: &str) -> SwitchResult<(ChannelId, ChannelId)> {
        if a == b {
            return Err(SwitchError::CannotConnectToSelf { channel: a.into() });
        }
        let ia = self.registry.resolve(a)?;
        let ib = self.registry.resolve(b)?;
        if ia == ib {
            return Err(SwitchError::CannotConnectToSelf {
                channel: self.name(ia),
            });
        }
        Ok((ia, ib))
    }

    /// Endpoint rules shared by `connect` and `set_path`.
    fn check_endpoints(
        &self,
        state: &ConnectionState,
        a: &str,
        b: &str,
    ) -> SwitchResult<(ChannelId, ChannelId)> {
        let (ia, ib) = self.resolve_pair(a, b)?;
        let (ra, rb) = (self.registry.roles(ia), self.registry.roles(ib));
        for (id, roles) in [(ia, ra), (ib, rb)] {
            if roles.config {
                return Err(SwitchError::IsConfigChannel {
                    channel: self.name(id),
                });
            }
        }
        if ra.source && rb.source {
            return Err(SwitchError::AttemptToConnectSources {
                a: self.name(ia),
                b: self.name(ib),
            });
        }
        if state.find(ConnectionKey::new(ia, ib)).is_some() {
            return Err(SwitchError::ExplicitConnectionExists {
                a: self.name(ia),
                b: self.name(ib),
            });
        }
        Ok((ia, ib))
    }

    fn plan_connect(&self, state: &ConnectionState, a: &str, b: &str) -> SwitchResult<Plan> {
        let (ia, ib) = self.check_endpoints(state, a, b)?;

        if let Some(route) = self.available_route(state, ia, ib)? {
            debug!(
                a = %self.registry.name(ia),
                b = %self.registry.name(ib),
                hops = route.edges.len(),
                "Resolved route"
            );
            return Ok(Plan {
                endpoints: (ia, ib),
                route,
            });
        }

        if !route_exists(&self.topology, ia, ib) {
            return Err(self.unsupported(ia, ib));
        }

        let role_aware = RoleAware {
            registry: &self.registry,
        };
        if let Some(route) = shortest_route(&self.topology, ia, ib, &role_aware) {
            self.check_sources(state, &route)?;
            if let Some(err) = self.claimed_edge(state, &route) {
                return Err(err);
            }
        }

        Err(SwitchError::PathNotFound {
            a: self.name(ia),
            b: self.name(ib),
        })
    }

    fn plan_explicit<S: AsRef<str>>(
        &self,
        state: &ConnectionState,
        channels: &[S],
    ) -> SwitchResult<Plan> {
        if channels.len() < 2 {
            return Err(SwitchError::InvalidPath {
                reason: "a path needs at least two channels".into(),
            });
        }
        let first = channels[0].as_ref();
        let last = channels[channels.len() - 1].as_ref();
        let (ia, ib) = self.check_endpoints(state, first, last)?;

        let mut ids = Vec::with_capacity(channels.len());
        for name in channels.iter().map(AsRef::as_ref) {
            let id = self.registry.resolve(name)?;
            if ids.contains(&id) {
                return Err(SwitchError::InvalidPath {
                    reason: format!("channel '{}' appears more than once", self.name(id)),
                });
            }
            ids.push(id);
        }

        let mut edges = Vec::with_capacity(ids.len() - 1);
        for pair in ids.windows(2) {
            let edge = self
                .topology
                .edge_between(pair[0], pair[1])
                .ok_or_else(|| self.unsupported(pair[0], pair[1]))?;
            edges.push(edge);
        }

        if let Some(&source) = ids[1..ids.len() - 1]
            .iter()
            .find(|&&c| self.registry.roles(c).source)
        {
            return Err(SwitchError::InvalidPath {
                reason: format!(
                    "source channel '{}' cannot be an intermediate hop",
                    self.name(source)
                ),
            });
        }

        let route = Route {
            channels: ids,
            edges,
        };
        self.check_sources(state, &route)?;
        if let Some(err) = self.claimed_edge(state, &route) {
            return Err(err);
        }
        Ok(Plan {
            endpoints: (ia, ib),
            route,
        })
    }

    /// Shortest route usable right now.
    ///
    /// When the shortest free route would tie two sources together, the
    /// search is repeated around every net carrying a source foreign to the
    /// endpoints. The conflict is reported only if that detour fails too.
    fn available_route(
        &self,
        state: &ConnectionState,
        a: ChannelId,
        b: ChannelId,
    ) -> SwitchResult<Option<Route>> {
        let Some(route) = shortest_route(&self.topology, a, b, &self.available(state)) else {
            return Ok(None);
        };
        let Err(conflict) = self.check_sources(state, &route) else {
            return Ok(Some(route));
        };

        let detour = SourceDetour {
            available: self.available(state),
            foreign_source: self.foreign_source_channels(state, a, b),
        };
        match shortest_route(&self.topology, a, b, &detour) {
            Some(route) if self.check_sources(state, &route).is_ok() => {
                debug!(
                    a = %self.registry.name(a),
                    b = %self.registry.name(b),
                    "Routed around source net"
                );
                Ok(Some(route))
            }
            _ => Err(conflict),
        }
    }

    /// Per channel: whether its net carries a source outside the nets of `a`
    /// and `b`.
    fn foreign_source_channels(
        &self,
        state: &ConnectionState,
        a: ChannelId,
        b: ChannelId,
    ) -> Vec<bool> {
        let count = self.registry.len();
        let mut nets = Nets::new(state, count);
        let endpoint_nets = [nets.find(a.index()), nets.find(b.index())];
        let foreign_nets: Vec<usize> = (0..count)
            .filter(|&c| self.registry.roles(ChannelId(c)).source)
            .map(|c| nets.find(c))
            .filter(|net| !endpoint_nets.contains(net))
            .collect();
        (0..count)
            .map(|c| foreign_nets.contains(&nets.find(c)))
            .collect()
    }

    /// First non-shareable edge of `route` held by another connection.
    fn claimed_edge(&self, state: &ConnectionState, route: &Route) -> Option<SwitchError> {
        route.edges.iter().find_map(|&edge| {
            if self.topology.edge(edge).shareable {
                return None;
            }
            state.holder(edge).map(|holder| SwitchError::ResourceInUse {
                edge: self.edge_ref(edge),
                holder: self.key_ref(holder),
            })
        })
    }

    /// Refuse routes that would put two sources on one net.
    fn check_sources(&self, state: &ConnectionState, route: &Route) -> SwitchResult<()> {
        let mut nets = Nets::new(state, self.registry.len());
        let sources: Vec<ChannelId> = (0..self.registry.len())
            .map(ChannelId)
            .filter(|&c| self.registry.roles(c).source)
            .collect();

        let mut first: Option<ChannelId> = None;
        for &channel in &route.channels {
            let net = nets.find(channel.index());
            for &source in &sources {
                if nets.find(source.index()) != net {
                    continue;
                }
                match first {
                    None => first = Some(source),
                    Some(existing) if existing != source => {
                        return Err(SwitchError::SourceConflict {
                            channel: self.name(channel),
                            first: self.name(existing),
                            second: self.name(source),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn commit(&self, state: &mut ConnectionState, plan: Plan) -> Path {
        let key = ConnectionKey::new(plan.endpoints.0, plan.endpoints.1);
        for &edge in &plan.route.edges {
            state.claims.entry(edge).or_default().push(key);
        }
        self.arm_debounce(&plan.route);

        let path = self.to_path(&plan.route);
        info!(path = %path, "Connected");
        state.active.push(ActiveConnection {
            key,
            endpoints: plan.endpoints,
            route: plan.route,
        });
        path
    }

    fn release(&self, state: &mut ConnectionState, conn: &ActiveConnection) {
        for edge in &conn.route.edges {
            if let Some(keys) = state.claims.get_mut(edge) {
                keys.retain(|key| *key != conn.key);
                if keys.is_empty() {
                    state.claims.remove(edge);
                }
            }
        }
        self.arm_debounce(&conn.route);
    }

    fn arm_debounce(&self, route: &Route) {
        self.debounce.arm(
            route
                .channels
                .iter()
                .map(|&c| (c, self.registry.spec(c).settling_time)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::topology::{ChannelConfig, PathConfig};

    fn line() -> SwitchMatrix {
        SwitchMatrix::new(&TopologyConfig::from_edges(
            &["CH1", "CH2", "CH3", "CH4"],
            &[("CH1", "CH2"), ("CH2", "CH3")],
        ))
        .unwrap()
    }

    #[test]
    fn connect_reserves_every_edge_of_the_route() {
        let matrix = line();
        let path = matrix.connect("CH1", "CH3").unwrap();
        assert_eq!(path.channels(), ["CH1", "CH2", "CH3"]);

        match matrix.connect("CH1", "CH2").unwrap_err() {
            SwitchError::ResourceInUse { edge, holder } => {
                assert_eq!(edge, EdgeRef::new("CH1", "CH2"));
                assert_eq!(holder, EdgeRef::new("CH1", "CH3"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            matrix.connect("CH2", "CH4").unwrap_err(),
            SwitchError::PathUnsupported {
                a: "CH2".into(),
                b: "CH4".into()
            }
        );
        assert_eq!(matrix.connection_count(), 1);
    }

    #[test]
    fn get_path_distinguishes_blocked_from_unsupported() {
        let matrix = line();
        matrix.connect("CH1", "CH3").unwrap();
        assert!(matches!(
            matrix.get_path("CH1", "CH2"),
            Err(SwitchError::PathNotFound { .. })
        ));
        assert!(matches!(
            matrix.get_path("CH1", "CH4"),
            Err(SwitchError::PathUnsupported { .. })
        ));
    }

    #[test]
    fn implicit_connection_covers_sub_segments() {
        let matrix = line();
        matrix.connect("CH3", "CH1").unwrap();

        let implicit = matrix.connection("CH2", "CH3").unwrap().unwrap();
        assert!(!implicit.explicit);
        assert_eq!(implicit.path.channels(), ["CH2", "CH3"]);

        let explicit = matrix.connection("CH1", "CH3").unwrap().unwrap();
        assert!(explicit.explicit);
        assert_eq!(explicit.endpoints, ("CH3".to_string(), "CH1".to_string()));

        assert!(!matrix.is_connected("CH1", "CH4").unwrap());
        assert_eq!(
            matrix.disconnect("CH2", "CH3").unwrap_err(),
            SwitchError::ExplicitConnectionDoesNotExist {
                a: "CH2".into(),
                b: "CH3".into()
            }
        );
    }

    #[test]
    fn shareable_bus_edges_carry_several_connections() {
        let matrix = SwitchMatrix::new(&TopologyConfig {
            channels: ["A", "B", "BUS", "C"]
                .iter()
                .map(|n| ChannelConfig::new(*n))
                .collect(),
            paths: vec![
                PathConfig::new("A", "BUS"),
                PathConfig::shared("BUS", "C"),
                PathConfig::new("B", "BUS"),
            ],
        })
        .unwrap();

        matrix.connect("A", "C").unwrap();
        // BUS->C is shareable; B->BUS is free.
        let path = matrix.connect("B", "C").unwrap();
        assert_eq!(path.channels(), ["B", "BUS", "C"]);
        assert_eq!(matrix.connection_count(), 2);

        matrix.disconnect("C", "A").unwrap();
        assert!(matrix.is_relay_closed("BUS", "C").unwrap());
        assert!(!matrix.is_relay_closed("A", "BUS").unwrap());
        assert!(!matrix.is_relay_closed("A", "C").unwrap());
    }

    #[test]
    fn source_conflicts_through_shared_endpoint() {
        let matrix = SwitchMatrix::new(&TopologyConfig {
            channels: vec![
                ChannelConfig::new("SRC1").source_channel(),
                ChannelConfig::new("DUT"),
                ChannelConfig::new("SRC2").source_channel(),
            ],
            paths: vec![PathConfig::new("SRC1", "DUT"), PathConfig::new("DUT", "SRC2")],
        })
        .unwrap();

        matrix.connect("SRC1", "DUT").unwrap();
        assert_eq!(matrix.path_capability("DUT", "SRC2"), PathCapability::SourceConflict);
        match matrix.connect("DUT", "SRC2").unwrap_err() {
            SwitchError::SourceConflict { first, second, .. } => {
                assert_eq!(first, "SRC1");
                assert_eq!(second, "SRC2");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(matrix.connection_count(), 1);
    }

    #[test]
    fn routes_around_nets_of_other_sources() {
        let matrix = SwitchMatrix::new(&TopologyConfig {
            channels: vec![
                ChannelConfig::new("S1").source_channel(),
                ChannelConfig::new("X"),
                ChannelConfig::new("A"),
                ChannelConfig::new("S2").source_channel(),
                ChannelConfig::new("Y"),
                ChannelConfig::new("Z"),
            ],
            paths: vec![
                PathConfig::new("S1", "X"),
                PathConfig::new("A", "X"),
                PathConfig::new("X", "S2"),
                PathConfig::new("A", "Y"),
                PathConfig::new("Y", "Z"),
                PathConfig::new("Z", "S2"),
            ],
        })
        .unwrap();

        matrix.connect("S1", "X").unwrap();
        assert_eq!(matrix.path_capability("A", "S2"), PathCapability::Available);
        assert_eq!(
            matrix.get_path("A", "S2").unwrap().channels(),
            ["A", "Y", "Z", "S2"]
        );

        let path = matrix.connect("A", "S2").unwrap();
        assert_eq!(path.channels(), ["A", "Y", "Z", "S2"]);
        assert!(!matrix.is_relay_closed("A", "X").unwrap());
    }

    #[test]
    fn source_channels_are_not_intermediate_hops() {
        let matrix = SwitchMatrix::new(&TopologyConfig {
            channels: vec![
                ChannelConfig::new("A"),
                ChannelConfig::new("SRC").source_channel(),
                ChannelConfig::new("B"),
            ],
            paths: vec![PathConfig::new("A", "SRC"), PathConfig::new("SRC", "B")],
        })
        .unwrap();

        assert!(matrix.can_connect("A", "B").is_ok());
        assert!(matches!(
            matrix.connect("A", "B"),
            Err(SwitchError::PathNotFound { .. })
        ));
        assert!(matches!(
            matrix.set_path(&["A", "SRC", "B"]),
            Err(SwitchError::InvalidPath { .. })
        ));
    }

    #[test]
    fn role_changes_respect_active_connections() {
        let matrix = line();
        matrix.connect("CH1", "CH2").unwrap();

        assert!(matches!(
            matrix.set_config_channel("CH1", true),
            Err(SwitchError::IsConfigChannel { .. })
        ));
        matrix.set_source_channel("CH1", true).unwrap();
        assert!(matches!(
            matrix.set_source_channel("CH2", true),
            Err(SwitchError::SourceConflict { .. })
        ));
        assert!(matches!(
            matrix.set_config_channel("CH1", true),
            Err(SwitchError::RoleConflict { .. })
        ));

        matrix.set_config_channel("CH4", true).unwrap();
        assert!(matrix.channel("CH4").unwrap().is_config_channel);
        assert!(matches!(
            matrix.set_source_channel("CH4", true),
            Err(SwitchError::RoleConflict { .. })
        ));
    }

    #[test]
    fn set_path_validates_hops() {
        let matrix = line();
        assert!(matches!(
            matrix.set_path(&["CH1", "CH3"]),
            Err(SwitchError::PathUnsupported { .. })
        ));
        assert!(matches!(
            matrix.set_path(&["CH1"]),
            Err(SwitchError::InvalidPath { .. })
        ));
        assert!(matches!(
            matrix.set_path(&["CH1", "CH2", "CH1"]),
            Err(SwitchError::CannotConnectToSelf { .. })
        ));

        let path = matrix.set_path_str("CH1->CH2, CH2->CH3").unwrap();
        assert_eq!(path.hop_count(), 2);
        assert!(matches!(
            matrix.set_path(&["CH2", "CH3"]),
            Err(SwitchError::ResourceInUse { .. })
        ));
    }
}
