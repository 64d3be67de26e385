//! Channel registry: identity, aliases and role flags.
//!
//! Ratings are static after construction. Virtual names and role flags live
//! behind `RwLock`s; role flags are only written by [`SwitchMatrix`] while it
//! holds its connection-state lock, so role changes and connection commits
//! are serialized with each other.
//!
//! [`SwitchMatrix`]: super::SwitchMatrix

use super::channel::{Channel, ChannelId, ChannelRoles, ChannelSpec};
use crate::error::{SwitchError, SwitchResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct VirtualNames {
    names: Vec<String>,
    lookup: HashMap<String, ChannelId>,
}

/// Registry of the channels of one switch.
#[derive(Debug)]
pub struct ChannelRegistry {
    specs: Vec<ChannelSpec>,
    physical: HashMap<String, ChannelId>,
    virtual_names: RwLock<VirtualNames>,
    roles: RwLock<Vec<ChannelRoles>>,
}

impl ChannelRegistry {
    pub(crate) fn new(
        specs: Vec<ChannelSpec>,
        roles: Vec<ChannelRoles>,
        physical: HashMap<String, ChannelId>,
    ) -> Self {
        let virtual_names = VirtualNames {
            names: vec![String::new(); specs.len()],
            lookup: HashMap::new(),
        };
        Self {
            specs,
            physical,
            virtual_names: RwLock::new(virtual_names),
            roles: RwLock::new(roles),
        }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry holds no channels.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolve a physical or virtual name to an id.
    ///
    /// Physical names win over virtual names; `set_virtual_names` rejects
    /// aliases that would shadow a different channel, so the order only
    /// matters for a channel aliased to its own name.
    pub fn resolve(&self, name: &str) -> SwitchResult<ChannelId> {
        if let Some(id) = self.physical.get(name) {
            return Ok(*id);
        }
        self.virtual_names
            .read()
            .lookup
            .get(name)
            .copied()
            .ok_or_else(|| SwitchError::not_available(name))
    }

    /// Check that an id is in range.
    pub fn check_id(&self, id: usize) -> SwitchResult<ChannelId> {
        if id < self.specs.len() {
            Ok(ChannelId(id))
        } else {
            Err(SwitchError::not_available(format!("#{id}")))
        }
    }

    /// Physical name of a channel.
    pub fn name(&self, id: ChannelId) -> &str {
        &self.specs[id.index()].name
    }

    pub(crate) fn spec(&self, id: ChannelId) -> &ChannelSpec {
        &self.specs[id.index()]
    }

    pub(crate) fn roles(&self, id: ChannelId) -> ChannelRoles {
        self.roles.read()[id.index()]
    }

    pub(crate) fn set_roles(&self, id: ChannelId, roles: ChannelRoles) {
        self.roles.write()[id.index()] = roles;
    }

    /// Snapshot of one channel. `debounced` is supplied by the caller because
    /// settling state is tracked outside the registry.
    pub(crate) fn snapshot(&self, id: ChannelId, debounced: bool) -> Channel {
        let spec = self.spec(id);
        let roles = self.roles(id);
        let virtual_name = self.virtual_names.read().names[id.index()].clone();
        Channel {
            id: spec.id,
            name: spec.name.clone(),
            virtual_name,
            is_config_channel: roles.config,
            is_source_channel: roles.source,
            limits: spec.limits,
            wire_mode: spec.wire_mode,
            settling_time: spec.settling_time,
            debounced,
        }
    }

    /// Replace every virtual name at once.
    ///
    /// `names[i]` becomes the alias of channel `i`. The call fails without
    /// changing anything when the count differs from the channel count, a name
    /// is empty, two names repeat, or a name equals another channel's physical
    /// name.
    pub fn set_virtual_names<S: AsRef<str>>(&self, names: &[S]) -> SwitchResult<()> {
        if names.len() != self.specs.len() {
            return Err(SwitchError::InvalidVirtualNames {
                reason: format!(
                    "expected {} names, got {}",
                    self.specs.len(),
                    names.len()
                ),
            });
        }

        let mut seen = HashSet::with_capacity(names.len());
        let mut lookup = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().map(AsRef::as_ref).enumerate() {
            if name.is_empty() {
                return Err(SwitchError::InvalidVirtualNames {
                    reason: format!("name for channel '{}' is empty", self.specs[index].name),
                });
            }
            if !seen.insert(name) {
                return Err(SwitchError::InvalidVirtualNames {
                    reason: format!("'{name}' is used more than once"),
                });
            }
            if let Some(owner) = self.physical.get(name) {
                if owner.index() != index {
                    return Err(SwitchError::InvalidVirtualNames {
                        reason: format!("'{name}' is the physical name of another channel"),
                    });
                }
            }
            lookup.insert(name.to_string(), ChannelId(index));
        }

        let mut guard = self.virtual_names.write();
        guard.names = names.iter().map(|n| n.as_ref().to_string()).collect();
        guard.lookup = lookup;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::topology::{Topology, TopologyConfig};
    use super::*;

    fn registry() -> ChannelRegistry {
        let config = TopologyConfig::from_edges(&["CH1", "CH2", "CH3"], &[]);
        Topology::build(&config).unwrap().0
    }

    #[test]
    fn virtual_names_resolve_to_ids() {
        let registry = registry();
        registry.set_virtual_names(&["A", "B", "C"]).unwrap();

        assert_eq!(registry.resolve("A").unwrap(), ChannelId(0));
        assert_eq!(registry.resolve("C").unwrap(), ChannelId(2));
        assert_eq!(registry.resolve("CH2").unwrap(), ChannelId(1));
        assert_eq!(registry.snapshot(ChannelId(1), true).virtual_name, "B");
    }

    #[test]
    fn rejects_wrong_count_without_changes() {
        let registry = registry();
        registry.set_virtual_names(&["A", "B", "C"]).unwrap();

        let err = registry.set_virtual_names(&["X", "Y"]).unwrap_err();
        assert!(matches!(err, SwitchError::InvalidVirtualNames { .. }));
        assert_eq!(registry.resolve("A").unwrap(), ChannelId(0));
        assert!(registry.resolve("X").is_err());
    }

    #[test]
    fn rejects_duplicates_and_shadowing() {
        let registry = registry();
        assert!(registry.set_virtual_names(&["A", "A", "C"]).is_err());
        assert!(registry.set_virtual_names(&["CH2", "B", "C"]).is_err());
        assert!(registry.set_virtual_names(&["A", "", "C"]).is_err());
        // Aliasing a channel to its own physical name is harmless.
        assert!(registry.set_virtual_names(&["CH1", "B", "C"]).is_ok());
    }

    #[test]
    fn unknown_names_and_ids_are_not_available() {
        let registry = registry();
        assert_eq!(
            registry.resolve("CH9").unwrap_err(),
            SwitchError::ChannelNotAvailable {
                channel: "CH9".into()
            }
        );
        assert!(registry.check_id(2).is_ok());
        assert!(registry.check_id(3).is_err());
    }
}
