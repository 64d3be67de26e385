//! Channel identity, ratings and role flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Index of a channel in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub usize);

impl ChannelId {
    /// Position in the registry.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Electrical ratings declared for a channel.
///
/// All values are in SI base units (A, W, V, Ohm, Hz). A rating of `0.0`
/// means the driver did not declare it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectricalLimits {
    /// Maximum AC current the closed relay can carry.
    pub ac_current_carry_max: f64,
    /// Maximum AC current the relay can switch.
    pub ac_current_switch_max: f64,
    /// Maximum AC power the closed relay can carry.
    pub ac_power_carry_max: f64,
    /// Maximum AC power the relay can switch.
    pub ac_power_switch_max: f64,
    /// Maximum AC voltage.
    pub ac_voltage_max: f64,
    /// Maximum DC current the closed relay can carry.
    pub dc_current_carry_max: f64,
    /// Maximum DC current the relay can switch.
    pub dc_current_switch_max: f64,
    /// Maximum DC power the closed relay can carry.
    pub dc_power_carry_max: f64,
    /// Maximum DC power the relay can switch.
    pub dc_power_switch_max: f64,
    /// Maximum DC voltage.
    pub dc_voltage_max: f64,
    /// Characteristic impedance.
    pub impedance: f64,
    /// Bandwidth.
    pub bandwidth: f64,
}

/// Static description of one channel, fixed at topology construction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChannelSpec {
    pub id: ChannelId,
    pub name: String,
    pub limits: ElectricalLimits,
    pub wire_mode: u32,
    pub settling_time: Duration,
}

/// Mutable role flags of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChannelRoles {
    pub config: bool,
    pub source: bool,
}

/// Snapshot of a channel as seen by callers.
///
/// Role flags, the virtual name and `debounced` reflect the moment the
/// snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    /// Registry index.
    pub id: ChannelId,
    /// Physical channel name.
    pub name: String,
    /// Caller-assigned alias, empty when unset.
    pub virtual_name: String,
    /// Reserved for internal routing; cannot be a connection endpoint.
    pub is_config_channel: bool,
    /// Drives a signal; cannot be tied to another source.
    pub is_source_channel: bool,
    /// Declared electrical ratings.
    pub limits: ElectricalLimits,
    /// Number of conductors switched together.
    pub wire_mode: u32,
    /// Relay settling delay after a membership change.
    #[serde(with = "humantime_serde")]
    pub settling_time: Duration,
    /// Whether the channel has finished settling.
    pub debounced: bool,
}

macro_rules! limit_getters {
    ($($field:ident),+ $(,)?) => {
        $(
            #[doc = concat!("Declared `", stringify!($field), "` rating.")]
            pub fn $field(&self) -> f64 {
                self.limits.$field
            }
        )+
    };
}

impl Channel {
    limit_getters!(
        ac_current_carry_max,
        ac_current_switch_max,
        ac_power_carry_max,
        ac_power_switch_max,
        ac_voltage_max,
        dc_current_carry_max,
        dc_current_switch_max,
        dc_power_carry_max,
        dc_power_switch_max,
        dc_voltage_max,
        impedance,
        bandwidth,
    );

    /// Number of conductors switched together.
    pub fn wire_mode(&self) -> u32 {
        self.wire_mode
    }

    /// Settling delay after the channel's relays change.
    pub fn settling_time(&self) -> Duration {
        self.settling_time
    }

    /// Instantaneous debounce state at snapshot time.
    pub fn is_debounced(&self) -> bool {
        self.debounced
    }

    /// The virtual name if assigned, otherwise the physical name.
    pub fn display_name(&self) -> &str {
        if self.virtual_name.is_empty() {
            &self.name
        } else {
            &self.virtual_name
        }
    }
}
