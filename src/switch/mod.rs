//! Switch-matrix connection engine.
//!
//! A switch is modeled as a graph: channels are nodes and relays are edges.
//! [`SwitchMatrix`] validates connection requests against the topology, the
//! channels' role flags and the set of active connections, then commits them
//! atomically and tracks relay settling.
//!
//! ```rust
//! use rust_ivi::switch::{SwitchMatrix, TopologyConfig};
//!
//! let matrix = SwitchMatrix::new(&TopologyConfig::from_edges(
//!     &["CH1", "CH2", "CH3", "CH4"],
//!     &[("CH1", "CH2"), ("CH2", "CH3")],
//! ))
//! .unwrap();
//!
//! let path = matrix.connect("CH1", "CH3").unwrap();
//! assert_eq!(path.to_string(), "CH1->CH2, CH2->CH3");
//! assert!(matrix.connect("CH2", "CH4").is_err());
//! ```

mod channel;
mod connection;
mod debounce;
mod matrix;
mod registry;
mod resolver;
mod topology;

pub use channel::{Channel, ChannelId, ElectricalLimits};
pub use connection::{Connection, Path};
pub use debounce::DebounceController;
pub use matrix::{PathCapability, SwitchMatrix};
pub use registry::ChannelRegistry;
pub use topology::{ChannelConfig, Edge, EdgeId, PathConfig, Topology, TopologyConfig};
