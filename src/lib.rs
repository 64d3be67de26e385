//! # Rust IVI Core Library
//!
//! Drivers for programmable test instruments that speak ASCII command
//! dialects, built around a switch-matrix connection engine. The engine
//! models a relay/crossbar switch as a graph of channels, validates and
//! commits connections between arbitrary channel pairs, enforces the
//! exclusivity rules of configuration and source channels, and tracks relay
//! settling time.
//!
//! ## Crate Structure
//!
//! - **`switch`**: The connection engine. `SwitchMatrix` owns the channel
//!   registry, the static topology, active connections and debounce state.
//! - **`driver`**: `SwitchDriver`, which binds a `SwitchMatrix` to a transport
//!   and turns committed paths into relay commands.
//! - **`inherent`**: Driver identity and capability groups, plus the
//!   `Instrument` trait for `*IDN?`/`*RST`/`*CLS`.
//! - **`transport`**: The `Transport` trait and its line, mock and (with the
//!   `serial` feature) serial implementations.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: `SwitchError` and the framework-level `IviError`.

pub mod config;
pub mod driver;
pub mod error;
pub mod inherent;
pub mod logging;
pub mod switch;
pub mod transport;

pub use driver::{RelayCommands, SwitchDriver};
pub use error::{IviError, IviResult, SwitchError, SwitchResult};
pub use switch::{Path, SwitchMatrix};
