//! Custom error types for the driver framework.
//!
//! Two layers of errors exist:
//!
//! - **`SwitchError`**: the closed set of outcomes the switch-matrix engine can
//!   refuse a request with. Every variant carries the channel names (and edge,
//!   where relevant) that caused the refusal so callers can react without
//!   parsing strings.
//! - **`IviError`**: the framework-level error returned by drivers, which wraps
//!   `SwitchError` together with configuration, topology, transport and
//!   capability failures.
//!
//! ## Error Categories
//!
//! `SwitchError::category()` sorts refusals into four groups:
//!
//! 1. **Caller input** - `CannotConnectToSelf`, `ChannelNotAvailable`,
//!    `InvalidPath`, `InvalidVirtualNames`. Surfaced immediately, never retried.
//! 2. **Feasibility** - `PathUnsupported`, `PathNotFound`. The caller may retry
//!    after changing other connections.
//! 3. **Policy** - `IsConfigChannel`, `AttemptToConnectSources`,
//!    `SourceConflict`, `ResourceInUse`, `ExplicitConnectionExists`,
//!    `ExplicitConnectionDoesNotExist`, `RoleConflict`. A legitimate refusal.
//! 4. **Timing** - `Timeout` from debounce waits. The caller decides whether to
//!    wait again or proceed.
//!
//! None of these are fatal; the engine never leaves partial state behind.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the framework error type.
pub type IviResult<T> = std::result::Result<T, IviError>;

/// Convenience alias for results produced by the switch engine.
pub type SwitchResult<T> = std::result::Result<T, SwitchError>;

/// Broad classification of a [`SwitchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request itself is malformed (unknown channel, self connection).
    CallerInput,
    /// The topology cannot (or currently cannot) route the request.
    Feasibility,
    /// An exclusivity rule refused the request.
    Policy,
    /// A bounded wait expired.
    Timing,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::CallerInput => "caller_input",
            ErrorCategory::Feasibility => "feasibility",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Timing => "timing",
        };
        write!(f, "{}", label)
    }
}

/// Undirected pair of channel names identifying a relay edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    /// First channel of the edge.
    pub a: String,
    /// Second channel of the edge.
    pub b: String,
}

impl EdgeRef {
    /// Create an edge reference from two channel names.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.a, self.b)
    }
}

/// Refusals produced by the switch-matrix connection engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// Both endpoints name the same channel.
    #[error("Cannot connect channel '{channel}' to itself")]
    CannotConnectToSelf {
        /// The channel named twice.
        channel: String,
    },

    /// The name (or id) does not match any channel or virtual name.
    #[error("Channel '{channel}' is not available")]
    ChannelNotAvailable {
        /// The unresolved name or id.
        channel: String,
    },

    /// An endpoint is a configuration channel and cannot carry a caller connection.
    #[error("Channel '{channel}' is a configuration channel")]
    IsConfigChannel {
        /// The configuration channel.
        channel: String,
    },

    /// Both endpoints are source channels.
    #[error("Cannot connect source channels '{a}' and '{b}'")]
    AttemptToConnectSources {
        /// First source endpoint.
        a: String,
        /// Second source endpoint.
        b: String,
    },

    /// An identical explicit connection is already active.
    #[error("Explicit connection between '{a}' and '{b}' already exists")]
    ExplicitConnectionExists {
        /// First endpoint.
        a: String,
        /// Second endpoint.
        b: String,
    },

    /// No explicit connection matches the endpoint pair.
    #[error("No explicit connection between '{a}' and '{b}'")]
    ExplicitConnectionDoesNotExist {
        /// First endpoint.
        a: String,
        /// Second endpoint.
        b: String,
    },

    /// Committing would tie two distinct sources together through `channel`.
    #[error("Channel '{channel}' would carry both sources '{first}' and '{second}'")]
    SourceConflict {
        /// The channel where the sources would meet.
        channel: String,
        /// Source already present on the net.
        first: String,
        /// Source the request would add.
        second: String,
    },

    /// A required edge is claimed by a different connection.
    #[error("Relay {edge} is in use by connection {holder}")]
    ResourceInUse {
        /// The claimed edge.
        edge: EdgeRef,
        /// Endpoints of the connection holding the edge.
        holder: EdgeRef,
    },

    /// The channels are connectable in principle, but every route is blocked.
    #[error("No available path between '{a}' and '{b}'")]
    PathNotFound {
        /// First endpoint.
        a: String,
        /// Second endpoint.
        b: String,
    },

    /// No route exists between the channels even with nothing connected.
    #[error("Path between '{a}' and '{b}' is not supported by the topology")]
    PathUnsupported {
        /// First endpoint (or hop start).
        a: String,
        /// Second endpoint (or hop end).
        b: String,
    },

    /// An explicit path was rejected before commitment.
    #[error("Invalid path: {reason}")]
    InvalidPath {
        /// Why the path was rejected.
        reason: String,
    },

    /// `set_virtual_names` input failed validation.
    #[error("Invalid virtual names: {reason}")]
    InvalidVirtualNames {
        /// Why the names were rejected.
        reason: String,
    },

    /// A role change would make a channel both config and source.
    #[error("Channel '{channel}' cannot be both a configuration and a source channel")]
    RoleConflict {
        /// The channel whose roles would clash.
        channel: String,
    },

    /// Settling did not finish inside the caller's bound.
    #[error("Relays still settling after {waited:?}: {pending:?}")]
    Timeout {
        /// The bound that expired.
        waited: Duration,
        /// Channels still settling at expiry.
        pending: Vec<String>,
    },
}

impl SwitchError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SwitchError::CannotConnectToSelf { .. }
            | SwitchError::ChannelNotAvailable { .. }
            | SwitchError::InvalidPath { .. }
            | SwitchError::InvalidVirtualNames { .. } => ErrorCategory::CallerInput,
            SwitchError::PathNotFound { .. } | SwitchError::PathUnsupported { .. } => {
                ErrorCategory::Feasibility
            }
            SwitchError::IsConfigChannel { .. }
            | SwitchError::AttemptToConnectSources { .. }
            | SwitchError::ExplicitConnectionExists { .. }
            | SwitchError::ExplicitConnectionDoesNotExist { .. }
            | SwitchError::SourceConflict { .. }
            | SwitchError::ResourceInUse { .. }
            | SwitchError::RoleConflict { .. } => ErrorCategory::Policy,
            SwitchError::Timeout { .. } => ErrorCategory::Timing,
        }
    }

    /// Whether the caller can continue after this error.
    ///
    /// Always true: the engine validates fully before mutating, so a refusal
    /// never corrupts state.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    pub(crate) fn not_available(channel: impl Into<String>) -> Self {
        SwitchError::ChannelNotAvailable {
            channel: channel.into(),
        }
    }
}

/// Errors raised while building a topology from its description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Two channels share a physical name.
    #[error("Duplicate channel name '{0}'")]
    DuplicateChannel(String),

    /// A channel was declared with an empty name.
    #[error("Channel #{0} has an empty name")]
    EmptyName(usize),

    /// A path declaration names a channel that was never declared.
    #[error("Path references unknown channel '{0}'")]
    UnknownChannel(String),

    /// A path declaration connects a channel to itself.
    #[error("Path connects channel '{0}' to itself")]
    SelfLoop(String),

    /// A channel is declared as both config and source.
    #[error("Channel '{0}' is declared as both configuration and source channel")]
    ConflictingRoles(String),
}

/// Primary error type for instrument drivers.
///
/// # Example
///
/// ```rust
/// use rust_ivi::error::{IviError, SwitchError};
///
/// let err: IviError = SwitchError::ChannelNotAvailable { channel: "CH9".into() }.into();
/// assert!(err.to_string().contains("CH9"));
/// ```
#[derive(Error, Debug)]
pub enum IviError {
    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The topology description is inconsistent.
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// The switch engine refused the request.
    #[error("Switch error: {0}")]
    Switch(#[from] SwitchError),

    /// Sending or receiving over the transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The driver does not implement the requested capability group.
    #[error("Capability group '{0}' is not supported by this driver")]
    CapabilityNotSupported(String),

    /// A command template could not be rendered.
    #[error("Failed to format command '{template}': {message}")]
    CommandFormat {
        /// The template that failed.
        template: String,
        /// Formatter message.
        message: String,
    },

    /// The instrument replied with something unparseable.
    #[error("Invalid response to '{command}': '{response}'")]
    InvalidResponse {
        /// Command that was sent.
        command: String,
        /// Raw reply.
        response: String,
    },
}

impl From<figment::Error> for IviError {
    fn from(value: figment::Error) -> Self {
        IviError::Config(Box::new(value))
    }
}

impl IviError {
    /// Wrap a transport-level failure.
    pub fn transport(err: impl fmt::Display) -> Self {
        IviError::Transport(err.to_string())
    }

    /// The underlying switch refusal, if this is one.
    pub fn as_switch(&self) -> Option<&SwitchError> {
        match self {
            IviError::Switch(err) => Some(err),
            _ => None,
        }
    }
}
