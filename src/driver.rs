//! Switch driver: the connection engine bound to a transport.
//!
//! [`SwitchDriver`] commits requests in its [`SwitchMatrix`] first and only
//! then actuates relays, one command per hop, rendered from the driver's
//! [`RelayCommands`] templates. If the instrument rejects a command the
//! connection is retracted and the hops already closed are reopened, so the
//! matrix never reports a connection the hardware does not have. Operations
//! that change relay state hold the driver's actuation lock from commit to the
//! last relay command, so their I/O never interleaves.
//!
//! # Example
//!
//! ```rust
//! use rust_ivi::driver::{RelayCommands, SwitchDriver};
//! use rust_ivi::inherent::Inherent;
//! use rust_ivi::switch::{SwitchMatrix, TopologyConfig};
//! use rust_ivi::transport::MockTransport;
//!
//! # tokio_test::block_on(async {
//! let matrix = SwitchMatrix::new(&TopologyConfig::from_edges(
//!     &["CH1", "CH2", "CH3"],
//!     &[("CH1", "CH2"), ("CH2", "CH3")],
//! ))
//! .unwrap();
//! let driver = SwitchDriver::new(
//!     Inherent::new("acme_sw", "ACME", "IviSwtch"),
//!     matrix,
//!     RelayCommands::new("CLOSE {ch1},{ch2}", "OPEN {ch1},{ch2}"),
//!     MockTransport::new(),
//! )
//! .unwrap();
//!
//! driver.connect("CH1", "CH3").await.unwrap();
//! assert_eq!(driver.transport().sent(), vec!["CLOSE CH1,CH2", "CLOSE CH2,CH3"]);
//! # })
//! ```

use crate::config::IviConfig;
use crate::error::{IviError, IviResult};
use crate::inherent::{CapabilityGroup, Inherent, Instrument};
use crate::switch::{Path, SwitchMatrix};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::HashMap;
use std::time::Duration;
use strfmt::strfmt;
use tracing::{instrument, warn};

/// Relay command templates.
///
/// `close` and `open` receive the two channels of one hop as `{ch1}` and
/// `{ch2}`. `open_all`, when present, opens every relay in one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RelayCommands {
    /// Close one relay.
    #[validate(min_length = 1)]
    pub close: String,
    /// Open one relay.
    #[validate(min_length = 1)]
    pub open: String,
    /// Open every relay.
    #[serde(default)]
    pub open_all: Option<String>,
}

impl RelayCommands {
    /// Templates for closing and opening single relays.
    pub fn new(close: impl Into<String>, open: impl Into<String>) -> Self {
        Self {
            close: close.into(),
            open: open.into(),
            open_all: None,
        }
    }

    /// Add a single-command "open everything" template.
    pub fn with_open_all(mut self, open_all: impl Into<String>) -> Self {
        self.open_all = Some(open_all.into());
        self
    }

    /// Command closing the relay between `ch1` and `ch2`.
    pub fn close_command(&self, ch1: &str, ch2: &str) -> IviResult<String> {
        render(&self.close, ch1, ch2)
    }

    /// Command opening the relay between `ch1` and `ch2`.
    pub fn open_command(&self, ch1: &str, ch2: &str) -> IviResult<String> {
        render(&self.open, ch1, ch2)
    }

    /// Fail unless both per-hop templates mention `{ch1}` and `{ch2}`.
    pub fn check_placeholders(&self) -> IviResult<()> {
        for template in [&self.close, &self.open] {
            if !template.contains("{ch1}") || !template.contains("{ch2}") {
                return Err(IviError::CommandFormat {
                    template: template.clone(),
                    message: "template must contain {ch1} and {ch2}".into(),
                });
            }
        }
        Ok(())
    }
}

fn render(template: &str, ch1: &str, ch2: &str) -> IviResult<String> {
    let mut fmt_context = HashMap::new();
    fmt_context.insert("ch1".to_string(), ch1.to_string());
    fmt_context.insert("ch2".to_string(), ch2.to_string());
    strfmt(template, &fmt_context).map_err(|e| IviError::CommandFormat {
        template: template.to_string(),
        message: e.to_string(),
    })
}

/// Switch driver over a [`Transport`].
pub struct SwitchDriver<T> {
    inherent: Inherent,
    matrix: SwitchMatrix,
    commands: RelayCommands,
    transport: T,
    debounce_timeout: Duration,
    actuation: tokio::sync::Mutex<()>,
}

impl<T: Transport> SwitchDriver<T> {
    /// Assemble a driver. The identity must include the `Base` group.
    pub fn new(
        inherent: Inherent,
        matrix: SwitchMatrix,
        commands: RelayCommands,
        transport: T,
    ) -> IviResult<Self> {
        inherent.capabilities.require(CapabilityGroup::Base)?;
        commands.check_placeholders()?;
        Ok(Self {
            inherent,
            matrix,
            commands,
            transport,
            debounce_timeout: Duration::from_secs(1),
            actuation: tokio::sync::Mutex::new(()),
        })
    }

    /// Build identity, topology and command table from configuration.
    pub fn from_config(config: &IviConfig, transport: T) -> IviResult<Self> {
        let matrix = SwitchMatrix::new(&config.topology)?;
        let driver = Self::new(
            config.driver.inherent(),
            matrix,
            config.commands.clone(),
            transport,
        )?;
        tracing::info!(
            driver = %driver.inherent.prefix,
            channels = driver.matrix.channel_count(),
            "Switch driver ready"
        );
        Ok(driver.with_debounce_timeout(config.driver.debounce_timeout))
    }

    /// Default bound used by [`wait_for_debounce`](Self::wait_for_debounce).
    pub fn with_debounce_timeout(mut self, timeout: Duration) -> Self {
        self.debounce_timeout = timeout;
        self
    }

    /// The connection engine.
    pub fn matrix(&self) -> &SwitchMatrix {
        &self.matrix
    }

    /// The command templates.
    pub fn commands(&self) -> &RelayCommands {
        &self.commands
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Route, commit and close a connection.
    #[instrument(skip(self), fields(driver = %self.inherent.prefix), err)]
    pub async fn connect(&self, a: &str, b: &str) -> IviResult<Path> {
        let _actuation = self.actuation.lock().await;
        let path = self.matrix.connect(a, b).map_err(|e| {
            warn!(error = %e, "Connect refused");
            e
        })?;
        self.actuate(a, b, &path).await?;
        Ok(path)
    }

    /// Commit and close a caller-specified route.
    #[instrument(skip(self, channels), fields(driver = %self.inherent.prefix), err)]
    pub async fn set_path<S: AsRef<str> + Sync>(&self, channels: &[S]) -> IviResult<Path> {
        let _actuation = self.actuation.lock().await;
        let path = self.matrix.set_path(channels).map_err(|e| {
            warn!(error = %e, "Set path refused");
            e
        })?;
        let (a, b) = match (path.first(), path.last()) {
            (Some(a), Some(b)) => (a.to_string(), b.to_string()),
            _ => return Ok(path),
        };
        self.actuate(&a, &b, &path).await?;
        Ok(path)
    }

    /// Remove a connection and open the relays nothing else holds.
    #[instrument(skip(self), fields(driver = %self.inherent.prefix), err)]
    pub async fn disconnect(&self, a: &str, b: &str) -> IviResult<Path> {
        let _actuation = self.actuation.lock().await;
        let path = self.matrix.disconnect(a, b)?;
        self.open_released(&path).await?;
        Ok(path)
    }

    /// Remove every connection and open every relay.
    #[instrument(skip(self), fields(driver = %self.inherent.prefix), err)]
    pub async fn disconnect_all(&self) -> IviResult<Vec<Path>> {
        let _actuation = self.actuation.lock().await;
        let paths = self.matrix.disconnect_all();
        match &self.commands.open_all {
            Some(open_all) => {
                self.transport
                    .command(open_all)
                    .await
                    .map_err(IviError::transport)?;
            }
            None => {
                let mut opened: Vec<(&str, &str)> = Vec::new();
                for (x, y) in paths.iter().flat_map(Path::hops) {
                    if opened.iter().any(|&(p, q)| (p, q) == (x, y) || (p, q) == (y, x)) {
                        continue;
                    }
                    let command = self.commands.open_command(x, y)?;
                    self.transport
                        .command(&command)
                        .await
                        .map_err(IviError::transport)?;
                    opened.push((x, y));
                }
            }
        }
        Ok(paths)
    }

    /// Wait for relays to settle, bounded by the configured debounce timeout.
    pub async fn wait_for_debounce(&self) -> IviResult<()> {
        self.wait_for_debounce_within(self.debounce_timeout).await
    }

    /// Wait for relays to settle, bounded by `max_time`.
    pub async fn wait_for_debounce_within(&self, max_time: Duration) -> IviResult<()> {
        self.matrix.wait_for_debounce(max_time).await?;
        Ok(())
    }

    /// Close every hop of a committed path, retracting it on failure.
    async fn actuate(&self, a: &str, b: &str, path: &Path) -> IviResult<()> {
        let mut closed: Vec<(&str, &str)> = Vec::new();
        for (x, y) in path.hops() {
            let result = match self.commands.close_command(x, y) {
                Ok(command) => self
                    .transport
                    .command(&command)
                    .await
                    .map_err(IviError::transport),
                Err(e) => Err(e),
            };
            if let Err(err) = result {
                warn!(
                    path = %path,
                    hop = %format!("{x}->{y}"),
                    error = %err,
                    "Relay close failed, rolling back"
                );
                self.roll_back(a, b, &closed).await;
                return Err(err);
            }
            closed.push((x, y));
        }
        Ok(())
    }

    /// Retract a connection whose relays could not all be closed.
    async fn roll_back(&self, a: &str, b: &str, closed: &[(&str, &str)]) {
        if let Err(e) = self.matrix.disconnect(a, b) {
            warn!(error = %e, "Failed to retract connection");
        }
        for &(x, y) in closed.iter().rev() {
            if self.matrix.is_relay_closed(x, y).unwrap_or(true) {
                continue;
            }
            let sent = match self.commands.open_command(x, y) {
                Ok(command) => self
                    .transport
                    .command(&command)
                    .await
                    .map_err(IviError::transport),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(hop = %format!("{x}->{y}"), error = %e, "Failed to reopen relay");
            }
        }
    }

    /// Open the hops of a released path that no other connection holds.
    async fn open_released(&self, path: &Path) -> IviResult<()> {
        for (x, y) in path.hops() {
            if self.matrix.is_relay_closed(x, y)? {
                continue;
            }
            let command = self.commands.open_command(x, y)?;
            self.transport
                .command(&command)
                .await
                .map_err(IviError::transport)?;
        }
        Ok(())
    }
}

impl<T: Transport> Instrument for SwitchDriver<T> {
    fn inherent(&self) -> &Inherent {
        &self.inherent
    }

    fn transport(&self) -> &dyn Transport {
        &self.transport
    }
}
