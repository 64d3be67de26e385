//! Command/response transports.
//!
//! Drivers talk to instruments through the [`Transport`] trait: plain ASCII
//! commands in, optional single-line replies out. Errors cross this seam as
//! `anyhow::Error` and are mapped to [`IviError::Transport`] by the driver
//! layer.
//!
//! [`IviError::Transport`]: crate::error::IviError::Transport

mod line;
mod mock;
#[cfg(feature = "serial")]
mod serial;

pub use line::{LineSettings, LineTransport};
pub use mock::MockTransport;
#[cfg(feature = "serial")]
pub use serial::open_serial;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// ASCII command/response channel to one instrument.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;

    /// Send a query and return the (trimmed) response line.
    async fn query(&self, command: &str) -> Result<String>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn command(&self, command: &str) -> Result<()> {
        (**self).command(command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        (**self).query(command).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn command(&self, command: &str) -> Result<()> {
        (**self).command(command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        (**self).query(command).await
    }
}
