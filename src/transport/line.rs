//! Line-oriented transport over any async byte stream.

use super::Transport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Framing and timing for a [`LineTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    /// Appended to every outgoing command.
    pub write_terminator: String,
    /// Byte that ends a reply.
    pub read_terminator: u8,
    /// Upper bound on waiting for a reply.
    pub timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            write_terminator: "\n".into(),
            read_terminator: b'\n',
            timeout: Duration::from_secs(1),
        }
    }
}

impl LineSettings {
    /// Use `terminator` for both directions. The last byte of the string
    /// terminates replies.
    pub fn with_terminator(mut self, terminator: &str) -> Self {
        self.write_terminator = terminator.to_string();
        if let Some(last) = terminator.bytes().last() {
            self.read_terminator = last;
        }
        self
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transport writing terminated ASCII lines to a stream.
///
/// The stream sits behind an async mutex so a query's write and read are
/// never interleaved with another caller's.
///
/// ```rust
/// use rust_ivi::transport::{LineSettings, LineTransport, Transport};
/// use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
///
/// # tokio_test::block_on(async {
/// let (host, device) = tokio::io::duplex(64);
/// let transport = LineTransport::new(host, LineSettings::default());
///
/// let instrument = tokio::spawn(async move {
///     let mut device = BufReader::new(device);
///     let mut line = String::new();
///     device.read_line(&mut line).await.unwrap();
///     device.get_mut().write_all(b"ACME,SW1,42,1.0\n").await.unwrap();
///     line
/// });
///
/// let reply = transport.query("*IDN?").await.unwrap();
/// assert_eq!(reply, "ACME,SW1,42,1.0");
/// assert_eq!(instrument.await.unwrap(), "*IDN?\n");
/// # })
/// ```
pub struct LineTransport<S> {
    port: Mutex<BufReader<S>>,
    settings: LineSettings,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream.
    pub fn new(stream: S, settings: LineSettings) -> Self {
        Self {
            port: Mutex::new(BufReader::new(stream)),
            settings,
        }
    }

    /// Framing and timing in use.
    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    async fn write_line(&self, port: &mut BufReader<S>, command: &str) -> Result<()> {
        let line = format!("{}{}", command, self.settings.write_terminator);
        let writer = port.get_mut();
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("write of '{}' failed", command))?;
        writer.flush().await.context("flush failed")?;
        Ok(())
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn command(&self, command: &str) -> Result<()> {
        let mut port = self.port.lock().await;
        self.write_line(&mut port, command).await?;
        tracing::trace!(command, "Sent command");
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;
        self.write_line(&mut port, command).await?;

        let mut buf = Vec::new();
        let read = tokio::time::timeout(
            self.settings.timeout,
            port.read_until(self.settings.read_terminator, &mut buf),
        )
        .await
        .with_context(|| format!("timed out waiting for reply to '{}'", command))?
        .with_context(|| format!("read of reply to '{}' failed", command))?;
        if read == 0 {
            return Err(anyhow!("connection closed while waiting for reply to '{}'", command));
        }

        let reply = String::from_utf8_lossy(&buf).trim().to_string();
        tracing::trace!(command, reply = %reply, "Received reply");
        Ok(reply)
    }
}
