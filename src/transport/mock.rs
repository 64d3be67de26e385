//! In-memory transport for tests and simulation.
//!
//! Records every command, answers queries from a script and can be told to
//! fail once, either on the next call or on a specific command. An optional
//! latency delays every call before it is recorded.

use super::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Mock transport.
///
/// # Example
///
/// ```
/// use rust_ivi::transport::{MockTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new().with_reply("*IDN?", "ACME,SW100,1234,2.1");
/// assert_eq!(transport.query("*IDN?").await.unwrap(), "ACME,SW100,1234,2.1");
/// transport.command("*RST").await.unwrap();
/// assert_eq!(transport.sent(), vec!["*IDN?", "*RST"]);
/// # })
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    default_reply: Option<String>,
    fail_next: AtomicBool,
    fail_on: Mutex<Option<String>>,
    latency: Duration,
}

impl MockTransport {
    /// Transport with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `query`. Replies for the same query are consumed in
    /// order; the last one repeats.
    pub fn with_reply(self, query: &str, reply: &str) -> Self {
        self.push_reply(query, reply);
        self
    }

    /// Reply used for queries with nothing scripted.
    pub fn with_default_reply(mut self, reply: &str) -> Self {
        self.default_reply = Some(reply.to_string());
        self
    }

    /// Delay every command and query by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a reply on a shared transport.
    pub fn push_reply(&self, query: &str, reply: &str) {
        self.replies
            .lock()
            .entry(query.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Fail the next call, whatever it is.
    pub fn trigger_failure(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Fail the next call that sends exactly `command`.
    pub fn fail_on(&self, command: &str) {
        *self.fail_on.lock() = Some(command.to_string());
    }

    /// Every command and query sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Forget recorded traffic.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    async fn record(&self, command: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.sent.lock().push(command.to_string());

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("mock failure on '{}'", command));
        }
        let mut fail_on = self.fail_on.lock();
        if fail_on.as_deref() == Some(command) {
            *fail_on = None;
            return Err(anyhow!("mock failure on '{}'", command));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn command(&self, command: &str) -> Result<()> {
        self.record(command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.record(command).await?;

        let mut replies = self.replies.lock();
        if let Some(queue) = replies.get_mut(command) {
            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(reply) = reply {
                return Ok(reply);
            }
        }
        self.default_reply
            .clone()
            .ok_or_else(|| anyhow!("no reply scripted for '{}'", command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.trigger_failure();
        assert!(transport.command("A").await.is_err());
        assert!(transport.command("A").await.is_ok());
        assert_eq!(transport.sent(), vec!["A", "A"]);
    }

    #[tokio::test]
    async fn fail_on_targets_one_command() {
        let transport = MockTransport::new();
        transport.fail_on("CLOSE 2");
        assert!(transport.command("CLOSE 1").await.is_ok());
        assert!(transport.command("CLOSE 2").await.is_err());
        assert!(transport.command("CLOSE 2").await.is_ok());
    }

    #[tokio::test]
    async fn scripted_replies_are_consumed_in_order() {
        let transport = MockTransport::new()
            .with_reply("MEAS?", "1")
            .with_reply("MEAS?", "2");
        assert_eq!(transport.query("MEAS?").await.unwrap(), "1");
        assert_eq!(transport.query("MEAS?").await.unwrap(), "2");
        assert_eq!(transport.query("MEAS?").await.unwrap(), "2");
        assert!(transport.query("OTHER?").await.is_err());
    }

    #[tokio::test]
    async fn clear_sent_forgets_traffic() {
        let transport = MockTransport::new().with_default_reply("0");
        transport.query("X?").await.unwrap();
        transport.clear_sent();
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn latency_delays_each_call() {
        let transport = MockTransport::new().with_latency(Duration::from_millis(20));
        let started = tokio::time::Instant::now();
        transport.command("A").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(transport.sent(), vec!["A"]);
    }
}
