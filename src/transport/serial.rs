//! Serial port transport (requires the `serial` feature).

use super::{LineSettings, LineTransport};
use anyhow::{Context, Result};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Open a serial port as a line transport (8N1, no flow control).
pub fn open_serial(
    port_path: &str,
    baud_rate: u32,
    settings: LineSettings,
) -> Result<LineTransport<SerialStream>> {
    let port = tokio_serial::new(port_path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(settings.timeout)
        .open_native_async()
        .with_context(|| format!("failed to open serial port {}", port_path))?;

    tracing::info!(port = port_path, baud_rate, "Opened serial port");
    Ok(LineTransport::new(port, settings))
}
