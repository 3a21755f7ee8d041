//! RS-485 link over a local serial port.
//!
//! Basic RS-485 adapters switch between transmit and receive on the RTS
//! line. Every transmission happens inside a [`TxWindow`]: RTS is asserted
//! when the window opens and released when it is dropped, whichever way the
//! write ends (success, I/O error or a cancelled exchange).
//!
//! Replies are accumulated in a persistent buffer and split with
//! [`BusCodec::split_frame`], so a reply arriving in several chunks is
//! reassembled and leading noise is discarded.

use crate::config::SerialConfig;
use crate::error::{Result, TransportError};
use crate::link::{Link, RawReply};
use bytes::{Bytes, BytesMut};
use parkgate_protocol::{BusCodec, Command, encode};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep};
use tokio_serial::{ClearBuffer, FlowControl, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

fn serial_io(e: tokio_serial::Error) -> TransportError {
    TransportError::Io(io::Error::from(e))
}

/// The transmit-enable line of an RS-485 adapter.
trait RtsLine {
    fn set_rts(&mut self, level: bool) -> Result<()>;
}

impl RtsLine for SerialStream {
    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.write_request_to_send(level).map_err(serial_io)
    }
}

/// Transmit window on an RS-485 port.
///
/// Holds RTS asserted for its lifetime when RTS control is enabled.
struct TxWindow<'a, P: RtsLine> {
    port: &'a mut P,
    rts: bool,
}

impl<'a, P: RtsLine> TxWindow<'a, P> {
    async fn open(port: &'a mut P, rts: bool, settle: Duration) -> Result<Self> {
        if rts {
            port.set_rts(true)?;
            trace!("rts_asserted");
        }
        // Guard first, so a cancelled settle still releases RTS.
        let window = Self { port, rts };
        if rts && !settle.is_zero() {
            sleep(settle).await;
        }
        Ok(window)
    }

    fn port(&mut self) -> &mut P {
        self.port
    }
}

impl<P: RtsLine> Drop for TxWindow<'_, P> {
    fn drop(&mut self) {
        if self.rts {
            match self.port.set_rts(false) {
                Ok(()) => trace!("rts_released"),
                Err(e) => warn!(error = %e, "rts_release_failed"),
            }
        }
    }
}

/// Write one frame inside a transmit window.
async fn write_frame<P>(port: &mut P, frame: &[u8], config: &SerialConfig) -> Result<()>
where
    P: RtsLine + AsyncWrite + Unpin,
{
    let mut window = TxWindow::open(port, config.rts_control, config.rts_enable_delay()).await?;
    window.port().write_all(frame).await?;
    window.port().flush().await?;
    if config.rts_control && !config.rts_disable_delay().is_zero() {
        sleep(config.rts_disable_delay()).await;
    }
    Ok(())
}

fn open_port(config: &SerialConfig) -> Result<SerialStream> {
    let data_bits = config.data_bits().ok_or_else(|| {
        TransportError::port_unavailable(
            config.port.as_str(),
            format!("unsupported data bits: {}", config.data_bits),
        )
    })?;
    let stop_bits = config.stop_bits().ok_or_else(|| {
        TransportError::port_unavailable(
            config.port.as_str(),
            format!("unsupported stop bits: {}", config.stop_bits),
        )
    })?;

    let mut port = tokio_serial::new(config.port.as_str(), config.baud_rate)
        .data_bits(data_bits)
        .parity(config.parity.into())
        .stop_bits(stop_bits)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| TransportError::port_unavailable(config.port.as_str(), e.to_string()))?;

    // Start in receive mode.
    if config.rts_control {
        port.write_request_to_send(false).map_err(serial_io)?;
    }

    Ok(port)
}

/// [`Link`] implementation over `tokio-serial`.
pub struct SerialLink {
    config: SerialConfig,
    port: Option<SerialStream>,
    codec: BusCodec,
    buffer: BytesMut,
}

impl SerialLink {
    /// Open the configured port.
    ///
    /// # Errors
    /// Returns `TransportError::PortUnavailable` if the port cannot be opened
    /// or the framing settings are out of range.
    pub fn open(config: SerialConfig) -> Result<Self> {
        let port = open_port(&config)?;
        info!(
            port = %config.port,
            baud = config.baud_rate,
            rts_control = config.rts_control,
            "serial_port_opened"
        );

        Ok(Self {
            config,
            port: Some(port),
            codec: BusCodec::replies(),
            buffer: BytesMut::with_capacity(64),
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Close the port. Subsequent exchanges fail until [`Link::reopen`].
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.config.port, "serial_port_closed");
        }
        self.buffer.clear();
    }

    async fn transmit(&mut self, command: &Command) -> Result<()> {
        let frame = encode(command);
        let port = self.port.as_mut().ok_or_else(|| {
            TransportError::port_unavailable(self.config.port.as_str(), "port closed")
        })?;

        // Drop whatever a previous exchange left behind.
        port.clear(ClearBuffer::Input).map_err(serial_io)?;
        self.buffer.clear();

        write_frame(port, &frame, &self.config).await?;

        debug!(address = %command.address(), frame = %command, "tx");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        let port = self.port.as_mut().ok_or_else(|| {
            TransportError::port_unavailable(self.config.port.as_str(), "port closed")
        })?;

        loop {
            match self.codec.split_frame(&mut self.buffer) {
                Ok(Some(frame)) => {
                    debug!(len = frame.len(), "rx");
                    return Ok(frame.freeze());
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "rx_discarded");
                    continue;
                }
            }

            let n = port.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            trace!(bytes = n, buffered = self.buffer.len(), "rx_chunk");
        }
    }

    async fn exchange(&mut self, command: &Command) -> Result<Bytes> {
        self.transmit(command).await?;
        self.read_frame().await
    }
}

impl Link for SerialLink {
    async fn poll(&mut self, command: &Command, timeout: Duration) -> Result<RawReply> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.exchange(command)).await {
            Ok(result) => result.map(|bytes| RawReply::new(bytes, started.elapsed())),
            Err(_) => Err(TransportError::timeout(timeout)),
        }
    }

    async fn send_only(&mut self, command: &Command) -> Result<()> {
        self.transmit(command).await
    }

    async fn reopen(&mut self) -> Result<()> {
        warn!(port = %self.config.port, "serial_port_reopening");
        self.close();
        sleep(self.config.reopen_pause()).await;

        let port = open_port(&self.config)?;
        self.port = Some(port);
        info!(port = %self.config.port, "serial_port_reopened");
        Ok(())
    }
}
