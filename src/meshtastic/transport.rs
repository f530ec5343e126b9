//! Byte streams to a radio: TCP (network-attached nodes) or USB serial.
//!
//! Both return something that is `AsyncRead + AsyncWrite` and can be handed to
//! [`ConnectedNode::open`](crate::meshtastic::ConnectedNode::open).

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use tokio::net::TcpStream;

/// Port the firmware's TCP client API listens on.
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Append the default API port when `host` does not name one.
pub fn tcp_address(host: &str) -> String {
    let has_port = match host.rsplit_once(':') {
        // Bracketed IPv6 literal with or without a port.
        Some((h, p)) if host.starts_with('[') => h.ends_with(']') && p.parse::<u16>().is_ok(),
        // Bare IPv6 literal: more than one colon and no brackets.
        Some((h, _)) if h.contains(':') => false,
        Some((_, p)) => p.parse::<u16>().is_ok(),
        None => false,
    };
    if has_port {
        host.to_string()
    } else if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, DEFAULT_TCP_PORT)
    } else {
        format!("{}:{}", host, DEFAULT_TCP_PORT)
    }
}

pub async fn connect_tcp(host: &str) -> Result<TcpStream> {
    let addr = tcp_address(host);
    info!("Connecting to Meshtastic node at {}", addr);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// First serial port the OS reports, if any.
#[cfg(feature = "serial")]
pub fn detect_serial_port() -> Result<String> {
    let ports = serialport::available_ports().map_err(|e| anyhow!("Failed to list serial ports: {}", e))?;
    for p in &ports {
        debug!("Found serial port {} ({:?})", p.port_name, p.port_type);
    }
    ports
        .into_iter()
        .next()
        .map(|p| p.port_name)
        .ok_or_else(|| anyhow!("No serial ports found; pass --port or --host"))
}

#[cfg(not(feature = "serial"))]
pub fn detect_serial_port() -> Result<String> {
    Err(anyhow!("Serial support not compiled in; rebuild with the `serial` feature or use --host"))
}

/// Open `port_name` and bridge it onto an in-memory async stream.
///
/// The serial port is blocking, so two blocking tasks pump bytes between it and one end of a
/// `tokio::io::duplex` pipe. Dropping the returned stream stops both pumps.
#[cfg(feature = "serial")]
pub async fn open_serial(port_name: &str, baud_rate: u32) -> Result<tokio::io::DuplexStream> {
    use std::io::{ErrorKind, Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::runtime::Handle;

    info!("Opening Meshtastic device on {} at {} baud", port_name, baud_rate);
    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

    // ESP32 boards may need DTR/RTS asserted before they talk.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut purge = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let n = port.read(&mut purge).unwrap_or(0);
            debug!("Discarded {} bytes of startup output", n);
        }
    }

    let mut tx_port = port
        .try_clone()
        .map_err(|e| anyhow!("Failed to clone serial port handle: {}", e))?;
    let mut rx_port = port;

    let (client, bridge) = tokio::io::duplex(4096);
    let (mut bridge_rx, mut bridge_tx) = tokio::io::split(bridge);
    let stopped = Arc::new(AtomicBool::new(false));
    let handle = Handle::current();

    // radio -> client
    let stop = stopped.clone();
    let rt = handle.clone();
    let name = port_name.to_string();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 1024];
        while !stop.load(Ordering::SeqCst) {
            match rx_port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if rt.block_on(bridge_tx.write_all(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    continue
                }
                Err(e) => {
                    info!("Serial read from {} ended: {}", name, e);
                    break;
                }
            }
        }
        stop.store(true, Ordering::SeqCst);
        // Dropping the write half signals EOF to the session.
        drop(bridge_tx);
    });

    // client -> radio
    let stop = stopped;
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 1024];
        loop {
            let n = match handle.block_on(bridge_rx.read(&mut buf)) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Err(e) = tx_port.write_all(&buf[..n]).and_then(|_| tx_port.flush()) {
                debug!("Serial write failed: {}", e);
                break;
            }
        }
        stop.store(true, Ordering::SeqCst);
    });

    Ok(client)
}
