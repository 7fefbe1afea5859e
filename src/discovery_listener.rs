use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::device_identity::DiscoveredDevice;
use crate::packet_decoder::{decode_telegram, is_meter_telegram, SERIAL_KEY};
use crate::METER_PORT;

/// Timeout for opportunistic auto-discovery during first setup.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout when validating a user-supplied address. The meter only
/// transmits roughly every 10 seconds, so give it several chances.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(65);

/// Receive buffer sized for the largest possible UDP payload. Real
/// telegrams are a few hundred bytes, but a truncated datagram would land
/// in the decoder as garbage instead of being processed.
pub(crate) const TELEGRAM_BUF_SIZE: usize = 64 * 1024;

/// Failure modes of a bounded listen on the meter port.
///
/// Timing out without an accepted packet is not an error, it is the
/// `Ok(None)` outcome of [`listen_on`]. Callers need to tell "port taken"
/// apart from "no device found" because they react differently.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("UDP port {0} is already in use")]
    PortBusy(u16),
    #[error("UDP listener failed: {0}")]
    Unexpected(#[from] io::Error),
}

/// Binds a broadcast-capable UDP socket on all interfaces.
///
/// A bind conflict is reported as [`ListenError::PortBusy`] so callers can
/// branch on it; everything else surfaces as [`ListenError::Unexpected`].
pub(crate) async fn bind_meter_socket(port: u16) -> Result<UdpSocket, ListenError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                ListenError::PortBusy(port)
            } else {
                ListenError::Unexpected(e)
            }
        })?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Listens for the first meter-like telegram on the well-known port.
///
/// See [`listen_on`]; this is the production entry point on [`METER_PORT`].
pub async fn listen_for_device(
    host_filter: Option<IpAddr>,
    wait: Duration,
) -> Result<Option<DiscoveredDevice>, ListenError> {
    listen_on(METER_PORT, host_filter, wait).await
}

/// Listens on `port` until a meter-like telegram arrives or `wait` elapses.
///
/// With `host_filter` set, packets from any other source are ignored
/// (validation of a user-supplied address); without it the first meter-like
/// packet from anywhere wins (auto-discovery). Packets that fail to decode
/// or don't pass the meter heuristic are skipped. The socket is released on
/// every exit path before this returns.
pub async fn listen_on(
    port: u16,
    host_filter: Option<IpAddr>,
    wait: Duration,
) -> Result<Option<DiscoveredDevice>, ListenError> {
    let socket = bind_meter_socket(port).await?;
    debug!("Discovery listener started on port {port} (filter: {host_filter:?})");

    let result = match timeout(wait, wait_for_telegram(&socket, host_filter)).await {
        Ok(found) => found.map(Some),
        Err(_elapsed) => {
            debug!("Discovery listener on port {port} timed out after {wait:?}");
            Ok(None)
        }
    };

    // Socket is dropped here, releasing the port for whoever needs it next.
    drop(socket);
    result
}

/// Receives datagrams until one passes the filter and the meter heuristic.
async fn wait_for_telegram(
    socket: &UdpSocket,
    host_filter: Option<IpAddr>,
) -> Result<DiscoveredDevice, ListenError> {
    let mut buf = vec![0u8; TELEGRAM_BUF_SIZE];

    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        let source = addr.ip();

        if let Some(filter) = host_filter {
            if source != filter {
                debug!("Ignoring packet from {source}, waiting for {filter}");
                continue;
            }
        }

        let Some(fields) = decode_telegram(&buf[..len], source) else {
            continue;
        };
        if !is_meter_telegram(&fields) {
            debug!("Ignoring non-meter packet from {source}");
            continue;
        }

        let serial = fields
            .get(SERIAL_KEY)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);

        debug!("Discovered meter at {source} (serial: {serial:?})");
        return Ok(DiscoveredDevice {
            host: source,
            serial,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{free_udp_port, spawn_repeating_sender};

    #[tokio::test]
    async fn test_discovery_resolves_on_meter_telegram() {
        let port = free_udp_port();
        let sender = spawn_repeating_sender(port, br#"{"power_delivered": 1.2, "serial": "E123"}"#);

        let found = listen_on(port, None, Duration::from_secs(5))
            .await
            .expect("listen should not fail")
            .expect("meter telegram should resolve discovery");

        assert_eq!(found.host, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(found.serial.as_deref(), Some("E123"));
        sender.abort();
    }

    #[tokio::test]
    async fn test_discovery_times_out_without_packets() {
        let port = free_udp_port();

        let found = listen_on(port, None, Duration::from_millis(200))
            .await
            .expect("listen should not fail");
        assert!(found.is_none());

        // The port must be free again after the timeout.
        let rebind = bind_meter_socket(port).await;
        assert!(rebind.is_ok(), "socket should be released on timeout");
    }

    #[tokio::test]
    async fn test_discovery_ignores_filtered_sources() {
        let port = free_udp_port();
        // Sender is 127.0.0.1, filter demands a different host.
        let sender = spawn_repeating_sender(port, br#"{"power_delivered": 1.2, "serial": "E123"}"#);
        let filter: IpAddr = "10.99.99.99".parse().unwrap();

        let found = listen_on(port, Some(filter), Duration::from_millis(400))
            .await
            .expect("listen should not fail");

        assert!(found.is_none(), "filtered-out packets must not resolve");
        sender.abort();
    }

    #[tokio::test]
    async fn test_discovery_ignores_noise_packets() {
        let port = free_udp_port();
        let sender = spawn_repeating_sender(port, br#"{"voltage_l1": 231.0}"#);

        let found = listen_on(port, None, Duration::from_millis(400))
            .await
            .expect("listen should not fail");

        assert!(found.is_none(), "non-meter packets must not resolve");
        sender.abort();
    }

    #[tokio::test]
    async fn test_busy_port_is_distinguished_from_not_found() {
        let port = free_udp_port();
        // Hold the port for the duration of the test.
        let _holder = bind_meter_socket(port).await.expect("bind holder socket");

        let result = listen_on(port, None, Duration::from_millis(200)).await;
        assert!(
            matches!(result, Err(ListenError::PortBusy(p)) if p == port),
            "expected PortBusy, got {result:?}"
        );
    }
}
