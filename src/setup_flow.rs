use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::device_identity::{resolve_unique_id, ConfigRecord, DiscoveredDevice};
use crate::discovery_listener::{listen_on, ListenError, DISCOVERY_TIMEOUT, VALIDATION_TIMEOUT};
use crate::METER_PORT;

/// Failure modes of the first-setup flow, in host-facing terms.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    /// No meter answered at the given address within the validation window.
    /// The host should re-show its input form with an inline error.
    #[error("no meter responded at the given address")]
    CannotConnect,
    /// Something unrelated to the meter went wrong mid-listen. Retryable.
    #[error("unexpected error while listening for the meter")]
    Unknown,
    /// A record with the same unique ID already exists. Terminal.
    #[error("a meter with this unique id is already configured")]
    AlreadyConfigured,
}

/// Opportunistic auto-discovery on the well-known port with the short
/// timeout. See [`auto_discover_on`].
pub async fn auto_discover() -> Option<DiscoveredDevice> {
    auto_discover_on(METER_PORT).await
}

/// Listens briefly for any meter on the network, before asking the user to
/// type an address.
///
/// Best effort only: a busy port (a session is already listening) or any
/// other fault just means "nothing discovered" and the flow falls back to
/// manual entry.
pub async fn auto_discover_on(port: u16) -> Option<DiscoveredDevice> {
    match listen_on(port, None, DISCOVERY_TIMEOUT).await {
        Ok(found) => found,
        Err(ListenError::PortBusy(_)) => {
            debug!("Auto-discovery skipped, port {port} already in use");
            None
        }
        Err(e) => {
            debug!("Auto-discovery failed: {e}");
            None
        }
    }
}

/// Validates a user-supplied address with the long timeout on the
/// well-known port. See [`validate_host_on`].
pub async fn validate_host(host: IpAddr) -> Result<DiscoveredDevice, SetupError> {
    validate_host_on(METER_PORT, host, VALIDATION_TIMEOUT).await
}

/// Confirms a meter actually transmits from `host` by listening for one
/// accepted telegram from exactly that address.
///
/// During first setup nothing else should hold the port, so a bind
/// conflict is reported like a missing device: the user-visible advice is
/// the same ("cannot connect, try again").
pub async fn validate_host_on(
    port: u16,
    host: IpAddr,
    wait: Duration,
) -> Result<DiscoveredDevice, SetupError> {
    match listen_on(port, Some(host), wait).await {
        Ok(Some(found)) => Ok(found),
        Ok(None) => Err(SetupError::CannotConnect),
        Err(ListenError::PortBusy(_)) => Err(SetupError::CannotConnect),
        Err(e) => {
            error!("Unexpected error validating meter at {host}: {e}");
            Err(SetupError::Unknown)
        }
    }
}

/// Builds the configuration record for a validated or discovered meter,
/// refusing a unique ID that some existing record already claims.
pub fn create_record(
    host: IpAddr,
    serial: Option<String>,
    existing: &[ConfigRecord],
) -> Result<ConfigRecord, SetupError> {
    let unique_id = resolve_unique_id(serial.as_deref(), host);

    if existing.iter().any(|record| record.unique_id == unique_id) {
        return Err(SetupError::AlreadyConfigured);
    }

    Ok(ConfigRecord {
        unique_id,
        host,
        serial,
    })
}
