use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::device_identity::{resolve_unique_id, ConfigRecord};
use crate::discovery_listener::{listen_on, ListenError, VALIDATION_TIMEOUT};
use crate::METER_PORT;

/// Failure modes of moving an existing record to a new address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconfigureError {
    /// The re-derived unique ID is already claimed by another record.
    /// Terminal; nothing was committed.
    #[error("another meter with this unique id is already configured")]
    AlreadyConfigured,
    /// Validation failed (no packet, or an unexpected fault). Retryable;
    /// nothing was committed.
    #[error("could not validate the meter at the new address")]
    Unknown,
}

/// Re-validates an existing meter at a new address on the well-known port
/// with the long validation timeout. See [`reconfigure_on`].
pub async fn reconfigure(
    existing: &ConfigRecord,
    new_host: IpAddr,
    records: &[ConfigRecord],
) -> Result<ConfigRecord, ReconfigureError> {
    reconfigure_on(METER_PORT, VALIDATION_TIMEOUT, existing, new_host, records).await
}

/// Produces the updated configuration record for a meter that moved to
/// `new_host`, without committing anything itself.
///
/// The running ingestion session usually still owns the UDP port, so a bind
/// conflict is expected and means "validation skipped, trust the address":
/// the record keeps its existing serial rather than forcing the user to
/// stop the session first. A fresh serial from a successful validation
/// wins; a validation that times out or faults aborts with
/// [`ReconfigureError::Unknown`] and leaves all state untouched.
///
/// `records` is the full set of known configuration records; any record
/// other than `existing` already claiming the re-derived unique ID aborts
/// the flow with [`ReconfigureError::AlreadyConfigured`].
pub async fn reconfigure_on(
    port: u16,
    wait: Duration,
    existing: &ConfigRecord,
    new_host: IpAddr,
    records: &[ConfigRecord],
) -> Result<ConfigRecord, ReconfigureError> {
    let serial = match listen_on(port, Some(new_host), wait).await {
        Ok(Some(found)) => {
            debug!("Validated meter at {new_host} (serial: {:?})", found.serial);
            // Keep the stored serial when the telegram carried none.
            found.serial.or_else(|| existing.serial.clone())
        }
        Err(ListenError::PortBusy(_)) => {
            warn!(
                "UDP port {port} busy during reconfigure, trusting {new_host} without validation"
            );
            existing.serial.clone()
        }
        Ok(None) => {
            error!("No meter responded at {new_host} during reconfigure validation");
            return Err(ReconfigureError::Unknown);
        }
        Err(e) => {
            error!("Unexpected error during reconfigure validation at {new_host}: {e}");
            return Err(ReconfigureError::Unknown);
        }
    };

    let unique_id = resolve_unique_id(serial.as_deref(), new_host);

    let collision = records.iter().any(|other| {
        other.unique_id != existing.unique_id && other.unique_id == unique_id
    });
    if collision {
        return Err(ReconfigureError::AlreadyConfigured);
    }

    Ok(ConfigRecord {
        unique_id,
        host: new_host,
        serial,
    })
}
