//! P1 Meter UDP Ingestion Library
//!
//! This library ingests broadcast telemetry from a P1 energy-meter dongle
//! over UDP: it discovers a meter by sniffing the well-known port, validates
//! a manually supplied address under a stricter filter, and runs a
//! long-lived per-device session that merges incremental JSON telegrams
//! into a coherent latest-value snapshot for a host application.

pub mod device_identity;
pub mod discovery_listener;
pub mod ingestion_session;
pub mod packet_decoder;
pub mod reconfigure;
pub mod sensor_fields;
pub mod setup_flow;

// Re-export commonly used types for easier access
pub use device_identity::{resolve_unique_id, ConfigRecord, DeviceIdentity, DiscoveredDevice};
pub use discovery_listener::{
    listen_for_device, ListenError, DISCOVERY_TIMEOUT, VALIDATION_TIMEOUT,
};
pub use ingestion_session::{IngestionSession, SessionHandle, Subscriber, TelemetrySnapshot};
pub use reconfigure::{reconfigure, ReconfigureError};
pub use sensor_fields::{field_descriptor, FieldDescriptor, SENSOR_FIELDS};
pub use setup_flow::{auto_discover, create_record, validate_host, SetupError};

/// Well-known UDP port the meter broadcasts on.
pub const METER_PORT: u16 = 16121;
