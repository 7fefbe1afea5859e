use std::net::IpAddr;

use serde_json::{Map, Value};
use tracing::debug;

/// JSON key carrying the meter's serial number.
pub const SERIAL_KEY: &str = "serial";
/// JSON key carrying the meter's model name.
pub const MODEL_KEY: &str = "model";
/// JSON keys carrying the firmware version. Both spellings have been seen
/// on the wire depending on dongle firmware.
pub const SW_VERSION_KEYS: [&str; 2] = ["swVersion", "sw_version"];

/// JSON key carrying the live power reading, used by the discovery heuristic.
const POWER_DELIVERED_KEY: &str = "power_delivered";

/// Decodes one UDP telegram into a flat JSON object.
///
/// The meter broadcasts on a shared port, so anything that is not valid
/// UTF-8 JSON or not a JSON object is dropped without ceremony: one corrupt
/// packet must never take the listener down. Drops are logged at debug
/// level only.
pub fn decode_telegram(payload: &[u8], source: IpAddr) -> Option<Map<String, Value>> {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            debug!("Dropping undecodable UDP packet from {source}: {e}");
            return None;
        }
    };

    match value {
        Value::Object(fields) => Some(fields),
        other => {
            debug!(
                "Dropping non-object UDP payload from {source}: {}",
                json_type_name(&other)
            );
            None
        }
    }
}

/// Returns true if a decoded telegram looks like P1 meter data.
///
/// The well-known port is a shared broadcast medium, so discovery needs a
/// cheap filter to ignore unrelated chatter. Full telegrams always carry a
/// serial, partial real-time telegrams always carry `power_delivered`.
pub fn is_meter_telegram(fields: &Map<String, Value>) -> bool {
    fields.contains_key(POWER_DELIVERED_KEY) || fields.contains_key(SERIAL_KEY)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
