//! Static presentation metadata for the telemetry keys the meter is known
//! to broadcast.
//!
//! This table is passthrough data for the host's sensor layer: the core
//! merges telegram keys opaquely and never branches on anything in here.
//! Unknown keys still flow through the snapshot, they just have no
//! descriptor.

/// Presentation metadata for one telemetry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    /// True for fields present in the frequent real-time telegrams, false
    /// for the periodic cumulative totals.
    pub realtime: bool,
}

/// Known telemetry fields, as observed from dongle firmware.
pub const SENSOR_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        key: "power_delivered",
        unit: Some("kW"),
        device_class: Some("power"),
        state_class: Some("measurement"),
        realtime: true,
    },
    FieldDescriptor {
        key: "power_returned",
        unit: Some("kW"),
        device_class: Some("power"),
        state_class: Some("measurement"),
        realtime: true,
    },
    FieldDescriptor {
        key: "voltage_l1",
        unit: Some("V"),
        device_class: Some("voltage"),
        state_class: Some("measurement"),
        realtime: true,
    },
    FieldDescriptor {
        key: "current_l1",
        unit: Some("A"),
        device_class: Some("current"),
        state_class: Some("measurement"),
        realtime: true,
    },
    FieldDescriptor {
        key: "energy_delivered_tariff1",
        unit: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        realtime: false,
    },
    FieldDescriptor {
        key: "energy_delivered_tariff2",
        unit: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        realtime: false,
    },
    FieldDescriptor {
        key: "energy_returned_tariff1",
        unit: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        realtime: false,
    },
    FieldDescriptor {
        key: "energy_returned_tariff2",
        unit: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        realtime: false,
    },
    FieldDescriptor {
        key: "gas_delivered",
        unit: Some("m³"),
        device_class: Some("gas"),
        state_class: Some("total_increasing"),
        realtime: false,
    },
    FieldDescriptor {
        key: "wifi_rssi",
        unit: Some("dBm"),
        device_class: Some("signal_strength"),
        state_class: Some("measurement"),
        realtime: false,
    },
];

/// Looks up the descriptor for a telemetry key, if it is a known one.
pub fn field_descriptor(key: &str) -> Option<&'static FieldDescriptor> {
    SENSOR_FIELDS.iter().find(|field| field.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_field_lookup() {
        let field = field_descriptor("power_delivered").expect("power_delivered is known");
        assert_eq!(field.unit, Some("kW"));
        assert!(field.realtime);

        let field = field_descriptor("gas_delivered").expect("gas_delivered is known");
        assert_eq!(field.state_class, Some("total_increasing"));
        assert!(!field.realtime);
    }

    #[test]
    fn test_unknown_and_identity_keys_have_no_descriptor() {
        assert!(field_descriptor("serial").is_none());
        assert!(field_descriptor("model").is_none());
        assert!(field_descriptor("made_up_key").is_none());
    }

    #[test]
    fn test_keys_are_unique() {
        for (i, field) in SENSOR_FIELDS.iter().enumerate() {
            assert!(
                SENSOR_FIELDS[i + 1..].iter().all(|f| f.key != field.key),
                "duplicate descriptor for {}",
                field.key
            );
        }
    }
}
