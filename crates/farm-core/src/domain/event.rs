//! Typed device lifecycle events.
//!
//! Hardware watchers and the HTTP front-end translate raw signals into
//! [`DeviceEvent`] values.  Each event is consumed exactly once by the device
//! event loop, which applies them strictly in arrival order.

use std::fmt;

/// USB interface class announced by the screen-mirroring interface.
pub const MIRROR_INTERFACE_CLASS: u8 = 0xff;

/// USB interface subclass announced by the screen-mirroring interface.
pub const MIRROR_INTERFACE_SUBCLASS: u8 = 0x2a;

/// A hardware signal about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device was attached.
    Connect { uuid: String },
    /// A device was detached.
    Disconnect { uuid: String },
    /// A USB interface was discovered on an attached device.
    InterfaceAdded { uuid: String, class: u8, subclass: u8 },
    /// The device's screen geometry was negotiated.
    FrameConfigured {
        uuid: String,
        width: u32,
        height: u32,
        click_scale: u32,
    },
}

impl DeviceEvent {
    /// Returns the uuid the event refers to.
    pub fn uuid(&self) -> &str {
        match self {
            DeviceEvent::Connect { uuid }
            | DeviceEvent::Disconnect { uuid }
            | DeviceEvent::InterfaceAdded { uuid, .. }
            | DeviceEvent::FrameConfigured { uuid, .. } => uuid,
        }
    }

    /// Short, stable name of the event kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::Connect { .. } => "connect",
            DeviceEvent::Disconnect { .. } => "disconnect",
            DeviceEvent::InterfaceAdded { .. } => "interface_added",
            DeviceEvent::FrameConfigured { .. } => "frame_configured",
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::InterfaceAdded {
                uuid,
                class,
                subclass,
            } => write!(f, "interface_added({uuid}, {class:02x}/{subclass:02x})"),
            DeviceEvent::FrameConfigured {
                uuid,
                width,
                height,
                click_scale,
            } => write!(f, "frame_configured({uuid}, {width}x{height}@{click_scale})"),
            other => write!(f, "{}({})", other.kind(), other.uuid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_accessor_covers_every_variant() {
        let events = [
            DeviceEvent::Connect { uuid: "a".into() },
            DeviceEvent::Disconnect { uuid: "a".into() },
            DeviceEvent::InterfaceAdded {
                uuid: "a".into(),
                class: 1,
                subclass: 1,
            },
            DeviceEvent::FrameConfigured {
                uuid: "a".into(),
                width: 1,
                height: 1,
                click_scale: 1,
            },
        ];
        assert!(events.iter().all(|e| e.uuid() == "a"));
    }

    #[test]
    fn test_display_includes_interface_signature_in_hex() {
        let event = DeviceEvent::InterfaceAdded {
            uuid: "dev".into(),
            class: 0xff,
            subclass: 0x2a,
        };
        assert_eq!(event.to_string(), "interface_added(dev, ff/2a)");
        assert_eq!(
            DeviceEvent::Disconnect { uuid: "dev".into() }.to_string(),
            "disconnect(dev)"
        );
    }
}
