//! JSON trigger bodies and their translation into device events.
//!
//! | Trigger             | Body                                              | Event             |
//! |---------------------|---------------------------------------------------|-------------------|
//! | connect             | form field `uuid`                                 | `Connect`         |
//! | disconnect          | form field `uuid`                                 | `Disconnect`      |
//! | new interface       | `{uuid, class, subclass, vendor, product}`        | `InterfaceAdded`  |
//! | frame               | `{type: "frame1", width, height, clickScale, uuid}` | `FrameConfigured` |
//!
//! Every uuid goes through [`fix_uuid`].  Interface bodies that do not carry
//! the mirror signature and frame bodies of any other `type` translate to
//! `None`: they are valid input that simply does not concern the coordinator.

use serde::Deserialize;
use thiserror::Error;

use crate::domain::device::fix_uuid;
use crate::domain::event::{DeviceEvent, MIRROR_INTERFACE_CLASS, MIRROR_INTERFACE_SUBCLASS};

/// Interface class of the mirror signature, as the watcher formats it (`%02x`).
pub const MIRROR_CLASS_HEX: &str = "ff";

/// Interface subclass of the mirror signature.
pub const MIRROR_SUBCLASS_HEX: &str = "2a";

/// The only frame message type the coordinator acts on.
pub const FRAME_MESSAGE_TYPE: &str = "frame1";

/// Error type for malformed trigger input.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The body is not valid JSON or does not match the expected shape.
    #[error("malformed trigger body: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Builds a `Connect` event from a raw `uuid` form value.
///
/// # Errors
///
/// Returns [`TriggerError::MissingField`] when the value is empty.
pub fn connect_event(raw_uuid: &str) -> Result<DeviceEvent, TriggerError> {
    Ok(DeviceEvent::Connect {
        uuid: required_uuid(raw_uuid)?,
    })
}

/// Builds a `Disconnect` event from a raw `uuid` form value.
///
/// # Errors
///
/// Returns [`TriggerError::MissingField`] when the value is empty.
pub fn disconnect_event(raw_uuid: &str) -> Result<DeviceEvent, TriggerError> {
    Ok(DeviceEvent::Disconnect {
        uuid: required_uuid(raw_uuid)?,
    })
}

fn required_uuid(raw: &str) -> Result<String, TriggerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TriggerError::MissingField("uuid"));
    }
    Ok(fix_uuid(trimmed))
}

/// USB interface descriptor posted when a new interface appears.
///
/// `class` and `subclass` are two-digit lowercase hex strings, e.g. `"ff"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    #[serde(rename = "uuid")]
    pub serial: String,
    pub class: String,
    pub subclass: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub product: String,
}

impl InterfaceDescriptor {
    /// Parses a descriptor from a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Json`] for malformed JSON or missing fields.
    pub fn parse(body: &[u8]) -> Result<Self, TriggerError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Translates the descriptor into an `InterfaceAdded` event.
    ///
    /// Only the exact mirror signature (`"ff"`/`"2a"`) is forwarded; any
    /// other pair of strings yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::MissingField`] if the uuid of a mirror
    /// interface is empty.
    pub fn into_event(self) -> Result<Option<DeviceEvent>, TriggerError> {
        if self.class != MIRROR_CLASS_HEX || self.subclass != MIRROR_SUBCLASS_HEX {
            return Ok(None);
        }
        Ok(Some(DeviceEvent::InterfaceAdded {
            uuid: required_uuid(&self.serial)?,
            class: MIRROR_INTERFACE_CLASS,
            subclass: MIRROR_INTERFACE_SUBCLASS,
        }))
    }
}

/// Screen geometry message posted by the mirror once it sees the first frame.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FrameMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(rename = "clickScale", default)]
    pub click_scale: Option<u32>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl FrameMessage {
    /// Parses a frame message from a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Json`] for malformed JSON or a missing `type`.
    pub fn parse(body: &[u8]) -> Result<Self, TriggerError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Translates a `frame1` message into a `FrameConfigured` event.
    ///
    /// Messages of any other type yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::MissingField`] if a `frame1` message lacks
    /// `uuid`, `width`, `height` or `clickScale`.
    pub fn into_event(self) -> Result<Option<DeviceEvent>, TriggerError> {
        if self.kind != FRAME_MESSAGE_TYPE {
            return Ok(None);
        }
        let uuid = required_uuid(self.uuid.as_deref().unwrap_or_default())?;
        Ok(Some(DeviceEvent::FrameConfigured {
            uuid,
            width: self.width.ok_or(TriggerError::MissingField("width"))?,
            height: self.height.ok_or(TriggerError::MissingField("height"))?,
            click_scale: self
                .click_scale
                .ok_or(TriggerError::MissingField("clickScale"))?,
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
