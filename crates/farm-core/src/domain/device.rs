//! Device identity, port sets and frame geometry.
//!
//! A device is keyed by the uuid reported by the hardware watcher.  Some
//! watchers report the 24-character serial of newer devices without the
//! separator that every other tool expects, so every uuid entering the
//! coordinator passes through [`fix_uuid`] first.

use serde::{Deserialize, Serialize};

/// Length of a separator-less serial that needs fixing up.
const BARE_SERIAL_LEN: usize = 24;

/// Position at which the separator is inserted into a bare serial.
const SEPARATOR_POS: usize = 8;

/// Normalises a device uuid.
///
/// A 24-character input without a `-` gets a separator inserted after the
/// 8th character.  Anything else is returned unchanged, which makes the
/// function idempotent.
///
/// ```rust
/// use farm_core::fix_uuid;
///
/// assert_eq!(fix_uuid("abcdefabcdefabcdefabcdef"), "abcdefab-cdefabcdefabcdef");
/// assert_eq!(fix_uuid("abcdefab-cdefabcdefabcdef"), "abcdefab-cdefabcdefabcdef");
/// ```
pub fn fix_uuid(uuid: &str) -> String {
    if uuid.len() == BARE_SERIAL_LEN && !uuid.contains('-') && uuid.is_char_boundary(SEPARATOR_POS)
    {
        let (head, tail) = uuid.split_at(SEPARATOR_POS);
        format!("{head}-{tail}")
    } else {
        uuid.to_string()
    }
}

/// The ports assigned to one connected device.
///
/// Each field comes from its own per-purpose range, see
/// [`PortRanges`](crate::domain::ports::PortRanges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSet {
    /// VNC server exposed by the control bridge.
    pub vnc_port: u16,
    /// Video frame stream served by the mirror.
    pub video_port: u16,
    /// Automation agent forwarded from the device.
    pub wda_port: u16,
    /// Debug/inspect port of the control bridge.
    pub bridge_port: u16,
}

impl PortSet {
    /// Returns the four ports as an array, handy for disjointness checks.
    pub fn ports(&self) -> [u16; 4] {
        [self.vnc_port, self.video_port, self.wda_port, self.bridge_port]
    }
}

/// Screen and touch geometry negotiated with the device.
///
/// The stream is sized to the raw frame; touch coordinates are expressed in
/// points, i.e. the frame size divided by the click scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub stream_width: u32,
    pub stream_height: u32,
    pub click_width: u32,
    pub click_height: u32,
    pub click_scale: u32,
}

impl FrameGeometry {
    /// Derives the full geometry from a `frame1` message.
    ///
    /// A click scale of zero is treated as one.
    pub fn from_frame(width: u32, height: u32, click_scale: u32) -> Self {
        let scale = click_scale.max(1);
        Self {
            stream_width: width,
            stream_height: height,
            click_width: width / scale,
            click_height: height / scale,
            click_scale: scale,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
