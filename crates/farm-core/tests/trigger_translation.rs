//! Integration tests for the trigger-to-event translation pipeline.
//!
//! These tests drive the public `farm_core` API the same way the HTTP
//! front-end does: raw request bodies in, [`DeviceEvent`]s (or nothing) out.
//!
//! ```text
//! POST /new_interface {json}  ──► InterfaceDescriptor::parse ──► into_event
//! POST /frame {json}          ──► FrameMessage::parse        ──► into_event
//! GET  /dev_connect?uuid=...  ──► connect_event
//! ```

use farm_core::{
    connect_event, disconnect_event, fix_uuid, DeviceEvent, FrameGeometry, FrameMessage,
    InterfaceDescriptor,
};

// ── Uuid normalisation across triggers ───────────────────────────────────────

/// The same bare serial arriving through different triggers must map to the
/// same normalised uuid, otherwise the event loop would treat them as
/// different devices.
#[test]
fn test_all_triggers_normalise_uuid_identically() {
    let bare = "abcdefabcdefabcdefabcdef";
    let expected = "abcdefab-cdefabcdefabcdef";

    let connect = connect_event(bare).unwrap();
    let disconnect = disconnect_event(bare).unwrap();
    let iface = InterfaceDescriptor::parse(
        format!(r#"{{"uuid":"{bare}","class":"ff","subclass":"2a"}}"#).as_bytes(),
    )
    .unwrap()
    .into_event()
    .unwrap()
    .expect("mirror interface must be forwarded");
    let frame = FrameMessage::parse(
        format!(r#"{{"type":"frame1","width":750,"height":1334,"clickScale":2,"uuid":"{bare}"}}"#)
            .as_bytes(),
    )
    .unwrap()
    .into_event()
    .unwrap()
    .expect("frame1 must be forwarded");

    for event in [&connect, &disconnect, &iface, &frame] {
        assert_eq!(event.uuid(), expected, "{event}");
    }
}

#[test]
fn test_separated_uuid_passes_through_every_trigger() {
    let uuid = "00008030-001A2D0C3C02802E";
    assert_eq!(connect_event(uuid).unwrap().uuid(), uuid);
    assert_eq!(fix_uuid(uuid), uuid);
}

// ── Interface filtering ──────────────────────────────────────────────────────

#[test]
fn test_interface_signature_must_match_exactly() {
    for (class, subclass) in [("FF", "2A"), (" ff", "2a"), ("0ff", "2a"), ("ff", "2a ")] {
        let body = format!(r#"{{"uuid":"dev","class":"{class}","subclass":"{subclass}"}}"#);
        let event = InterfaceDescriptor::parse(body.as_bytes())
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(event, None, "{class:?}/{subclass:?}");
    }
}

#[test]
fn test_only_mirror_signature_produces_events() {
    let cases = [
        ("ff", "2a", true),
        ("ff", "fe", false),
        ("01", "01", false),
        ("08", "06", false),
        ("zz", "2a", false),
    ];
    for (class, subclass, forwarded) in cases {
        let body = format!(r#"{{"uuid":"dev","class":"{class}","subclass":"{subclass}"}}"#);
        let event = InterfaceDescriptor::parse(body.as_bytes())
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(event.is_some(), forwarded, "{class}/{subclass}");
    }
}

// ── Frame geometry ───────────────────────────────────────────────────────────

#[test]
fn test_frame_event_carries_values_for_geometry_derivation() {
    let body = br#"{"type":"frame1","width":1170,"height":2532,"clickScale":3,"uuid":"dev"}"#;
    let event = FrameMessage::parse(body).unwrap().into_event().unwrap();

    let Some(DeviceEvent::FrameConfigured {
        width,
        height,
        click_scale,
        ..
    }) = event
    else {
        panic!("expected FrameConfigured, got {event:?}");
    };

    let geometry = FrameGeometry::from_frame(width, height, click_scale);
    assert_eq!((geometry.click_width, geometry.click_height), (390, 844));
}
