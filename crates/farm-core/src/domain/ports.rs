//! Per-device port assignment.
//!
//! Each worker port has its own contiguous range, one port per device slot:
//!
//! ```text
//! slot      0      1      2     ...  max_devices-1
//! vnc     5901   5902   5903
//! video   8200   8201   8202
//! wda     8300   8301   8302
//! bridge  9240   9241   9242
//! ```
//!
//! A connected device occupies one slot and receives the port at that offset
//! in every range.  Because the ranges are validated to be pairwise disjoint
//! and free of reserved ports when the allocator is built, two devices in
//! different slots can never share a port.  Releasing a device frees its slot
//! and the lowest free slot is always handed out first.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::device::PortSet;

/// Error type for port allocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    /// Every slot is taken.
    #[error("all {capacity} device port slots are in use")]
    Exhausted { capacity: u16 },

    /// A range would run past port 65535.
    #[error("{purpose} port range starting at {base} does not fit below 65536")]
    OutOfBounds { purpose: &'static str, base: u16 },

    /// Two per-purpose ranges share at least one port.
    #[error("{first} and {second} port ranges overlap")]
    Overlap {
        first: &'static str,
        second: &'static str,
    },

    /// A reserved port falls inside a per-purpose range.
    #[error("reserved port {port} falls inside the {purpose} range")]
    Reserved { port: u16, purpose: &'static str },
}

/// Base ports and slot count for the per-purpose ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRanges {
    pub vnc_base: u16,
    pub video_base: u16,
    pub wda_base: u16,
    pub bridge_base: u16,
    /// Number of devices that can be connected at the same time.
    pub max_devices: u16,
}

impl Default for PortRanges {
    fn default() -> Self {
        Self {
            vnc_base: 5901,
            video_base: 8200,
            wda_base: 8300,
            bridge_base: 9240,
            max_devices: 32,
        }
    }
}

impl PortRanges {
    fn named(&self) -> [(&'static str, u16); 4] {
        [
            ("vnc", self.vnc_base),
            ("video", self.video_base),
            ("wda", self.wda_base),
            ("bridge", self.bridge_base),
        ]
    }

    fn span(&self, base: u16) -> RangeInclusive<u32> {
        let start = u32::from(base);
        start..=start + u32::from(self.max_devices.max(1)) - 1
    }

    fn ports_for_slot(&self, slot: u16) -> PortSet {
        PortSet {
            vnc_port: self.vnc_base + slot,
            video_port: self.video_base + slot,
            wda_port: self.wda_base + slot,
            bridge_port: self.bridge_base + slot,
        }
    }
}

/// Hands out disjoint [`PortSet`]s to connected devices.
///
/// Owned exclusively by the device event loop, so no locking is needed.
#[derive(Debug)]
pub struct PortAllocator {
    ranges: PortRanges,
    /// `slots[i]` holds the uuid occupying slot `i`.
    slots: Vec<Option<String>>,
    by_device: HashMap<String, u16>,
}

impl PortAllocator {
    /// Builds an allocator after validating the ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::OutOfBounds`] if a range runs past 65535,
    /// [`PortError::Overlap`] if two ranges intersect, and
    /// [`PortError::Reserved`] if any of `reserved` falls inside a range.
    pub fn new(ranges: PortRanges, reserved: &[u16]) -> Result<Self, PortError> {
        let named = ranges.named();

        for (purpose, base) in named {
            if *ranges.span(base).end() > u32::from(u16::MAX) {
                return Err(PortError::OutOfBounds { purpose, base });
            }
        }

        for (i, &(first, a)) in named.iter().enumerate() {
            for &(second, b) in &named[i + 1..] {
                let (ra, rb) = (ranges.span(a), ranges.span(b));
                if ra.start() <= rb.end() && rb.start() <= ra.end() {
                    return Err(PortError::Overlap { first, second });
                }
            }
        }

        for &port in reserved {
            if let Some(&(purpose, _)) = named
                .iter()
                .find(|(_, base)| ranges.span(*base).contains(&u32::from(port)))
            {
                return Err(PortError::Reserved { port, purpose });
            }
        }

        Ok(Self {
            ranges,
            slots: vec![None; usize::from(ranges.max_devices)],
            by_device: HashMap::new(),
        })
    }

    /// Assigns a port set to `uuid`.
    ///
    /// Allocating for a uuid that already holds a slot returns the same set.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Exhausted`] when every slot is taken.
    pub fn allocate(&mut self, uuid: &str) -> Result<PortSet, PortError> {
        if let Some(&slot) = self.by_device.get(uuid) {
            return Ok(self.ranges.ports_for_slot(slot));
        }

        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PortError::Exhausted {
                capacity: self.ranges.max_devices,
            })?;
        // `slots` has at most `max_devices` (a u16) entries.
        let slot = free as u16;

        self.slots[free] = Some(uuid.to_string());
        self.by_device.insert(uuid.to_string(), slot);

        let ports = self.ranges.ports_for_slot(slot);
        debug!(uuid, slot, ?ports, "allocated device ports");
        Ok(ports)
    }

    /// Frees the slot held by `uuid`, returning the ports it owned.
    pub fn release(&mut self, uuid: &str) -> Option<PortSet> {
        let slot = self.by_device.remove(uuid)?;
        self.slots[usize::from(slot)] = None;
        let ports = self.ranges.ports_for_slot(slot);
        debug!(uuid, slot, ?ports, "released device ports");
        Some(ports)
    }

    /// Returns the ports currently held by `uuid`.
    pub fn get(&self, uuid: &str) -> Option<PortSet> {
        self.by_device
            .get(uuid)
            .map(|&slot| self.ranges.ports_for_slot(slot))
    }

    /// Number of devices currently holding ports.
    pub fn allocated_count(&self) -> usize {
        self.by_device.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_ranges() -> PortRanges {
        PortRanges {
            vnc_base: 5900,
            video_base: 6000,
            wda_base: 6100,
            bridge_base: 6200,
            max_devices: 3,
        }
    }

    #[test]
    fn test_default_ranges_are_valid() {
        assert!(PortAllocator::new(PortRanges::default(), &[8027]).is_ok());
    }

    #[test]
    fn test_allocate_gives_disjoint_sets_to_different_devices() {
        let mut alloc = PortAllocator::new(small_ranges(), &[]).unwrap();

        let a = alloc.allocate("dev-a").unwrap();
        let b = alloc.allocate("dev-b").unwrap();

        let ports_a: HashSet<u16> = a.ports().into_iter().collect();
        let ports_b: HashSet<u16> = b.ports().into_iter().collect();
        assert!(ports_a.is_disjoint(&ports_b));
        assert_eq!(ports_a.len(), 4, "a device's own ports must be distinct");
    }

    #[test]
    fn test_allocate_twice_for_same_device_returns_same_set() {
        let mut alloc = PortAllocator::new(small_ranges(), &[]).unwrap();

        let first = alloc.allocate("dev-a").unwrap();
        let second = alloc.allocate("dev-a").unwrap();

        assert_eq!(first, second);
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn test_release_makes_ports_available_for_next_device() {
        let mut alloc = PortAllocator::new(small_ranges(), &[]).unwrap();
        let a = alloc.allocate("dev-a").unwrap();
        alloc.allocate("dev-b").unwrap();

        assert_eq!(alloc.release("dev-a"), Some(a));
        let c = alloc.allocate("dev-c").unwrap();

        assert_eq!(c, a, "lowest free slot must be reused");
        assert_eq!(alloc.get("dev-a"), None);
    }

    #[test]
    fn test_release_unknown_device_returns_none() {
        let mut alloc = PortAllocator::new(small_ranges(), &[]).unwrap();
        assert_eq!(alloc.release("ghost"), None);
    }

    #[test]
    fn test_allocate_fails_when_all_slots_taken() {
        let mut alloc = PortAllocator::new(small_ranges(), &[]).unwrap();
        for uuid in ["a", "b", "c"] {
            alloc.allocate(uuid).unwrap();
        }
        assert_eq!(
            alloc.allocate("d"),
            Err(PortError::Exhausted { capacity: 3 })
        );
    }

    #[test]
    fn test_new_rejects_overlapping_ranges() {
        let ranges = PortRanges {
            video_base: 5902,
            ..small_ranges()
        };
        assert_eq!(
            PortAllocator::new(ranges, &[]).unwrap_err(),
            PortError::Overlap {
                first: "vnc",
                second: "video"
            }
        );
    }

    #[test]
    fn test_new_rejects_reserved_port_inside_range() {
        let err = PortAllocator::new(small_ranges(), &[6101]).unwrap_err();
        assert_eq!(
            err,
            PortError::Reserved {
                port: 6101,
                purpose: "wda"
            }
        );
    }

    #[test]
    fn test_new_accepts_reserved_port_outside_ranges() {
        assert!(PortAllocator::new(small_ranges(), &[6003, 7000]).is_ok());
    }

    #[test]
    fn test_new_rejects_range_past_u16_max() {
        let ranges = PortRanges {
            bridge_base: 65534,
            ..small_ranges()
        };
        assert!(matches!(
            PortAllocator::new(ranges, &[]),
            Err(PortError::OutOfBounds {
                purpose: "bridge",
                ..
            })
        ));
    }

    #[test]
    fn test_every_slot_is_disjoint_from_every_other_slot() {
        let mut alloc = PortAllocator::new(PortRanges::default(), &[]).unwrap();
        let mut seen = HashSet::new();
        for i in 0..PortRanges::default().max_devices {
            let set = alloc.allocate(&format!("dev-{i}")).unwrap();
            for port in set.ports() {
                assert!(seen.insert(port), "port {port} handed out twice");
            }
        }
    }
}
