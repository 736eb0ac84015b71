//! Output-line predicates applied before worker output is logged.
//!
//! Every line a supervised process prints on stdout or stderr is passed to
//! its [`LineFilter`].  Retained lines go to the structured log and the log
//! tracker; dropped lines vanish.  Filters may also react to a line (the
//! ownership watcher turns a device unit's milestones into log events)
//! without dropping it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

/// Decides whether an output line is retained.
#[cfg_attr(test, mockall::automock)]
pub trait LineFilter: Send + Sync {
    /// Returns `true` to keep the line.
    fn should_retain(&self, line: &str) -> bool;
}

/// Drops every line containing any of the configured substrings.
///
/// Used to silence heartbeat spam from noisy workers.
#[derive(Debug, Clone, Default)]
pub struct DropContaining {
    needles: Vec<String>,
}

impl DropContaining {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }
}

impl LineFilter for DropContaining {
    fn should_retain(&self, line: &str) -> bool {
        !self.needles.iter().any(|needle| line.contains(needle.as_str()))
    }
}

const OWNER_START: &str = "Now owned by";
const OWNER_STOP: &str = "No longer owned by";
const IDENTITY: &str = "responding with identity";
const READY: &str = "Sent ready message";

/// Milestones a device unit announces on its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitEvent<'a> {
    OwnerStart(&'a str),
    OwnerStop(&'a str),
    Identity,
    Ready,
}

impl<'a> UnitEvent<'a> {
    /// Every milestone mentioned on `line`, in a fixed order.
    fn scan(line: &'a str) -> Vec<Self> {
        let mut events = Vec::new();
        if let Some(owner) = owner_after(line, OWNER_START) {
            events.push(Self::OwnerStart(owner));
        }
        if let Some(owner) = owner_after(line, OWNER_STOP) {
            events.push(Self::OwnerStop(owner));
        }
        if line.contains(IDENTITY) {
            events.push(Self::Identity);
        }
        if line.contains(READY) {
            events.push(Self::Ready);
        }
        events
    }
}

/// Watches a device unit's output for ownership changes and start-up
/// milestones.
///
/// Lines are always retained.  Ownership transitions additionally emit an
/// `owner_start` / `owner_stop` info event naming the device and owner; the
/// identity and ready announcements emit `device_ident` / `device_ready`
/// debug events.
#[derive(Debug, Clone)]
pub struct OwnershipWatcher {
    uuid: String,
}

impl OwnershipWatcher {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

impl LineFilter for OwnershipWatcher {
    fn should_retain(&self, line: &str) -> bool {
        for event in UnitEvent::scan(line) {
            match event {
                UnitEvent::OwnerStart(owner) => {
                    info!(event = "owner_start", uuid = %self.uuid, owner, "device owner start")
                }
                UnitEvent::OwnerStop(owner) => {
                    info!(event = "owner_stop", uuid = %self.uuid, owner, "device owner stop")
                }
                UnitEvent::Identity => {
                    debug!(event = "device_ident", uuid = %self.uuid, "device unit registered identity")
                }
                UnitEvent::Ready => {
                    debug!(event = "device_ready", uuid = %self.uuid, "device unit ready")
                }
            }
        }
        true
    }
}

/// Extracts the owner that follows `marker`, e.g. `Now owned by "jane@lab"`.
fn owner_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = line[start..].trim_start_matches(|c: char| c == ' ' || c == ':' || c == '"');
    let owner = rest.split('"').next().unwrap_or_default().trim();
    if owner.is_empty() {
        debug!(line, "ownership line without an owner");
        None
    } else {
        Some(owner)
    }
}

/// Runs several filters in order; a line is kept only if all keep it.
///
/// Every filter sees every line, so observers placed after a dropping
/// filter still get to react.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn LineFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Arc<dyn LineFilter>) {
        self.filters.push(filter);
    }

    /// Collapses the chain: `None` when empty, the single filter when there
    /// is only one, otherwise the chain itself.
    pub fn into_filter(mut self) -> Option<Arc<dyn LineFilter>> {
        match self.filters.len() {
            0 => None,
            1 => self.filters.pop(),
            _ => Some(Arc::new(self)),
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl LineFilter for FilterChain {
    fn should_retain(&self, line: &str) -> bool {
        self.filters
            .iter()
            .fold(true, |keep, filter| filter.should_retain(line) && keep)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
