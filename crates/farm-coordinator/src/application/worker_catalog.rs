//! Worker templates and per-device process spec construction.
//!
//! The external workers own their command-line vocabulary, so argument
//! lists live in configuration as templates with `{placeholder}` tokens.
//! When the event loop needs a process it asks the catalog to expand the
//! template against the device it is for:
//!
//! | Placeholder        | Value                                    |
//! |--------------------|------------------------------------------|
//! | `{uuid}`           | normalised device uuid                   |
//! | `{name}`           | display name (falls back to the uuid)    |
//! | `{vnc_port}` ...   | the device's [`PortSet`] entries         |
//! | `{stream_width}`   | negotiated geometry, `0` until known     |
//! | `{click_scale}`    | negotiated geometry, `0` until known     |
//! | anything else      | looked up in the global `[vars]` table   |
//!
//! Unknown placeholders are left verbatim so typos show up in the worker's
//! own error output.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use farm_core::{FrameGeometry, PortSet};
use serde::{Deserialize, Serialize};

use super::line_filter::{DropContaining, FilterChain, OwnershipWatcher};
use super::supervision::{ProcessKey, ProcessSpec, RestartPolicy};

/// When a worker is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerScope {
    /// Once at coordinator startup, independent of any device.
    Base,
    /// When a device connects.
    #[default]
    Connect,
    /// When the device exposes its mirror-capable interface.
    Interface,
}

/// One configurable worker definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTemplate {
    /// Logical process name, unique within the catalog.
    pub name: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub scope: WorkerScope,
    /// Restart when the device's frame geometry changes.
    #[serde(default)]
    pub geometry_sensitive: bool,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Output lines containing any of these are dropped.
    #[serde(default)]
    pub drop_lines_containing: Vec<String>,
    /// Log ownership transitions reported in this worker's output.
    #[serde(default)]
    pub watch_ownership: bool,
    /// Extra metadata attached to every log record; values are expanded.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl WorkerTemplate {
    /// Minimal template with no arguments, used by tests and defaults.
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>, scope: WorkerScope) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args: Vec::new(),
            working_dir: None,
            scope,
            geometry_sensitive: false,
            restart: RestartPolicy::Never,
            drop_lines_containing: Vec::new(),
            watch_ownership: false,
            fields: BTreeMap::new(),
        }
    }
}

/// Device facts a template is expanded against.
#[derive(Debug, Clone, Copy)]
pub struct DeviceContext<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub ports: PortSet,
    pub geometry: Option<FrameGeometry>,
}

/// The set of worker templates plus global placeholder values.
#[derive(Debug, Clone, Default)]
pub struct WorkerCatalog {
    templates: Vec<WorkerTemplate>,
    vars: BTreeMap<String, String>,
}

impl WorkerCatalog {
    /// Builds a catalog.  A later template with a duplicate name replaces
    /// the earlier one.
    pub fn new(templates: Vec<WorkerTemplate>, vars: BTreeMap<String, String>) -> Self {
        let mut unique: Vec<WorkerTemplate> = Vec::with_capacity(templates.len());
        for template in templates {
            match unique.iter_mut().find(|t| t.name == template.name) {
                Some(existing) => *existing = template,
                None => unique.push(template),
            }
        }
        Self {
            templates: unique,
            vars,
        }
    }

    pub fn get(&self, name: &str) -> Option<&WorkerTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Names of the workers started in `scope`, in configuration order.
    pub fn names_in_scope(&self, scope: WorkerScope) -> Vec<String> {
        self.templates
            .iter()
            .filter(|t| t.scope == scope)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn restart_policy(&self, name: &str) -> RestartPolicy {
        self.get(name).map(|t| t.restart).unwrap_or_default()
    }

    pub fn is_geometry_sensitive(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.geometry_sensitive)
    }

    /// Expands a base-scope template.
    pub fn base_spec(&self, template: &WorkerTemplate) -> ProcessSpec {
        let vars = self.vars.clone();
        self.build(template, ProcessKey::base(&template.name), &vars, None)
    }

    /// Expands a device-scope template for one device.
    pub fn device_spec(&self, template: &WorkerTemplate, device: &DeviceContext<'_>) -> ProcessSpec {
        let mut vars = self.vars.clone();
        let geometry = device.geometry.unwrap_or_default();
        let device_vars = [
            ("uuid", device.uuid.to_string()),
            ("name", device.name.to_string()),
            ("vnc_port", device.ports.vnc_port.to_string()),
            ("video_port", device.ports.video_port.to_string()),
            ("wda_port", device.ports.wda_port.to_string()),
            ("bridge_port", device.ports.bridge_port.to_string()),
            ("stream_width", geometry.stream_width.to_string()),
            ("stream_height", geometry.stream_height.to_string()),
            ("click_width", geometry.click_width.to_string()),
            ("click_height", geometry.click_height.to_string()),
            ("click_scale", geometry.click_scale.to_string()),
        ];
        for (key, value) in device_vars {
            vars.insert(key.to_string(), value);
        }
        let key = ProcessKey::device(device.uuid, &template.name);
        self.build(template, key, &vars, Some(device.uuid))
    }

    fn build(
        &self,
        template: &WorkerTemplate,
        key: ProcessKey,
        vars: &BTreeMap<String, String>,
        uuid: Option<&str>,
    ) -> ProcessSpec {
        let mut spec = ProcessSpec::new(key, expand(&template.binary.to_string_lossy(), vars))
            .args(template.args.iter().map(|arg| expand(arg, vars)));
        if let Some(dir) = &template.working_dir {
            spec = spec.working_dir(expand(&dir.to_string_lossy(), vars));
        }
        if let Some(uuid) = uuid {
            spec = spec.field("uuid", uuid);
        }
        for (k, v) in &template.fields {
            spec = spec.field(k.clone(), expand(v, vars));
        }

        let mut chain = FilterChain::new();
        if template.watch_ownership {
            chain.push(Arc::new(OwnershipWatcher::new(uuid.unwrap_or("base"))));
        }
        let drop = DropContaining::new(template.drop_lines_containing.iter().cloned());
        if !drop.is_empty() {
            chain.push(Arc::new(drop));
        }
        if let Some(filter) = chain.into_filter() {
            spec = spec.filter(filter);
        }
        spec
    }
}

/// Replaces every `{key}` with its value from `vars`.
fn expand(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
