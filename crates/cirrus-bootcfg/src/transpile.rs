//! Lowering of the rendered YAML boot document to the JSON machine init format.
//!
//! [`Transpiler`] and [`Validator`] are the seams for external tooling; the local
//! [`InitTranspiler`] and [`InitValidator`] cover the subset of the format the
//! built-in fragment catalog emits.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::{BootcfgError, Result};

/// Version stamped into every lowered document.
pub const INIT_FORMAT_VERSION: &str = "2.2.0";

const UNIT_SUFFIXES: &[&str] = &[
    ".service", ".timer", ".socket", ".mount", ".path", ".target",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Fatal,
}

/// One diagnostic produced while lowering or validating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub location: String,
    pub message: String,
}

impl Finding {
    pub fn fatal(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn warning(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Fatal => "error",
        };
        write!(f, "{} at {}: {}", level, self.location, self.message)
    }
}

/// Output of a transpiler run.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub document: Vec<u8>,
    pub findings: Vec<Finding>,
}

/// Lowers a rendered intermediate document to the machine init format.
pub trait Transpiler: Send + Sync {
    fn transpile(&self, rendered: &str) -> Result<Lowered>;
}

/// Checks a lowered document.
pub trait Validator: Send + Sync {
    fn validate(&self, lowered: &[u8]) -> Vec<Finding>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDocument {
    #[serde(default)]
    storage: Option<SourceStorage>,
    #[serde(default)]
    systemd: Option<SourceSystemd>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceStorage {
    #[serde(default)]
    files: Vec<SourceFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceFile {
    path: String,
    #[serde(default = "default_filesystem")]
    filesystem: String,
    #[serde(default)]
    mode: Option<String>,
    contents: SourceContents,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceContents {
    inline: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSystemd {
    #[serde(default)]
    units: Vec<SourceUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceUnit {
    name: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    mask: Option<bool>,
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    dropins: Vec<SourceDropin>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDropin {
    name: String,
    contents: String,
}

fn default_filesystem() -> String {
    "root".to_string()
}

/// Local YAML to JSON lowering.
#[derive(Debug, Clone, Default)]
pub struct InitTranspiler;

impl InitTranspiler {
    pub fn new() -> Self {
        Self
    }

    fn lower_file(file: &SourceFile, index: usize, findings: &mut Vec<Finding>) -> Value {
        let location = format!("storage.files[{}]", index);
        if !file.path.starts_with('/') {
            findings.push(Finding::fatal(
                &location,
                format!("path '{}' is not absolute", file.path),
            ));
        }

        let mode = match &file.mode {
            Some(raw) => match u32::from_str_radix(raw.trim_start_matches("0o"), 8) {
                Ok(mode) if mode <= 0o7777 => Some(mode),
                _ => {
                    findings.push(Finding::fatal(
                        &location,
                        format!("mode '{}' is not a valid octal permission", raw),
                    ));
                    None
                }
            },
            None => None,
        };

        let mut entry = json!({
            "filesystem": file.filesystem,
            "path": file.path,
            "contents": {
                "source": format!("data:,{}", urlencoding::encode(&file.contents.inline)),
            },
        });
        if let Some(mode) = mode {
            entry["mode"] = json!(mode);
        }
        entry
    }

    fn lower_unit(unit: &SourceUnit, index: usize, findings: &mut Vec<Finding>) -> Value {
        let location = format!("systemd.units[{}]", index);
        if !UNIT_SUFFIXES.iter().any(|s| unit.name.ends_with(s)) {
            findings.push(Finding::fatal(
                &location,
                format!("unit '{}' has an unknown type suffix", unit.name),
            ));
        }
        if unit.enabled.is_none()
            && unit.mask.is_none()
            && unit.contents.is_none()
            && unit.dropins.is_empty()
        {
            findings.push(Finding::warning(
                &location,
                format!("unit '{}' has no effect", unit.name),
            ));
        }

        let mut entry = json!({ "name": unit.name });
        if let Some(enabled) = unit.enabled {
            entry["enabled"] = json!(enabled);
        }
        if let Some(mask) = unit.mask {
            entry["mask"] = json!(mask);
        }
        if let Some(contents) = &unit.contents {
            entry["contents"] = json!(contents);
        }
        if !unit.dropins.is_empty() {
            let dropins: Vec<Value> = unit
                .dropins
                .iter()
                .map(|d| json!({ "name": d.name, "contents": d.contents }))
                .collect();
            entry["dropins"] = Value::Array(dropins);
        }
        entry
    }
}

impl Transpiler for InitTranspiler {
    fn transpile(&self, rendered: &str) -> Result<Lowered> {
        let source: SourceDocument =
            serde_yaml::from_str(rendered).map_err(|e| BootcfgError::Transpile {
                reason: e.to_string(),
            })?;

        let mut findings = Vec::new();
        let mut files = Vec::new();
        let mut units = Vec::new();

        if let Some(storage) = &source.storage {
            let mut paths = HashSet::new();
            for (i, file) in storage.files.iter().enumerate() {
                if !paths.insert(file.path.as_str()) {
                    findings.push(Finding::fatal(
                        format!("storage.files[{}]", i),
                        format!("path '{}' is written more than once", file.path),
                    ));
                }
                files.push(Self::lower_file(file, i, &mut findings));
            }
        }

        if let Some(systemd) = &source.systemd {
            let mut names = HashSet::new();
            for (i, unit) in systemd.units.iter().enumerate() {
                if !names.insert(unit.name.as_str()) {
                    findings.push(Finding::fatal(
                        format!("systemd.units[{}]", i),
                        format!("unit '{}' is declared more than once", unit.name),
                    ));
                }
                units.push(Self::lower_unit(unit, i, &mut findings));
            }
        }

        let lowered = json!({
            "ignition": { "version": INIT_FORMAT_VERSION },
            "storage": { "files": files },
            "systemd": { "units": units },
        });
        let document = serde_json::to_vec(&lowered).map_err(|e| BootcfgError::Transpile {
            reason: e.to_string(),
        })?;

        Ok(Lowered { document, findings })
    }
}

/// Structural checks on the lowered JSON document.
#[derive(Debug, Clone, Default)]
pub struct InitValidator;

impl InitValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Validator for InitValidator {
    fn validate(&self, lowered: &[u8]) -> Vec<Finding> {
        let mut findings = Vec::new();
        let doc: Value = match serde_json::from_slice(lowered) {
            Ok(doc) => doc,
            Err(e) => {
                findings.push(Finding::fatal("$", format!("not valid JSON: {}", e)));
                return findings;
            }
        };

        match doc.pointer("/ignition/version").and_then(Value::as_str) {
            Some(INIT_FORMAT_VERSION) => {}
            Some(other) => findings.push(Finding::fatal(
                "ignition.version",
                format!("unsupported version {}", other),
            )),
            None => findings.push(Finding::fatal("ignition.version", "missing")),
        }

        if let Some(files) = doc.pointer("/storage/files").and_then(Value::as_array) {
            for (i, file) in files.iter().enumerate() {
                let source = file.pointer("/contents/source").and_then(Value::as_str);
                if !source.is_some_and(|s| s.starts_with("data:")) {
                    findings.push(Finding::fatal(
                        format!("storage.files[{}].contents.source", i),
                        "only data URLs are supported",
                    ));
                }
            }
        }

        if let Some(units) = doc.pointer("/systemd/units").and_then(Value::as_array) {
            for (i, unit) in units.iter().enumerate() {
                let dropins = unit
                    .get("dropins")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for (j, dropin) in dropins.iter().enumerate() {
                    let name = dropin.get("name").and_then(Value::as_str).unwrap_or("");
                    if !name.ends_with(".conf") {
                        findings.push(Finding::fatal(
                            format!("systemd.units[{}].dropins[{}]", i, j),
                            format!("drop-in '{}' must end in .conf", name),
                        ));
                    }
                }
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"storage:
  files:
    - path: /etc/hostname
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          quorum-1
systemd:
  units:
    - name: docker.service
      enabled: true
"#;

    #[test]
    fn lowers_files_and_units() {
        let lowered = InitTranspiler::new().transpile(MINIMAL).unwrap();
        assert!(lowered.findings.is_empty());

        let doc: Value = serde_json::from_slice(&lowered.document).unwrap();
        assert_eq!(doc["ignition"]["version"], INIT_FORMAT_VERSION);
        assert_eq!(doc["storage"]["files"][0]["path"], "/etc/hostname");
        assert_eq!(doc["storage"]["files"][0]["mode"], 420);
        assert_eq!(
            doc["storage"]["files"][0]["contents"]["source"],
            "data:,quorum-1%0A"
        );
        assert_eq!(doc["systemd"]["units"][0]["name"], "docker.service");
        assert_eq!(doc["systemd"]["units"][0]["enabled"], true);

        assert!(InitValidator::new().validate(&lowered.document).is_empty());
    }

    #[test]
    fn unknown_keys_fail_to_transpile() {
        let err = InitTranspiler::new()
            .transpile("storage:\n  files: []\nnetworkd: {}\n")
            .unwrap_err();
        assert!(matches!(err, BootcfgError::Transpile { .. }));
    }

    #[test]
    fn duplicate_units_and_relative_paths_are_fatal() {
        let doc = r#"storage:
  files:
    - path: etc/motd
      contents:
        inline: hi
systemd:
  units:
    - name: a.service
      enabled: true
    - name: a.service
      enabled: false
    - name: b.conf
      enabled: true
"#;
        let lowered = InitTranspiler::new().transpile(doc).unwrap();
        let fatal: Vec<_> = lowered.findings.iter().filter(|f| f.is_fatal()).collect();
        assert_eq!(fatal.len(), 3);
    }

    #[test]
    fn invalid_mode_is_fatal() {
        let doc = "storage:\n  files:\n    - path: /x\n      mode: \"0999\"\n      contents:\n        inline: x\n";
        let lowered = InitTranspiler::new().transpile(doc).unwrap();
        assert_eq!(lowered.findings.len(), 1);
        assert!(lowered.findings[0].message.contains("octal"));
    }

    #[test]
    fn inert_unit_is_a_warning() {
        let doc = "systemd:\n  units:\n    - name: idle.service\n";
        let lowered = InitTranspiler::new().transpile(doc).unwrap();
        assert_eq!(lowered.findings.len(), 1);
        assert_eq!(lowered.findings[0].severity, Severity::Warning);
    }

    #[test]
    fn validator_rejects_bad_documents() {
        let findings = InitValidator::new().validate(b"not json");
        assert!(findings[0].is_fatal());

        let doc = json!({
            "ignition": { "version": "3.0.0" },
            "storage": { "files": [{ "path": "/x", "contents": { "source": "https://x" } }] },
            "systemd": { "units": [{ "name": "a.service", "dropins": [{ "name": "x", "contents": "" }] }] },
        });
        let findings = InitValidator::new().validate(&serde_json::to_vec(&doc).unwrap());
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(Finding::is_fatal));
    }
}
