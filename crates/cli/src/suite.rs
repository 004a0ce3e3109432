//! YAML suite files: parsing, discovery, and flattening into test units

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use gridrunner_common::{Capability, TestStep, TestUnit};

/// A suite file groups tests that share a capability and retry defaults
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteFile {
    pub suite: String,
    #[serde(default)]
    pub description: String,
    pub capability: Capability,
    pub max_retry: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub tests: Vec<SuiteTest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteTest {
    pub name: String,
    pub max_retry: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub steps: Vec<TestStep>,
}

impl SuiteFile {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: SuiteFile = serde_yaml::from_str(raw)?;
        Ok(file)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite file {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("Failed to parse suite file {}", path.display()))
    }

    /// Flatten into test units named `<suite>/<test>`; per-test overrides
    /// win over the suite defaults
    pub fn into_units(self) -> Vec<TestUnit> {
        let mut units = Vec::new();
        for test in self.tests {
            let mut unit = TestUnit::new(
                format!("{}/{}", self.suite, test.name),
                self.capability.clone(),
                test.steps,
            );
            unit.max_retry = test.max_retry.or(self.max_retry);
            unit.timeout_ms = test.timeout_ms.or(self.timeout_ms);
            units.push(unit);
        }
        units
    }
}

/// Find suite files under a directory, sorted for a stable run order
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => found.push(entry.path().to_path_buf()),
            _ => {}
        }
    }
    found.sort();
    Ok(found)
}

pub fn load_all(root: &Path) -> Result<Vec<SuiteFile>> {
    let paths = discover(root)?;
    anyhow::ensure!(
        !paths.is_empty(),
        "No suite files found under {}",
        root.display()
    );
    paths.iter().map(|path| SuiteFile::from_file(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrunner_common::BrowserFamily;

    const CHECKOUT: &str = r##"
suite: checkout
description: Checkout flow
capability:
  family: firefox
  version: "121"
max_retry: 2
tests:
  - name: guest-checkout
    steps:
      - action: navigate
        url: https://shop.example/cart
      - action: click
        selector: "#checkout"
  - name: saved-card
    max_retry: 0
    timeout_ms: 20000
    steps:
      - action: navigate
        url: https://shop.example/cart
"##;

    #[test]
    fn test_parse_suite_yaml() {
        let file = SuiteFile::from_yaml(CHECKOUT).unwrap();
        assert_eq!(file.suite, "checkout");
        assert_eq!(file.capability.family, BrowserFamily::Firefox);
        assert_eq!(file.capability.version.as_deref(), Some("121"));
        assert_eq!(file.tests.len(), 2);
    }

    #[test]
    fn test_units_inherit_suite_defaults() {
        let units = SuiteFile::from_yaml(CHECKOUT).unwrap().into_units();
        assert_eq!(units[0].name, "checkout/guest-checkout");
        assert_eq!(units[0].max_retry, Some(2));
        assert_eq!(units[0].timeout_ms, None);
        // per-test overrides win
        assert_eq!(units[1].max_retry, Some(0));
        assert_eq!(units[1].timeout_ms, Some(20_000));
    }

    #[test]
    fn test_discover_finds_yaml_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("a.yml"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let found = discover(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yaml"]);
    }
}
