//! Per-attempt artifact workspace
//!
//! Layout is `<root>/<unit_id>/attempt-<n>/` holding the attempt
//! transcript and any screenshots. Every written artifact is referenced
//! with a sha256 digest so reports stay verifiable after the fact.

use gridrunner_common::{ArtifactKind, ArtifactRef, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Writes attempt artifacts under a common root
#[derive(Debug, Clone)]
pub struct ArtifactWorkspace {
    root: PathBuf,
}

impl ArtifactWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one attempt's artifacts
    pub fn attempt_dir(&self, unit_id: &str, attempt: u32) -> PathBuf {
        self.root.join(unit_id).join(format!("attempt-{}", attempt))
    }

    /// Write the attempt transcript
    pub fn write_log(&self, unit_id: &str, attempt: u32, contents: &str) -> Result<ArtifactRef> {
        self.write(
            ArtifactKind::Log,
            unit_id,
            attempt,
            "attempt.log",
            contents.as_bytes(),
        )
    }

    /// Write screenshot bytes captured by the runner
    pub fn write_screenshot(
        &self,
        unit_id: &str,
        attempt: u32,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef> {
        self.write(
            ArtifactKind::Screenshot,
            unit_id,
            attempt,
            &format!("{}.png", name),
            bytes,
        )
    }

    fn write(
        &self,
        kind: ArtifactKind,
        unit_id: &str,
        attempt: u32,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef> {
        let dir = self.attempt_dir(unit_id, attempt);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(file_name);
        std::fs::write(&path, bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);

        Ok(ArtifactRef {
            kind,
            path: path.to_string_lossy().to_string(),
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_layout_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ArtifactWorkspace::new(dir.path());

        let artifact = workspace.write_log("unit-1", 2, "navigate / .. ok").unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Log);
        let expected = dir.path().join("unit-1").join("attempt-2").join("attempt.log");
        assert_eq!(artifact.path, expected.to_string_lossy());

        let bytes = std::fs::read(&expected).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        assert_eq!(artifact.sha256, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_attempts_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ArtifactWorkspace::new(dir.path());

        let first = workspace
            .write_screenshot("unit-1", 1, "cart", b"first")
            .unwrap();
        let second = workspace
            .write_screenshot("unit-1", 2, "cart", b"second")
            .unwrap();

        assert_ne!(first.path, second.path);
        assert_ne!(first.sha256, second.sha256);
        assert!(std::path::Path::new(&first.path).exists());
        assert!(std::path::Path::new(&second.path).exists());
    }
}
