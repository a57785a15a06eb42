//! Agent manifest loading and validation.
//!
//! Every source tree carries a small JSON manifest identifying the agent.
//! Its `id` becomes the image tag, and the whole manifest is attached to the
//! image as a label.

use crate::config::Config;
use crate::error::{ArenaError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Lowercase image repository name, optionally with `/`-separated path components.
static IMAGE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*",
        r"(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$"
    ))
    .expect("Invalid image name regex")
});

/// Maximum length of an image repository name.
const MAX_ID_LEN: usize = 255;

/// Identity of an agent, parsed from its manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl AgentManifest {
    /// Check the identity fields. Returns the reason on failure.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("`id` must not be empty".to_string());
        }
        if self.id.len() > MAX_ID_LEN {
            return Err(format!("`id` is longer than {} characters", MAX_ID_LEN));
        }
        if !IMAGE_NAME_REGEX.is_match(&self.id) {
            return Err(format!(
                "`id` {:?} is not a valid image name (lowercase letters, digits and separators)",
                self.id
            ));
        }
        if self.name.trim().is_empty() {
            return Err("`name` must not be empty".to_string());
        }
        Ok(())
    }

    /// Tag the built image is published under.
    pub fn image_tag(&self) -> &str {
        &self.id
    }

    /// The manifest as compact JSON, used as a label value.
    pub fn to_label_value(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ArenaError::InvalidManifest {
            path: Path::new(&self.id).to_path_buf(),
            reason: format!("Failed to serialize manifest: {}", e),
        })
    }

    /// Image labels for this manifest.
    pub fn labels(&self, label_key: &str) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(label_key.to_string(), self.to_label_value()?)]))
    }
}

/// Check that `dir` is a directory containing the build file.
pub fn check_source_tree(dir: &Path, build_file: &str) -> Result<()> {
    if !dir.exists() {
        return Err(ArenaError::DirectoryNotFound { path: dir.to_path_buf() });
    }
    if !dir.is_dir() {
        return Err(ArenaError::NotADirectory { path: dir.to_path_buf() });
    }
    if !dir.join(build_file).is_file() {
        return Err(ArenaError::BuildFileNotFound {
            directory: dir.to_path_buf(),
            file: build_file.to_string(),
        });
    }
    Ok(())
}

/// Load and validate the manifest of the source tree at `dir`.
///
/// Reads the file fresh on every call.
pub fn load(dir: &Path, config: &Config) -> Result<AgentManifest> {
    check_source_tree(dir, &config.build_file)?;

    let path = dir.join(&config.manifest_file);
    if !path.is_file() {
        return Err(ArenaError::ManifestNotFound {
            directory: dir.to_path_buf(),
            file: config.manifest_file.clone(),
        });
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ArenaError::InvalidManifest {
        path: path.clone(),
        reason: format!("cannot read: {}", e),
    })?;

    let manifest: AgentManifest = serde_json::from_str(&content)
        .map_err(|e| ArenaError::InvalidManifest { path: path.clone(), reason: e.to_string() })?;

    manifest
        .validate()
        .map_err(|reason| ArenaError::InvalidManifest { path: path.clone(), reason })?;

    debug!(id = %manifest.id, "Loaded agent manifest from {}", path.display());
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(manifest: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        if let Some(manifest) = manifest {
            fs::write(dir.path().join("agent.json"), manifest).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_valid_manifest() {
        let dir = tree(Some(
            r#"{"id": "fox-42", "name": "Fox", "origin": "github.com/arena/fox", "extra": 1}"#,
        ));

        let manifest = load(dir.path(), &Config::default()).unwrap();
        assert_eq!(manifest.id, "fox-42");
        assert_eq!(manifest.image_tag(), "fox-42");
        assert_eq!(manifest.origin.as_deref(), Some("github.com/arena/fox"));
        assert_eq!(manifest.author, None);
    }

    #[test]
    fn test_labels_carry_manifest_json() {
        let manifest = AgentManifest {
            id: "fox-42".into(),
            name: "Fox".into(),
            origin: None,
            description: None,
            author: Some("ada".into()),
        };

        let labels = manifest.labels("io.arena.agent.manifest").unwrap();
        assert_eq!(labels.len(), 1);
        let value = &labels["io.arena.agent.manifest"];
        assert_eq!(value, r#"{"id":"fox-42","name":"Fox","author":"ada"}"#);

        let parsed: AgentManifest = serde_json::from_str(value).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("ghost"), &Config::default()).unwrap_err();
        assert!(matches!(err, ArenaError::DirectoryNotFound { .. }));
        assert!(err.show_usage());
    }

    #[test]
    fn test_file_instead_of_directory() {
        let dir = tree(Some(r#"{"id": "a", "name": "A"}"#));
        let err = load(&dir.path().join("Dockerfile"), &Config::default()).unwrap_err();
        assert!(matches!(err, ArenaError::NotADirectory { .. }));
    }

    #[test]
    fn test_missing_build_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("agent.json"), r#"{"id": "a", "name": "A"}"#).unwrap();

        let err = load(dir.path(), &Config::default()).unwrap_err();
        match &err {
            ArenaError::BuildFileNotFound { file, .. } => assert_eq!(file, "Dockerfile"),
            other => panic!("expected BuildFileNotFound, got {:?}", other),
        }
        assert!(err.show_usage());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tree(None);
        let err = load(dir.path(), &Config::default()).unwrap_err();
        assert!(matches!(err, ArenaError::ManifestNotFound { .. }));
        assert!(err.show_usage());
    }

    #[test]
    fn test_malformed_manifest_is_not_a_usage_error() {
        for content in ["{not json", r#"["fox"]"#, r#"{"name": "no id"}"#] {
            let dir = tree(Some(content));
            let err = load(dir.path(), &Config::default()).unwrap_err();
            assert!(matches!(err, ArenaError::InvalidManifest { .. }), "{}: {:?}", content, err);
            assert!(!err.show_usage());
        }
    }

    #[test]
    fn test_schema_validation() {
        let cases = [
            (r#"{"id": "", "name": "Fox"}"#, "empty"),
            (r#"{"id": "Fox", "name": "Fox"}"#, "valid image name"),
            (r#"{"id": "fox 42", "name": "Fox"}"#, "valid image name"),
            (r#"{"id": "-fox", "name": "Fox"}"#, "valid image name"),
            (r#"{"id": "fox", "name": "  "}"#, "`name`"),
        ];

        for (content, expected) in cases {
            let dir = tree(Some(content));
            match load(dir.path(), &Config::default()) {
                Err(ArenaError::InvalidManifest { reason, .. }) => {
                    assert!(reason.contains(expected), "{}: {}", content, reason);
                }
                other => panic!("{}: expected InvalidManifest, got {:?}", content, other),
            }
        }
    }

    #[test]
    fn test_valid_image_names() {
        for id in ["fox", "fox-42", "team/fox_v2", "a.b__c", "x--y"] {
            let manifest = AgentManifest {
                id: id.into(),
                name: "Agent".into(),
                origin: None,
                description: None,
                author: None,
            };
            assert!(manifest.validate().is_ok(), "{} should be valid", id);
        }
    }

    #[test]
    fn test_custom_file_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Containerfile"), "FROM scratch\n").unwrap();
        fs::write(dir.path().join("manifest.json"), r#"{"id": "owl", "name": "Owl"}"#).unwrap();

        let config = Config {
            build_file: "Containerfile".into(),
            manifest_file: "manifest.json".into(),
            ..Config::default()
        };
        assert_eq!(load(dir.path(), &config).unwrap().id, "owl");
    }
}
