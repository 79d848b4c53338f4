//! Plugin metadata and its validation.

use serde::{Deserialize, Serialize};

/// How a plugin is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    /// Loaded and unloaded at the user's discretion.
    #[default]
    User,

    /// A front-end implementation, managed by the application itself.
    Frontend,
}

/// Metadata a loader reports for its plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique identifier, `[a-z0-9_]+`.
    pub id: String,

    /// Version, `<major>.[<minor>.]<patch>`.
    pub version: String,

    pub name: String,
    pub description: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub third_party_credits: Vec<String>,

    #[serde(default)]
    pub binary_dependencies: Vec<String>,

    #[serde(default)]
    pub runtime_dependencies: Vec<String>,

    /// Ids of plugins that must be loaded before this one.
    #[serde(default)]
    pub plugin_dependencies: Vec<String>,

    #[serde(default)]
    pub load_type: LoadType,
}

impl PluginMetadata {
    /// Check the metadata for convention violations. Violations are warnings,
    /// not errors: the plugin stays usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.id.is_empty() || !self.id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            warnings.push(format!("invalid plugin id '{}', use [a-z0-9_]", self.id));
        }

        if !valid_version(&self.version) {
            warnings.push(format!(
                "invalid version '{}', use '<major>.[<minor>.]<patch>'",
                self.version
            ));
        }

        if self.name.is_empty() {
            warnings.push("name should not be empty".to_string());
        }
        if self.description.is_empty() {
            warnings.push("description should not be empty".to_string());
        }
        if self.license.is_empty() {
            warnings.push("license should not be empty".to_string());
        }
        if self.url.is_empty() {
            warnings.push("url should not be empty".to_string());
        }
        if self.authors.is_empty() {
            warnings.push("authors should not be empty".to_string());
        }

        warnings
    }
}

/// `\d+(\.\d+)?\.\d+`: two or three dot-separated numeric parts.
fn valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    (parts.len() == 2 || parts.len() == 3)
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
