//! Image manifest records extracted from archive-format blobs.

use serde::{Deserialize, Serialize};

/// A name/value label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// A dependency on another image, named either directly by digest or by
/// name plus discovery labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "imageName")]
    pub image_name: String,
    #[serde(rename = "imageID", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// The manifest record of an archive-format image.
///
/// Only the fields the store interprets are modelled; the rest of the
/// manifest is opaque to it and preserved in the cached raw bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "acKind", default)]
    pub ac_kind: String,
    #[serde(rename = "acVersion", default)]
    pub ac_version: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub annotations: Vec<Label>,
}

impl ImageManifest {
    /// Dependency labels as plain pairs, for identity lookups.
    pub fn label_pairs(labels: &[Label]) -> Vec<(String, String)> {
        labels
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_manifest() {
        let json = r#"{
            "acKind": "ImageManifest",
            "acVersion": "0.8.11",
            "name": "example.com/app",
            "labels": [{"name": "version", "value": "v1.0.0"}],
            "dependencies": [
                {"imageName": "example.com/base", "imageID": "sha256-abc"},
                {"imageName": "example.com/libs", "labels": [{"name": "os", "value": "linux"}]}
            ],
            "annotations": [{"name": "authors", "value": "dev@example.com"}],
            "app": {"exec": ["/bin/app"]}
        }"#;
        let m: ImageManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.name, "example.com/app");
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.dependencies[0].image_id.as_deref(), Some("sha256-abc"));
        assert!(m.dependencies[1].image_id.is_none());
        assert_eq!(
            ImageManifest::label_pairs(&m.dependencies[1].labels),
            vec![("os".to_string(), "linux".to_string())]
        );
        assert_eq!(m.annotations.len(), 1);
        assert_eq!(m.annotations[0].name, "authors");
        assert_eq!(m.annotations[0].value, "dev@example.com");
    }

    #[test]
    fn test_minimal_manifest() {
        let m: ImageManifest = serde_json::from_str(r#"{"name": "example.com/app"}"#).unwrap();
        assert!(m.dependencies.is_empty());
        assert!(m.labels.is_empty());
        assert!(m.annotations.is_empty());
    }
}
