//! The resource-template document submitted to the control plane.
//!
//! Serialised as JSON, which the control plane accepts as YAML template
//! content. Attribute names are part of the control-plane contract.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::CompileResult;
use crate::iam::IamBinding;

/// Resource type of the deployment bucket.
pub const BUCKET_TYPE: &str = "storage.v1.bucket";

/// A list of typed resource descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    /// Resources in apply order.
    pub resources: Vec<Resource>,
}

impl TemplateDocument {
    /// The create-time document: only the deployment bucket.
    #[must_use]
    pub fn core(bucket: &str, region: &str) -> Self {
        Self {
            resources: vec![Resource::new(
                BUCKET_TYPE,
                bucket,
                serde_json::json!({ "location": region }),
            )],
        }
    }

    /// Append resources declared verbatim in the service definition.
    pub fn extend_custom(&mut self, custom: &[Value]) -> CompileResult<()> {
        for value in custom {
            self.resources.push(serde_json::from_value(value.clone())?);
        }
        Ok(())
    }

    /// Find a resource by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Serialise to template content.
    pub fn to_content(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the document to a file, creating parent directories.
    pub fn write_to(&self, path: &Path) -> CompileResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_content()?)?;
        info!(path = %path.display(), resources = self.resources.len(), "wrote template");
        Ok(())
    }

    /// Read a document back from a file.
    pub fn read_from(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// One resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Control-plane resource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Resource name, unique within the document.
    pub name: String,
    /// Type-specific properties.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    /// Access control; omitted entirely when there are no bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_control: Option<AccessControl>,
    /// Any further keys of a custom resource, kept as declared.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    /// Create a resource without access control.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            properties,
            access_control: None,
            extra: Map::new(),
        }
    }
}

/// `accessControl` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    /// IAM policy applied to the resource.
    pub gcp_iam_policy: IamPolicy,
}

impl AccessControl {
    /// Access control for the given bindings, or `None` when there are none.
    #[must_use]
    pub fn from_bindings(bindings: Vec<IamBinding>) -> Option<Self> {
        (!bindings.is_empty()).then(|| Self {
            gcp_iam_policy: IamPolicy { bindings },
        })
    }
}

/// IAM policy body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    /// One binding per role.
    pub bindings: Vec<IamBinding>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn core_template_holds_bucket() {
        let doc = TemplateDocument::core("sls-my-service-dev-12345678", "us-central1");
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "resources": [{
                    "type": "storage.v1.bucket",
                    "name": "sls-my-service-dev-12345678",
                    "properties": {"location": "us-central1"}
                }]
            })
        );
    }

    #[test]
    fn empty_access_control_is_omitted() {
        assert!(AccessControl::from_bindings(vec![]).is_none());

        let mut resource = Resource::new("t", "n", json!({}));
        resource.access_control =
            AccessControl::from_bindings(vec![IamBinding::new("role1", ["user1"])]);
        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            json!({
                "type": "t",
                "name": "n",
                "properties": {},
                "accessControl": {
                    "gcpIamPolicy": {"bindings": [{"role": "role1", "members": ["user1"]}]}
                }
            })
        );
    }

    #[test]
    fn custom_resources_keep_extra_keys() {
        let mut doc = TemplateDocument::core("bucket", "us-central1");
        doc.extend_custom(&[json!({
            "type": "pubsub.v1.topic",
            "name": "my-topic",
            "properties": {"topic": "my-topic"},
            "metadata": {"dependsOn": ["bucket"]}
        })])
        .unwrap();

        assert_eq!(doc.resources.len(), 2);
        let topic = doc.get("my-topic").unwrap();
        assert_eq!(topic.kind, "pubsub.v1.topic");
        assert_eq!(topic.extra["metadata"], json!({"dependsOn": ["bucket"]}));
        assert_eq!(
            serde_json::to_value(topic).unwrap()["metadata"],
            json!({"dependsOn": ["bucket"]})
        );
    }

    #[test]
    fn custom_resource_without_type_is_rejected() {
        let mut doc = TemplateDocument::default();
        assert!(doc.extend_custom(&[json!({"name": "x"})]).is_err());
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/configuration-template-create.json");
        let doc = TemplateDocument::core("bucket", "us-central1");

        doc.write_to(&path).unwrap();
        assert_eq!(TemplateDocument::read_from(&path).unwrap(), doc);
    }
}
