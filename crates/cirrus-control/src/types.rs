//! Wire types of the deployment control plane.
//!
//! Field names follow the control plane's camelCase JSON.

use cirrus_compile::IamBinding;
use serde::{Deserialize, Serialize};

/// A deployment as listed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Deployment name.
    pub name: String,
    /// Concurrency token required on update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// One page of `deployments.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentList {
    /// Deployments on this page.
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    /// Token of the next page, if any.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Request body of insert and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResource {
    /// Deployment name.
    pub name: String,
    /// Fingerprint of the deployment being replaced; update only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Template to apply.
    pub target: TargetConfiguration,
}

impl DeploymentResource {
    /// Build a request body from serialised template content.
    #[must_use]
    pub fn new(name: impl Into<String>, fingerprint: Option<String>, content: String) -> Self {
        Self {
            name: name.into(),
            fingerprint,
            target: TargetConfiguration {
                config: ConfigFile { content },
            },
        }
    }

    /// Serialised template content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.target.config.content
    }
}

/// `target` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfiguration {
    /// Template file.
    pub config: ConfigFile,
}

/// `target.config` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Template content.
    pub content: String,
}

/// A long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name; the polling key.
    pub name: String,
    /// Current status.
    pub status: OperationStatus,
    /// Error payload, only on failed terminal operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    /// Kind of operation, e.g. `insert`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Link to the target deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
}

impl Operation {
    /// A non-terminal operation.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OperationStatus::Pending,
            error: None,
            operation_type: None,
            target_link: None,
        }
    }

    /// A terminal operation with no error.
    #[must_use]
    pub fn done(name: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Done,
            ..Self::pending(name)
        }
    }

    /// A terminal operation carrying the given failures.
    #[must_use]
    pub fn failed(name: impl Into<String>, errors: Vec<OperationErrorEntry>) -> Self {
        Self {
            error: Some(OperationError { errors }),
            ..Self::done(name)
        }
    }

    /// Whether the status is the terminal marker.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }
}

/// Operation status. `DONE` is the only terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    #[serde(other)]
    Unknown,
}

/// Error payload of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationError {
    /// Individual failures.
    #[serde(default)]
    pub errors: Vec<OperationErrorEntry>,
}

/// A single failure inside an operation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorEntry {
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Failed resource, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Upstream message.
    #[serde(default)]
    pub message: String,
}

/// A resource of an existing deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Resource name.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// One page of `resources.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    /// Resources on this page.
    #[serde(default)]
    pub resources: Vec<ResourceSummary>,
    /// Token of the next page, if any.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A deployed function as listed by the functions API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudFunction {
    /// Full resource name, `projects/{p}/locations/{r}/functions/{name}`.
    pub name: String,
}

/// One page of `functions.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionList {
    /// Functions on this page.
    #[serde(default)]
    pub functions: Vec<CloudFunction>,
    /// Token of the next page, if any.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// IAM policy of a function. Replaces the whole policy when set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionPolicy {
    /// Role bindings.
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
}

/// Request body of `functions.setIamPolicy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetIamPolicyRequest {
    /// Policy to apply.
    pub policy: FunctionPolicy,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_request_shape() {
        let request = DeploymentResource::new(
            "sls-my-service-dev",
            Some("fp==".to_owned()),
            "resources: []".to_owned(),
        );
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "name": "sls-my-service-dev",
                "fingerprint": "fp==",
                "target": {"config": {"content": "resources: []"}}
            })
        );

        let insert = DeploymentResource::new("sls-my-service-dev", None, String::new());
        assert!(serde_json::to_value(&insert).unwrap().get("fingerprint").is_none());
    }

    #[test]
    fn operation_status_parsing() {
        let op: Operation = serde_json::from_value(json!({
            "name": "operation-1",
            "status": "DONE",
            "operationType": "insert",
            "error": {"errors": [{"code": "X", "location": "/r", "message": "boom"}]}
        }))
        .unwrap();
        assert!(op.is_done());
        assert_eq!(op.error.unwrap().errors[0].message, "boom");

        let op: Operation =
            serde_json::from_value(json!({"name": "op", "status": "SOMETHING_NEW"})).unwrap();
        assert_eq!(op.status, OperationStatus::Unknown);
        assert!(!op.is_done());
    }

    #[test]
    fn empty_lists_parse() {
        let list: DeploymentList = serde_json::from_value(json!({})).unwrap();
        assert!(list.deployments.is_empty());
        let list: ResourceList = serde_json::from_value(json!({
            "resources": [{"name": "b", "type": "storage.v1.bucket"}]
        }))
        .unwrap();
        assert_eq!(list.resources[0].kind, "storage.v1.bucket");
        let list: FunctionList = serde_json::from_value(json!({})).unwrap();
        assert!(list.functions.is_empty());
    }

    #[test]
    fn set_iam_policy_request_shape() {
        let request = SetIamPolicyRequest {
            policy: FunctionPolicy {
                bindings: vec![IamBinding::public_invoker()],
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "policy": {
                    "bindings": [{"role": "roles/cloudfunctions.invoker", "members": ["allUsers"]}]
                }
            })
        );
    }
}
