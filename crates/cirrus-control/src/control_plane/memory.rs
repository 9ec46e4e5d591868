//! In-memory control plane for testing.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use cirrus_compile::compiler::FUNCTION_TYPE;
use cirrus_compile::{IamBinding, TemplateDocument};

use crate::error::{ControlError, ControlResult};
use crate::types::{Deployment, DeploymentResource, Operation, ResourceSummary};

use super::ControlPlane;

/// A request received by [`MemoryControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListDeployments { project: String },
    Insert { project: String, resource: DeploymentResource },
    Update { project: String, resource: DeploymentResource },
    Delete { project: String, deployment: String },
    GetOperation { project: String, operation: String },
    ListResources { project: String, deployment: String },
    ListFunctions { project: String, region: String },
    SetIamPolicy { function: String, bindings: Vec<IamBinding> },
}

#[derive(Debug, Default)]
struct Inner {
    deployments: BTreeMap<String, Deployment>,
    resources: HashMap<String, Vec<ResourceSummary>>,
    /// Full function names per deployment.
    functions: HashMap<String, Vec<String>>,
    policies: BTreeMap<String, Vec<IamBinding>>,
    /// Remaining poll results per operation; the last one repeats.
    operations: HashMap<String, VecDeque<Operation>>,
    scripts: VecDeque<Vec<Operation>>,
    rejection: Option<(u16, String)>,
    requests: Vec<Request>,
    counter: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Register a new operation, consuming the next script if any.
    fn start_operation(&mut self) -> Operation {
        let name = format!("operation-{}", self.next_id());
        let polls: VecDeque<Operation> = match self.scripts.pop_front() {
            Some(script) if !script.is_empty() => script
                .into_iter()
                .map(|op| Operation {
                    name: name.clone(),
                    ..op
                })
                .collect(),
            _ => VecDeque::from([Operation::done(&name)]),
        };
        self.operations.insert(name.clone(), polls);
        Operation::pending(name)
    }

    /// A fingerprint that differs from the deployment's current one.
    fn next_fingerprint(&mut self, deployment: &str) -> String {
        let current = self
            .deployments
            .get(deployment)
            .and_then(|d| d.fingerprint.clone());
        loop {
            let fingerprint = format!("fp-{}", self.next_id());
            if current.as_deref() != Some(fingerprint.as_str()) {
                return fingerprint;
            }
        }
    }

    fn apply(&mut self, resource: &DeploymentResource) {
        let fingerprint = self.next_fingerprint(&resource.name);
        self.deployments.insert(
            resource.name.clone(),
            Deployment {
                name: resource.name.clone(),
                fingerprint: Some(fingerprint),
            },
        );
        // Content that is not a template leaves the deployment without resources.
        let document = serde_json::from_str::<TemplateDocument>(resource.content()).ok();
        let resources = document.as_ref().map_or_else(Vec::new, |doc| {
            doc.resources
                .iter()
                .map(|r| ResourceSummary {
                    name: r.name.clone(),
                    kind: r.kind.clone(),
                })
                .collect()
        });
        let functions = document.as_ref().map_or_else(Vec::new, |doc| {
            doc.resources
                .iter()
                .filter(|r| r.kind == FUNCTION_TYPE)
                .filter_map(|r| {
                    let parent = r.properties.get("parent")?.as_str()?;
                    let function = r.properties.get("function")?.as_str()?;
                    Some(format!("{parent}/functions/{function}"))
                })
                .collect()
        });
        self.resources.insert(resource.name.clone(), resources);
        self.functions.insert(resource.name.clone(), functions);
    }

    fn take_rejection(&mut self) -> ControlResult<()> {
        match self.rejection.take() {
            Some((status, message)) => Err(ControlError::control_plane(status, message)),
            None => Ok(()),
        }
    }
}

/// Scriptable in-memory control plane.
///
/// Submitted operations complete on their first poll unless a script was
/// queued with [`MemoryControlPlane::script_operation`]. Every call is
/// recorded and can be inspected with [`MemoryControlPlane::requests`].
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    inner: RwLock<Inner>,
}

impl MemoryControlPlane {
    /// Create an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing deployment with the given resources.
    #[must_use]
    pub fn with_deployment(
        self,
        name: &str,
        fingerprint: &str,
        resources: Vec<ResourceSummary>,
    ) -> Self {
        if let Ok(mut inner) = self.inner.write() {
            inner.deployments.insert(
                name.to_owned(),
                Deployment {
                    name: name.to_owned(),
                    fingerprint: Some(fingerprint.to_owned()),
                },
            );
            inner.resources.insert(name.to_owned(), resources);
        }
        self
    }

    /// Queue the poll results of the next submitted operation.
    ///
    /// Operation names in the script are replaced by the assigned name.
    pub fn script_operation(&self, polls: Vec<Operation>) -> ControlResult<()> {
        self.write()?.scripts.push_back(polls);
        Ok(())
    }

    /// Reject the next mutating call with a control-plane error.
    pub fn reject_next(&self, status: u16, message: impl Into<String>) -> ControlResult<()> {
        self.write()?.rejection = Some((status, message.into()));
        Ok(())
    }

    /// Current state of a deployment.
    pub fn deployment(&self, name: &str) -> ControlResult<Option<Deployment>> {
        Ok(self.read()?.deployments.get(name).cloned())
    }

    /// Current IAM bindings of a function, if a policy was set.
    pub fn policy(&self, function: &str) -> ControlResult<Option<Vec<IamBinding>>> {
        Ok(self.read()?.policies.get(function).cloned())
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> ControlResult<Vec<Request>> {
        Ok(self.read()?.requests.clone())
    }

    fn read(&self) -> ControlResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }

    fn write(&self) -> ControlResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn list_deployments(&self, project: &str) -> ControlResult<Vec<Deployment>> {
        let mut inner = self.write()?;
        inner.requests.push(Request::ListDeployments {
            project: project.to_owned(),
        });
        Ok(inner.deployments.values().cloned().collect())
    }

    async fn insert_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation> {
        let mut inner = self.write()?;
        inner.requests.push(Request::Insert {
            project: project.to_owned(),
            resource: resource.clone(),
        });
        inner.take_rejection()?;

        if inner.deployments.contains_key(&resource.name) {
            return Err(ControlError::PlanningConflict {
                deployment: resource.name.clone(),
                message: "deployment already exists".to_owned(),
            });
        }

        inner.apply(resource);
        Ok(inner.start_operation())
    }

    async fn update_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation> {
        let mut inner = self.write()?;
        inner.requests.push(Request::Update {
            project: project.to_owned(),
            resource: resource.clone(),
        });
        inner.take_rejection()?;

        let current = inner
            .deployments
            .get(&resource.name)
            .ok_or_else(|| ControlError::PlanningConflict {
                deployment: resource.name.clone(),
                message: "deployment does not exist".to_owned(),
            })?;
        if current.fingerprint != resource.fingerprint {
            return Err(ControlError::PlanningConflict {
                deployment: resource.name.clone(),
                message: "fingerprint mismatch".to_owned(),
            });
        }

        inner.apply(resource);
        Ok(inner.start_operation())
    }

    async fn delete_deployment(
        &self,
        project: &str,
        deployment: &str,
    ) -> ControlResult<Operation> {
        let mut inner = self.write()?;
        inner.requests.push(Request::Delete {
            project: project.to_owned(),
            deployment: deployment.to_owned(),
        });
        inner.take_rejection()?;

        if inner.deployments.remove(deployment).is_none() {
            return Err(ControlError::control_plane(
                404,
                format!("deployment {deployment} not found"),
            ));
        }
        inner.resources.remove(deployment);
        if let Some(functions) = inner.functions.remove(deployment) {
            for function in functions {
                inner.policies.remove(&function);
            }
        }
        Ok(inner.start_operation())
    }

    async fn get_operation(&self, project: &str, operation: &str) -> ControlResult<Operation> {
        let mut inner = self.write()?;
        inner.requests.push(Request::GetOperation {
            project: project.to_owned(),
            operation: operation.to_owned(),
        });

        let polls = inner.operations.get_mut(operation).ok_or_else(|| {
            ControlError::control_plane(404, format!("operation {operation} not found"))
        })?;
        let next = if polls.len() > 1 {
            polls.pop_front()
        } else {
            polls.front().cloned()
        };
        next.ok_or_else(|| ControlError::internal(format!("operation {operation} has no state")))
    }

    async fn list_resources(
        &self,
        project: &str,
        deployment: &str,
    ) -> ControlResult<Vec<ResourceSummary>> {
        let mut inner = self.write()?;
        inner.requests.push(Request::ListResources {
            project: project.to_owned(),
            deployment: deployment.to_owned(),
        });
        Ok(inner.resources.get(deployment).cloned().unwrap_or_default())
    }

    async fn list_functions(&self, project: &str, region: &str) -> ControlResult<Vec<String>> {
        let mut inner = self.write()?;
        inner.requests.push(Request::ListFunctions {
            project: project.to_owned(),
            region: region.to_owned(),
        });
        let parent = format!("projects/{project}/locations/{region}/functions/");
        let mut functions: Vec<String> = inner
            .functions
            .values()
            .flatten()
            .filter(|name| name.starts_with(&parent))
            .cloned()
            .collect();
        functions.sort();
        Ok(functions)
    }

    async fn set_function_iam_policy(
        &self,
        function: &str,
        bindings: &[IamBinding],
    ) -> ControlResult<()> {
        let mut inner = self.write()?;
        inner.requests.push(Request::SetIamPolicy {
            function: function.to_owned(),
            bindings: bindings.to_vec(),
        });
        inner.take_rejection()?;

        if !inner.functions.values().flatten().any(|name| name == function) {
            return Err(ControlError::control_plane(
                404,
                format!("function {function} not found"),
            ));
        }
        inner.policies.insert(function.to_owned(), bindings.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::OperationStatus;

    fn resource(fingerprint: Option<&str>) -> DeploymentResource {
        let content = TemplateDocument::core("sls-svc-dev-1", "us-central1")
            .to_content()
            .unwrap();
        DeploymentResource::new("sls-svc-dev", fingerprint.map(ToOwned::to_owned), content)
    }

    #[tokio::test]
    async fn insert_then_update_with_fingerprint() {
        let plane = MemoryControlPlane::new();
        let op = plane.insert_deployment("p", &resource(None)).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(plane.get_operation("p", &op.name).await.unwrap().is_done());

        let resources = plane.list_resources("p", "sls-svc-dev").await.unwrap();
        assert_eq!(resources[0].kind, "storage.v1.bucket");

        let current = plane.deployment("sls-svc-dev").unwrap().unwrap();
        let stale = plane.update_deployment("p", &resource(Some("stale"))).await;
        assert!(matches!(stale, Err(ControlError::PlanningConflict { .. })));

        plane
            .update_deployment("p", &resource(current.fingerprint.as_deref()))
            .await
            .unwrap();
        assert_ne!(
            plane.deployment("sls-svc-dev").unwrap().unwrap().fingerprint,
            current.fingerprint
        );
    }

    #[tokio::test]
    async fn every_update_issues_a_fresh_fingerprint() {
        // The seeded fingerprint matches the first one the plane would generate.
        let plane = MemoryControlPlane::new().with_deployment("sls-svc-dev", "fp-1", Vec::new());

        let mut seen = vec!["fp-1".to_owned()];
        for _ in 0..3 {
            let current = seen.last().cloned();
            plane
                .update_deployment("p", &resource(current.as_deref()))
                .await
                .unwrap();
            let next = plane
                .deployment("sls-svc-dev")
                .unwrap()
                .unwrap()
                .fingerprint
                .unwrap();
            assert!(!seen.contains(&next), "{next} was issued before");
            seen.push(next);
        }

        let stale = plane.update_deployment("p", &resource(Some("fp-1"))).await;
        assert!(matches!(stale, Err(ControlError::PlanningConflict { .. })));
    }

    #[tokio::test]
    async fn functions_follow_applied_templates() {
        let mut document = TemplateDocument::core("sls-svc-dev-1", "europe-west1");
        document.resources.push(cirrus_compile::Resource::new(
            FUNCTION_TYPE,
            "svc-dev-hello",
            serde_json::json!({
                "parent": "projects/p/locations/europe-west1",
                "function": "svc-dev-hello"
            }),
        ));
        let content = document.to_content().unwrap();
        let plane = MemoryControlPlane::new();
        plane
            .insert_deployment("p", &DeploymentResource::new("sls-svc-dev", None, content))
            .await
            .unwrap();

        let function = "projects/p/locations/europe-west1/functions/svc-dev-hello";
        assert_eq!(
            plane.list_functions("p", "europe-west1").await.unwrap(),
            [function]
        );
        assert!(plane.list_functions("p", "us-central1").await.unwrap().is_empty());

        let bindings = vec![IamBinding::public_invoker()];
        plane.set_function_iam_policy(function, &bindings).await.unwrap();
        assert_eq!(plane.policy(function).unwrap(), Some(bindings));

        let missing = plane
            .set_function_iam_policy("projects/p/locations/europe-west1/functions/other", &[])
            .await;
        assert!(matches!(missing, Err(ControlError::ControlPlane { status: 404, .. })));

        plane.delete_deployment("p", "sls-svc-dev").await.unwrap();
        assert!(plane.list_functions("p", "europe-west1").await.unwrap().is_empty());
        assert!(plane.policy(function).unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_operation_repeats_last_state() {
        let plane = MemoryControlPlane::new();
        plane
            .script_operation(vec![Operation::pending("x"), Operation::done("x")])
            .unwrap();
        let op = plane.insert_deployment("p", &resource(None)).await.unwrap();

        assert!(!plane.get_operation("p", &op.name).await.unwrap().is_done());
        let done = plane.get_operation("p", &op.name).await.unwrap();
        assert!(done.is_done());
        assert_eq!(done.name, op.name);
        assert!(plane.get_operation("p", &op.name).await.unwrap().is_done());
    }

    #[tokio::test]
    async fn rejection_applies_once() {
        let plane = MemoryControlPlane::new();
        plane.reject_next(500, "boom").unwrap();
        assert!(matches!(
            plane.insert_deployment("p", &resource(None)).await,
            Err(ControlError::ControlPlane { status: 500, .. })
        ));
        assert!(plane.insert_deployment("p", &resource(None)).await.is_ok());
        assert_eq!(plane.requests().unwrap().len(), 2);
    }
}
