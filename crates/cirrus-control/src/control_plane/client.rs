//! HTTP client for the deployment manager and functions APIs.

use async_trait::async_trait;
use cirrus_compile::IamBinding;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ControlPlaneConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    Deployment, DeploymentList, DeploymentResource, FunctionList, FunctionPolicy, Operation,
    ResourceList, ResourceSummary, SetIamPolicyRequest,
};

use super::ControlPlane;

const API_PATH: &str = "deploymentmanager/v2/projects";

const FUNCTIONS_API_PATH: &str = "v1";

/// Google-style error envelope.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// HTTP client for the deployment manager REST API.
///
/// Function IAM policies go to the functions API host.
#[derive(Debug, Clone)]
pub struct DeploymentManagerClient {
    client: Client,
    base_url: String,
    functions_base_url: String,
    access_token: Option<SecretString>,
}

impl DeploymentManagerClient {
    /// Create a new client from configuration.
    pub fn new(config: &ControlPlaneConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            functions_base_url: config.functions_base_url.trim_end_matches('/').to_owned(),
            access_token: config.access_token.clone(),
        })
    }

    fn deployments_url(&self, project: &str) -> String {
        format!("{}/{API_PATH}/{project}/global/deployments", self.base_url)
    }

    fn functions_url(&self, resource: &str) -> String {
        format!("{}/{FUNCTIONS_API_PATH}/{resource}", self.functions_base_url)
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        deployment: Option<&str>,
    ) -> ControlResult<T> {
        let response = self
            .authorised(request)
            .send()
            .await
            .map_err(ControlError::Http)?;
        read(response, deployment).await
    }
}

/// Decode a success body, or map the error response onto [`ControlError`].
///
/// Conflicts on a named deployment become planning conflicts.
async fn read<T: DeserializeOwned>(
    response: Response,
    deployment: Option<&str>,
) -> ControlResult<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(ControlError::Http);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());

    match (status, deployment) {
        (StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED, Some(deployment)) => {
            Err(ControlError::PlanningConflict {
                deployment: deployment.to_owned(),
                message,
            })
        }
        _ => Err(ControlError::control_plane(status.as_u16(), message)),
    }
}

fn error_message(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let detail = envelope
        .error
        .errors
        .into_iter()
        .map(|e| e.message)
        .find(|m| !m.is_empty());
    detail
        .or(Some(envelope.error.message))
        .filter(|m| !m.is_empty())
}

#[async_trait]
impl ControlPlane for DeploymentManagerClient {
    async fn list_deployments(&self, project: &str) -> ControlResult<Vec<Deployment>> {
        let url = self.deployments_url(project);
        let mut deployments = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: DeploymentList = self.send(request, None).await?;
            deployments.extend(page.deployments);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(project = %project, count = deployments.len(), "listed deployments");
        Ok(deployments)
    }

    async fn insert_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation> {
        let request = self.client.post(self.deployments_url(project)).json(resource);
        self.send(request, Some(&resource.name)).await
    }

    async fn update_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation> {
        let url = format!("{}/{}", self.deployments_url(project), resource.name);
        let request = self.client.put(url).json(resource);
        self.send(request, Some(&resource.name)).await
    }

    async fn delete_deployment(
        &self,
        project: &str,
        deployment: &str,
    ) -> ControlResult<Operation> {
        let url = format!("{}/{deployment}", self.deployments_url(project));
        self.send(self.client.delete(url), Some(deployment)).await
    }

    async fn get_operation(&self, project: &str, operation: &str) -> ControlResult<Operation> {
        let url = format!(
            "{}/{API_PATH}/{project}/global/operations/{operation}",
            self.base_url
        );
        self.send(self.client.get(url), None).await
    }

    async fn list_resources(
        &self,
        project: &str,
        deployment: &str,
    ) -> ControlResult<Vec<ResourceSummary>> {
        let url = format!("{}/{deployment}/resources", self.deployments_url(project));
        let mut resources = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ResourceList = match self.send(request, None).await {
                Ok(page) => page,
                Err(ControlError::ControlPlane { status: 404, .. }) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            resources.extend(page.resources);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(resources)
    }

    async fn list_functions(&self, project: &str, region: &str) -> ControlResult<Vec<String>> {
        let url = self.functions_url(&format!("projects/{project}/locations/{region}/functions"));
        let mut functions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: FunctionList = self.send(request, None).await?;
            functions.extend(page.functions.into_iter().map(|f| f.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(project = %project, region = %region, count = functions.len(), "listed functions");
        Ok(functions)
    }

    async fn set_function_iam_policy(
        &self,
        function: &str,
        bindings: &[IamBinding],
    ) -> ControlResult<()> {
        let url = format!("{}:setIamPolicy", self.functions_url(function));
        let body = SetIamPolicyRequest {
            policy: FunctionPolicy {
                bindings: bindings.to_vec(),
            },
        };
        let _: FunctionPolicy = self.send(self.client.post(url).json(&body), None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DEPLOYMENTS: &str = "/deploymentmanager/v2/projects/my-project/global/deployments";

    const FUNCTIONS: &str = "/v1/projects/my-project/locations/europe-west1/functions";

    async fn client(server: &MockServer) -> DeploymentManagerClient {
        DeploymentManagerClient::new(&ControlPlaneConfig {
            base_url: format!("{}/", server.uri()),
            functions_base_url: server.uri(),
            access_token: Some(SecretString::from("token".to_owned())),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn list_deployments_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENTS))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deployments": [{"name": "sls-b-dev", "fingerprint": "fp-b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENTS))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deployments": [{"name": "sls-a-dev"}],
                "nextPageToken": "next"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let deployments = client(&server)
            .await
            .list_deployments("my-project")
            .await
            .unwrap();
        let names: Vec<_> = deployments.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["sls-a-dev", "sls-b-dev"]);
        assert_eq!(deployments[1].fingerprint.as_deref(), Some("fp-b"));
    }

    #[tokio::test]
    async fn update_sends_fingerprint() {
        let server = MockServer::start().await;
        let resource =
            DeploymentResource::new("sls-svc-dev", Some("fp".to_owned()), "{}".to_owned());
        Mock::given(method("PUT"))
            .and(path(format!("{DEPLOYMENTS}/sls-svc-dev")))
            .and(body_json(&resource))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "operation-1", "status": "PENDING"})),
            )
            .mount(&server)
            .await;

        let op = client(&server)
            .await
            .update_deployment("my-project", &resource)
            .await
            .unwrap();
        assert_eq!(op.name, "operation-1");
        assert!(!op.is_done());
    }

    #[tokio::test]
    async fn fingerprint_conflict_is_planning_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(412).set_body_json(json!({
                "error": {"code": 412, "message": "fingerprint mismatch"}
            })))
            .mount(&server)
            .await;

        let resource =
            DeploymentResource::new("sls-svc-dev", Some("old".to_owned()), String::new());
        let err = client(&server)
            .await
            .update_deployment("my-project", &resource)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::PlanningConflict { ref deployment, ref message }
                if deployment == "sls-svc-dev" && message == "fingerprint mismatch"
        ));
    }

    #[tokio::test]
    async fn known_cause_is_remapped_from_error_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": 403,
                    "message": "forbidden",
                    "errors": [{"message": "API not enabled for project 1043443644444"}]
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .list_deployments("my-project")
            .await
            .unwrap_err();
        let ControlError::ControlPlane { status, message } = err else {
            panic!("expected control plane error");
        };
        assert_eq!(status, 403);
        assert!(message.starts_with("Incorrect configuration"));
    }

    #[tokio::test]
    async fn missing_deployment_has_no_resources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{DEPLOYMENTS}/sls-svc-dev/resources")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resources = client(&server)
            .await
            .list_resources("my-project", "sls-svc-dev")
            .await
            .unwrap();
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn get_operation_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/deploymentmanager/v2/projects/my-project/global/operations/operation-1",
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "operation-1", "status": "DONE"})),
            )
            .mount(&server)
            .await;

        let op = client(&server)
            .await
            .get_operation("my-project", "operation-1")
            .await
            .unwrap();
        assert!(op.is_done());
    }

    #[tokio::test]
    async fn list_functions_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FUNCTIONS))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functions": [{"name": "projects/my-project/locations/europe-west1/functions/b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(FUNCTIONS))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functions": [{"name": "projects/my-project/locations/europe-west1/functions/a"}],
                "nextPageToken": "next"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let functions = client(&server)
            .await
            .list_functions("my-project", "europe-west1")
            .await
            .unwrap();
        assert_eq!(
            functions,
            [
                "projects/my-project/locations/europe-west1/functions/a",
                "projects/my-project/locations/europe-west1/functions/b"
            ]
        );
    }

    #[tokio::test]
    async fn set_iam_policy_posts_bindings() {
        let server = MockServer::start().await;
        let function = "projects/my-project/locations/europe-west1/functions/svc-dev-hello";
        Mock::given(method("POST"))
            .and(path(format!("/v1/{function}:setIamPolicy")))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({
                "policy": {
                    "bindings": [{"role": "roles/cloudfunctions.invoker", "members": ["allUsers"]}]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": 1,
                "etag": "BwX=",
                "bindings": [{"role": "roles/cloudfunctions.invoker", "members": ["allUsers"]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .await
            .set_function_iam_policy(function, &[IamBinding::public_invoker()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_policy_is_control_plane_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "permission denied on function"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .set_function_iam_policy("projects/p/locations/r/functions/f", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ControlPlane { status: 403, .. }));
    }
}
