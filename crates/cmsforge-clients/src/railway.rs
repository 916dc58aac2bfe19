//! Railway GraphQL client implementing [`CloudPlatform`]

use async_trait::async_trait;
use crypto_box::aead::{OsRng, rand_core::RngCore};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use cmsforge_provision_api::{
    CloudPlatform, CloudProject, DatabaseInfo, ProviderError, ServiceSpec,
};

use crate::http_client::HttpClient;

const PROVIDER: &str = "Railway";
pub const DEFAULT_RAILWAY_ENDPOINT: &str = "https://backboard.railway.com/graphql/v2";

const POSTGRES_IMAGE: &str = "ghcr.io/railwayapp-templates/postgres-ssl:16";
const POSTGRES_USER: &str = "postgres";
const POSTGRES_DB: &str = "railway";
const POSTGRES_PORT: u16 = 5432;

const PROJECT_CREATE: &str = r"mutation projectCreate($input: ProjectCreateInput!) {
  projectCreate(input: $input) { id environments { edges { node { id name } } } }
}";

const SERVICE_CREATE: &str = r"mutation serviceCreate($input: ServiceCreateInput!) {
  serviceCreate(input: $input) { id }
}";

const VARIABLES_UPSERT: &str = r"mutation variableCollectionUpsert($input: VariableCollectionUpsertInput!) {
  variableCollectionUpsert(input: $input)
}";

const TCP_PROXY_CREATE: &str = r"mutation tcpProxyCreate($input: TCPProxyCreateInput!) {
  tcpProxyCreate(input: $input) { domain proxyPort }
}";

const DOMAIN_CREATE: &str = r"mutation serviceDomainCreate($input: ServiceDomainCreateInput!) {
  serviceDomainCreate(input: $input) { domain }
}";

const PROJECT_DELETE: &str = r"mutation projectDelete($id: String!) {
  projectDelete(id: $id)
}";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectCreateData {
    project_create: ProjectNode,
}

#[derive(Debug, Deserialize)]
struct ProjectNode {
    id: String,
    environments: Connection<EnvironmentNode>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct EnvironmentNode {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceCreateData {
    service_create: IdNode,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TcpProxyData {
    tcp_proxy_create: TcpProxyNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TcpProxyNode {
    domain: String,
    proxy_port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainCreateData {
    service_domain_create: DomainNode,
}

#[derive(Debug, Deserialize)]
struct DomainNode {
    domain: String,
}

/// Client for the Railway public API
pub struct RailwayClient {
    http: HttpClient,
    endpoint: String,
    token: String,
}

impl RailwayClient {
    #[must_use]
    pub fn new(http: HttpClient, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: DEFAULT_RAILWAY_ENDPOINT.to_string(),
            token: token.into(),
        }
    }

    /// Point the client at another GraphQL endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn graphql_request(&self, query: &str, variables: Value) -> reqwest::RequestBuilder {
        self.http
            .inner()
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
    }

    /// Queries and idempotent mutations; resent on 5xx and network errors.
    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, ProviderError> {
        let request = self.graphql_request(query, variables);
        unwrap_envelope(self.http.send_json(request, PROVIDER).await?)
    }

    /// Mutations that create something. Sent once: a lost response may still
    /// mean the object exists, and a resend would create a second one.
    async fn graphql_once<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, ProviderError> {
        let request = self.graphql_request(query, variables);
        unwrap_envelope(self.http.send_json_once(request, PROVIDER).await?)
    }

    /// Best-effort removal of a project this client created but cannot hand
    /// back. Returns whether the project is gone.
    async fn discard_project(&self, project_id: &str) -> bool {
        match self.delete_project(project_id).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                tracing::warn!(project_id, error = %e, "Could not delete unusable project");
                false
            }
        }
    }

    async fn create_service_from(
        &self,
        project: &CloudProject,
        name: &str,
        source: Value,
        branch: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut input = json!({
            "projectId": project.project_id,
            "environmentId": project.environment_id,
            "name": name,
            "source": source,
        });
        if let Some(branch) = branch {
            input["branch"] = json!(branch);
        }
        let data: ServiceCreateData = self
            .graphql_once(SERVICE_CREATE, json!({ "input": input }))
            .await?;
        Ok(data.service_create.id)
    }
}

fn unwrap_envelope<T>(envelope: GraphQlResponse<T>) -> Result<T, ProviderError> {
    if let Some(first) = envelope.errors.first() {
        return Err(map_graphql_error(&first.message));
    }
    envelope.data.ok_or_else(|| {
        ProviderError::InvalidResponse(format!("{PROVIDER} returned neither data nor errors"))
    })
}

fn map_graphql_error(message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("not authorized") || lower.contains("unauthorized") {
        ProviderError::Auth(format!("{PROVIDER}: {message}"))
    } else if lower.contains("not found") {
        ProviderError::NotFound(format!("{PROVIDER}: {message}"))
    } else if lower.contains("rate limit") {
        ProviderError::RateLimited(format!("{PROVIDER}: {message}"))
    } else {
        ProviderError::InvalidResponse(format!("{PROVIDER}: {message}"))
    }
}

fn generate_password() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn pick_environment(environments: Vec<EnvironmentNode>) -> Option<EnvironmentNode> {
    let mut environments = environments;
    let production = environments.iter().position(|env| env.name == "production");
    match production {
        Some(index) => Some(environments.swap_remove(index)),
        None => environments.into_iter().next(),
    }
}

#[async_trait]
impl CloudPlatform for RailwayClient {
    async fn create_project(&self, name: &str) -> Result<CloudProject, ProviderError> {
        let data: ProjectCreateData = self
            .graphql_once(PROJECT_CREATE, json!({ "input": { "name": name } }))
            .await?;
        let project = data.project_create;
        let environments = project.environments.edges.into_iter().map(|e| e.node).collect();
        // The project exists from here on; nothing records it unless we return Ok.
        let Some(environment) = pick_environment(environments) else {
            let removed = self.discard_project(&project.id).await;
            let mut message = format!("{PROVIDER} project {} has no environment", project.id);
            if !removed {
                message.push_str("; delete it manually");
            }
            return Err(ProviderError::InvalidResponse(message));
        };

        tracing::info!(project_id = %project.id, environment = %environment.name, "Created cloud project");
        Ok(CloudProject {
            project_id: project.id,
            environment_id: environment.id,
            name: name.to_string(),
        })
    }

    async fn provision_database(
        &self,
        project: &CloudProject,
    ) -> Result<DatabaseInfo, ProviderError> {
        let service_id = self
            .create_service_from(project, "postgres", json!({ "image": POSTGRES_IMAGE }), None)
            .await?;

        let password = generate_password();
        let variables = BTreeMap::from([
            ("POSTGRES_USER".to_string(), POSTGRES_USER.to_string()),
            ("POSTGRES_PASSWORD".to_string(), password.clone()),
            ("POSTGRES_DB".to_string(), POSTGRES_DB.to_string()),
            (
                "PGDATA".to_string(),
                "/var/lib/postgresql/data/pgdata".to_string(),
            ),
        ]);
        self.set_variables(project, &service_id, &variables).await?;

        let proxy: TcpProxyData = self
            .graphql_once(
                TCP_PROXY_CREATE,
                json!({ "input": {
                    "serviceId": service_id,
                    "environmentId": project.environment_id,
                    "applicationPort": POSTGRES_PORT,
                }}),
            )
            .await?;
        let proxy = proxy.tcp_proxy_create;

        Ok(DatabaseInfo {
            service_id,
            connection_string: format!(
                "postgresql://{POSTGRES_USER}:{password}@{}:{}/{POSTGRES_DB}",
                proxy.domain, proxy.proxy_port
            ),
        })
    }

    async fn create_service(
        &self,
        project: &CloudProject,
        spec: &ServiceSpec,
    ) -> Result<String, ProviderError> {
        self.create_service_from(
            project,
            &spec.name,
            json!({ "repo": spec.repo }),
            Some(&spec.branch),
        )
        .await
    }

    async fn set_variables(
        &self,
        project: &CloudProject,
        service_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let _: Value = self
            .graphql(
                VARIABLES_UPSERT,
                json!({ "input": {
                    "projectId": project.project_id,
                    "environmentId": project.environment_id,
                    "serviceId": service_id,
                    "variables": variables,
                }}),
            )
            .await?;
        tracing::debug!(service_id, count = variables.len(), "Upserted service variables");
        Ok(())
    }

    async fn get_public_domain(
        &self,
        project: &CloudProject,
        service_id: &str,
    ) -> Result<String, ProviderError> {
        let data: DomainCreateData = self
            .graphql_once(
                DOMAIN_CREATE,
                json!({ "input": {
                    "environmentId": project.environment_id,
                    "serviceId": service_id,
                }}),
            )
            .await?;
        Ok(format!("https://{}", data.service_domain_create.domain))
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), ProviderError> {
        let _: Value = self
            .graphql(PROJECT_DELETE, json!({ "id": project_id }))
            .await?;
        tracing::info!(project_id, "Deleted cloud project");
        Ok(())
    }
}
