//! HTTP client for the tg-conductor API.
//!
//! Thin typed wrappers over the REST routes. Every request carries
//! `Authorization: Bearer <token>`; error responses are mapped back into [`DomainError`]
//! by status code so callers can match on the same variants the server raised.

use crate::domain::{DomainError, OperationRecord, OperationStatus, Role};
use crate::usecases::auth_service::{AuthStatusView, AuthTicket};
use crate::usecases::group_service::UserGroup;
use crate::usecases::user_service::UserEntry;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub version: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
struct UsersBody {
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct AddedUser {
    user: UserEntry,
}

#[derive(Debug, Deserialize)]
struct GroupsBody {
    groups: Vec<UserGroup>,
}

#[derive(Debug, Deserialize)]
struct GroupLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct OperationsBody {
    operations: Vec<OperationRecord>,
}

#[derive(Debug, Deserialize)]
struct InstancesBody {
    instances: BTreeMap<String, OperationRecord>,
}

#[derive(Debug, Deserialize)]
struct Started {
    status: OperationStatus,
    #[serde(alias = "operation_id", alias = "instance_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedToken {
    token: String,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` points at the API root, e.g. `http://127.0.0.1:5000/api`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, DomainError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Api(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, DomainError> {
        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::Api(format!("request failed: {}", e)))?;
        let response = check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DomainError::Api(format!("invalid response body: {}", e)))
    }

    pub async fn status(&self) -> Result<ServerStatus, DomainError> {
        self.send(self.request(Method::GET, "status")).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserEntry>, DomainError> {
        let body: UsersBody = self.send(self.request(Method::GET, "users")).await?;
        Ok(body.users)
    }

    /// Register an account whose session file is already signed in.
    pub async fn add_user(&self, nickname: &str, phone: &str) -> Result<UserEntry, DomainError> {
        let added: AddedUser = self
            .send(
                self.request(Method::POST, "users")
                    .json(&json!({ "nickname": nickname, "phone": phone })),
            )
            .await?;
        Ok(added.user)
    }

    pub async fn delete_user(&self, nickname: &str) -> Result<(), DomainError> {
        let _: Value = self
            .send(self.request(Method::DELETE, &format!("users/{}", nickname)))
            .await?;
        Ok(())
    }

    pub async fn start_authentication(
        &self,
        nickname: &str,
        phone: &str,
    ) -> Result<AuthTicket, DomainError> {
        self.send(
            self.request(Method::POST, "users/authenticate")
                .json(&json!({ "nickname": nickname, "phone": phone })),
        )
        .await
    }

    pub async fn submit_code(&self, auth_id: &str, code: &str) -> Result<(), DomainError> {
        let _: Value = self
            .send(
                self.request(Method::POST, &format!("users/authenticate/{}/code", auth_id))
                    .json(&json!({ "code": code })),
            )
            .await?;
        Ok(())
    }

    pub async fn auth_status(&self, auth_id: &str) -> Result<AuthStatusView, DomainError> {
        self.send(self.request(
            Method::GET,
            &format!("users/authenticate/{}/status", auth_id),
        ))
        .await
    }

    /// Refreshes the groups of every user on the server side.
    pub async fn list_groups(&self) -> Result<Vec<UserGroup>, DomainError> {
        let body: GroupsBody = self.send(self.request(Method::GET, "groups")).await?;
        Ok(body.groups)
    }

    pub async fn group_link(&self, group_id: i64) -> Result<String, DomainError> {
        let body: GroupLink = self
            .send(self.request(Method::GET, &format!("groups/{}/link", group_id)))
            .await?;
        Ok(body.link)
    }

    /// Returns the operation id.
    pub async fn start_archive(&self, user: &str, group_id: i64) -> Result<String, DomainError> {
        let started: Started = self
            .send(
                self.request(Method::POST, "archives")
                    .json(&json!({ "user": user, "group_id": group_id })),
            )
            .await?;
        Ok(started.id)
    }

    pub async fn list_archives(&self) -> Result<Vec<OperationRecord>, DomainError> {
        let body: OperationsBody = self.send(self.request(Method::GET, "archives")).await?;
        Ok(body.operations)
    }

    /// Returns the instance id.
    pub async fn start_monitoring(&self, user: Option<&str>) -> Result<String, DomainError> {
        let started: Started = self
            .send(
                self.request(Method::POST, "monitoring")
                    .json(&json!({ "user": user })),
            )
            .await?;
        Ok(started.id)
    }

    pub async fn stop_monitoring(&self, instance_id: &str) -> Result<OperationStatus, DomainError> {
        let stopped: Started = self
            .send(self.request(Method::DELETE, &format!("monitoring/{}", instance_id)))
            .await?;
        Ok(stopped.status)
    }

    pub async fn list_monitoring(&self) -> Result<BTreeMap<String, OperationRecord>, DomainError> {
        let body: InstancesBody = self.send(self.request(Method::GET, "monitoring")).await?;
        Ok(body.instances)
    }

    pub async fn operation(&self, id: &str) -> Result<OperationRecord, DomainError> {
        self.send(self.request(Method::GET, &format!("operations/{}", id)))
            .await
    }

    pub async fn list_operations(&self) -> Result<Vec<OperationRecord>, DomainError> {
        let body: OperationsBody = self.send(self.request(Method::GET, "operations")).await?;
        Ok(body.operations)
    }

    /// Admin only. Returns the raw token.
    pub async fn create_token(
        &self,
        username: &str,
        role: Role,
        expiration_days: Option<u32>,
    ) -> Result<String, DomainError> {
        let created: CreatedToken = self
            .send(self.request(Method::POST, "tokens").json(&json!({
                "username": username,
                "role": role,
                "expiration_days": expiration_days,
            })))
            .await?;
        Ok(created.token)
    }

    pub async fn revoke_token(&self, username: &str) -> Result<(), DomainError> {
        let _: Value = self
            .send(self.request(Method::DELETE, &format!("tokens/{}", username)))
            .await?;
        Ok(())
    }
}

/// Turn a non-success response into the matching [`DomainError`].
async fn check(response: Response) -> Result<Response, DomainError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["error"]["message"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| status.to_string());
    Err(match status {
        StatusCode::BAD_REQUEST => DomainError::InvalidInput(message),
        StatusCode::UNAUTHORIZED => DomainError::Unauthorized(message),
        StatusCode::FORBIDDEN => DomainError::Forbidden(message),
        StatusCode::NOT_FOUND => DomainError::NotFound(message),
        StatusCode::CONFLICT => DomainError::Conflict {
            message,
            status: body["status"].as_str().unwrap_or_default().to_string(),
        },
        _ => DomainError::Api(format!("{}: {}", status, message)),
    })
}
