use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::domain::{ChildCollection, ChildRecord, Employee, EmployeeId, FieldMap};
use crate::config::PersistenceConfig;
use crate::error::ErrorKind;
use crate::workflows::deadline::Interruption;

/// Storage boundary for employees and their child collections.
#[async_trait]
pub trait EntityPersistenceGateway: Send + Sync {
    async fn create_employee(&self, fields: FieldMap) -> Result<Employee, GatewayError>;
    async fn update_employee(
        &self,
        id: &EmployeeId,
        fields: FieldMap,
    ) -> Result<Employee, GatewayError>;
    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, GatewayError>;
    async fn create_child(
        &self,
        collection: ChildCollection,
        employee_id: &EmployeeId,
        record: FieldMap,
    ) -> Result<ChildRecord, GatewayError>;
    async fn update_child(
        &self,
        collection: ChildCollection,
        id: &str,
        fields: FieldMap,
    ) -> Result<ChildRecord, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("validation failed: {}", describe_fields(.fields))]
    Validation { fields: BTreeMap<String, String> },
    #[error("{0} not found")]
    NotFound(String),
    #[error("persistence backend rejected credentials")]
    Unauthorized,
    #[error("persistence backend error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
    #[error("persistence call interrupted: {0}")]
    Interrupted(#[from] Interruption),
    #[error("unexpected persistence payload: {0}")]
    Decode(String),
}

fn describe_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), message.into());
        GatewayError::Validation { fields }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation { .. } => ErrorKind::ValidationFailed,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Unauthorized => ErrorKind::Unauthorized,
            GatewayError::Server { .. } => ErrorKind::Provider,
            GatewayError::Unavailable(_) | GatewayError::Interrupted(_) => {
                ErrorKind::ServiceUnavailable
            }
            GatewayError::Decode(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "VALIDATION_FAILED",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Unauthorized => "UNAUTHORIZED",
            GatewayError::Server { .. } => "PERSISTENCE_ERROR",
            GatewayError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            GatewayError::Interrupted(Interruption::Cancelled) => "CANCELLED",
            GatewayError::Interrupted(Interruption::TimedOut(_)) => "TIMEOUT",
            GatewayError::Decode(_) => "INTERNAL_ERROR",
        }
    }
}

/// REST adapter for the records backend. Child rows live under their own
/// resource and carry `employeeId` as the foreign key.
pub struct HttpEntityGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpEntityGateway {
    pub fn new(config: &PersistenceConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        subject: &str,
    ) -> Result<T, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|err| GatewayError::Unavailable(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let body: Value = response
                .json()
                .await
                .map_err(|err| GatewayError::Decode(err.to_string()))?;
            // Some deployments wrap rows as `{ "data": { ... } }`.
            let row = match body {
                Value::Object(mut map) if map.contains_key("data") && !map.contains_key("id") => {
                    map.remove("data").unwrap_or(Value::Null)
                }
                other => other,
            };
            return serde_json::from_value(row).map_err(|err| GatewayError::Decode(err.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, subject, &text))
    }
}

fn classify_failure(status: StatusCode, subject: &str, body: &str) -> GatewayError {
    match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => GatewayError::Validation {
            fields: validation_fields(body),
        },
        status => GatewayError::Server {
            status: status.as_u16(),
            message: body.to_string(),
        },
    }
}

/// Accepts `{ "errors": { field: msg | [msg] } }`, `{ "fields": {...} }`, or a bare message.
fn validation_fields(body: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let detail = parsed
        .get("errors")
        .or_else(|| parsed.get("fields"))
        .and_then(Value::as_object);

    match detail {
        Some(detail) => {
            for (field, message) in detail {
                let message = match message {
                    Value::String(text) => text.clone(),
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                };
                fields.insert(field.clone(), message);
            }
        }
        None => {
            let message = parsed
                .get("message")
                .or_else(|| parsed.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.trim().to_string());
            fields.insert("_".to_string(), message);
        }
    }
    fields
}

#[async_trait]
impl EntityPersistenceGateway for HttpEntityGateway {
    async fn create_employee(&self, fields: FieldMap) -> Result<Employee, GatewayError> {
        let builder = self.request(reqwest::Method::POST, "employees").json(&fields);
        self.execute(builder, "employee").await
    }

    async fn update_employee(
        &self,
        id: &EmployeeId,
        fields: FieldMap,
    ) -> Result<Employee, GatewayError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("employees/{id}"))
            .json(&fields);
        self.execute(builder, &format!("employee {id}")).await
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, GatewayError> {
        let builder = self.request(reqwest::Method::GET, &format!("employees/{id}"));
        match self.execute(builder, &format!("employee {id}")).await {
            Ok(employee) => Ok(Some(employee)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn create_child(
        &self,
        collection: ChildCollection,
        employee_id: &EmployeeId,
        mut record: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        record.insert("employeeId".to_string(), Value::String(employee_id.0.clone()));
        let builder = self
            .request(reqwest::Method::POST, collection.endpoint())
            .json(&record);
        self.execute(builder, collection.label()).await
    }

    async fn update_child(
        &self,
        collection: ChildCollection,
        id: &str,
        fields: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("{}/{id}", collection.endpoint()))
            .json(&fields);
        self.execute(builder, &format!("{} {id}", collection.label())).await
    }
}
