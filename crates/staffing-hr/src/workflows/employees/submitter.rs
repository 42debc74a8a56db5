use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::domain::{
    ChildCollection, ChildRecord, Employee, EmployeeField, EmployeeId, FieldMap, OnboardingStatus,
};
use super::gateway::{EntityPersistenceGateway, GatewayError};
use super::records::{compact, filter_updatable, is_blank, prepare_child};
use crate::error::ErrorKind;
use crate::integrations::cipher::{CodecError, SecretCodec};
use crate::workflows::deadline::bounded;

/// Child items keyed by collection, in form order.
pub type ChildBatch = BTreeMap<ChildCollection, Vec<FieldMap>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChild {
    pub collection: ChildCollection,
    pub index: usize,
    pub id: String,
}

/// One child item that the backend refused. `index` is the zero-based
/// position within its collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFailure {
    pub collection: ChildCollection,
    pub index: usize,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl ChildFailure {
    fn from_gateway(collection: ChildCollection, index: usize, error: &GatewayError) -> Self {
        let fields = match error {
            GatewayError::Validation { fields } => fields.clone(),
            _ => BTreeMap::new(),
        };
        Self {
            collection,
            index,
            kind: error.kind(),
            code: error.code(),
            message: error.to_string(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCreated {
    pub employee: Employee,
    pub children: Vec<CreatedChild>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarUpdate {
    pub employee: Employee,
    pub dropped_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSaved {
    pub employee_id: EmployeeId,
    pub created: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("employee {} saved but {} child records failed", .employee.id, .failures.len())]
    PartialFailure {
        employee: Box<Employee>,
        created: Vec<CreatedChild>,
        failures: Vec<ChildFailure>,
    },
    #[error("unable to protect sensitive field: {0}")]
    Codec(#[from] CodecError),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Gateway(err) => err.kind(),
            SubmitError::PartialFailure { .. } => ErrorKind::PartialFailure,
            SubmitError::Codec(CodecError::MissingKey) => ErrorKind::ServiceUnavailable,
            SubmitError::Codec(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::Gateway(err) => err.code(),
            SubmitError::PartialFailure { .. } => "PARTIAL_FAILURE",
            SubmitError::Codec(CodecError::MissingKey) => "ENCRYPTION_UNAVAILABLE",
            SubmitError::Codec(_) => "INTERNAL_ERROR",
        }
    }
}

/// Single-assignment holder for the employee id created by the first draft save.
#[derive(Debug, Default)]
pub struct DraftSession {
    employee_id: Mutex<Option<EmployeeId>>,
}

impl DraftSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(employee_id: EmployeeId) -> Self {
        Self {
            employee_id: Mutex::new(Some(employee_id)),
        }
    }

    pub async fn employee_id(&self) -> Option<EmployeeId> {
        self.employee_id.lock().await.clone()
    }
}

/// Composes gateway calls into the employee-plus-children operations the forms need.
pub struct EmployeeAggregateSubmitter {
    gateway: Arc<dyn EntityPersistenceGateway>,
    codec: Arc<dyn SecretCodec>,
    call_timeout: Duration,
}

impl EmployeeAggregateSubmitter {
    pub fn new(
        gateway: Arc<dyn EntityPersistenceGateway>,
        codec: Arc<dyn SecretCodec>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            codec,
            call_timeout,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn EntityPersistenceGateway> {
        &self.gateway
    }

    /// Persist the employee, then every non-blank child item concurrently.
    /// Child failures never roll back the employee or sibling items.
    #[tracing::instrument(skip_all)]
    pub async fn create_with_children(
        &self,
        employee_fields: FieldMap,
        children: &ChildBatch,
        cancel: &CancellationToken,
    ) -> Result<AggregateCreated, SubmitError> {
        let fields = self.prepare_employee(employee_fields)?;
        let employee = bounded(cancel, self.call_timeout, self.gateway.create_employee(fields))
            .await
            .map_err(GatewayError::from)??;
        tracing::info!(employee_id = %employee.id, "employee created");

        let pending = children.iter().flat_map(|(collection, items)| {
            items
                .iter()
                .enumerate()
                .filter(|(_, item)| !is_blank(item))
                .map(move |(index, item)| (*collection, index, prepare_child(*collection, item)))
        });

        let calls = pending.map(|(collection, index, record)| {
            let employee_id = &employee.id;
            async move {
                let outcome = bounded(
                    cancel,
                    self.call_timeout,
                    self.gateway.create_child(collection, employee_id, record),
                )
                .await
                .map_err(GatewayError::from)
                .and_then(|result| result);
                (collection, index, outcome)
            }
        });

        let mut created = Vec::new();
        let mut failures = Vec::new();
        for (collection, index, outcome) in join_all(calls).await {
            match outcome {
                Ok(record) => created.push(CreatedChild {
                    collection,
                    index,
                    id: record.id,
                }),
                Err(err) => failures.push(ChildFailure::from_gateway(collection, index, &err)),
            }
        }

        if failures.is_empty() {
            tracing::info!(employee_id = %employee.id, children = created.len(), "employee aggregate saved");
            return Ok(AggregateCreated {
                employee,
                children: created,
            });
        }

        for failure in &failures {
            tracing::warn!(
                employee_id = %employee.id,
                collection = %failure.collection,
                index = failure.index,
                error = %failure.message,
                "child record failed"
            );
        }
        Err(SubmitError::PartialFailure {
            employee: Box::new(employee),
            created,
            failures,
        })
    }

    /// Write declared employee columns only; anything else is reported back and never sent.
    #[tracing::instrument(skip(self, fields, cancel), fields(employee_id = %employee_id))]
    pub async fn update_scalar_fields(
        &self,
        employee_id: &EmployeeId,
        fields: FieldMap,
        cancel: &CancellationToken,
    ) -> Result<ScalarUpdate, SubmitError> {
        let filtered = filter_updatable(fields);
        if !filtered.dropped.is_empty() {
            tracing::warn!(dropped = ?filtered.dropped, "ignoring fields that are not employee columns");
        }

        let mut accepted = filtered.accepted;
        self.protect_ssn(&mut accepted)?;

        let employee = if accepted.is_empty() {
            self.get(employee_id, cancel).await?
        } else {
            bounded(
                cancel,
                self.call_timeout,
                self.gateway.update_employee(employee_id, accepted),
            )
            .await
            .map_err(GatewayError::from)??
        };

        Ok(ScalarUpdate {
            employee,
            dropped_fields: filtered.dropped,
        })
    }

    /// Create on the first save of a session and update afterwards. The session
    /// lock is held across the first create so concurrent saves cannot both create.
    #[tracing::instrument(skip_all)]
    pub async fn save_draft(
        &self,
        session: &DraftSession,
        fields: FieldMap,
        cancel: &CancellationToken,
    ) -> Result<DraftSaved, SubmitError> {
        let mut assigned = session.employee_id.lock().await;
        let filtered = filter_updatable(compact(fields));
        if !filtered.dropped.is_empty() {
            tracing::debug!(dropped = ?filtered.dropped, "draft carried non-employee fields");
        }
        let mut accepted = filtered.accepted;
        self.protect_ssn(&mut accepted)?;

        match assigned.as_ref() {
            Some(employee_id) => {
                bounded(
                    cancel,
                    self.call_timeout,
                    self.gateway.update_employee(employee_id, accepted),
                )
                .await
                .map_err(GatewayError::from)??;
                Ok(DraftSaved {
                    employee_id: employee_id.clone(),
                    created: false,
                })
            }
            None => {
                accepted.insert(
                    "onboardingStatus".to_string(),
                    Value::String(OnboardingStatus::Draft.label().to_string()),
                );
                accepted
                    .entry("status".to_string())
                    .or_insert_with(|| Value::String("inactive".to_string()));
                let employee = bounded(cancel, self.call_timeout, self.gateway.create_employee(accepted))
                    .await
                    .map_err(GatewayError::from)??;
                tracing::info!(employee_id = %employee.id, "draft employee created");
                *assigned = Some(employee.id.clone());
                Ok(DraftSaved {
                    employee_id: employee.id,
                    created: true,
                })
            }
        }
    }

    /// Add one child row to an existing employee.
    pub async fn add_child(
        &self,
        employee_id: &EmployeeId,
        collection: ChildCollection,
        item: &FieldMap,
        cancel: &CancellationToken,
    ) -> Result<ChildRecord, SubmitError> {
        let record = prepare_child(collection, item);
        let created = bounded(
            cancel,
            self.call_timeout,
            self.gateway.create_child(collection, employee_id, record),
        )
        .await
        .map_err(GatewayError::from)??;
        Ok(created)
    }

    pub async fn update_child(
        &self,
        collection: ChildCollection,
        child_id: &str,
        item: &FieldMap,
        cancel: &CancellationToken,
    ) -> Result<ChildRecord, SubmitError> {
        let record = prepare_child(collection, item);
        let updated = bounded(
            cancel,
            self.call_timeout,
            self.gateway.update_child(collection, child_id, record),
        )
        .await
        .map_err(GatewayError::from)??;
        Ok(updated)
    }

    pub async fn get(
        &self,
        employee_id: &EmployeeId,
        cancel: &CancellationToken,
    ) -> Result<Employee, SubmitError> {
        let employee = bounded(cancel, self.call_timeout, self.gateway.get_employee(employee_id))
            .await
            .map_err(GatewayError::from)??
            .ok_or_else(|| GatewayError::NotFound(format!("employee {employee_id}")))?;
        Ok(employee)
    }

    fn prepare_employee(&self, fields: FieldMap) -> Result<FieldMap, SubmitError> {
        let filtered = filter_updatable(compact(fields));
        if !filtered.dropped.is_empty() {
            tracing::warn!(dropped = ?filtered.dropped, "ignoring fields that are not employee columns");
        }
        let mut accepted = filtered.accepted;
        self.protect_ssn(&mut accepted)?;
        Ok(accepted)
    }

    /// Encrypt a plain SSN before it leaves the process. Values that already
    /// decrypt are existing tokens echoed back by the edit form.
    fn protect_ssn(&self, fields: &mut FieldMap) -> Result<(), SubmitError> {
        let column = EmployeeField::Ssn.column();
        let Some(Value::String(raw)) = fields.get(column) else {
            return Ok(());
        };
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            fields.remove(column);
            return Ok(());
        }

        let plain_shape = raw
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == ' ');
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if plain_shape && digits.len() == 9 {
            let token = self.codec.encrypt(&digits)?;
            fields.insert(column.to_string(), Value::String(token));
            return Ok(());
        }
        if !plain_shape && !self.codec.decrypt(&raw).is_empty() {
            return Ok(());
        }
        Err(GatewayError::validation(column, "must contain 9 digits").into())
    }
}
