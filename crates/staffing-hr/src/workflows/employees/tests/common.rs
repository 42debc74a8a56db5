use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::integrations::cipher::AesSecretCodec;
use crate::workflows::employees::domain::{
    ChildCollection, ChildRecord, Employee, EmployeeId, FieldMap,
};
use crate::workflows::employees::gateway::{EntityPersistenceGateway, GatewayError};
use crate::workflows::employees::submitter::EmployeeAggregateSubmitter;

pub(crate) fn fields(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

pub(crate) fn codec() -> Arc<AesSecretCodec> {
    Arc::new(AesSecretCodec::from_base64_key(&STANDARD.encode([9u8; 32])).expect("valid test key"))
}

pub(crate) fn jane_doe() -> FieldMap {
    fields(json!({
        "firstName": "Jane",
        "lastName": "Doe",
        "workEmail": "jane@x.com",
    }))
}

#[derive(Default)]
struct GatewayState {
    employees: BTreeMap<EmployeeId, FieldMap>,
    children: Vec<(ChildCollection, ChildRecord)>,
    calls: Vec<String>,
    next_id: u64,
    reject_child: Vec<(ChildCollection, String, Value)>,
    reject_employee: Option<GatewayError>,
    reject_update: Option<GatewayError>,
    employee_delay: Option<Duration>,
}

/// Records every call in order and enforces that children reference a stored employee.
#[derive(Default)]
pub(crate) struct MemoryGateway {
    state: Mutex<GatewayState>,
}

impl MemoryGateway {
    pub(crate) fn with_employee(id: &str, employee: FieldMap) -> Self {
        let gateway = Self::default();
        {
            let mut state = gateway.state.lock().expect("gateway mutex poisoned");
            state.employees.insert(EmployeeId(id.to_string()), employee);
            state.next_id = state.employees.len() as u64;
        }
        gateway
    }

    /// Fail child creation with a validation error when `field` equals `value`.
    pub(crate) fn reject_child_when(&self, collection: ChildCollection, field: &str, value: Value) {
        self.state
            .lock()
            .expect("gateway mutex poisoned")
            .reject_child
            .push((collection, field.to_string(), value));
    }

    pub(crate) fn reject_employee(&self, error: GatewayError) {
        self.state.lock().expect("gateway mutex poisoned").reject_employee = Some(error);
    }

    pub(crate) fn reject_employee_updates(&self, error: GatewayError) {
        self.state.lock().expect("gateway mutex poisoned").reject_update = Some(error);
    }

    pub(crate) fn delay_employee_creation(&self, delay: Duration) {
        self.state.lock().expect("gateway mutex poisoned").employee_delay = Some(delay);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().expect("gateway mutex poisoned").calls.clone()
    }

    pub(crate) fn employee_count(&self) -> usize {
        self.state.lock().expect("gateway mutex poisoned").employees.len()
    }

    pub(crate) fn stored_employee(&self, id: &EmployeeId) -> Option<FieldMap> {
        self.state
            .lock()
            .expect("gateway mutex poisoned")
            .employees
            .get(id)
            .cloned()
    }

    pub(crate) fn children(&self, collection: ChildCollection) -> Vec<ChildRecord> {
        self.state
            .lock()
            .expect("gateway mutex poisoned")
            .children
            .iter()
            .filter(|(stored, _)| *stored == collection)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

fn to_employee(id: &EmployeeId, fields: &FieldMap) -> Result<Employee, GatewayError> {
    let mut row = fields.clone();
    row.insert("id".to_string(), Value::String(id.0.clone()));
    serde_json::from_value(Value::Object(row)).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[async_trait]
impl EntityPersistenceGateway for MemoryGateway {
    async fn create_employee(&self, fields: FieldMap) -> Result<Employee, GatewayError> {
        let delay = self.state.lock().expect("gateway mutex poisoned").employee_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().expect("gateway mutex poisoned");
        state.calls.push("create_employee".to_string());
        if let Some(error) = state.reject_employee.clone() {
            return Err(error);
        }
        state.next_id += 1;
        let id = EmployeeId(format!("emp-{}", state.next_id));
        let employee = to_employee(&id, &fields)?;
        state.employees.insert(id, fields);
        Ok(employee)
    }

    async fn update_employee(
        &self,
        id: &EmployeeId,
        fields: FieldMap,
    ) -> Result<Employee, GatewayError> {
        let mut state = self.state.lock().expect("gateway mutex poisoned");
        state.calls.push(format!("update_employee:{id}"));
        if let Some(error) = state.reject_update.clone() {
            return Err(error);
        }
        let stored = state
            .employees
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("employee {id}")))?;
        stored.extend(fields);
        let snapshot = stored.clone();
        to_employee(id, &snapshot)
    }

    async fn get_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, GatewayError> {
        let mut state = self.state.lock().expect("gateway mutex poisoned");
        state.calls.push(format!("get_employee:{id}"));
        match state.employees.get(id) {
            Some(fields) => to_employee(id, fields).map(Some),
            None => Ok(None),
        }
    }

    async fn create_child(
        &self,
        collection: ChildCollection,
        employee_id: &EmployeeId,
        record: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        // Yield so sibling items genuinely overlap.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().expect("gateway mutex poisoned");
        state.calls.push(format!("create_child:{collection}"));
        if !state.employees.contains_key(employee_id) {
            return Err(GatewayError::NotFound(format!("employee {employee_id}")));
        }
        let rejected = state.reject_child.iter().any(|(target, field, value)| {
            *target == collection && record.get(field) == Some(value)
        });
        if rejected {
            return Err(GatewayError::validation("institution", "is not accredited"));
        }
        state.next_id += 1;
        let child = ChildRecord {
            id: format!("{}-{}", collection.label(), state.next_id),
            employee_id: employee_id.clone(),
            fields: record,
        };
        state.children.push((collection, child.clone()));
        Ok(child)
    }

    async fn update_child(
        &self,
        collection: ChildCollection,
        id: &str,
        fields: FieldMap,
    ) -> Result<ChildRecord, GatewayError> {
        let mut state = self.state.lock().expect("gateway mutex poisoned");
        state.calls.push(format!("update_child:{collection}:{id}"));
        let (_, child) = state
            .children
            .iter_mut()
            .find(|(stored, child)| *stored == collection && child.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("{collection} {id}")))?;
        child.fields.extend(fields);
        Ok(child.clone())
    }
}

pub(crate) fn submitter(gateway: Arc<MemoryGateway>) -> EmployeeAggregateSubmitter {
    EmployeeAggregateSubmitter::new(gateway, codec(), Duration::from_secs(5))
}

pub(crate) async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(crate) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}
