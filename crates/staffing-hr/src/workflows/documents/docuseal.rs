use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::domain::{SubmissionStatus, TemplateId};
use super::provider::{
    CanonicalSubmission, DocumentProvider, ProviderDocument, ProviderError, ProviderTemplate,
    SubmissionRequest,
};
use super::response::{normalize_submission, RawId};
use crate::config::DocusealConfig;
use crate::integrations::cipher::{CodecError, SecretCodec};

const AUTH_HEADER: &str = "X-Auth-Token";
const TEMPLATE_PAGE: usize = 100;

/// HTTP client for the DocuSeal API.
pub struct DocusealClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl std::fmt::Debug for DocusealClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocusealClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl DocusealClient {
    /// Build a client from config. A stored encrypted key is decrypted with `codec`;
    /// an unreadable key counts as no key at all.
    pub fn from_config(
        config: &DocusealConfig,
        codec: &dyn SecretCodec,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| {
                config
                    .encrypted_api_key
                    .as_deref()
                    .map(|token| codec.decrypt(token))
                    .filter(|key| !key.is_empty())
            })
            .ok_or_else(|| ProviderError::Unavailable(CodecError::MissingKey.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.api_url, path.trim_start_matches('/')))
            .header(AUTH_HEADER, &self.api_key)
    }

    async fn execute(&self, builder: reqwest::RequestBuilder, subject: &str) -> Result<Value, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|err| ProviderError::Decode(err.to_string()))?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|err| ProviderError::Decode(err.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, subject, &body))
    }

    fn same_host(&self, url: &str) -> bool {
        let host = |raw: &str| {
            raw.split_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(raw)
                .split('/')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase()
        };
        host(url) == host(&self.api_url)
    }
}

fn classify_failure(status: StatusCode, subject: &str, body: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized,
        StatusCode::NOT_FOUND => ProviderError::NotFound(subject.to_string()),
        status => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|parsed| {
                    parsed
                        .get("error")
                        .or_else(|| parsed.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| body.trim().to_string());
            ProviderError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    id: RawId,
    name: String,
    #[serde(default)]
    folder_name: Option<String>,
    #[serde(default)]
    fields: Vec<RawNamed>,
    #[serde(default)]
    submitters: Vec<RawNamed>,
}

impl RawTemplate {
    fn into_template(self) -> ProviderTemplate {
        let names = |items: Vec<RawNamed>| {
            let mut names: Vec<String> = Vec::new();
            for name in items.into_iter().filter_map(|item| item.name) {
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
            names
        };
        ProviderTemplate {
            id: TemplateId(self.id.into_string()),
            name: self.name,
            folder: self.folder_name.filter(|folder| !folder.is_empty()),
            field_names: names(self.fields),
            signer_roles: names(self.submitters),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplatePage {
    Paged {
        data: Vec<RawTemplate>,
        #[serde(default)]
        pagination: Option<Pagination>,
    },
    Bare(Vec<RawTemplate>),
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<RawId>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentList {
    Wrapped { documents: Vec<RawDocument> },
    Bare(Vec<RawDocument>),
}

#[async_trait]
impl DocumentProvider for DocusealClient {
    async fn list_templates(&self) -> Result<Vec<ProviderTemplate>, ProviderError> {
        let mut templates = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut query = vec![("limit", TEMPLATE_PAGE.to_string())];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }
            let body = self
                .execute(self.request(Method::GET, "templates").query(&query), "templates")
                .await?;
            let page: TemplatePage =
                serde_json::from_value(body).map_err(|err| ProviderError::Decode(err.to_string()))?;
            let (rows, next) = match page {
                TemplatePage::Paged { data, pagination } => {
                    let next = pagination.and_then(|page| page.next).map(RawId::into_string);
                    (data, next)
                }
                TemplatePage::Bare(rows) => (rows, None),
            };
            let fetched = rows.len();
            templates.extend(rows.into_iter().map(RawTemplate::into_template));
            match next {
                Some(cursor) if fetched > 0 && after.as_deref() != Some(cursor.as_str()) => {
                    after = Some(cursor)
                }
                _ => break,
            }
        }
        tracing::debug!(count = templates.len(), "fetched provider templates");
        Ok(templates)
    }

    async fn create_submission(
        &self,
        request: &SubmissionRequest,
    ) -> Result<CanonicalSubmission, ProviderError> {
        let template_id = match request.template_id.0.parse::<i64>() {
            Ok(numeric) => Value::from(numeric),
            Err(_) => Value::from(request.template_id.0.clone()),
        };
        let mut payload = json!({
            "template_id": template_id,
            "send_email": request.send_email,
            "order": "preserved",
            "submitters": request.submitters,
        });
        if let (Some(message), Some(map)) = (&request.message, payload.as_object_mut()) {
            map.insert("message".to_string(), json!(message));
        }
        let body = self
            .execute(
                self.request(Method::POST, "submissions").json(&payload),
                "template",
            )
            .await?;
        normalize_submission(body)
    }

    async fn get_submission(&self, id: &str) -> Result<CanonicalSubmission, ProviderError> {
        let body = self
            .execute(
                self.request(Method::GET, &format!("submissions/{id}")),
                &format!("submission {id}"),
            )
            .await?;
        normalize_submission(body)
    }

    async fn remind_submission(
        &self,
        id: &str,
        submitter_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let targets: Vec<String> = match submitter_id {
            Some(submitter_id) => vec![submitter_id.to_string()],
            None => self
                .get_submission(id)
                .await?
                .submitters
                .into_iter()
                .filter(|submitter| submitter.completed_at.is_none())
                .filter(|submitter| submitter.status != Some(SubmissionStatus::Completed))
                .map(|submitter| submitter.id)
                .collect(),
        };
        for target in targets {
            self.execute(
                self.request(Method::PUT, &format!("submitters/{target}"))
                    .json(&json!({ "send_email": true })),
                &format!("submitter {target}"),
            )
            .await?;
        }
        Ok(())
    }

    async fn list_documents(&self, submission_id: &str) -> Result<Vec<ProviderDocument>, ProviderError> {
        let body = self
            .execute(
                self.request(Method::GET, &format!("submissions/{submission_id}/documents")),
                &format!("submission {submission_id}"),
            )
            .await?;
        let list: DocumentList =
            serde_json::from_value(body).map_err(|err| ProviderError::Decode(err.to_string()))?;
        let documents = match list {
            DocumentList::Wrapped { documents } | DocumentList::Bare(documents) => documents,
        };
        Ok(documents
            .into_iter()
            .map(|document| ProviderDocument {
                name: document.name,
                url: document.url,
            })
            .collect())
    }

    async fn download_document(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let mut builder = self.client.get(url);
        // Pre-signed file links break when extra auth headers are attached.
        if self.same_host(url) {
            builder = builder.header(AUTH_HEADER, &self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, "document", &body));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
