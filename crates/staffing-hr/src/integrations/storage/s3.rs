use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use super::{validate_key, ObjectEntry, ObjectStore, PutReceipt, StorageError};
use crate::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// S3-compatible client signing requests with AWS Signature Version 4.
pub struct S3ObjectStore {
    client: reqwest::Client,
    config: S3Config,
}

impl S3ObjectStore {
    pub fn new(config: S3Config, timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(Self { client, config })
    }

    /// Path-style addressing for custom endpoints (MinIO, R2), virtual-hosted otherwise.
    fn location(&self, key: &str) -> (String, String) {
        let encoded_key = uri_encode(key, false);
        match &self.config.endpoint {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let host = endpoint
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(endpoint)
                    .to_string();
                let path = if key.is_empty() {
                    format!("/{}", self.config.bucket)
                } else {
                    format!("/{}/{}", self.config.bucket, encoded_key)
                };
                (format!("{endpoint}{path}"), host)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region);
                let path = format!("/{encoded_key}");
                (format!("https://{host}{path}"), host)
            }
        }
    }

    fn canonical_path(url: &str) -> String {
        let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        match without_scheme.find('/') {
            Some(index) => without_scheme[index..].to_string(),
            None => "/".to_string(),
        }
    }

    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/s3/aws4_request", self.config.region)
    }

    fn signing_key(&self, date: &str) -> Vec<u8> {
        let secret = format!("AWS4{}", self.config.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.config.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        hmac(&k_service, b"aws4_request")
    }

    fn signature(&self, date: &str, amz_date: &str, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{}\n{}",
            self.scope(date),
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        hex::encode(hmac(&self.signing_key(date), string_to_sign.as_bytes()))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<reqwest::Response, StorageError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let (url, host) = self.location(key);
        let payload_hash = hex::encode(Sha256::digest(&body));

        let mut headers = extra_headers.clone();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());

        let canonical_query = canonical_query(query);
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            Self::canonical_path(&url),
            canonical_query,
            canonical_headers,
            signed_headers,
            payload_hash
        );
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key_id,
            self.scope(&date),
            signed_headers,
            self.signature(&date, &amz_date, &canonical_request)
        );

        let target = if canonical_query.is_empty() {
            url
        } else {
            format!("{url}?{canonical_query}")
        };
        let mut request = self
            .client
            .request(method, target)
            .header("authorization", authorization)
            .body(body);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }

        request
            .send()
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))
    }

    async fn check(response: reqwest::Response, key: &str) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(StorageError::Unavailable(format!("HTTP {status}: {message}")));
        }
        Err(StorageError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PutReceipt, StorageError> {
        let key = validate_key(key)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        for (name, value) in metadata {
            headers.insert(format!("x-amz-meta-{}", name.to_ascii_lowercase()), value.clone());
        }

        let response = self.send(Method::PUT, key, &[], bytes, &headers).await?;
        let response = Self::check(response, key).await?;
        let etag = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Ok(PutReceipt { etag })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let key = validate_key(key)?;
        let response = self.send(Method::GET, key, &[], Vec::new(), &BTreeMap::new()).await?;
        let response = Self::check(response, key).await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| StorageError::Unavailable(err.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = validate_key(key)?;
        let response = self
            .send(Method::DELETE, key, &[], Vec::new(), &BTreeMap::new())
            .await?;
        Self::check(response, key).await.map(|_| ())
    }

    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let key = validate_key(key)?;
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let (url, host) = self.location(key);

        let query = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.config.access_key_id, self.scope(&date)),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), ttl.as_secs().clamp(1, 604_800).to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        let canonical_query = canonical_query(&query);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            Self::canonical_path(&url),
            canonical_query,
            host,
            UNSIGNED_PAYLOAD
        );
        let signature = self.signature(&date, &amz_date, &canonical_request);
        Ok(format!("{url}?{canonical_query}&X-Amz-Signature={signature}"))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let prefix = prefix.trim_start_matches('/');
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let response = self
                .send(Method::GET, "", &query, Vec::new(), &BTreeMap::new())
                .await?;
            let body = Self::check(response, prefix)
                .await?
                .text()
                .await
                .map_err(|err| StorageError::Unavailable(err.to_string()))?;

            entries.extend(parse_list_entries(&body));
            continuation = xml_values(&body, "NextContinuationToken").into_iter().next();
            if continuation.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 encoding as SigV4 expects it; `/` survives only in object paths.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(name, value)| (uri_encode(name, true), uri_encode(value, true)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn xml_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else {
            break;
        };
        values.push(after[..end].to_string());
        rest = &after[end + close.len()..];
    }
    values
}

fn parse_list_entries(body: &str) -> Vec<ObjectEntry> {
    xml_values(body, "Contents")
        .iter()
        .filter_map(|contents| {
            let key = xml_values(contents, "Key").into_iter().next()?;
            let size = xml_values(contents, "Size")
                .into_iter()
                .next()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0);
            let last_modified = xml_values(contents, "LastModified")
                .into_iter()
                .next()
                .and_then(|raw| {
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|value| value.with_timezone(&Utc))
                        .ok()
                        .or_else(|| {
                            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.fZ")
                                .ok()
                                .map(|naive| naive.and_utc())
                        })
                });
            Some(ObjectEntry {
                key: key.replace("&amp;", "&"),
                size,
                last_modified,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: Option<&str>) -> S3ObjectStore {
        S3ObjectStore::new(
            S3Config {
                bucket: "hr-documents".to_string(),
                region: "us-east-1".to_string(),
                endpoint: endpoint.map(str::to_string),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            },
            Duration::from_secs(15),
        )
        .expect("client builds")
    }

    #[test]
    fn uri_encode_keeps_unreserved_and_optionally_slashes() {
        assert_eq!(uri_encode("employees/e 1/W-4.pdf", false), "employees/e%201/W-4.pdf");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
    }

    #[test]
    fn location_uses_path_style_for_custom_endpoints() {
        let (url, host) = store(Some("http://localhost:9000/")).location("forms/a.pdf");
        assert_eq!(url, "http://localhost:9000/hr-documents/forms/a.pdf");
        assert_eq!(host, "localhost:9000");

        let (url, host) = store(None).location("forms/a.pdf");
        assert_eq!(url, "https://hr-documents.s3.us-east-1.amazonaws.com/forms/a.pdf");
        assert_eq!(host, "hr-documents.s3.us-east-1.amazonaws.com");
    }

    #[tokio::test]
    async fn presigned_urls_carry_credential_scope_and_signature() {
        let url = store(None)
            .sign("forms/a.pdf", Duration::from_secs(900))
            .await
            .expect("sign");
        assert!(url.starts_with("https://hr-documents.s3.us-east-1.amazonaws.com/forms/a.pdf?"));
        assert!(url.contains("X-Amz-Credential=AKIDEXAMPLE%2F"));
        assert!(url.contains("X-Amz-Expires=900"));
        let signature = url.rsplit("X-Amz-Signature=").next().expect("signature present");
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn list_response_entries_are_parsed() {
        let body = "<ListBucketResult><Contents><Key>forms/a.pdf</Key><Size>12</Size>\
            <LastModified>2025-01-02T03:04:05.000Z</LastModified></Contents>\
            <Contents><Key>forms/b.pdf</Key><Size>7</Size></Contents></ListBucketResult>";
        let entries = parse_list_entries(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "forms/a.pdf");
        assert_eq!(entries[0].size, 12);
        assert!(entries[0].last_modified.is_some());
        assert_eq!(entries[1].last_modified, None);
    }
}
