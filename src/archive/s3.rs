//! S3 `PutObject` adapter signed with AWS Signature Version 4.
//!
//! Requests go straight to the S3 REST API. Without a custom endpoint the virtual-hosted
//! form `<bucket>.s3.<region>.amazonaws.com` is used; with `AWS_ENDPOINT_URL` (MinIO,
//! LocalStack) requests switch to path-style addressing against that endpoint.

use super::{ArchiveError, ArchiveObject, ArchiveStore};
use crate::config::Config;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Credentials used to sign S3 requests.
#[derive(Clone)]
pub struct AwsCredentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Archive store writing uploads to an S3 bucket.
pub struct S3ArchiveStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<Url>,
    credentials: AwsCredentials,
}

/// Resolved request target for a bucket or object.
struct Location {
    url: String,
    host: String,
    canonical_uri: String,
}

impl S3ArchiveStore {
    /// Construct the store from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ArchiveError> {
        Self::new(
            &config.s3_bucket_name,
            &config.aws_region,
            config.s3_endpoint_url.as_deref(),
            AwsCredentials {
                access_key_id: config.aws_access_key_id.clone(),
                secret_access_key: config.aws_secret_access_key.clone(),
                session_token: config.aws_session_token.clone(),
            },
        )
    }

    /// Construct the store for an explicit bucket, region, and optional custom endpoint.
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint_url: Option<&str>,
        credentials: AwsCredentials,
    ) -> Result<Self, ArchiveError> {
        let client = Client::builder().user_agent("docsearch/0.1").build()?;
        let endpoint = endpoint_url
            .map(|raw| Url::parse(raw).map_err(|err| ArchiveError::InvalidEndpoint(err.to_string())))
            .transpose()?;
        if let Some(url) = &endpoint {
            if url.host_str().is_none() {
                return Err(ArchiveError::InvalidEndpoint(url.to_string()));
            }
        }
        tracing::debug!(
            bucket,
            region,
            endpoint = ?endpoint.as_ref().map(Url::as_str),
            "Initialized S3 archive store"
        );
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint,
            credentials,
        })
    }

    /// Probe the bucket with a signed `HEAD` request.
    pub async fn check_bucket(&self) -> Result<(), ArchiveError> {
        let location = self.location(None);
        let payload_hash = hex_sha256(b"");
        let request = self.signed_request(
            Method::HEAD,
            &location,
            Vec::new(),
            &payload_hash,
            OffsetDateTime::now_utc(),
        );
        let response = request.send().await?;
        if response.status().is_success() {
            tracing::debug!(bucket = %self.bucket, "Archive bucket reachable");
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ArchiveError::UnexpectedStatus { status, body })
    }

    fn location(&self, key: Option<&str>) -> Location {
        let encoded_key = key
            .map(|key| key.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();

        match &self.endpoint {
            Some(endpoint) => {
                let host = match (endpoint.host_str(), endpoint.port()) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    (Some(host), None) => host.to_string(),
                    (None, _) => String::new(),
                };
                let base_path = endpoint.path().trim_end_matches('/');
                let canonical_uri = if encoded_key.is_empty() {
                    format!("{base_path}/{}", uri_encode(&self.bucket))
                } else {
                    format!("{base_path}/{}/{encoded_key}", uri_encode(&self.bucket))
                };
                Location {
                    url: format!("{}://{host}{canonical_uri}", endpoint.scheme()),
                    host,
                    canonical_uri,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{encoded_key}");
                Location {
                    url: format!("https://{host}{canonical_uri}"),
                    host,
                    canonical_uri,
                }
            }
        }
    }

    fn signed_request(
        &self,
        method: Method,
        location: &Location,
        extra_headers: Vec<(String, String)>,
        payload_hash: &str,
        now: OffsetDateTime,
    ) -> reqwest::RequestBuilder {
        let (date_stamp, amz_date) = amz_timestamps(now);

        let mut headers = extra_headers;
        headers.push(("host".to_string(), location.host.clone()));
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.to_string()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            location.canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );
        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        );

        let mut request = self
            .client
            .request(method, &location.url)
            .header("Authorization", authorization);
        for (name, value) in headers {
            if name != "host" {
                request = request.header(name, value);
            }
        }
        request
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn put_object(&self, object: ArchiveObject) -> Result<String, ArchiveError> {
        let ArchiveObject {
            key,
            bytes,
            content_type,
            metadata,
        } = object;

        let location = self.location(Some(&key));
        let payload_hash = hex_sha256(&bytes);
        let mut headers = vec![("content-type".to_string(), content_type)];
        headers.extend(metadata.into_iter().map(|(name, value)| {
            (
                format!("x-amz-meta-{}", name.to_ascii_lowercase()),
                encode_metadata_value(&value),
            )
        }));

        let size = bytes.len();
        let response = self
            .signed_request(
                Method::PUT,
                &location,
                headers,
                &payload_hash,
                OffsetDateTime::now_utc(),
            )
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ArchiveError::UnexpectedStatus { status, body };
            tracing::error!(bucket = %self.bucket, key = %key, error = %error, "S3 PutObject failed");
            return Err(error);
        }

        tracing::info!(bucket = %self.bucket, key = %key, bytes = size, "File archived");
        Ok(location.url)
    }
}

fn amz_timestamps(now: OffsetDateTime) -> (String, String) {
    let date_stamp = format!(
        "{:04}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day()
    );
    let amz_date = format!(
        "{date_stamp}T{:02}{:02}{:02}Z",
        now.hour(),
        now.minute(),
        now.second()
    );
    (date_stamp, amz_date)
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a date, region, and service.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except unreserved characters.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

/// Metadata headers must be visible ASCII; everything else is percent-encoded.
fn encode_metadata_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for byte in value.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'%' {
            result.push(byte as char);
        } else {
            result.push_str(&format!("%{byte:02X}"));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{HEAD, PUT},
        MockServer,
    };
    use time::{Date, Month, Time};

    fn credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    #[test]
    fn signing_key_matches_published_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn amz_timestamps_are_compact_utc() {
        let now = Date::from_calendar_date(2024, Month::January, 5)
            .expect("date")
            .with_time(Time::from_hms(9, 3, 7).expect("time"))
            .assume_utc();
        let (date_stamp, amz_date) = amz_timestamps(now);
        assert_eq!(date_stamp, "20240105");
        assert_eq!(amz_date, "20240105T090307Z");
    }

    #[test]
    fn virtual_hosted_location_encodes_key_segments() {
        let store = S3ArchiveStore::new("caseforai-bucket", "us-east-1", None, credentials())
            .expect("store");
        let location = store.location(Some("documents/2025/01/02/abcd1234_my report.pdf"));
        assert_eq!(location.host, "caseforai-bucket.s3.us-east-1.amazonaws.com");
        assert_eq!(
            location.canonical_uri,
            "/documents/2025/01/02/abcd1234_my%20report.pdf"
        );
        assert_eq!(
            location.url,
            "https://caseforai-bucket.s3.us-east-1.amazonaws.com/documents/2025/01/02/abcd1234_my%20report.pdf"
        );
    }

    #[test]
    fn metadata_values_are_ascii_safe() {
        assert_eq!(encode_metadata_value("notes.txt"), "notes.txt");
        assert_eq!(encode_metadata_value("résumé.pdf"), "r%C3%A9sum%C3%A9.pdf");
    }

    #[tokio::test]
    async fn put_object_uses_path_style_against_custom_endpoint() {
        let server = MockServer::start_async().await;
        let body = b"hello world".to_vec();
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/archive/documents/2025/01/02/abcd1234_notes.txt")
                    .header("content-type", "text/plain")
                    .header("x-amz-meta-original_filename", "notes.txt")
                    .header("x-amz-content-sha256", hex_sha256(b"hello world"))
                    .header_exists("authorization")
                    .header_exists("x-amz-date")
                    .body("hello world");
                then.status(200);
            })
            .await;

        let store = S3ArchiveStore::new(
            "archive",
            "us-east-1",
            Some(&server.base_url()),
            credentials(),
        )
        .expect("store");
        let url = store
            .put_object(ArchiveObject {
                key: "documents/2025/01/02/abcd1234_notes.txt".into(),
                bytes: body,
                content_type: "text/plain".into(),
                metadata: vec![("original_filename".into(), "notes.txt".into())],
            })
            .await
            .expect("put");

        mock.assert_async().await;
        assert_eq!(
            url,
            format!(
                "{}/archive/documents/2025/01/02/abcd1234_notes.txt",
                server.base_url()
            )
        );
    }

    #[tokio::test]
    async fn put_object_failure_carries_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT);
                then.status(403).body("<Error><Code>AccessDenied</Code></Error>");
            })
            .await;

        let store = S3ArchiveStore::new(
            "archive",
            "us-east-1",
            Some(&server.base_url()),
            credentials(),
        )
        .expect("store");
        let error = store
            .put_object(ArchiveObject {
                key: "documents/x.txt".into(),
                bytes: Vec::new(),
                content_type: "text/plain".into(),
                metadata: Vec::new(),
            })
            .await
            .unwrap_err();

        match error {
            ArchiveError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 403);
                assert!(body.contains("AccessDenied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_bucket_issues_head_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(HEAD).path("/archive");
                then.status(200);
            })
            .await;

        let store = S3ArchiveStore::new(
            "archive",
            "us-east-1",
            Some(&server.base_url()),
            credentials(),
        )
        .expect("store");
        store.check_bucket().await.expect("bucket reachable");
        mock.assert_async().await;
    }
}
