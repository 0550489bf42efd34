//! Amazon S3 artifact store.
//!
//! Uploads finished archives with a single `PutObject` request signed with
//! AWS Signature V4. The bucket is provisioned on first use: `HeadBucket`,
//! then `CreateBucket` when it is missing.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for request signing.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//!
//! [storage.s3]
//! bucket = "verifiable-ai"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! With `endpoint_url` set, requests are path-style
//! (`<endpoint>/<bucket>/<key>`); otherwise virtual-hosted
//! (`<bucket>.s3.<region>.amazonaws.com/<key>`).
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::sync::OnceCell;

use crate::config::S3StorageConfig;
use crate::traits::ArtifactStore;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    config: S3StorageConfig,
    client: reqwest::Client,
    provisioned: OnceCell<()>,
}

impl S3Store {
    pub fn new(config: S3StorageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            provisioned: OnceCell::new(),
        }
    }

    /// Make sure the bucket exists, creating it if `HeadBucket` says 404.
    pub async fn ensure_bucket(&self) -> Result<()> {
        self.provisioned
            .get_or_try_init(|| async {
                let creds = AwsCredentials::from_env()?;
                let head = self
                    .send(&creds, Method::HEAD, None, Vec::new())
                    .await
                    .with_context(|| format!("HeadBucket {} failed", self.config.bucket))?;

                match head.status().as_u16() {
                    200..=299 => Ok(()),
                    404 => {
                        tracing::info!(bucket = %self.config.bucket, "creating bucket");
                        let resp = self
                            .send(&creds, Method::PUT, None, self.create_bucket_body())
                            .await
                            .with_context(|| {
                                format!("CreateBucket {} failed", self.config.bucket)
                            })?;
                        if !resp.status().is_success() {
                            let status = resp.status();
                            let body = resp.text().await.unwrap_or_default();
                            bail!(
                                "S3 CreateBucket failed (HTTP {}): {}",
                                status,
                                body.chars().take(500).collect::<String>()
                            );
                        }
                        Ok(())
                    }
                    status => bail!(
                        "S3 HeadBucket failed (HTTP {}) for bucket '{}'",
                        status,
                        self.config.bucket
                    ),
                }
            })
            .await
            .map(|_| ())
    }

    fn create_bucket_body(&self) -> Vec<u8> {
        if self.config.region == "us-east-1" {
            return Vec::new();
        }
        format!(
            "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
            self.config.region
        )
        .into_bytes()
    }

    async fn send(
        &self,
        creds: &AwsCredentials,
        method: Method,
        key: Option<&str>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let target = resolve_target(&self.config, key);
        let payload_hash = hex_sha256(&body);
        let headers = sign_request(
            creds,
            &self.config.region,
            method.as_str(),
            &target,
            &payload_hash,
            Utc::now(),
        );

        let mut req = self.client.request(method, target.url());
        for (name, value) in headers {
            if name != "host" {
                req = req.header(name, value);
            }
        }
        req.body(body).send().await.map_err(|e| anyhow!("{}", e))
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload(&self, object_name: &str, local_path: &Path) -> Result<String> {
        self.ensure_bucket().await?;

        let body = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let creds = AwsCredentials::from_env()?;
        let resp = self
            .send(&creds, Method::PUT, Some(object_name), body)
            .await
            .with_context(|| {
                format!("Failed to put s3://{}/{}", self.config.bucket, object_name)
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                object_name,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(format!("s3://{}/{}", self.config.bucket, object_name))
    }
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Request Addressing ============

/// Where a request goes: scheme, `Host` header, and canonical URI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    scheme: &'static str,
    host: String,
    canonical_uri: String,
}

impl Target {
    fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.canonical_uri)
    }
}

/// Address the bucket (`key == None`) or one object within it.
fn resolve_target(config: &S3StorageConfig, key: Option<&str>) -> Target {
    let encoded_key = key.map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"));

    match config.endpoint_url {
        Some(ref endpoint) => {
            let scheme = if endpoint.starts_with("http://") {
                "http"
            } else {
                "https"
            };
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            let canonical_uri = match encoded_key {
                Some(k) => format!("/{}/{}", uri_encode(&config.bucket), k),
                None => format!("/{}", uri_encode(&config.bucket)),
            };
            Target {
                scheme,
                host,
                canonical_uri,
            }
        }
        None => Target {
            scheme: "https",
            host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
            canonical_uri: format!("/{}", encoded_key.unwrap_or_default()),
        },
    }
}

// ============ AWS SigV4 Helpers ============

/// Produce the headers for a signed request, `authorization` included.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    target: &Target,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), target.host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, target.canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
    ));
    headers
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` as is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(endpoint: Option<&str>) -> S3StorageConfig {
        S3StorageConfig {
            bucket: "verifiable-ai".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: endpoint.map(str::to_string),
        }
    }

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn empty_payload_hash() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn signing_key_matches_aws_example() {
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
    fn uri_encode_reserved_characters() {
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("1.0.0"), "1.0.0");
        assert_eq!(uri_encode("x/y"), "x%2Fy");
    }

    #[test]
    fn virtual_hosted_target() {
        let target = resolve_target(&config(None), Some("packs/demo/1.0.0/pack.zip"));
        assert_eq!(target.host, "verifiable-ai.s3.eu-west-1.amazonaws.com");
        assert_eq!(target.canonical_uri, "/packs/demo/1.0.0/pack.zip");
        assert_eq!(
            target.url(),
            "https://verifiable-ai.s3.eu-west-1.amazonaws.com/packs/demo/1.0.0/pack.zip"
        );

        let bucket = resolve_target(&config(None), None);
        assert_eq!(bucket.canonical_uri, "/");
    }

    #[test]
    fn path_style_target_for_custom_endpoint() {
        let cfg = config(Some("http://localhost:9000/"));
        let target = resolve_target(&cfg, Some("packs/my pack/pack.zip"));
        assert_eq!(target.scheme, "http");
        assert_eq!(target.host, "localhost:9000");
        assert_eq!(target.canonical_uri, "/verifiable-ai/packs/my%20pack/pack.zip");

        let bucket = resolve_target(&cfg, None);
        assert_eq!(bucket.url(), "http://localhost:9000/verifiable-ai");
    }

    #[test]
    fn signed_headers_are_sorted_and_complete() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let target = resolve_target(&config(None), Some("a.zip"));
        let headers = sign_request(&creds(), "eu-west-1", "PUT", &target, &hex_sha256(b""), now);

        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["host", "x-amz-content-sha256", "x-amz-date", "authorization"]
        );
        let auth = &headers[3].1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260301/eu-west-1/s3/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert_eq!(headers[2].1, "20260301T120000Z");

        let again = sign_request(&creds(), "eu-west-1", "PUT", &target, &hex_sha256(b""), now);
        assert_eq!(headers, again);
    }

    #[test]
    fn create_bucket_body_only_outside_us_east_1() {
        let store = S3Store::new(config(None));
        assert!(String::from_utf8(store.create_bucket_body())
            .unwrap()
            .contains("<LocationConstraint>eu-west-1</LocationConstraint>"));

        let mut us = config(None);
        us.region = "us-east-1".to_string();
        assert!(S3Store::new(us).create_bucket_body().is_empty());
    }
}
