use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use sha2::{Digest, Sha256};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::backend::{FileSource, StorageBackend};
use crate::error::StorageBackendError;

type HmacSha256 = Hmac<Sha256>;

/// S3-compatible [`StorageBackend`], signed with AWS SigV4. Works against
/// real S3 or any S3-compatible endpoint (MinIO, etc.) by pointing
/// `endpoint` at it, configured per storage element rather than hardcoded
/// to a single provider.
///
/// Bodies are buffered in memory before signing: SigV4 requires the payload
/// hash up front, so unlike [`crate::local::LocalBackend`] this cannot
/// stream a source of unknown length without chunked-upload signing.
pub struct S3Backend {
    client: Client,
    endpoint: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    app_folder: String,
}

impl S3Backend {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        app_folder: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            app_folder: app_folder.into(),
        }
    }

    /// Writes a zero-byte `.keep` marker under the app folder so the prefix
    /// exists for listing-based health checks even before any file upload.
    pub async fn ensure_app_folder(&self) -> Result<(), StorageBackendError> {
        let key = format!("{}/.keep", self.app_folder.trim_end_matches('/'));
        self.put_object(&key, Vec::new()).await
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }

    fn sign(&self, method: &Method, url: &str, payload: &[u8], extra_headers: &[(&str, String)]) -> Vec<(String, String)> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let parsed = reqwest::Url::parse(url).expect("valid object url");
        let host = parsed.host_str().unwrap_or_default().to_string();
        let canonical_uri = parsed.path().to_string();

        let payload_hash = hex_digest(payload);

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_lowercase(), v.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String =
            headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
        let signed_headers = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_digest(canonical_request.as_bytes())
        );

        let signing_key = self.derive_signing_key(&date_stamp);
        let signature = hex_hmac(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, credential_scope, signed_headers, signature
        );

        let mut result = headers;
        result.push(("authorization".to_string(), authorization));
        result
    }

    fn derive_signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac_raw(format!("AWS4{}", self.secret_key).as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_raw(&k_date, self.region.as_bytes());
        let k_service = hmac_raw(&k_region, b"s3");
        hmac_raw(&k_service, b"aws4_request")
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageBackendError> {
        let url = self.object_url(key);
        let headers = self.sign(&Method::PUT, &url, &body, &[]);
        let mut req = self.client.put(&url).body(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        check_status(resp).await
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    hex_encode(Sha256::digest(bytes).as_slice())
}

fn hmac_raw(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac(key: &[u8], data: &[u8]) -> String {
    hex_encode(&hmac_raw(key, data))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

async fn check_status(resp: reqwest::Response) -> Result<(), StorageBackendError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(StorageBackendError::UnexpectedStatus { status, body })
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn write_file<'a>(&self, path: &str, mut source: FileSource<'a>) -> Result<u64, StorageBackendError> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await?;
        let len = buf.len() as u64;
        self.put_object(path, buf).await?;
        Ok(len)
    }

    async fn read_file(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>, StorageBackendError> {
        let url = self.object_url(path);
        let headers = self.sign(&Method::GET, &url, &[], &[]);
        let mut req = self.client.get(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageBackendError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageBackendError::UnexpectedStatus { status, body });
        }
        let bytes = resp.bytes().await?;
        Ok(Box::pin(std::io::Cursor::new(bytes.to_vec())))
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageBackendError> {
        let url = self.object_url(path);
        let headers = self.sign(&Method::DELETE, &url, &[], &[]);
        let mut req = self.client.delete(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(StorageBackendError::UnexpectedStatus { status, body })
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool, StorageBackendError> {
        let url = self.object_url(path);
        let headers = self.sign(&Method::HEAD, &url, &[], &[]);
        let mut req = self.client.head(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        Ok(resp.status().is_success())
    }

    async fn get_file_size(&self, path: &str) -> Result<u64, StorageBackendError> {
        let url = self.object_url(path);
        let headers = self.sign(&Method::HEAD, &url, &[], &[]);
        let mut req = self.client.head(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageBackendError::NotFound(path.to_string()));
        }
        let len = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(len)
    }

    async fn write_attr_file(&self, path: &str, contents: &[u8]) -> Result<(), StorageBackendError> {
        self.put_object(path, contents.to_vec()).await
    }

    async fn read_attr_file(&self, path: &str) -> Result<Vec<u8>, StorageBackendError> {
        let mut reader = self.read_file(path).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn delete_attr_file(&self, path: &str) -> Result<(), StorageBackendError> {
        self.delete_file(path).await
    }

    async fn health_check(&self) -> Result<(), StorageBackendError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket);
        let headers = self.sign(&Method::HEAD, &url, &[], &[]);
        let mut req = self.client.head(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            Err(StorageBackendError::UnexpectedStatus { status, body: String::new() })
        }
    }

    /// `GET ?list-type=2` against the bucket root, paginated via
    /// `continuation-token`. The response body is a small, fixed XML shape
    /// (`<Key>…</Key>` entries plus an optional `<NextContinuationToken>`),
    /// so a manual scan avoids pulling in an XML crate for a single field.
    async fn list_attr_paths(&self) -> Result<Vec<String>, StorageBackendError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut url = format!("{}/{}?list-type=2", self.endpoint.trim_end_matches('/'), self.bucket);
            if let Some(token) = &continuation {
                url.push_str("&continuation-token=");
                url.push_str(&urlencode(token));
            }
            let headers = self.sign(&Method::GET, &url, &[], &[]);
            let mut req = self.client.get(&url);
            for (k, v) in headers {
                req = req.header(k, v);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(StorageBackendError::UnexpectedStatus { status, body });
            }
            let body = resp.text().await?;
            keys.extend(extract_xml_tag_values(&body, "Key").into_iter().filter(|k| k.ends_with(".attr.json")));
            continuation = extract_xml_tag_values(&body, "NextContinuationToken").into_iter().next();
            if continuation.is_none() {
                break;
            }
        }
        Ok(keys)
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Extracts every `<tag>value</tag>` occurrence from a flat XML body. Good
/// enough for S3's `ListObjectsV2` response, which never nests same-named
/// tags inside a `Key` or `NextContinuationToken` value.
fn extract_xml_tag_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        let Some(end) = after_open.find(&close) else { break };
        out.push(after_open[..end].to_string());
        rest = &after_open[end + close.len()..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(endpoint: &str) -> S3Backend {
        S3Backend::new(endpoint, "test-bucket", "us-east-1", "AKIDEXAMPLE", "secret", "app")
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/test-bucket/a/b.bin"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/test-bucket/a/b.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        let written = backend
            .write_file("a/b.bin", Box::pin(std::io::Cursor::new(b"hello".to_vec())))
            .await
            .unwrap();
        assert_eq!(written, 5);

        let mut reader = backend.read_file("a/b.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-bucket/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        let err = match backend.read_file("missing").await {
            Err(e) => e,
            Ok(_) => panic!("expected NotFound error"),
        };
        assert!(matches!(err, StorageBackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn health_check_probes_bucket_root() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/test-bucket"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn list_attr_paths_filters_to_sidecars_and_follows_pagination() {
        let server = MockServer::start().await;
        let page1 = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Contents><Key>2026/01/01/00/a.bin</Key></Contents>
  <Contents><Key>2026/01/01/00/a.bin.attr.json</Key></Contents>
  <NextContinuationToken>tok-1</NextContinuationToken>
</ListBucketResult>"#;
        let page2 = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Contents><Key>2026/01/02/00/b.bin.attr.json</Key></Contents>
</ListBucketResult>"#;

        Mock::given(method("GET"))
            .and(path("/test-bucket"))
            .and(wiremock::matchers::query_param("list-type", "2"))
            .and(wiremock::matchers::query_param_is_missing("continuation-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/test-bucket"))
            .and(wiremock::matchers::query_param("continuation-token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page2))
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        let mut paths = backend.list_attr_paths().await.unwrap();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "2026/01/01/00/a.bin.attr.json".to_string(),
                "2026/01/02/00/b.bin.attr.json".to_string(),
            ]
        );
    }

    #[test]
    fn extract_xml_tag_values_reads_each_occurrence() {
        let xml = "<a><Key>one</Key><Key>two</Key></a>";
        assert_eq!(extract_xml_tag_values(xml, "Key"), vec!["one".to_string(), "two".to_string()]);
        assert!(extract_xml_tag_values(xml, "NextContinuationToken").is_empty());
    }
}
