use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::cli::RetentionArg;
use crate::output;

// ── Upload ────────────────────────────────────────────────────────────────────

pub async fn upload(
    path: PathBuf,
    ingester: String,
    original_name: Option<String>,
    uploaded_by: Option<String>,
    content_type: Option<String>,
    retention_policy: RetentionArg,
    token: Option<String>,
) -> Result<()> {
    let token = resolve_token(token)?;
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("upload.bin").to_string();
    let original_name = original_name.unwrap_or_else(|| file_name.clone());

    let retention = match retention_policy {
        RetentionArg::Permanent => "permanent",
        RetentionArg::Temporary => "temporary",
    };

    let mut form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
        .text("original_name", original_name)
        .text("retention_policy", retention.to_string());
    if let Some(u) = uploaded_by {
        form = form.text("uploaded_by", u);
    }
    if let Some(ct) = content_type {
        form = form.text("content_type", ct);
    }

    let base = ingester.trim_end_matches('/');
    let resp = authed_client(&token)
        .post(format!("{base}/api/v1/files/upload"))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("failed to reach ingester at {ingester}"))?;

    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        output::print_json(&body);
        anyhow::bail!("upload failed: {status}");
    }
    output::print_json(&body);
    Ok(())
}

// ── Finalize ──────────────────────────────────────────────────────────────────

pub async fn finalize(file_id: String, source_se: String, ingester: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = ingester.trim_end_matches('/');
    let resp = authed_client(&token)
        .post(format!("{base}/api/v1/finalize/{file_id}"))
        .json(&json!({ "source_se": source_se }))
        .send()
        .await
        .with_context(|| format!("failed to reach ingester at {ingester}"))?;

    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    output::print_json(&body);
    if !status.is_success() {
        anyhow::bail!("finalize failed: {status}");
    }
    Ok(())
}

pub async fn finalize_status(transaction_id: String, ingester: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = ingester.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .get(format!("{base}/api/v1/finalize/status/{transaction_id}"))
        .send()
        .await
        .with_context(|| format!("failed to reach ingester at {ingester}"))?
        .json()
        .await
        .context("failed to parse finalize status response")?;
    output::print_json(&body);
    Ok(())
}

// ── Capacity ──────────────────────────────────────────────────────────────────

pub async fn capacity(se: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = se.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .get(format!("{base}/api/v1/capacity"))
        .send()
        .await
        .with_context(|| format!("failed to reach storage element at {se}"))?
        .json()
        .await
        .context("failed to parse capacity response")?;
    println!("{}", output::render_capacity(&body));
    Ok(())
}

pub async fn available(admin: String, mode: Option<String>, min_free_bytes: Option<u64>, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = admin.trim_end_matches('/');
    let mut req = authed_client(&token).get(format!("{base}/api/v1/internal/storage-elements/available"));
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(m) = mode {
        query.push(("mode", m));
    }
    if let Some(b) = min_free_bytes {
        query.push(("min_free_bytes", b.to_string()));
    }
    req = req.query(&query);

    let resp = req.send().await.with_context(|| format!("failed to reach admin at {admin}"))?;
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        output::print_json(&body);
        anyhow::bail!("no storage elements available: {status}");
    }

    let ids: Vec<&str> = body.get("storage_elements").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();
    if ids.is_empty() {
        println!("No storage elements available.");
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(())
}

// ── Gc ────────────────────────────────────────────────────────────────────────

pub async fn gc_run(admin: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = admin.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .post(format!("{base}/api/v1/gc/run"))
        .send()
        .await
        .with_context(|| format!("failed to reach admin at {admin}"))?
        .json()
        .await
        .context("failed to parse gc run response")?;
    println!("{}", output::render_gc_report(&body));
    Ok(())
}

pub async fn gc_orphans(se_id: String, admin: String, file_ids_on_storage: Vec<String>, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = admin.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .post(format!("{base}/api/v1/gc/orphans/{se_id}"))
        .json(&json!({ "file_ids_on_storage": file_ids_on_storage }))
        .send()
        .await
        .with_context(|| format!("failed to reach admin at {admin}"))?
        .json()
        .await
        .context("failed to parse orphan check response")?;
    println!("{}", output::render_gc_report(&body));
    Ok(())
}

// ── Consistency ───────────────────────────────────────────────────────────────

pub async fn consistency_show(se: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = se.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .get(format!("{base}/api/v1/consistency"))
        .send()
        .await
        .with_context(|| format!("failed to reach storage element at {se}"))?
        .json()
        .await
        .context("failed to parse consistency report")?;
    print!("{}", output::render_consistency_report(&body));
    Ok(())
}

pub async fn consistency_rebuild(se: String, incremental: bool, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = se.trim_end_matches('/');
    let path = if incremental { "rebuild-incremental" } else { "rebuild-full" };
    let body: Value = authed_client(&token)
        .post(format!("{base}/api/v1/consistency/{path}"))
        .send()
        .await
        .with_context(|| format!("failed to reach storage element at {se}"))?
        .json()
        .await
        .context("failed to parse rebuild response")?;
    let rows = body.get("rows_affected").and_then(Value::as_u64).unwrap_or(0);
    println!("rebuilt {rows} cache row(s)");
    Ok(())
}

pub async fn consistency_cleanup_expired(se: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = se.trim_end_matches('/');
    let body: Value = authed_client(&token)
        .post(format!("{base}/api/v1/consistency/cleanup-expired"))
        .send()
        .await
        .with_context(|| format!("failed to reach storage element at {se}"))?
        .json()
        .await
        .context("failed to parse cleanup response")?;
    let rows = body.get("rows_affected").and_then(Value::as_u64).unwrap_or(0);
    println!("removed {rows} expired cache row(s)");
    Ok(())
}

// ── Query ─────────────────────────────────────────────────────────────────────

pub async fn query_get(file_id: String, query: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = query.trim_end_matches('/');
    let resp = authed_client(&token)
        .get(format!("{base}/api/v1/files/{file_id}"))
        .send()
        .await
        .with_context(|| format!("failed to reach query at {query}"))?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!("no file {file_id} in query's cache");
    }
    let body: Value = resp.json().await.context("failed to parse file view")?;
    output::print_json(&body);
    Ok(())
}

pub async fn query_search(storage_element_id: Option<String>, include_deleted: bool, query: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = query.trim_end_matches('/');
    let mut q: Vec<(&str, String)> = Vec::new();
    if let Some(se) = storage_element_id {
        q.push(("storage_element_id", se));
    }
    if include_deleted {
        q.push(("include_deleted", "true".to_string()));
    }

    let files: Vec<Value> = authed_client(&token)
        .get(format!("{base}/api/v1/files"))
        .query(&q)
        .send()
        .await
        .with_context(|| format!("failed to reach query at {query}"))?
        .json()
        .await
        .context("failed to parse search response")?;
    output::render_file_table(&files);
    Ok(())
}

pub async fn query_download(file_id: String, out: PathBuf, query: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let base = query.trim_end_matches('/');
    let resp = authed_client(&token)
        .get(format!("{base}/api/v1/files/{file_id}/download"))
        .send()
        .await
        .with_context(|| format!("failed to reach query at {query}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("download failed: {}", resp.status());
    }
    let bytes = resp.bytes().await.context("failed to read download body")?;
    write_file(&out, &bytes)?;
    println!("wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

// ── Token helpers ─────────────────────────────────────────────────────────────

/// Resolve the bearer token to use for API calls.
///
/// Priority: explicit value (from --token / STORAGE_TOKEN) → ~/.storage-cli/token
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path).map(|s| s.trim().to_string()).with_context(|| {
        format!(
            "No token provided and could not read token file at {}. Use --token, STORAGE_TOKEN, or write one there.",
            path.display()
        )
    })
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".storage-cli").join("token")
}

/// Build a reqwest Client with the Authorization header pre-configured.
fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(reqwest::header::AUTHORIZATION, reqwest::header::HeaderValue::from_str(&bearer).expect("token contains invalid header characters"));
    reqwest::Client::builder().default_headers(headers).build().expect("failed to build HTTP client")
}
