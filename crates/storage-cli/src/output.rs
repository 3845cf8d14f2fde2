use serde_json::Value;

/// Pretty-print an arbitrary JSON response, used when the server shape
/// isn't worth a typed struct on the client side.
pub fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

/// Render a storage element's consistency report as human-readable text.
pub fn render_consistency_report(report: &Value) -> String {
    let mut out = String::new();
    let pct = report.get("consistency_pct").and_then(Value::as_f64).unwrap_or(0.0);
    out.push_str(&format!("Consistency: {:.2}%\n", pct));
    out.push_str(&format!(
        "Attribute sidecars: {}  Cache rows: {}  Expired: {}\n",
        report.get("attr_file_count").and_then(Value::as_u64).unwrap_or(0),
        report.get("cache_row_count").and_then(Value::as_u64).unwrap_or(0),
        report.get("expired_cache_entries").and_then(Value::as_u64).unwrap_or(0),
    ));

    let orphan_cache: Vec<&str> = report.get("orphan_cache_entries").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();
    if !orphan_cache.is_empty() {
        out.push_str(&format!("Orphan cache entries ({}):\n", orphan_cache.len()));
        for id in &orphan_cache {
            out.push_str(&format!("  {id}\n"));
        }
    }

    let orphan_attrs: Vec<&str> = report.get("orphan_attr_files").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();
    if !orphan_attrs.is_empty() {
        out.push_str(&format!("Orphan attribute files ({}):\n", orphan_attrs.len()));
        for path in &orphan_attrs {
            out.push_str(&format!("  {path}\n"));
        }
    }

    out
}

/// Render admin's GC run report (cleaned/enqueued/skipped counts plus any
/// per-item errors collected along the way).
pub fn render_gc_report(report: &Value) -> String {
    format!(
        "cleaned={} enqueued={} skipped_offline={} errors={}{}",
        report.get("cleaned").and_then(Value::as_u64).unwrap_or(0),
        report.get("enqueued").and_then(Value::as_u64).unwrap_or(0),
        report.get("skipped_offline").and_then(Value::as_u64).unwrap_or(0),
        report.get("errors").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0),
        render_errors(report),
    )
}

fn render_errors(report: &Value) -> String {
    let errors = report.get("errors").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>()).unwrap_or_default();
    if errors.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n");
    for e in &errors {
        out.push_str(&format!("  ! {e}\n"));
    }
    out
}

/// Render a storage element's capacity snapshot.
pub fn render_capacity(record: &Value) -> String {
    let total = record.get("total_bytes").and_then(Value::as_u64).unwrap_or(0);
    let used = record.get("used_bytes").and_then(Value::as_u64).unwrap_or(0);
    let free = total.saturating_sub(used);
    format!(
        "se_id={} mode={} priority={} used={used} total={total} free={free}",
        record.get("se_id").and_then(Value::as_str).unwrap_or("-"),
        record.get("mode").and_then(Value::as_str).unwrap_or("-"),
        record.get("priority").and_then(Value::as_u64).unwrap_or(0),
    )
}

/// Render a search result list as a simple table.
pub fn render_file_table(files: &[Value]) {
    if files.is_empty() {
        println!("No files.");
        return;
    }
    println!("{:<38} {:<38} {:<8}", "FILE_ID", "STORAGE_ELEMENT", "DELETED");
    println!("{}", "-".repeat(86));
    for f in files {
        println!(
            "{:<38} {:<38} {:<8}",
            f.get("file_id").and_then(Value::as_str).unwrap_or("-"),
            f.get("storage_element_id").and_then(Value::as_str).unwrap_or("-"),
            f.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        );
    }
}
