use chrono::{DateTime, Utc};

/// Builds the `{YYYY}/{MM}/{DD}/{HH}/{storage_filename}` on-disk partition
/// path. A plain function rather than a type: the
/// partition is derived once, at create time, from the file's creation
/// timestamp and never recomputed.
pub fn partition_path(now: DateTime<Utc>, storage_filename: &str) -> String {
    format!("{}/{storage_filename}", now.format("%Y/%m/%d/%H"))
}

pub fn attr_path(storage_path: &str) -> String {
    format!("{storage_path}.attr.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_hour_bucketed_path() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 14, 0, 0).unwrap();
        let path = partition_path(ts, "report_alice_20260305T140000_abcdef0123456789abcdef0123456789.pdf");
        assert_eq!(
            path,
            "2026/03/05/14/report_alice_20260305T140000_abcdef0123456789abcdef0123456789.pdf"
        );
    }

    #[test]
    fn attr_path_appends_suffix() {
        assert_eq!(attr_path("2026/03/05/14/x.pdf"), "2026/03/05/14/x.pdf.attr.json");
    }
}
