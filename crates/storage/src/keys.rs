//! Blob key layout for job inputs, results and error reports.

use conduit_core::Resource;

/// `exports/<resource>/<resource>-<job_id>.<ext>`
pub fn export_key(resource: Resource, job_id: &str, ext: &str) -> String {
    format!("exports/{r}/{r}-{job_id}.{ext}", r = resource.as_str())
}

/// `imports/<resource>/<unix_ts>_<filename>`
pub fn import_key(resource: Resource, unix_ts: i64, filename: &str) -> String {
    format!("imports/{}/{}_{}", resource.as_str(), unix_ts, sanitize_filename(filename))
}

/// `errors/<job_id>.ndjson`
pub fn error_report_key(job_id: &str) -> String {
    format!("errors/{job_id}.ndjson")
}

/// Keep only the final path component and drop characters that would split
/// or escape the key.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned
    }
}
