//! Artifact entity: an output produced by a completed job.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tessera_core::types::{JobId, Timestamp};

/// A row from the `artifacts` table. Artifacts cascade on job deletion.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Artifact {
    pub id: JobId,
    pub job_id: JobId,
    pub artifact_type: String,
    pub format: String,
    /// Path on the worker host that produced it.
    pub local_path: Option<String>,
    /// Public URL once the artifact is served.
    pub public_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: Option<i64>,
    pub metadata: serde_json::Value,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// An artifact as reported by a worker in its completion reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactReport {
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub file_size_bytes: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ArtifactReport {
    /// File format, defaulting by artifact type when the worker omits it.
    pub fn format_or_default(&self) -> &str {
        if let Some(format) = self.format.as_deref() {
            return format;
        }
        match self.artifact_type.as_str() {
            "image" => "png",
            "video" => "mp4",
            "audio" => "wav",
            _ => "txt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_format_defaults_by_type() {
        let report: ArtifactReport =
            serde_json::from_value(serde_json::json!({"type": "image", "path": "/o/1.png"}))
                .unwrap();
        assert_eq!(report.format_or_default(), "png");
    }

    #[test]
    fn report_explicit_format_wins() {
        let report: ArtifactReport =
            serde_json::from_value(serde_json::json!({"type": "image", "format": "webp"}))
                .unwrap();
        assert_eq!(report.format_or_default(), "webp");
    }
}
