//! Repository for the `artifacts` table.

use sqlx::{PgConnection, PgPool};
use tessera_core::types::JobId;
use uuid::Uuid;

use crate::models::artifact::{Artifact, ArtifactReport};

/// Column list for `artifacts` queries.
const COLUMNS: &str = "\
    id, job_id, artifact_type, format, local_path, public_url, \
    width, height, duration_seconds, file_size_bytes, metadata, \
    expires_at, created_at";

pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Persist one worker-reported artifact inside the completion
    /// transaction.
    pub async fn insert(
        conn: &mut PgConnection,
        job_id: JobId,
        report: &ArtifactReport,
    ) -> Result<Artifact, sqlx::Error> {
        let metadata = report
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        let query = format!(
            "INSERT INTO artifacts \
                 (id, job_id, artifact_type, format, local_path, public_url, \
                  width, height, duration_seconds, file_size_bytes, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Artifact>(&query)
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(&report.artifact_type)
            .bind(report.format_or_default())
            .bind(&report.path)
            .bind(&report.url)
            .bind(report.width)
            .bind(report.height)
            .bind(report.duration_seconds)
            .bind(report.file_size_bytes)
            .bind(metadata)
            .fetch_one(conn)
            .await
    }

    /// All artifacts produced by a job, oldest first.
    pub async fn list_by_job(pool: &PgPool, job_id: JobId) -> Result<Vec<Artifact>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM artifacts WHERE job_id = $1 ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Artifact>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
