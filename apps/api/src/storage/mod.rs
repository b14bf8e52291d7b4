//! Persistence gateway — the two independent writes behind one seam:
//! raw files go to object storage (S3/MinIO), grading results go to
//! Postgres. The orchestrator only sees the trait, so tests run against an
//! in-memory fake and a grading-row hiccup can be handled as degraded
//! completion instead of discarding finished work.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::evaluation::{FileRow, GradingResult, GradingRow, ResumeData};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object storage unavailable: {0}")]
    Object(String),

    #[error("Database unavailable: {0}")]
    Database(String),
}

/// Location of a stored source document.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: Uuid,
    pub s3_key: String,
    pub url: String,
}

/// Everything needed to persist one completed grading.
#[derive(Debug, Clone)]
pub struct NewGrading {
    pub evaluation_id: Uuid,
    pub user_id: Uuid,
    pub job_title: String,
    pub job_description: String,
    pub resume: ResumeData,
    pub result: GradingResult,
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Persists the uploaded file during the `upload` stage. Failure here is
    /// a terminal stage failure — nothing else has run yet.
    async fn store_file(
        &self,
        user_id: Uuid,
        evaluation_id: Uuid,
        original_filename: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredFile, StorageError>;

    /// Persists the grading row after the `grading` stage. Failure here is
    /// surfaced as degraded completion, never as loss of the computed result.
    async fn store_grading(&self, grading: &NewGrading) -> Result<Uuid, StorageError>;

    /// Authoritative lookup once a terminal event has been observed.
    async fn load_grading(&self, evaluation_id: Uuid) -> Result<Option<GradingRow>, StorageError>;

    /// The stored source file for an evaluation, if the upload stage ran.
    async fn load_file(&self, evaluation_id: Uuid) -> Result<Option<FileRow>, StorageError>;
}

/// Production gateway: S3-compatible object storage plus Postgres.
pub struct S3PgGateway {
    db: PgPool,
    s3: S3Client,
    bucket: String,
    public_endpoint: String,
}

impl S3PgGateway {
    pub fn new(db: PgPool, s3: S3Client, bucket: String, public_endpoint: String) -> Self {
        Self {
            db,
            s3,
            bucket,
            public_endpoint,
        }
    }

}

fn object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
}

/// Object keys are unique per run: evaluation ids never repeat, so no two
/// pipeline runs ever write to the same key.
fn object_key(user_id: Uuid, evaluation_id: Uuid, file_id: Uuid, original_filename: &str) -> String {
    let safe_name: String = original_filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("resumes/{user_id}/{evaluation_id}/{file_id}-{safe_name}")
}

#[async_trait]
impl StorageGateway for S3PgGateway {
    async fn store_file(
        &self,
        user_id: Uuid,
        evaluation_id: Uuid,
        original_filename: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredFile, StorageError> {
        let file_id = Uuid::new_v4();
        let key = object_key(user_id, evaluation_id, file_id, original_filename);

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Object(format!("S3 upload failed: {e}")))?;

        let url = object_url(&self.public_endpoint, &self.bucket, &key);

        sqlx::query(
            r#"
            INSERT INTO resume_files
                (id, user_id, evaluation_id, s3_key, url, original_filename, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(file_id)
        .bind(user_id)
        .bind(evaluation_id)
        .bind(&key)
        .bind(&url)
        .bind(original_filename)
        .bind(bytes.len() as i64)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Stored resume file at s3://{}/{}", self.bucket, key);

        Ok(StoredFile { file_id, s3_key: key, url })
    }

    async fn store_grading(&self, grading: &NewGrading) -> Result<Uuid, StorageError> {
        let grading_id = Uuid::new_v4();

        let suggestions = serde_json::to_value(&grading.result.suggestions)
            .map_err(|e| StorageError::Database(format!("suggestion serialization: {e}")))?;
        let resume_json = serde_json::to_value(&grading.resume)
            .map_err(|e| StorageError::Database(format!("resume serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO gradings
                (id, evaluation_id, user_id, job_title, job_description,
                 ats_score, keyword_score, format_score, overall_score,
                 suggestions, resume_json, review, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(grading_id)
        .bind(grading.evaluation_id)
        .bind(grading.user_id)
        .bind(&grading.job_title)
        .bind(&grading.job_description)
        .bind(grading.result.scores.ats as i32)
        .bind(grading.result.scores.keyword as i32)
        .bind(grading.result.scores.format as i32)
        .bind(grading.result.scores.overall as i32)
        .bind(suggestions)
        .bind(resume_json)
        .bind(&grading.result.review)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!(
            "Stored grading {grading_id} for evaluation {}",
            grading.evaluation_id
        );

        Ok(grading_id)
    }

    async fn load_grading(&self, evaluation_id: Uuid) -> Result<Option<GradingRow>, StorageError> {
        sqlx::query_as::<_, GradingRow>("SELECT * FROM gradings WHERE evaluation_id = $1")
            .bind(evaluation_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn load_file(&self, evaluation_id: Uuid) -> Result<Option<FileRow>, StorageError> {
        sqlx::query_as::<_, FileRow>("SELECT * FROM resume_files WHERE evaluation_id = $1")
            .bind(evaluation_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}
