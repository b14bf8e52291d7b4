//! Data model for one evaluation run: pipeline stages, status events,
//! structured resume data, grading output, and the persisted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Pipeline stages and event status
// ────────────────────────────────────────────────────────────────────────────

/// Pipeline stage names as they appear in status events.
///
/// Stages advance strictly forward; `Ocr` is the one optional sub-step,
/// entered at most once inside the parsability check, and only for PDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    ParsabilityCheck,
    Ocr,
    Parsing,
    Grading,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::ParsabilityCheck => "parsability_check",
            Stage::Ocr => "ocr",
            Stage::Parsing => "parsing",
            Stage::Grading => "grading",
            Stage::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-event status within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// The unit broadcast over the per-user realtime channel.
///
/// Immutable once emitted. Consumers rely on strictly forward `step`
/// transitions and monotonically non-decreasing `progress` within one
/// evaluation's stream. Only the terminal `completed` event carries the
/// full scores/suggestions/review payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub evaluation_id: Uuid,
    pub step: Stage,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn in_progress(
        evaluation_id: Uuid,
        step: Stage,
        progress: u8,
        details: impl Into<String>,
    ) -> Self {
        Self::bare(evaluation_id, step, StepStatus::InProgress, progress)
            .with_details(details.into())
    }

    pub fn completed(evaluation_id: Uuid, step: Stage, progress: u8) -> Self {
        Self::bare(evaluation_id, step, StepStatus::Completed, progress)
    }

    pub fn failed(evaluation_id: Uuid, step: Stage, progress: u8, error: impl Into<String>) -> Self {
        let mut event = Self::bare(evaluation_id, step, StepStatus::Failed, progress);
        event.error = Some(error.into());
        event
    }

    pub fn cancelled(evaluation_id: Uuid, step: Stage, progress: u8) -> Self {
        Self::bare(evaluation_id, step, StepStatus::Cancelled, progress)
    }

    /// Terminal success event carrying the full grading payload.
    pub fn terminal(evaluation_id: Uuid, result: &GradingResult) -> Self {
        let mut event = Self::bare(evaluation_id, Stage::Completed, StepStatus::Completed, 100);
        event.scores = Some(result.scores.clone());
        event.suggestions = Some(result.suggestions.clone());
        event.review = Some(result.review.clone());
        event
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn bare(evaluation_id: Uuid, step: Stage, status: StepStatus, progress: u8) -> Self {
        Self {
            evaluation_id,
            step,
            status,
            details: None,
            progress: Some(progress),
            scores: None,
            suggestions: None,
            review: None,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Structured resume data (parser output)
// ────────────────────────────────────────────────────────────────────────────

/// Contact fields pulled out of the resume text. Every field is optional:
/// "not found" is distinct from an empty string, and the grader must
/// tolerate any combination of absent fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub links: Vec<String>,
}

/// Best-effort structured parse of the resume. Sections the parser could
/// not detect stay empty rather than erroring out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeData {
    pub contact: ContactInfo,
    pub summary: Option<String>,
    pub experience: Vec<String>,
    pub education: Vec<String>,
    pub skills: Vec<String>,
    pub projects: Vec<String>,
    pub raw_text: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Grading output
// ────────────────────────────────────────────────────────────────────────────

/// The four dimension scores, each an integer 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: u8,
    pub ats: u8,
    pub keyword: u8,
    pub format: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Achievements,
    Keywords,
    Formatting,
    Experience,
    Education,
    Skills,
    General,
}

/// One prioritized improvement suggestion. `priority` 1 is highest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    pub category: SuggestionCategory,
    pub priority: u8,
    pub status: String,
}

impl Suggestion {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: SuggestionCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            example: None,
            category,
            priority: 0,
            status: "pending".to_string(),
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }
}

/// Full grader output: scores, ordered suggestions, and the narrative review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub scores: Scores,
    pub suggestions: Vec<Suggestion>,
    pub review: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline entry-point outcome
// ────────────────────────────────────────────────────────────────────────────

/// Structured result returned by the pipeline entry point. The caller always
/// gets one of these — never an unhandled error — and its content mirrors
/// the terminal status event seen by realtime subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_data: Option<ResumeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationOutcome {
    pub fn failure(evaluation_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            success: false,
            evaluation_id: Some(evaluation_id),
            file_id: None,
            file_url: None,
            resume_data: None,
            scores: None,
            suggestions: None,
            review: None,
            grading_id: None,
            error: Some(error.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Persisted rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GradingRow {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub user_id: Uuid,
    pub job_title: String,
    pub job_description: String,
    pub ats_score: i32,
    pub keyword_score: i32,
    pub format_score: i32,
    pub overall_score: i32,
    pub suggestions: Value,
    pub resume_json: Value,
    pub review: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub evaluation_id: Uuid,
    pub s3_key: String,
    pub url: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}
