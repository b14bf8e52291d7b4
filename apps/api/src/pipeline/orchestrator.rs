//! Pipeline orchestrator — owns the end-to-end evaluation state machine:
//!
//! `upload` → `parsability_check` → (`ocr`) → `parsing` → `grading` →
//! `completed`, with any stage transitioning to `failed` instead and a
//! cancellation request honored at every stage boundary (`cancelled`).
//!
//! Each run is one self-contained sequential task keyed by a freshly
//! generated evaluation id: no two runs share state, storage keys, or
//! events. The orchestrator emits an `in_progress` event on stage entry and
//! a `completed`/`failed` event on exit via the injected broadcaster, keeps
//! progress monotonically non-decreasing, and converts every stage error
//! into a `failed` event plus a structured outcome — callers never see a
//! panic or a bare error.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::StatusBroadcaster;
use crate::models::evaluation::{EvaluationOutcome, Stage, StatusEvent};
use crate::pipeline::extract::{extract_direct, needs_ocr, ExtractionError, FileKind};
use crate::pipeline::grade::{GradeError, ResumeGrader};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::parse::parse;
use crate::pipeline::validate::{validate, ValidationError};
use crate::storage::{NewGrading, StorageError, StorageGateway};

/// OCR runs per process at any one time. OCR is the heaviest stage; the
/// bound keeps a burst of scanned uploads from starving everything else.
const MAX_CONCURRENT_OCR: usize = 2;

// Progress checkpoints per stage, non-decreasing across the run.
const PROGRESS_UPLOAD: (u8, u8) = (5, 20);
const PROGRESS_PARSABILITY: (u8, u8) = (30, 60);
const PROGRESS_OCR: (u8, u8) = (40, 55);
const PROGRESS_PARSING: (u8, u8) = (65, 75);
const PROGRESS_GRADING: (u8, u8) = (80, 95);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Grading(#[from] GradeError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("The {stage} stage timed out after {seconds}s")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("Evaluation was cancelled")]
    Cancelled,

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

/// Highest progress value emitted so far for one run. Failure and
/// cancellation events are clamped to this floor, so a stream stays
/// monotonic even when a stage fails after a completed sub-step already
/// reported higher progress (OCR finishing, then yielding nothing).
struct ProgressFloor(AtomicU8);

impl ProgressFloor {
    fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    fn record(&self, progress: u8) {
        self.0.fetch_max(progress, Ordering::Relaxed);
    }

    fn clamp(&self, progress: u8) -> u8 {
        progress.max(self.0.load(Ordering::Relaxed))
    }
}

/// Pipeline tunables, lifted out of `Config` so tests can set their own.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_file_size_bytes: usize,
    pub min_parsable_chars: usize,
    pub stage_timeout: Duration,
}

/// One evaluation request as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub file_bytes: Bytes,
    pub file_name: String,
    pub user_id: Uuid,
    pub job_description: String,
    pub job_title: String,
}

pub struct Orchestrator {
    gateway: Arc<dyn StorageGateway>,
    broadcaster: Arc<StatusBroadcaster>,
    ocr: Arc<dyn OcrEngine>,
    grader: Arc<dyn ResumeGrader>,
    settings: PipelineSettings,
    ocr_permits: Semaphore,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        broadcaster: Arc<StatusBroadcaster>,
        ocr: Arc<dyn OcrEngine>,
        grader: Arc<dyn ResumeGrader>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gateway,
            broadcaster,
            ocr,
            grader,
            settings,
            ocr_permits: Semaphore::new(MAX_CONCURRENT_OCR),
        }
    }

    /// Pipeline entry point: runs one evaluation to a terminal state and
    /// returns the structured outcome. The same terminal information is
    /// broadcast to realtime subscribers, so both views stay consistent.
    pub async fn run(&self, request: EvaluationRequest) -> EvaluationOutcome {
        let evaluation_id = Uuid::new_v4();
        info!(
            %evaluation_id,
            user_id = %request.user_id,
            file = %request.file_name,
            "Starting resume evaluation"
        );

        let cancel = self
            .broadcaster
            .register_cancel(evaluation_id, request.user_id)
            .await;
        let floor = ProgressFloor::new();
        let outcome = match self.drive(evaluation_id, &request, &cancel, &floor).await {
            Ok(outcome) => outcome,
            Err((stage, PipelineError::Cancelled)) => {
                info!(%evaluation_id, %stage, "Evaluation cancelled");
                self.broadcaster
                    .emit(
                        request.user_id,
                        StatusEvent::cancelled(
                            evaluation_id,
                            stage,
                            floor.clamp(entry_progress(stage)),
                        ),
                    )
                    .await;
                EvaluationOutcome::failure(evaluation_id, "Evaluation was cancelled")
            }
            Err((stage, error)) => {
                warn!(%evaluation_id, %stage, %error, "Evaluation failed");
                self.broadcaster
                    .emit(
                        request.user_id,
                        StatusEvent::failed(
                            evaluation_id,
                            stage,
                            floor.clamp(entry_progress(stage)),
                            error.to_string(),
                        ),
                    )
                    .await;
                EvaluationOutcome::failure(evaluation_id, error.to_string())
            }
        };
        self.broadcaster.clear_cancel(evaluation_id).await;
        outcome
    }

    async fn drive(
        &self,
        evaluation_id: Uuid,
        request: &EvaluationRequest,
        cancel: &watch::Receiver<bool>,
        floor: &ProgressFloor,
    ) -> Result<EvaluationOutcome, (Stage, PipelineError)> {
        let user_id = request.user_id;

        // ── upload: validate, then persist the source file ──────────────
        // Validation runs before the stage-entry event so that an invalid
        // request produces exactly one event: upload:failed.
        let kind = validate(
            &request.file_bytes,
            &request.file_name,
            &request.job_description,
            &request.job_title,
            self.settings.max_file_size_bytes,
        )
        .map_err(|e| (Stage::Upload, e.into()))?;

        self.emit(
            user_id,
            StatusEvent::in_progress(
                evaluation_id,
                Stage::Upload,
                PROGRESS_UPLOAD.0,
                "Validating and storing the uploaded resume",
            ),
            floor,
        )
        .await;

        let stored = timeout(
            self.settings.stage_timeout,
            self.gateway.store_file(
                user_id,
                evaluation_id,
                &request.file_name,
                &request.file_bytes,
                kind.mime(),
            ),
        )
        .await
        .map_err(|_| (Stage::Upload, self.timeout_error(Stage::Upload)))?
        .map_err(|e| (Stage::Upload, e.into()))?;

        self.emit(
            user_id,
            StatusEvent::completed(evaluation_id, Stage::Upload, PROGRESS_UPLOAD.1),
            floor,
        )
        .await;

        // ── parsability_check: direct text layer, OCR sub-step if needed ─
        ensure_not_cancelled(cancel, Stage::ParsabilityCheck)?;
        self.emit(
            user_id,
            StatusEvent::in_progress(
                evaluation_id,
                Stage::ParsabilityCheck,
                PROGRESS_PARSABILITY.0,
                "Checking whether the document has a readable text layer",
            ),
            floor,
        )
        .await;

        let text = self
            .extract_text(evaluation_id, request, kind, cancel, floor)
            .await?;

        self.emit(
            user_id,
            StatusEvent::completed(evaluation_id, Stage::ParsabilityCheck, PROGRESS_PARSABILITY.1)
                .with_details(format!("{} characters of text extracted", text.trim().len())),
            floor,
        )
        .await;

        // ── parsing: best-effort structure extraction ────────────────────
        ensure_not_cancelled(cancel, Stage::Parsing)?;
        self.emit(
            user_id,
            StatusEvent::in_progress(
                evaluation_id,
                Stage::Parsing,
                PROGRESS_PARSING.0,
                "Parsing resume structure",
            ),
            floor,
        )
        .await;

        let parsed = spawn_blocking(move || parse(&text))
            .await
            .map_err(|e| (Stage::Parsing, PipelineError::Internal(e.to_string())))?;

        self.emit(
            user_id,
            StatusEvent::completed(evaluation_id, Stage::Parsing, PROGRESS_PARSING.1)
                .with_details(format!(
                    "{} experience, {} education, {} skill entries detected",
                    parsed.experience.len(),
                    parsed.education.len(),
                    parsed.skills.len()
                )),
            floor,
        )
        .await;

        // ── grading: score, then persist (degraded completion on failure) ─
        ensure_not_cancelled(cancel, Stage::Grading)?;
        self.emit(
            user_id,
            StatusEvent::in_progress(
                evaluation_id,
                Stage::Grading,
                PROGRESS_GRADING.0,
                "Scoring the resume against the job description",
            ),
            floor,
        )
        .await;

        let result = timeout(
            self.settings.stage_timeout,
            self.grader
                .grade(&parsed, &request.job_description, &request.job_title),
        )
        .await
        .map_err(|_| (Stage::Grading, self.timeout_error(Stage::Grading)))?
        .map_err(|e| (Stage::Grading, e.into()))?;

        let grading = NewGrading {
            evaluation_id,
            user_id,
            job_title: request.job_title.clone(),
            job_description: request.job_description.clone(),
            resume: parsed.clone(),
            result: result.clone(),
        };

        // A storage hiccup here must not discard finished grading work:
        // return the computed result and report persistence separately.
        let (grading_id, persistence_note) = match self.gateway.store_grading(&grading).await {
            Ok(id) => (Some(id), None),
            Err(e) => {
                warn!(%evaluation_id, error = %e, "Grading result could not be persisted");
                (
                    None,
                    Some(
                        "Grading completed, but the result could not be persisted and may \
                         not appear in your history"
                            .to_string(),
                    ),
                )
            }
        };

        let mut grading_done =
            StatusEvent::completed(evaluation_id, Stage::Grading, PROGRESS_GRADING.1);
        if let Some(note) = &persistence_note {
            grading_done = grading_done.with_details(note.clone());
        }
        self.emit(user_id, grading_done, floor).await;

        // ── completed: terminal event carries the full payload ──────────
        self.emit(user_id, StatusEvent::terminal(evaluation_id, &result), floor)
            .await;
        info!(%evaluation_id, overall = result.scores.overall, "Evaluation completed");

        Ok(EvaluationOutcome {
            success: true,
            evaluation_id: Some(evaluation_id),
            file_id: Some(stored.file_id),
            file_url: Some(stored.url),
            resume_data: Some(parsed),
            scores: Some(result.scores),
            suggestions: Some(result.suggestions),
            review: Some(result.review),
            grading_id,
            error: persistence_note,
        })
    }

    /// Direct extraction with the single OCR retry for scanned PDFs.
    async fn extract_text(
        &self,
        evaluation_id: Uuid,
        request: &EvaluationRequest,
        kind: FileKind,
        cancel: &watch::Receiver<bool>,
        floor: &ProgressFloor,
    ) -> Result<String, (Stage, PipelineError)> {
        let user_id = request.user_id;
        let bytes = request.file_bytes.clone();

        let direct = timeout(
            self.settings.stage_timeout,
            spawn_blocking(move || extract_direct(&bytes, kind)),
        )
        .await
        .map_err(|_| {
            (
                Stage::ParsabilityCheck,
                self.timeout_error(Stage::ParsabilityCheck),
            )
        })?
        .map_err(|e| {
            (
                Stage::ParsabilityCheck,
                PipelineError::Internal(e.to_string()),
            )
        })?;

        let mut text = match direct {
            Ok(text) => text,
            // A PDF with no readable text layer is the scanned-document
            // case; let the OCR pass decide instead of failing here.
            Err(e) if kind == FileKind::Pdf => {
                warn!(%evaluation_id, error = %e, "PDF text layer unreadable, treating as scanned");
                String::new()
            }
            Err(e) => return Err((Stage::ParsabilityCheck, e.into())),
        };

        if needs_ocr(kind, &text, self.settings.min_parsable_chars) {
            ensure_not_cancelled(cancel, Stage::Ocr)?;
            self.emit(
                user_id,
                StatusEvent::in_progress(
                    evaluation_id,
                    Stage::Ocr,
                    PROGRESS_OCR.0,
                    "Scanned document detected; running character recognition",
                ),
                floor,
            )
            .await;

            let _permit = self
                .ocr_permits
                .acquire()
                .await
                .map_err(|e| (Stage::Ocr, PipelineError::Internal(e.to_string())))?;

            text = timeout(
                self.settings.stage_timeout,
                self.ocr.recognize(&request.file_bytes),
            )
            .await
            .map_err(|_| (Stage::Ocr, self.timeout_error(Stage::Ocr)))?
            .map_err(|e| (Stage::Ocr, e.into()))?;

            self.emit(
                user_id,
                StatusEvent::completed(evaluation_id, Stage::Ocr, PROGRESS_OCR.1)
                    .with_details(format!("{} characters recognized", text.trim().len())),
                floor,
            )
            .await;
        }

        if text.trim().is_empty() {
            return Err((
                Stage::ParsabilityCheck,
                ExtractionError::ExtractionEmpty.into(),
            ));
        }
        Ok(text)
    }

    fn timeout_error(&self, stage: Stage) -> PipelineError {
        PipelineError::Timeout {
            stage,
            seconds: self.settings.stage_timeout.as_secs(),
        }
    }

    async fn emit(&self, user_id: Uuid, event: StatusEvent, floor: &ProgressFloor) {
        if let Some(progress) = event.progress {
            floor.record(progress);
        }
        self.broadcaster.emit(user_id, event).await;
    }
}

fn ensure_not_cancelled(
    cancel: &watch::Receiver<bool>,
    stage: Stage,
) -> Result<(), (Stage, PipelineError)> {
    if *cancel.borrow() {
        Err((stage, PipelineError::Cancelled))
    } else {
        Ok(())
    }
}

fn entry_progress(stage: Stage) -> u8 {
    match stage {
        Stage::Upload => PROGRESS_UPLOAD.0,
        Stage::ParsabilityCheck => PROGRESS_PARSABILITY.0,
        Stage::Ocr => PROGRESS_OCR.0,
        Stage::Parsing => PROGRESS_PARSING.0,
        Stage::Grading => PROGRESS_GRADING.0,
        Stage::Completed => 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::models::evaluation::{GradingRow, StepStatus};
    use crate::pipeline::grade::HeuristicGrader;
    use crate::pipeline::ocr::DisabledOcr;
    use crate::storage::StoredFile;

    const RESUME_TXT: &str = "\
Jane Doe
jane@example.com | +1 415-555-0133

Experienced engineer who builds reliable data pipelines in Rust.

Experience
Senior Engineer, Initech (2019-2024)
- Rebuilt billing pipelines in Rust on Kubernetes, cutting costs 40%

Education
B.S. Computer Science, State University

Skills
Rust, PostgreSQL, Kubernetes
";
    const JD: &str = "We need a Rust engineer with PostgreSQL and Kubernetes experience.";
    const TITLE: &str = "Rust Engineer";

    // ── test doubles ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeGateway {
        fail_file: bool,
        fail_grading: bool,
        file_delay: Option<Duration>,
        files: Mutex<Vec<Uuid>>,
        gradings: Mutex<Vec<NewGrading>>,
    }

    #[async_trait]
    impl StorageGateway for FakeGateway {
        async fn store_file(
            &self,
            _user_id: Uuid,
            evaluation_id: Uuid,
            _original_filename: &str,
            _bytes: &[u8],
            _content_type: &str,
        ) -> Result<StoredFile, StorageError> {
            if let Some(delay) = self.file_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_file {
                return Err(StorageError::Object("bucket offline".to_string()));
            }
            self.files.lock().unwrap().push(evaluation_id);
            let file_id = Uuid::new_v4();
            Ok(StoredFile {
                file_id,
                s3_key: format!("resumes/{evaluation_id}/{file_id}"),
                url: format!("http://storage.test/{file_id}"),
            })
        }

        async fn store_grading(&self, grading: &NewGrading) -> Result<Uuid, StorageError> {
            if self.fail_grading {
                return Err(StorageError::Database("connection refused".to_string()));
            }
            self.gradings.lock().unwrap().push(grading.clone());
            Ok(Uuid::new_v4())
        }

        async fn load_grading(
            &self,
            _evaluation_id: Uuid,
        ) -> Result<Option<GradingRow>, StorageError> {
            Ok(None)
        }

        async fn load_file(
            &self,
            _evaluation_id: Uuid,
        ) -> Result<Option<crate::models::evaluation::FileRow>, StorageError> {
            Ok(None)
        }
    }

    struct FakeOcr {
        text: &'static str,
    }

    #[async_trait]
    impl crate::pipeline::ocr::OcrEngine for FakeOcr {
        async fn recognize(&self, _pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
            Ok(self.text.to_string())
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            max_file_size_bytes: 10 * 1024 * 1024,
            min_parsable_chars: 120,
            stage_timeout: Duration::from_secs(5),
        }
    }

    fn orchestrator_with(
        gateway: Arc<FakeGateway>,
        ocr: Arc<dyn OcrEngine>,
    ) -> (Orchestrator, Arc<StatusBroadcaster>) {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let orchestrator = Orchestrator::new(
            gateway,
            broadcaster.clone(),
            ocr,
            Arc::new(HeuristicGrader),
            settings(),
        );
        (orchestrator, broadcaster)
    }

    fn request(file_name: &str, bytes: &[u8]) -> EvaluationRequest {
        EvaluationRequest {
            file_bytes: Bytes::copy_from_slice(bytes),
            file_name: file_name.to_string(),
            user_id: Uuid::new_v4(),
            job_description: JD.to_string(),
            job_title: TITLE.to_string(),
        }
    }

    async fn drain(
        rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>,
    ) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── happy path ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_txt_evaluation_succeeds_with_ordered_events() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, broadcaster) = orchestrator_with(gateway.clone(), Arc::new(DisabledOcr));

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(outcome.grading_id.is_some());
        assert!(outcome.file_url.is_some());
        let scores = outcome.scores.unwrap();
        assert!(scores.overall <= 100);
        assert!(!outcome.suggestions.unwrap().is_empty());

        let events = drain(&mut rx).await;
        let steps: Vec<(Stage, StepStatus)> =
            events.iter().map(|e| (e.step, e.status)).collect();
        assert_eq!(
            steps,
            vec![
                (Stage::Upload, StepStatus::InProgress),
                (Stage::Upload, StepStatus::Completed),
                (Stage::ParsabilityCheck, StepStatus::InProgress),
                (Stage::ParsabilityCheck, StepStatus::Completed),
                (Stage::Parsing, StepStatus::InProgress),
                (Stage::Parsing, StepStatus::Completed),
                (Stage::Grading, StepStatus::InProgress),
                (Stage::Grading, StepStatus::Completed),
                (Stage::Completed, StepStatus::Completed),
            ]
        );

        // Progress never decreases and ends at 100.
        let progress: Vec<u8> = events.iter().filter_map(|e| e.progress).collect();
        assert!(progress.windows(2).all(|p| p[0] <= p[1]));
        assert_eq!(*progress.last().unwrap(), 100);

        // Terminal event carries the payload; only one grading was stored.
        let terminal = events.last().unwrap();
        assert!(terminal.scores.is_some());
        assert!(terminal.review.is_some());
        assert_eq!(gateway.gradings.lock().unwrap().len(), 1);
    }

    // ── validation failures ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_job_description_emits_only_upload_failed() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, broadcaster) = orchestrator_with(gateway.clone(), Arc::new(DisabledOcr));

        let mut request = request("resume.txt", RESUME_TXT.as_bytes());
        request.job_description = "   ".to_string();
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(!outcome.success);
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .contains("Job description is required"));

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step, Stage::Upload);
        assert_eq!(events[0].status, StepStatus::Failed);
        // Nothing ran: no file stored, no grading stored.
        assert!(gateway.files.lock().unwrap().is_empty());
        assert!(gateway.gradings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_fails_validation() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, _) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let outcome = orchestrator.run(request("resume.txt", b"")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("empty or invalid"));
    }

    #[tokio::test]
    async fn test_oversized_file_fails_validation() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, _) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let bytes = vec![b'a'; 10 * 1024 * 1024 + 1];
        let outcome = orchestrator.run(request("resume.txt", &bytes)).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("File size"));
    }

    #[tokio::test]
    async fn test_disallowed_extension_fails_validation() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, _) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let outcome = orchestrator.run(request("malware.exe", b"MZ")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("Invalid file type"));
    }

    // ── OCR fallback ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_scanned_pdf_runs_exactly_one_ocr_step() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, broadcaster) = orchestrator_with(
            gateway,
            Arc::new(FakeOcr { text: RESUME_TXT }),
        );

        // Garbage bytes: no text layer, which is exactly the scanned case.
        let request = request("scan.pdf", b"%PDF-1.4 scanned image only");
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(outcome.success);
        assert!(!outcome.resume_data.unwrap().raw_text.trim().is_empty());

        let events = drain(&mut rx).await;
        let ocr_starts = events
            .iter()
            .filter(|e| e.step == Stage::Ocr && e.status == StepStatus::InProgress)
            .count();
        assert_eq!(ocr_starts, 1);

        // OCR events sit between parsability_check start and parsing start.
        let steps: Vec<Stage> = events.iter().map(|e| e.step).collect();
        let parsability = steps
            .iter()
            .position(|s| *s == Stage::ParsabilityCheck)
            .unwrap();
        let ocr = steps.iter().position(|s| *s == Stage::Ocr).unwrap();
        let parsing = steps.iter().position(|s| *s == Stage::Parsing).unwrap();
        assert!(parsability < ocr && ocr < parsing);
    }

    #[tokio::test]
    async fn test_ocr_yielding_nothing_fails_parsability_check() {
        let gateway = Arc::new(FakeGateway::default());
        let (orchestrator, broadcaster) =
            orchestrator_with(gateway.clone(), Arc::new(FakeOcr { text: "  " }));

        let request = request("scan.pdf", b"%PDF-1.4 scanned image only");
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("unreadable or corrupt"));

        let events = drain(&mut rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.step, Stage::ParsabilityCheck);
        assert_eq!(last.status, StepStatus::Failed);
        // The OCR sub-step completed at 55 before the failure, so the
        // failed event must not drop back to the stage-entry value.
        assert_eq!(last.progress, Some(PROGRESS_OCR.1));
        let progress: Vec<u8> = events.iter().filter_map(|e| e.progress).collect();
        assert!(progress.windows(2).all(|p| p[0] <= p[1]));
        // A failed run persists no grading record.
        assert!(gateway.gradings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_txt_never_triggers_ocr() {
        let gateway = Arc::new(FakeGateway::default());
        // DisabledOcr would error if invoked, so success proves it was not.
        let (orchestrator, broadcaster) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(outcome.success);
        assert!(drain(&mut rx).await.iter().all(|e| e.step != Stage::Ocr));
    }

    // ── storage behavior ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_file_storage_failure_fails_upload_stage() {
        let gateway = Arc::new(FakeGateway {
            fail_file: true,
            ..FakeGateway::default()
        });
        let (orchestrator, broadcaster) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(!outcome.success);

        let events = drain(&mut rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.step, Stage::Upload);
        assert_eq!(last.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_grading_persistence_failure_degrades_but_keeps_result() {
        let gateway = Arc::new(FakeGateway {
            fail_grading: true,
            ..FakeGateway::default()
        });
        let (orchestrator, broadcaster) = orchestrator_with(gateway, Arc::new(DisabledOcr));

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        // Completed grading work is not discarded over a storage hiccup.
        assert!(outcome.success);
        assert!(outcome.scores.is_some());
        assert!(outcome.review.is_some());
        assert!(outcome.grading_id.is_none());
        assert!(outcome.error.as_deref().unwrap().contains("persisted"));

        let events = drain(&mut rx).await;
        let terminal = events.last().unwrap();
        assert_eq!(terminal.step, Stage::Completed);
        assert_eq!(terminal.status, StepStatus::Completed);
    }

    // ── cancellation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cancel_during_upload_stops_before_next_stage() {
        let gateway = Arc::new(FakeGateway {
            file_delay: Some(Duration::from_millis(250)),
            ..FakeGateway::default()
        });
        let (orchestrator, broadcaster) = orchestrator_with(gateway.clone(), Arc::new(DisabledOcr));

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let user_id = request.user_id;
        let mut rx = broadcaster.subscribe(user_id).await;

        let broadcaster_for_cancel = broadcaster.clone();
        let run = tokio::spawn(async move { orchestrator.run(request).await });

        // Cancel as soon as the first event reveals the evaluation id.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.step, Stage::Upload);
        assert!(
            broadcaster_for_cancel
                .request_cancel(first.evaluation_id, user_id)
                .await
        );

        let outcome = run.await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("cancelled"));

        let events = drain(&mut rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.status, StepStatus::Cancelled);
        // No stage after the cancellation point ran.
        assert!(events.iter().all(|e| e.step != Stage::Parsing));
        assert!(gateway.gradings.lock().unwrap().is_empty());
    }

    // ── isolation ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_concurrent_evaluations_do_not_interleave_content() {
        let gateway = Arc::new(FakeGateway::default());
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let orchestrator = Arc::new(Orchestrator::new(
            gateway,
            broadcaster.clone(),
            Arc::new(DisabledOcr),
            Arc::new(HeuristicGrader),
            settings(),
        ));

        let user_id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(user_id).await;

        let mut strong = request("strong.txt", RESUME_TXT.as_bytes());
        strong.user_id = user_id;
        let mut weak = request("weak.txt", b"bare minimum resume text with no relevant terms");
        weak.user_id = user_id;

        let (a, b) = tokio::join!(
            orchestrator.run(strong),
            orchestrator.run(weak)
        );
        assert!(a.success && b.success);
        assert_ne!(a.evaluation_id, b.evaluation_id);
        // No cross-contamination of computed content.
        assert!(a.scores.unwrap().keyword > b.scores.unwrap().keyword);

        // Per-evaluation event streams are each well-ordered.
        let events = drain(&mut rx).await;
        for outcome in [&a, &b] {
            let id = outcome.evaluation_id.unwrap();
            let mine: Vec<&StatusEvent> =
                events.iter().filter(|e| e.evaluation_id == id).collect();
            assert_eq!(mine.first().unwrap().step, Stage::Upload);
            assert_eq!(mine.last().unwrap().step, Stage::Completed);
            let progress: Vec<u8> = mine.iter().filter_map(|e| e.progress).collect();
            assert!(progress.windows(2).all(|p| p[0] <= p[1]));
        }
    }

    #[tokio::test]
    async fn test_grading_timeout_fails_the_grading_stage() {
        struct SlowGrader;

        #[async_trait]
        impl ResumeGrader for SlowGrader {
            async fn grade(
                &self,
                _resume: &crate::models::evaluation::ResumeData,
                _job_description: &str,
                _job_title: &str,
            ) -> Result<crate::models::evaluation::GradingResult, GradeError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("grader should have been timed out")
            }
        }

        let broadcaster = Arc::new(StatusBroadcaster::new());
        let orchestrator = Orchestrator::new(
            Arc::new(FakeGateway::default()),
            broadcaster.clone(),
            Arc::new(DisabledOcr),
            Arc::new(SlowGrader),
            PipelineSettings {
                stage_timeout: Duration::from_millis(50),
                ..settings()
            },
        );

        let request = request("resume.txt", RESUME_TXT.as_bytes());
        let mut rx = broadcaster.subscribe(request.user_id).await;

        let outcome = orchestrator.run(request).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));

        let events = drain(&mut rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.step, Stage::Grading);
        assert_eq!(last.status, StepStatus::Failed);
    }
}
