//! Grading — scores structured resume data against a job description and
//! produces prioritized suggestions plus a narrative review.
//!
//! Default: `HeuristicGrader` (pure-Rust, fast, deterministic, fully
//! testable). Optional: `LlmGrader` (semantic grading via Claude) selected
//! at startup via `ENABLE_LLM_GRADING`; its scores are approximate and may
//! vary run-to-run, which is documented behavior rather than a bug.
//!
//! `AppState` holds an `Arc<dyn ResumeGrader>`, so the orchestrator and
//! handlers never know which backend is live.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::llm_client::prompts::{GRADING_PROMPT_TEMPLATE, GRADING_SYSTEM};
use crate::llm_client::LlmClient;
use crate::models::evaluation::{
    GradingResult, ResumeData, Scores, Suggestion, SuggestionCategory,
};
use crate::pipeline::keywords::{extract_keywords, JdKeyword};

/// Composite weights. ATS compatibility and keyword match dominate because
/// they decide whether a resume survives automated screening at all.
const ATS_WEIGHT: f32 = 0.35;
const KEYWORD_WEIGHT: f32 = 0.40;
const FORMAT_WEIGHT: f32 = 0.25;

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Grading backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ResumeGrader: Send + Sync {
    async fn grade(
        &self,
        resume: &ResumeData,
        job_description: &str,
        job_title: &str,
    ) -> Result<GradingResult, GradeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// HeuristicGrader — deterministic default
// ────────────────────────────────────────────────────────────────────────────

pub struct HeuristicGrader;

#[async_trait]
impl ResumeGrader for HeuristicGrader {
    async fn grade(
        &self,
        resume: &ResumeData,
        job_description: &str,
        job_title: &str,
    ) -> Result<GradingResult, GradeError> {
        Ok(compute_heuristic_grade(resume, job_description, job_title))
    }
}

fn compute_heuristic_grade(
    resume: &ResumeData,
    job_description: &str,
    job_title: &str,
) -> GradingResult {
    let inventory = extract_keywords(job_description, job_title);
    let (keyword, missing_terms) = keyword_score(resume, &inventory);
    let ats = ats_score(resume);
    let format = format_score(&resume.raw_text);
    let overall = ((ats as f32 * ATS_WEIGHT)
        + (keyword as f32 * KEYWORD_WEIGHT)
        + (format as f32 * FORMAT_WEIGHT))
        .round()
        .clamp(0.0, 100.0) as u8;

    let scores = Scores {
        overall,
        ats,
        keyword,
        format,
    };
    let suggestions = build_suggestions(resume, &scores, &missing_terms);
    let review = build_review(resume, &scores, &missing_terms, job_title);

    GradingResult {
        scores,
        suggestions,
        review,
    }
}

/// Weighted coverage of the JD keyword inventory by the resume text.
/// Returns the 0–100 score and the highest-weight uncovered terms.
fn keyword_score(resume: &ResumeData, inventory: &[JdKeyword]) -> (u8, Vec<String>) {
    if inventory.is_empty() {
        // Nothing to match against; neutral rather than punitive.
        return (50, Vec::new());
    }

    let haystack = resume.raw_text.to_lowercase();
    let mut total = 0.0_f32;
    let mut covered = 0.0_f32;
    let mut missing = Vec::new();

    for keyword in inventory {
        total += keyword.weighted_score;
        if haystack.contains(&keyword.term) {
            covered += keyword.weighted_score;
        } else {
            missing.push(keyword.term.clone());
        }
    }

    let score = if total > 0.0 {
        ((covered / total) * 100.0).round() as u8
    } else {
        50
    };
    (score.min(100), missing)
}

/// Structural/ATS-compatibility heuristics: standard sections present,
/// machine-readable contact info, no glyph soup from tables or graphics.
fn ats_score(resume: &ResumeData) -> u8 {
    let mut score: i32 = 100;

    if resume.contact.email.is_none() {
        score -= 25;
    }
    if resume.contact.phone.is_none() {
        score -= 10;
    }
    if resume.contact.name.is_none() {
        score -= 5;
    }
    if resume.experience.is_empty() {
        score -= 20;
    }
    if resume.education.is_empty() {
        score -= 10;
    }
    if resume.skills.is_empty() {
        score -= 15;
    }
    if resume.raw_text.trim().chars().count() < 400 {
        score -= 15;
    }
    // Box-drawing and replacement characters are the residue of tables,
    // multi-column layouts, and images that break ATS parsers.
    let glyph_noise = resume
        .raw_text
        .chars()
        .filter(|c| ('\u{2500}'..='\u{257F}').contains(c) || *c == '\u{FFFD}')
        .count();
    if glyph_noise > 5 {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}

/// Layout heuristics over the raw text: line lengths, bullet usage,
/// shouting, and overall length.
fn format_score(raw_text: &str) -> u8 {
    let lines: Vec<&str> = raw_text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return 0;
    }

    let mut score: i32 = 70;

    let bullet_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with('-') || t.starts_with('•') || t.starts_with('*')
        })
        .count();
    if bullet_lines * 5 >= lines.len() {
        score += 15; // at least ~20% bulleted reads as scannable
    }

    let overlong = lines.iter().filter(|l| l.chars().count() > 120).count();
    if overlong * 4 >= lines.len() {
        score -= 15;
    }

    let shouting = lines
        .iter()
        .filter(|l| {
            let letters: Vec<char> = l.chars().filter(|c| c.is_alphabetic()).collect();
            letters.len() > 8 && letters.iter().all(|c| c.is_uppercase())
        })
        .count();
    if shouting > 2 {
        score -= 10;
    }

    let chars = raw_text.chars().count();
    if chars > 12_000 {
        score -= 10; // roughly past three pages
    } else if (1_000..=8_000).contains(&chars) {
        score += 15; // one to two dense pages
    }

    score.clamp(0, 100) as u8
}

/// Rule-driven suggestions, ordered by leverage. Priorities are assigned
/// after collection so the list is always 1..=n with no gaps.
fn build_suggestions(
    resume: &ResumeData,
    scores: &Scores,
    missing_terms: &[String],
) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if !missing_terms.is_empty() {
        let shortlist = missing_terms
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        suggestions.push(
            Suggestion::new(
                "Mirror the job description's key terms",
                format!(
                    "The job description emphasizes terms your resume never mentions: {shortlist}. \
                     Work the ones you genuinely have into your experience bullets and skills list."
                ),
                SuggestionCategory::Keywords,
            )
            .with_example(format!(
                "Skills: {}, ...",
                missing_terms.first().cloned().unwrap_or_default()
            )),
        );
    }

    if resume.contact.email.is_none() {
        suggestions.push(Suggestion::new(
            "Add a contact email",
            "No email address was detected. Screening systems discard resumes they cannot \
             route back to a candidate.",
            SuggestionCategory::Formatting,
        ));
    }

    if resume.experience.is_empty() {
        suggestions.push(Suggestion::new(
            "Add a clearly-labeled experience section",
            "No experience section was detected. Use a standard 'Experience' heading so \
             automated parsers can find your work history.",
            SuggestionCategory::Experience,
        ));
    } else if !resume
        .experience
        .iter()
        .any(|line| line.chars().any(|c| c.is_ascii_digit()))
    {
        suggestions.push(
            Suggestion::new(
                "Quantify your impact",
                "Your experience bullets carry no numbers. Metrics (throughput, cost, team \
                 size, percentages) are what reviewers scan for first.",
                SuggestionCategory::Achievements,
            )
            .with_example("Cut p99 latency 40% by moving session storage to Redis."),
        );
    }

    if resume.skills.is_empty() {
        suggestions.push(Suggestion::new(
            "Add a skills section",
            "No skills section was detected. A compact comma-separated skills list is the \
             cheapest way to satisfy keyword screens.",
            SuggestionCategory::Skills,
        ));
    }

    if resume.education.is_empty() {
        suggestions.push(Suggestion::new(
            "List your education",
            "No education section was detected. Even a single line avoids an automatic gap \
             in parsed profiles.",
            SuggestionCategory::Education,
        ));
    }

    if scores.format < 60 {
        suggestions.push(
            Suggestion::new(
                "Tighten the layout",
                "Long unbroken paragraphs and sparse bullet usage make the resume hard to \
                 scan. Favor one-line bullets under each role.",
                SuggestionCategory::Formatting,
            )
            .with_example("- Led migration of billing pipeline to Rust (3 engineers, 6 months)"),
        );
    }

    if suggestions.is_empty() {
        suggestions.push(Suggestion::new(
            "Tailor per application",
            "The resume covers this job description well. Keep tailoring the top third of \
             the document to each posting's exact vocabulary.",
            SuggestionCategory::General,
        ));
    }

    for (index, suggestion) in suggestions.iter_mut().enumerate() {
        suggestion.priority = (index + 1) as u8;
    }
    suggestions
}

fn build_review(
    resume: &ResumeData,
    scores: &Scores,
    missing_terms: &[String],
    job_title: &str,
) -> String {
    let mut strengths: Vec<&str> = Vec::new();
    if resume.contact.email.is_some() && resume.contact.phone.is_some() {
        strengths.push("complete contact information");
    }
    if !resume.experience.is_empty() {
        strengths.push("a detectable experience section");
    }
    if !resume.skills.is_empty() {
        strengths.push("an explicit skills list");
    }
    let strengths_sentence = if strengths.is_empty() {
        "Automated parsing found little recognizable structure to work with.".to_string()
    } else {
        format!("The resume presents {}.", join_with_and(&strengths))
    };

    let verdict = match scores.overall {
        80..=100 => "a strong match",
        60..=79 => "a credible match with clear gaps",
        40..=59 => "a partial match",
        _ => "a weak match as written",
    };

    let gap_sentence = if missing_terms.is_empty() {
        "Keyword coverage of the job description is essentially complete.".to_string()
    } else {
        format!(
            "The job description's vocabulary is only partially covered; the largest gaps are {}.",
            missing_terms
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    let leverage = if !missing_terms.is_empty() {
        format!(
            "The single highest-leverage change is weaving '{}' into the experience bullets \
             where it truthfully applies.",
            missing_terms[0]
        )
    } else if scores.format < scores.ats {
        "The single highest-leverage change is reformatting dense paragraphs into scannable \
         one-line bullets."
            .to_string()
    } else {
        "The single highest-leverage change is quantifying the top two or three \
         accomplishments with concrete metrics."
            .to_string()
    };

    format!(
        "Against the '{job_title}' description this resume is {verdict} \
         (overall {overall}/100, ATS {ats}, keyword {keyword}, format {format}).\n\n\
         {strengths_sentence} {gap_sentence}\n\n{leverage}",
        overall = scores.overall,
        ats = scores.ats,
        keyword = scores.keyword,
        format = scores.format,
    )
}

fn join_with_and(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => (*only).to_string(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LlmGrader — optional semantic backend
// ────────────────────────────────────────────────────────────────────────────

/// Semantic grader via Claude. Scores are approximate run-to-run; the
/// heuristic backend stays the default for reproducibility.
pub struct LlmGrader(pub LlmClient);

#[derive(Debug, Deserialize)]
struct LlmGrade {
    ats: u8,
    keyword: u8,
    format: u8,
    overall: u8,
    suggestions: Vec<LlmSuggestion>,
    review: String,
}

#[derive(Debug, Deserialize)]
struct LlmSuggestion {
    title: String,
    description: String,
    example: Option<String>,
    category: SuggestionCategory,
}

#[async_trait]
impl ResumeGrader for LlmGrader {
    async fn grade(
        &self,
        resume: &ResumeData,
        job_description: &str,
        job_title: &str,
    ) -> Result<GradingResult, GradeError> {
        let resume_json = serde_json::to_string(resume)
            .map_err(|e| GradeError::Backend(format!("resume serialization failed: {e}")))?;
        let prompt = GRADING_PROMPT_TEMPLATE
            .replace("{job_title}", job_title)
            .replace("{job_description}", job_description)
            .replace("{resume_json}", &resume_json);

        let grade: LlmGrade = self
            .0
            .call_json(&prompt, GRADING_SYSTEM)
            .await
            .map_err(|e| GradeError::Backend(e.to_string()))?;

        let suggestions = grade
            .suggestions
            .into_iter()
            .enumerate()
            .map(|(index, s)| Suggestion {
                id: Uuid::new_v4(),
                title: s.title,
                description: s.description,
                example: s.example,
                category: s.category,
                priority: (index + 1) as u8,
                status: "pending".to_string(),
            })
            .collect();

        Ok(GradingResult {
            scores: Scores {
                overall: grade.overall.min(100),
                ats: grade.ats.min(100),
                keyword: grade.keyword.min(100),
                format: grade.format.min(100),
            },
            suggestions,
            review: grade.review,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse::parse;

    const JD: &str = "\
We need a Rust engineer with PostgreSQL and Kubernetes experience to own \
our data pipelines. Rust is the core of our stack.";
    const TITLE: &str = "Rust Engineer";

    const STRONG_RESUME: &str = "\
Jane Doe
jane@example.com | +1 415-555-0133

Seasoned engineer who ships reliable data pipelines in Rust.

Experience
Senior Engineer, Initech (2019-2024)
- Rebuilt billing pipelines in Rust on Kubernetes, cutting costs 40%
- Scaled PostgreSQL ingest to 50k rows/sec

Education
B.S. Computer Science, State University

Skills
Rust, PostgreSQL, Kubernetes, AWS
";

    const WEAK_RESUME: &str = "\
anonymous candidate with some computer background and various interests
";

    #[test]
    fn test_scores_are_within_bounds() {
        let grade = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        for score in [
            grade.scores.overall,
            grade.scores.ats,
            grade.scores.keyword,
            grade.scores.format,
        ] {
            assert!(score <= 100);
        }
    }

    #[test]
    fn test_matching_resume_outscores_weak_resume() {
        let strong = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        let weak = compute_heuristic_grade(&parse(WEAK_RESUME), JD, TITLE);
        assert!(strong.scores.keyword > weak.scores.keyword);
        assert!(strong.scores.ats > weak.scores.ats);
        assert!(strong.scores.overall > weak.scores.overall);
    }

    #[test]
    fn test_grading_is_deterministic() {
        let a = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        let b = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        assert_eq!(a.scores, b.scores);
        assert_eq!(a.review, b.review);
        assert_eq!(a.suggestions.len(), b.suggestions.len());
    }

    #[test]
    fn test_suggestions_never_empty_and_priorities_sequential() {
        for resume in [STRONG_RESUME, WEAK_RESUME] {
            let grade = compute_heuristic_grade(&parse(resume), JD, TITLE);
            assert!(!grade.suggestions.is_empty());
            for (index, suggestion) in grade.suggestions.iter().enumerate() {
                assert_eq!(suggestion.priority, (index + 1) as u8);
                assert_eq!(suggestion.status, "pending");
            }
        }
    }

    #[test]
    fn test_missing_keywords_produce_keyword_suggestion() {
        let grade = compute_heuristic_grade(
            &parse("Jane Doe\njane@example.com\n\nExperience\nBarista, 2020\n"),
            JD,
            TITLE,
        );
        assert!(grade
            .suggestions
            .iter()
            .any(|s| s.category == SuggestionCategory::Keywords));
    }

    #[test]
    fn test_missing_metrics_produce_achievements_suggestion() {
        let resume = parse(
            "Jane Doe\njane@example.com\n\nExperience\n- Worked on the Rust billing system\n",
        );
        let grade = compute_heuristic_grade(&resume, JD, TITLE);
        let achievements = grade
            .suggestions
            .iter()
            .find(|s| s.category == SuggestionCategory::Achievements)
            .expect("expected an achievements suggestion");
        assert!(achievements.example.is_some());
    }

    #[test]
    fn test_review_mentions_title_and_overall_band() {
        let grade = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        assert!(grade.review.contains(TITLE));
        assert!(grade.review.contains(&grade.scores.overall.to_string()));
        // Multi-paragraph narrative.
        assert!(grade.review.matches("\n\n").count() >= 2);
    }

    #[test]
    fn test_overall_is_weighted_composite_not_average() {
        let grade = compute_heuristic_grade(&parse(STRONG_RESUME), JD, TITLE);
        let expected = (grade.scores.ats as f32 * ATS_WEIGHT
            + grade.scores.keyword as f32 * KEYWORD_WEIGHT
            + grade.scores.format as f32 * FORMAT_WEIGHT)
            .round() as u8;
        assert_eq!(grade.scores.overall, expected);
    }

    #[test]
    fn test_empty_inventory_scores_neutral_keyword() {
        let (score, missing) = keyword_score(&parse(STRONG_RESUME), &[]);
        assert_eq!(score, 50);
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_heuristic_grader_trait_object() {
        let grader: Box<dyn ResumeGrader> = Box::new(HeuristicGrader);
        let grade = grader.grade(&parse(STRONG_RESUME), JD, TITLE).await.unwrap();
        assert!(grade.scores.overall > 0);
    }
}
