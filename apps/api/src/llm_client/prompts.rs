//! Prompts for the LLM grading backend.

pub const GRADING_SYSTEM: &str = "\
You are an expert resume reviewer and former ATS implementer. You grade \
resumes against job descriptions. You always respond with a single valid \
JSON object and nothing else: no prose, no markdown fences.";

/// Template placeholders: `{job_title}`, `{job_description}`, `{resume_json}`.
pub const GRADING_PROMPT_TEMPLATE: &str = r#"Grade the following resume against the job description.

Job title: {job_title}

Job description:
{job_description}

Structured resume (JSON, fields may be missing when not detected):
{resume_json}

Return a JSON object with exactly this shape:
{
  "ats": <integer 0-100, ATS parseability: standard sections, contact info, no layout artifacts>,
  "keyword": <integer 0-100, coverage of the job description's important terms>,
  "format": <integer 0-100, layout and scannability>,
  "overall": <integer 0-100, weighted composite where ats and keyword dominate>,
  "suggestions": [
    {
      "title": "<short imperative title>",
      "description": "<one or two sentences>",
      "example": "<optional concrete rewrite, or null>",
      "category": "<one of: achievements|keywords|formatting|experience|education|skills|general>"
    }
  ],
  "review": "<two to three paragraphs: strengths, gaps, and the single highest-leverage improvement>"
}

Order suggestions from highest to lowest leverage. Scores are estimates;
be consistent rather than generous."#;
