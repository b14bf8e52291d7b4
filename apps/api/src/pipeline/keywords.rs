//! Job-description keyword inventory.
//!
//! Pure-Rust, deterministic term extraction that feeds the keyword-match
//! dimension of grading: tokenize, drop stopwords, weight each term by
//! frequency and by where it appears (title terms count most, closing
//! boilerplate least).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Terms kept per job description; enough to cover real requirement lists
/// without letting boilerplate dominate.
const MAX_KEYWORDS: usize = 30;

const TITLE_WEIGHT: f32 = 1.0;
const LEAD_WEIGHT: f32 = 0.8;
const BODY_WEIGHT: f32 = 0.6;
const TAIL_WEIGHT: f32 = 0.3;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9][a-z0-9+#.\-]*").expect("valid token regex"));

static STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do", "for", "from",
    "has", "have", "in", "into", "is", "it", "its", "of", "on", "or", "our", "that", "the",
    "their", "them", "they", "this", "to", "we", "will", "with", "you", "your", "who", "what",
    "when", "where", "which", "than", "then", "these", "those", "not", "all", "any", "more",
    "other", "such", "also", "about", "across", "within", "using", "per", "plus", "etc",
    // JD boilerplate that says nothing about the candidate
    "team", "work", "working", "role", "job", "candidate", "ideal", "looking", "join",
    "opportunity", "company", "ability", "strong", "years", "year", "experience", "required",
    "preferred", "must", "should", "would", "including", "skills", "knowledge",
];

/// One weighted term from the job description.
#[derive(Debug, Clone, PartialEq)]
pub struct JdKeyword {
    pub term: String,
    pub frequency: u32,
    pub position_weight: f32,
    pub weighted_score: f32,
}

/// Extracts the weighted keyword inventory from a job description and title.
/// Deterministic: same inputs, same inventory, same order.
pub fn extract_keywords(job_description: &str, job_title: &str) -> Vec<JdKeyword> {
    let title_terms: Vec<String> = tokenize(job_title);

    let body_terms = tokenize(job_description);
    if body_terms.is_empty() && title_terms.is_empty() {
        return Vec::new();
    }

    // Position weight: the requirements usually live in the first third of
    // a JD, perks and EEO boilerplate in the last.
    let lead_end = body_terms.len() / 3;
    let tail_start = body_terms.len().saturating_sub(body_terms.len() / 3);

    let mut frequency: HashMap<String, u32> = HashMap::new();
    let mut weight: HashMap<String, f32> = HashMap::new();

    for (index, term) in body_terms.iter().enumerate() {
        *frequency.entry(term.clone()).or_insert(0) += 1;
        let positional = if index < lead_end {
            LEAD_WEIGHT
        } else if index >= tail_start {
            TAIL_WEIGHT
        } else {
            BODY_WEIGHT
        };
        let entry = weight.entry(term.clone()).or_insert(0.0);
        if positional > *entry {
            *entry = positional;
        }
    }

    for term in &title_terms {
        *frequency.entry(term.clone()).or_insert(0) += 1;
        weight.insert(term.clone(), TITLE_WEIGHT);
    }

    let mut keywords: Vec<JdKeyword> = frequency
        .into_iter()
        .map(|(term, frequency)| {
            let position_weight = weight.get(&term).copied().unwrap_or(BODY_WEIGHT);
            JdKeyword {
                weighted_score: frequency as f32 * position_weight,
                term,
                frequency,
                position_weight,
            }
        })
        .collect();

    // Stable order: score desc, then term for deterministic ties.
    keywords.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.term.cmp(&b.term))
    });
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().trim_matches('.').to_string())
        .filter(|t| t.len() >= 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}
