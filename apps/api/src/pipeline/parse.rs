//! Best-effort resume parser: contact fields via pattern matching, body
//! sections via heading detection.
//!
//! This stage never fails hard. A section the heuristics cannot find stays
//! an empty collection and an absent contact field stays `None`, so the
//! grader (and tests) can tell "not found" from "empty string".

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::evaluation::{ContactInfo, ResumeData};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ .\-]?)?(?:\(\d{2,4}\)[ .\-]?)?\d{3}[ .\-]?\d{3,4}[ .\-]?\d{0,4}")
        .expect("valid phone regex")
});

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?://|www\.)[^\s|,;)]+|(?:linkedin\.com|github\.com)/[^\s|,;)]+")
        .expect("valid link regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Experience,
    Education,
    Skills,
    Projects,
}

/// Parses extracted plain text into structured resume data. Infallible by
/// policy; the worst case is a `ResumeData` that only carries `raw_text`.
pub fn parse(text: &str) -> ResumeData {
    let mut data = ResumeData {
        raw_text: text.to_string(),
        ..ResumeData::default()
    };

    data.contact = extract_contact(text);

    let mut current = Section::Preamble;
    let mut summary_lines: Vec<String> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(section) = detect_heading(line) {
            current = section;
            continue;
        }

        match current {
            Section::Preamble => {
                // Skip contact noise; keep prose lines as the summary.
                if !is_contact_line(line) && line.split_whitespace().count() > 3 {
                    summary_lines.push(line.to_string());
                }
            }
            Section::Experience => data.experience.push(line.to_string()),
            Section::Education => data.education.push(line.to_string()),
            Section::Skills => {
                data.skills.extend(split_skill_line(line));
            }
            Section::Projects => data.projects.push(line.to_string()),
        }
    }

    if !summary_lines.is_empty() {
        data.summary = Some(summary_lines.join(" "));
    }

    data
}

fn extract_contact(text: &str) -> ContactInfo {
    let email = EMAIL_RE.find(text).map(|m| m.as_str().to_string());

    // Phone matching is loose; require enough digits to weed out dates.
    let phone = PHONE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .find(|candidate| candidate.chars().filter(|c| c.is_ascii_digit()).count() >= 7);

    let links: Vec<String> = LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
        .filter(|link| !link.contains('@'))
        .collect();

    ContactInfo {
        name: detect_name(text),
        email,
        phone,
        address: None,
        links,
    }
}

/// First non-empty line, if it looks like a person's name rather than a
/// heading, an email, or an address.
fn detect_name(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let word_count = line.split_whitespace().count();
    let plausible = (1..=5).contains(&word_count)
        && !line.contains('@')
        && !line.chars().any(|c| c.is_ascii_digit())
        && detect_heading(line).is_none();
    plausible.then(|| line.to_string())
}

fn is_contact_line(line: &str) -> bool {
    EMAIL_RE.is_match(line) || LINK_RE.is_match(line) || PHONE_RE.is_match(line)
}

/// Treats short lines made of known section keywords as headings.
fn detect_heading(line: &str) -> Option<Section> {
    let normalized = line
        .trim_matches(|c: char| c == ':' || c == '#' || c.is_whitespace())
        .to_lowercase();
    if normalized.split_whitespace().count() > 4 {
        return None;
    }

    const EXPERIENCE: [&str; 4] = ["experience", "work experience", "employment", "work history"];
    const EDUCATION: [&str; 3] = ["education", "academic background", "academics"];
    const SKILLS: [&str; 4] = ["skills", "technical skills", "technologies", "core competencies"];
    const PROJECTS: [&str; 3] = ["projects", "personal projects", "selected projects"];

    if EXPERIENCE.contains(&normalized.as_str()) {
        Some(Section::Experience)
    } else if EDUCATION.contains(&normalized.as_str()) {
        Some(Section::Education)
    } else if SKILLS.contains(&normalized.as_str()) {
        Some(Section::Skills)
    } else if PROJECTS.contains(&normalized.as_str()) {
        Some(Section::Projects)
    } else {
        None
    }
}

fn split_skill_line(line: &str) -> Vec<String> {
    line.trim_start_matches(['-', '•', '*', ' '])
        .split([',', '|', ';', '·'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
