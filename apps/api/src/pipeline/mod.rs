//! The resume evaluation pipeline: validation, text extraction (with OCR
//! fallback), best-effort parsing, grading, and the orchestrating state
//! machine that drives them and broadcasts progress.

pub mod extract;
pub mod grade;
pub mod keywords;
pub mod ocr;
pub mod orchestrator;
pub mod parse;
pub mod validate;
