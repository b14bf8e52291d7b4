//! Text extraction — converts raw file bytes into plain text.
//!
//! Dispatch is a single match over `FileKind`; the OCR fallback for scanned
//! PDFs is driven by the orchestrator (it is a separately-broadcast
//! sub-step), this module only decides *whether* a PDF needs it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Defensive: the validator already rejects unknown extensions.
    #[error("Unsupported file format '{0}'")]
    UnsupportedFormat(String),

    #[error("No readable text could be extracted; the document may be unreadable or corrupt")]
    ExtractionEmpty,

    #[error("Failed to read document: {0}")]
    Unreadable(String),

    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// The accepted document types, resolved once at the validation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Txt,
    Doc,
    Docx,
    Pdf,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "txt" => Some(FileKind::Txt),
            "doc" => Some(FileKind::Doc),
            "docx" => Some(FileKind::Docx),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Txt => "txt",
            FileKind::Doc => "doc",
            FileKind::Docx => "docx",
            FileKind::Pdf => "pdf",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileKind::Txt => "text/plain",
            FileKind::Doc => "application/msword",
            FileKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileKind::Pdf => "application/pdf",
        }
    }
}

/// Direct (non-OCR) extraction path. CPU-bound for PDFs and DOCX, so the
/// orchestrator runs this on the blocking pool.
pub fn extract_direct(bytes: &[u8], kind: FileKind) -> Result<String, ExtractionError> {
    match kind {
        FileKind::Txt => extract_txt(bytes),
        FileKind::Docx => extract_docx(bytes),
        FileKind::Doc => extract_doc(bytes),
        FileKind::Pdf => extract_pdf_text_layer(bytes),
    }
}

/// True when a PDF's direct text-layer yield is too small to trust — the
/// signature of a scanned/image PDF — and the OCR pass should run.
pub fn needs_ocr(kind: FileKind, extracted: &str, min_parsable_chars: usize) -> bool {
    kind == FileKind::Pdf && extracted.trim().chars().count() < min_parsable_chars
}

fn extract_txt(bytes: &[u8]) -> Result<String, ExtractionError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ExtractionError::Unreadable(format!("file is not valid UTF-8 text: {e}")))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| ExtractionError::Unreadable(format!("not a readable DOCX document: {e:?}")))?;

    let mut text = String::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for para_child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = para_child {
                    for run_child in run.children {
                        if let docx_rs::RunChild::Text(t) = run_child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            text.push('\n');
        }
    }

    if text.trim().is_empty() {
        return Err(ExtractionError::ExtractionEmpty);
    }
    Ok(text)
}

/// Legacy `.doc` is an OLE container with no maintained pure-Rust reader.
/// Salvage printable ASCII runs from the binary; resumes saved by Word keep
/// their body text recoverable this way often enough to be useful.
fn extract_doc(bytes: &[u8]) -> Result<String, ExtractionError> {
    const MIN_RUN_LEN: usize = 4;

    let mut text = String::new();
    let mut run = String::new();
    for &b in bytes {
        let c = b as char;
        if c.is_ascii_graphic() || c == ' ' {
            run.push(c);
        } else {
            if run.trim().len() >= MIN_RUN_LEN {
                text.push_str(run.trim());
                text.push('\n');
            }
            run.clear();
        }
    }
    if run.trim().len() >= MIN_RUN_LEN {
        text.push_str(run.trim());
        text.push('\n');
    }

    if text.trim().is_empty() {
        return Err(ExtractionError::ExtractionEmpty);
    }
    Ok(text)
}

fn extract_pdf_text_layer(bytes: &[u8]) -> Result<String, ExtractionError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractionError::Unreadable(format!("PDF text layer unavailable: {e}")))
}
