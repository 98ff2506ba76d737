//! Text Extractor: turns an uploaded PDF or DOCX into plain text.
//!
//! Pure and synchronous. Callers on the async path run it through
//! `tokio::task::spawn_blocking` since PDF decoding is CPU-bound.

use std::panic::{self, AssertUnwindSafe};

use docx_rs::{DocumentChild, Paragraph, ParagraphChild, RunChild};

use crate::documents::{Document, DocumentFormat};
use crate::errors::PipelineError;

/// Extracts plain text from a document in reading order.
///
/// A PDF with no text layer (scanned images) yields an empty string rather than
/// an error; deciding what to do with blank text is the caller's job.
pub fn extract_text(document: &Document) -> Result<String, PipelineError> {
    let format = document.format()?;

    if document.is_empty() {
        return Err(PipelineError::CorruptDocument(format!(
            "'{}' is empty",
            display_name(document)
        )));
    }

    match format {
        DocumentFormat::Pdf => extract_pdf(&document.bytes),
        DocumentFormat::Docx => extract_docx(&document.bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));

    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(PipelineError::CorruptDocument(format!(
            "invalid PDF structure ({e})"
        ))),
        Err(_) => Err(PipelineError::CorruptDocument(
            "invalid PDF structure".to_string(),
        )),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, PipelineError> {
    let docx = panic::catch_unwind(AssertUnwindSafe(|| docx_rs::read_docx(bytes)))
        .map_err(|_| PipelineError::CorruptDocument("invalid DOCX package".to_string()))?
        .map_err(|e| PipelineError::CorruptDocument(format!("invalid DOCX package ({e})")))?;

    let paragraphs: Vec<String> = docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(p) => Some(paragraph_text(p)),
            _ => None,
        })
        .collect();

    Ok(paragraphs.join("\n"))
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    push_children(&paragraph.children, &mut text);
    text
}

fn push_children(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for run_child in &run.children {
                    match run_child {
                        RunChild::Text(t) => out.push_str(&t.text),
                        RunChild::Tab(_) => out.push('\t'),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => push_children(&link.children, out),
            _ => {}
        }
    }
}

fn display_name(document: &Document) -> &str {
    if document.name.is_empty() {
        "upload"
    } else {
        &document.name
    }
}
