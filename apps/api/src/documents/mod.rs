//! Uploaded documents and their declared format.
//!
//! A `Document` lives only for one request: built from a multipart field,
//! consumed by `extractor::extract_text`, then dropped.

pub mod extractor;

use bytes::Bytes;

use crate::errors::PipelineError;

pub use extractor::extract_text;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// The two formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Resolves the format from the declared content type, falling back to the
    /// file extension when the client sent no useful type.
    pub fn resolve(
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Self, PipelineError> {
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty());

        match mime.as_deref() {
            Some(PDF_MIME) => Ok(DocumentFormat::Pdf),
            Some(DOCX_MIME) => Ok(DocumentFormat::Docx),
            None | Some("application/octet-stream") => {
                Self::from_extension(file_name).ok_or_else(|| {
                    PipelineError::UnsupportedFormat(
                        file_name.unwrap_or("unnamed upload").to_string(),
                    )
                })
            }
            Some(other) => Err(PipelineError::UnsupportedFormat(other.to_string())),
        }
    }

    fn from_extension(file_name: Option<&str>) -> Option<Self> {
        let (_, ext) = file_name?.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }
}

/// Raw upload: bytes plus what the client declared about them. Immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Document {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }

    pub fn format(&self) -> Result<DocumentFormat, PipelineError> {
        DocumentFormat::resolve(self.content_type.as_deref(), Some(&self.name))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_from_mime() {
        assert_eq!(
            DocumentFormat::resolve(Some(PDF_MIME), None).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::resolve(Some(DOCX_MIME), Some("cv.pdf")).unwrap(),
            DocumentFormat::Docx
        );
    }

    #[test]
    fn test_resolve_ignores_mime_parameters_and_case() {
        assert_eq!(
            DocumentFormat::resolve(Some("Application/PDF; charset=binary"), None).unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn test_resolve_falls_back_to_extension() {
        assert_eq!(
            DocumentFormat::resolve(None, Some("Resume.DOCX")).unwrap(),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::resolve(Some("application/octet-stream"), Some("jd.pdf")).unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn test_resolve_rejects_unsupported() {
        let err = DocumentFormat::resolve(Some("text/plain"), Some("notes.pdf")).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_FORMAT");

        let err = DocumentFormat::resolve(None, Some("resume.doc")).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_FORMAT");

        let err = DocumentFormat::resolve(None, None).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn test_document_format_uses_name_fallback() {
        let doc = Document::new("cv.docx", None, Bytes::from_static(b"x"));
        assert_eq!(doc.format().unwrap(), DocumentFormat::Docx);
        assert_eq!(doc.len(), 1);
    }
}
