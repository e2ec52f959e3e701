//! Request and result types for the conversion service.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`OutputFormat`] | PDF or DOCX |
//! | [`ConversionRequest`] | Validated input for one conversion |
//! | [`ConversionResult`] | Location, size and optional payload of the artifact |
//!
//! These types carry no HTTP concepts. An outer layer deserializes its own
//! request body, validates it, and builds a [`ConversionRequest`].
//!
//! ```rust
//! use html2doc_pipeline::{ConversionRequest, OutputFormat};
//!
//! let request = ConversionRequest::new("<h1>Invoice</h1>", "invoice-42", OutputFormat::Docx)
//!     .with_inline_payload(true);
//!
//! assert_eq!(request.output_format(), OutputFormat::Docx);
//! assert!(request.want_inline_payload());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// OutputFormat
// ============================================================================

/// Artifact format produced by a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }

    /// MIME type of the artifact.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "docx" => Ok(OutputFormat::Docx),
            other => Err(format!("unsupported output format '{}'", other)),
        }
    }
}

// ============================================================================
// ConversionRequest
// ============================================================================

/// One validated conversion request.
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    html: String,
    filename: String,
    output_format: OutputFormat,
    #[serde(default)]
    want_inline_payload: bool,
}

impl ConversionRequest {
    /// Create a request that writes the artifact without an inline payload.
    pub fn new(
        html: impl Into<String>,
        filename: impl Into<String>,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            html: html.into(),
            filename: filename.into(),
            output_format,
            want_inline_payload: false,
        }
    }

    /// Also return the artifact bytes base64-encoded in the result.
    pub fn with_inline_payload(mut self, want: bool) -> Self {
        self.want_inline_payload = want;
        self
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Filename as requested by the caller, before sanitizing.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn want_inline_payload(&self) -> bool {
        self.want_inline_payload
    }
}

// ============================================================================
// ConversionResult
// ============================================================================

/// Successful conversion.
///
/// `path` is relative to the output directory, which for a flat store is
/// simply the sanitized file name.
///
/// ```rust
/// use html2doc_pipeline::{ConversionResult, OutputFormat};
///
/// let result = ConversionResult {
///     path: "report.pdf".to_string(),
///     size_bytes: 2560,
///     format: OutputFormat::Pdf,
///     inline_payload: None,
/// };
///
/// assert_eq!(result.size_kb(), 2.5);
/// assert_eq!(result.url("https://docs.example.com/"), "https://docs.example.com/output/report.pdf");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub path: String,
    pub size_bytes: u64,
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_payload: Option<String>,
}

impl ConversionResult {
    /// Size in kilobytes, rounded to two decimals.
    pub fn size_kb(&self) -> f64 {
        (self.size_bytes as f64 / 1024.0 * 100.0).round() / 100.0
    }

    /// Public URL of the artifact under `{base}/output/`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/output/{}", base_url.trim_end_matches('/'), self.path)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies format metadata.
    #[test]
    fn test_output_format_metadata() {
        assert_eq!(OutputFormat::Pdf.extension(), "pdf");
        assert_eq!(OutputFormat::Docx.extension(), "docx");
        assert_eq!(OutputFormat::Pdf.content_type(), "application/pdf");
        assert!(OutputFormat::Docx.content_type().contains("wordprocessingml"));
        assert_eq!(OutputFormat::Docx.to_string(), "docx");
    }

    /// Verifies case-insensitive parsing and serde names.
    #[test]
    fn test_output_format_parsing() {
        assert_eq!("PDF".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!(" docx ".parse::<OutputFormat>().unwrap(), OutputFormat::Docx);
        assert!("odt".parse::<OutputFormat>().is_err());

        let json = serde_json::to_string(&OutputFormat::Docx).unwrap();
        assert_eq!(json, "\"docx\"");
    }

    /// Verifies request deserialization with the payload flag omitted.
    #[test]
    fn test_request_deserialize_defaults() {
        let request: ConversionRequest = serde_json::from_str(
            r#"{"html":"<p>x</p>","filename":"x","output_format":"pdf"}"#,
        )
        .unwrap();

        assert_eq!(request.html(), "<p>x</p>");
        assert_eq!(request.filename(), "x");
        assert_eq!(request.output_format(), OutputFormat::Pdf);
        assert!(!request.want_inline_payload());
    }

    /// Verifies size rounding and URL joining.
    #[test]
    fn test_result_helpers() {
        let result = ConversionResult {
            path: "a.docx".to_string(),
            size_bytes: 1000,
            format: OutputFormat::Docx,
            inline_payload: None,
        };

        assert_eq!(result.size_kb(), 0.98);
        assert_eq!(result.url("http://localhost:8000"), "http://localhost:8000/output/a.docx");

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("inline_payload").is_none());
    }
}
