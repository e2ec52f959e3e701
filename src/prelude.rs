//! Convenient imports for common usage patterns.
//!
//! ```rust,ignore
//! use html2doc_pipeline::prelude::*;
//! ```
//!
//! This imports:
//!
//! - [`Converter`] - Conversion service
//! - [`ConversionRequest`] / [`ConversionResult`] / [`OutputFormat`] - Request and result types
//! - [`ConverterConfig`] / [`ConverterConfigBuilder`] - Configuration
//! - [`DocxStrategyKind`] / [`PageSettings`] / [`Margins`] - Configuration values
//! - [`SessionPoolConfig`] / [`SessionPoolConfigBuilder`] - Session limits
//! - [`ConversionError`] / [`ConversionFailure`] / [`Result`] - Errors
//! - [`PoolStats`] - Pool statistics
//!
//! # Example
//!
//! ```rust,ignore
//! use html2doc_pipeline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let converter = Converter::from_config(ConverterConfig::default())?;
//!     let result = converter
//!         .convert(ConversionRequest::new("<p>Hello</p>", "hello", OutputFormat::Docx))
//!         .await?;
//!     println!("{}", result.path);
//!     Ok(())
//! }
//! ```

pub use crate::config::{
    ConverterConfig, ConverterConfigBuilder, DocxStrategyKind, Margins, PageSettings,
    SessionPoolConfig, SessionPoolConfigBuilder,
};
pub use crate::error::{ConversionError, ConversionFailure, Result};
pub use crate::service::{ConversionRequest, ConversionResult, Converter, OutputFormat};
pub use crate::stats::PoolStats;

#[cfg(feature = "env-config")]
pub use crate::service::init_converter;
