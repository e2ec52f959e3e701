//! Conversion service.
//!
//! This module is the **framework-agnostic core** that an outer layer (HTTP
//! handlers, a CLI, a queue worker) hands validated requests to.
//!
//! # Module Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          service module                                 │
//! │                                                                         │
//! │  ┌─────────────────────────┐      ┌──────────────────────────────────┐  │
//! │  │      types.rs           │      │          convert.rs              │  │
//! │  │  ┌───────────────────┐  │      │  ┌────────────────────────────┐  │  │
//! │  │  │ OutputFormat      │  │      │  │ Converter                  │  │  │
//! │  │  │ ConversionRequest │──┼─────►│  │   convert / convert_blocking│  │  │
//! │  │  │ ConversionResult  │◄─┼──────│  │   remove_artifact          │  │  │
//! │  │  └───────────────────┘  │      │  │   stats / warmup / shutdown│  │  │
//! │  └─────────────────────────┘      │  └────────────────────────────┘  │  │
//! │                                   └───────────────┬──────────────────┘  │
//! └───────────────────────────────────────────────────┼─────────────────────┘
//!                                                     │
//!                 ┌───────────────────────┬───────────┴──────────┐
//!                 ▼                       ▼                      ▼
//!          ┌─────────────┐        ┌──────────────┐       ┌──────────────┐
//!          │ PdfRenderer │        │ DocxStrategy │       │ OutputStore  │
//!          └─────────────┘        └──────────────┘       └──────────────┘
//! ```
//!
//! # Design Philosophy
//!
//! | Layer | Responsibility | This Module? |
//! |-------|----------------|--------------|
//! | **Service** | Sanitizing, staging, rendering, transcoding, cleanup | ✅ Yes |
//! | **Handler** | HTTP request/response mapping, schema validation | ❌ No |
//!
//! # Core Functions
//!
//! | Function | Purpose | Blocking? |
//! |----------|---------|-----------|
//! | [`Converter::convert`] | HTML → artifact under the request timeout | ✅ Async |
//! | [`Converter::convert_blocking`] | Same, on the calling thread | ⚠️ Yes |
//! | [`Converter::remove_artifact`] | Delete a generated file | ✅ Fast |
//! | [`Converter::stats`] | Session pool statistics | ✅ Fast |
//! | [`Converter::is_ready`] | Readiness check | ✅ Fast |
//! | [`Converter::warmup`] | Pre-launch sessions | ✅ Async |
//!
//! # Direct Usage (Non-HTTP)
//!
//! ```rust,ignore
//! use html2doc_pipeline::prelude::*;
//!
//! async fn batch(converter: &Converter, pages: Vec<(String, String)>) {
//!     for (name, html) in pages {
//!         match converter
//!             .convert(ConversionRequest::new(html, name, OutputFormat::Docx))
//!             .await
//!         {
//!             Ok(result) => println!("{} ({:.2} KB)", result.path, result.size_kb()),
//!             Err(e) => eprintln!("{}", ConversionFailure::from(&e).cause),
//!         }
//!     }
//! }
//! ```

mod convert;
mod types;

pub use convert::{Converter, ConverterBuilder};
pub use types::{ConversionRequest, ConversionResult, OutputFormat};

#[cfg(feature = "env-config")]
pub use convert::init_converter;
