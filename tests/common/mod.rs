//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Read;
use std::path::{Path, PathBuf};

use html2doc_pipeline::prelude::*;
use html2doc_pipeline::render::mock::MockRenderer;
use html2doc_pipeline::{DocxStrategy, PdfRenderer};

/// Install a test logger once. Honors `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Output and scratch directories inside one temp dir.
pub struct Workspace {
    _root: tempfile::TempDir,
    pub output: PathBuf,
    pub scratch: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        init_logging();
        let root = tempfile::tempdir().expect("temp dir");
        let output = root.path().join("output");
        let scratch = root.path().join("scratch");
        Self {
            _root: root,
            output,
            scratch,
        }
    }

    pub fn config(&self) -> ConverterConfigBuilder {
        ConverterConfigBuilder::new()
            .output_dir(&self.output)
            .scratch_dir(&self.scratch)
    }

    /// Converter using `renderer` and the strategy selected by `kind`.
    pub fn converter(&self, renderer: MockRenderer, kind: DocxStrategyKind) -> Converter {
        self.build(self.config().docx_strategy(kind), Box::new(renderer), None)
    }

    pub fn build(
        &self,
        config: ConverterConfigBuilder,
        renderer: Box<dyn PdfRenderer>,
        strategy: Option<Box<dyn DocxStrategy>>,
    ) -> Converter {
        let mut builder = Converter::builder()
            .config(config.build().expect("valid config"))
            .renderer(renderer);
        if let Some(strategy) = strategy {
            builder = builder.docx_strategy(strategy);
        }
        builder.build().expect("converter")
    }

    pub fn output_entries(&self) -> Vec<String> {
        entries(&self.output)
    }

    pub fn scratch_entries(&self) -> Vec<String> {
        entries(&self.scratch)
    }
}

/// Sorted file names in `dir`.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("readable dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Contents of `word/document.xml` in a DOCX file.
pub fn document_xml(path: &Path) -> String {
    let file = std::fs::File::open(path).expect("docx exists");
    let mut archive = zip::ZipArchive::new(file).expect("docx is a zip");
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .expect("word/document.xml")
        .read_to_string(&mut xml)
        .expect("utf-8 xml");
    xml
}

/// Random request name.
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

pub const HELLO_HTML: &str = "<html><body><h1>Hi</h1></body></html>";
