//! Structural HTML → DOCX conversion through `pandoc`.
//!
//! The HTML is written to a scratch file and converted with:
//!
//! ```text
//! pandoc <scratch>.html -f html -t docx -o <destination> [--reference-doc <template>]
//! ```
//!
//! The child is polled rather than waited on so that the time budget and
//! the cancellation token can both interrupt it. stderr is drained on a
//! helper thread and becomes the error detail on a nonzero exit. The thread
//! is given a short grace period after the child exits and is detached if
//! the pipe is still open.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::{DocxSource, DocxStrategy};
use crate::config::{ConverterConfig, DocxStrategyKind};
use crate::error::{ConfigError, ConversionError, Result, TranscodeStage};
use crate::temp::with_temp;

/// How often the child process is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest wait for stderr to close once pandoc has exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

fn pandoc_error(detail: impl Into<String>) -> ConversionError {
    ConversionError::transcode(TranscodeStage::Pandoc, detail)
}

/// DOCX strategy backed by the external `pandoc` binary.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use html2doc_pipeline::transcode::PandocStrategy;
///
/// let strategy = PandocStrategy::new("/usr/bin/pandoc")
///     .with_reference_doc(Some("templates/reference.docx".into()))
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct PandocStrategy {
    program: PathBuf,
    reference_doc: Option<PathBuf>,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl PandocStrategy {
    /// Strategy running `program` with a 60 second budget and the system
    /// temp directory for scratch files.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            reference_doc: None,
            timeout: Duration::from_secs(60),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Strategy configured from the converter settings.
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.pandoc_path.clone())
            .with_reference_doc(config.reference_doc.clone())
            .with_timeout(config.transcode_timeout)
            .with_scratch_dir(config.scratch_dir())
    }

    pub fn with_reference_doc(mut self, path: Option<PathBuf>) -> Self {
        self.reference_doc = path;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The template to pass, if configured and present.
    fn reference_doc(&self) -> Option<&Path> {
        match &self.reference_doc {
            Some(path) if path.is_file() => Some(path),
            Some(path) => {
                log::warn!(
                    "⚠️ {} - converting with pandoc's default styles",
                    ConfigError::MissingReferenceDoc(path.clone())
                );
                None
            }
            None => None,
        }
    }

    fn command(&self, input: &Path, destination: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(input)
            .args(["-f", "html", "-t", "docx", "-o"])
            .arg(destination);
        if let Some(template) = self.reference_doc() {
            command.arg("--reference-doc").arg(template);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }

    fn run(&self, input: &Path, destination: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut child = self.command(input, destination).spawn().map_err(|e| {
            pandoc_error(format!("failed to launch {}: {}", self.program.display(), e))
        })?;
        log::debug!("🔧 pandoc started (pid {})", child.id());

        let deadline = Instant::now() + self.timeout;
        let stderr = drain_stderr(&mut child);
        let status = wait_with_budget(&mut child, self.timeout, cancel)?;
        let grace = deadline
            .saturating_duration_since(Instant::now())
            .min(STDERR_GRACE);
        let stderr = stderr
            .map(|reader| reader.finish(grace))
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        let detail = stderr.trim();
        Err(pandoc_error(if detail.is_empty() {
            format!("pandoc exited with {}", status)
        } else {
            detail.to_string()
        }))
    }
}

impl DocxStrategy for PandocStrategy {
    fn kind(&self) -> DocxStrategyKind {
        DocxStrategyKind::Structural
    }

    fn transcode(
        &self,
        source: DocxSource<'_>,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let html = match source {
            DocxSource::Html(html) => html,
            other => {
                return Err(pandoc_error(format!(
                    "expected HTML, got {}",
                    other.describe()
                )));
            }
        };

        let start = Instant::now();
        with_temp(&self.scratch_dir, ".html", |input| {
            std::fs::write(input, html)
                .map_err(|e| ConversionError::io("writing pandoc input", e))?;
            self.run(input, destination, cancel)
        })?;

        log::info!("✅ pandoc produced DOCX in {:?}", start.elapsed());
        Ok(())
    }
}

/// stderr collected on a helper thread.
struct StderrReader {
    collected: Arc<Mutex<Vec<u8>>>,
    closed: Receiver<()>,
}

impl StderrReader {
    /// Text read so far, after waiting up to `grace` for the pipe to close.
    ///
    /// Grandchildren of pandoc may keep the pipe open indefinitely; the
    /// reader thread is then left detached.
    fn finish(self, grace: Duration) -> String {
        if self.closed.recv_timeout(grace).is_err() {
            log::debug!("pandoc stderr still open after exit, reader detached");
        }
        self.collected
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

fn drain_stderr(child: &mut Child) -> Option<StderrReader> {
    let mut pipe = child.stderr.take()?;
    let collected = Arc::new(Mutex::new(Vec::new()));
    let (closed_tx, closed) = mpsc::channel();

    let sink = Arc::clone(&collected);
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut bytes) = sink.lock() {
                        bytes.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        // The receiver is gone once the caller stopped waiting.
        let _ = closed_tx.send(());
    });

    Some(StderrReader { collected, closed })
}

/// Wait for `child`, killing it if the budget runs out or `cancel` fires.
fn wait_with_budget(
    child: &mut Child,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<ExitStatus> {
    let deadline = Instant::now() + budget;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                kill_and_reap(child);
                return Err(pandoc_error(format!("failed to wait for pandoc: {}", e)));
            }
        }

        if cancel.is_cancelled() {
            kill_and_reap(child);
            return Err(pandoc_error("cancelled"));
        }
        if Instant::now() >= deadline {
            kill_and_reap(child);
            log::warn!("⚠️ pandoc exceeded {}ms, killed", budget.as_millis());
            return Err(pandoc_error(format!(
                "timed out after {}ms",
                budget.as_millis()
            )));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("pandoc kill: {}", e);
    }
    if let Err(e) = child.wait() {
        log::warn!("⚠️ Failed to reap pandoc: {}", e);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    /// Verifies the command line, with and without a template.
    #[test]
    fn test_command_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("reference.docx");

        let strategy = PandocStrategy::new("pandoc").with_reference_doc(Some(template.clone()));
        let args = |s: &PandocStrategy| -> Vec<String> {
            s.command(Path::new("in.html"), Path::new("out.docx"))
                .get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };

        // Missing template is skipped.
        assert_eq!(
            args(&strategy),
            ["in.html", "-f", "html", "-t", "docx", "-o", "out.docx"]
        );

        std::fs::write(&template, b"template").unwrap();
        let with_template = args(&strategy);
        assert_eq!(with_template[7], "--reference-doc");
        assert_eq!(with_template[8], template.to_string_lossy());
    }

    /// Verifies that a missing binary is a pandoc-stage error and the
    /// scratch file is removed.
    #[test]
    fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = PandocStrategy::new("/nonexistent/pandoc-binary").with_scratch_dir(dir.path());

        let err = strategy
            .transcode(
                DocxSource::Html("<p>x</p>"),
                &dir.path().join("out.docx"),
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::Transcode {
                stage: TranscodeStage::Pandoc,
                ..
            }
        ));
        assert!(err.to_string().contains("failed to launch"));
        assert_eq!(entries(dir.path()), 0);
    }

    /// Verifies that a PDF source is rejected.
    #[test]
    fn test_rejects_pdf_source() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = PandocStrategy::new("pandoc").with_scratch_dir(dir.path());

        let err = strategy
            .transcode(
                DocxSource::RenderedPdf(Path::new("x.pdf")),
                &dir.path().join("out.docx"),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("expected HTML"));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-pandoc.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Verifies that stderr becomes the error detail.
        #[test]
        fn test_nonzero_exit_reports_stderr() {
            let bin = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            let program = script(bin.path(), "echo 'Unknown reader: html5' >&2\nexit 3");
            let strategy = PandocStrategy::new(program).with_scratch_dir(scratch.path());

            let err = strategy
                .transcode(
                    DocxSource::Html("<p>x</p>"),
                    &scratch.path().join("out.docx"),
                    &CancellationToken::new(),
                )
                .unwrap_err();

            assert_eq!(
                err.to_string(),
                "Transcode failed in pandoc: Unknown reader: html5"
            );
            assert_eq!(entries(scratch.path()), 0);
        }

        /// Verifies that the budget kills a hung converter.
        #[test]
        fn test_timeout_kills_child() {
            let bin = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            let program = script(bin.path(), "exec sleep 30");
            let strategy = PandocStrategy::new(program)
                .with_scratch_dir(scratch.path())
                .with_timeout(Duration::from_millis(200));

            let start = Instant::now();
            let err = strategy
                .transcode(
                    DocxSource::Html("<p>x</p>"),
                    &scratch.path().join("out.docx"),
                    &CancellationToken::new(),
                )
                .unwrap_err();

            assert!(err.is_timeout(), "{}", err);
            assert!(start.elapsed() < Duration::from_secs(10));
            assert_eq!(entries(scratch.path()), 0);
        }

        /// Verifies that a grandchild holding stderr open does not stall
        /// the error path past the grace period.
        #[test]
        fn test_inherited_stderr_does_not_block() {
            let bin = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            let program = script(
                bin.path(),
                "(sleep 30 &)\necho 'Could not parse input' >&2\nexit 2",
            );
            let strategy = PandocStrategy::new(program).with_scratch_dir(scratch.path());

            let start = Instant::now();
            let err = strategy
                .transcode(
                    DocxSource::Html("<p>x</p>"),
                    &scratch.path().join("out.docx"),
                    &CancellationToken::new(),
                )
                .unwrap_err();

            assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
            assert!(err.to_string().contains("Could not parse input"), "{}", err);
        }

        /// Verifies that the output argument is honoured on success.
        #[test]
        fn test_success_writes_destination() {
            let bin = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            // Arguments: <in> -f html -t docx -o <out>
            let program = script(bin.path(), "cp \"$1\" \"$7\"");
            let strategy = PandocStrategy::new(program).with_scratch_dir(scratch.path());
            let out = bin.path().join("out.docx");

            strategy
                .transcode(
                    DocxSource::Html("<h1>copied</h1>"),
                    &out,
                    &CancellationToken::new(),
                )
                .unwrap();

            assert_eq!(std::fs::read_to_string(&out).unwrap(), "<h1>copied</h1>");
            assert_eq!(entries(scratch.path()), 0);
        }
    }
}
