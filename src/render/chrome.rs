//! Headless Chrome renderer.
//!
//! Each call checks a browser process out of the [`SessionPool`], opens a
//! fresh incognito browser context with a single tab, and tears both down
//! before returning:
//!
//! ```text
//! ChromeRenderer::render_to_pdf()
//! ├── pool.checkout()                ◀── bounded, may wait
//! ├── Target.createBrowserContext    ◀── isolated cookies/storage/viewport
//! │   └── new tab
//! │       ├── Network.enable + request tracking
//! │       ├── navigate(data: URL)
//! │       ├── wait for quiescence    ◀── readyState complete, no request in flight for 500 ms
//! │       └── Page.printToPDF
//! ├── tab.close + Target.disposeBrowserContext (always)
//! └── handle dropped                 ◀── process reused, or discarded if poisoned
//! ```
//!
//! Context disposal is a browser-level call, so it goes over a short-lived
//! second DevTools connection to the same process. A session whose context
//! could not be disposed is poisoned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use headless_chrome::browser::tab::EventListener;
use headless_chrome::browser::transport::Transport;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Network, Target};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, Tab};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::PdfRenderer;
use crate::config::{ConverterConfig, PageSettings};
use crate::error::{ConversionError, RenderStage, Result, SessionError};
use crate::factory::ChromeSessionFactory;
use crate::pool::SessionPool;
use crate::stats::PoolStats;
use crate::temp::TransientArtifact;

/// Interval between quiescence checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the page must stay loaded with no request in flight.
const IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Idle timeout of the connection used for context disposal.
const CONTROL_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest data URL handed to `navigate`; larger documents go through a
/// scratch file. Chrome rejects URLs over 2 MiB.
const MAX_DATA_URL_LEN: usize = 1_500_000;

const READY_STATE_SCRIPT: &str = "document.readyState === 'complete'";

const CM_PER_INCH: f64 = 2.54;

/// [`PdfRenderer`] backed by pooled headless Chrome processes.
pub struct ChromeRenderer {
    pool: SessionPool<Browser>,
    render_timeout: Duration,
    scratch_dir: PathBuf,
}

impl ChromeRenderer {
    pub fn new(pool: SessionPool<Browser>, render_timeout: Duration) -> Self {
        Self {
            pool,
            render_timeout,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Renderer with its own pool, sized and timed by `config`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Configuration`] for inconsistent pool limits.
    pub fn from_config(config: &ConverterConfig) -> std::result::Result<Self, SessionError> {
        let factory =
            ChromeSessionFactory::with_options(config.chrome_path.clone(), config.pool.session_ttl);
        let pool = SessionPool::builder()
            .config(config.pool.clone())
            .factory(Box::new(factory))
            .build()?;

        Ok(Self::new(pool, config.render_timeout).with_scratch_dir(config.scratch_dir()))
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn pool(&self) -> &SessionPool<Browser> {
        &self.pool
    }

    fn render_in_tab(
        &self,
        tab: &Tab,
        html: &str,
        page: &PageSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let start = Instant::now();
        let deadline = start + self.render_timeout;

        // Large documents are loaded from disk; the file must outlive the print.
        let (url, _source_file) = self.document_url(html)?;

        let in_flight = InFlightRequests::attach(tab)?;
        let settled = tab
            .navigate_to(&url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| load_error(format!("navigation failed: {}", e)))
            .and_then(|_| {
                log::debug!("Navigation completed in {:?}", start.elapsed());
                wait_for_quiescence(tab, &in_flight, deadline, cancel)
            });
        in_flight.detach(tab);
        settled?;
        log::debug!("Page settled after {:?}", start.elapsed());

        let print_start = Instant::now();
        let pdf = tab
            .print_to_pdf(Some(print_options(page)))
            .map_err(|e| {
                log::error!("❌ Failed to print PDF: {}", e);
                ConversionError::render(RenderStage::Print, e.to_string())
            })?;
        log::debug!(
            "PDF printed in {:?} ({} bytes)",
            print_start.elapsed(),
            pdf.len()
        );

        Ok(pdf)
    }

    fn document_url(&self, html: &str) -> Result<(String, Option<TransientArtifact>)> {
        let encoded = urlencoding::encode(html);
        if encoded.len() <= MAX_DATA_URL_LEN {
            return Ok((format!("data:text/html;charset=utf-8,{}", encoded), None));
        }

        let file = TransientArtifact::create(&self.scratch_dir, ".html")?;
        std::fs::write(file.path(), html)
            .map_err(|e| ConversionError::io("writing HTML for the renderer", e))?;
        log::debug!(
            "📁 HTML too large for a data URL ({} bytes encoded), loading from {}",
            encoded.len(),
            file.path().display()
        );
        Ok((format!("file://{}", file.path().display()), Some(file)))
    }
}

impl PdfRenderer for ChromeRenderer {
    fn render_to_pdf(
        &self,
        html: &str,
        destination: &Path,
        page: &PageSettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut browser = self.pool.checkout(cancel)?;
        log::debug!("Rendering with session {}", browser.id());

        let incognito = 'open: {
            let e = match IncognitoTab::open(&browser, self.render_timeout) {
                Ok(incognito) => break 'open incognito,
                Err(e) => e,
            };
            browser.poison();
            return Err(e);
        };
        let rendered = self.render_in_tab(&incognito.tab, html, page, cancel);
        let torn_down = incognito.close();

        if !torn_down || matches!(rendered, Err(ConversionError::Render { .. })) {
            browser.poison();
        }
        drop(browser);
        let pdf = rendered?;

        std::fs::write(destination, &pdf)
            .map_err(|e| ConversionError::io("writing rendered PDF", e))
    }

    fn stats(&self) -> Option<PoolStats> {
        Some(self.pool.stats())
    }

    fn is_ready(&self) -> bool {
        self.pool.is_ready()
    }

    fn warmup(&self) -> std::result::Result<usize, SessionError> {
        self.pool.warmup()
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }
}

fn load_error(detail: impl Into<String>) -> ConversionError {
    ConversionError::render(RenderStage::Load, detail)
}

/// Print options for `page`.
///
/// Paper size is given in inches and margins arrive in centimetres.
fn print_options(page: &PageSettings) -> PrintToPdfOptions {
    let m = &page.margins;
    PrintToPdfOptions {
        landscape: Some(false),
        display_header_footer: Some(false),
        print_background: Some(page.print_background),
        prefer_css_page_size: Some(page.prefer_css_page_size),
        paper_width: Some(page.width_inches()),
        paper_height: Some(page.height_inches()),
        margin_top: Some(m.top / CM_PER_INCH),
        margin_bottom: Some(m.bottom / CM_PER_INCH),
        margin_left: Some(m.left / CM_PER_INCH),
        margin_right: Some(m.right / CM_PER_INCH),
        ..Default::default()
    }
}

/// Poll until the document has loaded and no request has been in flight for
/// [`IDLE_WINDOW`].
fn wait_for_quiescence(
    tab: &Tab,
    in_flight: &InFlightRequests,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut idle = IdleWindow::new(IDLE_WINDOW);

    loop {
        if cancel.is_cancelled() {
            return Err(load_error("cancelled while waiting for the page to settle"));
        }

        let complete = tab
            .evaluate(READY_STATE_SCRIPT, false)
            .map_err(|e| load_error(format!("readyState check failed: {}", e)))?
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let pending = in_flight.count();

        let now = Instant::now();
        if idle.observe(!complete || pending > 0, now) {
            return Ok(());
        }
        log::trace!("Page not settled (complete: {}, in flight: {})", complete, pending);

        if now >= deadline {
            log::warn!(
                "⚠️ Page did not settle before the render deadline ({} requests in flight)",
                pending
            );
            return Err(load_error("page did not settle in time (timed out)"));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Tracks how long a page has been continuously idle.
#[derive(Debug)]
struct IdleWindow {
    window: Duration,
    idle_since: Option<Instant>,
}

impl IdleWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            idle_since: None,
        }
    }

    /// Record one observation. Returns `true` once the page has been idle
    /// for the whole window.
    fn observe(&mut self, busy: bool, now: Instant) -> bool {
        if busy {
            self.idle_since = None;
            return false;
        }
        let since = *self.idle_since.get_or_insert(now);
        now.duration_since(since) >= self.window
    }
}

type TabListener = dyn EventListener<Event> + Send + Sync;

/// Network requests sent by a tab and not yet finished or failed.
///
/// `data:` URLs never reach the network and are not counted.
#[derive(Debug, Default)]
struct RequestSet(Mutex<HashSet<String>>);

impl RequestSet {
    fn on_event(&self, event: &Event) {
        match event {
            Event::NetworkRequestWillBeSent(e) => {
                self.sent(&e.params.request_id, &e.params.request.url)
            }
            Event::NetworkLoadingFinished(e) => self.done(&e.params.request_id),
            Event::NetworkLoadingFailed(e) => self.done(&e.params.request_id),
            _ => {}
        }
    }

    fn sent(&self, request_id: &str, url: &str) {
        if url.starts_with("data:") {
            return;
        }
        if let Ok(mut pending) = self.0.lock() {
            pending.insert(request_id.to_string());
        }
    }

    fn done(&self, request_id: &str) {
        if let Ok(mut pending) = self.0.lock() {
            pending.remove(request_id);
        }
    }

    fn len(&self) -> usize {
        self.0.lock().map(|pending| pending.len()).unwrap_or(0)
    }
}

/// A [`RequestSet`] fed by a tab's Network events.
struct InFlightRequests {
    requests: Arc<RequestSet>,
    listener: Weak<TabListener>,
}

impl InFlightRequests {
    fn attach(tab: &Tab) -> Result<Self> {
        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            report_direct_socket_traffic: None,
            enable_durable_messages: None,
        })
        .map_err(|e| load_error(format!("cannot enable network events: {}", e)))?;

        let requests = Arc::new(RequestSet::default());
        let sink = Arc::clone(&requests);
        let listener: Arc<TabListener> = Arc::new(move |event: &Event| sink.on_event(event));
        let listener = tab
            .add_event_listener(listener)
            .map_err(|e| load_error(format!("cannot listen to network events: {}", e)))?;

        Ok(Self { requests, listener })
    }

    fn count(&self) -> usize {
        self.requests.len()
    }

    fn detach(self, tab: &Tab) {
        if let Err(e) = tab.remove_event_listener(&self.listener) {
            log::debug!("Failed to remove network listener: {}", e);
        }
    }
}

// ============================================================================
// Incognito context guard
// ============================================================================

/// A tab inside a throwaway browser context.
///
/// [`close`](Self::close) tears both down and reports whether that worked;
/// dropping an unclosed guard does the same and logs the outcome.
struct IncognitoTab<'a> {
    browser: &'a Browser,
    context_id: String,
    tab: Arc<Tab>,
    torn_down: bool,
}

impl<'a> IncognitoTab<'a> {
    fn open(browser: &'a Browser, timeout: Duration) -> Result<Self> {
        let context = browser
            .new_context()
            .map_err(|e| load_error(format!("cannot create browser context: {}", e)))?;
        let context_id = context.get_id().to_string();

        let tab = match context.new_tab() {
            Ok(tab) => tab,
            Err(e) => {
                dispose_context(browser, &context_id);
                return Err(load_error(format!("cannot open tab: {}", e)));
            }
        };
        tab.set_default_timeout(timeout);

        log::trace!("Opened incognito context {}", context_id);
        Ok(Self {
            browser,
            context_id,
            tab,
            torn_down: false,
        })
    }

    /// Close the tab and dispose the context. `false` if either failed.
    fn close(mut self) -> bool {
        self.teardown()
    }

    fn teardown(&mut self) -> bool {
        self.torn_down = true;
        let tab_closed = match self.tab.close(true) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("⚠️ Failed to close tab: {}", e);
                false
            }
        };
        dispose_context(self.browser, &self.context_id) && tab_closed
    }
}

impl Drop for IncognitoTab<'_> {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

/// Dispose `context_id` over a separate browser-level connection.
fn dispose_context(browser: &Browser, context_id: &str) -> bool {
    let ws_url = match Url::parse(&browser.get_ws_url()) {
        Ok(url) => url,
        Err(e) => {
            log::warn!("⚠️ Invalid DevTools URL, context {} not disposed: {}", context_id, e);
            return false;
        }
    };

    let result = Transport::new(ws_url, None, CONTROL_IDLE_TIMEOUT, None).and_then(|transport| {
        let disposed = transport.call_method_on_browser(Target::DisposeBrowserContext {
            browser_context_id: context_id.to_string(),
        });
        transport.shutdown();
        disposed
    });

    match result {
        Ok(_) => {
            log::trace!("Disposed browser context {}", context_id);
            true
        }
        Err(e) => {
            log::warn!("⚠️ Failed to dispose browser context {}: {}", context_id, e);
            false
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Margins;
    use crate::factory::SessionFactory;

    /// Verifies the unit conversions in the print options.
    #[test]
    fn test_print_options_a4() {
        let options = print_options(&PageSettings::a4());

        let width = options.paper_width.unwrap();
        let height = options.paper_height.unwrap();
        assert!((width - 8.2677).abs() < 1e-3, "{}", width);
        assert!((height - 11.6929).abs() < 1e-3, "{}", height);

        assert!((options.margin_top.unwrap() - 2.0 / 2.54).abs() < 1e-9);
        assert!((options.margin_left.unwrap() - 1.5 / 2.54).abs() < 1e-9);
        assert_eq!(options.print_background, Some(true));
        assert_eq!(options.prefer_css_page_size, Some(true));
        assert_eq!(options.display_header_footer, Some(false));
    }

    /// Verifies that custom margins flow through.
    #[test]
    fn test_print_options_custom_margins() {
        let page = PageSettings {
            margins: Margins {
                top: 0.0,
                bottom: 2.54,
                left: 0.0,
                right: 0.0,
            },
            ..PageSettings::a4()
        };
        let options = print_options(&page);
        assert_eq!(options.margin_top, Some(0.0));
        assert_eq!(options.margin_bottom, Some(1.0));
    }

    /// Verifies the data URL and scratch file paths.
    #[test]
    fn test_document_url() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ChromeRenderer::from_config(&ConverterConfig::default())
            .unwrap()
            .with_scratch_dir(dir.path());

        let (url, file) = renderer.document_url("<h1>Hi & bye</h1>").unwrap();
        assert_eq!(url, "data:text/html;charset=utf-8,%3Ch1%3EHi%20%26%20bye%3C%2Fh1%3E");
        assert!(file.is_none());

        let big = "x".repeat(MAX_DATA_URL_LEN + 1);
        let (url, file) = renderer.document_url(&big).unwrap();
        let file = file.unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(std::fs::read_to_string(file.path()).unwrap().len(), big.len());

        drop(file);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Verifies the idle window resets on activity and fires after the full window.
    #[test]
    fn test_idle_window() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut idle = IdleWindow::new(Duration::from_millis(500));

        assert!(!idle.observe(false, ms(0)));
        assert!(!idle.observe(false, ms(400)));
        // A request starting late restarts the window.
        assert!(!idle.observe(true, ms(450)));
        assert!(!idle.observe(false, ms(600)));
        assert!(!idle.observe(false, ms(1000)));
        assert!(idle.observe(false, ms(1100)));
    }

    /// Verifies request bookkeeping, including redirects and data URLs.
    #[test]
    fn test_request_set() {
        let requests = RequestSet::default();
        requests.sent("1", "https://cdn.example.com/font.woff2");
        requests.sent("2", "https://cdn.example.com/logo.png");
        requests.sent("2", "https://img.example.com/logo.png");
        requests.sent("3", "data:image/png;base64,AAAA");
        assert_eq!(requests.len(), 2);

        requests.done("1");
        assert_eq!(requests.len(), 1);
        requests.done("unknown");
        requests.done("2");
        assert_eq!(requests.len(), 0);
    }

    /// Verifies a closed incognito tab leaves no browser context behind.
    #[test]
    #[ignore = "requires Chrome"]
    fn test_incognito_context_disposed() {
        let browser = ChromeSessionFactory::with_defaults().create().unwrap();

        let incognito = IncognitoTab::open(&browser, Duration::from_secs(10)).unwrap();
        let context_id = incognito.context_id.clone();
        assert!(incognito.close());

        // Disposing again fails once the context is gone.
        assert!(!dispose_context(&browser, &context_id));
    }

    /// Verifies the session survives a render and is reused.
    #[test]
    #[ignore = "requires Chrome"]
    fn test_session_reused_after_render() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ChromeRenderer::from_config(&ConverterConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        for name in ["a.pdf", "b.pdf"] {
            renderer
                .render_to_pdf("<p>x</p>", &dir.path().join(name), &PageSettings::a4(), &cancel)
                .unwrap();
        }

        let stats = renderer.stats().unwrap();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.total, 1);
    }

    /// End-to-end render with a real browser.
    #[test]
    #[ignore = "requires Chrome"]
    fn test_render_with_chrome() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ChromeRenderer::from_config(&ConverterConfig::default()).unwrap();
        let out = dir.path().join("out.pdf");

        renderer
            .render_to_pdf(
                "<h1>Hello</h1><p>World</p>",
                &out,
                &PageSettings::a4(),
                &CancellationToken::new(),
            )
            .unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(lopdf::Document::load_mem(&bytes).is_ok());
        assert_eq!(renderer.stats().unwrap().available, 1);
    }
}
