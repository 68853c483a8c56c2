//! Embedded frame extraction via a headless browser.

use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        fetch::{
            ContinueRequestParams, EnableParams, EventRequestPaused,
            FailRequestParams,
        },
        network::{ErrorReason, ResourceType},
    },
    error::CdpError,
    Page,
};
use futures::StreamExt;
use std::time::Duration;
use url::Url;

/// How long a navigation may take before the extraction is abandoned.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_millis(20_000);

/// How long the browser may take to start up.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// The substring an embedded frame's address must contain to be the one
/// we're after.
pub const FRAME_MARKER: &str = "rutube";

const FRAME_SELECTOR: &str = r#"iframe[src*="rutube"]"#;

/// Something that can pull the embedded frame URL out of a page.
///
/// The production implementation is [`BrowserExtractor`]; tests swap in a
/// deterministic fake so no browser is needed.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Load `page_url` and return the address of the embedded frame found
    /// on it.
    async fn extract(&self, page_url: &Url) -> Result<Url, ExtractionError>;
}

/// The reason an extraction run failed.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The browser couldn't be configured.
    #[error("unable to configure the browser: {0}")]
    Configuration(String),
    /// The browser didn't come up within [`LAUNCH_TIMEOUT`].
    #[error("the browser did not start in time")]
    LaunchTimedOut,
    /// Loading the page took longer than [`NAVIGATION_TIMEOUT`].
    #[error("the page did not load in time")]
    NavigationTimedOut,
    /// The page loaded, but no frame matching [`FRAME_MARKER`] was on it.
    #[error("no embedded frame matching \"rutube\" was found")]
    FrameNotFound,
    /// The frame's `src` attribute isn't a URL.
    #[error("the embedded frame's address is not a valid URL")]
    MalformedFrameUrl(#[from] url::ParseError),
    /// The browser misbehaved somewhere along the way.
    #[error(transparent)]
    Browser(#[from] CdpError),
}

/// An [`Extractor`] which drives an isolated headless browser per call.
///
/// Every call launches a fresh browser, so no state leaks between
/// extractions, and the browser is torn down on every exit path.
#[derive(Debug, Default)]
pub struct BrowserExtractor {}

impl BrowserExtractor {
    /// Create a new [`BrowserExtractor`].
    pub fn new() -> Self { BrowserExtractor::default() }

    async fn scrape(
        &self,
        page: &Page,
        page_url: &Url,
    ) -> Result<Url, ExtractionError> {
        restrict_to_documents(page).await?;

        tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(page_url.as_str()))
            .await
            .map_err(|_| ExtractionError::NavigationTimedOut)??;

        let frame = tokio::time::timeout(
            NAVIGATION_TIMEOUT,
            page.find_element(FRAME_SELECTOR),
        )
        .await
        .map_err(|_| ExtractionError::NavigationTimedOut)?
        .map_err(|_| ExtractionError::FrameNotFound)?;

        let src = frame
            .attribute("src")
            .await?
            .ok_or(ExtractionError::FrameNotFound)?;

        Ok(Url::parse(&src)?)
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    async fn extract(&self, page_url: &Url) -> Result<Url, ExtractionError> {
        log::debug!("Launching a browser for \"{}\"", page_url);

        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(ExtractionError::Configuration)?;

        let (mut browser, mut handler) =
            tokio::time::timeout(LAUNCH_TIMEOUT, Browser::launch(config))
                .await
                .map_err(|_| ExtractionError::LaunchTimedOut)??;

        // The handler loop has to be polled for the whole session or no
        // CDP message ever makes it to the browser.
        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = match browser.new_page("about:blank").await {
            Ok(page) => self.scrape(&page, page_url).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = browser.close().await {
            log::warn!("Unable to close the browser cleanly: {}", e);
        }
        driver.abort();

        result
    }
}

/// Abort every request that isn't a document, so the page skips images,
/// stylesheets, scripts and media while the top-level document and its
/// frames still load.
async fn restrict_to_documents(page: &Page) -> Result<(), CdpError> {
    page.execute(EnableParams::default()).await?;

    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let page = page.clone();

    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request_id = event.request_id.clone();
            let verdict = if event.resource_type == ResourceType::Document {
                page.execute(ContinueRequestParams::new(request_id))
                    .await
                    .map(drop)
            } else {
                page.execute(FailRequestParams::new(
                    request_id,
                    ErrorReason::Aborted,
                ))
                .await
                .map(drop)
            };

            if let Err(e) = verdict {
                // The page is probably gone already; nothing to salvage.
                log::debug!("Unable to answer a paused request: {}", e);
            }
        }
    });

    Ok(())
}
