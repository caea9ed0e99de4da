use super::{AdapterResult, RawRecord, ScrapedRecord};
use crate::browser::{BrowserBackend, CloseHandle, ScopedContext};
use crate::error::AcquisitionError;
use crate::models::MediaType;
use crate::stealth;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Slack given to a blocking session on top of its own deadline
const SESSION_GRACE: Duration = Duration::from_secs(2);

/// Where a scraped category lives and how its listing markup is shaped
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScrapeTarget {
    pub media_type: MediaType,
    /// Listing URL; `{page}` is replaced with the page number
    pub url: String,
    /// Waited for after navigation before the page is read
    #[serde(default = "default_ready_selector")]
    pub ready_selector: String,
    /// Container of the listing. When it is present an empty page is a real
    /// empty page rather than a layout change.
    #[serde(default)]
    pub list_selector: Option<String>,
    #[serde(default = "default_item_selector")]
    pub item_selector: String,
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    #[serde(default)]
    pub poster_selector: Option<String>,
    #[serde(default)]
    pub year_selector: Option<String>,
}

fn default_ready_selector() -> String {
    "body".to_string()
}

fn default_item_selector() -> String {
    ".movie-item".to_string()
}

fn default_title_selector() -> String {
    ".movie-title".to_string()
}

fn default_link_selector() -> String {
    "a".to_string()
}

impl ScrapeTarget {
    pub fn new(media_type: MediaType, url: impl Into<String>) -> Self {
        Self {
            media_type,
            url: url.into(),
            ready_selector: default_ready_selector(),
            list_selector: None,
            item_selector: default_item_selector(),
            title_selector: default_title_selector(),
            link_selector: default_link_selector(),
            poster_selector: None,
            year_selector: None,
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        if self.url.contains("{page}") {
            self.url.replace("{page}", &page.to_string())
        } else if self.url.contains('?') {
            format!("{}&page={}", self.url, page)
        } else {
            format!("{}?page={}", self.url, page)
        }
    }

    /// Check the URL and every selector parse
    pub fn validate(&self) -> Result<(), String> {
        Url::parse(&self.page_url(1)).map_err(|e| format!("invalid url {}: {}", self.url, e))?;

        let selectors = [
            Some(&self.ready_selector),
            self.list_selector.as_ref(),
            Some(&self.item_selector),
            Some(&self.title_selector),
            Some(&self.link_selector),
            self.poster_selector.as_ref(),
            self.year_selector.as_ref(),
        ];
        for selector in selectors.into_iter().flatten() {
            Selector::parse(selector)
                .map_err(|e| format!("invalid selector {}: {:?}", selector, e))?;
        }
        Ok(())
    }
}

/// Acquires listing pages through a pool of browser contexts.
///
/// At most `pool_size` sessions run at once; every session gets a fresh
/// context that is closed on all exit paths. A session that overruns its
/// deadline is closed and its slot freed before `fetch` returns, even while
/// its thread is still blocked in the backend.
pub struct ScrapeAdapter {
    backend: Arc<dyn BrowserBackend>,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl ScrapeAdapter {
    pub fn new(backend: Arc<dyn BrowserBackend>, pool_size: usize, timeout: Duration) -> Self {
        Self {
            backend,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch(
        &self,
        target: &ScrapeTarget,
        page: u32,
    ) -> Result<AdapterResult, AcquisitionError> {
        let url = target.page_url(page);
        let started = tokio::time::Instant::now();

        let permit = tokio::time::timeout(self.timeout, self.pool.clone().acquire_owned())
            .await
            .map_err(|_| AcquisitionError::Timeout(format!("browser slot for {}", url)))?
            .map_err(|_| AcquisitionError::Session("browser pool closed".to_string()))?;

        let budget = self.timeout.saturating_sub(started.elapsed());
        let slot = SessionSlot::shared(permit);
        let backend = self.backend.clone();
        let session_slot = slot.clone();
        let session_target = target.clone();
        let session_url = url.clone();

        let session = tokio::task::spawn_blocking(move || {
            let result = run_session(
                backend.as_ref(),
                &session_target,
                &session_url,
                budget,
                &session_slot,
            );
            SessionSlot::lock(&session_slot).permit.take();
            result
        });

        match tokio::time::timeout(budget + SESSION_GRACE, session).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AcquisitionError::Session(format!(
                "Browser task failed: {}",
                e
            ))),
            Err(_) => {
                log::warn!("Browser session for {} overran its deadline", url);
                abandon(&slot).await;
                Err(AcquisitionError::Timeout(format!("navigation to {}", url)))
            }
        }
    }

    /// Pool slots not held by a session
    pub fn available_slots(&self) -> usize {
        self.pool.available_permits()
    }
}

/// What a running session shares with the call waiting on it
#[derive(Default)]
struct SessionSlot {
    handle: Option<CloseHandle>,
    permit: Option<OwnedSemaphorePermit>,
    abandoned: bool,
}

type SharedSlot = Arc<Mutex<SessionSlot>>;

impl SessionSlot {
    fn shared(permit: OwnedSemaphorePermit) -> SharedSlot {
        Arc::new(Mutex::new(SessionSlot {
            permit: Some(permit),
            ..SessionSlot::default()
        }))
    }

    fn lock(slot: &SharedSlot) -> MutexGuard<'_, SessionSlot> {
        slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the session's context. `false` once the caller has given up.
    fn register(slot: &SharedSlot, handle: CloseHandle) -> bool {
        let mut slot = Self::lock(slot);
        if slot.abandoned {
            return false;
        }
        slot.handle = Some(handle);
        true
    }
}

/// Close the context of a session still blocked in the backend and free its
/// pool slot before the caller returns
async fn abandon(slot: &SharedSlot) {
    let (handle, permit) = {
        let mut slot = SessionSlot::lock(slot);
        slot.abandoned = true;
        (slot.handle.take(), slot.permit.take())
    };

    if let Some(handle) = handle {
        // Closing talks to the browser and may block
        if let Err(e) = tokio::task::spawn_blocking(move || handle.close()).await {
            log::warn!("Closing abandoned browser context failed: {}", e);
        }
    }
    drop(permit);
}

/// One blocking acquisition: open, shim, navigate, wait, read, close
fn run_session(
    backend: &dyn BrowserBackend,
    target: &ScrapeTarget,
    url: &str,
    budget: Duration,
    slot: &SharedSlot,
) -> Result<AdapterResult, AcquisitionError> {
    let deadline = Instant::now() + budget;
    let remaining = || deadline.saturating_duration_since(Instant::now());
    let timed_out = || AcquisitionError::Timeout(format!("navigation to {}", url));

    let mut context = ScopedContext::new(backend.new_context()?);
    let handle = context.close_handle();
    if !SessionSlot::register(slot, handle.clone()) {
        return Err(timed_out());
    }

    let (script, patches) = stealth::build_script();
    let failed = patches.iter().filter(|p| p.error.is_some()).count();
    if failed > 0 {
        log::warn!("{} of {} stealth patches not rendered", failed, patches.len());
    }
    if let Err(e) = context.add_init_script(&script) {
        log::warn!("Stealth script not installed for {}: {}", url, e);
    }

    log::debug!("Navigating to {}", url);
    let navigated = context.navigate(url, remaining());
    if handle.is_closed() {
        return Err(timed_out());
    }
    navigated?;

    let wait = remaining();
    if wait.is_zero() {
        return Err(timed_out());
    }
    context.wait_for_selector(&target.ready_selector, wait)?;

    let html = context.content()?;
    if handle.is_closed() {
        return Err(timed_out());
    }
    let listing = parse_listing(&html, target, url)?;

    if listing.records.is_empty() && !listing.structure_present {
        return Err(AcquisitionError::SchemaMismatch(format!(
            "no {} blocks at {}",
            target.item_selector, url
        )));
    }

    log::info!(
        "Scraped {} items from {} ({} blocks skipped)",
        listing.records.len(),
        url,
        listing.blocks - listing.records.len()
    );

    Ok(AdapterResult {
        media_type: target.media_type,
        records: listing
            .records
            .into_iter()
            .map(RawRecord::Scraped)
            .collect(),
    })
}

/// Item blocks found on one listing page
#[derive(Debug, Default)]
pub struct Listing {
    pub records: Vec<ScrapedRecord>,
    /// Blocks matched by the item selector, including skipped ones
    pub blocks: usize,
    /// Whether the page has the listing layout at all
    pub structure_present: bool,
}

fn selector(source: &str) -> Result<Selector, AcquisitionError> {
    Selector::parse(source).map_err(|e| {
        AcquisitionError::SchemaMismatch(format!("invalid selector {}: {:?}", source, e))
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolutize(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:")
}

/// Extract item blocks from rendered listing markup.
///
/// Blocks without a title or a link are skipped. Links and poster sources
/// are resolved against `page_url`.
pub fn parse_listing(
    html: &str,
    target: &ScrapeTarget,
    page_url: &str,
) -> Result<Listing, AcquisitionError> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let item_sel = selector(&target.item_selector)?;
    let title_sel = selector(&target.title_selector)?;
    let link_sel = selector(&target.link_selector)?;
    let poster_sel = target.poster_selector.as_deref().map(selector).transpose()?;
    let year_sel = target.year_selector.as_deref().map(selector).transpose()?;

    let mut listing = Listing::default();

    for block in document.select(&item_sel) {
        listing.blocks += 1;

        // The block itself may be the anchor
        let link_el = if block.value().name() == "a" && block.value().attr("href").is_some() {
            Some(block)
        } else {
            block.select(&link_sel).next()
        };
        let link = link_el
            .and_then(|el| el.value().attr("href"))
            .filter(|href| usable_href(href))
            .map(|href| absolutize(base.as_ref(), href.trim()));

        let title = block
            .select(&title_sel)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                link_el
                    .and_then(|el| el.value().attr("title"))
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
            });

        let (Some(title), Some(link)) = (title, link) else {
            log::debug!("Skipping block {} on {}", listing.blocks, page_url);
            continue;
        };

        let id_hint = block
            .value()
            .attr("data-id")
            .or_else(|| link_el.and_then(|el| el.value().attr("data-id")))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let poster = poster_sel.as_ref().and_then(|sel| {
            block.select(sel).next().and_then(|img| {
                ["data-src", "src"]
                    .iter()
                    .filter_map(|attr| img.value().attr(attr))
                    .map(str::trim)
                    .find(|src| !src.is_empty() && !src.starts_with("data:"))
                    .map(|src| absolutize(base.as_ref(), src))
            })
        });

        let year = year_sel.as_ref().and_then(|sel| {
            block
                .select(sel)
                .next()
                .map(text_of)
                .filter(|t| !t.is_empty())
        });

        listing.records.push(ScrapedRecord {
            id_hint,
            title,
            link,
            poster,
            year,
        });
    }

    listing.structure_present = listing.blocks > 0
        || match target.list_selector.as_deref() {
            Some(list) => document.select(&selector(list)?).next().is_some(),
            None => false,
        };

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ScrapeTarget {
        ScrapeTarget {
            list_selector: Some(".movie-list".to_string()),
            poster_selector: Some("img".to_string()),
            year_selector: Some(".movie-year".to_string()),
            ..ScrapeTarget::new(MediaType::Movie, "https://example.com/movies?page={page}")
        }
    }

    #[test]
    fn test_page_url() {
        assert_eq!(target().page_url(3), "https://example.com/movies?page=3");
        let plain = ScrapeTarget::new(MediaType::Tv, "https://example.com/tv");
        assert_eq!(plain.page_url(2), "https://example.com/tv?page=2");
        let query = ScrapeTarget::new(MediaType::Tv, "https://example.com/tv?sort=new");
        assert_eq!(query.page_url(2), "https://example.com/tv?sort=new&page=2");
    }

    #[test]
    fn test_validate_rejects_bad_selector() {
        assert!(target().validate().is_ok());
        let bad = ScrapeTarget {
            item_selector: "div[".to_string(),
            ..target()
        };
        assert!(bad.validate().is_err());
        let bad_url = ScrapeTarget::new(MediaType::Movie, "not a url");
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_parse_listing_skips_incomplete_blocks() {
        let html = r#"
            <div class="movie-list">
              <div class="movie-item" data-id="42">
                <a href="/movie/42-heat"><span class="movie-title"> Heat </span></a>
                <img data-src="/img/heat.jpg">
                <span class="movie-year">1995</span>
              </div>
              <div class="movie-item">
                <span class="movie-title">No link here</span>
              </div>
              <div class="movie-item">
                <a href="https://cdn.example.org/movie/7" title="Se7en"></a>
              </div>
            </div>"#;

        let listing = parse_listing(html, &target(), "https://example.com/movies?page=1").unwrap();
        assert_eq!(listing.blocks, 3);
        assert!(listing.structure_present);
        assert_eq!(listing.records.len(), 2);

        let heat = &listing.records[0];
        assert_eq!(heat.id_hint.as_deref(), Some("42"));
        assert_eq!(heat.title, "Heat");
        assert_eq!(heat.link, "https://example.com/movie/42-heat");
        assert_eq!(heat.poster.as_deref(), Some("https://example.com/img/heat.jpg"));
        assert_eq!(heat.year.as_deref(), Some("1995"));

        let seven = &listing.records[1];
        assert_eq!(seven.title, "Se7en");
        assert_eq!(seven.link, "https://cdn.example.org/movie/7");
        assert!(seven.poster.is_none());
    }

    #[test]
    fn test_empty_listing_with_container_is_not_a_mismatch() {
        let html = r#"<div class="movie-list"></div>"#;
        let listing = parse_listing(html, &target(), "https://example.com/movies?page=9").unwrap();
        assert!(listing.records.is_empty());
        assert!(listing.structure_present);

        let listing =
            parse_listing("<p>Access denied</p>", &target(), "https://example.com/").unwrap();
        assert!(!listing.structure_present);
    }
}
