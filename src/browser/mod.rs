//! Browser automation for catalog pages that need JavaScript or resist bots
//!
//! The scrape adapter talks to a [`BrowserBackend`] that hands out isolated
//! [`PageContext`]s. [`BrowserManager`] is the headless Chrome backend; tests
//! plug in their own.
//!
//! Contexts are always held through a [`ScopedContext`], which closes the
//! context when it goes out of scope, whatever path the caller takes out.
//!
//! # Example
//!
//! ```no_run
//! use catalog_scraper::browser::{BrowserBackend, BrowserConfig, BrowserManager, ScopedContext};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BrowserManager::new(BrowserConfig::stealth_mode())?;
//! let mut context = ScopedContext::new(manager.new_context()?);
//!
//! context.navigate("https://example.com", Duration::from_secs(30))?;
//! context.wait_for_selector("h1", Duration::from_secs(10))?;
//! let html = context.content()?;
//!
//! println!("Extracted {} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod manager;

pub use config::BrowserConfig;
pub use context::ChromeContext;
pub use manager::{BrowserError, BrowserManager};

use crate::error::AcquisitionError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something that can open isolated browser contexts
pub trait BrowserBackend: Send + Sync {
    /// Open a context with its own cookies and storage
    fn new_context(&self) -> Result<Box<dyn PageContext>, AcquisitionError>;
}

/// One isolated browsing context with a single page.
///
/// Calls block; callers run them off the async runtime.
pub trait PageContext: Send {
    /// Register a script that runs before any page script on every document
    fn add_init_script(&mut self, source: &str) -> Result<(), AcquisitionError>;

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AcquisitionError>;

    /// Block until `selector` matches, failing with `Timeout` after `timeout`
    fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AcquisitionError>;

    /// Rendered markup of the current page
    fn content(&mut self) -> Result<String, AcquisitionError>;

    /// Handle that releases this context from any thread
    fn close_handle(&self) -> CloseHandle;

    /// Release the context. Safe to call more than once.
    fn close(&mut self) {
        self.close_handle().close();
    }
}

/// Releases a context exactly once, from whichever side gets there first.
///
/// A session blocked inside a backend call still holds its context; the
/// caller that gave up on it closes it through a clone of this handle.
#[derive(Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
    release: Arc<dyn Fn() + Send + Sync>,
}

impl CloseHandle {
    pub fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            release: Arc::new(release),
        }
    }

    /// Run the release on the first call only
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            (self.release)();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns a context for the length of one acquisition and closes it on drop
pub struct ScopedContext {
    context: Box<dyn PageContext>,
}

impl ScopedContext {
    pub fn new(context: Box<dyn PageContext>) -> Self {
        Self { context }
    }
}

impl Deref for ScopedContext {
    type Target = dyn PageContext;

    fn deref(&self) -> &Self::Target {
        self.context.as_ref()
    }
}

impl DerefMut for ScopedContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_mut()
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        self.context.close();
        log::debug!("Browser context closed");
    }
}
