use serde::Deserialize;
use std::time::Duration;

/// Configuration for the headless browser and its context pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    pub window_width: u32,
    pub window_height: u32,

    /// Custom user agent; a realistic desktop one is picked when unset
    pub user_agent: Option<String>,

    /// Budget for one whole acquisition: navigation, readiness wait, snapshot
    pub timeout_secs: u64,

    /// Disable image loading for performance
    pub disable_images: bool,

    /// Maximum number of contexts open at once
    pub pool_size: usize,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,

    /// How long the browser's event loop waits for any event before it
    /// stops. Contexts cannot be opened after that, so it stays far above
    /// the longest gap between cache misses.
    pub idle_timeout_secs: u64,
}

/// One year
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            user_agent: None,
            timeout_secs: 30,
            disable_images: true,
            pool_size: 2,
            chrome_flags: vec![],
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl BrowserConfig {
    /// Configuration with the launch flags that hide automation
    pub fn stealth_mode() -> Self {
        let mut config = Self::default();
        config.chrome_flags = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
        ];
        config
    }

    /// Configuration for debugging (non-headless, visible browser)
    pub fn debug_mode() -> Self {
        let mut config = Self::stealth_mode();
        config.headless = false;
        config.disable_images = false;
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Pool size, never zero
    pub fn pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}
