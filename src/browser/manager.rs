use super::config::BrowserConfig;
use super::context::ChromeContext;
use super::{BrowserBackend, PageContext};
use crate::error::AcquisitionError;
use crate::http_client::random_user_agent;
use headless_chrome::protocol::cdp::Target::GetBrowserContexts;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;

/// Owns the Chrome process and opens isolated contexts on it
pub struct BrowserManager {
    browser: Arc<Browser>,
    /// Tab in the default context that carries browser-level commands
    control: Arc<Tab>,
    config: BrowserConfig,
    user_agent: String,
}

impl BrowserManager {
    /// Launch Chrome with the given configuration
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());

        let args = Self::build_args(&config, &user_agent);
        let launch_options = Self::launch_options(&config, &args)?;

        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;
        let control = browser
            .new_tab()
            .map_err(|e| BrowserError::InitializationError(format!("control tab: {}", e)))?;

        log::info!(
            "Browser launched (headless: {}, pool size: {})",
            config.headless,
            config.pool_size()
        );

        Ok(Self {
            browser: Arc::new(browser),
            control,
            config,
            user_agent,
        })
    }

    fn launch_options<'a>(
        config: &BrowserConfig,
        args: &'a [String],
    ) -> Result<LaunchOptions<'a>, BrowserError> {
        LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(config.idle_timeout())
            .args(args.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }

    /// Chrome flags derived from the configuration
    fn build_args(config: &BrowserConfig, user_agent: &str) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            format!("--user-agent={}", user_agent),
        ];

        if config.disable_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }

        for flag in &config.chrome_flags {
            if !args.contains(flag) {
                args.push(flag.clone());
            }
        }

        args
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Browser context ids Chrome currently holds
    pub fn context_ids(&self) -> Result<Vec<String>, AcquisitionError> {
        self.control
            .call_method(GetBrowserContexts(None))
            .map(|contexts| contexts.browser_context_ids)
            .map_err(|e| AcquisitionError::Session(format!("Context listing failed: {}", e)))
    }

    /// Open an isolated context with its tab exposed
    pub fn open_context(&self) -> Result<ChromeContext, AcquisitionError> {
        let context = self
            .browser
            .new_context()
            .map_err(|e| AcquisitionError::Session(format!("Context creation failed: {}", e)))?;
        let context_id = context.get_id().to_string();

        let tab = match context.new_tab() {
            Ok(tab) => tab,
            Err(e) => {
                ChromeContext::dispose(&self.control, &context_id);
                return Err(AcquisitionError::Session(format!(
                    "Tab creation failed: {}",
                    e
                )));
            }
        };

        let mut chrome_context = ChromeContext::new(self.control.clone(), context_id, tab);
        if let Err(e) = chrome_context.set_user_agent(&self.user_agent) {
            chrome_context.close();
            return Err(e);
        }

        Ok(chrome_context)
    }
}

impl BrowserBackend for BrowserManager {
    fn new_context(&self) -> Result<Box<dyn PageContext>, AcquisitionError> {
        Ok(Box::new(self.open_context()?))
    }
}

/// Errors raised while launching the browser
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_args_include_stealth_flags_once() {
        let config = BrowserConfig::stealth_mode();
        let args = BrowserManager::build_args(&config, "UA");

        let automation = args
            .iter()
            .filter(|a| a.contains("AutomationControlled"))
            .count();
        assert_eq!(automation, 1);
        assert!(args.contains(&"--user-agent=UA".to_string()));
        assert!(args.contains(&"--blink-settings=imagesEnabled=false".to_string()));
    }

    #[test]
    fn test_images_enabled_when_configured() {
        let config = BrowserConfig {
            disable_images: false,
            ..BrowserConfig::default()
        };
        let args = BrowserManager::build_args(&config, "UA");
        assert!(!args.iter().any(|a| a.contains("imagesEnabled")));
    }

    #[test]
    fn test_launch_options_keep_browser_alive_between_misses() {
        let config = BrowserConfig::default();
        let args = BrowserManager::build_args(&config, "UA");
        let options = BrowserManager::launch_options(&config, &args).unwrap();

        assert_eq!(options.idle_browser_timeout, config.idle_timeout());
        // Cache misses can be a full TTL apart
        assert!(options.idle_browser_timeout > Duration::from_secs(3600));
        assert_eq!(options.args.len(), args.len());

        let short = BrowserConfig {
            idle_timeout_secs: 5,
            ..BrowserConfig::default()
        };
        let options = BrowserManager::launch_options(&short, &args).unwrap();
        assert_eq!(options.idle_browser_timeout, Duration::from_secs(5));
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_browser_manager_creation() {
        let manager = BrowserManager::new(BrowserConfig::default()).unwrap();
        let mut context = manager.new_context().unwrap();
        context.close();
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_contexts_open_after_browser_sat_idle() {
        let manager = BrowserManager::new(BrowserConfig::default()).unwrap();

        // Longer than headless_chrome's own 30s event-loop default
        std::thread::sleep(Duration::from_secs(35));
        let mut context = manager.new_context().unwrap();
        context.close();
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_close_disposes_browser_context() {
        let manager = BrowserManager::new(BrowserConfig::default()).unwrap();
        let mut context = manager.open_context().unwrap();
        let id = context.id().to_string();
        assert!(manager.context_ids().unwrap().contains(&id));

        context.close();
        assert!(!manager.context_ids().unwrap().contains(&id));
    }
}
