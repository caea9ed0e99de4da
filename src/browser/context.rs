use super::{CloseHandle, PageContext};
use crate::error::AcquisitionError;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Target::DisposeBrowserContext;
use headless_chrome::Tab;
use std::sync::Arc;
use std::time::Duration;

/// One isolated Chrome browser context with a single tab
pub struct ChromeContext {
    context_id: String,
    tab: Arc<Tab>,
    handle: CloseHandle,
}

impl ChromeContext {
    /// Wrap a context's tab. `control` is a tab outside the context that
    /// carries the dispose command once the context's own tab is gone.
    pub fn new(control: Arc<Tab>, context_id: String, tab: Arc<Tab>) -> Self {
        let handle = {
            let tab = tab.clone();
            let context_id = context_id.clone();
            CloseHandle::new(move || {
                if let Err(e) = tab.close(true) {
                    log::debug!("Tab close failed: {}", e);
                }
                Self::dispose(&control, &context_id);
            })
        };

        Self {
            context_id,
            tab,
            handle,
        }
    }

    pub fn set_user_agent(&mut self, user_agent: &str) -> Result<(), AcquisitionError> {
        self.tab
            .set_user_agent(user_agent, Some("en-US,en;q=0.9"), None)
            .map_err(|e| AcquisitionError::Session(format!("Failed to set user agent: {}", e)))
    }

    /// Drop a browser context and everything in it
    pub fn dispose(control: &Tab, context_id: &str) {
        let result = control.call_method(DisposeBrowserContext {
            browser_context_id: context_id.to_string(),
        });
        if let Err(e) = result {
            log::warn!("Failed to dispose browser context {}: {}", context_id, e);
        }
    }

    pub fn id(&self) -> &str {
        &self.context_id
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

impl PageContext for ChromeContext {
    fn add_init_script(&mut self, source: &str) -> Result<(), AcquisitionError> {
        self.tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: source.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map(|_| ())
            .map_err(|e| AcquisitionError::Session(format!("Failed to register script: {}", e)))
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AcquisitionError> {
        self.tab.set_default_timeout(timeout);

        self.tab
            .navigate_to(url)
            .map_err(|e| {
                AcquisitionError::Session(format!("Failed to navigate to {}: {}", url, e))
            })?;

        self.tab.wait_until_navigated().map_err(|e| {
            let message = e.to_string();
            if message.to_lowercase().contains("timeout")
                || message.to_lowercase().contains("timed out")
            {
                AcquisitionError::Timeout(format!("navigation to {}", url))
            } else {
                AcquisitionError::Session(format!("Navigation failed for {}: {}", url, message))
            }
        })?;

        Ok(())
    }

    fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AcquisitionError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|_| AcquisitionError::Timeout(format!("selector {}", selector)))
    }

    fn content(&mut self) -> Result<String, AcquisitionError> {
        self.tab
            .get_content()
            .map_err(|e| AcquisitionError::Session(format!("HTML extraction failed: {}", e)))
    }

    fn close_handle(&self) -> CloseHandle {
        self.handle.clone()
    }
}

impl Drop for ChromeContext {
    fn drop(&mut self) {
        self.close();
    }
}
