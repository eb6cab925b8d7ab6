//! Page driver - infrastructure layer
//!
//! Holds one Page and exposes the primitive capabilities the upper layers
//! need: evaluate JS, navigate, wait, click, type, screenshot. It knows
//! nothing about companies, periods or sections.

use crate::error::AppError;
use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::time::sleep;

/// Default element-wait budget. A hung remote page resolves only through
/// this timeout cascading into an error.
const DEFAULT_WAIT_SECS: u64 = 40;
const POLL_INTERVAL_MS: u64 = 250;

pub struct PageDriver {
    page: Page,
}

impl PageDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate JS and return the JSON result.
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// Evaluate JS and deserialize the result.
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AppError::navigation_failed(url, e))?;
        Ok(())
    }

    /// Poll until the selector matches an element, up to the default budget.
    pub async fn wait_for(&self, selector: &str) -> Result<()> {
        self.wait_for_secs(selector, DEFAULT_WAIT_SECS).await
    }

    pub async fn wait_for_secs(&self, selector: &str, secs: u64) -> Result<()> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
        loop {
            if let Ok(JsonValue::Bool(true)) = self.eval(script.clone()).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::timeout(selector, secs).into());
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    /// True if the selector matches right now, without waiting.
    pub async fn exists(&self, selector: &str) -> Result<bool> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        Ok(matches!(self.eval(script).await?, JsonValue::Bool(true)))
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        Ok(())
    }

    /// Clear a field and type a value into it.
    pub async fn type_into(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        let clear = format!(
            "document.querySelector({}).value = ''",
            serde_json::to_string(selector)?
        );
        self.eval(clear).await?;
        element.type_str(value).await?;
        Ok(())
    }

    /// Fire a DOM event on an element (the portal hangs side effects off
    /// blur/change handlers).
    pub async fn dispatch_event(&self, selector: &str, event: &str) -> Result<()> {
        let script = format!(
            "document.querySelector({}).dispatchEvent(new Event({}))",
            serde_json::to_string(selector)?,
            serde_json::to_string(event)?
        );
        self.eval(script).await?;
        Ok(())
    }

    /// Visible text of the first matching element, if any.
    pub async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.innerText : null; }})()",
            serde_json::to_string(selector)?
        );
        match self.eval(script).await? {
            JsonValue::String(s) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    /// PNG screenshot of one element (used for the captcha image).
    pub async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self.page.find_element(selector).await?;
        let bytes = element.screenshot(CaptureScreenshotFormat::Png).await?;
        Ok(bytes)
    }

    /// Best-effort close; errors are swallowed because close runs on cleanup
    /// paths where the original error matters more.
    pub async fn close(self) {
        let _ = self.page.close().await;
    }
}
