use crate::error::AppError;
use anyhow::Result;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, info};

/// Attach to the already-running browser on its debug port.
///
/// The CDP event handler is driven on a background task for the lifetime of
/// the connection.
pub async fn connect_to_browser(port: u16) -> Result<Browser> {
    let browser_url = format!("http://localhost:{}", port);
    info!("connecting to browser: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url)
        .await
        .map_err(|e| AppError::browser_connection_failed(port, e))?;
    debug!("browser connection established");

    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // Give the browser a moment to sync state after attach
    sleep(tokio::time::Duration::from_millis(300)).await;

    Ok(browser)
}

/// Open a fresh page for one company session and navigate it to the portal.
///
/// Every company gets its own page; sessions are never shared across
/// companies, so one company's cookies cannot leak into another's login.
pub async fn open_company_page(browser: &Browser, portal_url: &str) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| AppError::Browser(crate::error::BrowserError::PageCreationFailed {
            source: Box::new(e),
        }))?;

    page.goto(portal_url)
        .await
        .map_err(|e| AppError::navigation_failed(portal_url, e))?;
    debug!("navigated to {}", portal_url);

    Ok(page)
}
