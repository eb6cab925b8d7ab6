//! Live-browser integration tests.
//!
//! Ignored by default; they need a Chrome instance started with
//! `--remote-debugging-port` plus real portal credentials in the roster.
//! Run manually with `cargo test -- --ignored --nocapture`.

use itax_extractor::browser::{connect_to_browser, open_company_page};
use itax_extractor::infrastructure::PageDriver;
use itax_extractor::models::load_roster;
use itax_extractor::services::captcha::{CaptchaSolver, TesseractOcr};
use itax_extractor::services::session::SessionDriver;
use itax_extractor::utils::logging;
use itax_extractor::Config;
use std::path::Path;

#[tokio::test]
#[ignore]
async fn test_browser_connection() {
    let config = Config::from_env();
    logging::init(config.verbose_logging);
    let result = connect_to_browser(config.browser_debug_port).await;

    assert!(result.is_ok(), "should attach to the debug browser");
}

#[tokio::test]
#[ignore]
async fn test_portal_page_opens() {
    let config = Config::from_env();
    logging::init(config.verbose_logging);
    let browser = connect_to_browser(config.browser_debug_port)
        .await
        .expect("browser connection failed");

    let page = open_company_page(&browser, &config.portal_url)
        .await
        .expect("portal page failed to open");

    let driver = PageDriver::new(page);
    let title: String = driver
        .eval_as("document.title")
        .await
        .expect("title read failed");
    assert!(!title.is_empty(), "portal should render a titled page");
    driver.close().await;
}

#[tokio::test]
#[ignore]
async fn test_login_with_first_roster_company() {
    let config = Config::from_env();
    logging::init(config.verbose_logging);
    let companies = load_roster(&config.roster_file)
        .await
        .expect("roster load failed");
    let company = companies.first().expect("roster is empty");

    let browser = connect_to_browser(config.browser_debug_port)
        .await
        .expect("browser connection failed");
    let page = open_company_page(&browser, &config.portal_url)
        .await
        .expect("portal page failed to open");
    let driver = PageDriver::new(page);

    let session = SessionDriver::new(&config);
    let solver = CaptchaSolver::new(
        Box::new(TesseractOcr),
        Path::new(&config.output_dir).join("captcha_tmp"),
    );

    let result = session.login(&driver, company, &solver).await;
    if result.is_ok() {
        session.logout(&driver).await.expect("logout failed");
    }
    driver.close().await;

    assert!(result.is_ok(), "login should succeed: {:?}", result.err());
}
