//! Session driver - services layer
//!
//! Owns the login / logout workflow for one company on one page. Login is
//! the most failure-prone step of the whole pipeline: the captcha OCR
//! misreads, the portal rejects correct-looking answers, and the login form
//! occasionally just hangs. Both retry budgets live in config; when they are
//! spent a typed `CaptchaError::Exhausted` surfaces instead of looping
//! forever.

use crate::config::Config;
use crate::error::{AppError, CaptchaError, PortalError};
use crate::infrastructure::PageDriver;
use crate::models::Company;
use crate::services::captcha::CaptchaSolver;
use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

// Representative portal selectors, kept in one place
const PIN_INPUT: &str = "#logid";
const CONTINUE_BUTTON: &str = "#nextBtn";
const PASSWORD_INPUT: &str = "#xxpass";
const CAPTCHA_IMAGE: &str = "#captcha_img";
const CAPTCHA_REFRESH: &str = "#getNewCaptcha";
const CAPTCHA_INPUT: &str = "#captcahText";
const LOGIN_BUTTON: &str = "#loginButton";
const LOGIN_ERROR: &str = ".tablerowerror";
const MAIN_MENU: &str = "#ddtopmenubar";
const LOGOUT_LINK: &str = "a[href*='logOutUser']";

/// Result of one submitted login form.
enum LoginOutcome {
    Accepted,
    /// Portal says the arithmetic answer was wrong; worth a fresh attempt
    WrongArithmetic,
    /// Captcha image never produced a parsable expression this attempt
    CaptchaUnreadable,
}

pub struct SessionDriver {
    config: Config,
}

impl SessionDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Log one company in, retrying fresh attempts up to the configured
    /// budget when the captcha round-trip fails.
    pub async fn login(
        &self,
        driver: &PageDriver,
        company: &Company,
        solver: &CaptchaSolver,
    ) -> Result<()> {
        for attempt in 1..=self.config.max_login_attempts {
            if attempt > 1 {
                info!(
                    "[{}] login attempt {}/{}",
                    company.tax_pin, attempt, self.config.max_login_attempts
                );
                driver.goto(&self.config.portal_url).await?;
            }

            match self.attempt_login(driver, company, solver).await? {
                LoginOutcome::Accepted => {
                    info!("[{}] ✓ logged in", company.tax_pin);
                    return Ok(());
                }
                LoginOutcome::WrongArithmetic => {
                    warn!(
                        "[{}] portal rejected the captcha arithmetic, starting over",
                        company.tax_pin
                    );
                }
                LoginOutcome::CaptchaUnreadable => {
                    warn!(
                        "[{}] captcha stayed unreadable this attempt, starting over",
                        company.tax_pin
                    );
                }
            }
        }

        Err(AppError::Captcha(CaptchaError::Exhausted {
            attempts: self.config.max_login_attempts,
        })
        .into())
    }

    async fn attempt_login(
        &self,
        driver: &PageDriver,
        company: &Company,
        solver: &CaptchaSolver,
    ) -> Result<LoginOutcome> {
        driver.wait_for(PIN_INPUT).await?;
        driver.type_into(PIN_INPUT, &company.tax_pin).await?;
        // The portal validates the PIN server-side off the blur handler;
        // the password form only renders after that round-trip
        driver.dispatch_event(PIN_INPUT, "blur").await?;
        if driver.exists(CONTINUE_BUTTON).await? {
            driver.click(CONTINUE_BUTTON).await?;
        }
        driver.wait_for(PASSWORD_INPUT).await?;
        driver.type_into(PASSWORD_INPUT, &company.credential).await?;

        let answer = match self.read_captcha(driver, solver).await? {
            Some(answer) => answer,
            None => return Ok(LoginOutcome::CaptchaUnreadable),
        };

        driver
            .type_into(CAPTCHA_INPUT, &answer.to_string())
            .await?;
        driver.click(LOGIN_BUTTON).await?;

        self.classify_login_result(driver, company).await
    }

    /// Screenshot → OCR → arithmetic, refreshing the image on every misread,
    /// up to the configured read budget. `None` means the budget is spent.
    async fn read_captcha(
        &self,
        driver: &PageDriver,
        solver: &CaptchaSolver,
    ) -> Result<Option<i64>> {
        driver.wait_for(CAPTCHA_IMAGE).await?;

        for read in 1..=self.config.max_captcha_reads {
            let png = driver.screenshot_element(CAPTCHA_IMAGE).await?;
            match solver.solve(&png).await {
                Ok(answer) => return Ok(Some(answer)),
                Err(e) => {
                    debug!(
                        "captcha read {}/{} failed: {}",
                        read, self.config.max_captcha_reads, e
                    );
                    if driver.exists(CAPTCHA_REFRESH).await? {
                        driver.click(CAPTCHA_REFRESH).await?;
                        sleep(Duration::from_millis(600)).await;
                    }
                }
            }
        }
        Ok(None)
    }

    async fn classify_login_result(
        &self,
        driver: &PageDriver,
        company: &Company,
    ) -> Result<LoginOutcome> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            if driver.exists(MAIN_MENU).await? {
                return Ok(LoginOutcome::Accepted);
            }
            if let Some(message) = driver.inner_text(LOGIN_ERROR).await? {
                let message = message.trim().to_string();
                if !message.is_empty() {
                    if message.to_lowercase().contains("arithmetic") {
                        return Ok(LoginOutcome::WrongArithmetic);
                    }
                    return Err(AppError::Portal(PortalError::LoginRejected {
                        tax_pin: company.tax_pin.clone(),
                        message,
                    })
                    .into());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::timeout("login result", 30).into());
            }
            sleep(Duration::from_millis(400)).await;
        }
    }

    /// Best-effort logout; a failed logout never overrides the run's result.
    pub async fn logout(&self, driver: &PageDriver) -> Result<()> {
        if driver.exists(LOGOUT_LINK).await? {
            driver.click(LOGOUT_LINK).await?;
            sleep(Duration::from_millis(800)).await;
            debug!("logged out");
        }
        Ok(())
    }
}
