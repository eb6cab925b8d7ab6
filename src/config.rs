/// Runtime configuration
///
/// One value of this struct is built at startup and handed to every
/// component at construction. There is no global configuration state.
#[derive(Clone, Debug)]
pub struct Config {
    /// Debug port of the already-running browser
    pub browser_debug_port: u16,
    /// Portal login URL
    pub portal_url: String,
    /// Company roster TOML file
    pub roster_file: String,
    /// Root directory for run artifacts (summary, CSV exports, captcha shots)
    pub output_dir: String,
    /// Plain-text run log file
    pub output_log_file: String,
    // --- Storage backend ---
    pub storage_api_base_url: String,
    pub storage_api_key: String,
    // --- Reconciliation policy ---
    /// Re-scrape everything, ignoring what the store already has
    pub force_update: bool,
    /// Leave an existing listing snapshot alone instead of replacing it
    pub skip_existing_listings: bool,
    /// Never re-open a period that already has a stored detail row
    pub skip_existing_details: bool,
    /// Upsert each period as soon as it is extracted; otherwise flush at
    /// company end
    pub immediate_save: bool,
    /// Inclusive extraction window
    pub start_year: i32,
    pub end_year: i32,
    // --- Retry policy ---
    /// Company-level attempts before recording a terminal failure
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Longer pause when the failure was network-like
    pub network_retry_delay_secs: u64,
    // --- Login / captcha budgets ---
    /// Re-screenshot budget for an unreadable captcha image
    pub max_captcha_reads: u32,
    /// Fresh-login budget when the portal reports a wrong arithmetic result
    pub max_login_attempts: u32,
    // --- Batch concurrency ---
    /// Companies processed concurrently within one batch (1 = sequential)
    pub max_concurrent_companies: usize,
    /// Pause between batches, to go easy on the portal
    pub batch_pause_secs: u64,
    /// Abort the roster on the first terminal company failure
    pub stop_on_first_failure: bool,
    // --- Reporting ---
    pub verbose_logging: bool,
    /// Also emit per-section CSV files next to summary.json
    pub export_csv: bool,
    /// Look up withholding-agent status for each company
    pub check_withholding_status: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 9222,
            portal_url: "https://itax.kra.go.ke/KRA-Portal/".to_string(),
            roster_file: "companies.toml".to_string(),
            output_dir: "output".to_string(),
            output_log_file: "output.txt".to_string(),
            storage_api_base_url: "http://localhost:54321/rest/v1".to_string(),
            storage_api_key: String::new(),
            force_update: false,
            skip_existing_listings: true,
            skip_existing_details: true,
            immediate_save: true,
            start_year: 2018,
            end_year: 2026,
            max_retries: 3,
            retry_delay_secs: 10,
            network_retry_delay_secs: 45,
            max_captcha_reads: 5,
            max_login_attempts: 4,
            max_concurrent_companies: 3,
            batch_pause_secs: 15,
            stop_on_first_failure: false,
            verbose_logging: false,
            export_csv: false,
            check_withholding_status: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            browser_debug_port: env_parsed("BROWSER_DEBUG_PORT", default.browser_debug_port),
            portal_url: env_string("PORTAL_URL", default.portal_url),
            roster_file: env_string("ROSTER_FILE", default.roster_file),
            output_dir: env_string("OUTPUT_DIR", default.output_dir),
            output_log_file: env_string("OUTPUT_LOG_FILE", default.output_log_file),
            storage_api_base_url: env_string("STORAGE_API_BASE_URL", default.storage_api_base_url),
            storage_api_key: env_string("STORAGE_API_KEY", default.storage_api_key),
            force_update: env_parsed("FORCE_UPDATE", default.force_update),
            skip_existing_listings: env_parsed(
                "SKIP_EXISTING_LISTINGS",
                default.skip_existing_listings,
            ),
            skip_existing_details: env_parsed(
                "SKIP_EXISTING_DETAILS",
                default.skip_existing_details,
            ),
            immediate_save: env_parsed("IMMEDIATE_SAVE", default.immediate_save),
            start_year: env_parsed("START_YEAR", default.start_year),
            end_year: env_parsed("END_YEAR", default.end_year),
            max_retries: env_parsed("MAX_RETRIES", default.max_retries),
            retry_delay_secs: env_parsed("RETRY_DELAY_SECS", default.retry_delay_secs),
            network_retry_delay_secs: env_parsed(
                "NETWORK_RETRY_DELAY_SECS",
                default.network_retry_delay_secs,
            ),
            max_captcha_reads: env_parsed("MAX_CAPTCHA_READS", default.max_captcha_reads),
            max_login_attempts: env_parsed("MAX_LOGIN_ATTEMPTS", default.max_login_attempts),
            max_concurrent_companies: env_parsed(
                "MAX_CONCURRENT_COMPANIES",
                default.max_concurrent_companies,
            ),
            batch_pause_secs: env_parsed("BATCH_PAUSE_SECS", default.batch_pause_secs),
            stop_on_first_failure: env_parsed(
                "STOP_ON_FIRST_FAILURE",
                default.stop_on_first_failure,
            ),
            verbose_logging: env_parsed("VERBOSE_LOGGING", default.verbose_logging),
            export_csv: env_parsed("EXPORT_CSV", default.export_csv),
            check_withholding_status: env_parsed(
                "CHECK_WITHHOLDING_STATUS",
                default.check_withholding_status,
            ),
        }
    }

    /// Inclusive year window check used when walking listing rows.
    pub fn year_in_window(&self, year: i32) -> bool {
        year >= self.start_year && year <= self.end_year
    }
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_incremental() {
        let config = Config::default();
        assert!(!config.force_update);
        assert!(config.skip_existing_details);
        assert!(config.immediate_save);
        assert!(config.max_retries >= 1);
        assert!(config.max_captcha_reads == 5);
    }

    #[test]
    fn year_window_is_inclusive() {
        let config = Config {
            start_year: 2020,
            end_year: 2022,
            ..Config::default()
        };
        assert!(config.year_in_window(2020));
        assert!(config.year_in_window(2022));
        assert!(!config.year_in_window(2019));
        assert!(!config.year_in_window(2023));
    }
}
