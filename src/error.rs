use std::fmt;

/// Top-level application error type
#[derive(Debug)]
pub enum AppError {
    /// Browser-control errors
    Browser(BrowserError),
    /// CAPTCHA recognition errors
    Captcha(CaptchaError),
    /// Remote portal errors
    Portal(PortalError),
    /// Storage backend errors
    Storage(StorageError),
    /// Scraped-data shape errors
    Data(DataError),
    /// Configuration errors
    Config(ConfigError),
    /// Anything else (wraps third-party errors)
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Browser(e) => write!(f, "browser error: {}", e),
            AppError::Captcha(e) => write!(f, "captcha error: {}", e),
            AppError::Portal(e) => write!(f, "portal error: {}", e),
            AppError::Storage(e) => write!(f, "storage error: {}", e),
            AppError::Data(e) => write!(f, "data error: {}", e),
            AppError::Config(e) => write!(f, "config error: {}", e),
            AppError::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Browser(e) => Some(e),
            AppError::Captcha(e) => Some(e),
            AppError::Portal(e) => Some(e),
            AppError::Storage(e) => Some(e),
            AppError::Data(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

impl AppError {
    /// Whether this error points at the network / remote host rather than at
    /// our own logic. The company retry loop waits longer before retrying
    /// these.
    pub fn is_network_like(&self) -> bool {
        match self {
            AppError::Browser(e) => matches!(
                e,
                BrowserError::ConnectionFailed { .. }
                    | BrowserError::NavigationFailed { .. }
                    | BrowserError::Timeout { .. }
            ),
            AppError::Storage(e) => matches!(e, StorageError::RequestFailed { .. }),
            _ => false,
        }
    }
}

/// Browser-control errors
#[derive(Debug)]
pub enum BrowserError {
    /// Could not attach to the running browser
    ConnectionFailed {
        port: u16,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Could not open a page
    PageCreationFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Navigation failed
    NavigationFailed {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Waiting for an element / popup ran out of time
    Timeout { what: String, secs: u64 },
    /// In-page script evaluation failed
    ScriptFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::ConnectionFailed { port, source } => {
                write!(f, "cannot attach to browser on port {}: {}", port, source)
            }
            BrowserError::PageCreationFailed { source } => {
                write!(f, "cannot open page: {}", source)
            }
            BrowserError::NavigationFailed { url, source } => {
                write!(f, "navigation to {} failed: {}", url, source)
            }
            BrowserError::Timeout { what, secs } => {
                write!(f, "timed out after {}s waiting for {}", secs, what)
            }
            BrowserError::ScriptFailed { source } => {
                write!(f, "script evaluation failed: {}", source)
            }
        }
    }
}

impl std::error::Error for BrowserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrowserError::ConnectionFailed { source, .. }
            | BrowserError::PageCreationFailed { source }
            | BrowserError::NavigationFailed { source, .. }
            | BrowserError::ScriptFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            BrowserError::Timeout { .. } => None,
        }
    }
}

/// CAPTCHA recognition errors
#[derive(Debug)]
pub enum CaptchaError {
    /// OCR engine invocation failed
    OcrFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// OCR text did not contain two integers
    UnparsableExpression { text: String },
    /// Operator other than + or -
    UnsupportedOperator { operator: char },
    /// Retry budget spent without a login the portal accepted
    Exhausted { attempts: u32 },
}

impl fmt::Display for CaptchaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptchaError::OcrFailed { source } => write!(f, "OCR failed: {}", source),
            CaptchaError::UnparsableExpression { text } => {
                write!(f, "no arithmetic expression in OCR text: {:?}", text)
            }
            CaptchaError::UnsupportedOperator { operator } => {
                write!(f, "unsupported captcha operator: {:?}", operator)
            }
            CaptchaError::Exhausted { attempts } => {
                write!(
                    f,
                    "captcha retry budget exhausted after {} attempts",
                    attempts
                )
            }
        }
    }
}

impl std::error::Error for CaptchaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptchaError::OcrFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// Remote portal errors
///
/// An error page for one period and a missing section table are statuses
/// in the data model, not errors; only failures that abort the workflow
/// live here.
#[derive(Debug)]
pub enum PortalError {
    /// Portal rejected credentials (not a captcha mismatch)
    LoginRejected { tax_pin: String, message: String },
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::LoginRejected { tax_pin, message } => {
                write!(f, "login rejected for {}: {}", tax_pin, message)
            }
        }
    }
}

impl std::error::Error for PortalError {}

/// Storage backend errors
#[derive(Debug)]
pub enum StorageError {
    /// Request never completed (network level)
    RequestFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Backend answered with a non-success status
    BadResponse {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// Response body did not decode
    DecodeFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::RequestFailed { endpoint, source } => {
                write!(f, "storage request failed ({}): {}", endpoint, source)
            }
            StorageError::BadResponse {
                endpoint,
                status,
                body,
            } => {
                write!(f, "storage returned {} ({}): {}", status, endpoint, body)
            }
            StorageError::DecodeFailed { endpoint, source } => {
                write!(f, "storage response decode failed ({}): {}", endpoint, source)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::RequestFailed { source, .. }
            | StorageError::DecodeFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            StorageError::BadResponse { .. } => None,
        }
    }
}

/// Scraped-data shape errors
#[derive(Debug)]
pub enum DataError {
    /// Scraped JSON had the wrong shape
    RowShape { context: String },
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::RowShape { context } => {
                write!(f, "unexpected row shape: {}", context)
            }
        }
    }
}

impl std::error::Error for DataError {}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Environment variable present but not parsable
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// Roster file missing or malformed
    RosterInvalid { path: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "env var {} value {:?} is not a valid {}",
                    var_name, value, expected_type
                )
            }
            ConfigError::RosterInvalid { path, reason } => {
                write!(f, "roster file {} invalid: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== Conversions from common error types ==========
// anyhow already blankets every std::error::Error, so only the domain
// wrappers are needed here.

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Data(DataError::RowShape {
            context: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

// ========== Convenience constructors ==========

impl AppError {
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    pub fn navigation_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::NavigationFailed {
            url: url.into(),
            source: Box::new(source),
        })
    }

    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        AppError::Browser(BrowserError::Timeout {
            what: what.into(),
            secs,
        })
    }

    pub fn storage_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Storage(StorageError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }
}

// ========== Result alias ==========

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_like_errors_are_classified_by_type() {
        let nav = AppError::Browser(BrowserError::Timeout {
            what: "returns table".into(),
            secs: 30,
        });
        assert!(nav.is_network_like());

        let storage = AppError::storage_request_failed(
            "/period_details",
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        );
        assert!(storage.is_network_like());

        let captcha = AppError::Captcha(CaptchaError::Exhausted { attempts: 3 });
        assert!(!captcha.is_network_like());

        let shape = AppError::Data(DataError::RowShape {
            context: "listing row missing cells".into(),
        });
        assert!(!shape.is_network_like());
    }
}
