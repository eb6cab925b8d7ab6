//! Captcha solver - services layer
//!
//! The portal's captcha is a small arithmetic question rendered as an image
//! ("23 + 4 = ?"). Recognition is delegated to an external OCR engine; this
//! module only turns recognized text into the numeric answer.

use crate::error::{AppError, CaptchaError};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// External text-recognition engine boundary.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Raw recognized text for one image file.
    async fn recognize(&self, image: &Path) -> Result<String>;
}

/// OCR via the `tesseract` CLI.
pub struct TesseractOcr;

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &Path) -> Result<String> {
        let output = Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .args(["--psm", "7"])
            .args(["-c", "tessedit_char_whitelist=0123456789+-=? "])
            .output()
            .await
            .map_err(|e| {
                AppError::Captcha(CaptchaError::OcrFailed {
                    source: Box::new(e),
                })
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(AppError::Captcha(CaptchaError::OcrFailed {
                source: stderr.into(),
            })
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct CaptchaSolver {
    ocr: Box<dyn OcrEngine>,
    scratch_dir: PathBuf,
}

impl CaptchaSolver {
    pub fn new(ocr: Box<dyn OcrEngine>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            ocr,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Solve one captcha image.
    ///
    /// The PNG is written to the scratch directory only for the OCR call and
    /// removed again afterwards, including on the error path.
    pub async fn solve(&self, png: &[u8]) -> Result<i64> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let file_name = format!(
            "captcha_{}.png",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let image_path = self.scratch_dir.join(file_name);
        tokio::fs::write(&image_path, png).await?;

        let recognized = self.ocr.recognize(&image_path).await;
        let _ = tokio::fs::remove_file(&image_path).await;
        let text = recognized?;

        debug!("captcha OCR text: {:?}", text.trim());
        let answer = parse_arithmetic(&text)?;
        debug!("captcha answer: {}", answer);
        Ok(answer)
    }
}

/// Extract two integers and a + / - operator from OCR output and compute
/// the result.
pub fn parse_arithmetic(text: &str) -> Result<i64, CaptchaError> {
    // OCR noise around the digits is common; pick the first two integer runs
    let number_re = Regex::new(r"\d+").expect("static regex");
    let numbers: Vec<i64> = number_re
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .take(2)
        .collect();

    if numbers.len() < 2 {
        return Err(CaptchaError::UnparsableExpression {
            text: text.trim().to_string(),
        });
    }

    // Operator between the operands; '=' and '?' belong to the question tail
    let between = between_numbers(text);
    if between.contains('+') {
        Ok(numbers[0] + numbers[1])
    } else if between.contains('-') {
        Ok(numbers[0] - numbers[1])
    } else {
        let operator = between
            .chars()
            .find(|c| !c.is_whitespace())
            .unwrap_or('?');
        Err(CaptchaError::UnsupportedOperator { operator })
    }
}

/// Slice of the text between the first and second integer run.
fn between_numbers(text: &str) -> &str {
    let number_re = Regex::new(r"\d+").expect("static regex");
    let mut it = number_re.find_iter(text);
    match (it.next(), it.next()) {
        (Some(first), Some(second)) => &text[first.end()..second.start()],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_addition() {
        assert_eq!(parse_arithmetic("23 + 4 = ?").unwrap(), 27);
    }

    #[test]
    fn solves_subtraction() {
        assert_eq!(parse_arithmetic("50 - 8 = ?").unwrap(), 42);
    }

    #[test]
    fn tolerates_ocr_noise_around_digits() {
        assert_eq!(parse_arithmetic("  12+7=?\n").unwrap(), 19);
    }

    #[test]
    fn fewer_than_two_numbers_is_unparsable() {
        let err = parse_arithmetic("banana 7").unwrap_err();
        assert!(matches!(err, CaptchaError::UnparsableExpression { .. }));
    }

    #[test]
    fn unsupported_operator_is_typed() {
        let err = parse_arithmetic("6 x 7 = ?").unwrap_err();
        assert!(matches!(
            err,
            CaptchaError::UnsupportedOperator { operator: 'x' }
        ));
    }

    #[test]
    fn empty_text_is_unparsable() {
        assert!(matches!(
            parse_arithmetic(""),
            Err(CaptchaError::UnparsableExpression { .. })
        ));
    }
}
