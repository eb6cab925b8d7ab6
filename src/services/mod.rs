pub mod captcha;
pub mod navigator;
pub mod report_writer;
pub mod session;

pub use captcha::{CaptchaSolver, OcrEngine, TesseractOcr};
pub use navigator::PortalNavigator;
pub use report_writer::ReportWriter;
pub use session::SessionDriver;
