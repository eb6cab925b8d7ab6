pub mod connection;

pub use connection::{connect_to_browser, open_company_page};
