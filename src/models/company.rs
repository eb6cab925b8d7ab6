use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tracing::info;

/// One company from the roster
///
/// Roster data is maintained outside this system and is read-only here.
/// `tax_pin` is the identity key on the portal side, `id` the key on the
/// storage side.
#[derive(Clone, Debug, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    /// Portal PIN (e.g. "P051234567X")
    pub tax_pin: String,
    /// Portal password
    pub credential: String,
    #[serde(default)]
    pub is_vat_registered: bool,
    #[serde(default)]
    pub is_withholding_agent: bool,
}

#[derive(Debug, Deserialize)]
struct Roster {
    #[serde(default)]
    companies: Vec<Company>,
}

/// Load the company roster from a TOML file.
pub async fn load_roster(path: &str) -> Result<Vec<Company>> {
    let roster_path = Path::new(path);
    if !roster_path.exists() {
        anyhow::bail!("roster file does not exist: {}", path);
    }

    let content = fs::read_to_string(roster_path)
        .await
        .with_context(|| format!("cannot read roster file: {}", path))?;

    let roster: Roster =
        toml::from_str(&content).with_context(|| format!("cannot parse roster file: {}", path))?;

    info!("✓ loaded {} companies from {}", roster.companies.len(), path);
    Ok(roster.companies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_toml_parses() {
        let raw = r#"
            [[companies]]
            id = "c-001"
            name = "Acme Traders Ltd"
            tax_pin = "P051234567X"
            credential = "secret"
            is_vat_registered = true

            [[companies]]
            id = "c-002"
            name = "Beta Supplies"
            tax_pin = "P059876543Y"
            credential = "secret2"
        "#;
        let roster: Roster = toml::from_str(raw).unwrap();
        assert_eq!(roster.companies.len(), 2);
        assert!(roster.companies[0].is_vat_registered);
        assert!(!roster.companies[1].is_withholding_agent);
    }
}
