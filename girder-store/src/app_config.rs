use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Defaults applied by callers when a document arrives without explicit
/// rates; engines always take the effective value as input.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_tax_rate")]
    pub default_tax_rate: Decimal,
    #[serde(default = "default_retention_rate")]
    pub default_retention_rate: Decimal,
    #[serde(default)]
    pub default_warranty_months: i32,
}

fn default_tax_rate() -> Decimal {
    Decimal::new(5, 0)
}

fn default_retention_rate() -> Decimal {
    Decimal::new(5, 0)
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Base configuration file, then the environment-specific one,
            // then an uncommitted local override.
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // `GIRDER_DATABASE__URL=...` style environment overrides.
            .add_source(config::Environment::with_prefix("GIRDER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
