//! Configuration for the metering ledger

use serde::{Deserialize, Serialize};

/// Metering ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Billing configuration
    pub billing: BillingConfig,

    /// Privileged account configuration
    pub accounts: AccountsConfig,

    /// Metrics listen address
    pub metrics_listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "metering-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            billing: BillingConfig::default(),
            accounts: AccountsConfig::default(),
            metrics_listen_addr: "0.0.0.0:9092".to_string(),
        }
    }
}

/// Billing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Minimum billing granularity in seconds; charges accrue only in whole
    /// multiples of this interval
    pub interval_secs: u64,

    /// Treasury share of every settled charge (0..=100)
    pub fee_percent: u8,

    /// Global cap on a single authorization, in wei
    pub max_allowance_wei: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,                           // one minute
            fee_percent: 20,                             // 80/20 creator/treasury
            max_allowance_wei: 1_000_000_000_000_000_000, // 1 ETH equivalent
        }
    }
}

/// Privileged account addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Stream registry address, the only caller allowed to register streams
    pub registry: String,

    /// Treasury sink receiving the platform fee
    pub treasury: String,

    /// Administrator address for the privileged surface
    pub admin: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            registry: "vibestream-registry".to_string(),
            treasury: "vibestream-treasury".to_string(),
            admin: "vibestream-admin".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("METERING_REGISTRY_ADDR") {
            config.accounts.registry = addr;
        }

        if let Ok(addr) = std::env::var("METERING_TREASURY_ADDR") {
            config.accounts.treasury = addr;
        }

        if let Ok(addr) = std::env::var("METERING_ADMIN_ADDR") {
            config.accounts.admin = addr;
        }

        if let Ok(addr) = std::env::var("METERING_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.billing.interval_secs == 0 {
            return Err(crate::Error::Config(
                "Billing interval must be positive".to_string(),
            ));
        }

        if self.billing.fee_percent > 100 {
            return Err(crate::Error::Config(format!(
                "Fee percent {} outside 0..=100",
                self.billing.fee_percent
            )));
        }

        if self.billing.max_allowance_wei == 0 {
            return Err(crate::Error::Config(
                "Allowance cap must be positive".to_string(),
            ));
        }

        for (name, addr) in [
            ("registry", &self.accounts.registry),
            ("treasury", &self.accounts.treasury),
            ("admin", &self.accounts.admin),
        ] {
            if addr.is_empty() {
                return Err(crate::Error::Config(format!(
                    "Account address '{}' must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}
