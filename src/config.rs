use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ledger::AccountId, payment::NativeAmount};

/// 1 currency unit = 1e18 smallest denomination.
pub const CURRENCY_SCALE: NativeAmount = 1_000_000_000_000_000_000;
/// 0.01 currency unit per token.
pub const DEFAULT_UNIT_PRICE: NativeAmount = CURRENCY_SCALE / 100;
pub const SECONDS_PER_DAY: u64 = 86_400;
pub const DEFAULT_LOCK_DURATION_SECS: u64 = 365 * SECONDS_PER_DAY;
pub const DEFAULT_SALE_ACCOUNT: &str = "token-sale";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// What a repeat purchase does to a buyer's pending lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// The lock starts with the first purchase after a zero balance and is
    /// left alone by later top-ups.
    #[default]
    KeepOriginal,
    /// Every purchase restarts the lock for the whole unclaimed balance.
    Reset,
}

/// What happens to currency attached beyond the purchase price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    #[default]
    Retain,
    Refund,
}

/// Creation parameters of one sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaleConfig {
    /// Log prefix and summary name.
    pub label: String,
    /// Holder identity of the sale inventory in the ledger.
    pub sale_account: AccountId,
    /// Price of one token in the smallest currency denomination.
    pub unit_price: NativeAmount,
    pub lock_duration_secs: u64,
    pub lock_policy: LockPolicy,
    pub overpayment: OverpaymentPolicy,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            label: "sale".to_string(),
            sale_account: DEFAULT_SALE_ACCOUNT.to_string(),
            unit_price: DEFAULT_UNIT_PRICE,
            lock_duration_secs: DEFAULT_LOCK_DURATION_SECS,
            lock_policy: LockPolicy::default(),
            overpayment: OverpaymentPolicy::default(),
        }
    }
}

impl SaleConfig {
    pub fn new(unit_price: NativeAmount, lock_duration_secs: u64) -> Self {
        Self {
            unit_price,
            lock_duration_secs,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        let config: SaleConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "label",
                reason: "must not be empty",
            });
        }
        if self.sale_account.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sale_account",
                reason: "must not be empty",
            });
        }
        if self.unit_price == 0 {
            return Err(ConfigError::Invalid {
                field: "unit_price",
                reason: "must be positive",
            });
        }
        if self.lock_duration_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "lock_duration_secs",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}
