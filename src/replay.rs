//! Deterministic replay of a JSON-lines operation script against a sale
//! driven by a [`ManualClock`].
//!
//! One operation per line, blank lines and `#` comments skipped:
//!
//! ```text
//! {"purchase": {"buyer": "alice", "quantity": 100, "payment": 1000000000000000000}}
//! {"advance": {"secs": 31536001}}
//! {"claim": {"buyer": "alice"}}
//! ```

use std::{io::BufRead, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, ManualClock, Timestamp},
    config::SaleConfig,
    house::SaleHouse,
    ledger::{AccountId, Amount, Ledger},
    payment::{NativeAmount, ProceedsVault},
    sale::{ClaimReceipt, PurchaseReceipt, SaleError},
};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("funding the sale failed: {0}")]
    Funding(#[from] crate::ledger::LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Purchase {
        buyer: AccountId,
        quantity: Amount,
        payment: NativeAmount,
    },
    Claim {
        buyer: AccountId,
    },
    Advance {
        secs: u64,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OpResult {
    Purchased(PurchaseReceipt),
    Claimed(ClaimReceipt),
    Advanced,
    Transferred,
    Rejected { error: String, fatal: bool },
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Outcome {
    pub line: usize,
    pub now: Timestamp,
    #[serde(flatten)]
    pub result: OpResult,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub label: String,
    pub now: Timestamp,
    pub outstanding_total: Amount,
    pub available_supply: Amount,
    pub proceeds: NativeAmount,
    pub halted: bool,
    pub consistent: bool,
    pub state_root: String,
}

/// Parses a script, returning each operation with its 1-based line number.
pub fn parse_script(reader: impl BufRead) -> Result<Vec<(usize, Op)>, ReplayError> {
    let mut ops = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let op = serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
            line: idx + 1,
            source,
        })?;
        ops.push((idx + 1, op));
    }
    Ok(ops)
}

pub struct Replay {
    label: String,
    clock: Arc<ManualClock>,
    house: SaleHouse<Arc<ManualClock>, ProceedsVault>,
}

impl Replay {
    /// Issues `supply` to `deployer`, moves `inventory` to the sale account
    /// and opens the sale at time `start`.
    pub fn new(
        config: &SaleConfig,
        supply: Amount,
        inventory: Amount,
        deployer: &str,
        start: Timestamp,
    ) -> Result<Self, ReplayError> {
        config.validate()?;
        let mut ledger = Ledger::create(supply, deployer);
        ledger.transfer(deployer, &config.sale_account, inventory)?;
        let clock = Arc::new(ManualClock::new(start));
        let house = SaleHouse::open(config, ledger, ProceedsVault::new(), Arc::clone(&clock))?;
        Ok(Self {
            label: config.label.clone(),
            clock,
            house,
        })
    }

    pub fn house(&self) -> &SaleHouse<Arc<ManualClock>, ProceedsVault> {
        &self.house
    }

    pub fn apply(&self, line: usize, op: &Op) -> Outcome {
        let result = match op {
            Op::Purchase {
                buyer,
                quantity,
                payment,
            } => self
                .house
                .purchase(buyer, *quantity, *payment)
                .map(OpResult::Purchased),
            Op::Claim { buyer } => self.house.claim(buyer).map(OpResult::Claimed),
            Op::Advance { secs } => {
                self.clock.advance(*secs);
                Ok(OpResult::Advanced)
            }
            Op::Transfer { from, to, amount } => self
                .house
                .transfer(from, to, *amount)
                .map(|()| OpResult::Transferred),
        };
        Outcome {
            line,
            now: self.clock.now(),
            result: result.unwrap_or_else(|err: SaleError| OpResult::Rejected {
                fatal: err.is_fatal(),
                error: err.to_string(),
            }),
        }
    }

    pub fn run(&self, ops: &[(usize, Op)]) -> Vec<Outcome> {
        ops.iter().map(|(line, op)| self.apply(*line, op)).collect()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            label: self.label.clone(),
            now: self.clock.now(),
            outstanding_total: self.house.outstanding_total(),
            available_supply: self.house.available_supply(),
            proceeds: self.house.proceeds(),
            halted: self.house.is_halted(),
            consistent: self.house.audit().is_ok(),
            state_root: hex::encode(self.house.snapshot().state_root),
        }
    }
}
