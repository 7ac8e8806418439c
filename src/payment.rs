use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::AccountId;

/// Smallest denomination of the native payment currency.
pub type NativeAmount = u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment from {payer} rejected: {reason}")]
    Rejected { payer: AccountId, reason: String },
    #[error("proceeds overflow")]
    ArithmeticOverflow,
}

/// Result of committing an attached payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub retained: NativeAmount,
    pub refunded: NativeAmount,
}

/// Receives the currency attached to a purchase. `capture` is the commit
/// point: it runs after every validation has passed and must either take the
/// whole payment or fail leaving the channel unchanged.
pub trait PaymentChannel {
    /// Commits `attached` from `payer`, keeping `retain` as proceeds and
    /// owing the rest back to the payer.
    fn capture(
        &mut self,
        payer: &str,
        attached: NativeAmount,
        retain: NativeAmount,
    ) -> Result<Capture, PaymentError>;

    /// Total currency retained so far.
    fn proceeds(&self) -> NativeAmount;
}

/// In-memory channel that keeps proceeds and refunds owed per payer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProceedsVault {
    proceeds: NativeAmount,
    paid: BTreeMap<AccountId, NativeAmount>,
    refunds_owed: BTreeMap<AccountId, NativeAmount>,
}

impl ProceedsVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paid_by(&self, payer: &str) -> NativeAmount {
        self.paid.get(payer).copied().unwrap_or(0)
    }

    pub fn refund_owed(&self, payer: &str) -> NativeAmount {
        self.refunds_owed.get(payer).copied().unwrap_or(0)
    }
}

impl PaymentChannel for ProceedsVault {
    fn capture(
        &mut self,
        payer: &str,
        attached: NativeAmount,
        retain: NativeAmount,
    ) -> Result<Capture, PaymentError> {
        if retain > attached {
            return Err(PaymentError::Rejected {
                payer: payer.to_string(),
                reason: format!("cannot retain {retain} out of {attached} attached"),
            });
        }
        let refunded = attached - retain;

        let proceeds = self
            .proceeds
            .checked_add(retain)
            .ok_or(PaymentError::ArithmeticOverflow)?;
        let paid = self
            .paid_by(payer)
            .checked_add(retain)
            .ok_or(PaymentError::ArithmeticOverflow)?;
        let owed = self
            .refund_owed(payer)
            .checked_add(refunded)
            .ok_or(PaymentError::ArithmeticOverflow)?;

        self.proceeds = proceeds;
        self.paid.insert(payer.to_string(), paid);
        if owed > 0 {
            self.refunds_owed.insert(payer.to_string(), owed);
        }
        Ok(Capture { retained: retain, refunded })
    }

    fn proceeds(&self) -> NativeAmount {
        self.proceeds
    }
}
