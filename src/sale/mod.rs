//! Fixed-price sale with a per-buyer time lock.
//!
//! A purchase only reserves inventory: the sale account keeps holding the
//! tokens in the [`Ledger`] until the buyer claims them after the lock has
//! elapsed. `outstanding_total` is the reserved part of that holding and is
//! always equal to the sum of every buyer's unclaimed balance.

mod events;

use std::collections::BTreeMap;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Timestamp,
    config::{ConfigError, LockPolicy, OverpaymentPolicy, SaleConfig},
    ledger::{AccountId, Amount, Ledger, LedgerError},
    payment::{NativeAmount, PaymentChannel, PaymentError},
};

pub use events::SaleEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleError {
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("insufficient funds to purchase tokens: {required} required, {received} attached")]
    InsufficientFunds {
        required: NativeAmount,
        received: NativeAmount,
    },
    #[error("not enough tokens available for sale: requested {requested}, available {available}")]
    InsufficientSupply { requested: Amount, available: Amount },
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("tokens are still locked until {unlocks_at} (now {now})")]
    StillLocked { unlocks_at: Timestamp, now: Timestamp },
    #[error("nothing to claim")]
    NothingToClaim,
    #[error("sale inventory only leaves through claims")]
    InventoryLocked,
    #[error("the sale account cannot buy from itself")]
    SaleAccountBuyer,
    #[error("payment failed: {0}")]
    Payment(#[from] PaymentError),
    #[error("ledger rejected transfer: {0}")]
    Ledger(#[from] LedgerError),
    #[error("sale inventory cannot cover a claim: {0}")]
    InventoryShortfall(LedgerError),
    #[error("bookkeeping invariant violated: {0}")]
    Invariant(&'static str),
    #[error("sale halted after a bookkeeping failure")]
    Halted,
}

impl SaleError {
    /// Errors that mean the engine's own books are wrong. They halt the sale.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SaleError::InventoryShortfall(_) | SaleError::Invariant(_)
        )
    }
}

/// A buyer's purchased-but-unclaimed balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub purchased: Amount,
    pub lock_start: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub buyer: AccountId,
    pub quantity: Amount,
    pub cost: NativeAmount,
    pub retained: NativeAmount,
    pub refunded: NativeAmount,
    /// Unclaimed balance after this purchase.
    pub purchased: Amount,
    pub unlocks_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub buyer: AccountId,
    pub quantity: Amount,
    pub claimed_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct SaleEngine {
    label: String,
    account: AccountId,
    unit_price: NativeAmount,
    lock_duration: u64,
    lock_policy: LockPolicy,
    overpayment: OverpaymentPolicy,
    positions: BTreeMap<AccountId, Position>,
    outstanding_total: Amount,
    events: Vec<SaleEvent>,
    halted: bool,
}

impl SaleEngine {
    pub fn new(config: &SaleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            label: config.label.clone(),
            account: config.sale_account.clone(),
            unit_price: config.unit_price,
            lock_duration: config.lock_duration_secs,
            lock_policy: config.lock_policy,
            overpayment: config.overpayment,
            positions: BTreeMap::new(),
            outstanding_total: 0,
            events: Vec::new(),
            halted: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ledger identity holding the sale inventory.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn unit_price(&self) -> NativeAmount {
        self.unit_price
    }

    pub fn lock_duration(&self) -> u64 {
        self.lock_duration
    }

    pub fn purchased_of(&self, buyer: &str) -> Amount {
        self.positions.get(buyer).map(|p| p.purchased).unwrap_or(0)
    }

    pub fn lock_start_of(&self, buyer: &str) -> Option<Timestamp> {
        self.positions.get(buyer).map(|p| p.lock_start)
    }

    pub fn unlocks_at(&self, buyer: &str) -> Option<Timestamp> {
        self.lock_start_of(buyer)
            .map(|start| start.saturating_add(self.lock_duration))
    }

    pub fn outstanding_total(&self) -> Amount {
        self.outstanding_total
    }

    /// Inventory held by the sale and not yet reserved by a purchase.
    pub fn available_supply(&self, ledger: &Ledger) -> Amount {
        ledger
            .balance_of(&self.account)
            .saturating_sub(self.outstanding_total)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&AccountId, &Position)> {
        self.positions.iter()
    }

    pub fn events(&self) -> &[SaleEvent] {
        &self.events
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Reserves `quantity` tokens for `buyer` against `attached` currency.
    ///
    /// All checks run before the payment is captured, and nothing in the
    /// engine changes unless the capture succeeds.
    pub fn purchase<P: PaymentChannel + ?Sized>(
        &mut self,
        ledger: &Ledger,
        payments: &mut P,
        buyer: &str,
        quantity: Amount,
        attached: NativeAmount,
        now: Timestamp,
    ) -> Result<PurchaseReceipt, SaleError> {
        let result = self.try_purchase(ledger, payments, buyer, quantity, attached, now);
        if let Err(err) = &result {
            debug!(
                "[{}] purchase of {} by {} rejected: {}",
                self.label, quantity, buyer, err
            );
        }
        result
    }

    fn try_purchase<P: PaymentChannel + ?Sized>(
        &mut self,
        ledger: &Ledger,
        payments: &mut P,
        buyer: &str,
        quantity: Amount,
        attached: NativeAmount,
        now: Timestamp,
    ) -> Result<PurchaseReceipt, SaleError> {
        self.ensure_live()?;
        if quantity == 0 {
            return Err(SaleError::InvalidQuantity);
        }
        if buyer == self.account {
            return Err(SaleError::SaleAccountBuyer);
        }

        let cost = quantity
            .checked_mul(self.unit_price)
            .ok_or(SaleError::ArithmeticOverflow)?;
        if attached < cost {
            return Err(SaleError::InsufficientFunds {
                required: cost,
                received: attached,
            });
        }

        let available = self.available_supply(ledger);
        if quantity > available {
            return Err(SaleError::InsufficientSupply {
                requested: quantity,
                available,
            });
        }

        let current = self.positions.get(buyer).copied().unwrap_or_default();
        let purchased = current
            .purchased
            .checked_add(quantity)
            .ok_or(SaleError::ArithmeticOverflow)?;
        let outstanding = self
            .outstanding_total
            .checked_add(quantity)
            .ok_or(SaleError::ArithmeticOverflow)?;
        let lock_start = match self.lock_policy {
            LockPolicy::KeepOriginal if current.purchased > 0 => current.lock_start,
            _ => now,
        };
        let retain = match self.overpayment {
            OverpaymentPolicy::Retain => attached,
            OverpaymentPolicy::Refund => cost,
        };

        let capture = payments.capture(buyer, attached, retain)?;

        self.positions.insert(
            buyer.to_string(),
            Position {
                purchased,
                lock_start,
            },
        );
        self.outstanding_total = outstanding;
        self.events.push(SaleEvent::Purchased {
            buyer: buyer.to_string(),
            quantity,
            paid: capture.retained,
            at: now,
        });

        let unlocks_at = lock_start.saturating_add(self.lock_duration);
        info!(
            "[{}] {} purchased {} for {} (unclaimed {}, unlocks at {})",
            self.label, buyer, quantity, capture.retained, purchased, unlocks_at
        );

        Ok(PurchaseReceipt {
            buyer: buyer.to_string(),
            quantity,
            cost,
            retained: capture.retained,
            refunded: capture.refunded,
            purchased,
            unlocks_at,
        })
    }

    /// Transfers the buyer's whole unclaimed balance out of the sale account
    /// once the lock has elapsed.
    pub fn claim(
        &mut self,
        ledger: &mut Ledger,
        buyer: &str,
        now: Timestamp,
    ) -> Result<ClaimReceipt, SaleError> {
        self.ensure_live()?;

        let position = match self.positions.get(buyer) {
            Some(position) if position.purchased > 0 => *position,
            _ => {
                debug!("[{}] claim by {} rejected: nothing to claim", self.label, buyer);
                return Err(SaleError::NothingToClaim);
            }
        };

        let unlocks_at = position.lock_start.saturating_add(self.lock_duration);
        if now < unlocks_at {
            debug!(
                "[{}] claim by {} rejected: locked until {}",
                self.label, buyer, unlocks_at
            );
            return Err(SaleError::StillLocked { unlocks_at, now });
        }

        let amount = position.purchased;
        let Some(outstanding) = self.outstanding_total.checked_sub(amount) else {
            return Err(self.halt(SaleError::Invariant(
                "outstanding total is below a buyer's entitlement",
            )));
        };
        if let Err(err) = ledger.transfer(&self.account, buyer, amount) {
            return Err(self.halt(SaleError::InventoryShortfall(err)));
        }

        self.positions.remove(buyer);
        self.outstanding_total = outstanding;
        self.events.push(SaleEvent::TokensClaimed {
            buyer: buyer.to_string(),
            quantity: amount,
            at: now,
        });
        info!("[{}] {} claimed {}", self.label, buyer, amount);

        Ok(ClaimReceipt {
            buyer: buyer.to_string(),
            quantity: amount,
            claimed_at: now,
        })
    }

    /// Checks the reservation invariants against `ledger`.
    pub fn audit(&self, ledger: &Ledger) -> Result<(), SaleError> {
        let reserved = self
            .positions
            .values()
            .try_fold(0u128, |acc, p| acc.checked_add(p.purchased))
            .ok_or(SaleError::Invariant("unclaimed balances overflow"))?;
        if reserved != self.outstanding_total {
            return Err(SaleError::Invariant(
                "outstanding total differs from unclaimed balances",
            ));
        }
        if self.outstanding_total > ledger.balance_of(&self.account) {
            return Err(SaleError::Invariant(
                "outstanding total exceeds sale inventory",
            ));
        }
        if !ledger.is_conserved() {
            return Err(SaleError::Invariant("ledger balances differ from supply"));
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), SaleError> {
        if self.halted {
            return Err(SaleError::Halted);
        }
        Ok(())
    }

    fn halt(&mut self, err: SaleError) -> SaleError {
        self.halted = true;
        error!("[{}] halting sale: {}", self.label, err);
        err
    }
}
