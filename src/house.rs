use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    clock::{Clock, Timestamp},
    config::{ConfigError, SaleConfig},
    ledger::{Amount, Ledger, LedgerSnapshot},
    payment::{NativeAmount, PaymentChannel},
    sale::{ClaimReceipt, PurchaseReceipt, SaleEngine, SaleError, SaleEvent},
};

struct Book<P> {
    ledger: Ledger,
    sale: SaleEngine,
    payments: P,
}

/// Owns the ledger, the sale and the payment channel behind one lock, so
/// every operation runs to completion before the next one reads any state.
/// The clock is read once per operation, inside the lock.
pub struct SaleHouse<C, P> {
    clock: C,
    book: Mutex<Book<P>>,
}

impl<C: Clock, P: PaymentChannel> SaleHouse<C, P> {
    pub fn open(config: &SaleConfig, ledger: Ledger, payments: P, clock: C) -> Result<Self, ConfigError> {
        let sale = SaleEngine::new(config)?;
        let inventory = ledger.balance_of(sale.account());
        if inventory == 0 {
            warn!(
                "[{}] sale account {} holds no inventory",
                sale.label(),
                sale.account()
            );
        } else {
            info!(
                "[{}] sale open: {} tokens at {} each, lock {}s",
                sale.label(),
                inventory,
                sale.unit_price(),
                sale.lock_duration()
            );
        }
        Ok(Self {
            clock,
            book: Mutex::new(Book {
                ledger,
                sale,
                payments,
            }),
        })
    }

    pub fn purchase(
        &self,
        buyer: &str,
        quantity: Amount,
        attached: NativeAmount,
    ) -> Result<PurchaseReceipt, SaleError> {
        let mut book = self.book.lock();
        let now = self.clock.now();
        let Book {
            ledger,
            sale,
            payments,
        } = &mut *book;
        sale.purchase(ledger, payments, buyer, quantity, attached, now)
    }

    pub fn claim(&self, buyer: &str) -> Result<ClaimReceipt, SaleError> {
        let mut book = self.book.lock();
        let now = self.clock.now();
        let Book { ledger, sale, .. } = &mut *book;
        sale.claim(ledger, buyer, now)
    }

    /// Ledger transfer between ordinary holders. The sale account is
    /// excluded: its tokens only leave through claims.
    pub fn transfer(&self, from: &str, to: &str, amount: Amount) -> Result<(), SaleError> {
        let mut book = self.book.lock();
        if from == book.sale.account() {
            return Err(SaleError::InventoryLocked);
        }
        book.ledger.transfer(from, to, amount)?;
        Ok(())
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn purchased_of(&self, buyer: &str) -> Amount {
        self.book.lock().sale.purchased_of(buyer)
    }

    pub fn unlocks_at(&self, buyer: &str) -> Option<Timestamp> {
        self.book.lock().sale.unlocks_at(buyer)
    }

    pub fn outstanding_total(&self) -> Amount {
        self.book.lock().sale.outstanding_total()
    }

    pub fn available_supply(&self) -> Amount {
        let book = self.book.lock();
        book.sale.available_supply(&book.ledger)
    }

    pub fn ledger_balance_of(&self, holder: &str) -> Amount {
        self.book.lock().ledger.balance_of(holder)
    }

    pub fn proceeds(&self) -> NativeAmount {
        self.book.lock().payments.proceeds()
    }

    pub fn events(&self) -> Vec<SaleEvent> {
        self.book.lock().sale.events().to_vec()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.book.lock().ledger.snapshot()
    }

    pub fn is_halted(&self) -> bool {
        self.book.lock().sale.is_halted()
    }

    pub fn audit(&self) -> Result<(), SaleError> {
        let book = self.book.lock();
        book.sale.audit(&book.ledger)
    }

    /// Runs `f` against the payment channel, e.g. to read refunds owed.
    pub fn with_payments<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&self.book.lock().payments)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{clock::ManualClock, payment::ProceedsVault};

    fn open_house(inventory: Amount) -> (SaleHouse<Arc<ManualClock>, ProceedsVault>, Arc<ManualClock>) {
        let config = SaleConfig::new(1, 60);
        let mut ledger = Ledger::create(1_000_000, "deployer");
        ledger
            .transfer("deployer", &config.sale_account, inventory)
            .unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let house = SaleHouse::open(&config, ledger, ProceedsVault::new(), clock.clone()).unwrap();
        (house, clock)
    }

    #[test]
    fn claim_follows_the_injected_clock() {
        let (house, clock) = open_house(100);
        house.purchase("alice", 10, 10).unwrap();
        assert!(matches!(house.claim("alice"), Err(SaleError::StillLocked { .. })));
        clock.advance(60);
        house.claim("alice").unwrap();
        assert_eq!(house.ledger_balance_of("alice"), 10);
        assert_eq!(house.outstanding_total(), 0);
        house.audit().unwrap();
    }

    #[test]
    fn sale_inventory_cannot_be_transferred_directly() {
        let (house, _) = open_house(100);
        assert_eq!(
            house.transfer("token-sale", "mallory", 1),
            Err(SaleError::InventoryLocked)
        );
        house.transfer("deployer", "alice", 5).unwrap();
        assert_eq!(house.ledger_balance_of("alice"), 5);
        assert!(matches!(
            house.transfer("alice", "bob", 6),
            Err(SaleError::Ledger(_))
        ));
    }

    #[test]
    fn concurrent_buyers_never_oversell() {
        let (house, _) = open_house(1_000);
        let house = Arc::new(house);
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let house = Arc::clone(&house);
                thread::spawn(move || {
                    let buyer = format!("buyer-{idx}");
                    (0..50)
                        .filter(|_| house.purchase(&buyer, 3, 3).is_ok())
                        .count() as Amount
                        * 3
                })
            })
            .collect();
        let sold: Amount = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(sold, house.outstanding_total());
        assert_eq!(sold, 999);
        assert_eq!(house.available_supply(), 1);
        assert_eq!(house.proceeds(), 999);
        house.audit().unwrap();
    }
}
