use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};
use token_sale::{
    config::{CURRENCY_SCALE, DEFAULT_LOCK_DURATION_SECS, DEFAULT_UNIT_PRICE},
    Amount, Clock, Ledger, ManualClock, ProceedsVault, SaleConfig, SaleError, SaleEvent,
    SaleHouse,
};

const INVENTORY: Amount = 10_000;

fn open_sale(config: &SaleConfig) -> (SaleHouse<Arc<ManualClock>, ProceedsVault>, Arc<ManualClock>) {
    let mut ledger = Ledger::create(21_000_000, "deployer");
    ledger
        .transfer("deployer", &config.sale_account, INVENTORY)
        .unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let house = SaleHouse::open(config, ledger, ProceedsVault::new(), Arc::clone(&clock)).unwrap();
    (house, clock)
}

#[test]
fn buy_wait_claim() {
    let config = SaleConfig::default();
    let (house, clock) = open_sale(&config);

    house.purchase("buyer", 100, CURRENCY_SCALE).unwrap();
    assert_eq!(house.purchased_of("buyer"), 100);
    assert_eq!(house.outstanding_total(), 100);

    assert_eq!(
        house.purchase("buyer", 20_000, 20_000 * DEFAULT_UNIT_PRICE),
        Err(SaleError::InsufficientSupply {
            requested: 20_000,
            available: INVENTORY - 100,
        })
    );
    assert_eq!(
        house.purchase("buyer", 100, CURRENCY_SCALE / 2),
        Err(SaleError::InsufficientFunds {
            required: CURRENCY_SCALE,
            received: CURRENCY_SCALE / 2,
        })
    );
    assert_eq!(house.purchased_of("buyer"), 100);

    assert!(matches!(
        house.claim("buyer"),
        Err(SaleError::StillLocked { .. })
    ));

    clock.advance(DEFAULT_LOCK_DURATION_SECS + 1);
    let receipt = house.claim("buyer").unwrap();
    assert_eq!(receipt.quantity, 100);
    assert_eq!(
        house.events().last(),
        Some(&SaleEvent::TokensClaimed {
            buyer: "buyer".into(),
            quantity: 100,
            at: clock.now(),
        })
    );
    assert_eq!(house.outstanding_total(), 0);
    assert_eq!(house.purchased_of("buyer"), 0);
    assert_eq!(house.ledger_balance_of("buyer"), 100);
    assert_eq!(house.proceeds(), CURRENCY_SCALE);

    assert_eq!(house.claim("buyer"), Err(SaleError::NothingToClaim));
    house.audit().unwrap();
}

#[test]
fn random_operations_keep_books_consistent() {
    let config = SaleConfig::new(3, 50);
    let (house, clock) = open_sale(&config);
    let buyers = ["alice", "bob", "carol", "dave"];
    let mut rng = StdRng::seed_from_u64(7);
    let mut claimed: Amount = 0;

    for _ in 0..2_000 {
        let buyer = buyers[rng.gen_range(0..buyers.len())];
        match rng.gen_range(0..4) {
            0 | 1 => {
                let quantity: Amount = rng.gen_range(0..400);
                // anything from one short of the price to one over it
                let payment = (quantity * 3 + rng.gen_range(0..3)).saturating_sub(1);
                let before = house.outstanding_total();
                match house.purchase(buyer, quantity, payment) {
                    Ok(receipt) => assert_eq!(house.outstanding_total(), before + receipt.quantity),
                    Err(err) => {
                        assert!(!err.is_fatal());
                        assert_eq!(house.outstanding_total(), before);
                    }
                }
            }
            2 => {
                if let Ok(receipt) = house.claim(buyer) {
                    claimed += receipt.quantity;
                }
            }
            _ => {
                clock.advance(rng.gen_range(0..20));
            }
        }

        house.audit().unwrap();
        assert!(house.outstanding_total() <= house.ledger_balance_of(&config.sale_account));
    }

    let snapshot = house.snapshot();
    assert_eq!(snapshot.balances.values().sum::<Amount>(), 21_000_000);
    let held: Amount = buyers.iter().map(|b| house.ledger_balance_of(b)).sum();
    assert_eq!(held, claimed);
    assert!(!house.is_halted());
}
