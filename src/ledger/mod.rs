use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type AccountId = String;
pub type Amount = u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance in {holder}: has {available}, needs {requested}")]
    InsufficientBalance {
        holder: AccountId,
        available: Amount,
        requested: Amount,
    },
    #[error("balance overflow crediting {holder}")]
    ArithmeticOverflow { holder: AccountId },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Issued {
        to: AccountId,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub total_supply: Amount,
    pub balances: BTreeMap<AccountId, Amount>,
    pub transfers: u64,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

/// Fixed-supply account book. The whole supply is issued once at creation
/// and afterwards only moves between holders.
#[derive(Clone, Debug)]
pub struct Ledger {
    total_supply: Amount,
    balances: BTreeMap<AccountId, Amount>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    pub fn create(total_supply: Amount, initial_holder: impl Into<AccountId>) -> Self {
        let holder = initial_holder.into();
        let mut balances = BTreeMap::new();
        balances.insert(holder.clone(), total_supply);
        Self {
            total_supply,
            balances,
            events: vec![LedgerEvent::Issued {
                to: holder,
                amount: total_supply,
            }],
        }
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, holder: &str) -> Amount {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    /// Moves `amount` from `from` to `to`. Either both sides change or neither.
    /// Zero amounts and self-transfers succeed without touching balances, but
    /// the sender must still cover `amount`.
    pub fn transfer(&mut self, from: &str, to: &str, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: from.to_string(),
                available,
                requested: amount,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }

        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::ArithmeticOverflow {
                holder: to.to_string(),
            })?;

        self.balances.insert(from.to_string(), available - amount);
        self.balances.insert(to.to_string(), credited);
        self.events.push(LedgerEvent::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        Ok(())
    }

    /// Holders with a non-zero balance, in account order.
    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.balances
            .iter()
            .filter(|(_, balance)| **balance > 0)
            .map(|(holder, balance)| (holder, *balance))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// True when the balances add up to the issued supply.
    pub fn is_conserved(&self) -> bool {
        self.balances
            .values()
            .try_fold(0u128, |acc, balance| acc.checked_add(*balance))
            == Some(self.total_supply)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let balances: BTreeMap<AccountId, Amount> = self
            .holders()
            .map(|(holder, balance)| (holder.clone(), balance))
            .collect();
        LedgerSnapshot {
            total_supply: self.total_supply,
            state_root: compute_state_root(self.total_supply, &balances),
            balances,
            transfers: self
                .events
                .iter()
                .filter(|event| matches!(event, LedgerEvent::Transfer { .. }))
                .count() as u64,
        }
    }
}

fn compute_state_root(total_supply: Amount, balances: &BTreeMap<AccountId, Amount>) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(balances.len() + 1);
    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (holder, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update((holder.len() as u64).to_le_bytes());
        hasher.update(holder.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            // odd node is paired with itself
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Amounts as decimal strings. Tagged enums buffer their fields before
/// dispatching on the tag, and the buffer has no room for `u128`.
pub(crate) mod amount_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

pub(crate) mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_credits_whole_supply_to_initial_holder() {
        let ledger = Ledger::create(21_000_000, "deployer");
        assert_eq!(ledger.total_supply(), 21_000_000);
        assert_eq!(ledger.balance_of("deployer"), 21_000_000);
        assert_eq!(ledger.balance_of("nobody"), 0);
        assert!(ledger.is_conserved());
        assert_eq!(
            ledger.events(),
            &[LedgerEvent::Issued {
                to: "deployer".into(),
                amount: 21_000_000
            }]
        );
    }

    #[test]
    fn transfer_moves_balance_and_records_event() {
        let mut ledger = Ledger::create(1_000, "deployer");
        ledger.transfer("deployer", "sale", 400).unwrap();
        assert_eq!(ledger.balance_of("deployer"), 600);
        assert_eq!(ledger.balance_of("sale"), 400);
        assert!(ledger.is_conserved());
        assert_eq!(ledger.events().len(), 2);
    }

    #[test]
    fn overdraft_is_rejected_without_side_effects() {
        let mut ledger = Ledger::create(1_000, "deployer");
        ledger.transfer("deployer", "alice", 10).unwrap();
        let before = ledger.snapshot();
        let err = ledger.transfer("alice", "bob", 11).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                holder: "alice".into(),
                available: 10,
                requested: 11,
            }
        );
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn zero_and_self_transfers_are_noops() {
        let mut ledger = Ledger::create(50, "deployer");
        ledger.transfer("deployer", "alice", 0).unwrap();
        ledger.transfer("deployer", "deployer", 50).unwrap();
        assert_eq!(ledger.balance_of("deployer"), 50);
        assert_eq!(ledger.balance_of("alice"), 0);
        assert_eq!(ledger.events().len(), 1);
        assert!(ledger.is_conserved());

        // a self-transfer still has to be covered
        assert!(matches!(
            ledger.transfer("deployer", "deployer", 51),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn state_root_is_deterministic_and_tracks_balances() {
        let mut a = Ledger::create(100, "deployer");
        let mut b = Ledger::create(100, "deployer");
        a.transfer("deployer", "alice", 30).unwrap();
        b.transfer("deployer", "alice", 30).unwrap();
        assert_eq!(a.snapshot().state_root, b.snapshot().state_root);

        b.transfer("alice", "bob", 1).unwrap();
        assert_ne!(a.snapshot().state_root, b.snapshot().state_root);
    }

    #[test]
    fn events_round_trip_through_json() {
        let mut ledger = Ledger::create(Amount::MAX, "deployer");
        ledger.transfer("deployer", "alice", u64::MAX as Amount + 1).unwrap();
        let json = serde_json::to_string(ledger.events()).unwrap();
        assert!(json.contains(r#""amount":"18446744073709551616""#));

        let decoded: Vec<LedgerEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ledger.events());
    }

    #[test]
    fn snapshot_omits_emptied_accounts() {
        let mut ledger = Ledger::create(10, "deployer");
        ledger.transfer("deployer", "alice", 10).unwrap();
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.balances.len(), 1);
        assert_eq!(snapshot.balances["alice"], 10);
        assert_eq!(snapshot.transfers, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
