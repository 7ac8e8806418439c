use serde::{Deserialize, Serialize};

use crate::{
    clock::Timestamp,
    ledger::{amount_str, AccountId, Amount},
    payment::NativeAmount,
};

/// Observable sale events, in commit order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleEvent {
    Purchased {
        buyer: AccountId,
        #[serde(with = "amount_str")]
        quantity: Amount,
        #[serde(with = "amount_str")]
        paid: NativeAmount,
        at: Timestamp,
    },
    TokensClaimed {
        buyer: AccountId,
        #[serde(with = "amount_str")]
        quantity: Amount,
        at: Timestamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_through_json() {
        let events = vec![
            SaleEvent::Purchased {
                buyer: "alice".into(),
                quantity: 100,
                paid: 1_000_000_000_000_000_000_000,
                at: 1_700_000_000,
            },
            SaleEvent::TokensClaimed {
                buyer: "alice".into(),
                quantity: Amount::MAX,
                at: 1_731_536_001,
            },
        ];
        let json = serde_json::to_string(&events).unwrap();
        assert!(json.contains(r#""type":"tokens_claimed""#));
        assert!(json.contains(r#""paid":"1000000000000000000000""#));

        let decoded: Vec<SaleEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, events);
    }
}
