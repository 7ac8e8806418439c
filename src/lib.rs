//! Fixed-supply token sale engine.
//!
//! * [`ledger`]: fixed-supply account book the sold tokens live in.
//! * [`clock`]: injectable time source for lock checks.
//! * [`payment`]: capture of the native currency attached to purchases.
//! * [`sale`]: the purchase/claim state machine.
//! * [`house`]: one lock around ledger, sale and payments, so every
//!   operation is applied atomically with respect to the others.
//! * [`config`] and [`replay`]: sale parameters and the scripted driver used
//!   by the `token-sale` binary.

pub mod clock;
pub mod config;
pub mod house;
pub mod ledger;
pub mod payment;
pub mod replay;
pub mod sale;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{LockPolicy, OverpaymentPolicy, SaleConfig};
pub use house::SaleHouse;
pub use ledger::{AccountId, Amount, Ledger, LedgerError};
pub use payment::{NativeAmount, PaymentChannel, ProceedsVault};
pub use sale::{SaleEngine, SaleError, SaleEvent};
