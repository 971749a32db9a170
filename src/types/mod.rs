//! Fixed-point conversions and the decoded lending-pool snapshots.

pub mod conversions;
pub mod snapshots;

pub use snapshots::{AccountSnapshot, RawAccountData, RawReserveData, ReserveSnapshot};
