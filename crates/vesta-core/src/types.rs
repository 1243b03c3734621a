//! Core engine types: addresses, checkpoints, locks, reward weeks.
//!
//! All amounts are [`Amount`]s; all times are Unix seconds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::fixed::Amount;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// A 20-byte account identifier supplied by the ledger executor.
///
/// Serializes as a `0x`-prefixed hex string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Never a valid token, escrow, or controller.
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Failure to parse a `0x`-prefixed hex address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAddressError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| ParseAddressError::InvalidHex(e.to_string()))?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseAddressError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Chain position observed at the start of a call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockContext {
    /// Block timestamp.
    pub timestamp: Timestamp,
    /// Block number.
    pub number: u64,
}

/// Everything an operation needs from the executor, captured once per call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Account invoking the operation.
    pub caller: Address,
    /// Current block.
    pub block: BlockContext,
}

impl CallContext {
    pub fn new(caller: Address, timestamp: Timestamp, number: u64) -> Self {
        Self {
            caller,
            block: BlockContext { timestamp, number },
        }
    }

    /// Current timestamp.
    pub fn now(&self) -> Timestamp {
        self.block.timestamp
    }
}

/// A checkpoint: one linear segment of decaying voting power.
///
/// `power(t) = max(0, bias - slope * (t - ts))` for `t >= ts`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Point {
    /// Voting power at `ts`.
    pub bias: Amount,
    /// Power lost per second.
    pub slope: Amount,
    /// Timestamp of the checkpoint.
    pub ts: Timestamp,
    /// Block number of the checkpoint.
    pub blk: u64,
}

impl Point {
    /// Voting power at `t`, clamped at zero. Times before `ts` evaluate at `ts`.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::fixed::Amount;
    /// use vesta_core::types::Point;
    /// let p = Point { bias: Amount::from_raw(100), slope: Amount::from_raw(2), ts: 10, blk: 1 };
    /// assert_eq!(p.power_at(10), Amount::from_raw(100));
    /// assert_eq!(p.power_at(30), Amount::from_raw(60));
    /// assert_eq!(p.power_at(1_000), Amount::ZERO);
    /// ```
    pub fn power_at(&self, t: Timestamp) -> Amount {
        let dt = t.saturating_sub(self.ts);
        self.bias.saturating_sub(self.slope.saturating_mul_int(dt))
    }
}

/// An account's locked deposit.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct LockedBalance {
    /// Amount held by the escrow.
    pub amount: Amount,
    /// Week-aligned natural unlock time.
    pub end: Timestamp,
    /// Withdrawal allowed straight after `end` without a cooldown.
    pub auto_cooldown: bool,
    /// The account has started exiting.
    pub cooldown_initiated: bool,
    /// Earliest withdrawal time once cooldown is initiated; zero otherwise.
    pub cooldown_end: Timestamp,
}

impl LockedBalance {
    /// Whether a nonzero deposit is held.
    pub fn exists(&self) -> bool {
        !self.amount.is_zero()
    }

    /// Whether the lock still accrues voting power at `now`.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.exists() && !self.cooldown_initiated && self.end > now
    }
}

/// One week of reward accounting.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct RewardEpoch {
    /// Week-aligned start of the week.
    pub week_start: Timestamp,
    /// Rewards credited during the week.
    pub tokens_per_week: Amount,
    /// Total voting power at `week_start`.
    pub total_supply_at_week: Amount,
}

/// Per-account claim progress.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ClaimCursor {
    /// Start of the last week included in a claim.
    pub last_week: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_roundtrip() {
        let a = Address([0xab; 20]);
        let s = a.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 42);
        assert_eq!(s.parse::<Address>().unwrap(), a);
    }

    #[test]
    fn address_parse_without_prefix() {
        let a: Address = "0101010101010101010101010101010101010101".parse().unwrap();
        assert_eq!(a, Address([1; 20]));
    }

    #[test]
    fn address_parse_rejects_bad_input() {
        assert!(matches!("0x12".parse::<Address>(), Err(ParseAddressError::InvalidLength(1))));
        assert!(matches!("0xzz".parse::<Address>(), Err(ParseAddressError::InvalidHex(_))));
    }

    #[test]
    fn address_json_is_hex_string() {
        let a = Address([0x0f; 20]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "0f".repeat(20)));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), a);
        assert!(serde_json::from_str::<Address>("\"0x01\"").is_err());
    }

    #[test]
    fn lock_json_carries_decimal_amounts() {
        let lock = LockedBalance {
            amount: Amount::from_tokens(12),
            end: 604_800,
            auto_cooldown: true,
            ..LockedBalance::default()
        };
        let json = serde_json::to_value(lock).unwrap();
        assert_eq!(json["amount"], "12");
        assert_eq!(json["auto_cooldown"], true);
        let back: LockedBalance = serde_json::from_value(json).unwrap();
        assert_eq!(back, lock);
    }

    #[test]
    fn zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address([1; 20]).is_zero());
    }

    #[test]
    fn point_power_clamps_at_zero() {
        let p = Point {
            bias: Amount::from_raw(10),
            slope: Amount::from_raw(3),
            ts: 0,
            blk: 0,
        };
        assert_eq!(p.power_at(3), Amount::from_raw(1));
        assert_eq!(p.power_at(4), Amount::ZERO);
        assert_eq!(p.power_at(u64::MAX), Amount::ZERO);
    }

    #[test]
    fn point_before_ts_reads_bias() {
        let p = Point {
            bias: Amount::from_raw(10),
            slope: Amount::from_raw(1),
            ts: 50,
            blk: 0,
        };
        assert_eq!(p.power_at(0), Amount::from_raw(10));
    }

    #[test]
    fn lock_activity() {
        let mut lock = LockedBalance {
            amount: Amount::ONE,
            end: 100,
            ..LockedBalance::default()
        };
        assert!(lock.exists());
        assert!(lock.is_active(99));
        assert!(!lock.is_active(100));
        lock.cooldown_initiated = true;
        assert!(!lock.is_active(0));
        assert!(!LockedBalance::default().exists());
    }
}
