//! Transaction, operation and asset types with their JSON wire form.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::keys::CompactSignature;

/// Asset precision used by SBD and STEEM amounts.
pub const ASSET_PRECISION: u8 = 3;
/// Asset symbols are packed into 7 zero-padded bytes.
pub const MAX_SYMBOL_LEN: usize = 7;

/// Seconds since the Unix epoch, rendered as `YYYY-MM-DDTHH:MM:SS` (UTC, no suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePointSec(u32);

impl TimePointSec {
    pub fn from_unix(secs: i64) -> Result<Self, crate::Error> {
        u32::try_from(secs)
            .map(Self)
            .map_err(|_| crate::Error::Signing(format!("timestamp {secs} out of range")))
    }

    pub fn unix(self) -> u32 {
        self.0
    }

    pub fn plus_secs(self, secs: u32) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn parse(s: &str) -> Result<Self, crate::Error> {
        // Nodes occasionally append a zone designator; the ledger itself never does.
        let trimmed = s.trim_end_matches('Z');
        let parsed = PrimitiveDateTime::parse(
            trimmed,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
        .map_err(|e| crate::Error::Rpc(format!("invalid time point {s:?}: {e}")))?;
        Self::from_unix(parsed.assume_utc().unix_timestamp())
    }
}

impl fmt::Display for TimePointSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = OffsetDateTime::from_unix_timestamp(i64::from(self.0)).map_err(|_| fmt::Error)?;
        let text = dt
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]"
            ))
            .map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl Serialize for TimePointSec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimePointSec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// Fixed-precision ledger amount, e.g. `1.000 SBD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub amount: i64,
    pub precision: u8,
    pub symbol: String,
}

impl Asset {
    /// Parse a decimal amount (`"1"`, `"0.5"`, `"12.345"`) at asset precision.
    pub fn parse(amount: &str, symbol: &str) -> Result<Self, crate::Error> {
        let amount = amount.trim();
        let symbol = symbol.trim();
        if symbol.is_empty()
            || symbol.len() > MAX_SYMBOL_LEN
            || !symbol.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err(crate::Error::Config(format!("invalid asset symbol {symbol:?}")));
        }

        let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
        let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !digits_ok(whole) || !digits_ok(frac) {
            return Err(crate::Error::Config(format!("invalid amount {amount:?}")));
        }
        if frac.len() > usize::from(ASSET_PRECISION) {
            return Err(crate::Error::Config(format!(
                "amount {amount:?} has more than {ASSET_PRECISION} decimals"
            )));
        }

        let scale = 10i64.pow(u32::from(ASSET_PRECISION));
        let padded = format!("{frac:0<width$}", width = usize::from(ASSET_PRECISION));
        let units = whole
            .parse::<i64>()
            .ok()
            .and_then(|w| w.checked_mul(scale))
            .and_then(|w| w.checked_add(padded.parse::<i64>().ok()?))
            .ok_or_else(|| crate::Error::Config(format!("amount {amount:?} out of range")))?;
        if units == 0 {
            return Err(crate::Error::Config("transfer amount must be positive".into()));
        }

        Ok(Self {
            amount: units,
            precision: ASSET_PRECISION,
            symbol: symbol.to_string(),
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10i64.pow(u32::from(self.precision));
        write!(
            f,
            "{}.{:0width$} {}",
            self.amount / scale,
            self.amount % scale,
            self.symbol,
            width = usize::from(self.precision)
        )
    }
}

/// The operations this relay emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Transfer {
        from: String,
        to: String,
        amount: Asset,
        memo: String,
    },
    /// Profile metadata update. Leaves authorities and memo key untouched.
    AccountUpdate2 {
        account: String,
        json_metadata: String,
        posting_json_metadata: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Transfer { .. } => "transfer",
            Operation::AccountUpdate2 { .. } => "account_update2",
        }
    }
}

#[derive(Serialize)]
struct TransferBody<'a> {
    from: &'a str,
    to: &'a str,
    amount: String,
    memo: &'a str,
}

#[derive(Serialize)]
struct AccountUpdate2Body<'a> {
    account: &'a str,
    json_metadata: &'a str,
    posting_json_metadata: &'a str,
    extensions: [(); 0],
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operation::Transfer {
                from,
                to,
                amount,
                memo,
            } => (
                self.name(),
                TransferBody {
                    from,
                    to,
                    amount: amount.to_string(),
                    memo,
                },
            )
                .serialize(serializer),
            Operation::AccountUpdate2 {
                account,
                json_metadata,
                posting_json_metadata,
            } => (
                self.name(),
                AccountUpdate2Body {
                    account,
                    json_metadata,
                    posting_json_metadata,
                    extensions: [],
                },
            )
                .serialize(serializer),
        }
    }
}

/// Transaction extensions. None are defined for the operations emitted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Extension {}

/// An unsigned transaction bound to a reference block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: TimePointSec,
    pub operations: Vec<Operation>,
    pub extensions: Vec<Extension>,
}

impl Transaction {
    pub fn new(
        ref_block: crate::block_props::RefBlock,
        expiration: TimePointSec,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            ref_block_num: ref_block.ref_block_num,
            ref_block_prefix: ref_block.ref_block_prefix,
            expiration,
            operations,
            extensions: Vec::new(),
        }
    }
}

/// A transaction plus the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<CompactSignature>,
}

impl Serialize for SignedTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tx = &self.transaction;
        let mut s = serializer.serialize_struct("SignedTransaction", 6)?;
        s.serialize_field("ref_block_num", &tx.ref_block_num)?;
        s.serialize_field("ref_block_prefix", &tx.ref_block_prefix)?;
        s.serialize_field("expiration", &tx.expiration)?;
        s.serialize_field("operations", &tx.operations)?;
        s.serialize_field("extensions", &tx.extensions)?;
        let signatures: Vec<String> = self.signatures.iter().map(|s| s.to_string()).collect();
        s.serialize_field("signatures", &signatures)?;
        s.end()
    }
}

/// First 20 bytes of the sha256 of the unsigned transaction, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
