//! Partial-signature mailbox built on account profile metadata.
//!
//! Each member owns one slot: a field of its `posting_json_metadata` holding
//! the latest [`RelayRecord`]. Records are tagged with the transaction
//! expiration, so a record from a previous hour never passes for a fresh one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

use crate::block_props::RefBlock;
use crate::ledger::{send_operations, BroadcastReceipt, Ledger};
use crate::metrics::METRICS;
use crate::steem::{ChainId, Operation, PrivateKey, TimePointSec};

/// A draft plus the signatures accumulated up to the publishing member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub expiration: TimePointSec,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    /// Hex signing digest of the draft.
    pub digest: String,
    /// Signatures in rotation order, one per member up to the publisher.
    pub signatures: Vec<String>,
}

impl RelayRecord {
    pub fn ref_block(&self) -> RefBlock {
        RefBlock {
            ref_block_num: self.ref_block_num,
            ref_block_prefix: self.ref_block_prefix,
        }
    }
}

#[async_trait]
pub trait SignatureRelay: Send + Sync {
    /// Overwrite this node's own slot.
    async fn publish(&self, record: &RelayRecord) -> Result<BroadcastReceipt, crate::Error>;

    /// Records for `accounts` tagged with `expiration`, in the order requested.
    /// `None` means the account has not published for that expiration.
    async fn fetch_many(
        &self,
        accounts: &[String],
        expiration: TimePointSec,
    ) -> Result<Vec<(String, Option<RelayRecord>)>, crate::Error>;

    async fn fetch(
        &self,
        account: &str,
        expiration: TimePointSec,
    ) -> Result<Option<RelayRecord>, crate::Error> {
        let mut found = self
            .fetch_many(&[account.to_string()], expiration)
            .await?;
        Ok(found.pop().and_then(|(_, record)| record))
    }
}

/// Parse profile metadata into a JSON object. Empty metadata is an empty object.
pub fn parse_metadata(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("metadata is not a JSON object".into()),
        Err(e) => Err(format!("metadata is not valid JSON: {e}")),
    }
}

/// Extract the record in `field` if it is tagged with `expiration`.
///
/// Absent fields, stale records and values in an older layout (a bare
/// signature string) all read as "not published".
pub fn read_record(
    metadata: &Map<String, Value>,
    field: &str,
    expiration: TimePointSec,
) -> Option<RelayRecord> {
    let value = metadata.get(field)?;
    let record = match serde_json::from_value::<RelayRecord>(value.clone()) {
        Ok(r) => r,
        Err(e) => {
            debug!(field, error = %e, "Relay field does not hold a record");
            return None;
        }
    };
    if record.expiration != expiration {
        debug!(
            found = %record.expiration,
            wanted = %expiration,
            "Relay record is from another hour"
        );
        return None;
    }
    Some(record)
}

/// [`SignatureRelay`] over the ledger's `posting_json_metadata`.
pub struct MetadataRelay {
    ledger: Arc<dyn Ledger>,
    account: String,
    posting_key: PrivateKey,
    chain_id: ChainId,
    field: String,
}

impl MetadataRelay {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        account: String,
        posting_key: PrivateKey,
        chain_id: ChainId,
        field: String,
    ) -> Self {
        Self {
            ledger,
            account,
            posting_key,
            chain_id,
            field,
        }
    }
}

#[async_trait]
impl SignatureRelay for MetadataRelay {
    async fn publish(&self, record: &RelayRecord) -> Result<BroadcastReceipt, crate::Error> {
        let accounts = self
            .ledger
            .get_accounts(std::slice::from_ref(&self.account))
            .await?;
        let own = accounts
            .into_iter()
            .find(|a| a.name == self.account)
            .ok_or_else(|| crate::Error::Metadata {
                account: self.account.clone(),
                reason: "account not found".into(),
            })?;

        let mut metadata =
            parse_metadata(&own.posting_json_metadata).map_err(|reason| crate::Error::Metadata {
                account: self.account.clone(),
                reason,
            })?;
        let value = serde_json::to_value(record).map_err(|e| crate::Error::Metadata {
            account: self.account.clone(),
            reason: format!("failed to encode record: {e}"),
        })?;
        metadata.insert(self.field.clone(), value);
        let posting_json_metadata =
            serde_json::to_string(&metadata).map_err(|e| crate::Error::Metadata {
                account: self.account.clone(),
                reason: format!("failed to encode metadata: {e}"),
            })?;

        let op = Operation::AccountUpdate2 {
            account: self.account.clone(),
            json_metadata: String::new(),
            posting_json_metadata,
        };
        let receipt = send_operations(
            self.ledger.as_ref(),
            &self.chain_id,
            vec![op],
            &self.posting_key,
        )
        .await?;

        METRICS.signatures_published.fetch_add(1, Ordering::Relaxed);
        info!(
            account = %self.account,
            expiration = %record.expiration,
            signatures = record.signatures.len(),
            tx_id = %receipt.tx_id,
            "Published partial signatures"
        );
        Ok(receipt)
    }

    async fn fetch_many(
        &self,
        accounts: &[String],
        expiration: TimePointSec,
    ) -> Result<Vec<(String, Option<RelayRecord>)>, crate::Error> {
        let records = self.ledger.get_accounts(accounts).await?;
        let by_name: HashMap<&str, &str> = records
            .iter()
            .map(|a| (a.name.as_str(), a.posting_json_metadata.as_str()))
            .collect();

        accounts
            .iter()
            .map(|name| {
                let record = match by_name.get(name.as_str()) {
                    Some(raw) => {
                        let metadata =
                            parse_metadata(raw).map_err(|reason| crate::Error::Metadata {
                                account: name.clone(),
                                reason,
                            })?;
                        read_record(&metadata, &self.field, expiration)
                    }
                    None => None,
                };
                Ok((name.clone(), record))
            })
            .collect()
    }
}
