//! Ledger capability consumed by the relay protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::block_props::RefBlock;
use crate::steem::{
    ChainId, Operation, PrivateKey, SignedTransaction, TimePointSec, Transaction, TransactionId,
};

/// Lifetime given to one-off operations (metadata updates), from head block time.
pub const OPERATION_EXPIRATION_SECS: u32 = 60;

/// Subset of the node's dynamic global properties needed for block binding.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u32,
    pub head_block_id: String,
    pub time: TimePointSec,
}

/// Account fields read by the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    #[serde(default)]
    pub posting_json_metadata: String,
}

/// Locally computed receipt for an accepted broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastReceipt {
    pub tx_id: TransactionId,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn dynamic_global_properties(&self) -> Result<DynamicGlobalProperties, crate::Error>;

    /// Unknown names are omitted from the result.
    async fn get_accounts(&self, names: &[String]) -> Result<Vec<AccountRecord>, crate::Error>;

    async fn broadcast_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<BroadcastReceipt, crate::Error>;
}

/// Bind `operations` to the head block, sign with a single key and broadcast.
pub async fn send_operations(
    ledger: &dyn Ledger,
    chain_id: &ChainId,
    operations: Vec<Operation>,
    key: &PrivateKey,
) -> Result<BroadcastReceipt, crate::Error> {
    let props = ledger.dynamic_global_properties().await?;
    let ref_block = RefBlock::from_props(&props)?;
    let tx = Transaction::new(
        ref_block,
        props.time.plus_secs(OPERATION_EXPIRATION_SECS),
        operations,
    );
    let signature = key.sign_digest(&tx.digest(chain_id))?;
    ledger
        .broadcast_transaction(&SignedTransaction {
            transaction: tx,
            signatures: vec![signature],
        })
        .await
}

// --- Test helpers (shared across module tests) ---


#[cfg(test)]
mod tests {
    use super::testing::MemoryLedger;
    use super::*;

    #[tokio::test]
    async fn test_send_operations_binds_to_head_and_signs_once() {
        let ledger = MemoryLedger::new(&["alice"]);
        let key = PrivateKey::from_bytes(&[1u8; 32]).unwrap();
        let chain_id = ChainId::default();
        let op = Operation::AccountUpdate2 {
            account: "alice".into(),
            json_metadata: String::new(),
            posting_json_metadata: r#"{"mtx":"x"}"#.into(),
        };

        let receipt = send_operations(&ledger, &chain_id, vec![op], &key)
            .await
            .unwrap();

        let sent = ledger.broadcasts();
        assert_eq!(sent.len(), 1);
        let tx = &sent[0].transaction;
        assert_eq!(receipt.tx_id, tx.id());
        assert_eq!(tx.ref_block_num, 0x4567);
        assert_eq!(tx.ref_block_prefix, u32::from_le_bytes([0xaa, 0xbb, 0xcc, 0xdd]));
        assert_eq!(tx.expiration.unix(), 1_791_987_000 + OPERATION_EXPIRATION_SECS);
        assert_eq!(sent[0].signatures.len(), 1);
        assert_eq!(
            sent[0].signatures[0].recover(&tx.digest(&chain_id)).unwrap(),
            key.public_key()
        );
        assert_eq!(ledger.metadata("alice"), r#"{"mtx":"x"}"#);
    }

    #[tokio::test]
    async fn test_send_operations_propagates_props_failure() {
        let ledger = MemoryLedger::new(&["alice"]);
        ledger.fail_props(true);
        let key = PrivateKey::from_bytes(&[1u8; 32]).unwrap();
        let result = send_operations(&ledger, &ChainId::default(), vec![], &key).await;
        assert!(matches!(result, Err(crate::Error::Rpc(_))));
        assert!(ledger.broadcasts().is_empty());
    }

    #[test]
    fn test_account_record_defaults_missing_metadata() {
        let rec: AccountRecord = serde_json::from_str(r#"{"name":"alice"}"#).unwrap();
        assert_eq!(rec.posting_json_metadata, "");
    }

    #[test]
    fn test_props_deserialize_from_node_json() {
        let props: DynamicGlobalProperties = serde_json::from_str(
            r#"{"head_block_number": 5, "head_block_id": "00000005aabbccdd", "time": "2026-10-14T14:10:00", "current_witness": "w"}"#,
        )
        .unwrap();
        assert_eq!(props.head_block_number, 5);
        assert_eq!(props.time.to_string(), "2026-10-14T14:10:00");
    }
}
