//! The hourly signing protocol: draft, sign, pass along, broadcast.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

use crate::block_props::{RefBlock, RefBlockCache};
use crate::clock::HourSlot;
use crate::config::Config;
use crate::ledger::Ledger;
use crate::metrics::METRICS;
use crate::relay::{RelayRecord, SignatureRelay};
use crate::rotation::{Role, Rotation};
use crate::scheduler::HourlyProtocol;
use crate::steem::{
    Asset, ChainId, CompactSignature, Operation, PrivateKey, SignedTransaction, TimePointSec,
    Transaction, TransactionId,
};
use crate::Error;

/// The transfer every member signs, fixed by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTemplate {
    pub from: String,
    pub to: String,
    pub amount: Asset,
    pub memo: String,
}

impl TransferTemplate {
    pub fn operation(&self) -> Operation {
        Operation::Transfer {
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount.clone(),
            memo: self.memo.clone(),
        }
    }
}

/// Result of one protocol step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Partial signatures written to this node's relay slot.
    Published {
        tx_id: TransactionId,
        signatures: usize,
    },
    /// The fully signed transfer was accepted by the node.
    Broadcast {
        tx_id: TransactionId,
        signatures: usize,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Published { tx_id, signatures } => {
                write!(f, "published {signatures} signature(s) in {tx_id}")
            }
            Outcome::Broadcast { tx_id, signatures } => {
                write!(f, "broadcast transfer {tx_id} with {signatures} signature(s)")
            }
        }
    }
}

/// One rotation member's side of the protocol.
pub struct Coordinator {
    account: String,
    position: usize,
    rotation: Rotation,
    chain_id: ChainId,
    active_key: PrivateKey,
    transfer: TransferTemplate,
    ledger: Arc<dyn Ledger>,
    relay: Arc<dyn SignatureRelay>,
    block_props: RefBlockCache,
}

impl Coordinator {
    pub fn new(
        account: String,
        rotation: Rotation,
        chain_id: ChainId,
        active_key: PrivateKey,
        transfer: TransferTemplate,
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn SignatureRelay>,
    ) -> Result<Self, Error> {
        let position = rotation.position(&account).ok_or_else(|| {
            Error::Config(format!(
                "account {account} is not a member of the rotation [{}]",
                rotation.members().join(", ")
            ))
        })?;
        Ok(Self {
            account,
            position,
            rotation,
            chain_id,
            active_key,
            transfer,
            ledger,
            relay,
            block_props: RefBlockCache::new(),
        })
    }

    pub fn from_config(
        config: &Config,
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn SignatureRelay>,
    ) -> Result<Self, Error> {
        Self::new(
            config.account.clone(),
            config.rotation()?,
            config.chain_id()?,
            config.active_key()?,
            config.transfer()?,
            ledger,
            relay,
        )
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    pub fn role(&self) -> Role {
        // position was looked up in this rotation, so role_at always has an answer
        self.rotation
            .role_at(self.position)
            .unwrap_or(Role::Finalizer)
    }

    /// The unsigned transfer for a reference block and expiration.
    pub fn draft(&self, ref_block: RefBlock, expiration: TimePointSec) -> Transaction {
        Transaction::new(ref_block, expiration, vec![self.transfer.operation()])
    }

    fn sign(&self, tx: &Transaction) -> Result<([u8; 32], CompactSignature), Error> {
        let digest = tx.digest(&self.chain_id);
        let signature = self.active_key.sign_digest(&digest)?;
        Ok((digest, signature))
    }

    /// Rebuild the draft from `record` and check it against the local transfer.
    fn adopt(
        &self,
        owner: &str,
        record: &RelayRecord,
        expiration: TimePointSec,
    ) -> Result<Transaction, Error> {
        let tx = self.draft(record.ref_block(), expiration);
        let digest = hex::encode(tx.digest(&self.chain_id));
        if record.digest != digest {
            return Err(Error::DraftMismatch {
                account: owner.to_string(),
                reason: format!("digest {} but local draft is {digest}", record.digest),
            });
        }
        Ok(tx)
    }

    async fn publish(
        &self,
        tx: &Transaction,
        digest: [u8; 32],
        signatures: Vec<CompactSignature>,
    ) -> Result<Outcome, Error> {
        let record = RelayRecord {
            expiration: tx.expiration,
            ref_block_num: tx.ref_block_num,
            ref_block_prefix: tx.ref_block_prefix,
            digest: hex::encode(digest),
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        };
        let receipt = self.relay.publish(&record).await?;
        Ok(Outcome::Published {
            tx_id: receipt.tx_id,
            signatures: record.signatures.len(),
        })
    }

    async fn broadcast(
        &self,
        tx: Transaction,
        signatures: Vec<CompactSignature>,
    ) -> Result<Outcome, Error> {
        let count = signatures.len();
        let receipt = self
            .ledger
            .broadcast_transaction(&SignedTransaction {
                transaction: tx,
                signatures,
            })
            .await?;
        METRICS.transactions_broadcast.fetch_add(1, Ordering::Relaxed);
        info!(
            account = %self.account,
            tx_id = %receipt.tx_id,
            signatures = count,
            amount = %self.transfer.amount,
            to = %self.transfer.to,
            "Broadcast multisig transfer"
        );
        Ok(Outcome::Broadcast {
            tx_id: receipt.tx_id,
            signatures: count,
        })
    }

    async fn finalize_alone(&self, slot: HourSlot) -> Result<Outcome, Error> {
        let ref_block = self.block_props.resolve(self.ledger.as_ref(), slot).await?;
        let tx = self.draft(ref_block, slot.expiration()?);
        let (_, signature) = self.sign(&tx)?;
        self.broadcast(tx, vec![signature]).await
    }
}

fn parse_signature(owner: &str, raw: &str) -> Result<CompactSignature, Error> {
    raw.parse().map_err(|e| Error::DraftMismatch {
        account: owner.to_string(),
        reason: format!("unreadable signature: {e}"),
    })
}

/// Every record collected for one broadcast must describe the initiator's draft.
fn check_same_draft(
    owner: &str,
    record: &RelayRecord,
    initiator: &str,
    draft: &RelayRecord,
) -> Result<(), Error> {
    if record.ref_block() != draft.ref_block() {
        return Err(Error::DraftMismatch {
            account: owner.to_string(),
            reason: format!(
                "ref block {}/{} but {initiator} published {}/{}",
                record.ref_block_num,
                record.ref_block_prefix,
                draft.ref_block_num,
                draft.ref_block_prefix
            ),
        });
    }
    if record.digest != draft.digest {
        return Err(Error::DraftMismatch {
            account: owner.to_string(),
            reason: format!(
                "digest {} but {initiator} published {}",
                record.digest, draft.digest
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl HourlyProtocol for Coordinator {
    async fn initiate(&self, slot: HourSlot) -> Result<Outcome, Error> {
        let expiration = slot.expiration()?;
        let ref_block = self.block_props.resolve(self.ledger.as_ref(), slot).await?;
        let tx = self.draft(ref_block, expiration);
        let (digest, signature) = self.sign(&tx)?;
        debug!(
            account = %self.account,
            expiration = %expiration,
            digest = %hex::encode(digest),
            "Signed new draft"
        );
        self.publish(&tx, digest, vec![signature]).await
    }

    async fn relay_forward(&self, slot: HourSlot) -> Result<Outcome, Error> {
        let expiration = slot.expiration()?;
        let previous = self
            .position
            .checked_sub(1)
            .and_then(|p| self.rotation.member(p))
            .ok_or_else(|| {
                Error::Config(format!("{} has no upstream signer", self.account))
            })?;

        let record = self
            .relay
            .fetch(previous, expiration)
            .await?
            .ok_or_else(|| Error::MissingSignature {
                accounts: vec![previous.to_string()],
            })?;
        if record.signatures.len() != self.position {
            return Err(Error::DraftMismatch {
                account: previous.to_string(),
                reason: format!(
                    "expected {} signature(s), found {}",
                    self.position,
                    record.signatures.len()
                ),
            });
        }
        let tx = self.adopt(previous, &record, expiration)?;
        let mut signatures = record
            .signatures
            .iter()
            .map(|raw| parse_signature(previous, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let (digest, signature) = self.sign(&tx)?;
        signatures.push(signature);
        self.publish(&tx, digest, signatures).await
    }

    async fn finalize(&self, slot: HourSlot) -> Result<Outcome, Error> {
        if self.rotation.len() == 1 {
            return self.finalize_alone(slot).await;
        }
        let expiration = slot.expiration()?;
        let peers = self.rotation.peers_of(&self.account);
        let fetched = self.relay.fetch_many(&peers, expiration).await?;

        let missing: Vec<String> = fetched
            .iter()
            .filter(|(_, record)| record.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingSignature { accounts: missing });
        }
        let records: Vec<(String, RelayRecord)> = fetched
            .into_iter()
            .filter_map(|(name, record)| record.map(|r| (name, r)))
            .collect();

        let (initiator, first) = records
            .first()
            .ok_or_else(|| Error::MissingSignature {
                accounts: peers.clone(),
            })?;
        let tx = self.adopt(initiator, first, expiration)?;

        let mut signatures = Vec::with_capacity(self.rotation.len());
        for (j, (name, record)) in records.iter().enumerate() {
            if j > 0 {
                check_same_draft(name, record, initiator, first)?;
            }
            let raw = record.signatures.get(j).ok_or_else(|| Error::DraftMismatch {
                account: name.clone(),
                reason: format!(
                    "record holds {} signature(s), position {j} needs {}",
                    record.signatures.len(),
                    j + 1
                ),
            })?;
            signatures.push(parse_signature(name, raw)?);
        }

        let (_, signature) = self.sign(&tx)?;
        signatures.push(signature);
        self.broadcast(tx, signatures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{MemoryLedger, TEST_HEAD_BLOCK};
    use crate::relay::MetadataRelay;
    use time::macros::datetime;

    fn slot() -> HourSlot {
        HourSlot::containing(datetime!(2026-10-14 14:10:00 UTC))
    }

    fn active_key(index: usize) -> PrivateKey {
        PrivateKey::from_bytes(&[index as u8 + 1; 32]).unwrap()
    }

    fn template(amount: &str) -> TransferTemplate {
        TransferTemplate {
            from: "treasury".into(),
            to: "payee".into(),
            amount: Asset::parse(amount, "SBD").unwrap(),
            memo: "hourly".into(),
        }
    }

    fn node_with(
        ledger: &Arc<MemoryLedger>,
        members: &[&str],
        account: &str,
        amount: &str,
    ) -> Coordinator {
        let index = members.iter().position(|m| *m == account).unwrap();
        let relay = MetadataRelay::new(
            ledger.clone(),
            account.into(),
            PrivateKey::from_bytes(&[index as u8 + 101; 32]).unwrap(),
            ChainId::default(),
            "mtx".into(),
        );
        Coordinator::new(
            account.into(),
            Rotation::new(members.iter().map(|m| m.to_string()).collect()).unwrap(),
            ChainId::default(),
            active_key(index),
            template(amount),
            ledger.clone(),
            Arc::new(relay),
        )
        .unwrap()
    }

    fn node(ledger: &Arc<MemoryLedger>, members: &[&str], account: &str) -> Coordinator {
        node_with(ledger, members, account, "1.000")
    }

    fn assert_signed_by(tx: &SignedTransaction, keys: &[PrivateKey]) {
        let digest = tx.transaction.digest(&ChainId::default());
        assert_eq!(tx.signatures.len(), keys.len());
        for (sig, key) in tx.signatures.iter().zip(keys) {
            assert!(sig.is_canonical());
            assert_eq!(sig.recover(&digest).unwrap(), key.public_key());
        }
    }

    #[tokio::test]
    async fn test_two_member_cycle() {
        let members = ["alice", "bob"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        let alice = node(&ledger, &members, "alice");
        let bob = node(&ledger, &members, "bob");
        assert_eq!(alice.role(), Role::Initiator);
        assert_eq!(bob.role(), Role::Finalizer);

        let published = alice.initiate(slot()).await.unwrap();
        assert!(matches!(published, Outcome::Published { signatures: 1, .. }));
        assert!(ledger.transfers().is_empty());

        let done = bob.finalize(slot()).await.unwrap();
        assert!(matches!(done, Outcome::Broadcast { signatures: 2, .. }));

        let transfers = ledger.transfers();
        assert_eq!(transfers.len(), 1);
        let tx = &transfers[0];
        assert_eq!(tx.transaction.expiration.to_string(), "2026-10-14T15:00:00");
        assert_eq!(u32::from(tx.transaction.ref_block_num), TEST_HEAD_BLOCK & 0xFFFF);
        assert_eq!(tx.transaction.operations, vec![template("1.000").operation()]);
        assert_signed_by(tx, &[active_key(0), active_key(1)]);
    }

    #[tokio::test]
    async fn test_three_member_cycle() {
        let members = ["alice", "bob", "carol"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        let alice = node(&ledger, &members, "alice");
        let bob = node(&ledger, &members, "bob");
        let carol = node(&ledger, &members, "carol");
        assert_eq!(bob.role(), Role::Intermediate { position: 1 });

        alice.initiate(slot()).await.unwrap();
        let forwarded = bob.relay_forward(slot()).await.unwrap();
        assert!(matches!(forwarded, Outcome::Published { signatures: 2, .. }));
        carol.finalize(slot()).await.unwrap();

        let transfers = ledger.transfers();
        assert_eq!(transfers.len(), 1);
        assert_signed_by(&transfers[0], &[active_key(0), active_key(1), active_key(2)]);
    }

    #[tokio::test]
    async fn test_single_member_signs_alone() {
        let ledger = Arc::new(MemoryLedger::new(&["solo"]));
        let solo = node(&ledger, &["solo"], "solo");
        assert_eq!(solo.role(), Role::Finalizer);

        solo.finalize(slot()).await.unwrap();

        let transfers = ledger.transfers();
        assert_eq!(transfers.len(), 1);
        assert_signed_by(&transfers[0], &[active_key(0)]);
        assert_eq!(ledger.props_calls(), 1);
    }

    #[tokio::test]
    async fn test_finalize_names_every_missing_member() {
        let members = ["alice", "bob", "carol"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        let carol = node(&ledger, &members, "carol");

        let err = carol.finalize(slot()).await.unwrap_err();

        match err {
            Error::MissingSignature { accounts } => {
                assert_eq!(accounts, vec!["alice".to_string(), "bob".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ledger.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_waits_for_intermediate() {
        let members = ["alice", "bob", "carol"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        node(&ledger, &members, "alice").initiate(slot()).await.unwrap();

        let err = node(&ledger, &members, "carol")
            .finalize(slot())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingSignature { ref accounts } if accounts == &["bob".to_string()]));
        assert!(ledger.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_previous_hour_record_is_not_ready() {
        let members = ["alice", "bob"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        node(&ledger, &members, "alice").initiate(slot()).await.unwrap();

        let err = node(&ledger, &members, "bob")
            .finalize(slot().next())
            .await
            .unwrap_err();

        assert!(err.is_not_ready());
        assert!(ledger.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_relay_forward_requires_upstream() {
        let members = ["alice", "bob", "carol"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        let bob = node(&ledger, &members, "bob");

        let err = bob.relay_forward(slot()).await.unwrap_err();

        assert!(matches!(err, Error::MissingSignature { ref accounts } if accounts == &["alice".to_string()]));
        assert!(ledger.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_differing_transfer_is_rejected() {
        let members = ["alice", "bob"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        node(&ledger, &members, "alice").initiate(slot()).await.unwrap();
        let bob = node_with(&ledger, &members, "bob", "2.000");

        let err = bob.finalize(slot()).await.unwrap_err();

        assert!(matches!(err, Error::DraftMismatch { ref account, .. } if account == "alice"));
        assert!(ledger.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_relay_forward_checks_signature_count() {
        let ledger = Arc::new(MemoryLedger::new(&["alice", "bob", "carol"]));
        let first = ["alice", "bob", "carol"];
        node(&ledger, &first, "alice").initiate(slot()).await.unwrap();
        node(&ledger, &first, "bob").relay_forward(slot()).await.unwrap();

        // bob now holds two signatures, one too many for position 1
        let second = ["bob", "carol", "alice"];
        let err = node(&ledger, &second, "carol")
            .relay_forward(slot())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DraftMismatch { ref account, .. } if account == "bob"));
    }

    #[tokio::test]
    async fn test_finalize_rejects_intermediate_built_on_replaced_draft() {
        let members = ["alice", "bob", "carol"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        node(&ledger, &members, "alice").initiate(slot()).await.unwrap();
        node(&ledger, &members, "bob").relay_forward(slot()).await.unwrap();

        // alice restarts and republishes against a newer head block
        ledger.set_head(0x0123_9999, "01239999ffeeddcc00112233445566778899aabb");
        node(&ledger, &members, "alice").initiate(slot()).await.unwrap();

        let err = node(&ledger, &members, "carol")
            .finalize(slot())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DraftMismatch { ref account, .. } if account == "bob"));
        assert!(ledger.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_propagates_props_failure() {
        let members = ["alice", "bob"];
        let ledger = Arc::new(MemoryLedger::new(&members));
        ledger.fail_props(true);

        let err = node(&ledger, &members, "alice")
            .initiate(slot())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Rpc(_)));
        assert!(ledger.broadcasts().is_empty());
        assert_eq!(ledger.metadata("alice"), "");
    }

    #[tokio::test]
    async fn test_rejected_broadcast_surfaces_ledger_error() {
        let ledger = Arc::new(MemoryLedger::new(&["solo"]));
        ledger.fail_broadcasts(true);
        let err = node(&ledger, &["solo"], "solo")
            .finalize(slot())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }

    #[test]
    fn test_non_member_rejected() {
        let ledger = Arc::new(MemoryLedger::new(&[]));
        let relay = MetadataRelay::new(
            ledger.clone(),
            "mallory".into(),
            active_key(9),
            ChainId::default(),
            "mtx".into(),
        );
        let result = Coordinator::new(
            "mallory".into(),
            Rotation::new(vec!["alice".into(), "bob".into()]).unwrap(),
            ChainId::default(),
            active_key(9),
            template("1.000"),
            ledger,
            Arc::new(relay),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
