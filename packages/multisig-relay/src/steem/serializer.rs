//! Graphene binary layout used for signing digests and transaction ids.

use sha2::{Digest, Sha256};

use super::keys::ChainId;
use super::types::{Asset, Operation, Transaction, TransactionId, MAX_SYMBOL_LEN};

pub(crate) const TRANSFER_OP_ID: u32 = 2;
pub(crate) const ACCOUNT_UPDATE2_OP_ID: u32 = 43;

/// Append the little-endian binary form of a value.
trait Pack {
    fn pack(&self, buf: &mut Vec<u8>);
}

fn pack_varint32(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn pack_len(len: usize, buf: &mut Vec<u8>) {
    // Lengths above u32::MAX cannot reach a node; saturate instead of wrapping.
    pack_varint32(u32::try_from(len).unwrap_or(u32::MAX), buf);
}

impl Pack for str {
    fn pack(&self, buf: &mut Vec<u8>) {
        pack_len(self.len(), buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Pack for Asset {
    fn pack(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.push(self.precision);
        let mut symbol = [0u8; MAX_SYMBOL_LEN];
        for (dst, src) in symbol.iter_mut().zip(self.symbol.bytes()) {
            *dst = src;
        }
        buf.extend_from_slice(&symbol);
    }
}

impl Pack for Operation {
    fn pack(&self, buf: &mut Vec<u8>) {
        match self {
            Operation::Transfer {
                from,
                to,
                amount,
                memo,
            } => {
                pack_varint32(TRANSFER_OP_ID, buf);
                from.pack(buf);
                to.pack(buf);
                amount.pack(buf);
                memo.pack(buf);
            }
            Operation::AccountUpdate2 {
                account,
                json_metadata,
                posting_json_metadata,
            } => {
                pack_varint32(ACCOUNT_UPDATE2_OP_ID, buf);
                account.pack(buf);
                // owner, active, posting, memo_key: all absent
                buf.extend_from_slice(&[0, 0, 0, 0]);
                json_metadata.pack(buf);
                posting_json_metadata.pack(buf);
                pack_len(0, buf);
            }
        }
    }
}

impl Pack for Transaction {
    fn pack(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.ref_block_num.to_le_bytes());
        buf.extend_from_slice(&self.ref_block_prefix.to_le_bytes());
        buf.extend_from_slice(&self.expiration.unix().to_le_bytes());
        pack_len(self.operations.len(), buf);
        for op in &self.operations {
            op.pack(buf);
        }
        pack_len(self.extensions.len(), buf);
        for ext in &self.extensions {
            match *ext {}
        }
    }
}

impl Transaction {
    /// Binary form of the unsigned transaction.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        self.pack(&mut buf);
        buf
    }

    /// Signing digest: `sha256(chain_id || tx_bytes)`.
    pub fn digest(&self, chain_id: &ChainId) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id.as_bytes());
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }

    pub fn id(&self) -> TransactionId {
        let hash = Sha256::digest(self.to_bytes());
        TransactionId(hex::encode(&hash[..20]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_props::RefBlock;
    use crate::steem::TimePointSec;

    fn sample_tx() -> Transaction {
        Transaction::new(
            RefBlock {
                ref_block_num: 0x1234,
                ref_block_prefix: 0xdeadbeef,
            },
            TimePointSec::from_unix(1_791_990_000).unwrap(),
            vec![Operation::Transfer {
                from: "alice".into(),
                to: "bob".into(),
                amount: Asset::parse("1", "SBD").unwrap(),
                memo: "m".into(),
            }],
        )
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        pack_varint32(0, &mut buf);
        pack_varint32(127, &mut buf);
        pack_varint32(128, &mut buf);
        pack_varint32(300, &mut buf);
        assert_eq!(buf, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn test_transfer_layout() {
        let bytes = sample_tx().to_bytes();
        let mut expected = Vec::new();
        expected.extend_from_slice(&0x1234u16.to_le_bytes());
        expected.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        expected.extend_from_slice(&1_791_990_000u32.to_le_bytes());
        expected.push(1); // one operation
        expected.push(2); // transfer
        expected.extend_from_slice(&[5, b'a', b'l', b'i', b'c', b'e']);
        expected.extend_from_slice(&[3, b'b', b'o', b'b']);
        expected.extend_from_slice(&1000i64.to_le_bytes());
        expected.push(3);
        expected.extend_from_slice(b"SBD\0\0\0\0");
        expected.extend_from_slice(&[1, b'm']);
        expected.push(0); // extensions
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_account_update2_layout() {
        let mut buf = Vec::new();
        Operation::AccountUpdate2 {
            account: "al".into(),
            json_metadata: String::new(),
            posting_json_metadata: "{}".into(),
        }
        .pack(&mut buf);
        assert_eq!(
            buf,
            vec![43, 2, b'a', b'l', 0, 0, 0, 0, 0, 2, b'{', b'}', 0]
        );
    }

    #[test]
    fn test_digest_depends_on_chain_id() {
        let tx = sample_tx();
        let steem = ChainId::default();
        let other: ChainId = "11".repeat(32).parse().unwrap();
        assert_ne!(tx.digest(&steem), tx.digest(&other));
        assert_eq!(tx.digest(&steem), tx.digest(&steem));
    }

    #[test]
    fn test_id_is_20_bytes_hex() {
        let id = sample_tx().id();
        assert_eq!(id.0.len(), 40);
        assert!(id.0.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_id_changes_with_expiration() {
        let a = sample_tx();
        let mut b = sample_tx();
        b.expiration = b.expiration.plus_secs(3600);
        assert_ne!(a.id(), b.id());
    }
}
