//! Steem ledger primitives: transaction types, Graphene binary layout and keys.

mod keys;
mod serializer;
mod types;

pub use keys::{ChainId, CompactSignature, PrivateKey};
pub use types::{
    Asset, Extension, Operation, SignedTransaction, TimePointSec, Transaction, TransactionId,
};
