//! Error types for the multisig relay.

use std::fmt;

/// Relay error type.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(String),
    /// Transport-level RPC failure (connection, timeout, bad response body).
    Rpc(String),
    /// The node answered but rejected the call.
    Ledger(String),
    /// An account's profile metadata could not be read or written.
    Metadata { account: String, reason: String },
    /// Rotation members that have not published for the current hour.
    MissingSignature { accounts: Vec<String> },
    /// A published record disagrees with the transaction this node would sign.
    DraftMismatch { account: String, reason: String },
    /// Key decoding or signing failure.
    Signing(String),
}

impl Error {
    /// `true` when the failure only means an upstream signer is late.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::MissingSignature { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Rpc(msg) => write!(f, "rpc error: {msg}"),
            Error::Ledger(msg) => write!(f, "ledger rejected call: {msg}"),
            Error::Metadata { account, reason } => {
                write!(f, "metadata error for account {account}: {reason}")
            }
            Error::MissingSignature { accounts } => write!(
                f,
                "no partial signature published for this hour by: {}",
                accounts.join(", ")
            ),
            Error::DraftMismatch { account, reason } => {
                write!(f, "draft published by {account} does not match: {reason}")
            }
            Error::Signing(msg) => write!(f, "signing error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
