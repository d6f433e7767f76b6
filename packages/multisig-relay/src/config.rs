//! Relay configuration.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

use crate::protocol::TransferTemplate;
use crate::rotation::Rotation;
use crate::steem::{Asset, ChainId, PrivateKey};

/// A configuration value that must never reach the logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Configuration for one rotation member.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// This node's account.
    pub account: String,

    /// Rotation order. Space-delimited string or a list.
    #[serde(deserialize_with = "accounts_list")]
    pub accounts: Vec<String>,

    pub active_key: Secret,
    pub posting_key: Secret,

    pub transfer_from: String,
    pub send_to: String,

    /// Decimal amount, e.g. `1.000`.
    #[serde(alias = "amount_sbd")]
    pub amount: String,

    #[serde(default = "defaults::asset_symbol")]
    pub asset_symbol: String,

    #[serde(default)]
    pub memo: String,

    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,

    #[serde(default = "defaults::rpc_url")]
    pub fallback_rpc_url: String,

    /// Hex chain id. Empty means the Steem mainnet id.
    #[serde(default)]
    pub chain_id: String,

    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minutes into the hour the finalizer waits before collecting.
    #[serde(default = "defaults::finalize_grace_minutes")]
    pub finalize_grace_minutes: u8,

    #[serde(default = "defaults::relay_field")]
    pub relay_field: String,

    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    #[serde(default = "defaults::rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

mod defaults {
    pub fn asset_symbol() -> String {
        "SBD".into()
    }

    pub fn rpc_url() -> String {
        "https://api.steemit.com".into()
    }

    pub fn poll_interval_secs() -> u64 {
        5
    }

    pub fn finalize_grace_minutes() -> u8 {
        4
    }

    pub fn relay_field() -> String {
        "mtx".into()
    }

    pub fn bind_address() -> String {
        "127.0.0.1:3050".into()
    }

    pub fn rpc_timeout_secs() -> u64 {
        10
    }
}

fn accounts_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Accounts {
        Delimited(String),
        List(Vec<String>),
    }

    Ok(match Accounts::deserialize(deserializer)? {
        Accounts::Delimited(s) => s.split_whitespace().map(str::to_string).collect(),
        Accounts::List(list) => list,
    })
}

impl Config {
    /// Load from `multisig-relay.toml` (optional) and `MULTISIG_*` env vars.
    pub fn load() -> Result<Self, crate::Error> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("multisig-relay").required(false))
                .add_source(config::Environment::with_prefix("MULTISIG")),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, crate::Error> {
        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every derived value up front so the daemon fails at startup.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let rotation = self.rotation()?;
        if rotation.position(&self.account).is_none() {
            return Err(crate::Error::Config(format!(
                "account {} is not in accounts [{}]",
                self.account,
                rotation.members().join(", ")
            )));
        }
        self.active_key()?;
        self.posting_key()?;
        self.transfer()?;
        self.chain_id()?;
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::Config("poll_interval_secs must be positive".into()));
        }
        if self.finalize_grace_minutes >= 60 {
            return Err(crate::Error::Config(format!(
                "finalize_grace_minutes must be below 60, got {}",
                self.finalize_grace_minutes
            )));
        }
        if self.relay_field.trim().is_empty() {
            return Err(crate::Error::Config("relay_field must not be empty".into()));
        }
        Ok(())
    }

    pub fn rotation(&self) -> Result<Rotation, crate::Error> {
        Rotation::new(self.accounts.clone())
    }

    pub fn transfer(&self) -> Result<TransferTemplate, crate::Error> {
        Ok(TransferTemplate {
            from: self.transfer_from.clone(),
            to: self.send_to.clone(),
            amount: Asset::parse(&self.amount, &self.asset_symbol)?,
            memo: self.memo.clone(),
        })
    }

    pub fn active_key(&self) -> Result<PrivateKey, crate::Error> {
        PrivateKey::from_wif(self.active_key.expose())
            .map_err(|e| crate::Error::Config(format!("active_key: {e}")))
    }

    pub fn posting_key(&self) -> Result<PrivateKey, crate::Error> {
        PrivateKey::from_wif(self.posting_key.expose())
            .map_err(|e| crate::Error::Config(format!("posting_key: {e}")))
    }

    pub fn chain_id(&self) -> Result<ChainId, crate::Error> {
        if self.chain_id.trim().is_empty() {
            return Ok(ChainId::default());
        }
        self.chain_id.parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
