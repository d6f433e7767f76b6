//! Chain id, WIF private keys and canonical compact signatures.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// WIF version byte for secp256k1 private keys.
const WIF_VERSION: u8 = 0x80;
/// Header offset for compressed-key compact signatures (27 + 4).
const COMPACT_HEADER_BASE: i32 = 31;
/// Nonce retries before giving up on a canonical signature.
const MAX_SIGN_ATTEMPTS: u32 = 64;

/// 32-byte chain id mixed into every signing digest. Default is Steem mainnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ChainId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| crate::Error::Config(format!("invalid chain id hex: {e}")))?;
        let id: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            crate::Error::Config(format!("chain id must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(id))
    }
}

/// secp256k1 signing key decoded from WIF.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    pub fn from_wif(wif: &str) -> Result<Self, crate::Error> {
        let raw = bs58::decode(wif.trim())
            .into_vec()
            .map_err(|e| crate::Error::Signing(format!("invalid WIF base58: {e}")))?;
        if raw.len() != 37 || raw[0] != WIF_VERSION {
            return Err(crate::Error::Signing("invalid WIF key layout".into()));
        }
        let (payload, checksum) = raw.split_at(33);
        if checksum != &double_sha256(payload)[..4] {
            return Err(crate::Error::Signing("WIF checksum mismatch".into()));
        }
        SecretKey::from_slice(&payload[1..])
            .map(Self)
            .map_err(|e| crate::Error::Signing(format!("invalid secret key: {e}")))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, crate::Error> {
        SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| crate::Error::Signing(format!("invalid secret key: {e}")))
    }

    pub fn to_wif(&self) -> String {
        let mut payload = Vec::with_capacity(37);
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.0.secret_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload).into_string()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::signing_only(), &self.0)
    }

    /// Sign a 32-byte digest, retrying nonces until the ledger's canonical form holds.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<CompactSignature, crate::Error> {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(*digest);
        for attempt in 0..MAX_SIGN_ATTEMPTS {
            let sig = if attempt == 0 {
                secp.sign_ecdsa_recoverable(&msg, &self.0)
            } else {
                let mut hasher = Sha256::new();
                hasher.update(digest);
                hasher.update(attempt.to_le_bytes());
                let nonce: [u8; 32] = hasher.finalize().into();
                secp.sign_ecdsa_recoverable_with_noncedata(&msg, &self.0, &nonce)
            };
            let compact = CompactSignature::from_recoverable(&sig)?;
            if compact.is_canonical() {
                return Ok(compact);
            }
        }
        Err(crate::Error::Signing(format!(
            "no canonical signature after {MAX_SIGN_ATTEMPTS} attempts"
        )))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

/// 65-byte compact recoverable signature: header byte, then r and s.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CompactSignature([u8; 65]);

impl CompactSignature {
    fn from_recoverable(sig: &RecoverableSignature) -> Result<Self, crate::Error> {
        let (rec_id, rs) = sig.serialize_compact();
        let header = u8::try_from(rec_id.to_i32() + COMPACT_HEADER_BASE)
            .map_err(|_| crate::Error::Signing("recovery id out of range".into()))?;
        let mut out = [0u8; 65];
        out[0] = header;
        out[1..].copy_from_slice(&rs);
        Ok(Self(out))
    }

    /// Graphene canonical form: neither r nor s may carry a sign bit or a
    /// superfluous leading zero byte.
    pub fn is_canonical(&self) -> bool {
        let c = &self.0;
        c[1] & 0x80 == 0
            && !(c[1] == 0 && c[2] & 0x80 == 0)
            && c[33] & 0x80 == 0
            && !(c[33] == 0 && c[34] & 0x80 == 0)
    }

    /// Recover the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey, crate::Error> {
        let rec_id = RecoveryId::from_i32(i32::from(self.0[0]) - COMPACT_HEADER_BASE)
            .map_err(|e| crate::Error::Signing(format!("invalid recovery id: {e}")))?;
        let sig = RecoverableSignature::from_compact(&self.0[1..], rec_id)
            .map_err(|e| crate::Error::Signing(format!("invalid signature: {e}")))?;
        Secp256k1::verification_only()
            .recover_ecdsa(&Message::from_digest(*digest), &sig)
            .map_err(|e| crate::Error::Signing(format!("recovery failed: {e}")))
    }
}

impl fmt::Display for CompactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CompactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactSignature({self})")
    }
}

impl FromStr for CompactSignature {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| crate::Error::Signing(format!("invalid signature hex: {e}")))?;
        let sig: [u8; 65] = bytes.try_into().map_err(|b: Vec<u8>| {
            crate::Error::Signing(format!("signature must be 65 bytes, got {}", b.len()))
        })?;
        Ok(Self(sig))
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> PrivateKey {
        PrivateKey::from_bytes(&[n; 32]).unwrap()
    }

    #[test]
    fn test_wif_roundtrip() {
        let k = key(7);
        let wif = k.to_wif();
        assert!(wif.starts_with('5'));
        let back = PrivateKey::from_wif(&wif).unwrap();
        assert_eq!(back.public_key(), k.public_key());
    }

    #[test]
    fn test_wif_known_vector() {
        // Secret key 0x00..01
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let k = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(
            k.to_wif(),
            "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf"
        );
    }

    #[test]
    fn test_wif_bad_checksum_rejected() {
        let mut wif = key(7).to_wif().into_bytes();
        let last = wif.len() - 1;
        wif[last] = if wif[last] == b'a' { b'b' } else { b'a' };
        let wif = String::from_utf8(wif).unwrap();
        assert!(PrivateKey::from_wif(&wif).is_err());
    }

    #[test]
    fn test_wif_garbage_rejected() {
        assert!(PrivateKey::from_wif("not-a-key").is_err());
        assert!(PrivateKey::from_wif("").is_err());
    }

    #[test]
    fn test_signatures_are_canonical_and_recover() {
        let k = key(9);
        for i in 0..16u8 {
            let digest: [u8; 32] = Sha256::digest([i]).into();
            let sig = k.sign_digest(&digest).unwrap();
            assert!(sig.is_canonical());
            assert!(sig.0[0] >= 31 && sig.0[0] <= 34);
            assert_eq!(sig.recover(&digest).unwrap(), k.public_key());
        }
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let digest = [3u8; 32];
        let sig = key(4).sign_digest(&digest).unwrap();
        let text = sig.to_string();
        assert_eq!(text.len(), 130);
        let back: CompactSignature = text.parse().unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_signature_wrong_length_rejected() {
        assert!("abcd".parse::<CompactSignature>().is_err());
        assert!("zz".parse::<CompactSignature>().is_err());
    }

    #[test]
    fn test_non_canonical_detected() {
        let mut raw = [0u8; 65];
        raw[0] = 31;
        raw[1] = 0x80;
        raw[33] = 0x01;
        assert!(!CompactSignature(raw).is_canonical());
        raw[1] = 0x00;
        raw[2] = 0x01;
        assert!(!CompactSignature(raw).is_canonical());
        raw[2] = 0x80;
        assert!(CompactSignature(raw).is_canonical());
    }

    #[test]
    fn test_chain_id_parse() {
        let zero: ChainId = "00".repeat(32).parse().unwrap();
        assert_eq!(zero, ChainId::default());
        assert!("00".parse::<ChainId>().is_err());
        assert!("xyz".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let k = key(5);
        let debug = format!("{k:?}");
        assert!(!debug.contains(&k.to_wif()));
        assert!(!debug.contains(&hex::encode([5u8; 32])));
    }
}
