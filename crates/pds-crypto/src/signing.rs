use ed25519_dalek::Signer as Ed25519Signer;
use k256::ecdsa::signature::Signer as Secp256k1Signer;
use pds_core::{PdsError, PdsResult};
use rand::rngs::OsRng;

/// Multicodec prefix for an Ed25519 public key (varint `0xed01`).
const MULTICODEC_ED25519_PUB: [u8; 2] = [0xed, 0x01];
/// Multicodec prefix for a secp256k1 public key (varint `0xe701`).
const MULTICODEC_SECP256K1_PUB: [u8; 2] = [0xe7, 0x01];

/// Owns the repo signing key. Private-key bytes never leave this type
/// except through `to_bytes`, used only for persisting to config at
/// provisioning time (§9 Signing keys).
#[derive(Debug)]
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

impl SigningKey {
    pub fn generate_ed25519() -> Self {
        SigningKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    pub fn generate_secp256k1() -> Self {
        SigningKey::Secp256k1(k256::ecdsa::SigningKey::random(&mut OsRng))
    }

    /// `did:key` string advertising exactly this key's algorithm, per §9's
    /// resolved ambiguity: a repo settles on one signing algorithm.
    pub fn did_key(&self) -> String {
        let (prefix, pubkey): (&[u8], Vec<u8>) = match self {
            SigningKey::Ed25519(kp) => (&MULTICODEC_ED25519_PUB, kp.verifying_key().to_bytes().to_vec()),
            SigningKey::Secp256k1(kp) => (
                &MULTICODEC_SECP256K1_PUB,
                kp.verifying_key().to_encoded_point(true).as_bytes().to_vec(),
            ),
        };
        let mut multicodec_bytes = Vec::with_capacity(prefix.len() + pubkey.len());
        multicodec_bytes.extend_from_slice(prefix);
        multicodec_bytes.extend_from_slice(&pubkey);
        format!("did:key:{}", multibase::encode(multibase::Base::Base58Btc, multicodec_bytes))
    }

    /// Sign a message. Returns a fixed-size (64-byte) signature for both
    /// algorithms: raw Ed25519 signature bytes, or low-S-normalized
    /// compact-encoded ECDSA for secp256k1.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(kp) => kp.sign(msg).to_bytes().to_vec(),
            SigningKey::Secp256k1(kp) => {
                let sig: k256::ecdsa::Signature = kp.sign(msg);
                sig.normalize_s().unwrap_or(sig).to_bytes().to_vec()
            }
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(kp) => kp.verifying_key().to_bytes().to_vec(),
            SigningKey::Secp256k1(kp) => kp.verifying_key().to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Export the private key as raw scalar bytes (32 bytes for both
    /// algorithms).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(kp) => kp.to_bytes().to_vec(),
            SigningKey::Secp256k1(kp) => kp.to_bytes().to_vec(),
        }
    }

    /// Import a signing key from raw scalar bytes. `algorithm` must be
    /// `"ed25519"` or `"secp256k1"`, matching `SIGNING_ALGORITHM` (§6).
    pub fn from_bytes(algorithm: &str, bytes: &[u8]) -> PdsResult<Self> {
        match algorithm {
            "ed25519" => {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| PdsError::Crypto("ed25519 key must be 32 bytes".into()))?;
                Ok(SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&arr)))
            }
            "secp256k1" => {
                let kp = k256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| PdsError::Crypto(e.to_string()))?;
                Ok(SigningKey::Secp256k1(kp))
            }
            other => Err(PdsError::Crypto(format!("unknown signing algorithm: {other}"))),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            SigningKey::Ed25519(_) => "ed25519",
            SigningKey::Secp256k1(_) => "secp256k1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_did_key_has_expected_prefix() {
        let key = SigningKey::generate_ed25519();
        assert!(key.did_key().starts_with("did:key:z"));
    }

    #[test]
    fn secp256k1_did_key_has_expected_prefix() {
        let key = SigningKey::generate_secp256k1();
        assert!(key.did_key().starts_with("did:key:z"));
    }

    #[test]
    fn ed25519_sign_produces_64_byte_signature() {
        let key = SigningKey::generate_ed25519();
        let sig = key.sign(b"hello atproto");
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn ed25519_roundtrip_via_bytes() {
        let key = SigningKey::generate_ed25519();
        let bytes = key.to_bytes();
        let restored = SigningKey::from_bytes("ed25519", &bytes).unwrap();
        assert_eq!(key.did_key(), restored.did_key());
    }

    #[test]
    fn secp256k1_roundtrip_via_bytes() {
        let key = SigningKey::generate_secp256k1();
        let bytes = key.to_bytes();
        let restored = SigningKey::from_bytes("secp256k1", &bytes).unwrap();
        assert_eq!(key.did_key(), restored.did_key());
    }

    #[test]
    fn algorithm_names_match_config_keys() {
        assert_eq!(SigningKey::generate_ed25519().algorithm(), "ed25519");
        assert_eq!(SigningKey::generate_secp256k1().algorithm(), "secp256k1");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = SigningKey::from_bytes("rot13", &[0u8; 32]).unwrap_err();
        assert!(matches!(err, PdsError::Crypto(_)));
    }
}
