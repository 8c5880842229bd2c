//! Block codec & CID (§4.A). DAG-CBOR encode/decode plus CID computation.
//! `serde_ipld_dagcbor` already produces the canonical map-key ordering and
//! integer encoding the format requires; this module only adds the CID
//! wrapper and `verify_cid`, the debug-mode round-trip check blockstores
//! call from `put` (§4.B).

use cid::Cid;
use multihash::Multihash;
use pds_core::{PdsError, PdsResult};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

/// DAG-CBOR multicodec code.
pub const DAG_CBOR: u64 = 0x71;
/// sha2-256 multihash code.
pub const SHA2_256: u64 = 0x12;

pub fn encode<T: Serialize>(value: &T) -> PdsResult<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| PdsError::IntegrityError(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> PdsResult<T> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| PdsError::IntegrityError(e.to_string()))
}

/// `CIDv1(code=dag-cbor, multihash=sha256(bytes))`, per §3/§6.
pub fn cid_for_bytes(bytes: &[u8]) -> Cid {
    let digest = Sha256::digest(bytes);
    let mh = Multihash::<64>::wrap(SHA2_256, &digest).expect("sha-256 digest fits a 64-byte multihash");
    Cid::new_v1(DAG_CBOR, mh)
}

pub fn cid_for<T: Serialize>(value: &T) -> PdsResult<(Cid, Vec<u8>)> {
    let bytes = encode(value)?;
    Ok((cid_for_bytes(&bytes), bytes))
}

/// Re-hash `bytes` and compare against `cid`. Used on CAR import (§4.F) and
/// called from every `BlockStore::put` under `cfg(debug_assertions)` (§4.B).
pub fn verify_cid(cid: &Cid, bytes: &[u8]) -> PdsResult<()> {
    let expected = cid_for_bytes(bytes);
    if &expected != cid {
        return Err(PdsError::IntegrityError(format!(
            "CID mismatch: expected {expected}, got {cid}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_value() {
        let value = json!({"b": 2, "a": 1});
        let bytes = encode(&value).unwrap();
        let decoded: serde_json::Value = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn cid_for_same_bytes_is_stable() {
        let bytes = b"deterministic payload";
        assert_eq!(cid_for_bytes(bytes), cid_for_bytes(bytes));
    }

    #[test]
    fn verify_cid_rejects_tampered_bytes() {
        let (cid, bytes) = cid_for(&json!({"x": 1})).unwrap();
        let mut tampered = bytes.clone();
        tampered.push(0xff);
        assert!(verify_cid(&cid, &tampered).is_err());
        assert!(verify_cid(&cid, &bytes).is_ok());
    }
}
