//! MST wire format (§3, §4.C): the DAG-CBOR shape written to the blockstore.
//! The in-memory tree (`super::tree::Mst`) is a different, owned
//! representation — conversion lives in `super::util`.

use cid::Cid;
use serde_bytes::ByteBuf;

/// One entry of a stored node: a prefix-compressed leaf key, its value CID,
/// and the optional subtree immediately to its right.
///
/// Field order is alphabetical (`k`, `p`, `t`, `v`) to match canonical
/// DAG-CBOR map-key ordering, and `tree` serializes as explicit `null` when
/// absent rather than being omitted — both are required for cross-repo
/// determinism (§4.A).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeEntry {
    #[serde(rename = "k")]
    pub key_suffix: ByteBuf,
    #[serde(rename = "p")]
    pub prefix_len: u8,
    #[serde(rename = "t")]
    pub tree: Option<Cid>,
    #[serde(rename = "v")]
    pub value: Cid,
}

/// The stored node shape: `{ l: CID?, e: [TreeEntry] }` (§3).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeData {
    #[serde(rename = "l")]
    pub left: Option<Cid>,
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,
}
