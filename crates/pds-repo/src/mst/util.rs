//! MST helper functions: layer computation, key validation, and the
//! flat-entries <-> wire-format conversion (§4.C Serialize/Unstored-blocks).

use cid::Cid;
use serde_bytes::ByteBuf;
use sha2::{Digest, Sha256};

use pds_core::{PdsError, PdsResult};

use super::node::{NodeData, TreeEntry};
use super::tree::Entry;

/// `floor(leading_zero_bits(sha256(key)) / 2)` — fanout ≈ 4 (§3).
pub fn layer_for_key(key: &str) -> i32 {
    let hash = Sha256::digest(key.as_bytes());
    (leading_zero_bits(&hash) / 2) as i32
}

fn leading_zero_bits(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Non-empty, ≤ 256 bytes, no control characters, exactly one `/` (§4.C).
pub fn validate_key(key: &str) -> PdsResult<()> {
    if key.is_empty() {
        return Err(PdsError::InvalidInput("MST key must not be empty".into()));
    }
    if key.len() > 256 {
        return Err(PdsError::InvalidInput(format!(
            "MST key exceeds 256 bytes: {} bytes",
            key.len()
        )));
    }
    if key.chars().filter(|c| *c == '/').count() != 1 {
        return Err(PdsError::InvalidInput(format!(
            "MST key must contain exactly one '/': {key}"
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-' | '/'))
    {
        return Err(PdsError::InvalidInput(format!(
            "MST key contains invalid characters: {key}"
        )));
    }
    Ok(())
}

pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

/// Prefix-compress a node's flat entries into the wire `NodeData` shape
/// (§4.C Serialize). A leading `Entry::Tree` becomes the node's `left`
/// pointer; each `Entry::Tree` following a leaf becomes that leaf's `t`.
pub fn entries_to_node_data(entries: &[Entry]) -> PdsResult<NodeData> {
    let mut i = 0;
    let left = if let Some(Entry::Tree(child)) = entries.first() {
        i = 1;
        Some(child.root_cid()?)
    } else {
        None
    };
    let mut out = NodeData {
        left,
        entries: Vec::new(),
    };
    let mut last_key = String::new();
    while i < entries.len() {
        match &entries[i] {
            Entry::Leaf { key, value } => {
                let prefix_len = common_prefix_len(&last_key, key);
                let suffix = &key.as_bytes()[prefix_len..];
                let tree = if let Some(Entry::Tree(child)) = entries.get(i + 1) {
                    i += 1;
                    Some(child.root_cid()?)
                } else {
                    None
                };
                out.entries.push(TreeEntry {
                    key_suffix: ByteBuf::from(suffix.to_vec()),
                    prefix_len: u8::try_from(prefix_len).map_err(|_| {
                        PdsError::IntegrityError(format!("prefix length {prefix_len} exceeds u8"))
                    })?,
                    tree,
                    value: *value,
                });
                last_key = key.clone();
                i += 1;
            }
            Entry::Tree(_) => {
                return Err(PdsError::IntegrityError(
                    "adjacent subtrees in flat MST entries".into(),
                ));
            }
        }
    }
    Ok(out)
}

/// Reverse of `entries_to_node_data`: reconstructs full keys from
/// prefix-compressed suffixes and loads referenced subtrees lazily through
/// `load_child`.
pub fn node_data_to_entries(
    data: &NodeData,
    mut load_child: impl FnMut(Cid) -> PdsResult<super::tree::Mst>,
) -> PdsResult<Vec<Entry>> {
    let mut entries = Vec::new();
    if let Some(left) = data.left {
        entries.push(Entry::Tree(std::sync::Arc::new(load_child(left)?)));
    }
    let mut last_key = String::new();
    for e in &data.entries {
        let suffix = std::str::from_utf8(&e.key_suffix)
            .map_err(|err| PdsError::IntegrityError(format!("invalid UTF-8 key suffix: {err}")))?;
        let prefix_len = e.prefix_len as usize;
        if prefix_len > last_key.len() {
            return Err(PdsError::IntegrityError(format!(
                "prefix length {prefix_len} exceeds previous key length {}",
                last_key.len()
            )));
        }
        let full_key = format!("{}{}", &last_key[..prefix_len], suffix);
        entries.push(Entry::Leaf {
            key: full_key.clone(),
            value: e.value,
        });
        last_key = full_key;
        if let Some(tree_cid) = e.tree {
            entries.push(Entry::Tree(std::sync::Arc::new(load_child(tree_cid)?)));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_accepts_collection_slash_rkey() {
        assert!(validate_key("app.bsky.feed.post/3abc").is_ok());
    }

    #[test]
    fn validate_key_rejects_missing_slash() {
        assert!(validate_key("app.bsky.feed.post").is_err());
    }

    #[test]
    fn validate_key_rejects_oversize() {
        let key = format!("{}/rkey", "a".repeat(300));
        assert!(validate_key(&key).is_err());
    }

    #[test]
    fn common_prefix_len_matches_shared_bytes() {
        assert_eq!(common_prefix_len("hello", "help"), 3);
        assert_eq!(common_prefix_len("abc", "xyz"), 0);
    }

    #[test]
    fn layer_for_key_is_deterministic() {
        assert_eq!(
            layer_for_key("app.bsky.feed.post/a"),
            layer_for_key("app.bsky.feed.post/a")
        );
    }
}
