//! The Merkle Search Tree itself (§4.C). `Mst` is an immutable value: every
//! mutating operation returns a new `Mst` that shares unchanged subtrees via
//! `Arc`. There is no "outdated pointer" flag anywhere in this module (§9) —
//! `root_cid()` is computed lazily and memoized in a `OnceLock` that is
//! written at most once, to the one value a given node's contents can ever
//! hash to.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use cid::Cid;
use pds_core::{BlockStore, PdsError, PdsResult};

use super::node::NodeData;
use super::util::{entries_to_node_data, layer_for_key, node_data_to_entries, validate_key};
use crate::codec;

#[derive(Clone, Debug)]
pub enum Entry {
    Leaf { key: String, value: Cid },
    Tree(Arc<Mst>),
}

#[derive(Debug)]
pub struct Mst {
    layer: i32,
    entries: Vec<Entry>,
    root_cid: OnceLock<Cid>,
}

impl Mst {
    fn new(layer: i32, entries: Vec<Entry>) -> Self {
        Mst {
            layer,
            entries,
            root_cid: OnceLock::new(),
        }
    }

    /// Canonical empty tree (§4.C `empty()`).
    pub fn empty() -> Self {
        Mst::new(0, Vec::new())
    }

    pub fn layer(&self) -> i32 {
        self.layer
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Memoized canonical CID of this node's DAG-CBOR encoding (§4.C,
    /// redesign note in §9).
    pub fn root_cid(&self) -> PdsResult<Cid> {
        if let Some(cid) = self.root_cid.get() {
            return Ok(*cid);
        }
        let data = self.to_node_data()?;
        let (cid, _bytes) = codec::cid_for(&data)?;
        let _ = self.root_cid.set(cid);
        Ok(cid)
    }

    fn to_node_data(&self) -> PdsResult<NodeData> {
        entries_to_node_data(&self.entries)
    }

    /// Load a tree from the blockstore by root CID, recursively fetching
    /// every subtree reachable from it.
    pub async fn load(store: &dyn BlockStore, cid: Cid, layer_hint: Option<i32>) -> PdsResult<Self> {
        if cid == Mst::empty().root_cid()? {
            return Ok(Mst::empty());
        }
        let bytes = store
            .get(&cid)
            .await?
            .ok_or_else(|| PdsError::NotFound(format!("MST node {cid} not found")))?;
        codec::verify_cid(&cid, &bytes)?;
        let data: NodeData = codec::decode(&bytes)?;
        Self::from_node_data(store, &data, layer_hint).await
    }

    fn from_node_data<'a>(
        store: &'a dyn BlockStore,
        data: &'a NodeData,
        layer_hint: Option<i32>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = PdsResult<Self>> + Send + 'a>> {
        Box::pin(async move {
            let child_layer = layer_hint.map(|l| (l - 1).max(0));
            let mut pending: Vec<Cid> = Vec::new();
            if let Some(left) = data.left {
                pending.push(left);
            }
            for e in &data.entries {
                if let Some(t) = e.tree {
                    pending.push(t);
                }
            }
            let mut loaded = std::collections::HashMap::new();
            for cid in pending {
                let child = Mst::load(store, cid, child_layer).await?;
                loaded.insert(cid, Arc::new(child));
            }
            let entries = node_data_to_entries(data, |cid| {
                Ok((**loaded.get(&cid).expect("prefetched above")).clone_shell())
            })?;
            let layer = layer_hint.unwrap_or_else(|| {
                entries
                    .iter()
                    .find_map(|e| match e {
                        Entry::Leaf { key, .. } => Some(layer_for_key(key)),
                        Entry::Tree(_) => None,
                    })
                    .unwrap_or(0)
            });
            Ok(Mst::new(layer, entries))
        })
    }

    /// Shallow clone used only when re-wrapping an already-loaded subtree
    /// inside a freshly built parent; shares the underlying entries and any
    /// computed `root_cid` so re-hashing never happens twice.
    fn clone_shell(&self) -> Mst {
        Mst {
            layer: self.layer,
            entries: self.entries.clone(),
            root_cid: self.root_cid.get().copied().map(OnceLock::from).unwrap_or_default(),
        }
    }

    /// Public, cheap copy of this tree's root (`Arc`-shared subtrees, shared
    /// memoized `root_cid`) — the starting point for a transform that must
    /// keep the original around for diffing (§4.E step 8).
    pub fn duplicate(&self) -> Mst {
        self.clone_shell()
    }

    pub fn get(&self, key: &str) -> Option<Cid> {
        let idx = self.find(key);
        match self.entries.get(idx) {
            Some(Entry::Leaf { key: k, value }) if k == key => Some(*value),
            _ => {
                // the entry to the left of idx, if a subtree, may contain the key
                if idx > 0 {
                    if let Some(Entry::Tree(t)) = self.entries.get(idx - 1) {
                        return t.get(key);
                    }
                }
                if let Some(Entry::Tree(t)) = self.entries.first() {
                    if idx == 0 {
                        return t.get(key);
                    }
                }
                None
            }
        }
    }

    /// Like `get`, but also returns the encoded `(cid, bytes)` of every node
    /// visited on the way down, root first — the inclusion proof `sync`
    /// endpoints attach to a single-record CAR (§4.H `getRecord`).
    pub fn get_with_proof(&self, key: &str) -> PdsResult<(Option<Cid>, Vec<(Cid, Vec<u8>)>)> {
        let mut path = Vec::new();
        let value = self.get_with_proof_into(key, &mut path)?;
        Ok((value, path))
    }

    fn get_with_proof_into(&self, key: &str, path: &mut Vec<(Cid, Vec<u8>)>) -> PdsResult<Option<Cid>> {
        let data = self.to_node_data()?;
        let bytes = codec::encode(&data)?;
        path.push((codec::cid_for_bytes(&bytes), bytes));

        let idx = self.find(key);
        match self.entries.get(idx) {
            Some(Entry::Leaf { key: k, value }) if k == key => Ok(Some(*value)),
            _ => {
                if idx > 0 {
                    if let Some(Entry::Tree(t)) = self.entries.get(idx - 1) {
                        return t.get_with_proof_into(key, path);
                    }
                }
                if let Some(Entry::Tree(t)) = self.entries.first() {
                    if idx == 0 {
                        return t.get_with_proof_into(key, path);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Index of the first leaf entry with key >= `key` (binary search over
    /// the leaves only; subtrees are skipped).
    fn find(&self, key: &str) -> usize {
        let leaves: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| matches!(e, Entry::Leaf { .. }).then_some(i))
            .collect();
        let pos = leaves.partition_point(|&i| match &self.entries[i] {
            Entry::Leaf { key: k, .. } => k.as_str() < key,
            _ => unreachable!(),
        });
        leaves.get(pos).copied().unwrap_or(self.entries.len())
    }

    pub fn add(&self, key: &str, value: Cid) -> PdsResult<Mst> {
        validate_key(key)?;
        if self.get(key).is_some() {
            return Err(PdsError::Conflict(format!("key already exists: {key}")));
        }
        self.insert(key, value)
    }

    pub fn update(&self, key: &str, value: Cid) -> PdsResult<Mst> {
        validate_key(key)?;
        if self.get(key).is_none() {
            return Err(PdsError::NotFound(format!("key not found: {key}")));
        }
        let new_self = self.delete_unchecked(key)?;
        new_self.insert(key, value)
    }

    /// §4.C Add algorithm.
    fn insert(&self, key: &str, value: Cid) -> PdsResult<Mst> {
        let key_layer = layer_for_key(key);

        if key_layer > self.layer {
            // Lift: wrap self under new layers until key_layer is reached,
            // then insert at that layer.
            let lifted = if self.is_empty() {
                Mst::new(key_layer, Vec::new())
            } else {
                Mst::new(self.layer + 1, vec![Entry::Tree(Arc::new(self.shallow_copy()))])
            };
            return lifted.insert(key, value);
        }

        if key_layer == self.layer {
            let idx = self.find(key);
            let (left, right) = self.split_around(idx, key)?;
            let mut entries = Vec::new();
            if let Some(l) = left {
                entries.push(Entry::Tree(Arc::new(l)));
            }
            entries.push(Entry::Leaf {
                key: key.to_string(),
                value,
            });
            if let Some(r) = right {
                entries.push(Entry::Tree(Arc::new(r)));
            }
            return Ok(Mst::new(self.layer, entries));
        }

        // key_layer < self.layer: recurse into the subtree immediately
        // left of the insertion point, creating an empty child if needed.
        let idx = self.find(key);
        let child_pos = if idx > 0 { idx - 1 } else { 0 };
        let mut entries = self.entries.clone();
        match entries.get(child_pos) {
            Some(Entry::Tree(child)) if idx > 0 => {
                let new_child = child.insert(key, value)?;
                entries[child_pos] = Entry::Tree(Arc::new(new_child));
            }
            _ => {
                let empty_child = Mst::new(self.layer - 1, Vec::new());
                let new_child = empty_child.insert(key, value)?;
                entries.insert(idx, Entry::Tree(Arc::new(new_child)));
            }
        }
        Ok(Mst::new(self.layer, entries))
    }

    fn shallow_copy(&self) -> Mst {
        Mst::new(self.layer, self.entries.clone())
    }

    /// Split this node's entries around `key`'s insertion index into a
    /// left subtree (entries < key) and a right subtree (entries > key),
    /// recursively splitting the subtree straddling the boundary.
    fn split_around(&self, idx: usize, key: &str) -> PdsResult<(Option<Mst>, Option<Mst>)> {
        let mut left_entries = Vec::new();
        let mut right_entries = Vec::new();

        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                Entry::Tree(t) if i == idx.saturating_sub(1) && idx > 0 && left_entries_is_boundary(self, idx) => {
                    let (l, r) = t.split_around(t.find(key), key)?;
                    if let Some(l) = l {
                        left_entries.push(Entry::Tree(Arc::new(l)));
                    }
                    if let Some(r) = r {
                        right_entries.push(Entry::Tree(Arc::new(r)));
                    }
                }
                _ if i < idx => left_entries.push(entry.clone()),
                _ => right_entries.push(entry.clone()),
            }
        }

        let left = if left_entries.is_empty() {
            None
        } else {
            Some(Mst::new(self.layer - 1, left_entries))
        };
        let right = if right_entries.is_empty() {
            None
        } else {
            Some(Mst::new(self.layer - 1, right_entries))
        };
        Ok((left, right))
    }

    pub fn delete(&self, key: &str) -> PdsResult<Mst> {
        if self.get(key).is_none() {
            return Err(PdsError::NotFound(format!("key not found: {key}")));
        }
        let deleted = self.delete_unchecked(key)?;
        Ok(deleted.trim_top())
    }

    fn delete_unchecked(&self, key: &str) -> PdsResult<Mst> {
        let idx = self.find(key);
        if let Some(Entry::Leaf { key: k, .. }) = self.entries.get(idx) {
            if k == key {
                let left = if idx > 0 {
                    self.entries.get(idx - 1).and_then(as_tree)
                } else {
                    None
                };
                let right = self.entries.get(idx + 1).and_then(as_tree);
                let entries = match (left, right) {
                    (Some(l), Some(r)) => {
                        // append-merge: siblings separated by the deleted
                        // leaf are both subtrees of the same layer, merge
                        // them into a single slot.
                        let merged = l.append_merge(r.as_ref())?;
                        let mut e = self.entries[..idx - 1].to_vec();
                        e.push(Entry::Tree(Arc::new(merged)));
                        e.extend_from_slice(&self.entries[idx + 2..]);
                        e
                    }
                    _ => {
                        let mut e = self.entries.clone();
                        e.remove(idx);
                        e
                    }
                };
                return Ok(Mst::new(self.layer, entries));
            }
        }
        // recurse into the subtree left of idx
        let child_pos = if idx > 0 { idx - 1 } else { 0 };
        if let Some(Entry::Tree(child)) = self.entries.get(child_pos) {
            let new_child = child.delete_unchecked(key)?;
            let mut entries = self.entries.clone();
            entries[child_pos] = Entry::Tree(Arc::new(new_child));
            return Ok(Mst::new(self.layer, entries));
        }
        Err(PdsError::NotFound(format!("key not found: {key}")))
    }

    /// Merge two same-layer subtrees, recursively merging the rightmost
    /// subtree of `self` with the leftmost subtree of `other` when both
    /// boundary entries are themselves subtrees (§4.C Delete).
    fn append_merge(&self, other: &Mst) -> PdsResult<Mst> {
        let mut entries = self.entries.clone();
        match (entries.last().cloned(), other.entries.first().cloned()) {
            (Some(Entry::Tree(l)), Some(Entry::Tree(r))) => {
                entries.pop();
                let merged = l.append_merge(&r)?;
                entries.push(Entry::Tree(Arc::new(merged)));
                entries.extend(other.entries.iter().skip(1).cloned());
            }
            _ => entries.extend(other.entries.iter().cloned()),
        }
        Ok(Mst::new(self.layer, entries))
    }

    /// If the tree collapsed to a single subtree entry, that subtree
    /// becomes the new root; repeat until the root has layer 0, more than
    /// one entry, or contains a leaf (§4.C invariant 5).
    fn trim_top(&self) -> Mst {
        if self.entries.len() == 1 {
            if let Entry::Tree(child) = &self.entries[0] {
                return child.trim_top();
            }
        }
        self.shallow_copy()
    }

    /// Ascending `(key, value)` pairs, optionally bounded (§4.C `list`).
    pub fn list(&self, count: usize, after: Option<&str>, before: Option<&str>) -> Vec<(String, Cid)> {
        let mut out = Vec::new();
        self.collect(after, before, &mut out);
        out.truncate(count);
        out
    }

    pub fn list_with_prefix(&self, prefix: &str, count: usize) -> Vec<(String, Cid)> {
        self.list(usize::MAX, None, None)
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .take(count)
            .collect()
    }

    fn collect(&self, after: Option<&str>, before: Option<&str>, out: &mut Vec<(String, Cid)>) {
        for entry in &self.entries {
            match entry {
                Entry::Tree(t) => t.collect(after, before, out),
                Entry::Leaf { key, value } => {
                    if after.is_some_and(|a| key.as_str() <= a) {
                        continue;
                    }
                    if before.is_some_and(|b| key.as_str() >= b) {
                        continue;
                    }
                    out.push((key.clone(), *value));
                }
            }
        }
    }

    /// All CIDs reachable from this root, including this node's own CID
    /// (§4.F export, used by CAR writing and recovery).
    pub fn collect_all_cids(&self, out: &mut HashSet<Cid>) -> PdsResult<()> {
        out.insert(self.root_cid()?);
        for entry in &self.entries {
            if let Entry::Tree(t) = entry {
                t.collect_all_cids(out)?;
            }
        }
        Ok(())
    }

    /// `unstored_blocks(store)` (§4.C): the encoded `(cid, bytes)` pairs for
    /// every node reachable from this root that `store.has` does not
    /// already contain. Pruned the moment a node is found present, since
    /// the blockstore is monotonic — a stored node's descendants must also
    /// be stored (§4.C Unstored-blocks).
    pub async fn unstored_blocks(&self, store: &dyn BlockStore) -> PdsResult<Vec<(Cid, Vec<u8>)>> {
        let mut out = Vec::new();
        self.unstored_blocks_into(store, &mut out).await?;
        Ok(out)
    }

    fn unstored_blocks_into<'a>(
        &'a self,
        store: &'a dyn BlockStore,
        out: &'a mut Vec<(Cid, Vec<u8>)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = PdsResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let cid = self.root_cid()?;
            if store.has(&cid).await? {
                return Ok(());
            }
            let data = self.to_node_data()?;
            let bytes = codec::encode(&data)?;
            out.push((cid, bytes));
            for entry in &self.entries {
                if let Entry::Tree(t) = entry {
                    t.unstored_blocks_into(store, out).await?;
                }
            }
            Ok(())
        })
    }
}

fn as_tree(e: &Entry) -> Option<Arc<Mst>> {
    match e {
        Entry::Tree(t) => Some(t.clone()),
        Entry::Leaf { .. } => None,
    }
}

/// Helper for `split_around`: true when `idx`'s preceding entry is the
/// subtree straddling the split boundary rather than a leaf already
/// accounted for on the left side.
fn left_entries_is_boundary(node: &Mst, idx: usize) -> bool {
    idx > 0 && matches!(node.entries.get(idx - 1), Some(Entry::Tree(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cid_for_bytes;

    fn cid_for_str(s: &str) -> Cid {
        cid_for_bytes(s.as_bytes())
    }

    #[test]
    fn empty_tree_has_stable_root() {
        let a = Mst::empty();
        let b = Mst::empty();
        assert_eq!(a.root_cid().unwrap(), b.root_cid().unwrap());
    }

    #[test]
    fn add_then_get_round_trips() {
        let mst = Mst::empty();
        let v = cid_for_str("value-1");
        let mst = mst.add("app.bsky.feed.post/a", v).unwrap();
        assert_eq!(mst.get("app.bsky.feed.post/a"), Some(v));
        assert_eq!(mst.get("app.bsky.feed.post/b"), None);
    }

    #[test]
    fn add_duplicate_key_conflicts() {
        let mst = Mst::empty()
            .add("app.bsky.feed.post/a", cid_for_str("v1"))
            .unwrap();
        let err = mst.add("app.bsky.feed.post/a", cid_for_str("v2")).unwrap_err();
        assert!(matches!(err, PdsError::Conflict(_)));
    }

    #[test]
    fn delete_missing_key_not_found() {
        let mst = Mst::empty();
        assert!(matches!(
            mst.delete("app.bsky.feed.post/a").unwrap_err(),
            PdsError::NotFound(_)
        ));
    }

    #[test]
    fn delete_then_readd_restores_root() {
        let v = cid_for_str("v1");
        let base = Mst::empty().add("a/1", cid_for_str("x")).unwrap();
        let with_key = base.add("a/2", v).unwrap();
        let r1 = with_key.root_cid().unwrap();
        let removed = with_key.delete("a/2").unwrap();
        let readded = removed.add("a/2", v).unwrap();
        assert_eq!(readded.root_cid().unwrap(), r1);
    }

    #[test]
    fn insertion_order_independence() {
        let keys: Vec<(String, Cid)> = (0..200)
            .map(|i| (format!("app.bsky.feed.post/{i:04}"), cid_for_str(&format!("val{i}"))))
            .collect();

        let mut forward = Mst::empty();
        for (k, v) in &keys {
            forward = forward.add(k, *v).unwrap();
        }

        let mut reversed = Mst::empty();
        for (k, v) in keys.iter().rev() {
            reversed = reversed.add(k, *v).unwrap();
        }

        assert_eq!(forward.root_cid().unwrap(), reversed.root_cid().unwrap());
    }

    #[test]
    fn list_is_ascending() {
        let mut mst = Mst::empty();
        for i in [3, 1, 2] {
            mst = mst.add(&format!("a/{i}"), cid_for_str(&format!("v{i}"))).unwrap();
        }
        let listed = mst.list(10, None, None);
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2", "a/3"]);
    }

    #[test]
    fn rejects_invalid_keys() {
        let mst = Mst::empty();
        assert!(mst.add("no-slash-here", cid_for_str("v")).is_err());
    }

    #[test]
    fn get_with_proof_includes_root_and_value() {
        let mst = Mst::empty()
            .add("app.bsky.feed.post/a", cid_for_str("v1"))
            .unwrap()
            .add("app.bsky.feed.post/b", cid_for_str("v2"))
            .unwrap();
        let (value, path) = mst.get_with_proof("app.bsky.feed.post/a").unwrap();
        assert_eq!(value, Some(cid_for_str("v1")));
        assert_eq!(path[0].0, mst.root_cid().unwrap());
    }

    #[test]
    fn get_with_proof_missing_key_returns_none() {
        let mst = Mst::empty().add("a/1", cid_for_str("v")).unwrap();
        let (value, _path) = mst.get_with_proof("a/2").unwrap();
        assert_eq!(value, None);
    }
}
