//! Op-diff computation between two MST roots (§4.E step 8). Walks both trees
//! in ascending key order and classifies each key as `create`, `update`, or
//! `delete` depending on which side it appears on and whether its value CID
//! changed.

use std::collections::BTreeMap;

use cid::Cid;
use pds_core::{PdsResult, RepoOp, RepoOpAction};

use crate::mst::Mst;

pub fn diff_ops(old: &Mst, new: &Mst) -> PdsResult<Vec<RepoOp>> {
    let old_entries: BTreeMap<String, Cid> = old.list(usize::MAX, None, None).into_iter().collect();
    let new_entries: BTreeMap<String, Cid> = new.list(usize::MAX, None, None).into_iter().collect();

    let mut ops = Vec::new();
    for (path, cid) in &new_entries {
        match old_entries.get(path) {
            None => ops.push(RepoOp {
                action: RepoOpAction::Create,
                path: path.clone(),
                cid: Some(cid.to_string()),
            }),
            Some(old_cid) if old_cid != cid => ops.push(RepoOp {
                action: RepoOpAction::Update,
                path: path.clone(),
                cid: Some(cid.to_string()),
            }),
            _ => {}
        }
    }
    for path in old_entries.keys() {
        if !new_entries.contains_key(path) {
            ops.push(RepoOp {
                action: RepoOpAction::Delete,
                path: path.clone(),
                cid: None,
            });
        }
    }
    ops.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cid_for_bytes;

    fn v(s: &str) -> Cid {
        cid_for_bytes(s.as_bytes())
    }

    #[test]
    fn diff_detects_create_update_delete() {
        let old = Mst::empty()
            .add("app.bsky.feed.post/a", v("a1"))
            .unwrap()
            .add("app.bsky.feed.post/b", v("b1"))
            .unwrap();

        let new = old
            .update("app.bsky.feed.post/a", v("a2"))
            .unwrap()
            .delete("app.bsky.feed.post/b")
            .unwrap()
            .add("app.bsky.feed.post/c", v("c1"))
            .unwrap();

        let ops = diff_ops(&old, &new).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().any(|o| o.path == "app.bsky.feed.post/a" && o.action == RepoOpAction::Update));
        assert!(ops.iter().any(|o| o.path == "app.bsky.feed.post/b" && o.action == RepoOpAction::Delete));
        assert!(ops.iter().any(|o| o.path == "app.bsky.feed.post/c" && o.action == RepoOpAction::Create));
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let mst = Mst::empty().add("a/1", v("x")).unwrap();
        assert!(diff_ops(&mst, &mst).unwrap().is_empty());
    }
}
