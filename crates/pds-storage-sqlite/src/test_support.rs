use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// In-memory sqlite pool with migrations applied, for use by every store's
/// unit tests in this crate.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.expect("connect in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("run migrations");
    pool
}

/// `CIDv1(dag-cbor, sha-256(bytes))`, duplicated from `pds_repo::codec`
/// rather than pulled in as a dependency — this crate sits below `pds-repo`
/// in the workspace and only needs CIDs to exercise its own store tests.
pub fn cid_for(bytes: &[u8]) -> Cid {
    let digest = Sha256::digest(bytes);
    let mh = Multihash::<64>::wrap(0x12, &digest).expect("sha-256 digest fits a 64-byte multihash");
    Cid::new_v1(0x71, mh)
}
