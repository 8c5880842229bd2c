pub mod car;
pub mod codec;
pub mod commit;
pub mod diff;
pub mod mst;

pub use commit::{Commit, CommitEngine, WriteOutcome};
pub use mst::Mst;
