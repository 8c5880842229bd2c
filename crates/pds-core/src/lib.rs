pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PdsConfig;
pub use error::{PdsError, PdsResult};
pub use traits::{BlockStore, EventLogStore, PersistedEvent, RecordRow, RecordStore, RepoRootStore};
pub use types::{CommitResult, RepoOp, RepoOpAction, RepoRoot, WriteOp};
