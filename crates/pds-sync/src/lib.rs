pub mod events;
pub mod sequencer;
pub mod wire;

pub use events::{CommitPayload, ErrorPayload, InfoPayload, PendingCommit};
pub use sequencer::{SequencedFrame, Sequencer, TerminalError};
