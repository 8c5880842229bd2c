//! The Sequencer (§4.G): single-writer owner of the repo's `seq`. Modeled
//! as an actor — one task owns the persisted counter and the live
//! subscriber list exclusively; every interaction is a message over a
//! bounded channel, never a shared lock. That channel serializes `emit` and
//! `subscribe` against each other for free: a subscriber registered inside
//! `handle_subscribe` can never miss or duplicate the event from a
//! concurrently-arriving `emit`, because the two can't actually run
//! concurrently — they're the same task, processing one command at a time.

use std::sync::Arc;

use pds_core::{EventLogStore, PdsError, PdsResult, PersistedEvent};
use tokio::sync::{mpsc, oneshot};

/// How many buffered frames a subscriber may lag by before it's dropped
/// with `ConsumerTooSlow` (§4.G Backpressure).
const SUBSCRIBER_BUFFER: usize = 256;
/// How many rows `get_events_after` is asked for per replay round-trip.
const REPLAY_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub enum SequencedFrame {
    Commit(PersistedEvent),
    Error(TerminalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalError {
    OutdatedCursor,
    FutureCursor,
    ConsumerTooSlow,
}

enum Command {
    Emit {
        event_type: String,
        did: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<PdsResult<i64>>,
    },
    Subscribe {
        from_cursor: Option<i64>,
        reply: oneshot::Sender<PdsResult<mpsc::Receiver<SequencedFrame>>>,
    },
    CurrentSeq {
        reply: oneshot::Sender<i64>,
    },
}

/// Cheap, cloneable handle to a running Sequencer actor.
#[derive(Clone)]
pub struct Sequencer {
    commands: mpsc::Sender<Command>,
}

impl Sequencer {
    /// Spawn the actor, resuming `seq` from the store's persisted maximum
    /// so a restart never reassigns an already-used value (§4.L).
    pub async fn spawn<S: EventLogStore>(store: Arc<S>, seq_window: i64) -> PdsResult<Self> {
        let current_seq = store.get_max_seq().await?;
        let (tx, rx) = mpsc::channel(64);
        let actor = SequencerActor {
            store,
            current_seq,
            seq_window,
            subscribers: Vec::new(),
            commands: rx,
        };
        tokio::spawn(actor.run());
        Ok(Sequencer { commands: tx })
    }

    pub async fn emit(&self, event_type: &str, did: &str, payload: Vec<u8>) -> PdsResult<i64> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Emit {
                event_type: event_type.to_string(),
                did: did.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| PdsError::Transient("sequencer actor is gone".into()))?;
        rx.await.map_err(|_| PdsError::Transient("sequencer dropped the reply".into()))?
    }

    pub async fn subscribe(&self, from_cursor: Option<i64>) -> PdsResult<mpsc::Receiver<SequencedFrame>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { from_cursor, reply })
            .await
            .map_err(|_| PdsError::Transient("sequencer actor is gone".into()))?;
        rx.await.map_err(|_| PdsError::Transient("sequencer dropped the reply".into()))?
    }

    pub async fn current_seq(&self) -> PdsResult<i64> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::CurrentSeq { reply })
            .await
            .map_err(|_| PdsError::Transient("sequencer actor is gone".into()))?;
        rx.await.map_err(|_| PdsError::Transient("sequencer dropped the reply".into()))
    }
}

struct SequencerActor<S> {
    store: Arc<S>,
    current_seq: i64,
    seq_window: i64,
    subscribers: Vec<mpsc::Sender<SequencedFrame>>,
    commands: mpsc::Receiver<Command>,
}

impl<S: EventLogStore> SequencerActor<S> {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                Command::Emit {
                    event_type,
                    did,
                    payload,
                    reply,
                } => {
                    let result = self.handle_emit(event_type, did, payload).await;
                    let _ = reply.send(result);
                }
                Command::Subscribe { from_cursor, reply } => {
                    let result = self.handle_subscribe(from_cursor).await;
                    let _ = reply.send(result);
                }
                Command::CurrentSeq { reply } => {
                    let _ = reply.send(self.current_seq);
                }
            }
        }
    }

    async fn handle_emit(&mut self, event_type: String, did: String, payload: Vec<u8>) -> PdsResult<i64> {
        let seq = self.store.append_event(&event_type, &did, &payload).await?;
        self.current_seq = seq;
        tracing::info!(seq, did = %did, event_type = %event_type, "sequencer emit");

        let event = PersistedEvent {
            seq,
            event_type,
            did,
            payload,
        };
        self.broadcast(SequencedFrame::Commit(event)).await;

        if let Err(err) = self.store.trim(self.seq_window).await {
            tracing::warn!(%err, "sequencer retention trim failed");
        }
        Ok(seq)
    }

    async fn broadcast(&mut self, frame: SequencedFrame) {
        let mut slow = Vec::new();
        for (idx, tx) in self.subscribers.iter().enumerate() {
            if tx.try_send(frame.clone()).is_err() {
                slow.push(idx);
            }
        }
        for idx in slow.into_iter().rev() {
            let tx = self.subscribers.remove(idx);
            let _ = tx.try_send(SequencedFrame::Error(TerminalError::ConsumerTooSlow));
        }
    }

    /// Runs entirely within one command — no `emit` can interleave here, so
    /// replay-then-register never races a concurrently emitted event.
    async fn handle_subscribe(&mut self, from_cursor: Option<i64>) -> PdsResult<mpsc::Receiver<SequencedFrame>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let Some(cursor) = from_cursor else {
            self.subscribers.push(tx);
            return Ok(rx);
        };

        if cursor > self.current_seq {
            let _ = tx.try_send(SequencedFrame::Error(TerminalError::FutureCursor));
            return Ok(rx);
        }

        let min_seq = self.store.get_min_seq().await?;
        if cursor < min_seq.saturating_sub(1) {
            let _ = tx.try_send(SequencedFrame::Error(TerminalError::OutdatedCursor));
            return Ok(rx);
        }

        let mut after = cursor;
        loop {
            let batch = self.store.get_events_after(after, REPLAY_BATCH).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            for event in batch {
                after = event.seq;
                if tx.send(SequencedFrame::Commit(event)).await.is_err() {
                    // subscriber already gone; nothing left to register.
                    return Ok(rx);
                }
            }
            if batch_len < REPLAY_BATCH {
                break;
            }
        }

        self.subscribers.push(tx);
        Ok(rx)
    }
}
