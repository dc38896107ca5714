//! The per-job, multi-subscriber, replayable event stream.
//!
//! Generalizes the one-shot `ProgressReporter::emit_progress` pattern into a
//! bus that can replay missed events after a reconnect. Each job gets a
//! single `Journal`: a bounded ring buffer guarded by a mutex, plus a
//! broadcast channel subscribers drain for events appended after they
//! attached. Appenders never block on slow subscribers — a subscriber that
//! falls behind the ring buffer is dropped with a synthetic `overflow` event.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::StreamExt;

use crate::domain::models::{EventType, JobId, SearchEvent};

struct JournalState {
    buffer: VecDeque<SearchEvent>,
    capacity: usize,
    next_seq: u64,
    terminal: bool,
    sender: broadcast::Sender<SearchEvent>,
}

impl JournalState {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 1,
            terminal: false,
            sender,
        }
    }

    fn push(&mut self, event: SearchEvent) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event.clone());
        // A lagging subscriber simply misses this broadcast send; it will
        // still see the event via replay if it resubscribes with last_seq.
        let _ = self.sender.send(event);
    }
}

/// One job's append-only event log.
pub struct Journal {
    state: Mutex<JournalState>,
}

impl Journal {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(JournalState::new(capacity)),
        }
    }

    /// Appends an event, assigning the next sequence number. Returns `None`
    /// if the journal is already terminal (the caller's event is dropped).
    pub async fn append(
        &self,
        job_id: &JobId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.terminal {
            return None;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        if event_type.is_terminal() {
            state.terminal = true;
        }
        let event = SearchEvent {
            job_id: job_id.clone(),
            seq,
            event_type,
            data,
            at: Utc::now(),
        };
        state.push(event);
        Some(seq)
    }

    pub async fn is_terminal(&self) -> bool {
        self.state.lock().await.terminal
    }

    /// Replays buffered events with `seq > last_seq`, then returns a live
    /// stream of subsequent events. If the journal is already terminal,
    /// the live stream yields nothing further.
    pub async fn subscribe(&self, last_seq: Option<u64>) -> Vec<SearchEvent> {
        let state = self.state.lock().await;
        let last_seq = last_seq.unwrap_or(0);
        state
            .buffer
            .iter()
            .filter(|e| e.seq > last_seq)
            .cloned()
            .collect()
    }

    /// Snapshots the replay buffer and subscribes to the live broadcast
    /// channel under a single lock acquisition, so no event appended between
    /// the two steps can fall into the gap and be missed by this subscriber.
    async fn snapshot_and_subscribe(
        &self,
        last_seq: Option<u64>,
    ) -> (Vec<SearchEvent>, broadcast::Receiver<SearchEvent>) {
        let state = self.state.lock().await;
        let last_seq = last_seq.unwrap_or(0);
        let replay = state
            .buffer
            .iter()
            .filter(|e| e.seq > last_seq)
            .cloned()
            .collect();
        (replay, state.sender.subscribe())
    }
}

/// Registry of one `Journal` per job, keyed by `JobId`.
#[derive(Clone)]
pub struct EventBus {
    journals: Arc<DashMap<JobId, Arc<Journal>>>,
    default_capacity: usize,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            journals: Arc::new(DashMap::new()),
            default_capacity,
        }
    }

    /// Idempotent: returns the existing journal if one already exists for this job.
    pub fn create_journal(&self, job_id: &JobId) -> Arc<Journal> {
        self.journals
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Journal::new(self.default_capacity)))
            .clone()
    }

    pub fn journal(&self, job_id: &JobId) -> Option<Arc<Journal>> {
        self.journals.get(job_id).map(|j| j.clone())
    }

    pub async fn append(
        &self,
        job_id: &JobId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Option<u64> {
        let journal = self.create_journal(job_id);
        journal.append(job_id, event_type, data).await
    }

    /// Replays history then delivers live events, as an async `Stream`.
    /// Unknown job ids yield an empty stream. A subscriber that falls more
    /// than the journal's capacity behind the live broadcast channel never
    /// sees the events it missed; it gets a synthetic `overflow` event in
    /// their place and the stream ends there, same as a `done`/`error` would.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
        last_seq: Option<u64>,
    ) -> impl futures_core::Stream<Item = SearchEvent> {
        let journal = self.create_journal(job_id);
        let (replay, receiver) = journal.snapshot_and_subscribe(last_seq).await;
        let live_from = replay.last().map(|e| e.seq).or(last_seq).unwrap_or(0);
        let job_id = job_id.clone();

        let live = futures::stream::unfold(Some((receiver, live_from)), move |state| {
            let job_id = job_id.clone();
            async move {
                let (mut receiver, mut last_seq) = state?;
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if event.seq > last_seq {
                                last_seq = event.seq;
                                return Some((event, Some((receiver, last_seq))));
                            }
                            // a stale duplicate from the subscribe boundary; keep waiting
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            let seq = last_seq + 1;
                            let overflow = SearchEvent {
                                job_id: job_id.clone(),
                                seq,
                                event_type: EventType::Overflow,
                                data: serde_json::json!({"skipped": skipped}),
                                at: Utc::now(),
                            };
                            return Some((overflow, None));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        tokio_stream::iter(replay).chain(live)
    }

    /// Drops the journal entirely; called once a job is disposable (purged by the sweeper).
    pub fn close(&self, job_id: &JobId) {
        self.journals.remove(job_id);
    }
}
