//! Cursor pagination over a [`PageSource`].
//!
//! Fetches run on worker threads and report back over a channel; results are
//! only applied on the owner's thread, inside [`PaginationController::poll`]
//! or [`PaginationController::wait`]. Every fetch carries the generation that
//! was current when it started. Changing the target bumps the generation, so a
//! late page for an old target is dropped instead of mixed into the list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::canonical::{Keyed, Page};
use crate::data::PageSource;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    Replace,
    Append,
}

#[derive(Debug, Clone)]
pub struct PaginationState<T> {
    items: Vec<T>,
    cursor: Option<String>,
    has_more: bool,
    loading: bool,
    error: Option<GatewayError>,
    target: Option<String>,
    generation: u64,
    phase: Phase,
}

impl<T> Default for PaginationState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
            has_more: false,
            loading: false,
            error: None,
            target: None,
            generation: 0,
            phase: Phase::Idle,
        }
    }
}

impl<T> PaginationState<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.error.as_ref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

struct Completion<T> {
    generation: u64,
    mode: LoadMode,
    result: Result<Page<T>, GatewayError>,
}

struct PendingFetch {
    generation: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct PaginationController<T> {
    source: Arc<dyn PageSource<Item = T>>,
    state: PaginationState<T>,
    pending: Option<PendingFetch>,
    completion_tx: Sender<Completion<T>>,
    completion_rx: Receiver<Completion<T>>,
}

impl<T> PaginationController<T>
where
    T: Keyed + Send + 'static,
{
    pub fn new(source: Arc<dyn PageSource<Item = T>>) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            source,
            state: PaginationState::default(),
            pending: None,
            completion_tx,
            completion_rx,
        }
    }

    pub fn state(&self) -> &PaginationState<T> {
        &self.state
    }

    /// Key of the last record, the identity the viewport sentinel binds to.
    pub fn sentinel(&self) -> Option<&str> {
        self.state.items.last().map(Keyed::key)
    }

    /// Starts over on `target`. The list is only cleared when the target
    /// actually changes; a repeated target refreshes in place.
    pub fn reset(&mut self, target: &str) {
        if self.state.target.as_deref() != Some(target) {
            self.state.items.clear();
            self.state.cursor = None;
            self.state.error = None;
            self.state.target = Some(target.to_string());
        }
        self.state.has_more = true;
        self.state.generation = self.state.generation.wrapping_add(1);
        debug!(target, generation = self.state.generation, "pagination reset");
        self.spawn_fetch(target.to_string(), None, LoadMode::Replace);
    }

    /// Requests the next page. Returns `false` without fetching while a fetch
    /// is in flight or once the last page has been seen.
    pub fn load_more(&mut self) -> bool {
        if self.state.loading || !self.state.has_more {
            return false;
        }
        let Some(target) = self.state.target.clone() else {
            return false;
        };
        let cursor = self.state.cursor.clone();
        self.spawn_fetch(target, cursor, LoadMode::Append);
        true
    }

    /// Empties the list and invalidates anything in flight.
    pub fn clear(&mut self) {
        self.cancel_pending();
        self.state.items.clear();
        self.state.cursor = None;
        self.state.has_more = false;
        self.state.loading = false;
        self.state.error = None;
        self.state.target = None;
        self.state.generation = self.state.generation.wrapping_add(1);
        self.state.phase = Phase::Idle;
    }

    /// Applies every completion that has arrived. Returns whether the state
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.completion_rx.try_recv() {
            changed |= self.apply(completion);
        }
        changed
    }

    /// Blocks until the in-flight fetch lands or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        // A timeout too large to add to the clock waits without a bound.
        let deadline = Instant::now().checked_add(timeout);
        let mut changed = self.poll();
        while self.state.loading {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.completion_rx.recv_timeout(remaining).ok()
                }
                None => self.completion_rx.recv().ok(),
            };
            match received {
                Some(completion) => changed |= self.apply(completion),
                None => break,
            }
        }
        changed
    }

    fn spawn_fetch(&mut self, target: String, cursor: Option<String>, mode: LoadMode) {
        self.cancel_pending();

        let generation = self.state.generation;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingFetch {
            generation,
            cancel_flag: cancel_flag.clone(),
        });
        self.state.loading = true;
        self.state.phase = Phase::Loading;

        let source = self.source.clone();
        let tx = self.completion_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = source.fetch_page(&target, cursor.as_deref());
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Completion {
                generation,
                mode,
                result: result.map(Page::normalized),
            });
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }

    fn apply(&mut self, completion: Completion<T>) -> bool {
        if completion.generation != self.state.generation {
            debug!(
                stale = completion.generation,
                current = self.state.generation,
                "discarding superseded page"
            );
            return false;
        }
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == completion.generation)
        {
            self.pending = None;
        }
        self.state.loading = false;

        match completion.result {
            Ok(page) => {
                if completion.mode == LoadMode::Replace {
                    self.state.items.clear();
                }
                let mut seen: HashSet<String> = self
                    .state
                    .items
                    .iter()
                    .map(|item| item.key().to_string())
                    .collect();
                for item in page.items {
                    if seen.insert(item.key().to_string()) {
                        self.state.items.push(item);
                    }
                }
                self.state.has_more = page.after.is_some();
                self.state.cursor = page.after;
                self.state.error = None;
                self.state.phase = Phase::Loaded;
            }
            Err(err) => {
                warn!(error = %err, "page fetch failed");
                self.state.error = Some(err);
                self.state.phase = Phase::Error;
            }
        }
        true
    }
}

impl<T> Drop for PaginationController<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}
