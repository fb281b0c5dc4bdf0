//! Asynchronous flow-field service.
//!
//! One computation runs at a time. Requests for goals that are neither
//! cached nor in flight queue up FIFO and are answered immediately with a
//! pending placeholder. Every job is stamped with the layout version at
//! dispatch; a result whose stamp no longer matches is thrown away.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::flow_field::{FlowField, FlowScratch};
use super::grid::CostGrid;

/// Where flow-field jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowDispatch {
    /// On a dedicated worker thread.
    #[default]
    Background,
    /// On the calling thread at dispatch time. The result is still only
    /// published by the next [`FlowService::poll`], so timing matches the
    /// background mode without depending on thread scheduling.
    Inline,
}

struct FlowJob {
    goal: (u32, u32),
    version: u64,
    grid: CostGrid,
    scratch: FlowScratch,
}

impl FlowJob {
    fn run(mut self) -> FlowResult {
        let field = FlowField::compute(&self.grid, self.goal, &mut self.scratch);
        FlowResult {
            goal: self.goal,
            version: self.version,
            field,
            scratch: self.scratch,
        }
    }
}

struct FlowResult {
    goal: (u32, u32),
    version: u64,
    field: FlowField,
    scratch: FlowScratch,
}

enum Backend {
    Thread {
        jobs: Sender<FlowJob>,
        results: Receiver<FlowResult>,
        handle: JoinHandle<()>,
    },
    Inline {
        ready: Option<FlowResult>,
    },
}

impl Backend {
    fn spawn() -> Self {
        let (job_tx, job_rx) = mpsc::channel::<FlowJob>();
        let (result_tx, result_rx): (SyncSender<FlowResult>, _) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new()
            .name("flow-field".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    if result_tx.send(job.run()).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(handle) => Self::Thread {
                jobs: job_tx,
                results: result_rx,
                handle,
            },
            Err(err) => {
                warn!(%err, "failed to spawn flow-field worker, computing inline");
                Self::Inline { ready: None }
            }
        }
    }
}

/// Cached, asynchronously computed flow fields keyed by goal cell.
pub struct FlowService {
    backend: Backend,
    version: u64,
    cache: HashMap<(u32, u32), Arc<FlowField>>,
    queue: VecDeque<(u32, u32)>,
    in_flight: Option<(u32, u32)>,
    pool: Vec<FlowScratch>,
}

impl std::fmt::Debug for FlowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowService")
            .field("version", &self.version)
            .field("cached", &self.cache.len())
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl FlowService {
    /// Create a service using the given dispatch mode.
    #[must_use]
    pub fn new(dispatch: FlowDispatch) -> Self {
        let backend = match dispatch {
            FlowDispatch::Background => Backend::spawn(),
            FlowDispatch::Inline => Backend::Inline { ready: None },
        };
        Self {
            backend,
            version: 0,
            cache: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: None,
            pool: Vec::new(),
        }
    }

    /// Current layout version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Whether a job is running or waiting.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some() || !self.queue.is_empty()
    }

    /// Number of cached fields.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached field and bump the version.
    ///
    /// An in-flight job finishes but its result is discarded.
    pub fn invalidate(&mut self) {
        self.version += 1;
        self.cache.clear();
    }

    /// Get the field for `goal`, requesting it if necessary.
    ///
    /// Returns the cached field, or a pending placeholder while the field is
    /// queued or computing.
    pub fn request(&mut self, grid: &CostGrid, goal: (u32, u32)) -> Arc<FlowField> {
        if let Some(field) = self.cache.get(&goal) {
            return Arc::clone(field);
        }
        if self.in_flight != Some(goal) && !self.queue.contains(&goal) {
            self.queue.push_back(goal);
            self.dispatch_next(grid);
        }
        Arc::new(FlowField::pending(goal))
    }

    /// Absorb a finished result, if any, then dispatch the next queued goal.
    ///
    /// Never blocks. Returns the goal whose field was published.
    pub fn poll(&mut self, grid: &CostGrid) -> Option<(u32, u32)> {
        let result = match &mut self.backend {
            Backend::Inline { ready } => ready.take(),
            Backend::Thread { results, .. } => match results.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    warn!("flow-field worker disconnected, computing inline");
                    self.backend = Backend::Inline { ready: None };
                    if let Some(goal) = self.in_flight.take() {
                        self.queue.push_front(goal);
                    }
                    None
                }
            },
        };
        let published = result.and_then(|result| self.absorb(result));
        self.dispatch_next(grid);
        published
    }

    /// Block until every queued request has been published.
    ///
    /// Used by tools and tests that want fields to be ready before the next
    /// tick; the simulation itself only calls [`Self::poll`].
    pub fn block_until_idle(&mut self, grid: &CostGrid) {
        while self.is_busy() {
            if self.in_flight.is_none() {
                self.dispatch_next(grid);
                if self.in_flight.is_none() {
                    break;
                }
            }
            let result = match &mut self.backend {
                Backend::Inline { ready } => ready.take(),
                Backend::Thread { results, .. } => results.recv().ok(),
            };
            match result {
                Some(result) => {
                    self.absorb(result);
                }
                None => {
                    if let Backend::Thread { .. } = self.backend {
                        warn!("flow-field worker disconnected, computing inline");
                        self.backend = Backend::Inline { ready: None };
                    }
                    if let Some(goal) = self.in_flight.take() {
                        self.queue.push_front(goal);
                    }
                }
            }
            self.dispatch_next(grid);
        }
    }

    fn absorb(&mut self, result: FlowResult) -> Option<(u32, u32)> {
        self.in_flight = None;
        self.pool.push(result.scratch);
        if result.version != self.version {
            debug!(
                goal = ?result.goal,
                stamped = result.version,
                current = self.version,
                "discarding stale flow field"
            );
            return None;
        }
        self.cache.insert(result.goal, Arc::new(result.field));
        Some(result.goal)
    }

    fn dispatch_next(&mut self, grid: &CostGrid) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(goal) = self.next_uncached() else {
            return;
        };
        let job = FlowJob {
            goal,
            version: self.version,
            grid: grid.clone(),
            scratch: self.pool.pop().unwrap_or_default(),
        };
        self.in_flight = Some(goal);

        match &mut self.backend {
            Backend::Inline { ready } => *ready = Some(job.run()),
            Backend::Thread { jobs, .. } => {
                if jobs.send(job).is_err() {
                    warn!("flow-field worker unavailable, computing inline");
                    self.in_flight = None;
                    self.queue.push_front(goal);
                    self.backend = Backend::Inline { ready: None };
                    self.dispatch_next(grid);
                }
            }
        }
    }

    fn next_uncached(&mut self) -> Option<(u32, u32)> {
        while let Some(goal) = self.queue.pop_front() {
            if !self.cache.contains_key(&goal) {
                return Some(goal);
            }
        }
        None
    }
}

impl Drop for FlowService {
    fn drop(&mut self) {
        let backend = std::mem::replace(&mut self.backend, Backend::Inline { ready: None });
        if let Backend::Thread { jobs, results, handle } = backend {
            // Closing both channels ends the worker loop even if it is
            // blocked handing back a result nobody will read.
            drop(jobs);
            drop(results);
            let _ = handle.join();
        }
    }
}
