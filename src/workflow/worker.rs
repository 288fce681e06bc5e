//! A worker that keeps a stack of in-progress jobs.
//!
//! ```text
//!   Fetching ──item──▶ Working ──timeout──▶ (pop) ──stack empty──▶ Fetching
//!                        │  ▲                  │
//!                        │  └──stack not empty─┘
//!                        └──interrupt: credit top, push cause──▶ Working
//! ```
//!
//! An interrupt credits the work done since the segment started to the
//! job on top of the stack and pushes the interrupting job. When that job
//! finishes the one beneath resumes with only its remaining work.

use tracing::debug;

use crate::combinator::TieBreak;
use crate::context::SimulationContext;
use crate::error::{SimError, SimResult};
use crate::event::EventId;
use crate::process::{Process, ProcessId, Step, Wake};
use crate::store::StoreId;
use crate::time::SimTime;

use super::job::{Job, JobError, JobId, JobKind, SharedJobs};

/// Job bookkeeping errors end the run as a failure of the worker.
fn job_failed(worker: ProcessId) -> impl FnOnce(JobError) -> SimError {
    move |err| SimError::ProcessFailed {
        process: worker,
        reason: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a job from its queue(s).
    Fetching,
    /// Working on the job on top of its stack.
    Working,
}

/// Stack-based worker process over a `Simulation<JobId>`.
pub struct StackWorker {
    jobs: SharedJobs,
    shared: StoreId,
    own: Option<StoreId>,
    fragment_size: Option<f64>,
    stack: Vec<JobId>,
    state: WorkerState,
    segment_start: Option<SimTime>,
}

impl StackWorker {
    /// A worker taking jobs from `shared`.
    pub fn new(jobs: SharedJobs, shared: StoreId) -> Self {
        StackWorker {
            jobs,
            shared,
            own: None,
            fragment_size: None,
            stack: Vec::new(),
            state: WorkerState::Fetching,
            segment_start: None,
        }
    }

    /// Also fetch from a queue of this worker's own. When both queues can
    /// serve at the same instant the own queue wins, so reassigned work
    /// is finished before new work is taken.
    pub fn with_own_queue(mut self, own: StoreId) -> Self {
        self.own = Some(own);
        self
    }

    /// Split regular jobs longer than `size` into fragments, queued on the
    /// own queue (or the shared one if there is none).
    pub fn with_decomposition(mut self, size: f64) -> Self {
        self.fragment_size = Some(size);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// In-progress jobs, bottom first.
    pub fn stack(&self) -> &[JobId] {
        &self.stack
    }

    fn accept(&mut self, ctx: &mut SimulationContext<'_, JobId>, job: JobId) -> SimResult<()> {
        if let Some(size) = self.fragment_size {
            let split = self
                .jobs
                .borrow()
                .get(job)
                .is_some_and(|j| j.kind == JobKind::Regular && j.duration > size);
            if split {
                let fragments = self
                    .jobs
                    .borrow_mut()
                    .decompose(job, size, ctx.now())
                    .map_err(job_failed(ctx.current()))?;
                let target = self.own.unwrap_or(self.shared);
                for fragment in fragments {
                    ctx.put(target, fragment)?;
                }
                return Ok(());
            }
        }
        self.stack.push(job);
        Ok(())
    }

    fn finish_top(&mut self, ctx: &mut SimulationContext<'_, JobId>) -> SimResult<()> {
        let Some(job) = self.stack.pop() else {
            return Ok(());
        };
        let now = ctx.now();
        let start = self.segment_start.take().unwrap_or(now);
        let parent = {
            let mut jobs = self.jobs.borrow_mut();
            jobs.finish(job, start, now)
                .and_then(|()| jobs.complete(job, now))
                .map_err(job_failed(ctx.current()))?
        };
        debug!(worker = %ctx.current(), job = %job, time = %now, "job finished");
        if let Some(parent) = parent {
            debug!(worker = %ctx.current(), job = %parent, "decomposed job complete");
        }
        Ok(())
    }

    fn next_step(&mut self, ctx: &mut SimulationContext<'_, JobId>) -> SimResult<Step> {
        match self.stack.last().copied() {
            None => {
                self.state = WorkerState::Fetching;
                Ok(Step::Wait(self.fetch(ctx)?))
            }
            Some(top) => {
                self.state = WorkerState::Working;
                let remaining = {
                    let mut jobs = self.jobs.borrow_mut();
                    jobs.start(top, ctx.current(), ctx.now())
                        .map_err(job_failed(ctx.current()))?;
                    jobs.get(top).map_or(0.0, Job::remaining)
                };
                self.segment_start = Some(ctx.now());
                Ok(Step::Wait(ctx.schedule_timeout(remaining)?))
            }
        }
    }

    fn fetch(&mut self, ctx: &mut SimulationContext<'_, JobId>) -> SimResult<EventId> {
        let shared = ctx.get(self.shared)?;
        match self.own {
            Some(own) => {
                let own = ctx.get(own)?;
                ctx.any_of(&[own, shared], TieBreak::ListOrder)
            }
            None => Ok(shared),
        }
    }
}

impl Process<JobId> for StackWorker {
    fn resume(&mut self, ctx: &mut SimulationContext<'_, JobId>, wake: Wake<JobId>) -> SimResult<Step> {
        match wake {
            Wake::Started => {}
            Wake::Resolved { outcome, .. } => match self.state {
                WorkerState::Fetching => {
                    if let Some(job) = outcome.into_item() {
                        self.accept(ctx, job)?;
                    }
                }
                WorkerState::Working => self.finish_top(ctx)?,
            },
            Wake::Interrupted { cause } => {
                if let (WorkerState::Working, Some(&top), Some(start)) =
                    (self.state, self.stack.last(), self.segment_start.take())
                {
                    let work = self
                        .jobs
                        .borrow_mut()
                        .credit(top, start, ctx.now())
                        .map_err(job_failed(ctx.current()))?;
                    debug!(worker = %ctx.current(), job = %top, work, "interrupted");
                }
                self.stack.push(cause);
            }
        }
        self.next_step(ctx)
    }
}
