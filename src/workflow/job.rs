//! Job records and the run-scoped job arena.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::process::ProcessId;
use crate::store::StorePolicy;
use crate::time::SimTime;

/// Jobs shared between the processes and stores of one run.
pub type SharedJobs = Rc<RefCell<JobArena>>;

// ── Job ID ────────────────────────────────────────────────────────────

/// Identifies a job within one [`JobArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId(u64);

impl JobId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        JobId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "J{}", self.0)
    }
}

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("job {0} does not exist")]
    UnknownJob(JobId),

    #[error("invalid fragment size {size}: sizes must be finite and positive")]
    InvalidFragmentSize { size: f64 },

    #[error("{job} is already split into fragments")]
    AlreadyDecomposed { job: JobId },

    #[error("{job} already finished")]
    AlreadyFinished { job: JobId },
}

// ── Job ───────────────────────────────────────────────────────────────

/// What a job is, with the fields only some kinds carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum JobKind {
    /// Ordinary work from the shared queue.
    Regular,
    /// Urgent work that preempts whatever a worker is doing.
    Interrupt,
    /// One piece of a decomposed job.
    Fragment { parent: JobId },
    /// Work that joins the results of a decomposed job.
    Integration { parent: JobId },
}

impl JobKind {
    /// Scheduling class; lower is more urgent.
    pub fn default_priority(&self) -> u8 {
        match self {
            JobKind::Interrupt => 0,
            JobKind::Fragment { .. } | JobKind::Integration { .. } => 1,
            JobKind::Regular => 2,
        }
    }

    pub fn parent(&self) -> Option<JobId> {
        match self {
            JobKind::Fragment { parent } | JobKind::Integration { parent } => Some(*parent),
            JobKind::Regular | JobKind::Interrupt => None,
        }
    }
}

/// A stretch of time a worker spent on one job.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkSegment {
    pub start: SimTime,
    pub end: SimTime,
    /// Work credited for this segment.
    pub work: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub priority: u8,
    /// Total work the job needs.
    pub duration: f64,
    pub created: SimTime,
    pub started: Option<SimTime>,
    pub finished: Option<SimTime>,
    /// Work done so far.
    pub credited: f64,
    pub segments: Vec<WorkSegment>,
    pub interruptions: u32,
    pub worker: Option<ProcessId>,
}

impl Job {
    /// Work still to do.
    pub fn remaining(&self) -> f64 {
        (self.duration - self.credited).max(0.0)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}

// ── Arena ─────────────────────────────────────────────────────────────

/// Registry of every job created during one run.
#[derive(Debug, Clone, Default)]
pub struct JobArena {
    jobs: Vec<Job>,
    /// Fragments still open, per decomposed parent.
    outstanding: BTreeMap<JobId, usize>,
}

impl JobArena {
    pub fn new() -> Self {
        JobArena::default()
    }

    /// A fresh arena behind the shared handle processes hold.
    pub fn shared() -> SharedJobs {
        Rc::new(RefCell::new(JobArena::new()))
    }

    /// Register a job with its kind's default priority.
    pub fn create(&mut self, kind: JobKind, duration: f64, now: SimTime) -> JobId {
        let id = JobId::new(self.jobs.len() as u64);
        self.jobs.push(Job {
            id,
            kind,
            priority: kind.default_priority(),
            duration: duration.max(0.0),
            created: now,
            started: None,
            finished: None,
            credited: 0.0,
            segments: Vec::new(),
            interruptions: 0,
            worker: None,
        });
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.raw() as usize)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id.raw() as usize)
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, JobError> {
        self.get_mut(id).ok_or(JobError::UnknownJob(id))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All jobs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Record that `worker` took the job on at `now`. The first call sets
    /// the start time.
    pub fn start(&mut self, id: JobId, worker: ProcessId, now: SimTime) -> Result<(), JobError> {
        let job = self.job_mut(id)?;
        if job.is_finished() {
            return Err(JobError::AlreadyFinished { job: id });
        }
        job.started.get_or_insert(now);
        job.worker = Some(worker);
        Ok(())
    }

    /// Credit the work done between `start` and `end` after an interrupt.
    pub fn credit(&mut self, id: JobId, start: SimTime, end: SimTime) -> Result<f64, JobError> {
        let job = self.job_mut(id)?;
        let work = end
            .duration_since(start)
            .unwrap_or(0.0)
            .min(job.remaining());
        job.credited += work;
        job.interruptions += 1;
        job.segments.push(WorkSegment { start, end, work });
        Ok(work)
    }

    /// Close the final segment: everything left is credited and the job
    /// is finished at `end`.
    pub fn finish(&mut self, id: JobId, start: SimTime, end: SimTime) -> Result<(), JobError> {
        let job = self.job_mut(id)?;
        if job.is_finished() {
            return Err(JobError::AlreadyFinished { job: id });
        }
        let work = job.remaining();
        job.segments.push(WorkSegment { start, end, work });
        job.credited = job.duration;
        job.finished = Some(end);
        Ok(())
    }

    /// Split `parent` into fragments of `size`, plus one leading fragment
    /// for the remainder. Returns the fragments in that order.
    pub fn decompose(&mut self, parent: JobId, size: f64, now: SimTime) -> Result<Vec<JobId>, JobError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(JobError::InvalidFragmentSize { size });
        }
        if self.outstanding.contains_key(&parent) {
            return Err(JobError::AlreadyDecomposed { job: parent });
        }
        let duration = self.get(parent).ok_or(JobError::UnknownJob(parent))?.duration;

        let count = (duration / size).floor() as usize;
        let remainder = (duration - count as f64 * size).max(0.0);
        let fragments: Vec<JobId> = std::iter::once(remainder)
            .chain(std::iter::repeat(size).take(count))
            .map(|d| self.create(JobKind::Fragment { parent }, d, now))
            .collect();
        self.outstanding.insert(parent, fragments.len());
        debug!(job = %parent, fragments = fragments.len(), "decomposed");
        Ok(fragments)
    }

    /// Create the job that integrates a decomposed parent's fragments.
    pub fn integration(&mut self, parent: JobId, duration: f64, now: SimTime) -> Result<JobId, JobError> {
        if self.get(parent).is_none() {
            return Err(JobError::UnknownJob(parent));
        }
        Ok(self.create(JobKind::Integration { parent }, duration, now))
    }

    /// Fragments of `parent` not yet completed.
    pub fn outstanding(&self, parent: JobId) -> Option<usize> {
        self.outstanding.get(&parent).copied()
    }

    /// Account for a completed job. When it is the last open fragment of
    /// its parent, the parent is finished too and returned.
    pub fn complete(&mut self, id: JobId, now: SimTime) -> Result<Option<JobId>, JobError> {
        let job = self.get(id).ok_or(JobError::UnknownJob(id))?;
        let JobKind::Fragment { parent } = job.kind else {
            return Ok(None);
        };
        let Some(open) = self.outstanding.get_mut(&parent) else {
            return Ok(None);
        };
        *open = open.saturating_sub(1);
        if *open > 0 {
            return Ok(None);
        }
        self.outstanding.remove(&parent);
        let parent_job = self.job_mut(parent)?;
        parent_job.credited = parent_job.duration;
        parent_job.finished.get_or_insert(now);
        debug!(job = %parent, "last fragment done");
        Ok(Some(parent))
    }
}

/// A priority store over jobs: lowest priority class first, then earliest
/// arrival. Reads the arena at every get, so changing a queued job's
/// `priority` promotes it.
pub fn priority_queue(jobs: SharedJobs) -> StorePolicy<JobId> {
    StorePolicy::priority_by_key(move |id: &JobId| {
        jobs.borrow().get(*id).map_or(u8::MAX, |job| job.priority)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(x: f64) -> SimTime {
        SimTime::new(x)
    }

    #[test]
    fn test_create_uses_kind_priority() {
        let mut jobs = JobArena::new();
        let a = jobs.create(JobKind::Regular, 3.0, t(0.0));
        let b = jobs.create(JobKind::Interrupt, 1.0, t(1.0));

        assert_eq!(a.to_string(), "J0");
        assert_eq!(jobs.get(a).unwrap().priority, 2);
        assert_eq!(jobs.get(b).unwrap().priority, 0);
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_credit_then_finish_conserves_work() {
        let mut jobs = JobArena::new();
        let id = jobs.create(JobKind::Regular, 10.0, t(0.0));
        jobs.start(id, ProcessId::new(0), t(0.0)).unwrap();

        assert_eq!(jobs.credit(id, t(0.0), t(4.0)).unwrap(), 4.0);
        assert_eq!(jobs.get(id).unwrap().remaining(), 6.0);
        jobs.finish(id, t(6.0), t(12.0)).unwrap();

        let job = jobs.get(id).unwrap();
        let total: f64 = job.segments.iter().map(|s| s.work).sum();
        assert_eq!(total, 10.0);
        assert_eq!(job.credited, 10.0);
        assert_eq!(job.interruptions, 1);
        assert_eq!(job.finished, Some(t(12.0)));
        assert_eq!(
            jobs.finish(id, t(12.0), t(13.0)),
            Err(JobError::AlreadyFinished { job: id })
        );
    }

    #[test]
    fn test_decompose_remainder_first() {
        let mut jobs = JobArena::new();
        let parent = jobs.create(JobKind::Regular, 1.25, t(0.0));
        let fragments = jobs.decompose(parent, 0.5, t(1.0)).unwrap();

        let durations: Vec<f64> = fragments.iter().map(|f| jobs.get(*f).unwrap().duration).collect();
        assert_eq!(durations, vec![0.25, 0.5, 0.5]);
        assert_eq!(jobs.outstanding(parent), Some(3));
        assert!(fragments
            .iter()
            .all(|f| jobs.get(*f).unwrap().kind == JobKind::Fragment { parent }));
        assert_eq!(
            jobs.decompose(parent, 0.5, t(1.0)),
            Err(JobError::AlreadyDecomposed { job: parent })
        );
    }

    #[test]
    fn test_last_fragment_completes_parent() {
        let mut jobs = JobArena::new();
        let parent = jobs.create(JobKind::Regular, 1.0, t(0.0));
        let fragments = jobs.decompose(parent, 0.5, t(0.0)).unwrap();
        assert_eq!(fragments.len(), 3);

        assert_eq!(jobs.complete(fragments[0], t(1.0)).unwrap(), None);
        assert_eq!(jobs.complete(fragments[2], t(2.0)).unwrap(), None);
        assert_eq!(jobs.complete(fragments[1], t(3.0)).unwrap(), Some(parent));
        assert_eq!(jobs.outstanding(parent), None);
        assert_eq!(jobs.get(parent).unwrap().finished, Some(t(3.0)));

        let merge = jobs.integration(parent, 0.2, t(3.0)).unwrap();
        assert_eq!(jobs.get(merge).unwrap().kind.parent(), Some(parent));
    }

    #[test]
    fn test_invalid_fragment_size() {
        let mut jobs = JobArena::new();
        let parent = jobs.create(JobKind::Regular, 1.0, t(0.0));
        assert!(matches!(
            jobs.decompose(parent, 0.0, t(0.0)),
            Err(JobError::InvalidFragmentSize { .. })
        ));
        assert_eq!(
            jobs.decompose(JobId::new(9), 0.5, t(0.0)),
            Err(JobError::UnknownJob(JobId::new(9)))
        );
    }
}
