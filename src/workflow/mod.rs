//! Jobs and workers built on the kernel.
//!
//! Scenarios move jobs through stores and hand them to workers. Jobs live
//! in a run-scoped [`JobArena`] and travel through the simulation as
//! [`JobId`]s, so a `Simulation<JobId>` carries both queue items and
//! interrupt causes.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`job`] | [`JobId`], [`JobKind`], [`Job`], [`JobArena`] |
//! | [`worker`] | [`StackWorker`] process |

pub mod job;
pub mod worker;

pub use job::{priority_queue, Job, JobArena, JobError, JobId, JobKind, SharedJobs, WorkSegment};
pub use worker::{StackWorker, WorkerState};
