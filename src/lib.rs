//! # Simflow — Deterministic Discrete-Event Kernel
//!
//! A single-threaded simulation kernel for modelling work moving through
//! queues: a simulated clock, resumable processes, FIFO/priority/weighted
//! stores, interrupts, and combined waits. Process bodies are explicit
//! state machines resumed by the scheduler; no async, no threads, no
//! wall-clock time.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │   workflow: JobArena + StackWorker    │ ← jobs, stack-based workers
//! │  ┌─────────────────────────────────┐  │
//! │  │          Simulation              │  │ ← clock + dispatch loop
//! │  │  ┌───────────┐  ┌────────────┐  │  │
//! │  │  │ Scheduler │  │  Events    │  │  │ ← (time, seq) min-heap, arena
//! │  │  └───────────┘  └────────────┘  │  │
//! │  │  ┌───────────┐  ┌────────────┐  │  │
//! │  │  │ Processes │  │  Stores    │  │  │ ← resumable bodies, queues
//! │  │  └───────────┘  └────────────┘  │  │
//! │  │  ┌───────────┐  ┌────────────┐  │  │
//! │  │  │ Interrupt │  │  AnyOf     │  │  │ ← preemption, races
//! │  │  └───────────┘  └────────────┘  │  │
//! │  └─────────────────────────────────┘  │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use simflow::{Simulation, SimConfig, Step, StorePolicy, Wake};
//!
//! let mut sim: Simulation<u32> = Simulation::new(SimConfig::default());
//! let queue = sim.add_store("queue", StorePolicy::fifo());
//! sim.put(queue, 7).unwrap();
//!
//! let mut served = false;
//! sim.spawn_fn("consumer", move |ctx, wake| match wake {
//!     Wake::Started => Ok(Step::Wait(ctx.get(queue)?)),
//!     Wake::Resolved { outcome, .. } if !served => {
//!         served = true;
//!         assert_eq!(outcome.into_item(), Some(7));
//!         Ok(Step::Wait(ctx.schedule_timeout(3.0)?))
//!     }
//!     _ => Ok(Step::Done),
//! });
//!
//! let summary = sim.run_until(10.0).unwrap();
//! assert_eq!(summary.now.as_f64(), 3.0);
//! ```

pub mod combinator;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod interrupt;
pub mod process;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod time;
pub mod workflow;

// Re-exports for convenience.
pub use combinator::TieBreak;
pub use config::SimConfig;
pub use context::SimulationContext;
pub use error::{SimError, SimResult};
pub use event::{EventId, EventKind, EventStatus, Outcome};
pub use eventlog::{logs_match, EventLog, TraceEntry, TraceTarget};
pub use process::{Process, ProcessId, ProcessStatus, Step, Wake};
pub use scheduler::Scheduler;
pub use simulation::{RunSummary, Simulation, StopReason};
pub use store::{Store, StoreId, StorePolicy};
pub use time::SimTime;
