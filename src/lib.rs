/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

//! metronome – concurrent scheduled-task executor
//!
//! Accepts actions to run once, at a fixed rate, or with a fixed delay
//! between completions, and dispatches them across a pool of worker threads
//! at the correct future time.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── task/       – task identity, kinds, the Action trait, queued records
//! ├── handle/     – one-shot-write, multi-read result cells (TaskHandle)
//! ├── queue/      – time-ordered pending set with blocking take-next-due
//! ├── scheduler/  – submission facade, worker pool, shutdown coordination
//! └── config/     – YAML scheduler configuration
//! ```
//!
//! Data flow: submit → task record + result cell built → inserted into the
//! timer queue (waking a worker) → a worker takes the task when it is due →
//! runs the action outside any lock → settles the handle → for periodic
//! kinds, computes the next run time and reinserts.

pub mod config;
pub mod handle;
pub mod scheduler;
pub mod task;

pub(crate) mod queue;

pub use config::SchedulerConfig;
pub use handle::{ActionFailure, HandleStatus, TaskHandle, WaitError};
pub use scheduler::{Scheduler, SubmitError};
pub use task::{Action, TaskId, TaskKind};
