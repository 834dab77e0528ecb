//! Core A: the bulk import / reindex pipeline (§2 components #1–#10 minus
//! the KV adapter, which lives in [`crate::kvstore`]).

pub mod fifo;
pub mod foreman;
pub mod job;
pub mod ldif;
pub mod producer;
pub mod queue;
pub mod reindex;
pub mod slots;
pub mod spool;
pub mod upgrade;
pub mod worker;
pub mod writer;

pub use job::{JobController, JobResult, JobStats, ThreadState};
