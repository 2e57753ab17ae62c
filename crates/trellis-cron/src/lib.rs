//! # Trellis Cron
//!
//! Recurring jobs for the Trellis runtime. A [`Processor`] keeps
//! [`CronTask`]s on a time wheel and dispatches each due task through the
//! shared [`Engine`](trellis_core::Engine) as an ordinary request, so task
//! services run behind the same middleware as API and queue requests.

pub mod error;
pub mod processor;
pub mod schedule;
pub mod task;

pub use error::{CronError, CronResult, TaskFailure};
pub use processor::{DEFAULT_LENGTH, DEFAULT_SPAN, Processor, ProcessorState};
pub use schedule::{BoxedSchedule, CronExpr, Every, Schedule};
pub use task::{CronTask, Task};
