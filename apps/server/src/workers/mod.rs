//! Background workers
//!
//! The schedule runner polls for due schedules, runs their searches and hands
//! the results to the delivery sinks.

mod notifier;
mod runner;
mod schedule_runner;

pub use notifier::{MailOwnerNotifier, OwnerNotifier};
pub use runner::{run_schedule_loop, ScheduleLoopConfig};
pub use schedule_runner::{RunSummary, ScheduleRunner, ScheduleRunnerConfig};
