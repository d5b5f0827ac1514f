pub mod alert_scheduler;
pub mod retention_sweep;

pub use alert_scheduler::AlertSchedulerWorker;
pub use retention_sweep::RetentionSweepWorker;
