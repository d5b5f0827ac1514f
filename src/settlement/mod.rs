//! Settlement core: exactly-once settlement of externally-processed
//! payments against locally-owned orders.

pub mod alerts;
pub mod classifier;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod store;
pub mod testing;

pub use classifier::{ClassificationContext, ClassifiedError, ErrorClassifier};
pub use events::{EventSink, SettlementEvent, TracingEventSink};
pub use metrics::{HealthReport, MetricsSummary, SettlementMetrics};
pub use orchestrator::{
    CallerContext, ManualSettlementOutcome, SettlementChannel, SettlementOrchestrator,
    SettlementResult,
};
pub use recovery::OrderRecoveryManager;
pub use retry::{with_retry, RetryPolicy};
pub use store::{FailureRecord, FailureType, PaymentStatus, PendingPaymentStore};
