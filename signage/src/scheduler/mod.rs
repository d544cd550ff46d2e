//! Scheduling: recurrence evaluation, schedule selection and layout
//! projection, driven by [`SignageScheduler`].

mod layout;
mod recurrence;
mod selector;
mod service;

pub use layout::{DEFAULT_IMAGE_DURATION, LayoutTransformer};
pub use recurrence::{
    CronMath, DEFAULT_EVALUATION_UNIT, RecurrenceError, RecurrenceEvaluator, RecurrenceExpression,
    RecurrenceMath,
};
pub use selector::{PassFlag, PassGuard, ScheduleMatch, ScheduleSelector, Selection};
pub use service::{
    DEFAULT_EVALUATION_INTERVAL, EvaluationOutcome, SchedulerConfig, SignageScheduler,
};
