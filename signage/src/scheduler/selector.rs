//! Active schedule selection: the schedule that fired most recently wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::recurrence::{RecurrenceEvaluator, RecurrenceExpression};
use crate::domain::{Configuration, Schedule};

/// A non-blocking "one pass at a time" flag.
#[derive(Debug, Clone, Default)]
pub struct PassFlag {
    busy: Arc<AtomicBool>,
}

impl PassFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if a pass is already running.
    pub fn try_begin(&self) -> Option<PassGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard {
                busy: self.busy.clone(),
            })
    }
}

/// Releases the owning [`PassFlag`] on drop.
#[derive(Debug)]
pub struct PassGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// The winning schedule of a selection pass.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleMatch<'a> {
    pub schedule: &'a Schedule,
    pub fired_at: DateTime<Utc>,
    /// Index in configuration order.
    pub position: usize,
}

/// Result of [`ScheduleSelector::select_active`].
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Active(ScheduleMatch<'a>),
    /// No schedule produced a fire instant.
    NoneActive,
    /// Another pass is still running; nothing was evaluated.
    Busy,
}

impl<'a> Selection<'a> {
    pub fn schedule(&self) -> Option<&'a Schedule> {
        match self {
            Self::Active(m) => Some(m.schedule),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Picks the schedule with the latest most-recent-fire instant.
///
/// Exact ties go to the schedule that comes first in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSelector {
    evaluator: RecurrenceEvaluator,
    in_progress: PassFlag,
}

impl ScheduleSelector {
    pub fn new(evaluator: RecurrenceEvaluator) -> Self {
        Self {
            evaluator,
            in_progress: PassFlag::new(),
        }
    }

    pub fn evaluator(&self) -> &RecurrenceEvaluator {
        &self.evaluator
    }

    /// Hold the selection flag across a wider pass. While the guard lives,
    /// [`select_active`](Self::select_active) returns [`Selection::Busy`].
    pub fn begin_pass(&self) -> Option<PassGuard> {
        self.in_progress.try_begin()
    }

    pub fn select_active<'a>(
        &self,
        configuration: &'a Configuration,
        now: DateTime<Utc>,
    ) -> Selection<'a> {
        let Some(_guard) = self.in_progress.try_begin() else {
            debug!("selection pass already in progress");
            return Selection::Busy;
        };
        self.select_unguarded(configuration, now)
    }

    /// Selection without the re-entrancy flag, for callers that already hold
    /// a guard from [`begin_pass`](Self::begin_pass).
    pub fn select_unguarded<'a>(
        &self,
        configuration: &'a Configuration,
        now: DateTime<Utc>,
    ) -> Selection<'a> {
        let mut best: Option<ScheduleMatch<'a>> = None;

        for (position, schedule) in configuration.schedules.iter().enumerate() {
            let Some(expression) = schedule.expression() else {
                trace!(schedule_id = %schedule.id, "schedule has no recurrence expression");
                continue;
            };

            let parsed = match RecurrenceExpression::parse(expression) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(schedule_id = %schedule.id, error = %e, "skipping schedule");
                    continue;
                }
            };

            let fired_at = self.evaluator.most_recent_fire_parsed(&parsed, now);
            trace!(schedule_id = %schedule.id, fired_at = %fired_at, "schedule evaluated");

            if best.is_none_or(|b| fired_at > b.fired_at) {
                best = Some(ScheduleMatch {
                    schedule,
                    fired_at,
                    position,
                });
            }
        }

        match best {
            Some(m) => Selection::Active(m),
            None => Selection::NoneActive,
        }
    }
}
