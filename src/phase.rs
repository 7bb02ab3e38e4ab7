//! Phase Manager (C3): maps wall-clock time to a [`PhaseState`], plus the
//! separate phase-transition handler that reacts to phase changes.
//!
//! Grounded on `examples/original_source/.../phase/manager.py` (timezone
//! conversion + weekday/time-range schedule matching) and
//! `.../phase/transition_handler.py` (dispatch table, idempotent-per-tick
//! baseline establishment).

use crate::matching::AuctionClearingResult;
use crate::venue::ExchangeVenue;
use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    PreOpen,
    OpeningAuction,
    Continuous,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStyle {
    None,
    Continuous,
    Batch,
}

/// The operational rules attached to a phase; everything but `phase_type`
/// itself is configuration, per spec §3 ("derived from configured schedule").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase_type: PhaseType,
    pub order_submission_allowed: bool,
    pub order_cancellation_allowed: bool,
    pub matching_enabled: bool,
    pub execution_style: ExecutionStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRules {
    pub order_submission_allowed: bool,
    pub order_cancellation_allowed: bool,
    pub matching_enabled: bool,
    pub execution_style: ExecutionStyle,
}

impl PhaseRules {
    /// Conventional defaults for a phase type, used when the configured
    /// schedule doesn't override them. Reasonable exchange defaults, not a
    /// hardcoded behaviour the schedule can't change.
    pub fn default_for(phase_type: PhaseType) -> Self {
        match phase_type {
            PhaseType::PreOpen => PhaseRules {
                order_submission_allowed: true,
                order_cancellation_allowed: true,
                matching_enabled: false,
                execution_style: ExecutionStyle::None,
            },
            PhaseType::OpeningAuction => PhaseRules {
                order_submission_allowed: true,
                order_cancellation_allowed: true,
                matching_enabled: true,
                execution_style: ExecutionStyle::Batch,
            },
            PhaseType::Continuous => PhaseRules {
                order_submission_allowed: true,
                order_cancellation_allowed: true,
                matching_enabled: true,
                execution_style: ExecutionStyle::Continuous,
            },
            PhaseType::Closed => PhaseRules {
                order_submission_allowed: false,
                order_cancellation_allowed: false,
                matching_enabled: false,
                execution_style: ExecutionStyle::None,
            },
        }
    }
}

/// A schedule entry applies to a set of weekdays (per the original's
/// `weekdays: List[str]` field, not a single weekday), matching local
/// time-of-day `[start, end)`.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub phase_type: PhaseType,
}

#[derive(Debug, Clone)]
pub struct PhaseScheduleConfig {
    pub timezone: Tz,
    /// Ordered, non-overlapping; first match wins.
    pub entries: Vec<ScheduleEntry>,
    pub rules: HashMap<PhaseType, PhaseRules>,
}

impl PhaseScheduleConfig {
    pub fn rules_for(&self, phase_type: PhaseType) -> PhaseRules {
        self.rules
            .get(&phase_type)
            .copied()
            .unwrap_or_else(|| PhaseRules::default_for(phase_type))
    }
}

/// Pure function of (time, schedule) -> PhaseState.
pub struct PhaseManager {
    config: PhaseScheduleConfig,
}

impl PhaseManager {
    pub fn new(config: PhaseScheduleConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> PhaseState {
        let local = now.with_timezone(&self.config.timezone);
        let weekday = local.weekday();
        let time_of_day = local.time();

        let phase_type = self
            .config
            .entries
            .iter()
            .find(|entry| entry.weekdays.contains(&weekday) && time_of_day >= entry.start && time_of_day < entry.end)
            .map(|entry| entry.phase_type)
            .unwrap_or(PhaseType::Closed);

        let rules = self.config.rules_for(phase_type);
        PhaseState {
            phase_type,
            order_submission_allowed: rules.order_submission_allowed,
            order_cancellation_allowed: rules.order_cancellation_allowed,
            matching_enabled: rules.matching_enabled,
            execution_style: rules.execution_style,
        }
    }
}

/// What a phase-transition tick caused, if anything.
#[derive(Debug, Clone)]
pub enum PhaseTransitionOutcome {
    None,
    BatchExecuted(Vec<AuctionClearingResult>),
    OrdersCancelled(Vec<Uuid>),
}

/// Reacts to phase changes observed by a poller. Idempotent with respect to
/// the same transition within one observation: the caller polls `on_tick`
/// and must not re-invoke for an already-handled transition — this handler
/// enforces that by tracking the last-seen phase itself.
pub struct PhaseTransitionHandler {
    last_seen: Mutex<Option<PhaseType>>,
}

impl Default for PhaseTransitionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTransitionHandler {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(None),
        }
    }

    /// Observe the current phase and react to a transition since the last
    /// observation. First call establishes the baseline and takes no action.
    pub fn on_tick(&self, current: PhaseType, venue: &ExchangeVenue) -> PhaseTransitionOutcome {
        let mut last_seen = self.last_seen.lock();
        let previous = *last_seen;
        *last_seen = Some(current);

        match previous {
            None => PhaseTransitionOutcome::None,
            Some(previous) if previous == current => PhaseTransitionOutcome::None,
            Some(PhaseType::PreOpen) if current == PhaseType::OpeningAuction => {
                PhaseTransitionOutcome::BatchExecuted(venue.execute_batch())
            }
            Some(PhaseType::Continuous) if current == PhaseType::Closed => {
                PhaseTransitionOutcome::OrdersCancelled(venue.cancel_all_resting())
            }
            _ => PhaseTransitionOutcome::None,
        }
    }
}
