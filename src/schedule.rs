// src/schedule.rs

//! Occurrence-set computation from cron-like schedule specifications.

use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;

use crate::errors::{Result, TaskmillError};

/// Merged view over one or more cron expressions.
///
/// A task may declare several expressions under `schedule.cron`; the
/// occurrence set is their union. Two queries are supported:
/// - [`OccurrenceSet::contains`]: is the instant a fire time of any member,
/// - [`OccurrenceSet::next_after`]: earliest fire time strictly after an
///   instant, across all members.
///
/// Expressions may use the classic five-field form (minute, hour,
/// day-of-month, month, day-of-week); a `0` seconds field is prepended
/// before parsing. Six- and seven-field expressions pass through as-is.
#[derive(Debug, Clone)]
pub struct OccurrenceSet {
    exprs: Vec<String>,
    schedules: Vec<Schedule>,
}

impl OccurrenceSet {
    /// Build the union set for a schedule specification.
    ///
    /// Returns `Ok(None)` for an empty specification: "no schedule", the
    /// representation of a chain-only task. A single malformed expression
    /// fails the whole computation; bad expressions are never silently
    /// dropped.
    pub fn compute(exprs: &[String]) -> Result<Option<Self>> {
        if exprs.is_empty() {
            return Ok(None);
        }

        let mut schedules = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let normalized = normalize_expr(expr);
            let schedule =
                Schedule::from_str(&normalized).map_err(|e| TaskmillError::Schedule {
                    expr: expr.clone(),
                    message: e.to_string(),
                })?;
            schedules.push(schedule);
        }

        Ok(Some(Self {
            exprs: exprs.to_vec(),
            schedules,
        }))
    }

    /// The expressions this set was computed from, verbatim.
    pub fn exprs(&self) -> &[String] {
        &self.exprs
    }

    /// Whether `instant`, truncated to its minute, is a fire time of any
    /// member expression.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let minute = minute_floor(instant);
        self.schedules.iter().any(|s| s.includes(minute))
    }

    /// Earliest fire time strictly after `instant` across all member
    /// expressions. `None` once every member has run out (possible with
    /// bounded year fields).
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&instant).next())
            .min()
    }
}

/// Classic five-field cron carries no seconds field; the parser wants one.
fn normalize_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Truncate to the containing minute; schedules fire on minute boundaries.
pub fn minute_floor(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}
