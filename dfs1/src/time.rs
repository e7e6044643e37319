use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// The time axis of a file.
///
/// Either every step is the same length (`Fixed`), or each step has its own duration
/// (`Variable`). Durations are in seconds. Which kind a file uses is decided when it is created.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TimeAxis {
    Fixed {
        start: NaiveDateTime,
        step_duration: f64,
        step_count: usize,
    },
    Variable {
        start: NaiveDateTime,
        durations: Vec<f64>,
    },
}

impl TimeAxis {
    pub fn fixed(start: NaiveDateTime, step_duration: f64, step_count: usize) -> Result<Self> {
        let axis = TimeAxis::Fixed {
            start,
            step_duration,
            step_count,
        };
        axis.validate()?;

        Ok(axis)
    }

    pub fn variable(start: NaiveDateTime, durations: Vec<f64>) -> Result<Self> {
        let axis = TimeAxis::Variable { start, durations };
        axis.validate()?;

        Ok(axis)
    }

    /// Check every duration is positive and the end of the last step is a representable time
    pub fn validate(&self) -> Result<()> {
        match self {
            TimeAxis::Fixed { step_duration, .. } => check_duration(*step_duration, None)?,
            TimeAxis::Variable { durations, .. } => durations
                .iter()
                .enumerate()
                .try_for_each(|(step, duration)| check_duration(*duration, Some(step)))?,
        }
        self.at(self.offset(self.step_count()))?;

        Ok(())
    }

    pub fn start(&self) -> NaiveDateTime {
        match self {
            TimeAxis::Fixed { start, .. } => *start,
            TimeAxis::Variable { start, .. } => *start,
        }
    }

    pub fn step_count(&self) -> usize {
        match self {
            TimeAxis::Fixed { step_count, .. } => *step_count,
            TimeAxis::Variable { durations, .. } => durations.len(),
        }
    }

    pub fn is_equidistant(&self) -> bool {
        matches!(self, TimeAxis::Fixed { .. })
    }

    /// Duration of step `index`, in seconds
    pub fn duration(&self, index: usize) -> Option<f64> {
        if index >= self.step_count() {
            return None;
        }
        match self {
            TimeAxis::Fixed { step_duration, .. } => Some(*step_duration),
            TimeAxis::Variable { durations, .. } => Some(durations[index]),
        }
    }

    /// Seconds from the start of the axis to step `index`
    pub fn offset(&self, index: usize) -> f64 {
        match self {
            TimeAxis::Fixed { step_duration, .. } => index as f64 * step_duration,
            TimeAxis::Variable { durations, .. } => {
                durations.iter().take(index).sum::<f64>()
            }
        }
    }

    /// The time `offset` seconds after the start, or `InvalidTimeAxis` if it can't be represented
    fn at(&self, offset: f64) -> Result<NaiveDateTime> {
        seconds(offset)
            .and_then(|span| self.start().checked_add_signed(span))
            .ok_or_else(|| {
                Error::InvalidTimeAxis(format!(
                    "{offset} seconds after {} is out of range",
                    self.start()
                ))
            })
    }

    /// Time of step `index`
    ///
    /// `None` if there is no such step, or its time is out of range for an unvalidated axis.
    pub fn get(&self, index: usize) -> Option<NaiveDateTime> {
        if index < self.step_count() {
            self.at(self.offset(index)).ok()
        } else {
            None
        }
    }

    /// Times of all steps
    pub fn times(&self) -> Result<Vec<NaiveDateTime>> {
        match self {
            TimeAxis::Fixed {
                step_duration,
                step_count,
                ..
            } => (0..*step_count)
                .map(|i| self.at(i as f64 * step_duration))
                .collect(),
            TimeAxis::Variable { durations, .. } => {
                let mut offset = 0.0;
                durations
                    .iter()
                    .map(|duration| {
                        let time = self.at(offset);
                        offset += duration;
                        time
                    })
                    .collect()
            }
        }
    }

    /// Time of the last step, or the start if there are no steps
    pub fn end_time(&self) -> Result<NaiveDateTime> {
        match self.step_count() {
            0 => Ok(self.start()),
            n => self.at(self.offset(n - 1)),
        }
    }

    /// The axis covering steps `start..stop` of this one.
    pub fn slice(&self, start: usize, stop: usize) -> Result<Self> {
        if stop > self.step_count() {
            return Err(Error::TimestepOutOfRange {
                timestep: stop.saturating_sub(1),
                step_count: self.step_count(),
            });
        }
        let start = start.min(stop);
        let new_start = self.at(self.offset(start))?;

        Ok(match self {
            TimeAxis::Fixed { step_duration, .. } => TimeAxis::Fixed {
                start: new_start,
                step_duration: *step_duration,
                step_count: stop - start,
            },
            TimeAxis::Variable { durations, .. } => TimeAxis::Variable {
                start: new_start,
                durations: durations[start..stop].to_vec(),
            },
        })
    }

    /// Same axis with only the first `count` steps
    pub(crate) fn truncate(&self, count: usize) -> Self {
        match self {
            TimeAxis::Fixed {
                start,
                step_duration,
                ..
            } => TimeAxis::Fixed {
                start: *start,
                step_duration: *step_duration,
                step_count: count,
            },
            TimeAxis::Variable { start, durations } => TimeAxis::Variable {
                start: *start,
                durations: durations[..count.min(durations.len())].to_vec(),
            },
        }
    }
}

fn check_duration(duration: f64, step: Option<usize>) -> Result<()> {
    if duration.is_finite() && duration > 0.0 {
        return Ok(());
    }

    Err(Error::InvalidTimeAxis(match step {
        Some(step) => format!("duration of step {step} must be positive, got {duration}"),
        None => format!("step duration must be positive, got {duration}"),
    }))
}

/// Time span of `seconds`, to the microsecond. `None` if it doesn't fit.
pub(crate) fn seconds(seconds: f64) -> Option<Duration> {
    let micros = (seconds * 1e6).round();
    if micros.is_finite() && micros.abs() < i64::MAX as f64 {
        Some(Duration::microseconds(micros as i64))
    } else {
        None
    }
}

/// Milliseconds since the Unix epoch, as stored in a file
pub(crate) fn to_millis(time: NaiveDateTime) -> i64 {
    time.and_utc().timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|time| time.naive_utc())
}
