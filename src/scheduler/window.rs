//! Optimal execution window planning.
//!
//! With a remembered quiet-period anchor (the start of the user's rest
//! period) the window opens `anchor_offset` after the anchor and lasts
//! `window_length`. Without one, a fixed daily window in local time is used
//! (02:00-04:00 by default).

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;
use crate::error::{CadenceError, Result};

/// Where a window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowSource {
    Anchor,
    Default,
}

/// Half-open interval `[start, end)` preferred for power-hungry work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimalWindow {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub source: WindowSource,
}

impl OptimalWindow {
    pub fn contains(&self, at: DateTime<Local>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Computes the current optimal window from the quiet anchor.
#[derive(Debug, Clone)]
pub struct WindowPlanner {
    default_start: NaiveTime,
    default_end: NaiveTime,
    anchor_offset: TimeDelta,
    window_length: TimeDelta,
    anchor: Option<DateTime<Utc>>,
}

impl Default for WindowPlanner {
    fn default() -> Self {
        Self {
            default_start: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            default_end: NaiveTime::from_hms_opt(4, 0, 0).unwrap_or(NaiveTime::MIN),
            anchor_offset: TimeDelta::hours(3),
            window_length: TimeDelta::hours(2),
            anchor: None,
        }
    }
}

impl WindowPlanner {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let default_start = config
            .default_start_time()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        let default_end = config
            .default_end_time()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        if config.window_length_minutes == 0 {
            return Err(CadenceError::Config("window length must be > 0".to_string()));
        }
        Ok(Self {
            default_start,
            default_end,
            anchor_offset: TimeDelta::minutes(config.anchor_offset_minutes as i64),
            window_length: TimeDelta::minutes(config.window_length_minutes as i64),
            anchor: None,
        })
    }

    pub fn with_anchor(mut self, anchor: Option<DateTime<Utc>>) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }

    pub fn set_anchor(&mut self, anchor: DateTime<Utc>) {
        self.anchor = Some(anchor);
    }

    /// Window for the remembered anchor, as seen at `now`.
    pub fn current_window(&self, now: DateTime<Local>) -> OptimalWindow {
        self.compute_window(self.anchor.map(|a| a.with_timezone(&Local)), now)
    }

    pub fn is_in_window(&self, now: DateTime<Local>) -> bool {
        self.current_window(now).contains(now)
    }

    /// The window that contains `now`, or the next one to open.
    pub fn compute_window(&self, anchor: Option<DateTime<Local>>, now: DateTime<Local>) -> OptimalWindow {
        match anchor {
            Some(anchor) => {
                let mut start = anchor + self.anchor_offset;
                let mut end = start + self.window_length;
                if end <= now {
                    // Same time of day, rolled onto the current cycle.
                    let days = TimeDelta::days((now - end).num_days() + 1);
                    start += days;
                    end += days;
                }
                OptimalWindow {
                    start,
                    end,
                    source: WindowSource::Anchor,
                }
            }
            None => {
                let today = now.date_naive();
                let candidates = [today.pred_opt(), Some(today), today.succ_opt()];
                candidates
                    .into_iter()
                    .flatten()
                    .map(|date| self.default_window_on(date))
                    .find(|window| window.end > now)
                    .unwrap_or_else(|| self.default_window_on(today))
            }
        }
    }

    fn default_window_on(&self, date: NaiveDate) -> OptimalWindow {
        let start = local_at(date, self.default_start);
        let end_date = if self.default_end <= self.default_start {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        OptimalWindow {
            start,
            end: local_at(end_date, self.default_end),
            source: WindowSource::Default,
        }
    }
}

/// Resolve a wall-clock time, stepping over DST gaps.
fn local_at(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    let naive = date.and_time(time);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => Local
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest()
            .unwrap_or_else(|| Local.from_utc_datetime(&naive)),
    }
}
