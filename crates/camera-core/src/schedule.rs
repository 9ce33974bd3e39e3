//! Scheduled capture window

use chrono::{Local, NaiveTime};
use tracing::warn;

/// Daily time range during which capture is permitted
///
/// Supports overnight spans (start > end, e.g. 17:00-09:00): within the
/// window means at-or-after start or strictly before end. Same-day spans
/// are start-inclusive, end-exclusive. Disabled scheduling means always
/// within the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    enabled: bool,
    start: NaiveTime,
    end: NaiveTime,
}

impl ScheduleWindow {
    /// A window that never restricts capture
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    /// Build a window from "HH:MM" strings
    ///
    /// Unparseable times disable the window (capture is allowed) rather
    /// than blocking capture on a config typo.
    pub fn parse(enabled: bool, start: &str, end: &str) -> Self {
        if !enabled {
            return Self::disabled();
        }
        let parse = |s: &str| NaiveTime::parse_from_str(s, "%H:%M");
        match (parse(start), parse(end)) {
            (Ok(start), Ok(end)) => Self {
                enabled: true,
                start,
                end,
            },
            _ => {
                warn!(start, end, "invalid schedule times, scheduling disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `time` falls inside the capture window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if !self.enabled {
            return true;
        }
        if self.start > self.end {
            // Overnight span, e.g. 17:00-09:00
            time >= self.start || time < self.end
        } else {
            self.start <= time && time < self.end
        }
    }

    /// Whether the local wall clock is currently inside the window
    pub fn contains_now(&self) -> bool {
        self.contains(Local::now().time())
    }
}
