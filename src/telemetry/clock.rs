use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

/// Current wall-clock time as fractional unix seconds
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Formats unix seconds as local `YYYY-MM-DD HH:MM:SS`
pub fn readable_time(ts: f64) -> String {
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9) as u32;
    match Local.timestamp_opt(secs, nanos).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// Stamps samples for one sensor. Timestamps never go backwards, even if
/// the host clock is stepped back between two ticks.
#[derive(Debug, Default)]
pub struct SampleClock {
    last: Option<f64>,
}

impl SampleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps using the current wall clock
    pub fn stamp(&mut self) -> f64 {
        self.stamp_at(now_unix())
    }

    /// Stamps using `wall` as the current time
    pub fn stamp_at(&mut self, wall: f64) -> f64 {
        let ts = match self.last {
            Some(last) if wall < last => last,
            _ => wall,
        };
        self.last = Some(ts);
        ts
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}
