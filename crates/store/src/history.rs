use chrono::{NaiveDate, NaiveDateTime, Timelike};

use hvacvibe_protocol::HistoryPoint;
use hvacvibe_protocol::constants::MINUTES_PER_DAY;

/// Fixed-size rolling history for one calendar day, keyed by minute-of-day.
///
/// The day is split into `MINUTES_PER_DAY / bucket_minutes` slots. A write
/// overwrites the slot for its bucket; a write stamped with a later calendar
/// day clears every slot first, and one stamped with an earlier day is
/// ignored. When the clock steps back within the day, slots after the new
/// write are cleared, so the last point is always the latest reading.
/// Reads return points in ascending minute order.
#[derive(Debug, Clone)]
pub struct DayHistory {
    slots: Vec<Option<f64>>,
    bucket_minutes: u16,
    day: Option<NaiveDate>,
    /// Slot of the most recent write.
    head: Option<usize>,
}

impl DayHistory {
    /// Creates an empty history. `bucket_minutes` is clamped to `1..=1440`.
    pub fn new(bucket_minutes: u16) -> Self {
        let bucket_minutes = bucket_minutes.clamp(1, MINUTES_PER_DAY);
        let len = MINUTES_PER_DAY.div_ceil(bucket_minutes) as usize;
        Self {
            slots: vec![None; len],
            bucket_minutes,
            day: None,
            head: None,
        }
    }

    /// Records `vibration_rms` for the bucket containing `ts`.
    pub fn record(&mut self, ts: NaiveDateTime, vibration_rms: f64) {
        let date = ts.date();
        match self.day {
            Some(day) if date < day => {
                tracing::debug!(%date, %day, "history write for an earlier day ignored");
                return;
            }
            Some(day) if date == day => {}
            previous => {
                if previous.is_some() {
                    tracing::debug!(%date, "history day rollover");
                }
                self.clear();
                self.day = Some(date);
            }
        }

        let minute = (ts.hour() * 60 + ts.minute()) as u16;
        let idx = (minute / self.bucket_minutes) as usize;
        if idx >= self.slots.len() {
            return;
        }
        if self.head.is_some_and(|head| idx < head) {
            tracing::debug!(minute, "clock stepped back, dropping later history");
            self.slots.iter_mut().skip(idx + 1).for_each(|s| *s = None);
        }
        self.slots[idx] = Some(vibration_rms);
        self.head = Some(idx);
    }

    /// Points for the current day in ascending minute order.
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.map(|rms| HistoryPoint {
                    minute_of_day: idx as u16 * self.bucket_minutes,
                    vibration_rms: rms,
                })
            })
            .collect()
    }

    /// Number of populated buckets.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Calendar day the stored points belong to.
    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.day = None;
        self.head = None;
    }
}
