use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::PollIntervals;

/// The three independently scheduled data domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollCategory {
    Weather,
    Rooms,
    HeatPump,
}

impl PollCategory {
    pub const ALL: [PollCategory; 3] =
        [PollCategory::Weather, PollCategory::Rooms, PollCategory::HeatPump];

    pub fn as_str(&self) -> &'static str {
        match self {
            PollCategory::Weather => "weather",
            PollCategory::Rooms => "rooms",
            PollCategory::HeatPump => "heatPump",
        }
    }
}

/// Wall-clock interval bookkeeping. A category is due when it has never run
/// or its interval has elapsed; returning true records the trigger time
/// immediately, so a slow or failing fetch cannot re-trigger the category.
pub struct IntervalScheduler {
    intervals: PollIntervals,
    last_run: Mutex<HashMap<PollCategory, i64>>,
}

impl IntervalScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            last_run: Mutex::new(HashMap::new()),
        }
    }

    pub fn intervals(&self) -> &PollIntervals {
        &self.intervals
    }

    pub fn interval_ms(&self, category: PollCategory) -> u64 {
        match category {
            PollCategory::Weather => self.intervals.weather_ms,
            PollCategory::Rooms => self.intervals.rooms_ms,
            PollCategory::HeatPump => self.intervals.heat_pump_ms,
        }
    }

    pub fn is_due(&self, category: PollCategory, now_millis: i64) -> bool {
        let mut last_run = self.last_run.lock().expect("last_run lock poisoned");
        let due = match last_run.get(&category) {
            Some(last) => now_millis - last >= self.interval_ms(category) as i64,
            None => true,
        };
        if due {
            last_run.insert(category, now_millis);
        }
        due
    }

    pub fn last_run_snapshot(&self) -> HashMap<PollCategory, i64> {
        self.last_run
            .lock()
            .expect("last_run lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> IntervalScheduler {
        IntervalScheduler::new(PollIntervals {
            weather_ms: 1_000,
            rooms_ms: 500,
            heat_pump_ms: 500,
        })
    }

    #[test]
    fn never_run_category_is_due() {
        let scheduler = scheduler();
        assert!(scheduler.is_due(PollCategory::Weather, 10));
    }

    #[test]
    fn second_call_within_interval_is_not_due() {
        let scheduler = scheduler();
        assert!(scheduler.is_due(PollCategory::Weather, 10));
        assert!(!scheduler.is_due(PollCategory::Weather, 10 + 999));
    }

    #[test]
    fn due_again_once_interval_has_elapsed() {
        let scheduler = scheduler();
        assert!(scheduler.is_due(PollCategory::Weather, 10));
        assert!(scheduler.is_due(PollCategory::Weather, 10 + 1_000));
    }

    #[test]
    fn trigger_time_is_recorded_on_the_due_call() {
        let scheduler = scheduler();
        assert!(scheduler.is_due(PollCategory::Rooms, 100));
        // lastRun was set to 100 even though no fetch has completed.
        assert_eq!(
            scheduler.last_run_snapshot().get(&PollCategory::Rooms),
            Some(&100)
        );
        assert!(!scheduler.is_due(PollCategory::Rooms, 400));
        assert!(scheduler.is_due(PollCategory::Rooms, 600));
    }

    #[test]
    fn categories_are_tracked_independently() {
        let scheduler = scheduler();
        assert!(scheduler.is_due(PollCategory::Weather, 0));
        assert!(scheduler.is_due(PollCategory::Rooms, 0));
        assert!(!scheduler.is_due(PollCategory::Weather, 600));
        assert!(scheduler.is_due(PollCategory::Rooms, 600));
    }
}
