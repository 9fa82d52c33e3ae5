use serde::Serialize;

use super::error::ScheduleError;
use super::types::SlotTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffGridPolicy {
    Reject,
    Round,
}

impl OffGridPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reject" => Some(OffGridPolicy::Reject),
            "round" => Some(OffGridPolicy::Round),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OffGridPolicy::Reject => "reject",
            OffGridPolicy::Round => "round",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub period: u32,
    pub time: SlotTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartSlot {
    pub period: u32,
    /// Set when the submitted time was moved onto the grid.
    pub rounded_to: Option<SlotTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalog {
    first: u16,
    slot_minutes: u16,
    count: u32,
}

impl SlotCatalog {
    pub fn new(first: SlotTime, last: SlotTime, slot_minutes: u16) -> Result<Self, ScheduleError> {
        if slot_minutes == 0 {
            return Err(ScheduleError::validation("slotMinutes", "must be positive"));
        }
        if last < first {
            return Err(ScheduleError::validation(
                "lastSlot",
                "must not be earlier than firstSlot",
            ));
        }
        let window = last.minutes() - first.minutes();
        if window % slot_minutes != 0 {
            return Err(ScheduleError::validation(
                "slotMinutes",
                format!("must divide the {first}..{last} window evenly"),
            ));
        }
        if u32::from(last.minutes()) + u32::from(slot_minutes) > 24 * 60 {
            return Err(ScheduleError::validation(
                "lastSlot",
                "last slot must end by midnight",
            ));
        }
        Ok(SlotCatalog {
            first: first.minutes(),
            slot_minutes,
            count: u32::from(window / slot_minutes) + 1,
        })
    }

    pub fn slot_minutes(&self) -> u16 {
        self.slot_minutes
    }

    pub fn period_count(&self) -> u32 {
        self.count
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (1..=self.count).filter_map(move |p| {
            self.time_for_period(p).map(|time| Slot { period: p, time })
        })
    }

    /// Exact match only.
    pub fn period_for_time(&self, time: SlotTime) -> Option<u32> {
        let m = time.minutes();
        if m < self.first {
            return None;
        }
        let offset = m - self.first;
        if offset % self.slot_minutes != 0 {
            return None;
        }
        let period = u32::from(offset / self.slot_minutes) + 1;
        (period <= self.count).then_some(period)
    }

    pub fn time_for_period(&self, period: u32) -> Option<SlotTime> {
        if period == 0 || period > self.count {
            return None;
        }
        let m = u32::from(self.first) + (period - 1) * u32::from(self.slot_minutes);
        SlotTime::from_minutes(m as u16)
    }

    /// Nearest slot to `time`; ties go to the earlier slot. `None` outside
    /// the window `[first, last + slot_minutes)`.
    pub fn nearest_period(&self, time: SlotTime) -> Option<u32> {
        let m = u32::from(time.minutes());
        let first = u32::from(self.first);
        let step = u32::from(self.slot_minutes);
        if m < first || m >= first + self.count * step {
            return None;
        }
        let offset = m - first;
        let below = offset / step;
        let idx = if (offset % step) * 2 > step { below + 1 } else { below };
        Some((idx + 1).min(self.count))
    }

    pub fn resolve_start(
        &self,
        time: SlotTime,
        policy: OffGridPolicy,
    ) -> Result<StartSlot, ScheduleError> {
        if let Some(period) = self.period_for_time(time) {
            return Ok(StartSlot {
                period,
                rounded_to: None,
            });
        }
        match policy {
            OffGridPolicy::Reject => Err(ScheduleError::OffGrid {
                time: time.to_string(),
            }),
            OffGridPolicy::Round => match self.nearest_period(time) {
                Some(period) => Ok(StartSlot {
                    period,
                    rounded_to: self.time_for_period(period),
                }),
                None => Err(ScheduleError::OffGrid {
                    time: time.to_string(),
                }),
            },
        }
    }
}

impl Default for SlotCatalog {
    fn default() -> Self {
        SlotCatalog {
            first: 8 * 60,
            slot_minutes: 30,
            count: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> SlotTime {
        s.parse().expect("time")
    }

    #[test]
    fn default_catalog_covers_operating_day() {
        let c = SlotCatalog::default();
        assert_eq!(c.period_count(), 30);
        assert_eq!(c.time_for_period(1), Some(t("08:00")));
        assert_eq!(c.time_for_period(30), Some(t("22:30")));
        assert_eq!(c.time_for_period(31), None);
        assert_eq!(c.time_for_period(0), None);
        assert_eq!(
            SlotCatalog::new(t("08:00"), t("22:30"), 30).expect("catalog"),
            c
        );
    }

    #[test]
    fn period_round_trips_for_every_slot() {
        let c = SlotCatalog::default();
        for slot in c.slots() {
            assert_eq!(c.period_for_time(slot.time), Some(slot.period));
            assert_eq!(c.time_for_period(slot.period), Some(slot.time));
        }
    }

    #[test]
    fn lookup_is_exact_only() {
        let c = SlotCatalog::default();
        assert_eq!(c.period_for_time(t("09:00")), Some(3));
        assert_eq!(c.period_for_time(t("09:15")), None);
        assert_eq!(c.period_for_time(t("07:30")), None);
        assert_eq!(c.period_for_time(t("23:00")), None);
    }

    #[test]
    fn off_grid_start_is_rejected_or_rounded() {
        let c = SlotCatalog::default();
        let e = c.resolve_start(t("09:10"), OffGridPolicy::Reject).unwrap_err();
        assert!(matches!(e, ScheduleError::OffGrid { .. }));

        let s = c.resolve_start(t("09:10"), OffGridPolicy::Round).expect("round");
        assert_eq!(s.period, 3);
        assert_eq!(s.rounded_to, Some(t("09:00")));

        let s = c.resolve_start(t("09:20"), OffGridPolicy::Round).expect("round");
        assert_eq!(s.period, 4);

        let s = c.resolve_start(t("09:15"), OffGridPolicy::Round).expect("round");
        assert_eq!(s.period, 3);

        let s = c.resolve_start(t("22:50"), OffGridPolicy::Round).expect("round");
        assert_eq!(s.period, 30);

        let s = c.resolve_start(t("10:00"), OffGridPolicy::Round).expect("exact");
        assert_eq!(s, StartSlot { period: 5, rounded_to: None });
    }

    #[test]
    fn rounding_never_pulls_a_start_into_the_window() {
        let c = SlotCatalog::default();
        for time in ["03:00", "07:59", "07:45", "23:00", "23:59"] {
            let e = c.resolve_start(t(time), OffGridPolicy::Round).unwrap_err();
            assert_eq!(e, ScheduleError::OffGrid { time: time.into() }, "{}", time);
        }
        assert_eq!(c.nearest_period(t("07:59")), None);
        assert_eq!(c.nearest_period(t("08:00")), Some(1));
        assert_eq!(c.nearest_period(t("22:59")), Some(30));
        assert_eq!(c.nearest_period(t("23:00")), None);
    }

    #[test]
    fn window_must_divide_evenly() {
        assert!(SlotCatalog::new(t("08:00"), t("09:10"), 30).is_err());
        assert!(SlotCatalog::new(t("10:00"), t("09:00"), 30).is_err());
        assert!(SlotCatalog::new(t("23:30"), t("23:45"), 15).is_ok());
        assert!(SlotCatalog::new(t("23:00"), t("23:45"), 45).is_err());
        let c = SlotCatalog::new(t("07:00"), t("08:00"), 20).expect("catalog");
        assert_eq!(c.period_count(), 4);
    }
}
