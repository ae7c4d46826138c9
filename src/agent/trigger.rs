//! Occurrence math for persisted schedule entries, in local wall-clock time.

use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

use crate::agent::store::ScheduleEntry;
use crate::models::{AlarmTime, RepeatDays};

/// Outcome of looking at one entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    NotYet,
    Fire(NaiveDateTime),
    /// Found too long after the occurrence to be worth ringing.
    Missed(NaiveDateTime),
}

fn occurs_on(repeat_days: &RepeatDays, date: NaiveDate) -> bool {
    repeat_days.is_one_shot() || repeat_days.contains(date.weekday())
}

fn at(date: NaiveDate, time: AlarmTime) -> NaiveDateTime {
    date.and_time(time.to_naive_time())
}

/// Latest occurrence at or before `now`, looking back one week.
pub fn latest_occurrence_at_or_before(
    time: AlarmTime,
    repeat_days: &RepeatDays,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    (0..=7u64)
        .filter_map(|back| now.date().checked_sub_days(Days::new(back)))
        .filter(|date| occurs_on(repeat_days, *date))
        .map(|date| at(date, time))
        .find(|occurrence| *occurrence <= now)
}

/// First occurrence strictly after `after`.
pub fn next_occurrence_after(
    time: AlarmTime,
    repeat_days: &RepeatDays,
    after: NaiveDateTime,
) -> Option<NaiveDateTime> {
    (0..=7u64)
        .filter_map(|ahead| after.date().checked_add_days(Days::new(ahead)))
        .filter(|date| occurs_on(repeat_days, *date))
        .map(|date| at(date, time))
        .find(|occurrence| *occurrence > after)
}

fn classify(occurrence: NaiveDateTime, now: NaiveDateTime, grace: Duration) -> Due {
    let late = (now - occurrence).to_std().unwrap_or(Duration::ZERO);
    if late > grace {
        Due::Missed(occurrence)
    } else {
        Due::Fire(occurrence)
    }
}

pub fn evaluate(entry: &ScheduleEntry, now: NaiveDateTime, grace: Duration) -> Due {
    if !entry.enabled {
        return Due::NotYet;
    }

    if entry.is_one_shot() {
        if entry.last_fired_at.is_some() {
            return Due::NotYet;
        }
        return match next_occurrence_after(entry.time, &entry.repeat_days, entry.armed_at) {
            Some(occurrence) if occurrence <= now => classify(occurrence, now, grace),
            _ => Due::NotYet,
        };
    }

    let Some(occurrence) = latest_occurrence_at_or_before(entry.time, &entry.repeat_days, now)
    else {
        return Due::NotYet;
    };
    let already_fired = entry
        .last_fired_at
        .is_some_and(|fired| occurrence <= fired);
    if occurrence <= entry.armed_at || already_fired {
        return Due::NotYet;
    }
    classify(occurrence, now, grace)
}

/// Next occurrence still pending after `now`, if any.
pub fn next_pending(entry: &ScheduleEntry, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !entry.enabled {
        return None;
    }
    if entry.is_one_shot() {
        if entry.last_fired_at.is_some() {
            return None;
        }
        return next_occurrence_after(entry.time, &entry.repeat_days, entry.armed_at)
            .filter(|occurrence| *occurrence > now);
    }
    next_occurrence_after(entry.time, &entry.repeat_days, now.max(entry.armed_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduledAlarm;
    use chrono::Weekday;

    // 2026-06-01 is a Monday.
    fn dt(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn entry(time: &str, repeat_days: RepeatDays, armed_at: NaiveDateTime) -> ScheduleEntry {
        let alarm = ScheduledAlarm {
            alarm_id: "a".into(),
            label: "wake".into(),
            time: time.parse().unwrap(),
            repeat_days,
            enabled: true,
        };
        ScheduleEntry::armed(&alarm, armed_at)
    }

    const GRACE: Duration = Duration::from_secs(600);

    #[test]
    fn weekday_alarm_skips_weekend() {
        let days = RepeatDays::weekdays();
        let time = AlarmTime::new(7, 0).unwrap();
        // Friday 5th after 07:00 -> Monday 8th.
        assert_eq!(
            next_occurrence_after(time, &days, dt(5, 8, 0)),
            Some(dt(8, 7, 0))
        );
        // Sunday 7th -> latest was Friday 5th.
        assert_eq!(
            latest_occurrence_at_or_before(time, &days, dt(7, 12, 0)),
            Some(dt(5, 7, 0))
        );
    }

    #[test]
    fn single_weekday_wraps_a_full_week() {
        let days = RepeatDays::from_weekdays([Weekday::Mon]);
        let time = AlarmTime::new(6, 0).unwrap();
        assert_eq!(
            next_occurrence_after(time, &days, dt(1, 6, 0)),
            Some(dt(8, 6, 0))
        );
    }

    #[test]
    fn one_shot_fires_once_after_arming() {
        let mut alarm = entry("07:00", RepeatDays::once(), dt(1, 22, 0));
        assert_eq!(evaluate(&alarm, dt(2, 6, 59), GRACE), Due::NotYet);
        assert_eq!(evaluate(&alarm, dt(2, 7, 0), GRACE), Due::Fire(dt(2, 7, 0)));

        alarm.last_fired_at = Some(dt(2, 7, 0));
        assert_eq!(evaluate(&alarm, dt(3, 7, 0), GRACE), Due::NotYet);
        assert_eq!(next_pending(&alarm, dt(2, 7, 1)), None);
    }

    #[test]
    fn one_shot_armed_after_time_waits_for_tomorrow() {
        let alarm = entry("07:00", RepeatDays::once(), dt(1, 7, 30));
        assert_eq!(evaluate(&alarm, dt(1, 8, 0), GRACE), Due::NotYet);
        assert_eq!(next_pending(&alarm, dt(1, 8, 0)), Some(dt(2, 7, 0)));
    }

    #[test]
    fn repeating_alarm_fires_each_day_once() {
        let mut alarm = entry("07:00", RepeatDays::every_day(), dt(1, 22, 0));
        assert_eq!(evaluate(&alarm, dt(2, 7, 1), GRACE), Due::Fire(dt(2, 7, 0)));
        alarm.last_fired_at = Some(dt(2, 7, 0));
        assert_eq!(evaluate(&alarm, dt(2, 7, 5), GRACE), Due::NotYet);
        assert_eq!(evaluate(&alarm, dt(3, 7, 0), GRACE), Due::Fire(dt(3, 7, 0)));
        assert_eq!(next_pending(&alarm, dt(2, 7, 5)), Some(dt(3, 7, 0)));
    }

    #[test]
    fn late_discovery_beyond_grace_is_missed() {
        let alarm = entry("07:00", RepeatDays::every_day(), dt(1, 22, 0));
        assert_eq!(evaluate(&alarm, dt(2, 7, 10), GRACE), Due::Fire(dt(2, 7, 0)));
        assert_eq!(evaluate(&alarm, dt(2, 7, 11), GRACE), Due::Missed(dt(2, 7, 0)));
    }

    #[test]
    fn occurrence_before_arming_never_fires() {
        let alarm = entry("07:00", RepeatDays::every_day(), dt(2, 7, 0));
        assert_eq!(evaluate(&alarm, dt(2, 7, 5), GRACE), Due::NotYet);
        assert_eq!(next_pending(&alarm, dt(2, 7, 5)), Some(dt(3, 7, 0)));
    }
}
