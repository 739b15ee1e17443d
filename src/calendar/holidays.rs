use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::{CalendarId, CalendarStore, DayId, Interval};
use crate::error::CalendarError;

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Serialisable description of a root calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    working_days: Vec<Weekday>,
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    #[serde(default = "default_intervals")]
    intervals: Vec<Interval>,
}

fn default_intervals() -> Vec<Interval> {
    vec![Interval::from_hours(9, 17)]
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self::new(ALL_WEEKDAYS[..5].iter().copied(), Vec::new())
    }
}

impl CalendarConfig {
    pub fn new<I, J>(working_days: I, holidays: J) -> Self
    where
        I: IntoIterator<Item = Weekday>,
        J: IntoIterator<Item = NaiveDate>,
    {
        let mut working: Vec<Weekday> = working_days.into_iter().collect();
        working.sort_by_key(|wd| wd.num_days_from_monday());
        working.dedup_by(|a, b| a.num_days_from_monday() == b.num_days_from_monday());

        let mut holidays: Vec<NaiveDate> = holidays.into_iter().collect();
        holidays.sort();
        holidays.dedup();

        Self {
            working_days: working,
            holidays,
            intervals: default_intervals(),
        }
    }

    pub fn with_intervals(mut self, intervals: Vec<Interval>) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn working_days(&self) -> &[Weekday] {
        &self.working_days
    }

    pub fn holidays(&self) -> &[NaiveDate] {
        &self.holidays
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }
}

impl CalendarStore {
    pub fn from_config(
        config: &CalendarConfig,
        max_scan_days: u32,
    ) -> Result<Self, CalendarError> {
        let mut store = Self::new(max_scan_days);
        store.set_working_days(CalendarId::ROOT, config.working_days())?;
        store.set_day_intervals(CalendarId::ROOT, DayId::WORK, config.intervals.clone())?;
        store.add_holidays(CalendarId::ROOT, config.holidays())?;
        Ok(store)
    }

    /// Describes the root calendar. Only built-in day types are captured.
    pub fn to_config(&self) -> Result<CalendarConfig, CalendarError> {
        let root = self.calendar(CalendarId::ROOT)?;
        let working = ALL_WEEKDAYS
            .iter()
            .copied()
            .filter(|wd| root.week[wd.num_days_from_monday() as usize] == DayId::WORK);
        let holidays = root
            .overrides
            .iter()
            .filter(|(_, day)| **day == DayId::NONWORK)
            .map(|(date, _)| *date);
        let intervals = self.intervals_for(DayId::WORK, CalendarId::ROOT)?;
        Ok(CalendarConfig::new(working, holidays).with_intervals(intervals))
    }

    /// Set custom working days (e.g., Mon-Sat for 6-day weeks)
    pub fn set_working_days(
        &mut self,
        calendar: CalendarId,
        days: &[Weekday],
    ) -> Result<(), CalendarError> {
        for weekday in ALL_WEEKDAYS {
            let day = if days.contains(&weekday) {
                DayId::WORK
            } else {
                DayId::NONWORK
            };
            self.set_default_day(calendar, weekday, day)?;
        }
        Ok(())
    }

    pub fn add_holiday(&mut self, calendar: CalendarId, date: NaiveDate) -> Result<(), CalendarError> {
        self.set_day(calendar, date, DayId::NONWORK)
    }

    pub fn add_holidays(
        &mut self,
        calendar: CalendarId,
        dates: &[NaiveDate],
    ) -> Result<(), CalendarError> {
        for date in dates {
            self.add_holiday(calendar, *date)?;
        }
        Ok(())
    }

    /// Add the same custom holiday for multiple years
    /// Example: Add Dec 24 (Christmas Eve) for 2025-2030
    pub fn add_recurring_holiday(
        &mut self,
        calendar: CalendarId,
        month: u32,
        day: u32,
        start_year: i32,
        end_year: i32,
    ) -> Result<(), CalendarError> {
        for year in start_year..=end_year {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                self.add_holiday(calendar, date)?;
            }
        }
        Ok(())
    }

    /// US federal holidays for a range of years (inclusive).
    pub fn add_us_holidays(
        &mut self,
        calendar: CalendarId,
        start_year: i32,
        end_year: i32,
    ) -> Result<(), CalendarError> {
        let (start, end) = if start_year <= end_year {
            (start_year, end_year)
        } else {
            (end_year, start_year)
        };
        for year in start..=end {
            let dates = us_holidays(year);
            self.add_holidays(calendar, &dates)?;
        }
        Ok(())
    }
}

fn us_holidays(year: i32) -> Vec<NaiveDate> {
    [
        NaiveDate::from_ymd_opt(year, 1, 1),
        // Martin Luther King Jr. Day (3rd Monday in January)
        nth_weekday(year, 1, Weekday::Mon, 3),
        // Presidents' Day (3rd Monday in February)
        nth_weekday(year, 2, Weekday::Mon, 3),
        // Memorial Day (last Monday in May)
        last_weekday(year, 5, Weekday::Mon),
        NaiveDate::from_ymd_opt(year, 7, 4),
        // Labor Day (1st Monday in September)
        nth_weekday(year, 9, Weekday::Mon, 1),
        // Columbus Day (2nd Monday in October)
        nth_weekday(year, 10, Weekday::Mon, 2),
        NaiveDate::from_ymd_opt(year, 11, 11),
        // Thanksgiving (4th Thursday in November)
        nth_weekday(year, 11, Weekday::Thu, 4),
        NaiveDate::from_ymd_opt(year, 12, 25),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let mut date = NaiveDate::from_ymd_opt(year, month, 1)?;
    let mut count = 0;
    while date.month() == month {
        if date.weekday() == weekday {
            count += 1;
            if count == n {
                return Some(date);
            }
        }
        date = date + Duration::days(1);
    }
    None
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut date = first_of_next.pred_opt()?;
    while date.weekday() != weekday {
        date = date.pred_opt()?;
    }
    Some(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn us_holidays_cover_floating_dates() {
        let dates = us_holidays(2025);
        assert!(dates.contains(&d(2025, 1, 20)));
        assert!(dates.contains(&d(2025, 5, 26)));
        assert!(dates.contains(&d(2025, 11, 27)));
        assert_eq!(dates.len(), 10);
    }

    #[test]
    fn config_round_trips_through_store() {
        let config = CalendarConfig::new(
            [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Sat],
            [d(2025, 7, 3), d(2025, 6, 19)],
        )
        .with_intervals(vec![Interval::from_hours(8, 12), Interval::from_hours(13, 17)]);
        let store = CalendarStore::from_config(&config, 365).unwrap();

        assert!(!store.is_working_date(d(2025, 6, 20), CalendarId::ROOT).unwrap());
        assert!(store.is_working_date(d(2025, 6, 21), CalendarId::ROOT).unwrap());
        assert!(!store.is_working_date(d(2025, 6, 19), CalendarId::ROOT).unwrap());

        let recreated = store.to_config().unwrap();
        assert_eq!(recreated, config);
    }
}
