//! Working-time calendars.
//!
//! - [`day`] holds the day-type registry and the built-in days.
//! - [`holidays`] adds date-based helpers (holidays, weekly patterns) and the
//!   serialisable [`CalendarConfig`].
//!
//! A [`CalendarStore`] owns every calendar of a project. Calendars form a tree:
//! a derived calendar answers with its own weekly pattern and date overrides
//! and falls back to its parent wherever it says "use base".

pub mod day;
pub mod holidays;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

pub use day::{Day, DayId, DayRegistry, Interval, SECONDS_PER_DAY, well_known_days};
pub use holidays::CalendarConfig;

pub const DEFAULT_MAX_SCAN_DAYS: u32 = 3_660;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarId(pub u32);

impl CalendarId {
    pub const ROOT: CalendarId = CalendarId(0);
}

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarNode {
    pub id: CalendarId,
    pub name: String,
    pub parent: Option<CalendarId>,
    /// Default day type per weekday, Monday first.
    pub week: [DayId; 7],
    pub overrides: BTreeMap<NaiveDate, DayId>,
    /// Calendar-specific working intervals for a day type.
    #[serde(default)]
    pub day_intervals: Vec<(DayId, Vec<Interval>)>,
}

impl CalendarNode {
    fn day_for(&self, date: NaiveDate) -> DayId {
        match self.overrides.get(&date) {
            Some(&day) => day,
            None => self.week[date.weekday().num_days_from_monday() as usize],
        }
    }

    fn own_intervals(&self, day: DayId) -> Option<&[Interval]> {
        self.day_intervals
            .iter()
            .find(|(id, _)| *id == day)
            .map(|(_, intervals)| intervals.as_slice())
    }

    fn referenced_days(&self) -> impl Iterator<Item = DayId> + '_ {
        self.week
            .iter()
            .copied()
            .chain(self.overrides.values().copied())
            .chain(self.day_intervals.iter().map(|(day, _)| *day))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarStore {
    days: DayRegistry,
    calendars: Vec<Option<CalendarNode>>,
    #[serde(default)]
    version: u64,
    max_scan_days: u32,
}

impl Default for CalendarStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SCAN_DAYS)
    }
}

fn seconds_of(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}

fn at(date: NaiveDate, seconds: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::seconds(i64::from(seconds))
}

impl CalendarStore {
    /// A store with one root calendar: Monday to Friday working, weekends off.
    pub fn new(max_scan_days: u32) -> Self {
        let mut week = [DayId::WORK; 7];
        week[5] = DayId::NONWORK;
        week[6] = DayId::NONWORK;
        let root = CalendarNode {
            id: CalendarId::ROOT,
            name: "Default".to_string(),
            parent: None,
            week,
            overrides: BTreeMap::new(),
            day_intervals: Vec::new(),
        };
        Self {
            days: DayRegistry::new(),
            calendars: vec![Some(root)],
            version: 0,
            max_scan_days: max_scan_days.max(1),
        }
    }

    /// Every day of the week works the standard intervals.
    pub fn all_working(max_scan_days: u32) -> Self {
        let mut store = Self::new(max_scan_days);
        if let Some(Some(root)) = store.calendars.get_mut(0) {
            root.week = [DayId::WORK; 7];
        }
        store
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn max_scan_days(&self) -> u32 {
        self.max_scan_days
    }

    pub fn set_max_scan_days(&mut self, days: u32) {
        self.max_scan_days = days.max(1);
        self.touch();
    }

    pub fn days(&self) -> &DayRegistry {
        &self.days
    }

    pub fn create_day(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        intervals: Vec<Interval>,
    ) -> Result<DayId, CalendarError> {
        let id = self.days.create_day(name, description, intervals)?;
        self.touch();
        Ok(id)
    }

    /// Drops the creator's reference to a day type.
    pub fn release_day(&mut self, day: DayId) -> Result<bool, CalendarError> {
        let destroyed = self.days.release(day)?;
        self.touch();
        Ok(destroyed)
    }

    pub fn set_day_type_intervals(
        &mut self,
        day: DayId,
        intervals: Vec<Interval>,
    ) -> Result<(), CalendarError> {
        self.days.set_intervals(day, intervals)?;
        self.touch();
        Ok(())
    }

    pub fn calendars(&self) -> impl Iterator<Item = &CalendarNode> {
        self.calendars.iter().flatten()
    }

    pub fn calendar(&self, id: CalendarId) -> Result<&CalendarNode, CalendarError> {
        self.calendars
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(CalendarError::UnknownCalendar(id))
    }

    fn calendar_mut(&mut self, id: CalendarId) -> Result<&mut CalendarNode, CalendarError> {
        self.calendars
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(CalendarError::UnknownCalendar(id))
    }

    pub fn contains(&self, id: CalendarId) -> bool {
        self.calendar(id).is_ok()
    }

    /// Derives a calendar whose days all defer to `parent`.
    pub fn derive_calendar(
        &mut self,
        name: impl Into<String>,
        parent: CalendarId,
    ) -> Result<CalendarId, CalendarError> {
        self.calendar(parent)?;
        let id = CalendarId(self.calendars.len() as u32);
        self.calendars.push(Some(CalendarNode {
            id,
            name: name.into(),
            parent: Some(parent),
            week: [DayId::USE_BASE; 7],
            overrides: BTreeMap::new(),
            day_intervals: Vec::new(),
        }));
        self.touch();
        Ok(id)
    }

    pub fn remove_calendar(&mut self, id: CalendarId) -> Result<(), CalendarError> {
        if id == CalendarId::ROOT {
            return Err(CalendarError::RootCalendar);
        }
        self.calendar(id)?;
        if self.calendars().any(|node| node.parent == Some(id)) {
            return Err(CalendarError::HasChildren(id));
        }
        if let Some(node) = self.calendars[id.0 as usize].take() {
            for day in node.referenced_days() {
                self.release_reference(day);
            }
        }
        self.touch();
        Ok(())
    }

    pub fn set_default_day(
        &mut self,
        calendar: CalendarId,
        weekday: chrono::Weekday,
        day: DayId,
    ) -> Result<(), CalendarError> {
        self.ensure_assignable(calendar, day)?;
        self.days.retain(day)?;
        let slot = weekday.num_days_from_monday() as usize;
        let previous = std::mem::replace(&mut self.calendar_mut(calendar)?.week[slot], day);
        self.release_reference(previous);
        self.touch();
        Ok(())
    }

    /// Overrides a single date, e.g. a holiday or a working Saturday.
    pub fn set_day(
        &mut self,
        calendar: CalendarId,
        date: NaiveDate,
        day: DayId,
    ) -> Result<(), CalendarError> {
        self.ensure_assignable(calendar, day)?;
        self.days.retain(day)?;
        let previous = self.calendar_mut(calendar)?.overrides.insert(date, day);
        if let Some(previous) = previous {
            self.release_reference(previous);
        }
        self.touch();
        Ok(())
    }

    pub fn clear_day(&mut self, calendar: CalendarId, date: NaiveDate) -> Result<(), CalendarError> {
        let previous = self.calendar_mut(calendar)?.overrides.remove(&date);
        if let Some(previous) = previous {
            self.release_reference(previous);
        }
        self.touch();
        Ok(())
    }

    /// Working intervals of a day type within one calendar (and its children).
    pub fn set_day_intervals(
        &mut self,
        calendar: CalendarId,
        day: DayId,
        intervals: Vec<Interval>,
    ) -> Result<(), CalendarError> {
        day::validate_intervals(&intervals)?;
        if !self.days.contains(day) {
            return Err(CalendarError::UnknownDay(day));
        }
        if self.calendar(calendar)?.own_intervals(day).is_none() {
            // The override keeps its day type alive.
            self.days.retain(day)?;
        }
        let node = self.calendar_mut(calendar)?;
        match node.day_intervals.iter_mut().find(|(id, _)| *id == day) {
            Some((_, existing)) => *existing = intervals,
            None => node.day_intervals.push((day, intervals)),
        }
        self.touch();
        Ok(())
    }

    fn ensure_assignable(&self, calendar: CalendarId, day: DayId) -> Result<(), CalendarError> {
        let node = self.calendar(calendar)?;
        if !self.days.contains(day) {
            return Err(CalendarError::UnknownDay(day));
        }
        if node.parent.is_none() && day == DayId::USE_BASE {
            // The root has nothing to defer to.
            return Err(CalendarError::UnknownDay(day));
        }
        Ok(())
    }

    fn release_reference(&mut self, day: DayId) {
        if !day.is_built_in() {
            // A calendar only ever holds references it retained.
            let _ = self.days.release(day);
        }
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    /// Resolves the day type of `date` by walking up the override chain.
    pub fn effective_day(
        &self,
        date: NaiveDate,
        calendar: CalendarId,
    ) -> Result<DayId, CalendarError> {
        let mut current = Some(calendar);
        while let Some(id) = current {
            let node = self.calendar(id)?;
            let day = node.day_for(date);
            if day != DayId::USE_BASE {
                return Ok(day);
            }
            current = node.parent;
        }
        Ok(DayId::NONWORK)
    }

    /// Ordered working intervals of a day type as seen from `calendar`.
    pub fn intervals_for(
        &self,
        day: DayId,
        calendar: CalendarId,
    ) -> Result<Vec<Interval>, CalendarError> {
        let mut current = Some(calendar);
        while let Some(id) = current {
            let node = self.calendar(id)?;
            if let Some(intervals) = node.own_intervals(day) {
                return Ok(intervals.to_vec());
            }
            current = node.parent;
        }
        self.days
            .get(day)
            .map(|d| d.intervals.clone())
            .ok_or(CalendarError::UnknownDay(day))
    }

    pub fn intervals_on(
        &self,
        date: NaiveDate,
        calendar: CalendarId,
    ) -> Result<Vec<Interval>, CalendarError> {
        let day = self.effective_day(date, calendar)?;
        self.intervals_for(day, calendar)
    }

    pub fn is_working_date(&self, date: NaiveDate, calendar: CalendarId) -> Result<bool, CalendarError> {
        Ok(!self.intervals_on(date, calendar)?.is_empty())
    }

    fn unschedulable(&self, calendar: CalendarId, from: NaiveDateTime) -> CalendarError {
        CalendarError::Unschedulable {
            calendar,
            from,
            horizon_days: self.max_scan_days,
        }
    }

    /// Adds working time to `from`, skipping non-working intervals.
    ///
    /// Returns the earliest instant at which `work_seconds` of working time
    /// have elapsed. Negative work is subtracted instead.
    pub fn add_duration(
        &self,
        from: NaiveDateTime,
        work_seconds: i64,
        calendar: CalendarId,
    ) -> Result<NaiveDateTime, CalendarError> {
        if work_seconds == 0 {
            return Ok(from);
        }
        if work_seconds < 0 {
            return self.subtract_duration(from, -work_seconds, calendar);
        }
        let mut remaining = work_seconds;
        let mut date = from.date();
        let mut offset = seconds_of(from.time());
        let mut idle_days = 0;
        loop {
            let mut worked_today = false;
            for interval in self.intervals_on(date, calendar)? {
                if interval.end <= offset {
                    continue;
                }
                worked_today = true;
                let begin = interval.start.max(offset);
                let available = i64::from(interval.end - begin);
                if remaining <= available {
                    return Ok(at(date, begin + remaining as u32));
                }
                remaining -= available;
            }
            idle_days = if worked_today { 0 } else { idle_days + 1 };
            if idle_days > self.max_scan_days {
                return Err(self.unschedulable(calendar, from));
            }
            date = date
                .succ_opt()
                .ok_or_else(|| self.unschedulable(calendar, from))?;
            offset = 0;
        }
    }

    /// Mirror of [`add_duration`](Self::add_duration): the latest instant
    /// `work_seconds` of working time before `to`.
    pub fn subtract_duration(
        &self,
        to: NaiveDateTime,
        work_seconds: i64,
        calendar: CalendarId,
    ) -> Result<NaiveDateTime, CalendarError> {
        if work_seconds == 0 {
            return Ok(to);
        }
        if work_seconds < 0 {
            return self.add_duration(to, -work_seconds, calendar);
        }
        let mut remaining = work_seconds;
        let mut date = to.date();
        let mut offset = seconds_of(to.time());
        let mut idle_days = 0;
        loop {
            let mut worked_today = false;
            for interval in self.intervals_on(date, calendar)?.into_iter().rev() {
                if interval.start >= offset {
                    continue;
                }
                worked_today = true;
                let end = interval.end.min(offset);
                let available = i64::from(end - interval.start);
                if remaining <= available {
                    return Ok(at(date, end - remaining as u32));
                }
                remaining -= available;
            }
            idle_days = if worked_today { 0 } else { idle_days + 1 };
            if idle_days > self.max_scan_days {
                return Err(self.unschedulable(calendar, to));
            }
            date = date
                .pred_opt()
                .ok_or_else(|| self.unschedulable(calendar, to))?;
            offset = SECONDS_PER_DAY;
        }
    }

    /// Working seconds overlapping `[t0, t1)`; zero when `t1 <= t0`.
    pub fn duration_between(
        &self,
        t0: NaiveDateTime,
        t1: NaiveDateTime,
        calendar: CalendarId,
    ) -> Result<i64, CalendarError> {
        if t1 <= t0 {
            return Ok(0);
        }
        let last = t1.date();
        let mut date = t0.date();
        let mut total = 0i64;
        loop {
            let low = if date == t0.date() { seconds_of(t0.time()) } else { 0 };
            let high = if date == last {
                seconds_of(t1.time())
            } else {
                SECONDS_PER_DAY
            };
            for interval in self.intervals_on(date, calendar)? {
                let begin = interval.start.max(low);
                let end = interval.end.min(high);
                if end > begin {
                    total += i64::from(end - begin);
                }
            }
            if date >= last {
                return Ok(total);
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => return Ok(total),
            };
        }
    }

    /// Earliest instant at or after `t` followed by working time.
    pub fn next_working_time(
        &self,
        t: NaiveDateTime,
        calendar: CalendarId,
    ) -> Result<NaiveDateTime, CalendarError> {
        let mut date = t.date();
        let mut offset = seconds_of(t.time());
        for _ in 0..=self.max_scan_days {
            if let Some(interval) = self
                .intervals_on(date, calendar)?
                .into_iter()
                .find(|interval| interval.end > offset)
            {
                return Ok(at(date, interval.start.max(offset)));
            }
            date = date
                .succ_opt()
                .ok_or_else(|| self.unschedulable(calendar, t))?;
            offset = 0;
        }
        Err(self.unschedulable(calendar, t))
    }

    /// Latest instant at or before `t` preceded by working time.
    pub fn previous_working_time(
        &self,
        t: NaiveDateTime,
        calendar: CalendarId,
    ) -> Result<NaiveDateTime, CalendarError> {
        let mut date = t.date();
        let mut offset = seconds_of(t.time());
        for _ in 0..=self.max_scan_days {
            if let Some(interval) = self
                .intervals_on(date, calendar)?
                .into_iter()
                .rev()
                .find(|interval| interval.start < offset)
            {
                return Ok(at(date, interval.end.min(offset)));
            }
            date = date
                .pred_opt()
                .ok_or_else(|| self.unschedulable(calendar, t))?;
            offset = SECONDS_PER_DAY;
        }
        Err(self.unschedulable(calendar, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn derived_calendar_falls_back_to_parent() {
        let mut store = CalendarStore::default();
        let resource = store.derive_calendar("Alice", CalendarId::ROOT).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        assert_eq!(store.effective_day(saturday, resource).unwrap(), DayId::NONWORK);

        store
            .set_default_day(resource, Weekday::Sat, DayId::WORK)
            .unwrap();
        assert_eq!(store.effective_day(saturday, resource).unwrap(), DayId::WORK);
        assert_eq!(
            store.effective_day(saturday, CalendarId::ROOT).unwrap(),
            DayId::NONWORK
        );
    }

    #[test]
    fn date_override_releases_previous_day() {
        let mut store = CalendarStore::default();
        let short = store
            .create_day("Short", "", vec![Interval::from_hours(10, 12)])
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        store.set_day(CalendarId::ROOT, date, short).unwrap();
        assert_eq!(store.days().ref_count(short), Some(2));
        store.release_day(short).unwrap();
        assert!(store.days().contains(short));

        store.set_day(CalendarId::ROOT, date, DayId::NONWORK).unwrap();
        assert!(!store.days().contains(short));
    }

    #[test]
    fn calendar_specific_intervals_override_day_type() {
        let mut store = CalendarStore::default();
        let night = store.derive_calendar("Night shift", CalendarId::ROOT).unwrap();
        store
            .set_day_intervals(night, DayId::WORK, vec![Interval::from_hours(20, 24)])
            .unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(
            store.intervals_on(monday, night).unwrap(),
            vec![Interval::from_hours(20, 24)]
        );
        // Four hours from Monday 20:00 ends exactly at midnight.
        assert_eq!(
            store.add_duration(dt(2024, 1, 8, 20, 0), 4 * 3600, night).unwrap(),
            dt(2024, 1, 9, 0, 0)
        );
    }

    #[test]
    fn subtract_is_mirror_of_add() {
        let store = CalendarStore::default();
        let end = dt(2024, 1, 8, 11, 0);
        let start = store.subtract_duration(end, 4 * 3600, CalendarId::ROOT).unwrap();
        assert_eq!(start, dt(2024, 1, 5, 15, 0));
        assert_eq!(
            store.add_duration(start, 4 * 3600, CalendarId::ROOT).unwrap(),
            end
        );
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let mut store = CalendarStore::default();
        let before = store.version();
        store
            .set_day(
                CalendarId::ROOT,
                NaiveDate::from_ymd_opt(2024, 12, 25).unwrap(),
                DayId::NONWORK,
            )
            .unwrap();
        assert!(store.version() > before);
    }

    #[test]
    fn removing_calendar_with_children_fails() {
        let mut store = CalendarStore::default();
        let team = store.derive_calendar("Team", CalendarId::ROOT).unwrap();
        let member = store.derive_calendar("Member", team).unwrap();
        assert_eq!(store.remove_calendar(team), Err(CalendarError::HasChildren(team)));
        store.remove_calendar(member).unwrap();
        store.remove_calendar(team).unwrap();
        assert_eq!(
            store.remove_calendar(CalendarId::ROOT),
            Err(CalendarError::RootCalendar)
        );
    }

    #[test]
    fn interval_override_keeps_its_day_type_alive() {
        let mut store = CalendarStore::default();
        let half = store
            .create_day("Half", "", vec![Interval::from_hours(9, 13)])
            .unwrap();
        let team = store.derive_calendar("Team", CalendarId::ROOT).unwrap();
        store
            .set_day_intervals(team, half, vec![Interval::from_hours(20, 22)])
            .unwrap();

        assert!(!store.release_day(half).unwrap());
        assert_eq!(store.days().ref_count(half), Some(1));

        let late = store
            .create_day("Late", "", vec![Interval::from_hours(13, 17)])
            .unwrap();
        assert_ne!(late, half);
        store.set_default_day(team, Weekday::Mon, late).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            store.intervals_on(monday, team).unwrap(),
            vec![Interval::from_hours(13, 17)]
        );

        store.remove_calendar(team).unwrap();
        assert_eq!(store.days().ref_count(half), None);
        assert_eq!(store.days().ref_count(late), Some(1));
    }
}
