use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayId(pub u32);

impl DayId {
    pub const WORK: DayId = DayId(0);
    pub const NONWORK: DayId = DayId(1);
    pub const USE_BASE: DayId = DayId(2);

    pub fn is_built_in(self) -> bool {
        self.0 <= Self::USE_BASE.0
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Working time inside one day, as seconds from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn from_hours(start_hour: u32, end_hour: u32) -> Self {
        Self::new(start_hour * 3600, end_hour * 3600)
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Checks that intervals are non-empty, inside one day, sorted and disjoint.
pub fn validate_intervals(intervals: &[Interval]) -> Result<(), CalendarError> {
    let mut previous_end = 0;
    for (idx, interval) in intervals.iter().enumerate() {
        let invalid = |reason: &str| CalendarError::InvalidInterval {
            start: interval.start,
            end: interval.end,
            reason: reason.to_string(),
        };
        if interval.start >= interval.end {
            return Err(invalid("start must precede end"));
        }
        if interval.end > SECONDS_PER_DAY {
            return Err(invalid("interval extends past midnight"));
        }
        if idx > 0 && interval.start < previous_end {
            return Err(invalid("intervals must be ordered and disjoint"));
        }
        previous_end = interval.end;
    }
    Ok(())
}

/// A named day type such as "work" or "nonwork".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub id: DayId,
    pub name: String,
    pub description: String,
    pub intervals: Vec<Interval>,
}

impl Day {
    pub fn working_seconds(&self) -> u32 {
        self.intervals.iter().map(Interval::len).sum()
    }
}

#[derive(Debug)]
pub struct WellKnownDays {
    pub work: Day,
    pub nonwork: Day,
    pub use_base: Day,
}

static WELL_KNOWN: Lazy<WellKnownDays> = Lazy::new(|| WellKnownDays {
    work: Day {
        id: DayId::WORK,
        name: "Working".to_string(),
        description: "A default working day".to_string(),
        intervals: vec![Interval::from_hours(9, 17)],
    },
    nonwork: Day {
        id: DayId::NONWORK,
        name: "Nonworking".to_string(),
        description: "A default non working day".to_string(),
        intervals: Vec::new(),
    },
    use_base: Day {
        id: DayId::USE_BASE,
        name: "Use base".to_string(),
        description: "Use day from base calendar".to_string(),
        intervals: Vec::new(),
    },
});

/// The three built-in day types, constructed on first use.
pub fn well_known_days() -> &'static WellKnownDays {
    &WELL_KNOWN
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DayEntry {
    day: Day,
    refs: u32,
}

/// Project-scoped registry of day types.
///
/// Ids are slot indices. The built-in days occupy slots 0..=2 and are pinned;
/// every other day lives while its reference count is positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRegistry {
    slots: Vec<Option<DayEntry>>,
}

impl Default for DayRegistry {
    fn default() -> Self {
        let known = well_known_days();
        let pinned = |day: &Day| Some(DayEntry { day: day.clone(), refs: 0 });
        Self {
            slots: vec![
                pinned(&known.work),
                pinned(&known.nonwork),
                pinned(&known.use_base),
            ],
        }
    }
}

impl DayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new day type holding one reference for the caller.
    pub fn create_day(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        intervals: Vec<Interval>,
    ) -> Result<DayId, CalendarError> {
        validate_intervals(&intervals)?;
        let slot = self
            .slots
            .iter()
            .skip(DayId::USE_BASE.0 as usize + 1)
            .position(Option::is_none)
            .map(|offset| offset + DayId::USE_BASE.0 as usize + 1)
            .unwrap_or(self.slots.len());
        let id = DayId(slot as u32);
        let entry = DayEntry {
            day: Day {
                id,
                name: name.into(),
                description: description.into(),
                intervals,
            },
            refs: 1,
        };
        if slot == self.slots.len() {
            self.slots.push(Some(entry));
        } else {
            self.slots[slot] = Some(entry);
        }
        Ok(id)
    }

    pub fn get(&self, id: DayId) -> Option<&Day> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|entry| &entry.day)
    }

    pub fn contains(&self, id: DayId) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<DayId> {
        self.iter().find(|day| day.name == name).map(|day| day.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Day> {
        self.slots.iter().flatten().map(|entry| &entry.day)
    }

    pub fn ref_count(&self, id: DayId) -> Option<u32> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.refs)
    }

    pub fn retain(&mut self, id: DayId) -> Result<(), CalendarError> {
        if id.is_built_in() {
            return Ok(());
        }
        let entry = self.entry_mut(id)?;
        entry.refs += 1;
        Ok(())
    }

    /// Drops one reference; returns `true` when the day was destroyed.
    pub fn release(&mut self, id: DayId) -> Result<bool, CalendarError> {
        if id.is_built_in() {
            return Err(CalendarError::BuiltInDay(id));
        }
        let entry = self.entry_mut(id)?;
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.slots[id.0 as usize] = None;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn set_intervals(
        &mut self,
        id: DayId,
        intervals: Vec<Interval>,
    ) -> Result<(), CalendarError> {
        validate_intervals(&intervals)?;
        if id == DayId::NONWORK || id == DayId::USE_BASE {
            return Err(CalendarError::BuiltInDay(id));
        }
        let entry = self.entry_mut(id)?;
        entry.day.intervals = intervals;
        Ok(())
    }

    fn entry_mut(&mut self, id: DayId) -> Result<&mut DayEntry, CalendarError> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(CalendarError::UnknownDay(id))
    }
}
