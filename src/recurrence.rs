use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEnd {
    #[default]
    Never,
    AfterOccurrences(u32),
    /// Inclusive.
    OnDate(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    /// Every N days/weeks/months.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Weekly only.
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Monthly only; defaults to the origin's day of month.
    #[serde(default)]
    pub month_day: Option<u32>,
    #[serde(default)]
    pub end: RecurrenceEnd,
}

fn default_interval() -> u32 {
    1
}

impl RecurrencePattern {
    pub fn daily(interval: u32) -> Self {
        Self {
            frequency: Frequency::Daily,
            interval,
            weekdays: Vec::new(),
            month_day: None,
            end: RecurrenceEnd::Never,
        }
    }

    pub fn weekly(interval: u32, weekdays: &[Weekday]) -> Self {
        Self {
            frequency: Frequency::Weekly,
            weekdays: weekdays.to_vec(),
            ..Self::daily(interval)
        }
    }

    pub fn monthly(interval: u32, month_day: Option<u32>) -> Self {
        Self {
            frequency: Frequency::Monthly,
            month_day,
            ..Self::daily(interval)
        }
    }

    pub fn ending(mut self, end: RecurrenceEnd) -> Self {
        self.end = end;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.interval == 0 {
            return Err(EngineError::InvalidRecurrenceRule("interval must be at least 1"));
        }
        if self.frequency == Frequency::Weekly && self.weekdays.is_empty() {
            return Err(EngineError::InvalidRecurrenceRule(
                "weekly rule needs at least one weekday",
            ));
        }
        if let Some(day) = self.month_day
            && !(1..=31).contains(&day)
        {
            return Err(EngineError::InvalidRecurrenceRule("month day must be in 1..=31"));
        }
        if self.end == RecurrenceEnd::AfterOccurrences(0) {
            return Err(EngineError::InvalidRecurrenceRule("occurrence count must be positive"));
        }
        Ok(())
    }
}

/// Expand `rule` into the dates it applies to, starting at `origin` and never
/// past `horizon_end` (inclusive).
pub fn expand(
    rule: &RecurrencePattern,
    origin: NaiveDate,
    horizon_end: NaiveDate,
) -> Result<Occurrences, EngineError> {
    rule.validate()?;
    let last = match rule.end {
        RecurrenceEnd::OnDate(until) => until.min(horizon_end),
        _ => horizon_end,
    };
    let remaining = match rule.end {
        RecurrenceEnd::AfterOccurrences(n) => Some(n),
        _ => None,
    };
    let weekday_mask = rule
        .weekdays
        .iter()
        .fold(0u8, |mask, d| mask | (1 << d.num_days_from_monday()));
    let week_anchor = origin - Days::new(u64::from(origin.weekday().num_days_from_monday()));

    Ok(Occurrences {
        frequency: rule.frequency,
        interval: rule.interval,
        weekday_mask,
        month_day: rule.month_day.unwrap_or_else(|| origin.day()),
        origin,
        week_anchor,
        last,
        remaining,
        step: 0,
        weekday_cursor: 0,
        done: false,
    })
}

/// Lazily produced, ordered occurrence dates.
#[derive(Debug, Clone)]
pub struct Occurrences {
    frequency: Frequency,
    interval: u32,
    weekday_mask: u8,
    month_day: u32,
    origin: NaiveDate,
    week_anchor: NaiveDate,
    last: NaiveDate,
    remaining: Option<u32>,
    step: u64,
    weekday_cursor: u32,
    done: bool,
}

impl Occurrences {
    fn candidate(&mut self) -> Option<NaiveDate> {
        let interval = u64::from(self.interval);
        match self.frequency {
            Frequency::Daily => {
                let date = self.origin.checked_add_days(Days::new(self.step * interval));
                self.step += 1;
                date
            }
            Frequency::Weekly => {
                if self.weekday_cursor == 7 {
                    self.weekday_cursor = 0;
                    self.step += 1;
                }
                let offset = self.step * interval * 7 + u64::from(self.weekday_cursor);
                self.weekday_cursor += 1;
                self.week_anchor.checked_add_days(Days::new(offset))
            }
            Frequency::Monthly => {
                let months = u32::try_from(self.step * interval).ok()?;
                self.step += 1;
                let first = self.origin.with_day(1)?.checked_add_months(Months::new(months))?;
                let day = self.month_day.min(last_day_of_month(first)?);
                first.with_day(day)
            }
        }
    }

    fn wanted(&self, date: NaiveDate) -> bool {
        if date < self.origin {
            return false;
        }
        match self.frequency {
            Frequency::Weekly => self.weekday_mask & (1 << date.weekday().num_days_from_monday()) != 0,
            _ => true,
        }
    }
}

impl Iterator for Occurrences {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        loop {
            let Some(date) = self.candidate() else {
                self.done = true;
                return None;
            };
            if date > self.last {
                self.done = true;
                return None;
            }
            if !self.wanted(date) {
                continue;
            }
            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
            return Some(date);
        }
    }
}

fn last_day_of_month(first: NaiveDate) -> Option<u32> {
    first
        .checked_add_months(Months::new(1))?
        .pred_opt()
        .map(|d| d.day())
}
