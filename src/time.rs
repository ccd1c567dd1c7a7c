use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::EngineError;
use crate::model::{Minute, Span, MINUTES_PER_DAY};

/// Wall-clock time of day with minute resolution, exchanged as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    /// `minutes` must be in `0..1440`.
    pub fn from_minutes(minutes: Minute) -> Option<Self> {
        if (0..MINUTES_PER_DAY).contains(&minutes) {
            Some(Self(minutes as u16))
        } else {
            None
        }
    }

    /// Any minute offset, folded into a single day.
    pub fn wrapping(minutes: Minute) -> Self {
        Self(minutes.rem_euclid(MINUTES_PER_DAY) as u16)
    }

    pub fn hm(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub fn minutes(self) -> Minute {
        self.0 as Minute
    }
}

impl From<TimeOfDay> for NaiveTime {
    fn from(t: TimeOfDay) -> Self {
        NaiveTime::from_hms_opt(u32::from(t.0 / 60), u32::from(t.0 % 60), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes = to_minutes(s)?;
        Ok(Self(minutes as u16))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A daily time window such as `06:00-22:00`. `end <= start` wraps past midnight,
/// and `start == end` means the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Window {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> Span {
        span(self.start, self.end)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for Window {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| EngineError::InvalidTimeFormat(s.to_string()))?;
        Ok(Self {
            start: start.trim().parse()?,
            end: end.trim().parse()?,
        })
    }
}

/// Parse `HH:MM` into minutes since midnight (`0..=1439`).
pub fn to_minutes(time: &str) -> Result<Minute, EngineError> {
    let bad = || EngineError::InvalidTimeFormat(time.to_string());
    let (h, m) = time.split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let hour: u16 = h.parse().map_err(|_| bad())?;
    let minute: u16 = m.parse().map_err(|_| bad())?;
    TimeOfDay::hm(hour, minute)
        .map(TimeOfDay::minutes)
        .ok_or_else(bad)
}

/// Minutes from `start` to `end`, wrapping past midnight. `start == end` is a full day.
pub fn duration(start: TimeOfDay, end: TimeOfDay) -> Minute {
    let raw = end.minutes() - start.minutes();
    if raw <= 0 { raw + MINUTES_PER_DAY } else { raw }
}

/// Like [`duration`] with wrapping disabled: `end` must be strictly after `start`.
pub fn duration_strict(start: TimeOfDay, end: TimeOfDay) -> Result<Minute, EngineError> {
    let raw = end.minutes() - start.minutes();
    if raw <= 0 {
        return Err(EngineError::InvalidShift("end must be after start"));
    }
    Ok(raw)
}

/// Wrap-normalized half-open interval relative to its day's midnight.
pub fn span(start: TimeOfDay, end: TimeOfDay) -> Span {
    Span::new(start.minutes(), start.minutes() + duration(start, end))
}

pub fn overlaps(a_start: TimeOfDay, a_end: TimeOfDay, b_start: TimeOfDay, b_end: TimeOfDay) -> bool {
    span(a_start, a_end).overlaps(&span(b_start, b_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn parse_valid_times() {
        assert_eq!(to_minutes("00:00").unwrap(), 0);
        assert_eq!(to_minutes("09:30").unwrap(), 570);
        assert_eq!(to_minutes("7:05").unwrap(), 425);
        assert_eq!(to_minutes("23:59").unwrap(), 1439);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "9", "24:00", "12:60", "12:5", "ab:cd", "-1:00", "123:00", "12:00:00", " 9:00"] {
            assert!(
                matches!(to_minutes(bad), Err(EngineError::InvalidTimeFormat(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_pads() {
        assert_eq!(t("7:05").to_string(), "07:05");
        assert_eq!(TimeOfDay::wrapping(1500).to_string(), "01:00");
        assert_eq!(TimeOfDay::wrapping(-60).to_string(), "23:00");
    }

    #[test]
    fn overnight_duration() {
        assert_eq!(duration(t("22:00"), t("02:00")), 240);
        assert_eq!(duration(t("09:00"), t("17:00")), 480);
    }

    #[test]
    fn same_instant_wraps_to_full_day() {
        assert_eq!(duration(t("09:00"), t("09:00")), 1440);
        assert!(duration_strict(t("09:00"), t("09:00")).is_err());
        assert!(duration_strict(t("22:00"), t("02:00")).is_err());
        assert_eq!(duration_strict(t("09:00"), t("10:15")).unwrap(), 75);
    }

    #[test]
    fn span_is_wrap_normalized() {
        assert_eq!(span(t("22:00"), t("02:00")), Span::new(1320, 1560));
        assert_eq!(span(t("00:00"), t("00:00")), Span::new(0, 1440));
    }

    #[test]
    fn overlap_sub_cases() {
        let (s, e) = (t("09:00"), t("17:00"));
        // starts during
        assert!(overlaps(s, e, t("16:00"), t("18:00")));
        // ends during
        assert!(overlaps(s, e, t("08:00"), t("10:00")));
        // contains
        assert!(overlaps(s, e, t("08:00"), t("18:00")));
        // contained
        assert!(overlaps(s, e, t("10:00"), t("11:00")));
        // exact
        assert!(overlaps(s, e, s, e));
        // touching edges
        assert!(!overlaps(s, e, t("17:00"), t("18:00")));
        assert!(!overlaps(s, e, t("07:00"), t("09:00")));
    }

    #[test]
    fn overnight_overlap() {
        assert!(overlaps(t("22:00"), t("02:00"), t("23:00"), t("23:30")));
        assert!(overlaps(t("22:00"), t("06:00"), t("21:00"), t("01:00")));
        // the early-morning part of an overnight interval belongs to the next day
        assert!(!overlaps(t("22:00"), t("02:00"), t("01:00"), t("03:00")));
    }

    #[test]
    fn window_parse() {
        let w: Window = "22:00-06:00".parse().unwrap();
        assert_eq!(w.span(), Span::new(1320, 1800));
        assert!("22:00".parse::<Window>().is_err());
    }

    #[test]
    fn serde_as_text() {
        let json = serde_json::to_string(&t("08:15")).unwrap();
        assert_eq!(json, "\"08:15\"");
        let back: TimeOfDay = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t("08:15"));
        assert!(serde_json::from_str::<TimeOfDay>("\"8:75\"").is_err());
    }
}
