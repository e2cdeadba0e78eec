use crate::error::{PnlError, Result};
use crate::schema::Period;
use crate::utils::{first_day_of_month, last_day_of_month, start_of_week};
use chrono::{Datelike, Days, Local, NaiveDate};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive date range restricting which transactions are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "WindowBounds")]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Wire shape of a window before its bounds are checked.
#[derive(Deserialize, JsonSchema)]
struct WindowBounds {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<WindowBounds> for DateWindow {
    type Error = PnlError;

    fn try_from(bounds: WindowBounds) -> Result<Self> {
        DateWindow::new(bounds.start, bounds.end)
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(PnlError::DateError(format!(
                "Window end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn month(period: Period) -> Self {
        Self {
            start: period.first_day(),
            end: period.last_day(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True when at least one day of `period` falls inside the window.
    pub fn overlaps(&self, period: Period) -> bool {
        period.first_day() <= self.end && period.last_day() >= self.start
    }

    pub fn intersection(&self, other: &DateWindow) -> Option<DateWindow> {
        DateWindow::new(self.start.max(other.start), self.end.min(other.end)).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatePreset {
    Today,
    /// Monday through Sunday of the current ISO week.
    ThisWeek,
    ThisMonth,
    ThisYear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateSelection {
    /// Full history, no filtering.
    AllTime,
    Preset {
        preset: DatePreset,
    },
    /// Either bound may be open.
    Custom {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl DateSelection {
    /// Builds a selection from optional `YYYY-MM-DD` bounds.
    pub fn from_bounds(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
                PnlError::DateError(format!(
                    "Invalid date '{}'. Expected YYYY-MM-DD",
                    value
                ))
            })
        };

        let start = start.map(parse).transpose()?;
        let end = end.map(parse).transpose()?;

        Ok(match (start, end) {
            (None, None) => DateSelection::AllTime,
            (start, end) => DateSelection::Custom { start, end },
        })
    }
}

/// Resolves a selection against today's local date.
///
/// Never cache the result across calls: the presets are relative to the
/// current day.
pub fn resolve_window(selection: &DateSelection) -> Result<Option<DateWindow>> {
    resolve_window_at(selection, Local::now().date_naive())
}

pub fn resolve_window_at(
    selection: &DateSelection,
    today: NaiveDate,
) -> Result<Option<DateWindow>> {
    let window = match selection {
        DateSelection::AllTime => None,
        DateSelection::Preset { preset } => Some(resolve_preset(*preset, today)?),
        DateSelection::Custom { start, end } => {
            if start.is_none() && end.is_none() {
                None
            } else {
                Some(DateWindow::new(
                    start.unwrap_or(NaiveDate::MIN),
                    end.unwrap_or(NaiveDate::MAX),
                )?)
            }
        }
    };

    debug!("Resolved {:?} on {} to {:?}", selection, today, window);
    Ok(window)
}

fn resolve_preset(preset: DatePreset, today: NaiveDate) -> Result<DateWindow> {
    match preset {
        DatePreset::Today => DateWindow::new(today, today),
        DatePreset::ThisWeek => {
            let monday = start_of_week(today);
            let sunday = monday
                .checked_add_days(Days::new(6))
                .ok_or_else(|| PnlError::DateError(format!("Week of {} overflows", today)))?;
            DateWindow::new(monday, sunday)
        }
        DatePreset::ThisMonth => DateWindow::new(
            first_day_of_month(today),
            last_day_of_month(today.year(), today.month()),
        ),
        DatePreset::ThisYear => {
            let start = NaiveDate::from_ymd_opt(today.year(), 1, 1)
                .ok_or_else(|| PnlError::DateError(format!("Year of {} out of range", today)))?;
            DateWindow::new(start, last_day_of_month(today.year(), 12))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn preset(preset: DatePreset, today: NaiveDate) -> DateWindow {
        resolve_window_at(&DateSelection::Preset { preset }, today)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_presets() {
        let today = date(2024, 3, 15);

        assert_eq!(preset(DatePreset::Today, today), DateWindow::new(today, today).unwrap());
        assert_eq!(
            preset(DatePreset::ThisWeek, today),
            DateWindow::new(date(2024, 3, 11), date(2024, 3, 17)).unwrap()
        );
        assert_eq!(
            preset(DatePreset::ThisMonth, today),
            DateWindow::new(date(2024, 3, 1), date(2024, 3, 31)).unwrap()
        );
        assert_eq!(
            preset(DatePreset::ThisYear, today),
            DateWindow::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap()
        );
    }

    #[test]
    fn test_presets_follow_the_given_day() {
        let before = preset(DatePreset::Today, date(2024, 3, 31));
        let after = preset(DatePreset::Today, date(2024, 4, 1));
        assert_ne!(before, after);

        let feb = preset(DatePreset::ThisMonth, date(2024, 2, 10));
        assert_eq!(feb.end, date(2024, 2, 29));
    }

    #[test]
    fn test_all_time_is_unfiltered() {
        assert!(resolve_window(&DateSelection::AllTime).unwrap().is_none());
        assert!(resolve_window(&DateSelection::Custom {
            start: None,
            end: None
        })
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_custom_bounds() {
        let selection = DateSelection::from_bounds(Some("2024-04-01"), Some("2024-04-30")).unwrap();
        let window = resolve_window(&selection).unwrap().unwrap();
        assert!(window.contains(date(2024, 4, 1)));
        assert!(window.contains(date(2024, 4, 30)));
        assert!(!window.contains(date(2024, 3, 31)));
        assert!(!window.contains(date(2024, 5, 1)));

        let open_ended = DateSelection::from_bounds(Some("2024-04-01"), None).unwrap();
        let window = resolve_window(&open_ended).unwrap().unwrap();
        assert!(window.contains(date(2030, 1, 1)));
        assert!(!window.contains(date(2024, 3, 31)));
    }

    #[test]
    fn test_invalid_custom_bounds() {
        assert!(DateSelection::from_bounds(Some("15/03/2024"), None).is_err());

        let reversed = DateSelection::from_bounds(Some("2024-04-30"), Some("2024-04-01")).unwrap();
        assert!(resolve_window(&reversed).is_err());
    }

    #[test]
    fn test_overlaps_period() {
        let window = DateWindow::new(date(2024, 3, 20), date(2024, 4, 5)).unwrap();
        assert!(window.overlaps(Period::new(2024, 3).unwrap()));
        assert!(window.overlaps(Period::new(2024, 4).unwrap()));
        assert!(!window.overlaps(Period::new(2024, 5).unwrap()));
        assert!(!window.overlaps(Period::new(2024, 2).unwrap()));
    }

    #[test]
    fn test_intersection() {
        let march = DateWindow::month(Period::new(2024, 3).unwrap());
        let late = DateWindow::new(date(2024, 3, 20), date(2024, 4, 5)).unwrap();
        assert_eq!(
            march.intersection(&late),
            Some(DateWindow::new(date(2024, 3, 20), date(2024, 3, 31)).unwrap())
        );

        let may = DateWindow::month(Period::new(2024, 5).unwrap());
        assert!(march.intersection(&may).is_none());
    }

    #[test]
    fn test_reversed_window_is_rejected_on_deserialize() {
        let window: DateWindow =
            serde_json::from_str(r#"{"start": "2024-03-01", "end": "2024-03-31"}"#).unwrap();
        assert_eq!(window.end, date(2024, 3, 31));

        let reversed =
            serde_json::from_str::<DateWindow>(r#"{"start": "2024-03-31", "end": "2024-03-01"}"#);
        assert!(reversed.unwrap_err().to_string().contains("before start"));
    }

    #[test]
    fn test_selection_deserializes_from_json() {
        let selection: DateSelection =
            serde_json::from_str(r#"{"type": "preset", "preset": "this_month"}"#).unwrap();
        assert_eq!(
            selection,
            DateSelection::Preset {
                preset: DatePreset::ThisMonth
            }
        );
    }
}
