use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::channels::{Component, Conversation, FlowError, Interaction, MessageHandle, Render, SelectOption};
use crate::config::LocaleConfig;

pub const DAYS: i64 = 24;
pub const HOURS: i64 = 24;
pub const MINUTE_STEP: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickedInstant {
    pub utc: DateTime<Utc>,
    pub local: DateTime<Tz>,
}

/// Day -> hour -> 5-minute slot cascade, edited in place on one message.
pub struct DateTimePicker<'c> {
    conversation: &'c Conversation,
    locale: &'c LocaleConfig,
}

impl<'c> DateTimePicker<'c> {
    pub fn new(conversation: &'c Conversation, locale: &'c LocaleConfig) -> Self {
        Self {
            conversation,
            locale,
        }
    }

    pub async fn run(
        &self,
        handle: &MessageHandle,
        now: DateTime<Utc>,
    ) -> Result<(Interaction, PickedInstant), FlowError> {
        let tz = self.locale.timezone;
        let now = now.with_timezone(&tz);

        let days = day_options(now, &self.locale.date_format);
        let day_ctx = self
            .conversation
            .prompt(handle, &single_select("Pick a day", "dt_day_picker", days))
            .await?;
        let day = parse_day(single_value(&day_ctx)?)?;

        let hours = hour_options(day, now, &self.locale.datetime_format());
        let hour_ctx = self
            .conversation
            .prompt(handle, &single_select("Pick an hour", "dt_hour_picker", hours))
            .await?;
        let (date, hour) = parse_hour(single_value(&hour_ctx)?)?;
        let hour_start = local_instant(tz, date, hour, 0)?;

        let minutes = minute_options(hour_start, &self.locale.datetime_format());
        let minute_ctx = self
            .conversation
            .prompt(handle, &single_select("Pick a minute", "dt_minute_picker", minutes))
            .await?;
        let minute = parse_minute(single_value(&minute_ctx)?)?;

        let local = hour_start + Duration::minutes(i64::from(minute));
        Ok((
            minute_ctx,
            PickedInstant {
                utc: local.with_timezone(&Utc),
                local,
            },
        ))
    }
}

fn single_select(prompt: &str, custom_id: &str, options: Vec<SelectOption>) -> Render {
    Render::text(prompt).with_row(vec![Component::Select {
        custom_id: custom_id.into(),
        placeholder: "...".into(),
        min_values: 1,
        max_values: 1,
        options,
    }])
}

fn single_value(interaction: &Interaction) -> Result<&str, FlowError> {
    match interaction.selected_options.as_slice() {
        [value] => Ok(value.as_str()),
        other => Err(FlowError::UnexpectedValue(other.join(","))),
    }
}

/// Today plus the following days, in the operator's zone.
pub fn day_options(now: DateTime<Tz>, date_format: &str) -> Vec<SelectOption> {
    (0..DAYS)
        .filter_map(|i| now.date_naive().checked_add_signed(Duration::days(i)))
        .map(|d| {
            SelectOption::new(
                d.format(date_format).to_string(),
                format!("{},{},{}", d.year(), d.month(), d.day()),
            )
        })
        .collect()
}

/// For today: the next 24 hours from the current one. Otherwise the whole day.
pub fn hour_options(day: NaiveDate, now: DateTime<Tz>, format: &str) -> Vec<SelectOption> {
    let tz = now.timezone();
    let start = if day == now.date_naive() {
        now.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
    } else {
        day.and_hms_opt(0, 0, 0)
            .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
    };
    let Some(start) = start else {
        return Vec::new();
    };

    (0..HOURS)
        .map(|i| start + Duration::hours(i))
        .map(|t| {
            SelectOption::new(
                t.format(format).to_string(),
                format!("{},{},{},{}", t.year(), t.month(), t.day(), t.hour()),
            )
        })
        .collect()
}

pub fn minute_options(hour_start: DateTime<Tz>, format: &str) -> Vec<SelectOption> {
    (0..60 / MINUTE_STEP)
        .map(|i| i * MINUTE_STEP)
        .map(|m| {
            let t = hour_start + Duration::minutes(i64::from(m));
            SelectOption::new(t.format(format).to_string(), format!("{m:02}"))
        })
        .collect()
}

fn numbers<const N: usize>(value: &str) -> Result<[u32; N], FlowError> {
    let bad = || FlowError::UnexpectedValue(value.to_string());
    let parts: Vec<u32> = value
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    parts.try_into().map_err(|_| bad())
}

fn parse_day(value: &str) -> Result<NaiveDate, FlowError> {
    let [y, m, d] = numbers::<3>(value)?;
    NaiveDate::from_ymd_opt(y as i32, m, d).ok_or_else(|| FlowError::UnexpectedValue(value.into()))
}

fn parse_hour(value: &str) -> Result<(NaiveDate, u32), FlowError> {
    let [y, m, d, h] = numbers::<4>(value)?;
    let date = NaiveDate::from_ymd_opt(y as i32, m, d)
        .ok_or_else(|| FlowError::UnexpectedValue(value.into()))?;
    if h > 23 {
        return Err(FlowError::UnexpectedValue(value.into()));
    }
    Ok((date, h))
}

fn parse_minute(value: &str) -> Result<u32, FlowError> {
    match value.parse::<u32>() {
        Ok(m) if m < 60 && m % MINUTE_STEP == 0 => Ok(m),
        _ => Err(FlowError::UnexpectedValue(value.into())),
    }
}

/// Earliest instant with that wall-clock time; errors inside a DST gap.
fn local_instant(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Result<DateTime<Tz>, FlowError> {
    date.and_hms_opt(hour, minute, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .ok_or_else(|| FlowError::UnexpectedValue(format!("{date} {hour:02}:{minute:02}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::*;

    fn warsaw() -> LocaleConfig {
        LocaleConfig {
            timezone: chrono_tz::Europe::Warsaw,
            ..LocaleConfig::default()
        }
    }

    fn now() -> DateTime<Tz> {
        chrono_tz::Europe::Warsaw
            .with_ymd_and_hms(2024, 3, 10, 14, 37, 12)
            .unwrap()
    }

    #[test]
    fn test_day_options_cover_24_days_from_today() {
        let days = day_options(now(), "%Y-%m-%d");
        assert_eq!(days.len(), 24);
        assert_eq!(days[0].value, "2024,3,10");
        assert_eq!(days[0].label, "2024-03-10");
        assert_eq!(days[23].value, "2024,4,2");
    }

    #[test]
    fn test_hours_for_today_start_at_current_hour() {
        let hours = hour_options(now().date_naive(), now(), "%d %H:%M");
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0].value, "2024,3,10,14");
        assert_eq!(hours[0].label, "10 14:00");
        assert_eq!(hours[23].value, "2024,3,11,13");
    }

    #[test]
    fn test_hours_for_later_day_start_at_midnight() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();
        let hours = hour_options(day, now(), "%H");
        assert_eq!(hours.first().unwrap().value, "2024,3,12,0");
        assert_eq!(hours.last().unwrap().value, "2024,3,12,23");
    }

    #[test]
    fn test_minute_slots_are_five_minutes_apart() {
        let start = local_instant(chrono_tz::Europe::Warsaw, now().date_naive(), 15, 0).unwrap();
        let minutes = minute_options(start, "%H:%M");
        let values: Vec<_> = minutes.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values.len(), 12);
        assert_eq!(values[0], "00");
        assert_eq!(values[11], "55");
        assert_eq!(minutes[1].label, "15:05");
    }

    #[test]
    fn test_rejects_off_grid_minute() {
        assert!(parse_minute("07").is_err());
        assert!(parse_minute("60").is_err());
        assert_eq!(parse_minute("05").unwrap(), 5);
        assert!(parse_day("2024,2,30").is_err());
        assert!(parse_hour("2024,2,3").is_err());
    }

    #[tokio::test]
    async fn test_cascade_builds_zoned_and_utc_instant() {
        let surface = ScriptedSurface::new(&[
            ("dt_day_picker", &["2024,3,12"]),
            ("dt_hour_picker", &["2024,3,12,9"]),
            ("dt_minute_picker", &["45"]),
        ]);
        let conv = conversation(surface.clone());
        let locale = warsaw();
        let (last, picked) = DateTimePicker::new(&conv, &locale)
            .run(&handle(), now().with_timezone(&Utc))
            .await
            .unwrap();

        assert_eq!(last.custom_id, "dt_minute_picker");
        assert_eq!(picked.local.to_rfc3339(), "2024-03-12T09:45:00+01:00");
        assert_eq!(picked.utc.to_rfc3339(), "2024-03-12T08:45:00+00:00");

        let renders = surface.renders.lock().unwrap();
        let prompts: Vec<_> = renders.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(prompts, ["Pick a day", "Pick an hour", "Pick a minute"]);
    }

    #[tokio::test]
    async fn test_multi_value_submit_is_rejected() {
        let surface = ScriptedSurface::new(&[("dt_day_picker", &["2024,3,12", "2024,3,13"])]);
        let conv = conversation(surface);
        let locale = warsaw();
        let err = DateTimePicker::new(&conv, &locale)
            .run(&handle(), now().with_timezone(&Utc))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnexpectedValue(_)));
    }
}
