//! Text form of the `START TIME` record: `YYYY-MM-DD HH:MM:SS ZONE`.

use anyhow::{anyhow, Context};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const DATE_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub fn format_timestamptz(ts: OffsetDateTime) -> anyhow::Result<String> {
    let date_time = ts.format(DATE_TIME)?;
    let offset = ts.offset();
    if offset.is_utc() {
        return Ok(format!("{} UTC", date_time));
    }

    let (hours, minutes, _) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    if minutes == 0 {
        Ok(format!("{} {}{:02}", date_time, sign, hours.abs()))
    } else {
        Ok(format!(
            "{} {}{:02}{:02}",
            date_time,
            sign,
            hours.abs(),
            minutes.abs()
        ))
    }
}

/// Parses a label timestamp without help from the server. Only zone names
/// that denote UTC and numeric offsets are understood.
pub fn parse_timestamptz(text: &str) -> anyhow::Result<OffsetDateTime> {
    let invalid = || anyhow!("invalid input syntax for type timestamp with time zone: \"{}\"", text);

    let text = text.trim();
    let (date_time, zone) = text.rsplit_once(' ').ok_or_else(invalid)?;
    let date_time = PrimitiveDateTime::parse(date_time, DATE_TIME).with_context(invalid)?;
    let offset = parse_zone(zone).ok_or_else(invalid)?;
    Ok(date_time.assume_offset(offset))
}

fn parse_zone(zone: &str) -> Option<UtcOffset> {
    match zone {
        "UTC" | "GMT" | "UCT" | "Z" => return Some(UtcOffset::UTC),
        _ => {}
    }

    let (sign, digits) = match zone.split_at_checked(1)? {
        ("+", rest) => (1i8, rest),
        ("-", rest) => (-1i8, rest),
        _ => return None,
    };
    let digits = digits.replace(':', "");
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i8>().ok()?, 0),
        4 => (digits[..2].parse::<i8>().ok()?, digits[2..].parse::<i8>().ok()?),
        _ => return None,
    };
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}
