//! iCalendar (RFC 5545) invite generation.

use chrono::{DateTime, Days, NaiveDate, Utc};

use super::{CRLF, MessageBuildError, MessageConfig};

const PRODUCT_ID: &str = "-//Valentine//Invite//EN";
const EVENT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Build a single-event `METHOD:REQUEST` calendar document.
///
/// Only all-day events get `DTSTART`/`DTEND`; timed events are not modelled yet
/// and are emitted without either property.
pub fn build_invite(
    config: &MessageConfig,
    now: DateTime<Utc>,
    uid: &str,
) -> Result<String, MessageBuildError> {
    let event_date = parse_event_date(&config.event_date)?;
    let end_date = event_date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| MessageBuildError::InvalidDate {
            value: config.event_date.clone(),
            reason: "date is out of range".to_string(),
        })?;

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        format!("PRODID:{PRODUCT_ID}"),
        "VERSION:2.0".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:REQUEST".to_string(),
        format!("X-WR-TIMEZONE:{}", config.time_zone),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", now.format("%Y%m%dT%H%M%SZ")),
    ];

    if config.all_day {
        lines.push(format!("DTSTART;VALUE=DATE:{}", event_date.format("%Y%m%d")));
        lines.push(format!("DTEND;VALUE=DATE:{}", end_date.format("%Y%m%d")));
    }

    lines.push(format!("SUMMARY:{}", escape_text(&config.event_title)));
    lines.push(format!(
        "DESCRIPTION:{}",
        escape_text(&config.event_description)
    ));
    lines.push(format!(
        "ORGANIZER;CN={sender}:mailto:{sender}",
        sender = config.sender
    ));
    for recipient in &config.recipients {
        lines.push(format!(
            "ATTENDEE;CN={recipient};ROLE=REQ-PARTICIPANT;PARTSTAT=NEEDS-ACTION;RSVP=TRUE:mailto:{recipient}"
        ));
    }
    lines.push("STATUS:CONFIRMED".to_string());
    lines.push("TRANSP:TRANSPARENT".to_string());
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut invite = lines.join(CRLF);
    invite.push_str(CRLF);
    Ok(invite)
}

/// Escape a TEXT value. Backslashes go first so later escapes are not doubled.
pub fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\r', "")
        .replace('\n', "\\n")
}

/// Accepts exactly `YYYY-MM-DD`. chrono alone would also take signed or short
/// years and single-digit months, which do not format back to a DATE value.
fn parse_event_date(value: &str) -> Result<NaiveDate, MessageBuildError> {
    let invalid = |reason: String| MessageBuildError::InvalidDate {
        value: value.to_string(),
        reason,
    };
    if !has_date_shape(value) {
        return Err(invalid("expected YYYY-MM-DD".to_string()));
    }
    NaiveDate::parse_from_str(value, EVENT_DATE_FORMAT)
        .map_err(|err| invalid(err.to_string()))
}

fn has_date_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, byte)| match idx {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        })
}
