//! `Retry-After` response header parsing.
//!
//! The header carries either an unsigned decimal number of seconds or an
//! RFC 1123 HTTP date. Dates in the past yield a zero delay; anything
//! malformed falls back to the caller-supplied default.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn parse(header: &str, default: Duration) -> Duration {
    let header = header.trim();

    if let Ok(seconds) = header.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Some(date) = parse_http_date(header) {
        return date
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
    }

    default
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, RFC1123_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const DEFAULT: Duration = Duration::from_secs(10);

    fn http_date(at: DateTime<Utc>) -> String {
        at.format(RFC1123_FORMAT).to_string()
    }

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(parse("5", DEFAULT), Duration::from_secs(5));
        assert_eq!(parse("0", DEFAULT), Duration::ZERO);
        assert_eq!(parse(" 30 ", DEFAULT), Duration::from_secs(30));
    }

    #[test]
    fn parses_future_http_date() {
        let header = http_date(Utc::now() + TimeDelta::seconds(5));

        let parsed = parse(&header, DEFAULT);
        assert!(parsed >= Duration::from_secs(3), "got {parsed:?}");
        assert!(parsed <= Duration::from_secs(7), "got {parsed:?}");
    }

    #[test]
    fn past_http_date_yields_zero() {
        let header = http_date(Utc::now() - TimeDelta::seconds(60));
        assert_eq!(parse(&header, DEFAULT), Duration::ZERO);
    }

    #[test]
    fn malformed_values_fall_back_to_default() {
        assert_eq!(parse("abc", DEFAULT), DEFAULT);
        assert_eq!(parse("", DEFAULT), DEFAULT);
        assert_eq!(parse("-5", DEFAULT), DEFAULT);
        assert_eq!(parse("Sun, 99 Nov 1994", DEFAULT), DEFAULT);
    }
}
