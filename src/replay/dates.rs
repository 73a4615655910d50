// src/replay/dates.rs
//! Timestamp coherence for replayed responses
//!
//! `Date` is moved to the present and `Last-Modified`/`Expires` are shifted by
//! the same amount, so cache freshness behaves as it did at record time.

use chrono::{DateTime, Duration, NaiveDateTime, Utc, Weekday};
use hyper::header::{HeaderName, HeaderValue, DATE, EXPIRES, LAST_MODIFIED};
use hyper::HeaderMap;

/// IMF-fixdate, the preferred HTTP-date format
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Accepted formats once the leading weekday name is removed
const IMF_FIXDATE_TAIL: &str = "%d %b %Y %H:%M:%S GMT";
const RFC850_DATE_TAIL: &str = "%d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE_TAIL: &str = "%b %e %H:%M:%S %Y";

/// Parse an HTTP-date in any of the three formats HTTP/1.1 allows.
///
/// The weekday must be a valid day name but is not checked against the
/// date, so recorded headers with a wrong weekday still parse.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    // "Sun, 06 Nov ..." and "Sunday, 06-Nov-..." use a comma, asctime a space
    let (weekday, rest) = value
        .split_once(',')
        .or_else(|| value.split_once(' '))?;
    weekday.trim().parse::<Weekday>().ok()?;
    let rest = rest.trim_start();

    [IMF_FIXDATE_TAIL, RFC850_DATE_TAIL, ASCTIME_DATE_TAIL]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(rest, format).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp as IMF-fixdate
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format(IMF_FIXDATE).to_string()
}

/// Set `Date` to `now` and shift `Last-Modified`/`Expires` by the distance
/// between `now` and the recorded `Date`. Unparsable values are left as
/// they are.
pub fn update_dates(headers: &mut HeaderMap, now: DateTime<Utc>) {
    let recorded = headers
        .get(DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    set_date(headers, DATE, now);

    let Some(recorded) = recorded else {
        return;
    };

    let delta = now - recorded;
    shift_date(headers, LAST_MODIFIED, delta);
    shift_date(headers, EXPIRES, delta);
}

fn shift_date(headers: &mut HeaderMap, name: HeaderName, delta: Duration) {
    let Some(old) = headers
        .get(&name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
    else {
        return;
    };

    set_date(headers, name, old + delta);
}

fn set_date(headers: &mut HeaderMap, name: HeaderName, time: DateTime<Utc>) {
    if let Ok(value) = HeaderValue::from_str(&format_http_date(time)) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_parse_formats() {
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();

        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_weekday_not_checked_against_date() {
        // 21 Oct 2015 was a Wednesday
        let expected = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_http_date("Mon, 21 Oct 2015 07:28:00 GMT"), Some(expected));
        assert_eq!(parse_http_date("Funday, 21 Oct 2015 07:28:00 GMT"), None);

        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Mon, 21 Oct 2015 07:28:00 GMT"));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Tue, 20 Oct 2015 07:28:00 GMT"));

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        update_dates(&mut headers, now);

        assert_eq!(headers[LAST_MODIFIED], "Thu, 01 Jan 2026 03:04:05 GMT");
    }

    #[test]
    fn test_format() {
        let time = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(format_http_date(time), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_shifts_related_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Tue, 20 Oct 2015 07:28:00 GMT"));
        headers.insert(EXPIRES, HeaderValue::from_static("Wed, 21 Oct 2015 08:28:00 GMT"));

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        update_dates(&mut headers, now);

        assert_eq!(headers[DATE], "Fri, 02 Jan 2026 03:04:05 GMT");
        assert_eq!(headers[LAST_MODIFIED], "Thu, 01 Jan 2026 03:04:05 GMT");
        assert_eq!(headers[EXPIRES], "Fri, 02 Jan 2026 04:04:05 GMT");
    }

    #[test]
    fn test_missing_date_only_sets_date() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Tue, 20 Oct 2015 07:28:00 GMT"));

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        update_dates(&mut headers, now);

        assert_eq!(headers[DATE], "Fri, 02 Jan 2026 03:04:05 GMT");
        assert_eq!(headers[LAST_MODIFIED], "Tue, 20 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_unparsable_values_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));

        update_dates(&mut headers, Utc::now());
        assert_eq!(headers[EXPIRES], "0");
    }

    proptest! {
        #[test]
        fn prop_freshness_preserved(
            recorded in 0i64..2_000_000_000,
            age in -10_000_000i64..10_000_000,
            now in 0i64..4_000_000_000,
        ) {
            let mut headers = HeaderMap::new();
            set_date(&mut headers, DATE, at(recorded));
            set_date(&mut headers, LAST_MODIFIED, at(recorded - age.abs()));

            update_dates(&mut headers, at(now));

            let new_date = parse_http_date(headers[DATE].to_str().unwrap()).unwrap();
            let new_modified = parse_http_date(headers[LAST_MODIFIED].to_str().unwrap()).unwrap();

            prop_assert_eq!(new_date, at(now));
            prop_assert_eq!(new_date - new_modified, Duration::seconds(age.abs()));
        }
    }
}
