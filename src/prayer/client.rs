//! Client for the Al-Adhan daily timings endpoint.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{debug_log::AppendOnlyLog, location::Coordinate};

use super::{Prayer, PrayerSchedule};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info};

pub const DEFAULT_API_BASE_URL: &str = "https://api.aladhan.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),

    #[error("Invalid response from prayer times API: {0}")]
    MalformedResponse(String),

    #[error("Failed to parse prayer times: {}", join_names(.0))]
    ParseFailure(Vec<Prayer>),
}

fn join_names(prayers: &[Prayer]) -> String {
    prayers
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Deserialize)]
struct TimingsEnvelope {
    data: Option<TimingsData>,
}

#[derive(Debug, Deserialize)]
struct TimingsData {
    timings: Option<HashMap<String, Value>>,
    date: Option<DateInfo>,
}

#[derive(Debug, Deserialize)]
struct DateInfo {
    gregorian: Option<GregorianDate>,
}

#[derive(Debug, Deserialize)]
struct GregorianDate {
    date: Option<String>,
}

pub struct PrayerTimesClient {
    http: Client,
    base_url: String,
    method: u8,
    school: u8,
    debug_log: Arc<dyn AppendOnlyLog>,
}

impl PrayerTimesClient {
    pub fn new(
        base_url: &str,
        method: u8,
        school: u8,
        debug_log: Arc<dyn AppendOnlyLog>,
    ) -> Result<Self, ScheduleError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("adhan-alarm/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScheduleError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            method,
            school,
            debug_log,
        })
    }

    pub fn endpoint(&self, date: NaiveDate) -> String {
        format!("{}/v1/timings/{}", self.base_url, format_date_for_api(date))
    }

    /// Fetches the five prayer times for `date` at `coord`.
    ///
    /// The times are anchored to the date echoed back by the API rather than
    /// the requested one.
    pub async fn fetch(
        &self,
        coord: &Coordinate,
        date: NaiveDate,
    ) -> Result<PrayerSchedule, ScheduleError> {
        let url = self.endpoint(date);
        log_info!("Requesting prayer times from {url}");
        self.debug_log.append_data(
            "Requesting prayer times",
            json!({
                "url": url,
                "latitude": coord.latitude,
                "longitude": coord.longitude,
            }),
        );

        let result = self.request(&url, coord).await;
        if let Err(err) = &result {
            log_error!("Prayer times request failed: {err}");
            self.debug_log
                .append_data("Prayer times error", json!({ "error": err.to_string(), "url": url }));
        }
        result
    }

    async fn request(&self, url: &str, coord: &Coordinate) -> Result<PrayerSchedule, ScheduleError> {
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .query(&[
                ("latitude", coord.latitude.to_string()),
                ("longitude", coord.longitude.to_string()),
                ("method", self.method.to_string()),
                ("school", self.school.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ScheduleError::Network(e.to_string()))?;

        let status = response.status();
        self.debug_log
            .append_data("API response status", json!({ "status": status.as_u16() }));
        if !status.is_success() {
            return Err(ScheduleError::HttpStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScheduleError::Network(e.to_string()))?;

        parse_timings_body(&body)
    }
}

/// Turns a timings response body into a schedule.
pub(crate) fn parse_timings_body(body: &str) -> Result<PrayerSchedule, ScheduleError> {
    let envelope: TimingsEnvelope = serde_json::from_str(body)
        .map_err(|e| ScheduleError::MalformedResponse(format!("invalid JSON body: {e}")))?;

    let data = envelope
        .data
        .ok_or_else(|| ScheduleError::MalformedResponse("missing data".into()))?;
    let timings = data
        .timings
        .ok_or_else(|| ScheduleError::MalformedResponse("missing data.timings".into()))?;
    let raw_date = data
        .date
        .and_then(|d| d.gregorian)
        .and_then(|g| g.date)
        .ok_or_else(|| ScheduleError::MalformedResponse("missing data.date.gregorian.date".into()))?;
    let date = parse_api_date(&raw_date).ok_or_else(|| {
        ScheduleError::MalformedResponse(format!("invalid gregorian date '{raw_date}'"))
    })?;

    let mut parsed = Vec::with_capacity(Prayer::ALL.len());
    let mut failed = Vec::new();
    for prayer in Prayer::ALL {
        let time = timings
            .get(prayer.api_field())
            .and_then(Value::as_str)
            .and_then(parse_time_of_day)
            .and_then(|t| resolve_wall_clock(date.and_time(t), |n| Local.from_local_datetime(n)));
        match time {
            Some(time) => parsed.push((prayer, time)),
            None => failed.push(prayer),
        }
    }

    if !failed.is_empty() {
        return Err(ScheduleError::ParseFailure(failed));
    }

    PrayerSchedule::from_entries(date, parsed)
        .map_err(|e| ScheduleError::MalformedResponse(e.to_string()))
}

/// Anchors a wall-clock time in a zone. A time that the clocks skip over
/// when they spring forward lands an hour later, past the gap.
fn resolve_wall_clock<T>(
    naive: NaiveDateTime,
    lookup: impl Fn(&NaiveDateTime) -> LocalResult<T>,
) -> Option<T> {
    match lookup(&naive) {
        LocalResult::None => lookup(&(naive + chrono::Duration::hours(1))).earliest(),
        found => found.earliest(),
    }
}

/// Parses `HH:MM`, ignoring a trailing zone label such as `05:12 (EET)`.
fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let clock = raw.split_whitespace().next()?;
    let (hours, minutes) = clock.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// `DD-MM-YYYY`
pub fn format_date_for_api(date: NaiveDate) -> String {
    date.format(API_DATE_FORMAT).to_string()
}

/// Inverse of [`format_date_for_api`].
pub fn parse_api_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), API_DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_log::DebugLog;
    use crate::prayer::test_support::{at, sample_date};
    use wiremock::matchers::{header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coord() -> Coordinate {
        Coordinate {
            latitude: 21.4225,
            longitude: 39.8262,
            captured_at: 0,
        }
    }

    fn body(timings: Value, date: &str) -> Value {
        json!({
            "code": 200,
            "status": "OK",
            "data": {
                "timings": timings,
                "date": { "gregorian": { "date": date } }
            }
        })
    }

    fn full_timings() -> Value {
        json!({
            "Fajr": "06:00",
            "Sunrise": "07:10",
            "Dhuhr": "12:00",
            "Asr": "15:30",
            "Maghrib": "18:00",
            "Isha": "19:30"
        })
    }

    fn make_client(base: &str) -> (PrayerTimesClient, Arc<DebugLog>) {
        let log = Arc::new(DebugLog::in_memory());
        let client = PrayerTimesClient::new(base, 0, 0, log.clone()).unwrap();
        (client, log)
    }

    #[test]
    fn date_round_trip() {
        for raw in ["15-03-2024", "01-01-2000", "29-02-2024", "31-12-1999"] {
            let parsed = parse_api_date(raw).unwrap();
            assert_eq!(format_date_for_api(parsed), raw);
        }
        assert_eq!(parse_api_date("2024-03-15"), None);
        assert_eq!(parse_api_date("31-02-2024"), None);
    }

    #[test]
    fn time_of_day_tolerates_zone_suffix() {
        assert_eq!(parse_time_of_day("05:12"), NaiveTime::from_hms_opt(5, 12, 0));
        assert_eq!(parse_time_of_day("05:12 (EET)"), NaiveTime::from_hms_opt(5, 12, 0));
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day("noon"), None);
        assert_eq!(parse_time_of_day(""), None);
    }

    #[test]
    fn time_in_spring_forward_gap_moves_past_it() {
        use chrono::{FixedOffset, Timelike};

        let winter = FixedOffset::east_opt(3600).unwrap();
        let summer = FixedOffset::east_opt(7200).unwrap();
        // Clocks jump from 02:00 to 03:00.
        let lookup = |n: &NaiveDateTime| match n.hour() {
            0..=1 => winter.from_local_datetime(n),
            2 => LocalResult::None,
            _ => summer.from_local_datetime(n),
        };
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

        let skipped = resolve_wall_clock(day.and_hms_opt(2, 30, 0).unwrap(), lookup).unwrap();
        assert_eq!(skipped.naive_local(), day.and_hms_opt(3, 30, 0).unwrap());
        assert_eq!(skipped.offset(), &summer);

        let before = resolve_wall_clock(day.and_hms_opt(1, 15, 0).unwrap(), lookup).unwrap();
        assert_eq!(before.naive_local(), day.and_hms_opt(1, 15, 0).unwrap());
        assert_eq!(before.offset(), &winter);
    }

    #[test]
    fn repeated_hour_takes_the_first_occurrence() {
        use chrono::FixedOffset;

        let summer = FixedOffset::east_opt(7200).unwrap();
        let winter = FixedOffset::east_opt(3600).unwrap();
        let naive = NaiveDate::from_ymd_opt(2024, 10, 27)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let lookup = |n: &NaiveDateTime| {
            LocalResult::Ambiguous(
                summer.from_local_datetime(n).unwrap(),
                winter.from_local_datetime(n).unwrap(),
            )
        };

        let resolved = resolve_wall_clock(naive, lookup).unwrap();
        assert_eq!(resolved.offset(), &summer);
    }

    #[test]
    fn parses_times_against_echoed_date() {
        let schedule =
            parse_timings_body(&body(full_timings(), "16-03-2024").to_string()).unwrap();

        let echoed = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();
        assert_eq!(schedule.date(), echoed);
        assert_eq!(schedule.time_of(Prayer::Asr), at(echoed, 15, 30, 0));
    }

    #[test]
    fn missing_timings_is_malformed() {
        let raw = json!({ "data": { "date": { "gregorian": { "date": "15-03-2024" } } } });
        let err = parse_timings_body(&raw.to_string()).unwrap_err();
        assert!(matches!(err, ScheduleError::MalformedResponse(ref m) if m.contains("data.timings")));
    }

    #[test]
    fn non_json_and_string_data_are_malformed() {
        assert!(matches!(
            parse_timings_body("<html>"),
            Err(ScheduleError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_timings_body(r#"{"code":400,"data":"Invalid date"}"#),
            Err(ScheduleError::MalformedResponse(_))
        ));
    }

    #[test]
    fn names_every_unparseable_prayer() {
        let timings = json!({
            "Fajr": "06:00",
            "Dhuhr": "noon",
            "Asr": "15:30",
            "Maghrib": 18,
            "Isha": "19:30"
        });
        let err = parse_timings_body(&body(timings, "15-03-2024").to_string()).unwrap_err();
        match err {
            ScheduleError::ParseFailure(failed) => {
                assert_eq!(failed, vec![Prayer::Dhuhr, Prayer::Maghrib]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let timings = json!({ "Fajr": "06:00", "Dhuhr": "12:00", "Asr": "15:30", "Maghrib": "18:00" });
        let err = parse_timings_body(&body(timings, "15-03-2024").to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse prayer times: isha");
    }

    #[tokio::test]
    async fn fetch_sends_expected_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/timings/15-03-2024"))
            .and(query_param("latitude", "21.4225"))
            .and(query_param("longitude", "39.8262"))
            .and(query_param("method", "0"))
            .and(query_param("school", "0"))
            .and(header_matcher("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body(full_timings(), "15-03-2024")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, log) = make_client(&server.uri());
        let schedule = client.fetch(&coord(), sample_date()).await.unwrap();

        assert_eq!(schedule.time_of(Prayer::Fajr), at(sample_date(), 6, 0, 0));
        assert_eq!(schedule.time_of(Prayer::Isha), at(sample_date(), 19, 30, 0));
        assert!(log.entries().iter().any(|e| e.message == "Requesting prayer times"));
    }

    #[tokio::test]
    async fn fetch_classifies_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (client, log) = make_client(&server.uri());
        let err = client.fetch(&coord(), sample_date()).await.unwrap_err();

        assert!(matches!(err, ScheduleError::HttpStatus(503)));
        assert!(log.entries().iter().any(|e| e.message == "Prayer times error"));
    }

    #[tokio::test]
    async fn fetch_classifies_network_failure() {
        // Nothing listens on this port once the server is dropped.
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };

        let (client, _log) = make_client(&uri);
        let err = client.fetch(&coord(), sample_date()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Network(_)));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let (client, _log) = make_client("https://api.aladhan.com/");
        assert_eq!(
            client.endpoint(sample_date()),
            "https://api.aladhan.com/v1/timings/15-03-2024"
        );
    }
}
