//! Meeting scheduling

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{check_response, IntegrationError};

/// Default meeting length with the closer
pub const DEFAULT_MEETING_MINUTES: i64 = 30;

/// Link prefix of bookings that never reached a calendar
pub const LOCAL_LINK_PREFIX: &str = "local://";

/// Dates as agreed on the call (`DD/MM/YYYY`) or as stored (`YYYY-MM-DD`)
pub fn parse_meeting_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%d/%m/%Y"))
        .ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub lead_name: String,
    pub lead_phone: String,
    /// Course or topic the meeting is about
    pub topic: String,
    /// `DD/MM/YYYY` or `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub duration_minutes: i64,
}

impl MeetingRequest {
    pub fn new(
        lead_name: impl Into<String>,
        lead_phone: impl Into<String>,
        topic: impl Into<String>,
        date: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            lead_name: lead_name.into(),
            lead_phone: lead_phone.into(),
            topic: topic.into(),
            date: date.into(),
            time: time.into(),
            duration_minutes: DEFAULT_MEETING_MINUTES,
        }
    }

    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.duration_minutes = minutes;
        self
    }

    /// Parsed start and end of the slot
    pub fn slot(&self) -> Result<(NaiveDateTime, NaiveDateTime), IntegrationError> {
        let unparseable = |detail: &str| {
            IntegrationError::InvalidRequest(format!(
                "unparseable slot '{} {}': {}",
                self.date, self.time, detail
            ))
        };
        let date = parse_meeting_date(&self.date).ok_or_else(|| unparseable("bad date"))?;
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|e| unparseable(&e.to_string()))?;
        let start = date.and_time(time);
        Ok((start, start + Duration::minutes(self.duration_minutes)))
    }

    /// Calendar event title
    pub fn title(&self) -> String {
        format!("📞 Ligação - {} ({})", self.lead_name, self.topic)
    }

    pub fn description(&self, closer: &str) -> String {
        format!(
            "Lead: {}\nTelefone: {}\nCurso: {}\nAgendado pela IA (Voice AI)\nCloser: {}",
            self.lead_name, self.lead_phone, self.topic, closer
        )
    }
}

/// Confirmed booking, stored as the call's handoff data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingBooking {
    pub event_id: String,
    pub event_link: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub time: String,
    pub closer: String,
}

impl MeetingBooking {
    fn for_slot(
        event_id: String,
        event_link: String,
        start: NaiveDateTime,
        closer: &str,
    ) -> Self {
        Self {
            event_id,
            event_link,
            date: start.format("%Y-%m-%d").to_string(),
            time: start.format("%H:%M").to_string(),
            closer: closer.to_string(),
        }
    }

    /// Kept in process only; nobody will be on the other side of it
    pub fn is_local(&self) -> bool {
        self.event_link.starts_with(LOCAL_LINK_PREFIX)
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, request: &MeetingRequest) -> Result<MeetingBooking, IntegrationError>;
}

#[derive(Debug, Deserialize)]
struct FreeSlot {
    start: String,
}

#[derive(Debug, Deserialize)]
struct Availability {
    #[serde(default)]
    slots: Vec<FreeSlot>,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
    #[serde(default, rename = "htmlLink")]
    html_link: String,
}

/// JSON calendar API.
///
/// `GET /calendars/{id}/availability?date=` lists free starts for a day and
/// `POST /calendars/{id}/events` books one. A slot that is not free is
/// rejected before anything is created.
pub struct HttpScheduler {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    calendar: String,
    closer: String,
}

impl HttpScheduler {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        calendar: impl Into<String>,
        closer: impl Into<String>,
    ) -> Result<Self, IntegrationError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            calendar: calendar.into(),
            closer: closer.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/calendars/{}{}", self.endpoint, self.calendar, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn is_free(&self, start: NaiveDateTime) -> Result<bool, IntegrationError> {
        let day = start.format("%Y-%m-%d").to_string();
        let request = self
            .client
            .get(self.url("/availability"))
            .query(&[("date", day.as_str())]);
        let response = check_response(self.authorize(request).send().await?).await?;
        let availability: Availability = response.json().await?;
        let wanted = start.format("%H:%M").to_string();
        Ok(availability.slots.iter().any(|slot| slot.start == wanted))
    }
}

#[async_trait]
impl Scheduler for HttpScheduler {
    async fn schedule(&self, request: &MeetingRequest) -> Result<MeetingBooking, IntegrationError> {
        let (start, end) = request.slot()?;
        if !self.is_free(start).await? {
            return Err(IntegrationError::InvalidRequest(format!(
                "slot {} is not available on calendar {}",
                start, self.calendar
            )));
        }

        let body = json!({
            "summary": request.title(),
            "description": request.description(&self.closer),
            "start": start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "end": end.format("%Y-%m-%dT%H:%M:%S").to_string(),
        });
        let response = check_response(
            self.authorize(self.client.post(self.url("/events")).json(&body))
                .send()
                .await?,
        )
        .await?;
        let event: CreatedEvent = response.json().await?;

        tracing::info!(
            event_id = %event.id,
            calendar = %self.calendar,
            lead = %request.lead_name,
            start = %start,
            "Meeting booked"
        );
        Ok(MeetingBooking::for_slot(event.id, event.html_link, start, &self.closer))
    }
}

/// Scheduler that books nothing and returns a local reference
#[derive(Debug, Clone)]
pub struct StubScheduler {
    closer: String,
}

impl StubScheduler {
    pub fn new(closer: impl Into<String>) -> Self {
        Self {
            closer: closer.into(),
        }
    }
}

impl Default for StubScheduler {
    fn default() -> Self {
        Self::new("Consultora")
    }
}

#[async_trait]
impl Scheduler for StubScheduler {
    async fn schedule(&self, request: &MeetingRequest) -> Result<MeetingBooking, IntegrationError> {
        let (start, end) = request.slot()?;
        let event_id = format!(
            "EVT-{}",
            uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        );
        tracing::info!(
            event_id = %event_id,
            lead = %request.lead_name,
            start = %start,
            end = %end,
            title = %request.title(),
            "Stub scheduler: meeting booked"
        );
        let link = format!("{}calendar/{}", LOCAL_LINK_PREFIX, event_id);
        Ok(MeetingBooking::for_slot(event_id, link, start, &self.closer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_parsing() {
        let request = MeetingRequest::new("Ana", "+55", "MBA", "2026-02-20", "10:30");
        let (start, end) = request.slot().unwrap();
        assert_eq!(start.to_string(), "2026-02-20 10:30:00");
        assert_eq!((end - start).num_minutes(), 30);

        let bad = MeetingRequest::new("Ana", "+55", "MBA", "amanhã", "10h");
        assert!(matches!(bad.slot(), Err(IntegrationError::InvalidRequest(_))));
    }

    #[test]
    fn test_slot_accepts_spoken_date_format() {
        let request = MeetingRequest::new("Ana", "+55", "MBA", "20/02/2026", " 10:30 ");
        let (start, _) = request.slot().unwrap();
        assert_eq!(start.to_string(), "2026-02-20 10:30:00");

        assert_eq!(parse_meeting_date("31/02/2026"), None);
        assert_eq!(parse_meeting_date("02/20/2026"), None);
        assert_eq!(
            parse_meeting_date("2026-02-20"),
            NaiveDate::from_ymd_opt(2026, 2, 20)
        );
    }

    #[test]
    fn test_event_text() {
        let request = MeetingRequest::new("Ana Lima", "+5511999990000", "MBA", "2026-02-20", "10:30");
        assert_eq!(request.title(), "📞 Ligação - Ana Lima (MBA)");
        assert!(request.description("Victoria").ends_with("Closer: Victoria"));
    }

    #[tokio::test]
    async fn test_stub_books_valid_slot() {
        let scheduler = StubScheduler::new("Victoria");
        let booking = scheduler
            .schedule(&MeetingRequest::new("Ana", "+55", "MBA", "20/02/2026", "10:30"))
            .await
            .unwrap();
        assert!(booking.event_id.starts_with("EVT-"));
        assert!(booking.is_local());
        assert_eq!(booking.closer, "Victoria");
        assert_eq!(booking.date, "2026-02-20");
        assert_eq!(booking.time, "10:30");

        assert!(scheduler
            .schedule(&MeetingRequest::new("Ana", "+55", "MBA", "sexta", "10:30"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_scheduler_rejects_bad_slot_before_calling_out() {
        // Unroutable endpoint: reaching the network would fail differently
        let scheduler = HttpScheduler::new("http://127.0.0.1:9", None, "victoria", "Victoria").unwrap();
        let err = scheduler
            .schedule(&MeetingRequest::new("Ana", "+55", "MBA", "sexta", "10:30"))
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::InvalidRequest(_)));
        assert_eq!(
            scheduler.url("/events"),
            "http://127.0.0.1:9/calendars/victoria/events"
        );
    }

    #[test]
    fn test_remote_booking_is_not_local() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 20)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        let booking = MeetingBooking::for_slot(
            "evt1".into(),
            "https://calendar.example.com/evt1".into(),
            start,
            "Victoria",
        );
        assert!(!booking.is_local());
        assert_eq!(booking.time, "09:05");
    }
}
