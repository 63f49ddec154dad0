//! Holiday lookup against a public holiday calendar.
//!
//! The provider is abstracted as a boolean query: `Some(true)` = holiday,
//! `Some(false)` = not a holiday, `None` = provider unavailable. The
//! business-day predicate upstream decides what `None` means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Deserialize;

use fso_domain::error::{Error, Result};

use crate::auth::{scopes, TokenProvider};

#[async_trait]
pub trait HolidayLookup: Send + Sync {
    /// Is `date` (interpreted in JST) a public holiday?
    async fn is_holiday(&self, date: NaiveDate) -> Option<bool>;
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

pub struct HolidayCalendarClient {
    http: Client,
    endpoint: String,
    calendar_id: String,
    token: Arc<TokenProvider>,
}

impl HolidayCalendarClient {
    pub fn new(
        endpoint: &str,
        calendar_id: &str,
        token: Arc<TokenProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            calendar_id: calendar_id.to_owned(),
            token,
        })
    }

    async fn query(&self, date: NaiveDate) -> Result<bool> {
        let next = date.succ_opt().unwrap_or(date);
        let url = format!(
            "{}/calendars/{}/events?timeMin={}T00:00:00%2B09:00&timeMax={}T00:00:00%2B09:00&singleEvents=true&maxResults=1",
            self.endpoint,
            utf8_percent_encode(&self.calendar_id, NON_ALPHANUMERIC),
            date.format("%Y-%m-%d"),
            next.format("%Y-%m-%d"),
        );
        let token = self.token.access_token(scopes::CALENDAR_RO).await?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "holiday calendar returned {status}: {body}"
            )));
        }
        let events: EventsResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(!events.items.is_empty())
    }
}

#[async_trait]
impl HolidayLookup for HolidayCalendarClient {
    async fn is_holiday(&self, date: NaiveDate) -> Option<bool> {
        match self.query(date).await {
            Ok(holiday) => Some(holiday),
            Err(e) => {
                tracing::warn!(%date, error = %e, "holiday lookup failed");
                None
            }
        }
    }
}
