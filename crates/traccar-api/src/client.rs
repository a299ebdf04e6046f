// Traccar REST client
//
// One HTTP request per call: attach the credential, bound the round trip
// with the configured timeout, and map the status line onto the error
// taxonomy. Typed accessors are thin wrappers that parse the JSON the
// executor hands back; the executor itself only guarantees the body
// decoded as JSON.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, Credential};
use crate::error::Error;
use crate::models::{Device, Geofence, Position, ReportsEvent, Server, SubscriptionStatus};
use crate::transport;

/// Historical window used when [`EventsQuery::end_time`] is not given.
const DEFAULT_EVENTS_WINDOW_HOURS: i64 = 30;

/// Filters for [`ApiClient::get_reports_events`].
///
/// `Default` selects the last 30 hours with no device, group, or type
/// restriction.
#[derive(Debug, Clone, Default)]
pub struct EventsQuery {
    /// Restrict to these device ids.
    pub devices: Vec<i64>,
    /// Restrict to these group ids.
    pub groups: Vec<i64>,
    /// Restrict to these event type names, e.g. `"deviceOnline"`.
    pub event_types: Vec<String>,
    /// Report window start (inclusive). Defaults to the current UTC time.
    pub start_time: Option<DateTime<Utc>>,
    /// Report window end (inclusive). Defaults to `start_time` minus 30 hours.
    pub end_time: Option<DateTime<Utc>>,
}

/// Async client for the Traccar server API.
///
/// Holds the immutable [`ClientConfig`], a shared HTTP client with a cookie
/// jar (the session cookie must survive from session open to the socket
/// upgrade), and the subscription status channel. One-shot accessors keep no
/// state between calls.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
    cookie_jar: Arc<Jar>,
    status_tx: watch::Sender<SubscriptionStatus>,
}

impl ApiClient {
    /// Build a client from the given config.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let cookie_jar = Arc::new(Jar::default());
        let http = transport::build_http_client(&config, Arc::clone(&cookie_jar))?;
        let base_url = config.base_url()?;
        let (status_tx, _) = watch::channel(SubscriptionStatus::Disconnected);

        Ok(Self {
            http,
            base_url,
            config,
            cookie_jar,
            status_tx,
        })
    }

    /// Current status of the WebSocket subscription.
    pub fn subscription_status(&self) -> SubscriptionStatus {
        *self.status_tx.borrow()
    }

    /// Receiver for awaiting subscription status transitions instead of
    /// polling [`subscription_status`](Self::subscription_status).
    pub fn subscription_status_watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn cookie_jar(&self) -> &Arc<Jar> {
        &self.cookie_jar
    }

    pub(crate) fn status_sender(&self) -> &watch::Sender<SubscriptionStatus> {
        &self.status_tx
    }

    // ── Request executor ─────────────────────────────────────────────

    /// Start a request against `{base}/{endpoint}` with the credential,
    /// Accept header, and timeout attached. Content-Type is left to the
    /// call site -- plain GETs send JSON, session open differs per
    /// credential form.
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, Error> {
        let url = self.base_url.join(endpoint).map_err(|e| Error::Unexpected {
            message: format!("invalid endpoint '{endpoint}': {e}"),
        })?;

        let builder = self
            .http
            .request(method, url)
            .timeout(self.config.timeout)
            .header(ACCEPT, "application/json");

        Ok(self.authorize(builder))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.credential {
            Credential::Bearer(token) => builder.bearer_auth(token.expose_secret()),
            Credential::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
        }
    }

    /// Send one request and decode the response body as JSON.
    ///
    /// Exactly one attempt is made; every outcome maps to one error kind:
    /// 401 is an authentication failure, any other non-200 a response
    /// failure with the status and reason, timeouts and transport faults
    /// are connection failures.
    pub(crate) async fn execute(&self, builder: RequestBuilder) -> Result<Value, Error> {
        let response = builder.send().await.map_err(Error::transport)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "Unauthorized".into(),
            });
        }
        if status != StatusCode::OK {
            return Err(Error::Response {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            });
        }

        let body = response.text().await.map_err(Error::transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Response {
            status: status.as_u16(),
            reason: format!("invalid JSON body: {e}"),
        })
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, Error> {
        debug!("GET {}{}", self.base_url, endpoint);

        let mut builder = self
            .request(Method::GET, endpoint)?
            .header(CONTENT_TYPE, "application/json");
        if !params.is_empty() {
            builder = builder.query(params);
        }

        self.execute(builder).await
    }

    /// Parse the executor's JSON into the accessor's record shape.
    fn parse<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
        serde_json::from_value(value).map_err(|e| Error::Response {
            status: 200,
            reason: format!("unexpected response shape: {e}"),
        })
    }

    // ── Typed accessors ──────────────────────────────────────────────

    /// Server information from `GET /api/server`.
    pub async fn get_server(&self) -> Result<Server, Error> {
        Self::parse(self.get_json("server", &[]).await?)
    }

    /// All devices visible to the credential, from `GET /api/devices`.
    pub async fn get_devices(&self) -> Result<Vec<Device>, Error> {
        Self::parse(self.get_json("devices", &[]).await?)
    }

    /// All geofences, from `GET /api/geofences`.
    pub async fn get_geofences(&self) -> Result<Vec<Geofence>, Error> {
        Self::parse(self.get_json("geofences", &[]).await?)
    }

    /// Latest known positions, from `GET /api/positions`.
    pub async fn get_positions(&self) -> Result<Vec<Position>, Error> {
        Self::parse(self.get_json("positions", &[]).await?)
    }

    /// Historical events from `GET /api/reports/events`.
    pub async fn get_reports_events(
        &self,
        query: &EventsQuery,
    ) -> Result<Vec<ReportsEvent>, Error> {
        let start = query.start_time.unwrap_or_else(Utc::now);
        let end = query
            .end_time
            .unwrap_or_else(|| start - TimeDelta::hours(DEFAULT_EVENTS_WINDOW_HOURS));

        // The server's wire format binds the window start to `to` and the
        // window end to `from`. Deployed consumers depend on this mapping;
        // keep it exactly as-is.
        let mut params: Vec<(&str, String)> = vec![
            ("to", iso8601_utc(start)),
            ("from", iso8601_utc(end)),
        ];
        params.extend(query.devices.iter().map(|id| ("deviceId", id.to_string())));
        params.extend(query.groups.iter().map(|id| ("groupId", id.to_string())));
        params.extend(query.event_types.iter().map(|t| ("type", t.clone())));

        Self::parse(self.get_json("reports/events", &params).await?)
    }
}

/// Naive ISO-8601 UTC timestamp with the server's literal `Z` suffix.
///
/// Fractional seconds are emitted only when nonzero.
fn iso8601_utc(ts: DateTime<Utc>) -> String {
    format!("{}Z", ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f"))
}
