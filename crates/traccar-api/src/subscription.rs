// WebSocket subscription engine
//
// One live stream per `subscribe` call: open a server-side session, attach
// the session cookie to the socket upgrade, then pump messages to the
// caller's handler until the stream ends, errors, or the cancellation token
// fires. The server session is closed on every exit path, best-effort.
//
// Status transitions (single writer -- this module):
//
//   disconnected -> connecting -> connected -> disconnected  (clean end)
//   connecting | connected     -> error                      (any failure)

use std::future::Future;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Method;
use reqwest::cookie::CookieStore;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Bytes, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::client::ApiClient;
use crate::config::Credential;
use crate::error::Error;
use crate::models::{SubscriptionStatus, SubscriptionUpdate};
use crate::transport;

/// Error type a subscription handler may return. Handler failures are
/// logged and the stream keeps running.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Why the socket loop stopped.
///
/// Kept separate from [`Error`] so the status transitions stay an explicit
/// table in [`ApiClient::subscribe`] instead of exception unwinding.
#[derive(Debug)]
enum SocketOutcome {
    /// The stream ended without a close frame.
    NormalEnd,
    /// The server closed the socket or the transport failed mid-stream.
    ControlClose {
        kind: &'static str,
        detail: Option<String>,
    },
    /// The caller's cancellation token fired.
    Cancelled,
}

impl ApiClient {
    /// Subscribe to live device, position, and event updates.
    ///
    /// Opens a server-side session, connects to `/api/socket`, and invokes
    /// `handler` once per decoded message -- sequentially, in arrival
    /// order. A failing handler is logged and never ends the stream.
    ///
    /// The call runs until the socket closes, a failure occurs, or `cancel`
    /// fires. Cancellation is a clean shutdown: status moves to
    /// [`SubscriptionStatus::Disconnected`] and `Ok(())` is returned. Any
    /// other termination moves status to [`SubscriptionStatus::Error`] and
    /// returns the classified failure. The server-side session is closed on
    /// every exit path; failures during that cleanup are suppressed so they
    /// cannot mask the failure that ended the stream.
    ///
    /// Only one subscription should be active per client at a time; the
    /// status field assumes a single writer.
    pub async fn subscribe<F, Fut>(
        &self,
        cancel: CancellationToken,
        mut handler: F,
    ) -> Result<(), Error>
    where
        F: FnMut(SubscriptionUpdate) -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        self.set_status(SubscriptionStatus::Connecting);

        let result = match self.run_stream(&cancel, &mut handler).await {
            Ok(SocketOutcome::Cancelled) => {
                debug!("subscription cancelled");
                self.set_status(SubscriptionStatus::Disconnected);
                Ok(())
            }
            Ok(SocketOutcome::NormalEnd) => {
                debug!("subscription stream ended");
                self.set_status(SubscriptionStatus::Disconnected);
                Ok(())
            }
            Ok(SocketOutcome::ControlClose { kind, detail }) => {
                self.set_status(SubscriptionStatus::Error);
                let message = match detail {
                    Some(detail) => format!("WebSocket connection closed with {kind}: {detail}"),
                    None => format!("WebSocket connection closed with {kind}"),
                };
                Err(Error::Connection { message })
            }
            Err(e) => {
                self.set_status(SubscriptionStatus::Error);
                Err(e)
            }
        };

        // Best-effort; the real outcome is already in `result`.
        self.close_session().await;

        result
    }

    fn set_status(&self, status: SubscriptionStatus) {
        self.status_sender().send_replace(status);
    }

    /// Session open -> socket connect -> message loop.
    ///
    /// Every suspension point races the cancellation token, so a cancel
    /// while connecting is observed before any socket exists.
    async fn run_stream<F, Fut>(
        &self,
        cancel: &CancellationToken,
        handler: &mut F,
    ) -> Result<SocketOutcome, Error>
    where
        F: FnMut(SubscriptionUpdate) -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SocketOutcome::Cancelled),
            opened = self.open_session() => { opened?; }
        }

        let mut socket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SocketOutcome::Cancelled),
            connected = self.connect_socket() => connected?,
        };

        self.set_status(SubscriptionStatus::Connected);

        Ok(drive_socket(&mut socket, self.config().ws_heartbeat, cancel, handler).await)
    }

    /// Open the server-side session that scopes the subscription.
    ///
    /// Bearer clients pass the token as a query parameter on a GET; basic
    /// clients post the account credentials as a form. Either way the
    /// server answers with a session cookie that the socket upgrade must
    /// present.
    async fn open_session(&self) -> Result<(), Error> {
        debug!("opening server session");

        let builder = match &self.config().credential {
            Credential::Bearer(token) => self
                .request(Method::GET, "session")?
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .query(&[("token", token.expose_secret())]),
            Credential::Basic { username, password } => {
                let form = reqwest::multipart::Form::new()
                    .text("email", username.clone())
                    .text("password", password.expose_secret().to_owned());
                self.request(Method::POST, "session")?.multipart(form)
            }
        };

        match self.execute(builder).await {
            Ok(_) => Ok(()),
            // Transport faults before the socket exists get a
            // session-specific message; other kinds keep their
            // classification.
            Err(Error::Connection { message }) => Err(Error::Connection {
                message: format!("session setup failed: {message}"),
            }),
            Err(e) => Err(e),
        }
    }

    /// Best-effort `DELETE /api/session`; failures never propagate.
    async fn close_session(&self) {
        debug!("closing server session");

        let builder = match self.request(Method::DELETE, "session") {
            Ok(builder) => builder.header(CONTENT_TYPE, "application/json"),
            Err(_) => return,
        };

        if let Err(e) = self.execute(builder).await {
            debug!(error = %e, "failed to close server session");
        }
    }

    /// Establish the WebSocket connection to `/api/socket`.
    async fn connect_socket(&self) -> Result<WsStream, Error> {
        let url = self.config().socket_url()?;
        debug!(url = %url, "connecting WebSocket");

        let uri: tungstenite::http::Uri =
            url.as_str()
                .parse()
                .map_err(|e: tungstenite::http::uri::InvalidUri| Error::Unexpected {
                    message: format!("invalid socket URL: {e}"),
                })?;

        let mut request = ClientRequestBuilder::new(uri);
        // The session cookie from the open call authenticates the upgrade.
        if let Some(cookie) = self.session_cookie() {
            request = request.with_header("Cookie", cookie);
        }

        let connector = transport::websocket_connector(self.config());
        let (socket, _response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
                .await
                .map_err(|e| Error::Connection {
                    message: format!("WebSocket connection failed: {e}"),
                })?;

        Ok(socket)
    }

    fn session_cookie(&self) -> Option<String> {
        self.cookie_jar()
            .cookies(self.base_url())
            .and_then(|value| value.to_str().ok().map(ToOwned::to_owned))
    }
}

/// Pump one established socket: heartbeat pings out, frames in, handler
/// invocations strictly sequential. Returns why the loop stopped.
///
/// Generic over the socket so the loop is testable with scripted frames.
async fn drive_socket<S, F, Fut>(
    socket: &mut S,
    heartbeat: Duration,
    cancel: &CancellationToken,
    handler: &mut F,
) -> SocketOutcome
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: std::fmt::Display,
    F: FnMut(SubscriptionUpdate) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    let mut ping = tokio::time::interval(heartbeat);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SocketOutcome::Cancelled,
            _ = ping.tick() => {
                if let Err(e) = socket.send(Message::Ping(Bytes::new())).await {
                    return SocketOutcome::ControlClose {
                        kind: "ERROR",
                        detail: Some(e.to_string()),
                    };
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch_text(&text, handler).await,
                Some(Ok(Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        debug!(code = %cf.code, reason = %cf.reason, "close frame received");
                    }
                    return SocketOutcome::ControlClose { kind: "CLOSE", detail: None };
                }
                Some(Ok(other)) => {
                    warn!("ignoring unexpected {} frame", frame_kind(&other));
                }
                Some(Err(e)) => {
                    return SocketOutcome::ControlClose {
                        kind: "ERROR",
                        detail: Some(e.to_string()),
                    };
                }
                None => return SocketOutcome::NormalEnd,
            }
        }
    }
}

/// Decode one text frame and hand it to the handler.
///
/// Empty or undecodable payloads are skipped. Handler failures are logged
/// and do not stop the stream.
async fn dispatch_text<F, Fut>(text: &str, handler: &mut F)
where
    F: FnMut(SubscriptionUpdate) -> Fut,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "ignoring undecodable text frame");
            return;
        }
    };

    if value.is_null() || value.as_object().is_some_and(serde_json::Map::is_empty) {
        return;
    }

    let update: SubscriptionUpdate = match serde_json::from_value(value) {
        Ok(update) => update,
        Err(e) => {
            debug!(error = %e, "ignoring text frame with unexpected payload");
            return;
        }
    };

    if let Err(e) = handler(update).await {
        error!(error = %e, "subscription handler failed; continuing");
    }
}

fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "TEXT",
        Message::Binary(_) => "BINARY",
        Message::Ping(_) => "PING",
        Message::Pong(_) => "PONG",
        Message::Close(_) => "CLOSE",
        Message::Frame(_) => "FRAME",
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio_tungstenite::tungstenite::error::ProtocolError;

    use super::*;

    /// In-memory socket: yields a scripted frame sequence and records
    /// everything sent into it.
    struct ScriptedSocket {
        frames: VecDeque<Result<Message, tungstenite::Error>>,
        sent: Vec<Message>,
        /// Stay pending after the script runs out instead of ending the
        /// stream.
        hold_open: bool,
    }

    impl ScriptedSocket {
        fn new(frames: Vec<Result<Message, tungstenite::Error>>) -> Self {
            Self {
                frames: frames.into(),
                sent: Vec::new(),
                hold_open: false,
            }
        }

        fn held_open(mut self) -> Self {
            self.hold_open = true;
            self
        }
    }

    impl Stream for ScriptedSocket {
        type Item = Result<Message, tungstenite::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.frames.pop_front() {
                Some(frame) => Poll::Ready(Some(frame)),
                None if self.hold_open => Poll::Pending,
                None => Poll::Ready(None),
            }
        }
    }

    impl Sink<Message> for ScriptedSocket {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.sent.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn text(payload: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(payload.into()))
    }

    fn close() -> Result<Message, tungstenite::Error> {
        Ok(Message::Close(None))
    }

    const HEARTBEAT: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn text_then_close_dispatches_once_and_names_close() {
        let mut socket = ScriptedSocket::new(vec![text(r#"{"devices": []}"#), close()]);
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let mut handler = |update: SubscriptionUpdate| {
            seen.push(update);
            std::future::ready(Ok::<(), HandlerError>(()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(
            matches!(outcome, SocketOutcome::ControlClose { kind: "CLOSE", .. }),
            "unexpected outcome: {outcome:?}"
        );
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].devices, Some(vec![]));
        assert!(seen[0].events.is_none());
        assert!(seen[0].positions.is_none());
    }

    #[tokio::test]
    async fn failing_handler_does_not_end_the_stream() {
        let mut socket = ScriptedSocket::new(vec![
            text(r#"{"positions": []}"#),
            text(r#"{"devices": []}"#),
            close(),
        ]);
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let mut handler = |_update: SubscriptionUpdate| {
            calls += 1;
            std::future::ready(Err::<(), HandlerError>("boom".into()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(matches!(
            outcome,
            SocketOutcome::ControlClose { kind: "CLOSE", .. }
        ));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn empty_and_undecodable_frames_are_skipped() {
        let mut socket = ScriptedSocket::new(vec![
            text(""),
            text("not json"),
            text("{}"),
            text("null"),
            Ok(Message::Binary(Bytes::from_static(b"\x00\x01"))),
            Ok(Message::Pong(Bytes::new())),
            close(),
        ]);
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let mut handler = |_update: SubscriptionUpdate| {
            calls += 1;
            std::future::ready(Ok::<(), HandlerError>(()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(matches!(
            outcome,
            SocketOutcome::ControlClose { kind: "CLOSE", .. }
        ));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn stream_end_without_close_is_a_normal_end() {
        let mut socket = ScriptedSocket::new(vec![text(r#"{"events": []}"#)]);
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let mut handler = |_update: SubscriptionUpdate| {
            calls += 1;
            std::future::ready(Ok::<(), HandlerError>(()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(matches!(outcome, SocketOutcome::NormalEnd));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transport_error_names_error() {
        let mut socket = ScriptedSocket::new(vec![Err(tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake,
        ))]);
        let cancel = CancellationToken::new();
        let mut handler =
            |_update: SubscriptionUpdate| std::future::ready(Ok::<(), HandlerError>(()));

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        match outcome {
            SocketOutcome::ControlClose { kind, detail } => {
                assert_eq!(kind, "ERROR");
                assert!(detail.is_some());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_token_wins_over_pending_frames() {
        let mut socket = ScriptedSocket::new(vec![text(r#"{"devices": []}"#), close()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        let mut handler = |_update: SubscriptionUpdate| {
            calls += 1;
            std::future::ready(Ok::<(), HandlerError>(()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(matches!(outcome, SocketOutcome::Cancelled));
        assert_eq!(calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_stream_after_dispatch() {
        let mut socket = ScriptedSocket::new(vec![text(r#"{"devices": []}"#)]).held_open();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let mut seen = Vec::new();
        let mut handler = |update: SubscriptionUpdate| {
            seen.push(update);
            std::future::ready(Ok::<(), HandlerError>(()))
        };

        let outcome = drive_socket(&mut socket, HEARTBEAT, &cancel, &mut handler).await;

        assert!(matches!(outcome, SocketOutcome::Cancelled));
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_go_out_on_schedule() {
        let mut socket = ScriptedSocket::new(vec![]).held_open();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let mut handler =
            |_update: SubscriptionUpdate| std::future::ready(Ok::<(), HandlerError>(()));

        let outcome =
            drive_socket(&mut socket, Duration::from_secs(5), &cancel, &mut handler).await;

        assert!(matches!(outcome, SocketOutcome::Cancelled));
        assert_eq!(socket.sent.len(), 2);
        assert!(socket.sent.iter().all(Message::is_ping));
    }
}
