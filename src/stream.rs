//! Live event stream of a single appliance.
//!
//! A background task keeps one server-sent-events connection open per
//! appliance, applies incoming frames to the appliance's cached state and
//! republishes them as [`ApplianceEvent`]s. A watchdog reopens the
//! connection when nothing (not even a keep-alive) arrived for
//! [`WATCHDOG_INTERVAL`]. A stream closed by the server is reopened after
//! [`RECONNECT_DELAY`] and the appliance state fetched again. A rejected
//! access token is refreshed once before giving up.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, trace, warn};
use reqwest::header::ACCEPT;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::appliance::{Appliance, ApplianceInner};
use crate::error::{Error, Result};
use crate::session::{parse_detail, Session};
use crate::sse::{self, SseFrame};
use crate::types::{EventKind, EventPayload, EventRecord};

/// Silence after which a connection is considered dead, and the period of
/// the watchdog checking for it.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(80);

/// Pause before reopening a stream the server closed.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub type FrameStream = BoxStream<'static, Result<SseFrame>>;

/// Opens the push connection for an event URL.
///
/// Errors carrying HTTP status 401 make the reader refresh the session's
/// tokens and reconnect; any other error ends the stream.
pub trait EventConnector: Send + Sync {
    fn connect(&self, url: String, access_token: String) -> BoxFuture<'static, Result<FrameStream>>;
}

/// Server-sent events over `reqwest`.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
}

impl SseConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl EventConnector for SseConnector {
    fn connect(&self, url: String, access_token: String) -> BoxFuture<'static, Result<FrameStream>> {
        let client = self.client.clone();
        async move {
            let response = client
                .get(&url)
                .bearer_auth(&access_token)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::api(status.as_u16(), parse_detail(&text)));
            }

            Ok(sse::frames(response.bytes_stream()).boxed())
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    /// Watchdog found the connection silent
    Stale,
    Reconnecting,
    /// Ended by an error; see the `ApplianceEvent::Error` emitted with it
    Failed,
    Closed,
}

/// Notification published on [`Appliance::subscribe`].
#[derive(Debug)]
pub enum ApplianceEvent {
    /// The appliance connected to or disconnected from the cloud
    Connected(bool),
    Event(EventRecord),
    /// A stream failure, or a failed resync after reconnecting
    Error(Error),
}

pub(crate) struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the reader and wait until it dropped its connection.
    pub(crate) async fn close(mut self) {
        self.cancel.cancel();
        if let Err(err) = (&mut self.task).await {
            warn!("Event stream task ended abnormally: {}", err);
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn(appliance: &Appliance, connector: Arc<dyn EventConnector>, url: String) -> StreamHandle {
    let cancel = CancellationToken::new();
    let state = appliance.stream_state_sender();
    let reader = Reader {
        appliance: appliance.downgrade(),
        session: appliance.session().clone(),
        connector,
        events: appliance.events_sender(),
        state: state.clone(),
        url,
        haid: appliance.id().to_string(),
    };

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = task_cancel.cancelled() => {
                state.send_replace(StreamState::Closed);
            }
            _ = reader.run() => {}
        }
    });

    StreamHandle { cancel, task }
}

/// An open connection together with its watchdog.
struct Link {
    // Declared first so the timer is dropped before the transport.
    watchdog: Interval,
    frames: Option<FrameStream>,
    /// Token the connection was opened with
    token: String,
    last_activity: Instant,
}

impl Link {
    fn attach(&mut self, connection: Connection) {
        self.frames = Some(connection.frames);
        self.token = connection.token;
        self.last_activity = Instant::now();
    }
}

struct Connection {
    frames: FrameStream,
    token: String,
    /// The token had to be refreshed before the server accepted it
    refreshed: bool,
}

struct Reader {
    appliance: Weak<ApplianceInner>,
    session: Arc<Session>,
    connector: Arc<dyn EventConnector>,
    events: broadcast::Sender<Arc<ApplianceEvent>>,
    state: Arc<watch::Sender<StreamState>>,
    url: String,
    haid: String,
}

impl Reader {
    async fn run(self) {
        self.set_state(StreamState::Connecting);
        let connection = match self.open().await {
            Ok(connection) => connection,
            Err(err) => return self.fail(err),
        };
        info!("Event stream for {} connected", self.haid);
        self.set_state(StreamState::Connected);
        if connection.refreshed {
            self.resync().await;
        }

        let start = Instant::now();
        let mut link = Link {
            watchdog: interval_at(start + WATCHDOG_INTERVAL, WATCHDOG_INTERVAL),
            frames: Some(connection.frames),
            token: connection.token,
            last_activity: start,
        };

        loop {
            tokio::select! {
                _ = link.watchdog.tick() => {
                    if link.last_activity.elapsed() < WATCHDOG_INTERVAL {
                        continue;
                    }
                    warn!(
                        "No message received from {} in the last {} seconds. Restarting event stream.",
                        self.haid,
                        WATCHDOG_INTERVAL.as_secs()
                    );
                    self.set_state(StreamState::Stale);
                    link.frames = None;
                    if let Err(err) = self.reconnect(&mut link, false).await {
                        return self.fail(err);
                    }
                }
                next = next_frame(&mut link.frames) => match next {
                    Some(Ok(frame)) => {
                        link.last_activity = Instant::now();
                        let Some(appliance) = Appliance::upgrade(&self.appliance) else {
                            debug!("Appliance {} dropped, stopping event stream", self.haid);
                            return;
                        };
                        handle_frame(&appliance, &frame).await;
                    }
                    Some(Err(err)) if err.is_unauthorized() => {
                        link.frames = None;
                        let connection = match self.reauthenticate(&link.token).await {
                            Ok(connection) => connection,
                            Err(err) => return self.fail(err),
                        };
                        link.attach(connection);
                        self.set_state(StreamState::Connected);
                        self.resync().await;
                    }
                    Some(Err(err)) => return self.fail(err),
                    None => {
                        info!("Event stream for {} ended by the server, reconnecting", self.haid);
                        link.frames = None;
                        self.set_state(StreamState::Disconnected);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        if let Err(err) = self.reconnect(&mut link, true).await {
                            return self.fail(err);
                        }
                    }
                }
            }
        }
    }

    /// Reopen the stream on `link`. Details and status are fetched again
    /// when `resync` is set or the token had to be refreshed.
    async fn reconnect(&self, link: &mut Link, resync: bool) -> Result<()> {
        self.set_state(StreamState::Reconnecting);
        let connection = self.open().await?;
        let resync = resync || connection.refreshed;
        link.attach(connection);
        self.set_state(StreamState::Connected);
        if resync {
            self.resync().await;
        }
        Ok(())
    }

    /// Connect with the session's current token, refreshing it once if the
    /// server rejects it.
    async fn open(&self) -> Result<Connection> {
        let token = self.session.access_token().await.ok_or(Error::NoToken)?;
        debug!("Opening event stream {}", self.url);
        match self.connector.connect(self.url.clone(), token.clone()).await {
            Ok(frames) => Ok(Connection {
                frames,
                token,
                refreshed: false,
            }),
            Err(err) if err.is_unauthorized() => self.reauthenticate(&token).await,
            Err(err) => Err(err),
        }
    }

    async fn reauthenticate(&self, used_token: &str) -> Result<Connection> {
        info!("Event stream for {} rejected the access token", self.haid);
        self.set_state(StreamState::Reconnecting);
        if let Err(err) = self.session.refresh_if_stale(used_token).await {
            return Err(Error::StreamAuth(err.to_string()));
        }

        let token = self.session.access_token().await.ok_or(Error::NoToken)?;
        match self.connector.connect(self.url.clone(), token.clone()).await {
            Ok(frames) => Ok(Connection {
                frames,
                token,
                refreshed: true,
            }),
            Err(err) if err.is_unauthorized() => Err(Error::StreamAuth(err.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Fetch details and status once, to catch up on anything missed while
    /// the stream was down.
    async fn resync(&self) {
        let Some(appliance) = Appliance::upgrade(&self.appliance) else {
            return;
        };
        debug!("Resynchronizing {} after reconnect", self.haid);
        if let Err(err) = appliance.get_details(true).await {
            warn!("Could not refresh details of {}: {}", self.haid, err);
            self.emit(ApplianceEvent::Error(err));
        }
        if let Err(err) = appliance.get_status(true).await {
            warn!("Could not refresh status of {}: {}", self.haid, err);
            self.emit(ApplianceEvent::Error(err));
        }
    }

    fn fail(&self, err: Error) {
        let err = match err {
            Error::StreamAuth(_) | Error::StreamFatal(_) => err,
            other => Error::StreamFatal(other.to_string()),
        };
        error!("Event stream for {} failed: {}", self.haid, err);
        self.emit(ApplianceEvent::Error(err));
        self.set_state(StreamState::Failed);
    }

    fn emit(&self, event: ApplianceEvent) {
        let _ = self.events.send(Arc::new(event));
    }

    fn set_state(&self, state: StreamState) {
        self.state.send_replace(state);
    }
}

async fn next_frame(frames: &mut Option<FrameStream>) -> Option<Result<SseFrame>> {
    match frames {
        Some(frames) => frames.next().await,
        None => futures::future::pending().await,
    }
}

/// Apply one frame to the appliance and publish the resulting events.
pub(crate) async fn handle_frame(appliance: &Appliance, frame: &SseFrame) {
    let Some(kind) = EventKind::from_name(&frame.event) else {
        debug!("Ignoring unknown event {:?} from {}", frame.event, appliance.id());
        return;
    };

    match kind {
        EventKind::KeepAlive => trace!("Keep-alive from {}", appliance.id()),
        EventKind::Connected | EventKind::Disconnected => {
            let connected = kind == EventKind::Connected;
            info!(
                "{} {}",
                appliance.id(),
                if connected { "connected" } else { "disconnected" }
            );
            appliance.set_connected(connected).await;
            appliance.emit(ApplianceEvent::Connected(connected));
        }
        EventKind::Status | EventKind::Event | EventKind::Notify => {
            let payload: EventPayload = match serde_json::from_str(&frame.data) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Malformed {} frame from {}: {}", kind, appliance.id(), err);
                    return;
                }
            };
            for item in payload.items {
                if kind == EventKind::Status {
                    appliance.update_status(&item.key, item.value.clone()).await;
                }
                let record = EventRecord::new(kind, item);
                debug!("[{}] {}: {}", kind, appliance.id(), record.summary);
                appliance.emit(ApplianceEvent::Event(record));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::types::ApplianceDetails;
    use serde_json::json;

    fn appliance() -> Appliance {
        let session = Session::new(SessionConfig::new("client").with_base_url("http://127.0.0.1:9")).unwrap();
        let details = ApplianceDetails {
            connected: true,
            ..ApplianceDetails::default()
        };
        Appliance::new(Arc::new(session), "SIEMENS-HCS02DWH1-1234", Some(details))
    }

    fn next_record(rx: &mut broadcast::Receiver<Arc<ApplianceEvent>>) -> EventRecord {
        match &*rx.try_recv().unwrap() {
            ApplianceEvent::Event(record) => record.clone(),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_frame_updates_status() {
        let appliance = appliance();
        let mut rx = appliance.subscribe();
        let data = json!({
            "items": [{
                "key": "BSH.Common.Status.DoorState",
                "value": "Open",
                "timestamp": 1_700_000_000
            }],
            "haId": "SIEMENS-HCS02DWH1-1234"
        });

        handle_frame(&appliance, &SseFrame::new("STATUS", data.to_string())).await;

        assert_eq!(appliance.status().await["BSH.Common.Status.DoorState"], "Open");
        let record = next_record(&mut rx);
        assert_eq!(record.kind, EventKind::Status);
        assert_eq!(record.summary, "DoorState=Open");
        assert_eq!(record.date.unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_notify_frame_does_not_touch_status() {
        let appliance = appliance();
        let mut rx = appliance.subscribe();
        let data = json!({"items": [
            {"key": "BSH.Common.Option.RemainingProgramTime", "value": 125, "unit": "seconds"},
            {"key": "BSH.Common.Option.ProgramProgress", "value": 12, "unit": "%"}
        ]});

        handle_frame(&appliance, &SseFrame::new("NOTIFY", data.to_string())).await;

        assert!(appliance.status().await.is_empty());
        assert!(next_record(&mut rx).summary.ends_with("00:02:05"));
        assert_eq!(next_record(&mut rx).summary, "ProgramProgress=12%");
    }

    #[tokio::test]
    async fn test_connectivity_frames() {
        let appliance = appliance();
        let mut rx = appliance.subscribe();

        handle_frame(&appliance, &SseFrame::new("DISCONNECTED", "")).await;
        assert!(!appliance.connected().await);
        assert!(matches!(&*rx.try_recv().unwrap(), ApplianceEvent::Connected(false)));

        handle_frame(&appliance, &SseFrame::new("CONNECTED", "{}")).await;
        assert!(appliance.connected().await);
        assert!(matches!(&*rx.try_recv().unwrap(), ApplianceEvent::Connected(true)));
    }

    #[tokio::test]
    async fn test_keep_alive_and_unknown_frames_are_silent() {
        let appliance = appliance();
        let mut rx = appliance.subscribe();

        handle_frame(&appliance, &SseFrame::new("KEEP-ALIVE", "")).await;
        handle_frame(&appliance, &SseFrame::new("PAIRED", "{}")).await;
        handle_frame(&appliance, &SseFrame::new("STATUS", "not json")).await;

        assert!(rx.try_recv().is_err());
        assert!(appliance.status().await.is_empty());
    }
}
