use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use log::debug;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};

use crate::api::{self, Endpoint};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stream::{self, ApplianceEvent, EventConnector, SseConnector, StreamHandle, StreamState};
use crate::types::{ApplianceDetails, Program, ProgramOption};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A single home appliance.
///
/// Cheap to clone; all clones share the cached details, status and event
/// stream.
#[derive(Clone)]
pub struct Appliance {
    inner: Arc<ApplianceInner>,
}

pub(crate) struct ApplianceInner {
    session: Arc<Session>,
    id: String,
    details: RwLock<Option<ApplianceDetails>>,
    status: RwLock<BTreeMap<String, Value>>,
    stream: Mutex<Option<StreamHandle>>,
    events: broadcast::Sender<Arc<ApplianceEvent>>,
    stream_state: Arc<watch::Sender<StreamState>>,
}

impl std::fmt::Debug for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appliance").field("id", &self.inner.id).finish()
    }
}

impl Appliance {
    pub fn new(session: Arc<Session>, id: impl Into<String>, details: Option<ApplianceDetails>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stream_state, _) = watch::channel(StreamState::Disconnected);

        Self {
            inner: Arc::new(ApplianceInner {
                session,
                id: id.into(),
                details: RwLock::new(details),
                status: RwLock::new(BTreeMap::new()),
                stream: Mutex::new(None),
                events,
                stream_state: Arc::new(stream_state),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ApplianceInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ApplianceInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Whether both handles refer to the same appliance instance.
    pub fn ptr_eq(&self, other: &Appliance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The haId assigned by the server.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Receive connectivity changes, events and stream errors, in the order
    /// the stream delivered them.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ApplianceEvent>> {
        self.inner.events.subscribe()
    }

    pub fn stream_state(&self) -> StreamState {
        *self.inner.stream_state.borrow()
    }

    pub fn watch_stream_state(&self) -> watch::Receiver<StreamState> {
        self.inner.stream_state.subscribe()
    }

    // Cached details

    pub async fn details(&self) -> Option<ApplianceDetails> {
        self.inner.details.read().await.clone()
    }

    pub async fn name(&self) -> Option<String> {
        self.detail(|d| d.name.clone()).await
    }

    pub async fn brand(&self) -> Option<String> {
        self.detail(|d| d.brand.clone()).await
    }

    pub async fn appliance_type(&self) -> Option<String> {
        self.detail(|d| d.appliance_type.clone()).await
    }

    pub async fn vib(&self) -> Option<String> {
        self.detail(|d| d.vib.clone()).await
    }

    pub async fn enumber(&self) -> Option<String> {
        self.detail(|d| d.enumber.clone()).await
    }

    pub async fn connected(&self) -> bool {
        self.detail(|d| Some(d.connected)).await.unwrap_or(false)
    }

    async fn detail<T>(&self, field: impl FnOnce(&ApplianceDetails) -> Option<T>) -> Option<T> {
        self.inner.details.read().await.as_ref().and_then(field)
    }

    /// Last known status values, without touching the network.
    pub async fn status(&self) -> BTreeMap<String, Value> {
        self.inner.status.read().await.clone()
    }

    /// Return the details, fetching them when `force` is set or nothing is
    /// cached yet.
    pub async fn get_details(&self, force: bool) -> Result<ApplianceDetails> {
        if !force {
            if let Some(details) = self.details().await {
                return Ok(details);
            }
        }

        let raw = self
            .inner
            .session
            .authenticated_request(api::APPLIANCE, &[("haid", self.id())], None)
            .await?;
        let mut payload: Value = serde_json::from_str(&raw)?;
        let Some(Value::Object(mut data)) = payload.get_mut("data").map(Value::take) else {
            return Err(Error::InvalidResponseFormat(
                "appliance details without data envelope".to_string(),
            ));
        };
        data.remove("haId");

        let details: ApplianceDetails = serde_json::from_value(Value::Object(data))?;
        *self.inner.details.write().await = Some(details.clone());
        Ok(details)
    }

    /// Return the status map, fetching and merging fresh values when `force`
    /// is set or nothing is cached yet.
    ///
    /// Fails with [`Error::DeviceOffline`] without a request when the
    /// appliance is known to be disconnected.
    pub async fn get_status(&self, force: bool) -> Result<BTreeMap<String, Value>> {
        if !self.connected().await {
            return Err(Error::DeviceOffline(self.id().to_string()));
        }

        {
            let status = self.inner.status.read().await;
            if !force && !status.is_empty() {
                return Ok(status.clone());
            }
        }

        let Value::Array(items) = self.call(api::STATUS, &[], None).await? else {
            return Err(Error::InvalidResponseFormat(
                "status is not a list".to_string(),
            ));
        };

        let mut status = self.inner.status.write().await;
        for item in items {
            if let Some(key) = item.get("key").and_then(Value::as_str) {
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                status.insert(key.to_string(), value);
            }
        }
        Ok(status.clone())
    }

    pub async fn status_item(&self, key: &str) -> Result<Value> {
        self.call(api::STATUS_ITEM, &[("statuskey", key)], None).await
    }

    // Images

    pub async fn images(&self) -> Result<Value> {
        self.call(api::IMAGES, &[], None).await
    }

    pub async fn image(&self, key: &str) -> Result<Value> {
        self.call(api::IMAGE, &[("imagekey", key)], None).await
    }

    // Programs

    pub async fn active_program(&self) -> Result<Value> {
        self.call(api::ACTIVE_PROGRAM, &[], None).await
    }

    pub async fn start_program(&self, program: &Program) -> Result<Value> {
        let body = serde_json::to_value(program)?;
        self.call(api::START_PROGRAM, &[], Some(body)).await
    }

    pub async fn stop_program(&self) -> Result<Value> {
        self.call(api::STOP_PROGRAM, &[], None).await
    }

    pub async fn active_program_options(&self) -> Result<Value> {
        self.call(api::ACTIVE_OPTIONS, &[], None).await
    }

    pub async fn set_active_program_options(&self, options: &[ProgramOption]) -> Result<Value> {
        let body = json!({ "options": options });
        self.call(api::SET_ACTIVE_OPTIONS, &[], Some(body)).await
    }

    pub async fn active_program_option(&self, key: &str) -> Result<Value> {
        self.call(api::ACTIVE_OPTION, &[("optionkey", key)], None).await
    }

    pub async fn set_active_program_option(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        let body = json!({ "key": key, "value": value.into() });
        self.call(api::SET_ACTIVE_OPTION, &[("optionkey", key)], Some(body))
            .await
    }

    pub async fn selected_program(&self) -> Result<Value> {
        self.call(api::SELECTED_PROGRAM, &[], None).await
    }

    pub async fn select_program(&self, program: &Program) -> Result<Value> {
        let body = serde_json::to_value(program)?;
        self.call(api::SELECT_PROGRAM, &[], Some(body)).await
    }

    pub async fn selected_program_options(&self) -> Result<Value> {
        self.call(api::SELECTED_OPTIONS, &[], None).await
    }

    pub async fn set_selected_program_options(&self, options: &[ProgramOption]) -> Result<Value> {
        let body = json!({ "options": options });
        self.call(api::SET_SELECTED_OPTIONS, &[], Some(body)).await
    }

    pub async fn selected_program_option(&self, key: &str) -> Result<Value> {
        self.call(api::SELECTED_OPTION, &[("optionkey", key)], None).await
    }

    pub async fn set_selected_program_option(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        let body = json!({ "key": key, "value": value.into() });
        self.call(api::SET_SELECTED_OPTION, &[("optionkey", key)], Some(body))
            .await
    }

    pub async fn available_programs(&self) -> Result<Value> {
        self.call(api::AVAILABLE_PROGRAMS, &[], None).await
    }

    /// Options supported by one of the available programs.
    pub async fn available_program_options(&self, program_key: &str) -> Result<Value> {
        let program = self
            .call(api::AVAILABLE_PROGRAM, &[("programkey", program_key)], None)
            .await?;
        Ok(program
            .get("options")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    // Settings

    /// All settings as a key to value map.
    pub async fn settings(&self) -> Result<BTreeMap<String, Value>> {
        let Value::Array(items) = self.call(api::SETTINGS, &[], None).await? else {
            return Err(Error::InvalidResponseFormat(
                "settings are not a list".to_string(),
            ));
        };
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let key = item.get("key")?.as_str()?.to_string();
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Some((key, value))
            })
            .collect())
    }

    pub async fn setting(&self, key: &str) -> Result<Value> {
        self.call(api::SETTING, &[("settingskey", key)], None).await
    }

    pub async fn set_setting(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        let body = json!({ "key": key, "value": value.into() });
        self.call(api::SET_SETTING, &[("settingskey", key)], Some(body))
            .await
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        params: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let mut all_params = vec![("haid", self.id())];
        all_params.extend_from_slice(params);
        let body = body.map(|data| json!({ "data": data }));

        let raw = self
            .inner
            .session
            .authenticated_request(endpoint, &all_params, body.as_ref())
            .await?;
        unwrap_envelope(&raw)
    }

    // Event stream

    /// Open the live event stream using the default SSE transport.
    pub async fn register_events(&self) -> Result<()> {
        let connector = Arc::new(SseConnector::new(self.inner.session.http_client().clone()));
        self.register_events_with(connector).await
    }

    /// Open the live event stream over a custom transport.
    ///
    /// Does nothing if a stream is already running.
    pub async fn register_events_with(&self, connector: Arc<dyn EventConnector>) -> Result<()> {
        if self.inner.session.access_token().await.is_none() {
            return Err(Error::NoToken);
        }

        let mut slot = self.inner.stream.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Event stream for {} already registered", self.id());
            return Ok(());
        }

        let url = self
            .inner
            .session
            .endpoint_url(api::EVENTS, &[("haid", self.id())]);
        *slot = Some(stream::spawn(self, connector, url));
        Ok(())
    }

    /// Close the event stream. Safe to call at any time, any number of times.
    pub async fn unregister_events(&self) {
        let handle = self.inner.stream.lock().await.take();
        if let Some(handle) = handle {
            handle.close().await;
        }
        self.inner.stream_state.send_replace(StreamState::Closed);
    }

    pub(crate) fn events_sender(&self) -> broadcast::Sender<Arc<ApplianceEvent>> {
        self.inner.events.clone()
    }

    pub(crate) fn stream_state_sender(&self) -> Arc<watch::Sender<StreamState>> {
        self.inner.stream_state.clone()
    }

    pub(crate) fn emit(&self, event: ApplianceEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(Arc::new(event));
    }

    pub(crate) async fn set_connected(&self, connected: bool) {
        let mut details = self.inner.details.write().await;
        details.get_or_insert_with(ApplianceDetails::default).connected = connected;
    }

    pub(crate) async fn update_status(&self, key: &str, value: Value) {
        self.inner.status.write().await.insert(key.to_string(), value);
    }
}

/// Strip the `data` envelope and, if what remains is an object with a
/// single key (`programs`, `options`, `status`, ...), that key too.
///
/// A payload that genuinely consists of a single key is unwrapped as well.
pub fn unwrap_envelope(raw: &str) -> Result<Value> {
    let payload: Value = serde_json::from_str(raw)?;
    let data = match payload {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    };

    Ok(match data {
        Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
            Some((_, inner)) => inner,
            None => Value::Null,
        },
        other => other,
    })
}
