use crate::client::config::SocketConfig;
use crate::client::http::CredentialSource;
use crate::client::socket::{SocketClient, SocketHandle};
use crate::client::types::{ConnectionPhase, SocketEvent};
use crate::console::{ConsoleSink, DEFAULT_SCROLLBACK, DEFAULT_VIEWPORT_ROWS};
use crate::error::Result;
use crate::events::SubscriptionId;
use crate::persist::KeyValueStore;
use crate::status::{PowerControls, StatusState};
use crate::telemetry::{TelemetryAggregator, TelemetrySnapshot};
use crate::types::{PowerAction, PowerState};
use crate::ws::{OutboundEvent, ServerEvent};

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub socket: SocketConfig,
    pub scrollback: usize,
    pub viewport_rows: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            scrollback: DEFAULT_SCROLLBACK,
            viewport_rows: DEFAULT_VIEWPORT_ROWS,
        }
    }
}

type RefreshSlot = Arc<Mutex<Option<tokio::task::AbortHandle>>>;

/// Everything one server console view needs: the socket plus its
/// subscribers (status, console, telemetry).
///
/// One session per open server view. Dropping it unsubscribes everything,
/// aborts the token refresh and closes the socket.
pub struct ServerSession<C: CredentialSource> {
    server_id: String,
    credentials: Arc<C>,
    socket: SocketClient,
    status: Arc<Mutex<StatusState>>,
    console: Arc<Mutex<ConsoleSink>>,
    telemetry: Arc<Mutex<TelemetryAggregator>>,
    subscriptions: Vec<SubscriptionId>,
    refresh: RefreshSlot,
}

impl<C: CredentialSource> ServerSession<C> {
    pub fn new(
        server_id: impl Into<String>,
        credentials: Arc<C>,
        store: Arc<dyn KeyValueStore>,
        options: SessionOptions,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let server_id = server_id.into();
        let socket = SocketClient::spawn(options.socket.clone(), runtime);
        let status = Arc::new(Mutex::new(StatusState::new()));
        let console = Arc::new(Mutex::new(ConsoleSink::new(
            server_id.clone(),
            store,
            options.scrollback,
            options.viewport_rows,
        )));
        let telemetry = Arc::new(Mutex::new(TelemetryAggregator::new()));
        let refresh: RefreshSlot = Arc::new(Mutex::new(None));

        let mut subscriptions = Vec::new();
        {
            let status = status.clone();
            subscriptions.push(socket.subscribe(move |event| {
                status.lock().on_event(event);
            }));
        }
        {
            let console = console.clone();
            subscriptions.push(socket.subscribe(move |event| {
                console.lock().on_event(event);
            }));
        }
        {
            let telemetry = telemetry.clone();
            subscriptions.push(socket.subscribe(move |event| {
                telemetry.lock().on_event(event);
            }));
        }
        {
            let handler = SessionHandler {
                server_id: server_id.clone(),
                credentials: credentials.clone(),
                socket: socket.handle(),
                refresh: refresh.clone(),
                runtime: runtime.clone(),
            };
            subscriptions.push(socket.subscribe(move |event| handler.on_event(event)));
        }

        Self {
            server_id,
            credentials,
            socket,
            status,
            console,
            telemetry,
            subscriptions,
            refresh,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Fetch socket credentials and connect. The token is stored first so
    /// it goes out as soon as the transport opens.
    pub async fn open(&self) -> Result<()> {
        let creds = self.credentials.websocket_credentials(&self.server_id).await?;
        log::info!("Opening console for {} via {}", self.server_id, creds.socket);
        self.socket.set_token(&creds.token, false);
        self.socket.connect(&creds.socket);
        Ok(())
    }

    pub fn close(&self) {
        if let Some(task) = self.refresh.lock().take() {
            task.abort();
        }
        self.socket.close(None, None);
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.socket.phase()
    }

    /// Observe socket events. Handlers run after the session's own
    /// state has been updated for the same event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.socket.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.socket.unsubscribe(id)
    }

    /// Record the command and send it. Returns false for blank input.
    pub fn submit_command(&self, text: &str) -> bool {
        let event = self.console.lock().submit_command(text);
        match event {
            Some(event) => {
                self.socket.send(event);
                true
            }
            None => false,
        }
    }

    /// Send a power action if the current status allows it. The status
    /// itself only changes when the daemon broadcasts it.
    pub fn set_power_state(&self, action: PowerAction) -> bool {
        let request = self.status.lock().power_request(action);
        match request {
            Some(event) => {
                self.socket.send(event);
                true
            }
            None => false,
        }
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.status.lock().current()
    }

    pub fn power_controls(&self) -> PowerControls {
        self.status.lock().controls()
    }

    pub fn console(&self) -> &Arc<Mutex<ConsoleSink>> {
        &self.console
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.lock().snapshot()
    }
}

impl<C: CredentialSource> Drop for ServerSession<C> {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.socket.unsubscribe(id);
        }
        if let Some(task) = self.refresh.lock().take() {
            task.abort();
        }
    }
}

/// Session-level reactions: log replay after auth and token rotation.
struct SessionHandler<C: CredentialSource> {
    server_id: String,
    credentials: Arc<C>,
    socket: SocketHandle,
    refresh: RefreshSlot,
    runtime: tokio::runtime::Handle,
}

impl<C: CredentialSource> SessionHandler<C> {
    fn on_event(&self, event: &SocketEvent) {
        match event {
            SocketEvent::Server(ServerEvent::AuthSuccess) => {
                log::debug!("Authenticated console for {}", self.server_id);
                self.socket.send(OutboundEvent::SendLogs);
            }
            SocketEvent::Server(ServerEvent::TokenExpiring) => {
                log::info!("Socket token for {} expiring, refreshing", self.server_id);
                self.refresh_token();
            }
            SocketEvent::Server(ServerEvent::TokenExpired) => {
                log::warn!("Socket token for {} expired, refreshing", self.server_id);
                self.refresh_token();
            }
            SocketEvent::Server(ServerEvent::JwtError(message)) => {
                log::error!("Daemon rejected token for {}: {}", self.server_id, message);
            }
            SocketEvent::ConnectError => {
                log::error!("Console for {} gave up reconnecting", self.server_id);
            }
            _ => {}
        }
    }

    fn refresh_token(&self) {
        let credentials = self.credentials.clone();
        let server_id = self.server_id.clone();
        let socket = self.socket.clone();
        let task = self.runtime.spawn(async move {
            match credentials.websocket_credentials(&server_id).await {
                Ok(creds) => socket.set_token(&creds.token, true),
                Err(e) => log::warn!("Token refresh for {} failed: {}", server_id, e),
            }
        });
        if let Some(previous) = self.refresh.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }
}
