use crate::client::config::SocketConfig;
use crate::client::machine::{Command, ConnectionMachine};
use crate::client::types::{ConnectionPhase, SocketEvent};
use crate::events::{EventBus, SubscriptionId};
use crate::ws::{OutboundEvent, CLOSE_ABNORMAL, CLOSE_NO_STATUS};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests from the owning session to the driver task.
#[derive(Debug)]
pub enum ClientRequest {
    Connect(String),
    SetToken { token: String, is_reauth: bool },
    Send(OutboundEvent),
    Close { code: Option<u16>, reason: Option<String> },
}

/// Cloneable request side of a [`SocketClient`], for subscribers that need
/// to answer events (e.g. request logs after `auth success`).
#[derive(Clone)]
pub struct SocketHandle {
    requests: async_channel::Sender<ClientRequest>,
}

impl SocketHandle {
    fn request(&self, request: ClientRequest) {
        if let Err(e) = self.requests.try_send(request) {
            log::debug!("Socket driver gone, dropping request: {:?}", e.into_inner());
        }
    }

    pub fn connect(&self, url: &str) {
        self.request(ClientRequest::Connect(url.to_string()));
    }

    pub fn set_token(&self, token: &str, is_reauth: bool) {
        self.request(ClientRequest::SetToken {
            token: token.to_string(),
            is_reauth,
        });
    }

    /// Queue a frame. Dropped by the driver unless the transport is open.
    pub fn send(&self, event: OutboundEvent) {
        self.request(ClientRequest::Send(event));
    }

    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        self.request(ClientRequest::Close {
            code,
            reason: reason.map(str::to_string),
        });
    }
}

/// Reconnecting socket connection driven by a tokio task.
///
/// Calls return immediately; the driver processes them in order. Events are
/// published on the driver task in the order the transport produced them.
pub struct SocketClient {
    handle: SocketHandle,
    events: Arc<EventBus<SocketEvent>>,
    phase: Arc<RwLock<ConnectionPhase>>,
    task: tokio::task::AbortHandle,
}

impl SocketClient {
    pub fn spawn(config: SocketConfig, runtime: &tokio::runtime::Handle) -> Self {
        let (tx, rx) = async_channel::unbounded();
        let events = Arc::new(EventBus::new());
        let phase = Arc::new(RwLock::new(ConnectionPhase::Closed));

        let driver = Driver {
            machine: ConnectionMachine::new(config),
            stream: None,
            handshake: None,
            reconnect_at: None,
            events: events.clone(),
            phase: phase.clone(),
        };
        let task = runtime.spawn(driver.run(rx));

        Self {
            handle: SocketHandle { requests: tx },
            events,
            phase,
            task: task.abort_handle(),
        }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle.clone()
    }

    pub fn connect(&self, url: &str) {
        self.handle.connect(url);
    }

    pub fn set_token(&self, token: &str, is_reauth: bool) {
        self.handle.set_token(token, is_reauth);
    }

    pub fn send(&self, event: OutboundEvent) {
        self.handle.send(event);
    }

    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        self.handle.close(code, reason);
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.read()
    }

    pub fn events(&self) -> &Arc<EventBus<SocketEvent>> {
        &self.events
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SocketEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the driver without sending a close frame.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        // Closing the channel makes the driver close the transport and exit,
        // even if subscribers still hold a `SocketHandle`.
        self.handle.requests.close();
    }
}

enum Wake {
    Request(ClientRequest),
    Shutdown,
    Transport(Option<Result<tungstenite::Message, tungstenite::Error>>),
    Handshake(Result<WsStream, String>),
    ReconnectDue,
}

struct Driver {
    machine: ConnectionMachine,
    stream: Option<WsStream>,
    /// In-flight connect, dropped (and so cancelled) by `Close` or a new `Open`
    handshake: Option<Handshake>,
    reconnect_at: Option<Instant>,
    events: Arc<EventBus<SocketEvent>>,
    phase: Arc<RwLock<ConnectionPhase>>,
}

async fn next_message(
    stream: &mut Option<WsStream>,
) -> Option<Result<tungstenite::Message, tungstenite::Error>> {
    match stream {
        Some(ws) => futures::StreamExt::next(ws).await,
        None => std::future::pending().await,
    }
}

fn handshake(url: String) -> Handshake {
    Box::pin(async move {
        log::info!("Connecting to {}", url);
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
            .await
        {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => {
                log::warn!("Socket connect to {} failed: {}", url, e);
                Err(e.to_string())
            }
            Err(_) => {
                log::warn!("Socket connect to {} timed out", url);
                Err("handshake timed out".to_string())
            }
        }
    })
}

async fn pending_handshake(handshake: &mut Option<Handshake>) -> Result<WsStream, String> {
    match handshake {
        Some(handshake) => handshake.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, requests: async_channel::Receiver<ClientRequest>) {
        loop {
            let wake = tokio::select! {
                request = requests.recv() => match request {
                    Ok(request) => Wake::Request(request),
                    Err(_) => Wake::Shutdown,
                },
                message = next_message(&mut self.stream) => Wake::Transport(message),
                result = pending_handshake(&mut self.handshake) => Wake::Handshake(result),
                _ = reconnect_timer(self.reconnect_at) => Wake::ReconnectDue,
            };

            let commands = match wake {
                Wake::Request(request) => self.on_request(request),
                Wake::Transport(message) => self.on_transport(message),
                Wake::Handshake(result) => self.on_handshake(result),
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    self.machine.on_reconnect_due()
                }
                Wake::Shutdown => {
                    let commands = self.machine.close(None, None);
                    self.execute(commands).await;
                    log::debug!("Socket driver stopped");
                    return;
                }
            };
            self.execute(commands).await;
        }
    }

    fn on_request(&mut self, request: ClientRequest) -> Vec<Command> {
        match request {
            ClientRequest::Connect(url) => self.machine.connect(&url),
            ClientRequest::SetToken { token, is_reauth } => {
                self.machine.set_token(&token, is_reauth)
            }
            ClientRequest::Send(event) => self.machine.send(&event).into_iter().collect(),
            ClientRequest::Close { code, reason } => self.machine.close(code, reason.as_deref()),
        }
    }

    fn on_transport(
        &mut self,
        message: Option<Result<tungstenite::Message, tungstenite::Error>>,
    ) -> Vec<Command> {
        match message {
            Some(Ok(tungstenite::Message::Text(text))) => {
                log::trace!("<- {}", text);
                self.machine.on_message(&text)
            }
            Some(Ok(tungstenite::Message::Close(frame))) => {
                self.stream = None;
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                    None => (CLOSE_NO_STATUS, String::new()),
                };
                self.machine.on_close(code, &reason)
            }
            Some(Ok(_)) => Vec::new(),
            Some(Err(e)) => {
                self.stream = None;
                let mut commands = self.machine.on_error(&e.to_string());
                commands.extend(self.machine.on_close(CLOSE_ABNORMAL, ""));
                commands
            }
            None => {
                self.stream = None;
                self.machine.on_close(CLOSE_ABNORMAL, "")
            }
        }
    }

    fn on_handshake(&mut self, result: Result<WsStream, String>) -> Vec<Command> {
        self.handshake = None;
        match result {
            Ok(ws) => {
                self.stream = Some(ws);
                self.machine.on_open()
            }
            Err(e) => {
                let mut commands = self.machine.on_error(&e);
                commands.extend(self.machine.on_close(CLOSE_ABNORMAL, ""));
                commands
            }
        }
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        let mut queue: VecDeque<Command> = commands.into();
        while let Some(command) = queue.pop_front() {
            *self.phase.write() = self.machine.phase();
            match command {
                Command::Open { url } => {
                    self.stream = None;
                    self.handshake = Some(handshake(url));
                }
                Command::Transmit(text) => {
                    let Some(ws) = self.stream.as_mut() else {
                        continue;
                    };
                    log::trace!("-> {}", text);
                    if let Err(e) =
                        futures::SinkExt::send(ws, tungstenite::Message::Text(text.into())).await
                    {
                        log::warn!("Failed to write frame: {}", e);
                        self.stream = None;
                        queue.extend(self.machine.on_error(&e.to_string()));
                        queue.extend(self.machine.on_close(CLOSE_ABNORMAL, ""));
                    }
                }
                Command::Close { code, reason } => {
                    if self.handshake.take().is_some() {
                        log::debug!("Cancelled socket handshake");
                    }
                    if let Some(mut ws) = self.stream.take() {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = ws.close(Some(frame)).await {
                            log::debug!("Close handshake failed: {}", e);
                        }
                    }
                }
                Command::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Command::CancelReconnect => self.reconnect_at = None,
                Command::Emit(event) => self.events.emit(&event),
            }
        }
        *self.phase.write() = self.machine.phase();
    }
}
