//! Serialized client runtime.
//!
//! A named worker thread owns the [`Client`] inside a current-thread tokio
//! runtime. Handles post commands over an unbounded channel and block on a
//! std channel for the answer, so engine operations never interleave. The
//! worker also runs the periodic expiry sweep.

mod state;

use self::state::{Job, RuntimeCommand, RuntimeRequest, RuntimeResponse, WorkerInit, WorkerState};
use crate::client::Client;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::transport::Transport;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use wc_core::params::SessionProposal;
use wc_core::{
    Clock, JsonRpcResponse, KeyValueStorage, Pairing, PairingPermissions, Reason, Session,
    SessionPermissions, SystemClock, WalletConnectUri,
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    running: AtomicBool,
    request_timeout: Duration,
    command_tx: UnboundedSender<RuntimeRequest>,
}

impl ClientHandle {
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::Relaxed) {
            return;
        }
        let _ = self.send_command(RuntimeCommand::Stop);
    }

    /// Runs `f` on the worker thread and returns its result.
    pub fn with_client<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&Client) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.is_running() {
            return Err(EngineError::Runtime("client runtime is stopped".to_string()));
        }
        let (tx, rx) = std_mpsc::channel();
        let job: Job = Box::new(move |client| {
            let _ = tx.send(f(client));
        });
        match self.send_command(RuntimeCommand::Execute(job))? {
            RuntimeResponse::Ack => rx
                .try_recv()
                .map_err(|_| EngineError::Runtime("runtime job produced no result".to_string())),
            RuntimeResponse::Event(_) => {
                Err(EngineError::Runtime("unexpected runtime response".to_string()))
            }
        }
    }

    /// Processes one relay message and reports the outcome.
    pub fn deliver(&self, topic: &str, message: &str) -> Result<(), EngineError> {
        let (topic, message) = (topic.to_string(), message.to_string());
        self.with_client(move |client| client.handle_transport_message(&topic, &message))?
    }

    /// Queues one relay message without waiting. Failures are logged by the
    /// worker.
    pub fn enqueue(&self, topic: &str, message: &str) -> Result<(), EngineError> {
        let (respond_to, _) = std_mpsc::channel();
        let command =
            RuntimeCommand::Deliver { topic: topic.to_string(), message: message.to_string() };
        self.inner
            .command_tx
            .send(RuntimeRequest { command, respond_to })
            .map_err(|_| EngineError::Runtime("client runtime worker unavailable".to_string()))
    }

    pub fn poll_event(&self) -> Option<EngineEvent> {
        if !self.is_running() {
            return None;
        }
        match self.send_command(RuntimeCommand::PollEvent) {
            Ok(RuntimeResponse::Event(event)) => event,
            _ => {
                self.inner.running.store(false, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn subscribe_events(&self) -> Result<broadcast::Receiver<EngineEvent>, EngineError> {
        self.with_client(Client::subscribe_events)
    }

    pub fn propose_pairing(
        &self,
        permissions: PairingPermissions,
    ) -> Result<WalletConnectUri, EngineError> {
        self.with_client(move |client| client.pairing().propose(permissions))?
    }

    pub fn approve_pairing(&self, uri: WalletConnectUri) -> Result<Pairing, EngineError> {
        self.with_client(move |client| client.pairing().approve(&uri))?
    }

    pub fn ping_pairing(&self, topic: &str) -> Result<i64, EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.pairing().ping(&topic))?
    }

    pub fn delete_pairing(&self, topic: &str, reason: Reason) -> Result<(), EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.pairing().delete(&topic, reason))?
    }

    pub fn settled_pairings(&self) -> Result<Vec<Pairing>, EngineError> {
        Ok(self.with_client(|client| client.pairing().get_settled_pairings())??)
    }

    pub fn propose_session(
        &self,
        pairing_topic: &str,
        permissions: SessionPermissions,
    ) -> Result<SessionProposal, EngineError> {
        let pairing_topic = pairing_topic.to_string();
        self.with_client(move |client| client.session().propose(&pairing_topic, permissions, None))?
    }

    pub fn approve_session(
        &self,
        proposal: SessionProposal,
        accounts: Vec<String>,
    ) -> Result<Session, EngineError> {
        self.with_client(move |client| client.session().approve(&proposal, accounts))?
    }

    pub fn reject_session(
        &self,
        proposal: SessionProposal,
        reason: Reason,
    ) -> Result<(), EngineError> {
        self.with_client(move |client| client.session().reject(&proposal, reason))?
    }

    pub fn update_session(
        &self,
        topic: &str,
        accounts: Vec<String>,
    ) -> Result<i64, EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.session().update(&topic, accounts))?
    }

    pub fn upgrade_session(
        &self,
        topic: &str,
        permissions: SessionPermissions,
    ) -> Result<i64, EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.session().upgrade(&topic, permissions))?
    }

    pub fn request(
        &self,
        topic: &str,
        method: &str,
        params: JsonValue,
        chain_id: Option<String>,
    ) -> Result<i64, EngineError> {
        let (topic, method) = (topic.to_string(), method.to_string());
        self.with_client(move |client| client.session().request(&topic, &method, params, chain_id))?
    }

    pub fn respond(&self, topic: &str, response: JsonRpcResponse) -> Result<(), EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.session().respond(&topic, &response))?
    }

    pub fn notify(&self, topic: &str, kind: &str, data: JsonValue) -> Result<(), EngineError> {
        let (topic, kind) = (topic.to_string(), kind.to_string());
        self.with_client(move |client| client.session().notify(&topic, &kind, data))?
    }

    pub fn ping_session(&self, topic: &str) -> Result<i64, EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.session().ping(&topic))?
    }

    pub fn delete_session(&self, topic: &str, reason: Reason) -> Result<(), EngineError> {
        let topic = topic.to_string();
        self.with_client(move |client| client.session().delete(&topic, reason))?
    }

    pub fn settled_sessions(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self.with_client(|client| client.session().get_settled_sessions())??)
    }

    pub fn sweep_expired(&self) -> Result<usize, EngineError> {
        Ok(self.with_client(Client::sweep_expired)??)
    }

    fn send_command(&self, command: RuntimeCommand) -> Result<RuntimeResponse, EngineError> {
        let (tx, rx) = std_mpsc::channel();
        self.inner
            .command_tx
            .send(RuntimeRequest { command, respond_to: tx })
            .map_err(|_| EngineError::Runtime("client runtime worker unavailable".to_string()))?;

        let response = rx.recv_timeout(self.inner.request_timeout).map_err(|_| {
            EngineError::Runtime("client runtime worker did not respond".to_string())
        })?;

        response.map_err(EngineError::Runtime)
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.stop();
        }
    }
}

/// Starts a runtime on the configured store and the system clock.
pub fn start(
    config: EngineConfig,
    transport: Arc<dyn Transport>,
) -> Result<ClientHandle, EngineError> {
    let storage = config.open_storage()?;
    start_with(config, storage, transport, Arc::new(SystemClock))
}

pub fn start_with(
    config: EngineConfig,
    storage: Arc<dyn KeyValueStorage>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> Result<ClientHandle, EngineError> {
    config.validate().map_err(EngineError::Runtime)?;
    let request_timeout = Duration::from_millis(config.request_timeout_ms);

    let (command_tx, command_rx) = unbounded_channel();
    let (startup_tx, startup_rx) = std_mpsc::channel();
    let worker_init = WorkerInit { config, storage, transport, clock };

    thread::Builder::new()
        .name("wc-engine-runtime".to_string())
        .spawn(move || runtime_thread(worker_init, command_rx, startup_tx))
        .map_err(|err| EngineError::Runtime(format!("failed to spawn runtime worker: {err}")))?;

    match startup_rx
        .recv_timeout(STARTUP_TIMEOUT)
        .map_err(|_| EngineError::Runtime("runtime startup timed out".to_string()))?
    {
        Ok(()) => {}
        Err(err) => return Err(EngineError::Runtime(err)),
    }

    Ok(ClientHandle {
        inner: Arc::new(HandleInner {
            running: AtomicBool::new(true),
            request_timeout,
            command_tx,
        }),
    })
}

fn runtime_thread(
    init: WorkerInit,
    command_rx: UnboundedReceiver<RuntimeRequest>,
    startup_tx: std_mpsc::Sender<Result<(), String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = startup_tx.send(Err(format!("failed to build tokio runtime: {err}")));
            return;
        }
    };
    runtime.block_on(runtime_main(init, command_rx, startup_tx));
}

async fn runtime_main(
    init: WorkerInit,
    mut command_rx: UnboundedReceiver<RuntimeRequest>,
    startup_tx: std_mpsc::Sender<Result<(), String>>,
) {
    let mut state = match WorkerState::initialize(init) {
        Ok(state) => state,
        Err(err) => {
            let _ = startup_tx.send(Err(err.to_string()));
            return;
        }
    };

    let _ = startup_tx.send(Ok(()));

    let mut sweep = tokio::time::interval(state.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    sweep.tick().await;

    loop {
        tokio::select! {
            request = command_rx.recv() => {
                let Some(request) = request else {
                    break;
                };
                let stop_requested = matches!(&request.command, RuntimeCommand::Stop);
                let response = state.handle(request.command);
                let _ = request.respond_to.send(response);
                if stop_requested {
                    break;
                }
            }
            _ = sweep.tick() => state.sweep(),
        }
    }

    state.shutdown();
}
