use super::*;

pub(super) type Job = Box<dyn FnOnce(&Client) + Send>;

pub(super) struct RuntimeRequest {
    pub(super) command: RuntimeCommand,
    pub(super) respond_to: std_mpsc::Sender<Result<RuntimeResponse, String>>,
}

pub(super) enum RuntimeCommand {
    Execute(Job),
    Deliver { topic: String, message: String },
    PollEvent,
    Stop,
}

pub(super) enum RuntimeResponse {
    Event(Option<EngineEvent>),
    Ack,
}

pub(super) struct WorkerInit {
    pub(super) config: EngineConfig,
    pub(super) storage: Arc<dyn KeyValueStorage>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) clock: Arc<dyn Clock>,
}

pub(super) struct WorkerState {
    pub(super) client: Client,
    pub(super) sweep_interval: Duration,
    pub(super) shutdown: bool,
}

impl WorkerState {
    pub(super) fn initialize(init: WorkerInit) -> Result<Self, EngineError> {
        let sweep_interval = Duration::from_secs(init.config.sweep_interval_secs);
        let client = Client::new(init.config, init.storage, init.transport, init.clock);
        let restored = client.restore()?;
        log::info!("client runtime started with {restored} restored topics");
        Ok(Self { client, sweep_interval, shutdown: false })
    }

    pub(super) fn handle(&mut self, command: RuntimeCommand) -> Result<RuntimeResponse, String> {
        match command {
            RuntimeCommand::Execute(job) => {
                job(&self.client);
                Ok(RuntimeResponse::Ack)
            }
            RuntimeCommand::Deliver { topic, message } => {
                if let Err(err) = self.client.handle_transport_message(&topic, &message) {
                    log::warn!("queued delivery on {topic} failed: {err}");
                }
                Ok(RuntimeResponse::Ack)
            }
            RuntimeCommand::PollEvent => Ok(RuntimeResponse::Event(self.client.take_event())),
            RuntimeCommand::Stop => Ok(RuntimeResponse::Ack),
        }
    }

    pub(super) fn sweep(&mut self) {
        if let Err(err) = self.client.sweep_expired() {
            log::warn!("expiry sweep failed: {err}");
        }
    }

    pub(super) fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        log::info!("client runtime stopped");
    }
}
