use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use fdc_core::wire::COMMAND_TERMINATE;

/// Everything the console ever puts on the wire, before enveloping.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Request/reply call; the reply comes back correlated by `request_id`.
    Request {
        request_id: String,
        call: String,
        params: Value,
    },
    /// Fire-and-forget; the only confirmation is a later push event.
    Command { command: String, params: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    QueueFull,
    LinkGone,
}

impl DispatchError {
    pub fn notice(self) -> &'static str {
        match self {
            DispatchError::QueueFull => "outbound queue full; command dropped",
            DispatchError::LinkGone => "link task gone; command dropped",
        }
    }
}

/// Translates user intents into outbound wire traffic. Holds no entity state:
/// command issuance and effect observation are deliberately decoupled.
#[derive(Debug)]
pub struct CommandDispatcher {
    outbound: mpsc::Sender<Outbound>,
    next_request_id: u64,
}

impl CommandDispatcher {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            outbound,
            next_request_id: 0,
        }
    }

    /// Asks the controller to stop an entity. `hard` skips graceful shutdown.
    /// No local state changes; a later status push is the only confirmation.
    pub fn terminate(&self, identity: &str, hard: bool) -> Result<(), DispatchError> {
        self.send(Outbound::Command {
            command: COMMAND_TERMINATE.to_string(),
            params: json!({ "identity": identity, "hard": hard }),
        })
    }

    /// Queues a request/reply call and hands back the correlation id.
    pub fn request(&mut self, call: &str, params: Value) -> Result<String, DispatchError> {
        self.next_request_id += 1;
        let request_id = format!("fdc-{}-{}", std::process::id(), self.next_request_id);
        self.send(Outbound::Request {
            request_id: request_id.clone(),
            call: call.to_string(),
            params,
        })?;
        Ok(request_id)
    }

    fn send(&self, outbound: Outbound) -> Result<(), DispatchError> {
        match self.outbound.try_send(outbound) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(event = "outbound_queue_full", ?dropped);
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(event = "outbound_channel_closed", ?dropped);
                Err(DispatchError::LinkGone)
            }
        }
    }
}
