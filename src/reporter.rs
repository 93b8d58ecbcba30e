use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{
    types::{EventStatus, Lead, ProgressEvent},
    utils::timestamp,
};

/// Emits progress events for one session.
///
/// The channel is unbounded, so a slow or absent consumer never holds up the
/// crawl. Dropping the reporter closes the channel, which is how a stream
/// consumer learns the session is over.
#[derive(Debug)]
pub struct Reporter {
    session_id: String,
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl Reporter {
    pub fn channel(session_id: &str) -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Reporter {
                session_id: session_id.into(),
                tx: Some(tx),
            },
            rx,
        )
    }

    /// A reporter that only logs.
    pub fn detached(session_id: &str) -> Self {
        Reporter {
            session_id: session_id.into(),
            tx: None,
        }
    }

    pub fn emit(&self, message: &str, status: EventStatus, data: Option<Lead>) {
        match status {
            EventStatus::Error => error!("[{}] {}", self.session_id, message),
            _ => info!("[{}] {}", self.session_id, message),
        }

        if let Some(tx) = &self.tx {
            let event = ProgressEvent {
                message: message.into(),
                status,
                data,
                timestamp: timestamp(),
            };
            if tx.send(event).is_err() {
                debug!("[{}] no progress consumer left", self.session_id);
            }
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(message, EventStatus::Info, None)
    }

    pub fn error(&self, message: &str) {
        self.emit(message, EventStatus::Error, None)
    }

    pub fn success(&self, message: &str, lead: Option<Lead>) {
        self.emit(message, EventStatus::Success, lead)
    }
}

/// Renders one event as a server-sent-events frame.
pub fn sse_frame(event: &ProgressEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            error!("could not serialize progress event: {}", e);
            String::from("data: {}\n\n")
        }
    }
}
