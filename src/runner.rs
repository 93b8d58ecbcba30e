use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context};
use futures::{Stream, StreamExt};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    crawler::{CrawlSession, Pacing, SessionHandle, SessionOptions, Timeouts, DEFAULT_NOTE},
    driver::DriverFactory,
    reporter::{sse_frame, Reporter},
    types::{Credentials, ProgressEvent, SessionOutcome, SessionStatus, StartRequest},
    utils::{get_random_string, DB_DIR, HOME_URL, LOGIN_URL},
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // directory holding the lead files
    #[builder(default = "DB_DIR.clone()")]
    store_dir: PathBuf,
    #[builder(default)]
    pacing: Pacing,
    #[builder(default)]
    timeouts: Timeouts,
    #[builder(default = "50")]
    max_scroll_rounds: u32,
    #[builder(default = "HOME_URL.clone()")]
    home_url: String,
    #[builder(default = "LOGIN_URL.clone()")]
    login_url: String,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

/// Registry of crawl sessions, keyed by session id.
///
/// A session is inserted when it starts and removed once it reaches a
/// terminal state. Every session runs on its own blocking worker with its own
/// browser and progress channel.
///
/// The progress receiver and the outcome of a session are kept until they are
/// claimed through `stream_progress`/`take_events` and `wait`, or dropped with
/// `release`.
pub struct Runner {
    options: RunnerOptions,
    factory: Arc<dyn DriverFactory>,
    active: Arc<Mutex<HashMap<String, SessionHandle>>>,
    channels: Mutex<HashMap<String, UnboundedReceiver<ProgressEvent>>>,
    tasks: Mutex<HashMap<String, JoinHandle<SessionOutcome>>>,
}

impl Runner {
    pub fn new(options: RunnerOptions, factory: Arc<dyn DriverFactory>) -> Self {
        Runner {
            options,
            factory,
            active: Arc::new(Mutex::new(HashMap::new())),
            channels: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn session_options(&self, req: StartRequest) -> anyhow::Result<SessionOptions> {
        let o = &self.options;
        let options = SessionOptions::default_builder()
            .search_url(req.search_url)
            .note(note_or_default(req.connect_note))
            .template_name(req.template_name.filter(|t| !t.is_empty()))
            .lead_limit(req.lead_limit)
            .credentials(Credentials::new(&req.email, &req.password))
            .store_dir(o.store_dir.clone())
            .pacing(o.pacing.clone())
            .timeouts(o.timeouts.clone())
            .max_scroll_rounds(o.max_scroll_rounds)
            .home_url(o.home_url.clone())
            .login_url(o.login_url.clone())
            .build()?;
        Ok(options)
    }

    /// Starts a session on a blocking worker and returns its id. Must be
    /// called from within a tokio runtime.
    pub fn start_session(&self, req: StartRequest) -> anyhow::Result<String> {
        let rt = tokio::runtime::Handle::try_current()
            .context("start_session must be called from within a tokio runtime")?;
        let options = self
            .session_options(req)
            .context("invalid start request")?;

        let id = get_random_string(11);
        let (reporter, rx) = Reporter::channel(&id);
        let session = CrawlSession::new(&id, options, self.factory.clone(), reporter);
        let handle = session.handle();

        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handle.clone());
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), rx);

        let worker = rt.spawn_blocking(move || session.run());

        let active = self.active.clone();
        let session_id = id.clone();
        let monitor = rt.spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("[{}] session worker failed: {}", session_id, e);
                    handle.finish(SessionStatus::Error);
                    SessionOutcome {
                        id: session_id.clone(),
                        status: SessionStatus::Error,
                        leads: vec![],
                    }
                }
            };
            active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&session_id);
            debug!("[{}] removed from active sessions", session_id);
            outcome
        });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), monitor);

        info!("session {} started", id);
        Ok(id)
    }

    /// Stops every active session. Returns how many were asked to stop.
    pub fn stop_session(&self) -> usize {
        let handles = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect::<Vec<SessionHandle>>();

        handles.iter().filter(|h| h.stop()).count()
    }

    /// Handle of an active session.
    pub fn handle(&self, id: &str) -> Option<SessionHandle> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Takes the raw event receiver of a session. Only one consumer per
    /// session; later calls return `None`.
    pub fn take_events(&self, id: &str) -> Option<UnboundedReceiver<ProgressEvent>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Progress of a session as server-sent-event frames. The stream ends
    /// once the session has finished and every event was delivered.
    pub fn stream_progress(&self, id: &str) -> Option<impl Stream<Item = String> + Send + 'static> {
        let rx = self.take_events(id)?;
        Some(UnboundedReceiverStream::new(rx).map(|event| sse_frame(&event)))
    }

    /// Waits for a session to reach its terminal state.
    pub async fn wait(&self, id: &str) -> anyhow::Result<SessionOutcome> {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| anyhow!("no session {} to wait for", id))?;
        let outcome = task
            .await
            .context(format!("could not join session {}", id))?;
        Ok(outcome)
    }

    /// Drops whatever is still held for a finished session: an unclaimed
    /// progress receiver and an outcome nobody waited for. Returns `false`
    /// while the session is still active.
    pub fn release(&self, id: &str) -> bool {
        if self.is_active(id) {
            return false;
        }
        let receiver = self.take_events(id);
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        let released = receiver.is_some() || task.is_some();
        if released {
            debug!("[{}] released", id);
        }
        released
    }
}

fn note_or_default(note: String) -> String {
    if note.trim().is_empty() {
        return DEFAULT_NOTE.to_string();
    }
    note
}

impl Drop for Runner {
    fn drop(&mut self) {
        let stopped = self.stop_session();
        if stopped > 0 {
            debug!("{} sessions stopped on runner shutdown", stopped);
        }
    }
}
