//! Coordinator - wires hotkey, agent workers, session store, and display
//!
//! Owns the single active agent selection and the one live worker per
//! surface. Guarantees that a new turn never starts until the previous
//! worker has been cancelled and joined, so transcripts never interleave
//! tokens from two streams.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::agent::{create_agent, Agent, Prompt, StreamEvent};
use crate::bridge::{stream_bridge, BridgeReceiver};
use crate::config::Config;
use crate::features::FeatureRegistry;
use crate::hotkey::{HotkeyListener, RegistrationHandle};
use crate::session::{Role, Session, SessionStore, SessionSummary, StoreError};
use crate::worker::AgentWorker;

/// Default localhost agent-host endpoint (optional accelerator)
const HOST_HEALTH_URL: &str = "http://127.0.0.1:17123/health";

/// What the display layer sees each tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Incremental response text
    Token(String),
    /// Turn finished normally; carries the full response
    Complete { response: String },
    /// Turn failed or was cancelled. Cancelled turns should not get
    /// alarming styling.
    Error { message: String, cancelled: bool },
}

/// One in-flight turn: worker + its bridge + transcript accumulation
struct ActiveTurn {
    worker: AgentWorker,
    rx: BridgeReceiver,
    user_text: String,
    response: String,
}

pub struct Coordinator {
    config: Config,
    agent: Arc<dyn Agent>,
    store: SessionStore,
    session: Session,
    features: FeatureRegistry,
    active: Option<ActiveTurn>,
    hotkey_rx: mpsc::UnboundedReceiver<()>,
    hotkey_tx: mpsc::UnboundedSender<()>,
    hotkey_handle: Option<RegistrationHandle>,
}

impl Coordinator {
    pub fn new(config: Config, store: SessionStore) -> Result<Self> {
        let agent = match create_agent(&config.default_agent) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(agent = %config.default_agent, "configured agent unavailable: {}", e);
                create_agent("gemini").context("no usable agent")?
            }
        };
        let (hotkey_tx, hotkey_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            agent: Arc::from(agent),
            store,
            session: Session::new(),
            features: FeatureRegistry::with_defaults(),
            active: None,
            hotkey_rx,
            hotkey_tx,
            hotkey_handle: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_streaming(&self) -> bool {
        self.active.as_ref().is_some_and(|t| t.worker.is_running())
    }

    // ───────────────────────────────────────────────────────────
    // Hotkey
    // ───────────────────────────────────────────────────────────

    /// Register the configured global hotkey. Failure degrades the feature
    /// to unavailable; it never aborts startup.
    pub fn register_hotkey(&mut self) -> bool {
        match HotkeyListener::register(&self.config.hotkey, self.hotkey_tx.clone()) {
            Ok(handle) => {
                self.hotkey_handle = Some(handle);
                true
            }
            Err(e) => {
                error!("hotkey unavailable: {}", e);
                false
            }
        }
    }

    /// True if the hotkey fired since the last check. Non-blocking; called
    /// from the display loop each tick.
    pub fn take_hotkey_signal(&mut self) -> bool {
        let mut fired = false;
        while self.hotkey_rx.try_recv().is_ok() {
            fired = true;
        }
        fired
    }

    // ───────────────────────────────────────────────────────────
    // Turns
    // ───────────────────────────────────────────────────────────

    /// Start a new turn for `prompt`.
    ///
    /// Serializes behind the previous turn: a still-running worker is
    /// cancelled and fully joined first, and its terminal event is settled
    /// into the transcript before the new worker may push anything. The
    /// superseded turn's remaining events are returned here, so the display
    /// layer can finish rendering the old turn before it opens a line for
    /// the new one.
    pub async fn submit(&mut self, prompt: Prompt) -> Vec<TurnEvent> {
        let mut settled = Vec::new();
        if let Some(turn) = self.active.take() {
            turn.worker.cancel();
            settled = self.retire(turn).await;
        }

        let user_text = prompt.text.clone();
        let (tx, rx) = stream_bridge();
        let worker = AgentWorker::start(self.agent.clone(), prompt, tx);
        self.active = Some(ActiveTurn {
            worker,
            rx,
            user_text,
            response: String::new(),
        });
        settled
    }

    /// Cancel the in-flight turn, if any (user pressed stop). Returns the
    /// turn's remaining events, ending with its cancelled terminal.
    pub async fn cancel_active(&mut self) -> Vec<TurnEvent> {
        match self.active.take() {
            Some(turn) => {
                turn.worker.cancel();
                self.retire(turn).await
            }
            None => Vec::new(),
        }
    }

    /// Drain stream progress for the display layer. Non-blocking apart
    /// from joining an already-terminated worker task.
    pub async fn poll(&mut self) -> Vec<TurnEvent> {
        let mut out = Vec::new();

        let Some(mut turn) = self.active.take() else {
            return out;
        };

        let mut terminal = None;
        for event in turn.rx.drain() {
            match event {
                StreamEvent::Token(t) => {
                    turn.response.push_str(&t);
                    out.push(TurnEvent::Token(t));
                }
                event => {
                    terminal = Some(event);
                    break;
                }
            }
        }

        match terminal {
            Some(terminal) => {
                // The worker pushed its terminal event, so the task is done
                // or about to be; joining here releases its resources
                turn.worker.join().await;
                out.push(self.settle(turn.user_text, turn.response, terminal));
            }
            None => self.active = Some(turn),
        }

        out
    }

    /// Join a cancelled worker and fold its remaining events into the
    /// transcript, returning the outcomes for the display layer.
    ///
    /// Keeps draining the bridge while the join is in flight: the worker
    /// may be blocked pushing into a full bridge, and only the consumer
    /// side can free it.
    async fn retire(&mut self, turn: ActiveTurn) -> Vec<TurnEvent> {
        let ActiveTurn {
            worker,
            rx,
            user_text,
            mut response,
        } = turn;

        let mut events = Vec::new();
        let mut join = std::pin::pin!(worker.join());
        loop {
            tokio::select! {
                _ = &mut join => break,
                _ = tokio::time::sleep(Duration::from_millis(5)) => {
                    events.extend(rx.drain());
                }
            }
        }
        events.extend(rx.drain());

        let mut out = Vec::new();
        let mut terminal = None;
        for event in events {
            match event {
                StreamEvent::Token(t) => {
                    response.push_str(&t);
                    out.push(TurnEvent::Token(t));
                }
                event => {
                    terminal = Some(event);
                    break;
                }
            }
        }

        // A joined worker always pushed its terminal unless the bridge was
        // already sealed; fall back to a synthetic cancelled marker
        let terminal = terminal.unwrap_or_else(|| StreamEvent::cancelled_error("stream cancelled"));
        out.push(self.settle(user_text, response, terminal));
        out
    }

    /// Fold one terminal event into the session and persist
    fn settle(&mut self, user_text: String, mut response: String, terminal: StreamEvent) -> TurnEvent {
        match terminal {
            StreamEvent::Final(tail) => {
                response.push_str(&tail);
                self.session.push(Role::User, user_text);
                self.session.push(Role::Assistant, response.clone());
                if let Err(e) = self.save_with_retry() {
                    error!("failed to persist completed turn: {}", e);
                }
                TurnEvent::Complete { response }
            }
            StreamEvent::Error { message, cancelled } => {
                self.session.push(Role::User, user_text);
                if cancelled {
                    // Keep whatever partial response the user already saw
                    if !response.is_empty() {
                        self.session.push(Role::Assistant, response);
                    }
                } else {
                    // Record the failure; never a spurious assistant reply
                    self.session
                        .push(Role::System, format!("[error] {}", message));
                }
                if let Err(e) = self.save_with_retry() {
                    error!("failed to persist turn outcome: {}", e);
                }
                TurnEvent::Error { message, cancelled }
            }
            StreamEvent::Token(_) => unreachable!("token is not a terminal event"),
        }
    }

    /// A failed save of a completed turn is retried once before surfacing
    fn save_with_retry(&self) -> Result<(), StoreError> {
        match self.store.save(&self.session) {
            Err(StoreError::Write(first)) => {
                warn!("session save failed ({}); retrying", first);
                self.store.save(&self.session)
            }
            other => other,
        }
    }

    // ───────────────────────────────────────────────────────────
    // Agent selection & sessions
    // ───────────────────────────────────────────────────────────

    /// Switch the active agent and write the choice back to config
    pub fn select_agent(&mut self, name: &str) -> Result<()> {
        let agent = create_agent(name)?;
        self.agent = Arc::from(agent);
        self.config.default_agent = name.to_string();
        self.config.save()?;
        info!(agent = name, "agent selected");
        Ok(())
    }

    /// Begin a fresh conversation (nothing persists until a turn settles)
    pub fn start_new_session(&mut self) {
        self.session = Session::new();
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.store.load_all()
    }

    /// Resume a saved conversation
    pub fn open_session(&mut self, id: &str) -> Result<(), StoreError> {
        self.session = self.store.load_one(id)?;
        Ok(())
    }

    pub fn execute_feature(&self, name: &str, prompt: &str) -> Result<String> {
        self.features.execute(name, prompt)
    }

    /// Probe the optional local agent host. Purely advisory: a missing or
    /// unhealthy host is logged and ignored.
    pub async fn probe_host(&self) {
        let client = reqwest::Client::new();
        match client
            .get(HOST_HEALTH_URL)
            .timeout(Duration::from_millis(500))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("local agent host is up");
            }
            Ok(resp) => {
                info!(status = %resp.status(), "local agent host responded unhealthy");
            }
            Err(_) => {
                info!("no local agent host; running standalone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStream, CliAgent};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct ScriptedAgent {
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, _prompt: &Prompt) -> AgentStream {
            AgentStream::scripted(self.events.clone())
        }
    }

    fn coordinator_in(dir: &tempfile::TempDir) -> Coordinator {
        let store = SessionStore::new(dir.path().join("sessions.json"));
        Coordinator::new(Config::default(), store).unwrap()
    }

    async fn drive_to_settled(coordinator: &mut Coordinator) -> Vec<TurnEvent> {
        let mut out = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            out.extend(coordinator.poll().await);
            if out.iter().any(|e| !matches!(e, TurnEvent::Token(_))) {
                return out;
            }
            assert!(std::time::Instant::now() < deadline, "turn never settled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_completed_turn_persists_user_and_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);
        coordinator.agent = Arc::new(ScriptedAgent {
            events: vec![
                StreamEvent::Token("4".into()),
                StreamEvent::Final("".into()),
            ],
        });

        coordinator.submit(Prompt::new("what is 2+2")).await;
        let events = drive_to_settled(&mut coordinator).await;

        assert!(events.contains(&TurnEvent::Token("4".into())));
        assert!(events.contains(&TurnEvent::Complete {
            response: "4".into()
        }));

        let session = coordinator.session();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::Assistant);
        assert_eq!(session.messages[1].text, "4");

        // Persisted, not just in memory
        let all = coordinator.list_sessions().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_agent_failure_records_error_not_assistant_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);
        coordinator.agent = Arc::new(ScriptedAgent {
            events: vec![StreamEvent::Error {
                message: "gemini CLI not found".into(),
                cancelled: false,
            }],
        });

        coordinator.submit(Prompt::new("hello")).await;
        let events = drive_to_settled(&mut coordinator).await;

        assert!(matches!(
            events.last(),
            Some(TurnEvent::Error { cancelled: false, .. })
        ));

        let session = coordinator.session();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::System);
        assert!(session.messages[1].text.contains("not found"));
    }

    #[tokio::test]
    async fn test_new_submission_cancels_previous_turn_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);

        // First turn blocks producing nothing
        coordinator.agent = Arc::new(CliAgent::custom("sleep-agent", PathBuf::from("/bin/sleep")));
        coordinator.submit(Prompt::new("30")).await;
        assert!(coordinator.is_streaming());

        // Second submission must settle the first before streaming
        coordinator.agent = Arc::new(ScriptedAgent {
            events: vec![
                StreamEvent::Token("second".into()),
                StreamEvent::Final("".into()),
            ],
        });
        let settled = coordinator.submit(Prompt::new("next")).await;

        // The first turn's cancelled terminal is returned by submit itself,
        // before the display layer sees anything of turn two
        assert!(matches!(
            settled.last(),
            Some(TurnEvent::Error { cancelled: true, .. })
        ));

        let events = drive_to_settled(&mut coordinator).await;
        assert!(events.contains(&TurnEvent::Token("second".into())));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, TurnEvent::Error { cancelled: true, .. })),
            "superseded turn leaked into the new turn's polls"
        );
    }

    #[tokio::test]
    async fn test_superseded_turn_never_mixes_into_new_turn_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);

        // First turn produces a token and ends without a terminal event
        coordinator.agent = Arc::new(ScriptedAgent {
            events: vec![StreamEvent::Token("stale ".into())],
        });
        coordinator.submit(Prompt::new("old question")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.agent = Arc::new(ScriptedAgent {
            events: vec![
                StreamEvent::Token("fresh".into()),
                StreamEvent::Final("".into()),
            ],
        });
        let settled = coordinator.submit(Prompt::new("new question")).await;

        // Everything the old turn had to say came back here, so a display
        // layer rendering `settled` before opening the new output line can
        // never interleave stale text into the new answer
        assert!(settled
            .iter()
            .any(|e| matches!(e, TurnEvent::Error { cancelled: true, .. })));

        let events = drive_to_settled(&mut coordinator).await;
        assert!(!events.contains(&TurnEvent::Token("stale ".into())));
        assert!(events.contains(&TurnEvent::Token("fresh".into())));
    }

    #[tokio::test]
    async fn test_cancel_active_settles_turn() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);
        coordinator.agent = Arc::new(CliAgent::custom("sleep-agent", PathBuf::from("/bin/sleep")));

        coordinator.submit(Prompt::new("30")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let events = coordinator.cancel_active().await;

        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::Error { cancelled: true, .. })));
        assert!(!coordinator.is_streaming());
        assert!(coordinator.poll().await.is_empty());
    }

    #[tokio::test]
    async fn test_select_agent_unknown_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator_in(&dir);
        assert!(coordinator.select_agent("gpt-9").is_err());
        // Selection unchanged
        assert_eq!(coordinator.agent_name(), "codex");
    }
}
