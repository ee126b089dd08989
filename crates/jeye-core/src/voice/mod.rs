//! Voice Command Interpreter.
//!
//! A supervised recognition loop: sessions end on their own (silence,
//! errors, platform limits), and the supervisor restarts them for as long as
//! voice mode stays enabled. The enabled flag is checked at every restart
//! boundary, so disabling voice mid-session never leads to a restart.
//! Pause toggles run as tasks of their own, so a slow server never holds up
//! a disable or a shutdown.

mod grammar;

pub use grammar::{CommandGrammar, VoiceCommand, normalize};

use crate::config::VoiceConfig;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors from the voice channel.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("invalid voice grammar: {0}")]
    Grammar(#[from] regex::Error),

    #[error("speech recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("pause control failed: {0}")]
    Control(String),
}

/// One recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub transcript: String,
    /// Position of the result within its session; repeats share an index.
    pub result_index: u64,
    /// Interim results are never acted on.
    pub is_final: bool,
}

impl Utterance {
    pub fn final_result(transcript: impl Into<String>, result_index: u64) -> Self {
        Self {
            transcript: transcript.into(),
            result_index,
            is_final: true,
        }
    }
}

/// What a recognition session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Utterance(Utterance),
    Error(String),
    /// The session terminated; the supervisor decides whether to restart.
    Ended,
}

/// Opaque id of a running recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenHandle(pub u64);

/// Capability interface over the platform speech recognizer.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Starts a session that reports into `sink` until it ends or is stopped.
    async fn start_listening(
        &self,
        sink: mpsc::Sender<RecognizerEvent>,
    ) -> Result<ListenHandle, VoiceError>;

    /// Stops a session. Must not emit further events for `handle`.
    async fn stop(&self, handle: ListenHandle);
}

/// The single operation voice commands perform.
#[async_trait]
pub trait PauseControl: Send + Sync {
    async fn request_pause(&self, paused: bool) -> Result<(), VoiceError>;
}

/// Counters reported when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStats {
    pub sessions: u64,
    pub commands: u64,
    pub suppressed: u64,
}

/// Result indices remembered per session before the set is reset.
const MAX_TRACKED_RESULTS: usize = 1024;

/// How long a stopping supervisor lets in-flight toggles finish.
const TOGGLE_GRACE: Duration = Duration::from_millis(250);

/// Suppresses repeated results for the same utterance.
#[derive(Debug)]
struct Dedupe {
    window: Duration,
    session: u64,
    fired: HashSet<u64>,
    last: Option<(VoiceCommand, String, Instant)>,
}

impl Dedupe {
    fn new(window: Duration) -> Self {
        Self {
            window,
            session: 0,
            fired: HashSet::new(),
            last: None,
        }
    }

    fn should_fire(&mut self, session: u64, utterance: &Utterance, command: VoiceCommand) -> bool {
        if session != self.session || self.fired.len() >= MAX_TRACKED_RESULTS {
            self.session = session;
            self.fired.clear();
        }
        if !self.fired.insert(utterance.result_index) {
            return false;
        }

        let text = normalize(&utterance.transcript);
        let now = Instant::now();
        if let Some((last_command, last_text, at)) = &self.last
            && *last_command == command
            && *last_text == text
            && now.duration_since(*at) < self.window
        {
            return false;
        }
        self.last = Some((command, text, now));
        true
    }
}

/// Grammar matching plus the supervised recognition loop.
pub struct VoiceInterpreter {
    grammar: CommandGrammar,
    recognizer: Arc<dyn SpeechRecognizer>,
    control: Arc<dyn PauseControl>,
    restart_delay: Duration,
    dedupe_window: Duration,
}

impl VoiceInterpreter {
    pub fn new(
        config: &VoiceConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        control: Arc<dyn PauseControl>,
    ) -> Result<Self, VoiceError> {
        Ok(Self {
            grammar: CommandGrammar::new(&config.wake_phrases)?,
            recognizer,
            control,
            restart_delay: config.restart_delay(),
            dedupe_window: config.dedupe_window(),
        })
    }

    /// Spawns the supervisor. Must be called inside a tokio runtime.
    pub fn spawn(self, enabled: bool) -> VoiceHandle {
        let (enabled_tx, enabled_rx) = watch::channel(enabled);
        let task = tokio::spawn(self.supervise(enabled_rx));
        VoiceHandle {
            enabled: enabled_tx,
            task,
        }
    }

    async fn supervise(self, mut enabled: watch::Receiver<bool>) -> VoiceStats {
        let mut stats = VoiceStats::default();
        let mut dedupe = Dedupe::new(self.dedupe_window);
        let mut toggles = JoinSet::new();

        'supervisor: loop {
            while !*enabled.borrow_and_update() {
                if enabled.changed().await.is_err() {
                    break 'supervisor;
                }
            }

            let (sink, mut events) = mpsc::channel(32);
            let handle = match self.recognizer.start_listening(sink).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "Speech recognizer failed to start");
                    if !self.wait_restart(&mut enabled).await {
                        break 'supervisor;
                    }
                    continue;
                }
            };
            stats.sessions += 1;
            let session = stats.sessions;
            info!(session, "Voice session started");

            loop {
                tokio::select! {
                    changed = enabled.changed() => {
                        if changed.is_err() {
                            self.recognizer.stop(handle).await;
                            break 'supervisor;
                        }
                        if !*enabled.borrow() {
                            self.recognizer.stop(handle).await;
                            info!(session, "Voice mode disabled, session stopped");
                            continue 'supervisor;
                        }
                    }
                    Some(_) = toggles.join_next(), if !toggles.is_empty() => {}
                    event = events.recv() => match event {
                        Some(RecognizerEvent::Utterance(utterance)) => {
                            if let Some(paused) = self.handle_utterance(session, &utterance, &mut dedupe, &mut stats) {
                                let control = Arc::clone(&self.control);
                                toggles.spawn(async move {
                                    if let Err(e) = control.request_pause(paused).await {
                                        warn!(error = %e, "Voice pause toggle failed");
                                    }
                                });
                            }
                        }
                        Some(RecognizerEvent::Error(message)) => {
                            warn!(session, error = %message, "Recognizer error");
                        }
                        Some(RecognizerEvent::Ended) | None => break,
                    }
                }
            }
            debug!(session, "Voice session ended");

            // Restart boundary: the current flag decides, not the one at start.
            if !*enabled.borrow() {
                continue;
            }
            if !self.wait_restart(&mut enabled).await {
                break;
            }
        }

        if !toggles.is_empty() {
            let drained = tokio::time::timeout(TOGGLE_GRACE, async {
                while toggles.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(pending = toggles.len(), "Abandoning unfinished voice pause toggles");
                toggles.shutdown().await;
            }
        }
        info!(sessions = stats.sessions, commands = stats.commands, "Voice supervisor stopped");
        stats
    }

    /// Sleeps before a restart. Returns false when the handle was dropped.
    async fn wait_restart(&self, enabled: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            changed = enabled.changed() => changed.is_ok(),
            () = tokio::time::sleep(self.restart_delay) => true,
        }
    }

    /// Returns the pause value to request, if the utterance is a fresh command.
    fn handle_utterance(
        &self,
        session: u64,
        utterance: &Utterance,
        dedupe: &mut Dedupe,
        stats: &mut VoiceStats,
    ) -> Option<bool> {
        if !utterance.is_final {
            return None;
        }
        let Some(command) = self.grammar.match_command(&utterance.transcript) else {
            debug!(transcript = %utterance.transcript, "Utterance is not a command");
            return None;
        };
        if !dedupe.should_fire(session, utterance, command) {
            stats.suppressed += 1;
            debug!(transcript = %utterance.transcript, "Duplicate voice result suppressed");
            return None;
        }

        stats.commands += 1;
        info!(command = ?command, transcript = %utterance.transcript, "Voice command recognized");
        Some(command.paused())
    }
}

/// Controls a running supervisor.
#[derive(Debug)]
pub struct VoiceHandle {
    enabled: watch::Sender<bool>,
    task: JoinHandle<VoiceStats>,
}

impl VoiceHandle {
    /// Turns voice mode on or off. Turning it off stops the live session.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.send_replace(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Stops any live session and the supervisor.
    pub async fn shutdown(self) -> VoiceStats {
        let Self { enabled, task } = self;
        drop(enabled);
        match task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Voice supervisor task failed");
                VoiceStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays one script per session; scripts end with `Ended`. With no
    /// script left the session stays open until stopped.
    #[derive(Default)]
    struct ScriptedRecognizer {
        scripts: Mutex<VecDeque<Vec<RecognizerEvent>>>,
        open: Mutex<Vec<mpsc::Sender<RecognizerEvent>>>,
        starts: Mutex<u64>,
        stops: Mutex<Vec<ListenHandle>>,
    }

    impl ScriptedRecognizer {
        fn with_scripts(scripts: Vec<Vec<RecognizerEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            })
        }

        fn starts(&self) -> u64 {
            *self.starts.lock().unwrap()
        }

        fn stops(&self) -> usize {
            self.stops.lock().unwrap().len()
        }

        /// Sink of the session left open, if one is.
        fn open_sink(&self) -> Option<mpsc::Sender<RecognizerEvent>> {
            self.open.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn start_listening(
            &self,
            sink: mpsc::Sender<RecognizerEvent>,
        ) -> Result<ListenHandle, VoiceError> {
            let id = {
                let mut starts = self.starts.lock().unwrap();
                *starts += 1;
                *starts
            };
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(events) => {
                    tokio::spawn(async move {
                        for event in events {
                            let _ = sink.send(event).await;
                        }
                        let _ = sink.send(RecognizerEvent::Ended).await;
                    });
                }
                None => self.open.lock().unwrap().push(sink),
            }
            Ok(ListenHandle(id))
        }

        async fn stop(&self, handle: ListenHandle) {
            self.stops.lock().unwrap().push(handle);
            self.open.lock().unwrap().clear();
        }
    }

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<bool>>,
    }

    impl RecordingControl {
        fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PauseControl for RecordingControl {
        async fn request_pause(&self, paused: bool) -> Result<(), VoiceError> {
            self.calls.lock().unwrap().push(paused);
            Ok(())
        }
    }

    /// Records the request, then never answers.
    #[derive(Default)]
    struct HangingControl {
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl PauseControl for HangingControl {
        async fn request_pause(&self, paused: bool) -> Result<(), VoiceError> {
            self.calls.lock().unwrap().push(paused);
            std::future::pending().await
        }
    }

    fn config() -> VoiceConfig {
        VoiceConfig {
            enabled: true,
            restart_delay_ms: 1,
            ..VoiceConfig::default()
        }
    }

    fn said(text: &str, index: u64) -> RecognizerEvent {
        RecognizerEvent::Utterance(Utterance::final_result(text, index))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn interpreter(
        recognizer: &Arc<ScriptedRecognizer>,
        control: &Arc<RecordingControl>,
    ) -> VoiceInterpreter {
        VoiceInterpreter::new(&config(), recognizer.clone(), control.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_resume_utterance_issues_exactly_one_toggle() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![vec![
            said("resume all please", 0),
            said("resume all please", 0),
            said("Resume all please", 1),
        ]]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(true);

        // Second session means the first was fully processed.
        wait_until(|| recognizer.starts() >= 2).await;
        let stats = handle.shutdown().await;

        assert_eq!(control.calls(), vec![false]);
        assert_eq!(stats.commands, 1);
        assert_eq!(stats.suppressed, 2);
    }

    #[tokio::test]
    async fn test_conversational_mention_issues_no_toggle() {
        let recognizer =
            ScriptedRecognizer::with_scripts(vec![vec![said("let's not pause that job", 0)]]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(true);

        wait_until(|| recognizer.starts() >= 2).await;
        handle.shutdown().await;

        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interim_results_are_ignored() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![vec![RecognizerEvent::Utterance(
            Utterance {
                transcript: "pause".into(),
                result_index: 0,
                is_final: false,
            },
        )]]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(true);

        wait_until(|| recognizer.starts() >= 2).await;
        handle.shutdown().await;
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restarts_after_each_session_end() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![
            vec![said("pause", 0)],
            vec![RecognizerEvent::Error("no-speech".into())],
            vec![said("resume", 0)],
        ]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(true);

        wait_until(|| recognizer.starts() >= 4).await;
        let stats = handle.shutdown().await;

        assert_eq!(control.calls(), vec![true, false]);
        assert!(stats.sessions >= 4);
    }

    #[tokio::test]
    async fn test_disable_stops_session_without_restart() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(true);

        wait_until(|| recognizer.starts() == 1).await;
        handle.set_enabled(false);
        wait_until(|| recognizer.stops() == 1).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recognizer.starts(), 1);

        // Re-enabling starts a fresh session.
        handle.set_enabled(true);
        wait_until(|| recognizer.starts() == 2).await;
        handle.shutdown().await;
        assert_eq!(recognizer.stops(), 2);
    }

    #[tokio::test]
    async fn test_session_end_racing_disable_does_not_restart() {
        for _ in 0..25 {
            let recognizer = ScriptedRecognizer::with_scripts(vec![]);
            let control = Arc::new(RecordingControl::default());
            let handle = interpreter(&recognizer, &control).spawn(true);

            wait_until(|| recognizer.open_sink().is_some()).await;
            let sink = recognizer.open_sink().unwrap();
            handle.set_enabled(false);
            let _ = sink.send(RecognizerEvent::Ended).await;

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(recognizer.starts(), 1);
            handle.shutdown().await;
            assert_eq!(recognizer.starts(), 1);
        }
    }

    #[tokio::test]
    async fn test_hanging_toggle_does_not_block_disable_or_shutdown() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![]);
        let control = Arc::new(HangingControl::default());
        let handle = VoiceInterpreter::new(&config(), recognizer.clone(), control.clone())
            .unwrap()
            .spawn(true);

        wait_until(|| recognizer.open_sink().is_some()).await;
        let sink = recognizer.open_sink().unwrap();
        sink.send(said("pause", 0)).await.unwrap();
        wait_until(|| !control.calls.lock().unwrap().is_empty()).await;

        handle.set_enabled(false);
        wait_until(|| recognizer.stops() == 1).await;

        let stats = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown must not wait on the toggle");
        assert_eq!(stats.commands, 1);
        assert_eq!(*control.calls.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_starts_idle_when_disabled() {
        let recognizer = ScriptedRecognizer::with_scripts(vec![]);
        let control = Arc::new(RecordingControl::default());
        let handle = interpreter(&recognizer, &control).spawn(false);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recognizer.starts(), 0);
        assert!(!handle.is_enabled());
        let stats = handle.shutdown().await;
        assert_eq!(stats, VoiceStats::default());
    }

    #[test]
    fn test_dedupe_window_across_sessions() {
        let mut dedupe = Dedupe::new(Duration::from_secs(60));
        let first = Utterance::final_result("pause", 0);
        assert!(dedupe.should_fire(1, &first, VoiceCommand::Pause));
        // Same words in a fresh session, inside the window.
        assert!(!dedupe.should_fire(2, &first, VoiceCommand::Pause));
        // A different command is not a duplicate.
        let resume = Utterance::final_result("resume", 1);
        assert!(dedupe.should_fire(2, &resume, VoiceCommand::Resume));
    }
}
