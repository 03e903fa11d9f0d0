//! The session state machine.
//!
//! [`TurnController`] is an actor: one task owns the [`Session`] and handles
//! one message at a time, either a lifecycle command from a [`SessionHandle`]
//! or an [`Event`] from the speech adapters, the watchdog or a deferred timer.
//! Every event carries the turn it was issued for and is dropped when the
//! session has moved on since.

use crate::capabilities::{
    CapturePermission, Connection, Connector, Permission, SpeechRecognizer, SpeechSynthesizer,
};
use crate::config::SessionConfig;
use crate::dialogue::DialogueManager;
use crate::error::{SessionError, TurnFault};
use crate::session::{Phase, Session, SessionSnapshot, Speaker, Utterance};
use crate::slots::DialogueState;
use crate::speech_input::SpeechInputAdapter;
use crate::speech_output::SpeechOutputAdapter;
use crate::watchdog::InactivityWatchdog;
use crate::{Event, ListenOutcome, ListenPurpose, OutputOutcome, Stage, Timer};
use chrono::{Local, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

const DENIED_ALERT: &str =
    "Microphone access is needed to talk with the assistant. Please allow it and try again.";
const REVOKED_ALERT: &str = "Microphone access was turned off, so the conversation has ended.";

/// External services the controller drives.
#[derive(Clone)]
pub struct Capabilities {
    pub permission: Arc<dyn CapturePermission>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub connector: Arc<dyn Connector>,
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Resume(Reply),
    End(Reply),
}

/// Cloneable front door to a running [`TurnController`]. Dropping every
/// handle ends the session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Asks for capture permission, opens the connection and greets the caller.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(Command::Start).await
    }

    /// Pauses the session: silences output, stops capture, keeps the answers.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(Command::Stop).await
    }

    /// Continues a paused session by listening, without greeting again.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(Command::Resume).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(Command::End).await
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    async fn request(&self, command: fn(Reply) -> Command) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

pub struct TurnController {
    config: SessionConfig,
    dialogue: DialogueManager,
    permission: Arc<dyn CapturePermission>,
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    output: SpeechOutputAdapter,
    input: SpeechInputAdapter,
    watchdog: InactivityWatchdog,
    session: Session,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl TurnController {
    pub fn new(
        config: SessionConfig,
        dialogue: DialogueManager,
        capabilities: Capabilities,
    ) -> (Self, SessionHandle) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(8);
        let (snapshots, snapshots_rx) = watch::channel(SessionSnapshot::default());

        let output = SpeechOutputAdapter::new(
            capabilities.synthesizer,
            events_tx.clone(),
            config.output.clone(),
        );
        let input = SpeechInputAdapter::new(
            capabilities.recognizer,
            events_tx.clone(),
            config.locale.clone(),
            dialogue.interruptions().clone(),
        );
        let watchdog =
            InactivityWatchdog::new(config.check_in_after, config.hang_up_after, events_tx.clone());

        let controller = Self {
            config,
            dialogue,
            permission: capabilities.permission,
            connector: capabilities.connector,
            connection: None,
            output,
            input,
            watchdog,
            session: Session::default(),
            events_tx,
            events,
            commands,
            snapshots,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (controller, handle)
    }

    /// Spawns the controller on the current runtime.
    pub fn spawn(
        config: SessionConfig,
        dialogue: DialogueManager,
        capabilities: Capabilities,
    ) -> SessionHandle {
        let (controller, handle) = Self::new(config, dialogue, capabilities);
        tokio::spawn(controller.run());
        handle
    }

    /// Processes commands and events until the session ends.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("all session handles dropped");
                        self.finish("session handle dropped").await;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
            self.publish();
            if self.session.phase == Phase::Ended {
                break;
            }
        }
        tracing::debug!("turn controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::Start(reply) => (self.start().await, reply),
            Command::Stop(reply) => (self.stop(), reply),
            Command::Resume(reply) => (self.resume(), reply),
            Command::End(reply) => (self.end().await, reply),
        };
        self.publish();
        let _ = reply.send(result);
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        if self.session.phase != Phase::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        match self.permission.acquire().await {
            Ok(Permission::Granted) => tracing::info!("capture permission granted"),
            Ok(Permission::Denied) => {
                tracing::error!("capture permission denied");
                self.session.alert = Some(DENIED_ALERT.to_string());
                return Err(SessionError::PermissionDenied);
            }
            Err(err) => {
                tracing::warn!("permission service unavailable, starting anyway: {err:#}");
            }
        }

        let connection = self
            .connector
            .open()
            .await
            .map_err(|err| SessionError::Connection(format!("{err:#}")))?;
        self.connection = Some(connection);

        self.session = Session {
            turn: self.session.turn,
            ..Session::default()
        };
        tracing::info!("session started");

        let greeting = self
            .dialogue
            .script()
            .greeting_for_hour(Local::now().hour());
        let ceiling = self.config.greeting_ceiling;
        self.say(greeting, Phase::Greeting, true, Some(ceiling)).await;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if !self.session.is_active() {
            return Err(SessionError::NotStarted);
        }
        if self.session.paused {
            return Ok(());
        }
        self.session.paused = true;
        self.output.cancel();
        self.cancel_capture();
        self.watchdog.disarm();
        self.session.advance_turn();
        tracing::info!(phase = ?self.session.phase, "session paused");
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        if !self.session.is_active() {
            return Err(SessionError::NotStarted);
        }
        if !self.session.paused {
            return Err(SessionError::NotPaused);
        }
        self.session.paused = false;
        self.session.phase = Phase::Listening;
        self.session.advance_turn();
        tracing::info!("session resumed");
        self.listen();
        Ok(())
    }

    async fn end(&mut self) -> Result<(), SessionError> {
        self.finish("ended on request").await;
        Ok(())
    }

    async fn finish(&mut self, reason: &str) {
        self.output.cancel();
        self.cancel_capture();
        self.watchdog.disarm();
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                tracing::warn!("failed to close session connection: {err:#}");
            }
        }
        self.session.advance_turn();
        self.session.dialogue = DialogueState::default();
        self.session.phase = Phase::Ended;
        self.session.paused = false;
        tracing::info!("session ended: {reason}");
    }

    async fn handle_event(&mut self, event: Event) {
        if self.session.paused || !self.session.is_active() {
            tracing::trace!(?event, "{}", TurnFault::StaleCallback);
            return;
        }
        match event {
            Event::OutputFinished { turn, outcome } => self.on_output_finished(turn, outcome).await,
            Event::Transcript {
                turn,
                text,
                is_final,
            } => self.on_transcript(turn, text, is_final),
            Event::Interrupted { turn, text } => self.on_interrupted(turn, text).await,
            Event::ListenEnded {
                turn,
                purpose,
                outcome,
            } => self.on_listen_ended(turn, purpose, outcome).await,
            Event::Inactivity { epoch, stage } => self.on_inactivity(epoch, stage).await,
            Event::Timer { turn, timer } => self.on_timer(turn, timer).await,
        }
    }

    async fn on_output_finished(&mut self, turn: u64, outcome: OutputOutcome) {
        if !self.is_current(turn)
            || !matches!(self.session.phase, Phase::Greeting | Phase::Speaking)
        {
            return;
        }
        match &outcome {
            OutputOutcome::Cancelled => return,
            OutputOutcome::Failed(reason) => {
                tracing::warn!("{}", TurnFault::OutputError(reason.clone()));
            }
            OutputOutcome::Presumed | OutputOutcome::TimedOut => {
                tracing::debug!(?outcome, "engine never confirmed the end of playback");
            }
            OutputOutcome::Completed => {}
        }

        if self.session.listen_after_utterance {
            self.cancel_capture();
            self.session.phase = Phase::Listening;
            self.listen();
        } else {
            self.finish("conversation complete").await;
        }
    }

    fn on_transcript(&mut self, turn: u64, text: String, is_final: bool) {
        if !self.is_current(turn) || self.session.phase != Phase::Listening {
            return;
        }
        tracing::trace!(is_final, "transcript: {text}");
        self.watchdog.record_activity();
        self.session.log.revise(&text);
        self.session.live_transcript = text;
    }

    async fn on_interrupted(&mut self, turn: u64, text: String) {
        if !self.is_current(turn) || self.session.phase != Phase::Speaking {
            return;
        }
        tracing::info!("caller interrupted: {text}");
        self.watchdog.record_activity();
        self.output.cancel();
        self.session.capture_active = false;
        let payload = self.session.log.commit(&text).to_payload();
        self.send(payload).await;

        self.session.advance_turn();
        self.session.phase = Phase::Processing;
        self.schedule(self.config.acknowledge_delay, Timer::Acknowledge);
    }

    async fn on_listen_ended(&mut self, turn: u64, purpose: ListenPurpose, outcome: ListenOutcome) {
        if !self.is_current(turn) || outcome == ListenOutcome::Cancelled {
            return;
        }
        match (purpose, self.session.phase) {
            (ListenPurpose::Turn, Phase::Listening) => {}
            (ListenPurpose::BargeIn, Phase::Speaking) => {
                self.session.capture_active = false;
                self.on_barge_in_ended(outcome).await;
                return;
            }
            _ => {
                tracing::trace!(?purpose, "{}", TurnFault::StaleCallback);
                return;
            }
        }

        self.session.capture_active = false;
        match outcome {
            ListenOutcome::Captured(text) => self.process(text).await,
            ListenOutcome::Empty => {
                tracing::debug!("{}", TurnFault::EmptyResult);
                self.session.log.discard();
                self.session.live_transcript.clear();
                self.schedule(self.config.relisten_delay, Timer::Listen);
            }
            ListenOutcome::Failed(reason) => {
                tracing::warn!(
                    "{}, listening again in {:?}",
                    TurnFault::CaptureError(reason),
                    self.config.retry_delay
                );
                self.session.log.discard();
                self.session.live_transcript.clear();
                self.schedule(self.config.retry_delay, Timer::Listen);
            }
            ListenOutcome::PermissionRevoked => self.revoke().await,
            ListenOutcome::Cancelled => {}
        }
    }

    async fn on_barge_in_ended(&mut self, outcome: ListenOutcome) {
        match outcome {
            ListenOutcome::Captured(_) => {
                self.watchdog.record_activity();
                self.schedule(self.config.listen_cooldown, Timer::BargeInWatch);
            }
            ListenOutcome::Empty => {
                self.schedule(self.config.listen_cooldown, Timer::BargeInWatch);
            }
            ListenOutcome::Failed(reason) => {
                tracing::warn!(
                    "interruption watch stopped: {}",
                    TurnFault::CaptureError(reason)
                );
            }
            ListenOutcome::PermissionRevoked => self.revoke().await,
            ListenOutcome::Cancelled => {}
        }
    }

    async fn on_inactivity(&mut self, epoch: u64, stage: Stage) {
        if !self.watchdog.accept(epoch, stage) {
            tracing::trace!(epoch, ?stage, "{}", TurnFault::StaleCallback);
            return;
        }
        match stage {
            Stage::CheckIn if self.session.phase != Phase::Listening => {
                tracing::debug!(phase = ?self.session.phase, "busy at check-in time, re-arming");
                self.watchdog.record_activity();
            }
            Stage::CheckIn => {
                tracing::info!("no speech for {:?}, checking in", self.config.check_in_after);
                let text = self.dialogue.script().check_in.clone();
                self.say(text, Phase::Speaking, true, None).await;
                self.watchdog.escalate();
            }
            Stage::HangUp => {
                tracing::info!("no answer to the check-in, saying goodbye");
                self.watchdog.disarm();
                let text = self.dialogue.script().farewell.clone();
                self.say(text, Phase::Speaking, false, None).await;
            }
        }
    }

    async fn on_timer(&mut self, turn: u64, timer: Timer) {
        if !self.is_current(turn) {
            return;
        }
        match (timer, self.session.phase) {
            (Timer::Listen, _) => self.listen(),
            (Timer::BargeInWatch, Phase::Speaking) => self.watch_for_barge_in(),
            (Timer::Acknowledge, Phase::Processing) => {
                let text = self.dialogue.script().interruption_acknowledgement.clone();
                self.say(text, Phase::Speaking, true, None).await;
            }
            _ => tracing::trace!(?timer, "{}", TurnFault::StaleCallback),
        }
    }

    /// Runs one dialogue step on a final transcript and speaks the result.
    async fn process(&mut self, text: String) {
        self.session.phase = Phase::Processing;
        self.session.live_transcript.clear();
        let payload = self.session.log.commit(&text).to_payload();
        tracing::info!("caller: {text}");
        self.send(payload).await;
        self.publish();

        let step = self.dialogue.advance(&self.session.dialogue, &text);
        for slot in &step.newly_filled {
            let value = step.state.slots.get(*slot).unwrap_or_default();
            tracing::info!(%slot, value, "slot filled");
        }
        if !step.new_tags.is_empty() {
            tracing::info!(tags = ?step.new_tags, "tags detected");
        }
        if step.done {
            tracing::info!("all slots filled, reading back the summary");
        }
        self.session.dialogue = step.state;
        self.say(step.utterance, Phase::Speaking, !step.done, None).await;
    }

    /// Speaks `text` as the next turn. `listen_after` decides whether the
    /// caller gets the floor afterwards or the session ends.
    async fn say(
        &mut self,
        text: String,
        phase: Phase,
        listen_after: bool,
        hard_cap: Option<Duration>,
    ) {
        self.cancel_capture();
        let turn = self.session.advance_turn();
        self.session.phase = phase;
        self.session.listen_after_utterance = listen_after;
        self.output.speak(&text, turn, hard_cap);
        tracing::info!("system: {text}");

        let utterance = Utterance::new(Speaker::System, text);
        let payload = utterance.to_payload();
        self.session.log.push(utterance);
        self.send(payload).await;

        if phase == Phase::Speaking && listen_after && self.config.barge_in {
            self.watch_for_barge_in();
        }
    }

    /// Starts a capture for the caller's turn if nothing else is going on.
    fn listen(&mut self) {
        if self.session.paused || self.session.phase != Phase::Listening {
            tracing::debug!(phase = ?self.session.observable_phase(), "listen suppressed");
            return;
        }
        if self.session.capture_active {
            tracing::trace!("capture already running");
            return;
        }
        if let Some(last) = self.session.last_listen_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.listen_cooldown {
                self.schedule(self.config.listen_cooldown - elapsed, Timer::Listen);
                return;
            }
        }

        let turn = self.session.advance_turn();
        self.session.last_listen_at = Some(Instant::now());
        self.session.capture_active = true;
        self.watchdog.ensure_armed();
        tracing::debug!(turn, "listening");
        self.input.listen(turn, ListenPurpose::Turn);
    }

    fn watch_for_barge_in(&mut self) {
        if self.session.capture_active {
            return;
        }
        self.session.last_listen_at = Some(Instant::now());
        self.session.capture_active = true;
        self.input.listen(self.session.turn, ListenPurpose::BargeIn);
    }

    fn cancel_capture(&mut self) {
        if self.session.capture_active {
            self.input.cancel();
            self.session.capture_active = false;
        }
        self.session.log.discard();
        self.session.live_transcript.clear();
    }

    async fn revoke(&mut self) {
        tracing::error!("capture permission revoked");
        self.finish("capture permission revoked").await;
        self.session.alert = Some(REVOKED_ALERT.to_string());
    }

    fn schedule(&self, delay: Duration, timer: Timer) {
        let turn = self.session.turn;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Timer { turn, timer });
        });
    }

    fn is_current(&self, turn: u64) -> bool {
        if turn == self.session.turn {
            return true;
        }
        tracing::trace!(turn, current = self.session.turn, "{}", TurnFault::StaleCallback);
        false
    }

    async fn send(&mut self, payload: serde_json::Value) {
        if let Some(connection) = self.connection.as_mut() {
            if let Err(err) = connection.send(payload).await {
                tracing::warn!("failed to send utterance over the connection: {err:#}");
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        MockCapturePermission, RecognitionError, RecognitionEvent, RecognitionOptions,
        SynthesisEvent,
    };
    use crate::script::Script;
    use crate::slots::SlotName;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Playback {
        spoken: Vec<String>,
        speaking: bool,
        cancels: usize,
        current: Option<CancellationToken>,
    }

    /// Plays every utterance for a fixed time. A stuck engine keeps reporting
    /// speech and never sends `Ended`.
    struct FakeSynthesizer {
        duration: Duration,
        stuck: bool,
        playback: Arc<Mutex<Playback>>,
    }

    impl FakeSynthesizer {
        fn new(duration: Duration) -> Self {
            Self {
                duration,
                stuck: false,
                playback: Arc::default(),
            }
        }

        fn spoken(&self) -> Vec<String> {
            self.playback.lock().unwrap().spoken.clone()
        }

        fn cancels(&self) -> usize {
            self.playback.lock().unwrap().cancels
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn speak(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
            let token = CancellationToken::new();
            {
                let mut playback = self.playback.lock().unwrap();
                playback.spoken.push(text.to_string());
                playback.speaking = true;
                playback.current = Some(token.clone());
            }
            let (tx, rx) = mpsc::channel(4);
            tx.send(SynthesisEvent::Started).await?;

            let duration = self.duration;
            let stuck = self.stuck;
            let playback = self.playback.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(duration), if !stuck => {
                        playback.lock().unwrap().speaking = false;
                        let _ = tx.send(SynthesisEvent::Ended).await;
                    }
                }
            });
            Ok(rx)
        }

        fn cancel_all(&self) {
            let mut playback = self.playback.lock().unwrap();
            playback.cancels += 1;
            playback.speaking = false;
            if let Some(token) = playback.current.take() {
                token.cancel();
            }
        }

        fn is_speaking(&self) -> bool {
            self.playback.lock().unwrap().speaking
        }
    }

    type CaptureScript = Vec<(u64, RecognitionEvent)>;

    #[derive(Default)]
    struct Captures {
        active: bool,
        overlaps: usize,
        started_at: Vec<Instant>,
        current: Option<CancellationToken>,
    }

    /// Plays one scripted capture per `start`, each event after a delay in
    /// milliseconds. Once the scripts run out the caller is silent.
    struct FakeRecognizer {
        scripts: Mutex<VecDeque<CaptureScript>>,
        captures: Arc<Mutex<Captures>>,
    }

    impl FakeRecognizer {
        fn new(scripts: Vec<CaptureScript>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                captures: Arc::default(),
            }
        }

        fn started_at(&self) -> Vec<Instant> {
            self.captures.lock().unwrap().started_at.clone()
        }

        fn overlaps(&self) -> usize {
            self.captures.lock().unwrap().overlaps
        }
    }

    #[async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        async fn start(
            &self,
            _options: RecognitionOptions,
        ) -> Result<mpsc::Receiver<RecognitionEvent>> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![(8000, RecognitionEvent::Errored(RecognitionError::NoSpeech))]);
            let token = CancellationToken::new();
            {
                let mut captures = self.captures.lock().unwrap();
                if captures.active {
                    captures.overlaps += 1;
                }
                captures.active = true;
                captures.started_at.push(Instant::now());
                captures.current = Some(token.clone());
            }

            let (tx, rx) = mpsc::channel(8);
            let captures = self.captures.clone();
            tokio::spawn(async move {
                for (delay, event) in script {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                    let terminal = !matches!(event, RecognitionEvent::Partial(_));
                    if terminal {
                        captures.lock().unwrap().active = false;
                    }
                    let _ = tx.send(event).await;
                    if terminal {
                        return;
                    }
                }
                token.cancelled().await;
            });
            Ok(rx)
        }

        fn stop(&self) {
            let mut captures = self.captures.lock().unwrap();
            captures.active = false;
            if let Some(token) = captures.current.take() {
                token.cancel();
            }
        }
    }

    #[derive(Default)]
    struct Wire {
        opened: usize,
        closed: bool,
        payloads: Vec<serde_json::Value>,
    }

    struct FakeConnector {
        wire: Arc<Mutex<Wire>>,
    }

    struct FakeConnection {
        wire: Arc<Mutex<Wire>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(&self) -> Result<Box<dyn Connection>> {
            self.wire.lock().unwrap().opened += 1;
            Ok(Box::new(FakeConnection {
                wire: self.wire.clone(),
            }))
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn send(&mut self, payload: serde_json::Value) -> Result<()> {
            self.wire.lock().unwrap().payloads.push(payload);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.wire.lock().unwrap().closed = true;
            Ok(())
        }
    }

    struct Harness {
        handle: SessionHandle,
        synthesizer: Arc<FakeSynthesizer>,
        recognizer: Arc<FakeRecognizer>,
        wire: Arc<Mutex<Wire>>,
    }

    fn granted() -> MockCapturePermission {
        let mut permission = MockCapturePermission::new();
        permission
            .expect_acquire()
            .returning(|| Ok(Permission::Granted));
        permission
    }

    fn without_barge_in() -> SessionConfig {
        SessionConfig {
            barge_in: false,
            ..SessionConfig::default()
        }
    }

    fn said(text: &str) -> CaptureScript {
        vec![
            (200, RecognitionEvent::Partial(text.split(' ').next().unwrap_or_default().to_string())),
            (300, RecognitionEvent::Final(text.to_string())),
        ]
    }

    fn harness(
        config: SessionConfig,
        permission: MockCapturePermission,
        synthesizer: FakeSynthesizer,
        scripts: Vec<CaptureScript>,
    ) -> Harness {
        let synthesizer = Arc::new(synthesizer);
        let recognizer = Arc::new(FakeRecognizer::new(scripts));
        let wire = Arc::new(Mutex::new(Wire::default()));
        let capabilities = Capabilities {
            permission: Arc::new(permission),
            synthesizer: synthesizer.clone(),
            recognizer: recognizer.clone(),
            connector: Arc::new(FakeConnector { wire: wire.clone() }),
        };
        let dialogue = DialogueManager::new(Script::default()).unwrap();
        let handle = TurnController::spawn(config, dialogue, capabilities);
        Harness {
            handle,
            synthesizer,
            recognizer,
            wire,
        }
    }

    async fn wait_until(
        handle: &SessionHandle,
        what: &str,
        mut condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut snapshots = handle.subscribe();
        match timeout(
            Duration::from_secs(900),
            snapshots.wait_for(|snapshot| condition(snapshot)),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => panic!("timed out waiting for {what}"),
        }
    }

    fn user_lines(snapshot: &SessionSnapshot) -> Vec<&str> {
        snapshot
            .log
            .iter()
            .filter(|utterance| utterance.speaker == Speaker::User)
            .map(|utterance| utterance.text.as_str())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn greets_then_listens() {
        // Arrange
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );

        // Act
        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "listening", |s| s.phase == Phase::Listening).await;

        // Assert
        let spoken = harness.synthesizer.spoken();
        assert_eq!(spoken.len(), 1);
        assert!(spoken[0].starts_with("Good"));
        assert!(spoken[0].contains("Welcome to iiTuitions"));
        assert_eq!(snapshot.log.len(), 1);
        assert_eq!(snapshot.log[0].speaker, Speaker::System);

        let wire = harness.wire.lock().unwrap();
        assert_eq!(wire.opened, 1);
        assert_eq!(wire.payloads[0]["role"], "system");
        assert_eq!(wire.payloads[0]["text"], spoken[0].as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_ceiling_starts_listening_on_a_stuck_engine() {
        let mut synthesizer = FakeSynthesizer::new(Duration::from_secs(1));
        synthesizer.stuck = true;
        let harness = harness(without_barge_in(), granted(), synthesizer, vec![]);
        let started = Instant::now();

        harness.handle.start().await.unwrap();
        wait_until(&harness.handle, "listening", |s| s.phase == Phase::Listening).await;

        assert!(started.elapsed() >= Duration::from_millis(3500));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_the_intake_and_ends_after_the_summary() {
        // Arrange
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![
                said("Preparing for JEE Advanced"),
                said("My name is Ishaan"),
                said("Class 12, ICSE board"),
                said("We live in Kolkata"),
                said("Budget is around 950 rupees"),
                said("a female tutor would be great"),
            ],
        );

        // Act
        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "the end", |s| s.phase == Phase::Ended).await;

        // Assert
        let spoken = harness.synthesizer.spoken();
        assert_eq!(spoken.len(), 7);
        let summary = spoken.last().unwrap();
        assert!(summary.starts_with("Thank you, Ishaan!"));
        for value in ["JEE Advanced", "ICSE", "Kolkata", "Female"] {
            assert_eq!(summary.matches(value).count(), 1, "{value} in {summary}");
        }
        assert_eq!(user_lines(&snapshot).len(), 6);
        // Answers are dropped with the session.
        assert!(snapshot.slots.iter().all(|(_, value)| value.is_none()));

        let wire = harness.wire.lock().unwrap();
        assert!(wire.closed);
        assert_eq!(wire.payloads.len(), 13);
        assert_eq!(wire.payloads[1]["role"], "user");
        assert_eq!(wire.payloads[1]["text"], "Preparing for JEE Advanced");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_caller_gets_one_check_in_then_one_farewell() {
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );
        let started = Instant::now();
        let script = Script::default();

        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "hang-up", |s| s.phase == Phase::Ended).await;

        let spoken = harness.synthesizer.spoken();
        assert_eq!(spoken.iter().filter(|text| **text == script.check_in).count(), 1);
        assert_eq!(spoken.iter().filter(|text| **text == script.farewell).count(), 1);
        assert_eq!(spoken.last(), Some(&script.farewell));
        assert!(started.elapsed() >= Duration::from_secs(135));
        assert!(user_lines(&snapshot).is_empty());
        assert!(harness.wire.lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_output_and_resume_listens_without_greeting() {
        // Arrange
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(2)),
            vec![said("Preparing for JEE Mains, he is weak in physics")],
        );
        harness.handle.start().await.unwrap();
        wait_until(&harness.handle, "reply", |s| s.phase == Phase::Speaking).await;
        let cancels_before = harness.synthesizer.cancels();

        // Act
        harness.handle.stop().await.unwrap();

        // Assert
        let paused = harness.handle.snapshot();
        assert_eq!(paused.phase, Phase::Paused);
        assert!(!harness.synthesizer.is_speaking());
        assert!(harness.synthesizer.cancels() > cancels_before);
        assert_eq!(paused.slots.get(SlotName::Track), Some("JEE Mains"));
        assert!(paused.tags.contains("WEAK-AREA"));

        // Nothing happens while paused.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.handle.snapshot().phase, Phase::Paused);
        assert_eq!(harness.recognizer.started_at().len(), 1);
        assert_eq!(harness.synthesizer.spoken().len(), 2);

        harness.handle.resume().await.unwrap();
        let resumed = wait_until(&harness.handle, "listening", |s| s.phase == Phase::Listening).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(resumed.slots.get(SlotName::Track), Some("JEE Mains"));
        assert_eq!(resumed.tags, paused.tags);
        assert_eq!(harness.recognizer.started_at().len(), 2);
        let greetings = harness
            .synthesizer
            .spoken()
            .iter()
            .filter(|text| text.contains("Welcome to iiTuitions"))
            .count();
        assert_eq!(greetings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_keeps_the_session_idle() {
        let mut permission = MockCapturePermission::new();
        permission
            .expect_acquire()
            .times(1)
            .returning(|| Ok(Permission::Denied));
        let harness = harness(
            without_barge_in(),
            permission,
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );

        let result = harness.handle.start().await;

        assert!(matches!(result, Err(SessionError::PermissionDenied)));
        let snapshot = harness.handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.alert.is_some());
        assert!(harness.synthesizer.spoken().is_empty());
        assert!(harness.recognizer.started_at().is_empty());
        assert_eq!(harness.wire.lock().unwrap().opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_permission_service_still_starts() {
        let mut permission = MockCapturePermission::new();
        permission
            .expect_acquire()
            .returning(|| Err(anyhow::anyhow!("permission prompt unavailable")));
        let harness = harness(
            without_barge_in(),
            permission,
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );

        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "listening", |s| s.phase == Phase::Listening).await;

        assert!(snapshot.alert.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_permission_ends_the_session_with_an_alert() {
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![vec![(200, RecognitionEvent::Errored(RecognitionError::NotAllowed))]],
        );

        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "the end", |s| s.phase == Phase::Ended).await;

        assert!(snapshot.alert.is_some());
        assert!(harness.wire.lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_error_is_retried_after_a_delay() {
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![
                vec![(100, RecognitionEvent::Errored(RecognitionError::Engine("network".into())))],
                said("NEET"),
            ],
        );

        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "an answer", |s| !user_lines(s).is_empty()).await;

        let started_at = harness.recognizer.started_at();
        assert!(started_at[1] - started_at[0] >= Duration::from_millis(1100));
        assert_eq!(user_lines(&snapshot), vec!["NEET"]);
        assert!(snapshot.alert.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_is_acknowledged_and_the_caller_gets_the_floor() {
        // Arrange: answer the first question, then cut the reply short.
        let harness = harness(
            SessionConfig::default(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(2)),
            vec![
                said("JEE Mains"),
                vec![(300, RecognitionEvent::Partial("wait, stop".into()))],
            ],
        );
        let script = Script::default();

        // Act
        harness.handle.start().await.unwrap();
        wait_until(&harness.handle, "the acknowledgement", |s| {
            s.log
                .iter()
                .any(|utterance| utterance.text == script.interruption_acknowledgement)
        })
        .await;
        let snapshot = wait_until(&harness.handle, "listening", |s| s.phase == Phase::Listening).await;

        // Assert
        let spoken = harness.synthesizer.spoken();
        assert_eq!(spoken.len(), 3);
        assert_eq!(spoken[1], "Got it. May I know the student's name?");
        assert_eq!(spoken[2], script.interruption_acknowledgement);
        assert_eq!(user_lines(&snapshot), vec!["JEE Mains", "wait, stop"]);
        assert_eq!(snapshot.slots.get(SlotName::Track), Some("JEE Mains"));
        assert_eq!(harness.recognizer.overlaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupting_the_check_in_restarts_the_silence_countdown() {
        // Arrange: stay silent until the check-in, then cut it short.
        let config = SessionConfig {
            check_in_after: Duration::from_secs(30),
            hang_up_after: Duration::from_secs(15),
            ..SessionConfig::default()
        };
        let harness = harness(
            config,
            granted(),
            FakeSynthesizer::new(Duration::from_secs(2)),
            vec![
                vec![(60_000, RecognitionEvent::Errored(RecognitionError::NoSpeech))],
                vec![(300, RecognitionEvent::Partial("wait, stop".into()))],
            ],
        );
        let script = Script::default();
        let started = Instant::now();

        // Act
        harness.handle.start().await.unwrap();
        let snapshot = wait_until(&harness.handle, "the end", |s| s.phase == Phase::Ended).await;

        // Assert: a fresh check-in follows the interruption before any hang-up.
        let spoken = harness.synthesizer.spoken();
        let check_ins = spoken.iter().filter(|text| **text == script.check_in).count();
        assert_eq!(check_ins, 2, "{spoken:#?}");
        assert_eq!(spoken.last(), Some(&script.farewell));
        assert!(started.elapsed() >= Duration::from_secs(62));
        assert_eq!(user_lines(&snapshot), vec!["wait, stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn listen_attempts_respect_the_cooldown() {
        // Arrange: captures that end the moment they start.
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![vec![(0, RecognitionEvent::Ended)]; 5],
        );

        // Act
        harness.handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Assert
        let started_at = harness.recognizer.started_at();
        assert!(started_at.len() >= 6, "only {} captures", started_at.len());
        for pair in started_at.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(400), "captures {gap:?} apart");
        }
        // The quick relisten is held back by the cooldown, not skipped.
        assert!(started_at[1] - started_at[0] < Duration::from_millis(500));
        assert_eq!(harness.recognizer.overlaps(), 0);
        assert_eq!(harness.handle.snapshot().phase, Phase::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_misuse_is_rejected() {
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );

        assert!(matches!(harness.handle.stop().await, Err(SessionError::NotStarted)));
        assert!(matches!(harness.handle.resume().await, Err(SessionError::NotStarted)));

        harness.handle.start().await.unwrap();
        assert!(matches!(harness.handle.start().await, Err(SessionError::AlreadyStarted)));
        assert!(matches!(harness.handle.resume().await, Err(SessionError::NotPaused)));

        harness.handle.end().await.unwrap();
        assert_eq!(harness.handle.snapshot().phase, Phase::Ended);
        assert!(harness.wire.lock().unwrap().closed);
        assert!(matches!(harness.handle.start().await, Err(SessionError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_ends_the_session() {
        let harness = harness(
            without_barge_in(),
            granted(),
            FakeSynthesizer::new(Duration::from_secs(1)),
            vec![],
        );
        harness.handle.start().await.unwrap();
        let mut snapshots = harness.handle.subscribe();

        drop(harness.handle);
        let ended = timeout(
            Duration::from_secs(60),
            snapshots.wait_for(|s| s.phase == Phase::Ended),
        )
        .await;

        assert!(matches!(ended, Ok(Ok(_))));
        assert!(harness.wire.lock().unwrap().closed);
        assert!(harness.synthesizer.cancels() >= 1);
    }
}
