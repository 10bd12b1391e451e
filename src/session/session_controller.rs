//! Session lifecycle and the public API used by chat transports.
//!
//! A [`SessionController`] owns at most one active session. Lifecycle transitions
//! (start, stop, fatal teardown) and administrative commands are serialized through a
//! single async lock, while reaction ingestion only touches a read-mostly snapshot
//! and never waits on the lock.

use super::error::{RejectedInput, SessionError};
use super::input_executor::{ExecutorExit, ExecutorSettings, InputExecutor, SessionCommand};
use super::input_queue::{Enqueued, InputQueue, QueueSettings};
use super::rate_limiter::{ActorId, InputEvent, RateLimiter, RateLimiterSettings};
use super::{RenderMode, SessionCounters, SessionState};
use crate::controls::GlyphMap;
use crate::emulator::{clamp_speed, EmulatorBackend, EmulatorSession, MAX_SPEED, MIN_SPEED};
use crate::library::{self, format_game_name, format_uptime};
use crate::render::{ChannelId, FramePublisher, MessageId, RenderHandle, RenderPublisher};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub games_dir: PathBuf,
    pub saves_dir: PathBuf,
    /// Only reactions from this channel are accepted when set
    pub channel_id: Option<ChannelId>,
    pub speed: u8,
    /// Period of the render loop in timer-driven mode
    pub update_interval: Duration,
    pub limiter: RateLimiterSettings,
    pub queue: QueueSettings,
    pub executor: ExecutorSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            games_dir: PathBuf::from("games"),
            saves_dir: PathBuf::from("saves"),
            channel_id: None,
            speed: MIN_SPEED,
            update_interval: Duration::from_secs(2),
            limiter: RateLimiterSettings::default(),
            queue: QueueSettings::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

/// A reaction as delivered by the chat transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub actor: ActorId,
    pub glyph: String,
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub timestamp: DateTime<Local>,
    pub from_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyIdle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub state: SessionState,
    pub game: Option<String>,
    pub rom: Option<String>,
    pub uptime: Option<Duration>,
    pub speed: u8,
    pub accepted_inputs: u64,
    pub rejected_inputs: u64,
    pub executed_inputs: u64,
    pub queue_size: usize,
    pub render_mode: Option<RenderMode>,
    pub tracked_actors: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(game) = &self.game else {
            return write!(f, "No game running ({})", self.state);
        };
        writeln!(f, "Game: {}", game)?;
        if let Some(uptime) = self.uptime {
            writeln!(f, "Uptime: {}", format_uptime(uptime))?;
        }
        writeln!(f, "Speed: {}x", self.speed)?;
        writeln!(
            f,
            "Total Inputs: {} ({} accepted, {} rejected)",
            self.executed_inputs, self.accepted_inputs, self.rejected_inputs
        )?;
        writeln!(f, "Queue Size: {}", self.queue_size)?;
        if let Some(mode) = self.render_mode {
            writeln!(f, "Rendering: {}", mode)?;
        }
        write!(f, "Tracked Actors: {}", self.tracked_actors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownCause {
    Requested,
    Restart,
    Fatal,
}

/// Everything ingestion needs, swapped in and out as a whole
struct Ingress {
    queue: Arc<InputQueue>,
    counters: Arc<SessionCounters>,
    current: watch::Receiver<Option<RenderHandle>>,
    rom: String,
    game: String,
    started_at: DateTime<Local>,
    render_mode: RenderMode,
}

struct ActiveSession {
    generation: u64,
    token: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
    executor: JoinHandle<(Box<dyn EmulatorSession>, ExecutorExit)>,
    publisher: JoinHandle<Option<RenderHandle>>,
    ticker: Option<JoinHandle<()>>,
    reaper: JoinHandle<()>,
}

struct Inner<P: RenderPublisher> {
    settings: SessionSettings,
    glyphs: Arc<GlyphMap>,
    backend: Arc<dyn EmulatorBackend>,
    publisher: Arc<P>,
    limiter: RateLimiter,
    state: watch::Sender<SessionState>,
    lifecycle: Mutex<Option<ActiveSession>>,
    ingress: RwLock<Option<Ingress>>,
    generation: AtomicU64,
}

pub struct SessionController<P: RenderPublisher> {
    inner: Arc<Inner<P>>,
}

impl<P: RenderPublisher> Clone for SessionController<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: RenderPublisher> SessionController<P> {
    pub fn new(
        settings: SessionSettings,
        glyphs: GlyphMap,
        backend: Arc<dyn EmulatorBackend>,
        publisher: Arc<P>,
    ) -> Self {
        let glyphs = Arc::new(glyphs);
        let limiter = RateLimiter::new(glyphs.clone(), &settings.limiter);
        let (state, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                settings,
                glyphs,
                backend,
                publisher,
                limiter,
                state,
                lifecycle: Mutex::new(None),
                ingress: RwLock::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            info!("Session state: {} -> {}", previous, state);
        }
    }

    /// Handle of the frame participants currently react to
    pub fn current_frame(&self) -> Option<RenderHandle> {
        self.inner
            .ingress
            .read()
            .as_ref()
            .and_then(|ingress| *ingress.current.borrow())
    }

    pub fn glyphs(&self) -> &GlyphMap {
        &self.inner.glyphs
    }

    /// Starts `rom` from the games directory, replacing any running session.
    ///
    /// The ROM is validated before an existing session is touched. On failure the
    /// controller ends up `Idle`.
    pub async fn start(&self, rom: &str) -> Result<(), SessionError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let rom_path = library::resolve_rom(&self.inner.settings.games_dir, rom).await?;

        if let Some(active) = lifecycle.take() {
            info!("Restarting session with {}", rom);
            self.teardown(active, TeardownCause::Restart).await;
        }

        self.set_state(SessionState::Starting);
        match self.launch(rom, rom_path).await {
            Ok(active) => {
                *lifecycle = Some(active);
                self.set_state(SessionState::Running);
                info!("Session started: {}", rom);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start {}: {}", rom, e);
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn launch(&self, rom: &str, rom_path: PathBuf) -> Result<ActiveSession, SessionError> {
        let settings = &self.inner.settings;
        let speed = settings.speed.clamp(MIN_SPEED, MAX_SPEED);

        let backend = self.inner.backend.clone();
        let open_path = rom_path.clone();
        let emulator = tokio::task::spawn_blocking(move || backend.open(&open_path, speed))
            .await
            .map_err(|e| SessionError::ExecutorUnavailable(format!("Emulator open task failed: {}", e)))??;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let queue = Arc::new(InputQueue::new(settings.queue.clone()));
        let counters = Arc::new(SessionCounters::default());
        let game = format_game_name(rom);
        let render_mode = settings.executor.render_mode;

        let (frame_publisher, sink, current) =
            FramePublisher::new(self.inner.publisher.clone(), self.inner.glyphs.glyphs());
        let publisher = tokio::spawn(frame_publisher.run(token.clone()));

        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let executor = InputExecutor::new(
            emulator,
            self.inner.backend.clone(),
            rom_path,
            game.clone(),
            speed,
            settings.executor.clone(),
            queue.clone(),
            commands_rx,
            sink,
            counters.clone(),
        );

        let (fatal_tx, fatal_rx) = oneshot::channel::<String>();
        let executor = tokio::spawn({
            let token = token.clone();
            async move {
                let (emulator, exit) = executor.run(token).await;
                if let ExecutorExit::Fatal(e) = &exit {
                    let _ = fatal_tx.send(e.to_string());
                }
                (emulator, exit)
            }
        });

        let ticker = match render_mode {
            RenderMode::TimerDriven => Some(tokio::spawn(run_ticker(
                commands.clone(),
                settings.update_interval,
                token.clone(),
            ))),
            RenderMode::InputDriven => None,
        };

        let reaper = tokio::spawn(reap(Arc::downgrade(&self.inner), generation, fatal_rx));

        *self.inner.ingress.write() = Some(Ingress {
            queue,
            counters,
            current,
            rom: rom.to_string(),
            game,
            started_at: Local::now(),
            render_mode,
        });

        Ok(ActiveSession {
            generation,
            token,
            commands,
            executor,
            publisher,
            ticker,
            reaper,
        })
    }

    /// Stops the running session. Concurrent callers that find nothing to stop
    /// return [`StopOutcome::AlreadyIdle`].
    pub async fn stop(&self) -> StopOutcome {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match lifecycle.take() {
            Some(active) => {
                self.teardown(active, TeardownCause::Requested).await;
                StopOutcome::Stopped
            }
            None => {
                debug!("Stop requested while idle");
                StopOutcome::AlreadyIdle
            }
        }
    }

    async fn stop_generation(&self, generation: u64, reason: String) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !matches!(lifecycle.as_ref(), Some(active) if active.generation == generation) {
            debug!("Session {} already gone, ignoring failure", generation);
            return;
        }
        if let Some(active) = lifecycle.take() {
            error!("Session failed, stopping: {}", reason);
            self.teardown(active, TeardownCause::Fatal).await;
        }
    }

    async fn teardown(&self, active: ActiveSession, cause: TeardownCause) {
        info!("Stopping session ({:?})", cause);
        self.set_state(SessionState::Stopping);
        *self.inner.ingress.write() = None;
        active.token.cancel();

        if let Some(ticker) = active.ticker {
            if let Err(e) = ticker.await {
                warn!("Ticker task failed: {}", e);
            }
        }

        // The emulator is only closed once the executor has handed it back
        match active.executor.await {
            Ok((emulator, exit)) => {
                if let ExecutorExit::Fatal(e) = exit {
                    debug!("Executor exited with: {}", e);
                }
                if let Err(e) = emulator.close() {
                    warn!("Failed to close emulator: {}", e);
                }
            }
            Err(e) => error!("Executor task failed: {}", e),
        }
        drop(active.commands);

        match active.publisher.await {
            Ok(Some(handle)) => {
                if let Err(e) = self.inner.publisher.retract(handle).await {
                    debug!("Ignoring retract failure on stop: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Publisher task failed: {}", e),
        }

        if cause != TeardownCause::Fatal {
            active.reaper.abort();
            let _ = active.reaper.await;
        }

        self.inner.limiter.clear();
        self.set_state(SessionState::Idle);
        info!("Session stopped");
    }

    fn running_rom(&self, operation: &'static str) -> Result<String, SessionError> {
        self.inner
            .ingress
            .read()
            .as_ref()
            .map(|ingress| ingress.rom.clone())
            .ok_or_else(|| SessionError::InvalidStateTransition {
                operation,
                state: self.state(),
            })
    }

    /// Sends a command to the executor and waits for its answer.
    async fn dispatch<T>(
        &self,
        operation: &'static str,
        command: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        let active = match lifecycle.as_ref() {
            Some(active) if state == SessionState::Running => active,
            _ => return Err(SessionError::InvalidStateTransition { operation, state }),
        };

        let (respond_to, response) = oneshot::channel();
        active
            .commands
            .send(command(respond_to))
            .await
            .map_err(|_| SessionError::ExecutorUnavailable(format!("cannot {}", operation)))?;
        response.await.map_err(|_| {
            SessionError::ExecutorUnavailable(format!("no answer to {}", operation))
        })?
    }

    /// Reopens the current ROM from scratch and forgets every actor's cooldown.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.dispatch("reset", |respond_to| SessionCommand::Reset { respond_to })
            .await?;
        self.inner.limiter.clear();
        info!("Session reset");
        Ok(())
    }

    /// Clamps `requested` into the supported range and returns the applied speed.
    pub async fn set_speed(&self, requested: i64) -> Result<u8, SessionError> {
        let speed = clamp_speed(requested);
        if speed as i64 != requested {
            debug!("Clamped speed {} to {}", requested, speed);
        }
        self.dispatch("set speed", |respond_to| SessionCommand::SetSpeed {
            speed,
            respond_to,
        })
        .await
    }

    /// Saves to `<saves_dir>/<name>.state`, defaulting the name to `<rom>_<timestamp>`.
    pub async fn save_state(&self, name: Option<&str>) -> Result<PathBuf, SessionError> {
        let rom = self.running_rom("save state")?;
        let name = match name {
            Some(name) => name.to_string(),
            None => library::default_save_name(&rom, Local::now()),
        };
        let path = library::save_path(&self.inner.settings.saves_dir, &name)?;
        self.dispatch("save state", |respond_to| SessionCommand::SaveState {
            path,
            respond_to,
        })
        .await
    }

    pub async fn load_state(&self, name: &str) -> Result<(), SessionError> {
        self.running_rom("load state")?;
        let path = library::save_path(&self.inner.settings.saves_dir, name)?;
        self.dispatch("load state", |respond_to| SessionCommand::LoadState {
            path,
            respond_to,
        })
        .await
    }

    pub async fn list_games(&self) -> Result<Vec<String>, SessionError> {
        Ok(library::list_roms(&self.inner.settings.games_dir).await?)
    }

    pub async fn list_saves(&self) -> Result<Vec<String>, SessionError> {
        Ok(library::list_saves(&self.inner.settings.saves_dir).await?)
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.state();
        let tracked_actors = self.inner.limiter.tracked_actors();
        let ingress = self.inner.ingress.read();

        match ingress.as_ref() {
            Some(ingress) => SessionStats {
                state,
                game: Some(ingress.game.clone()),
                rom: Some(ingress.rom.clone()),
                uptime: (Local::now() - ingress.started_at).to_std().ok(),
                speed: ingress.counters.speed.load(Ordering::SeqCst),
                accepted_inputs: ingress.counters.accepted.load(Ordering::SeqCst),
                rejected_inputs: ingress.counters.rejected.load(Ordering::SeqCst),
                executed_inputs: ingress.counters.executed.load(Ordering::SeqCst),
                queue_size: ingress.queue.size(),
                render_mode: Some(ingress.render_mode),
                tracked_actors,
            },
            None => SessionStats {
                state,
                game: None,
                rom: None,
                uptime: None,
                speed: self.inner.settings.speed,
                accepted_inputs: 0,
                rejected_inputs: 0,
                executed_inputs: 0,
                queue_size: 0,
                render_mode: None,
                tracked_actors,
            },
        }
    }

    /// Turns a reaction into a queued input, or says why it was dropped.
    pub fn handle_reaction(&self, reaction: &Reaction) -> Result<InputEvent, RejectedInput> {
        let result = self.admit_reaction(reaction);
        match &result {
            Ok(event) => debug!("Queued {} from actor {}", event.button, event.actor),
            Err(reason) => debug!("Ignored reaction from actor {}: {}", reaction.actor, reason),
        }
        result
    }

    fn admit_reaction(&self, reaction: &Reaction) -> Result<InputEvent, RejectedInput> {
        if reaction.from_bot {
            return Err(RejectedInput::BotActor);
        }

        let ingress = self.inner.ingress.read();
        let Some(ingress) = ingress.as_ref() else {
            return Err(RejectedInput::SessionNotRunning);
        };

        let current = *ingress.current.borrow();
        let expected_channel = self
            .inner
            .settings
            .channel_id
            .or(current.map(|handle| handle.channel_id));
        if expected_channel.is_some_and(|channel| channel != reaction.channel_id) {
            return Err(RejectedInput::WrongChannel);
        }
        if current.map(|handle| handle.message_id) != Some(reaction.message_id) {
            return Err(RejectedInput::StaleFrame);
        }

        let event = self
            .inner
            .limiter
            .admit(reaction.actor, &reaction.glyph, reaction.timestamp)
            .inspect_err(|_| {
                ingress.counters.rejected.fetch_add(1, Ordering::SeqCst);
            })?;

        match ingress.queue.enqueue(event.clone()) {
            Enqueued::Queued => {}
            Enqueued::DisplacedOldest(dropped) => {
                debug!(
                    "Queue full, dropped {} from actor {}",
                    dropped.button, dropped.actor
                );
            }
            Enqueued::Rejected(_) => {
                ingress.counters.rejected.fetch_add(1, Ordering::SeqCst);
                return Err(RejectedInput::QueueFull);
            }
        }
        ingress.counters.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(event)
    }
}

/// Requests a render every `period` until cancelled. Ticks are skipped while the
/// executor still has earlier requests pending.
async fn run_ticker(
    commands: mpsc::Sender<SessionCommand>,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => match commands.try_send(SessionCommand::Tick) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => debug!("Executor busy, skipping tick"),
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
        }
    }
    debug!("Ticker stopped");
}

/// Tears the session down when its executor reports a fatal failure.
async fn reap<P: RenderPublisher>(
    inner: Weak<Inner<P>>,
    generation: u64,
    fatal: oneshot::Receiver<String>,
) {
    let Ok(reason) = fatal.await else {
        return;
    };
    if let Some(inner) = inner.upgrade() {
        SessionController { inner }
            .stop_generation(generation, reason)
            .await;
    }
}
