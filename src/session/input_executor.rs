//! Single consumer of the input queue and sole owner of the emulator session.
//!
//! Administrative commands and periodic render ticks arrive on a channel and are
//! served between inputs, so the emulator is never touched from two places.

use super::error::SessionError;
use super::input_queue::{Dequeued, InputQueue};
use super::rate_limiter::InputEvent;
use super::{RenderMode, SessionCounters};
use crate::emulator::{EmulatorBackend, EmulatorError, EmulatorSession};
use crate::render::FrameSink;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub hold: Duration,
    pub hold_frames: u32,
    pub inter_input_delay: Duration,
    pub dequeue_timeout: Duration,
    pub render_mode: RenderMode,
    /// Frames advanced before each render in input-driven mode
    pub input_render_frames: u32,
    /// Frames per periodic tick at speed 1
    pub ticks_per_update: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            hold: Duration::from_millis(100),
            hold_frames: 6,
            inter_input_delay: Duration::from_millis(50),
            dequeue_timeout: Duration::from_secs(1),
            render_mode: RenderMode::InputDriven,
            input_render_frames: 30,
            ticks_per_update: 120,
        }
    }
}

/// Requests served by the executor between inputs
#[derive(Debug)]
pub enum SessionCommand {
    /// Periodic render in timer-driven mode
    Tick,
    Reset {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SetSpeed {
        speed: u8,
        respond_to: oneshot::Sender<Result<u8, SessionError>>,
    },
    SaveState {
        path: PathBuf,
        respond_to: oneshot::Sender<Result<PathBuf, SessionError>>,
    },
    LoadState {
        path: PathBuf,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

#[derive(Debug)]
pub enum ExecutorExit {
    Stopped,
    /// A periodic render failed; the session must be torn down
    Fatal(EmulatorError),
}

pub struct InputExecutor {
    emulator: Box<dyn EmulatorSession>,
    backend: Arc<dyn EmulatorBackend>,
    rom: PathBuf,
    game: String,
    speed: u8,
    settings: ExecutorSettings,
    queue: Arc<InputQueue>,
    commands: mpsc::Receiver<SessionCommand>,
    frames: FrameSink,
    counters: Arc<SessionCounters>,
}

impl InputExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        emulator: Box<dyn EmulatorSession>,
        backend: Arc<dyn EmulatorBackend>,
        rom: PathBuf,
        game: String,
        speed: u8,
        settings: ExecutorSettings,
        queue: Arc<InputQueue>,
        commands: mpsc::Receiver<SessionCommand>,
        frames: FrameSink,
        counters: Arc<SessionCounters>,
    ) -> Self {
        counters.speed.store(speed, Ordering::SeqCst);
        Self {
            emulator,
            backend,
            rom,
            game,
            speed,
            settings,
            queue,
            commands,
            frames,
            counters,
        }
    }

    /// Runs until cancelled, the command channel closes or a tick fails.
    ///
    /// Hands the emulator session back so the caller closes it after the loop is gone.
    pub async fn run(mut self, token: CancellationToken) -> (Box<dyn EmulatorSession>, ExecutorExit) {
        info!(
            "Input executor started for {} ({:?} rendering)",
            self.game, self.settings.render_mode
        );

        if self.settings.render_mode == RenderMode::InputDriven {
            if let Err(e) = self.render(0) {
                warn!("Failed to render initial frame: {}", e);
            }
        }

        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break ExecutorExit::Stopped,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            error!("Periodic render failed: {}", e);
                            break ExecutorExit::Fatal(e);
                        }
                    }
                    None => {
                        debug!("Command channel closed");
                        break ExecutorExit::Stopped;
                    }
                },
                next = self.queue.dequeue(self.settings.dequeue_timeout) => match next {
                    Dequeued::Event(event) => {
                        if !self.execute(event, &token).await {
                            break ExecutorExit::Stopped;
                        }
                    }
                    Dequeued::TimedOut => {}
                },
            }
        };

        info!("Input executor stopped");
        (self.emulator, exit)
    }

    /// Returns false when cancelled mid-input. The button is released either way.
    async fn execute(&mut self, event: InputEvent, token: &CancellationToken) -> bool {
        debug!(
            "Executing {} from actor {} (accepted {})",
            event.button,
            event.actor,
            event.accepted_at.format("%H:%M:%S%.3f")
        );

        if let Err(e) = self.emulator.press(event.button) {
            warn!("Failed to press {}: {}", event.button, e);
            return true;
        }
        if let Err(e) = self.emulator.advance(self.settings.hold_frames) {
            warn!("Failed to advance while holding {}: {}", event.button, e);
        }

        let held = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.settings.hold) => true,
        };

        if let Err(e) = self.emulator.release(event.button) {
            warn!("Failed to release {}: {}", event.button, e);
        }
        if !held {
            info!("Released {} early for shutdown", event.button);
            return false;
        }
        self.counters.executed.fetch_add(1, Ordering::SeqCst);

        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.settings.inter_input_delay) => true,
        };
        if !waited {
            return false;
        }

        if self.settings.render_mode == RenderMode::InputDriven {
            if let Err(e) = self.render(self.settings.input_render_frames) {
                warn!("Failed to render after {}: {}", event.button, e);
            }
        }
        true
    }

    /// Only a failed periodic render is returned; command failures go to the requester.
    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), EmulatorError> {
        match command {
            SessionCommand::Tick => {
                let frames = self
                    .settings
                    .ticks_per_update
                    .saturating_mul(u32::from(self.speed));
                return self.render(frames);
            }
            SessionCommand::Reset { respond_to } => {
                let result = self.reset().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::SetSpeed { speed, respond_to } => {
                let result = self.emulator.set_speed(speed).map(|_| {
                    self.speed = speed;
                    self.counters.speed.store(speed, Ordering::SeqCst);
                    info!("Speed set to {}x", speed);
                    speed
                });
                let _ = respond_to.send(result.map_err(SessionError::from));
            }
            SessionCommand::SaveState { path, respond_to } => {
                let result = self.emulator.save_state(&path).map(|_| path);
                let _ = respond_to.send(result.map_err(SessionError::from));
            }
            SessionCommand::LoadState { path, respond_to } => {
                let result = self.emulator.load_state(&path);
                if result.is_ok() {
                    info!("Loaded state: {}", path.display());
                    self.refresh();
                }
                let _ = respond_to.send(result.map_err(SessionError::from));
            }
        }
        Ok(())
    }

    /// Replaces the emulator with a freshly opened one. The old session is only
    /// closed once the new one is in place.
    async fn reset(&mut self) -> Result<(), SessionError> {
        let backend = self.backend.clone();
        let rom = self.rom.clone();
        let speed = self.speed;
        let fresh = tokio::task::spawn_blocking(move || backend.open(&rom, speed))
            .await
            .map_err(|e| SessionError::ExecutorUnavailable(format!("Emulator open task failed: {}", e)))??;
        let old = std::mem::replace(&mut self.emulator, fresh);
        if let Err(e) = old.close() {
            warn!("Failed to close previous emulator on reset: {}", e);
        }
        info!("Emulator reset: {}", self.rom.display());
        self.refresh();
        Ok(())
    }

    fn refresh(&mut self) {
        if self.settings.render_mode == RenderMode::InputDriven {
            if let Err(e) = self.render(0) {
                warn!("Failed to refresh frame: {}", e);
            }
        }
    }

    fn render(&mut self, frames: u32) -> Result<(), EmulatorError> {
        if frames > 0 {
            self.emulator.advance(frames)?;
        }
        let frame = self.emulator.capture_frame()?;
        let overlay = format!("{} | Speed: {}x", self.game, self.speed);
        let seq = self.frames.submit(frame, overlay);
        debug!("Submitted frame {}", seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ButtonSymbol;
    use crate::render::{FramePublisher, PublishedFrame};
    use crate::testing::{EmuCall, MockBackend, MockPublisher};
    use chrono::Local;
    use std::path::Path;
    use tokio::task::JoinHandle;

    struct Harness {
        backend: MockBackend,
        queue: Arc<InputQueue>,
        commands: mpsc::Sender<SessionCommand>,
        counters: Arc<SessionCounters>,
        token: CancellationToken,
        task: JoinHandle<(Box<dyn EmulatorSession>, ExecutorExit)>,
        frames: tokio::sync::watch::Receiver<Option<Arc<PublishedFrame>>>,
    }

    fn spawn(settings: ExecutorSettings) -> Harness {
        let backend = MockBackend::default();
        let rom = Path::new("game.gb");
        let emulator = backend.open(rom, 1).unwrap();
        let queue = Arc::new(InputQueue::unbounded());
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (_publisher, sink, _current) =
            FramePublisher::new(Arc::new(MockPublisher::default()), Vec::new());
        let frames = sink.subscribe();
        let counters = Arc::new(SessionCounters::default());
        let token = CancellationToken::new();

        let executor = InputExecutor::new(
            emulator,
            Arc::new(backend.clone()),
            rom.to_path_buf(),
            "Game".to_string(),
            1,
            settings,
            queue.clone(),
            commands_rx,
            sink,
            counters.clone(),
        );
        let task = tokio::spawn(executor.run(token.clone()));

        Harness {
            backend,
            queue,
            commands: commands_tx,
            counters,
            token,
            task,
            frames,
        }
    }

    fn input(actor: u64, button: ButtonSymbol) -> InputEvent {
        InputEvent {
            actor,
            button,
            glyph: button.to_string(),
            accepted_at: Local::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_execute_in_fifo_order() {
        let h = spawn(ExecutorSettings::default());
        for (actor, button) in [
            (1, ButtonSymbol::Up),
            (2, ButtonSymbol::A),
            (3, ButtonSymbol::Down),
        ] {
            h.queue.enqueue(input(actor, button));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.token.cancel();
        let (_emulator, exit) = h.task.await.unwrap();
        assert!(matches!(exit, ExecutorExit::Stopped));

        assert_eq!(
            h.backend.presses(),
            vec![ButtonSymbol::Up, ButtonSymbol::A, ButtonSymbol::Down]
        );
        assert_eq!(h.counters.executed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_sequence() {
        let h = spawn(ExecutorSettings::default());
        h.queue.enqueue(input(1, ButtonSymbol::Up));
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.token.cancel();
        h.task.await.unwrap();

        assert_eq!(
            h.backend.plain_calls(),
            vec![
                EmuCall::Open("game.gb".into(), 1),
                EmuCall::Capture,
                EmuCall::Press(ButtonSymbol::Up),
                EmuCall::Advance(6),
                EmuCall::Release(ButtonSymbol::Up),
                EmuCall::Advance(30),
                EmuCall::Capture,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_hold_releases_button() {
        let h = spawn(ExecutorSettings {
            hold: Duration::from_secs(10),
            ..ExecutorSettings::default()
        });
        h.queue.enqueue(input(1, ButtonSymbol::B));
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.token.cancel();
        let (emulator, _) = h.task.await.unwrap();
        emulator.close().unwrap();

        let calls = h.backend.plain_calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[EmuCall::Release(ButtonSymbol::B), EmuCall::Close]
        );
        assert_eq!(h.counters.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_idle_wait() {
        let h = spawn(ExecutorSettings {
            dequeue_timeout: Duration::from_secs(3600),
            ..ExecutorSettings::default()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        h.token.cancel();
        h.task.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_input_does_not_stop_loop() {
        let h = spawn(ExecutorSettings::default());
        h.backend.switches.fail_press.store(true, Ordering::SeqCst);
        h.queue.enqueue(input(1, ButtonSymbol::Left));
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.backend.switches.fail_press.store(false, Ordering::SeqCst);
        h.queue.enqueue(input(2, ButtonSymbol::Right));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.backend.presses(), vec![ButtonSymbol::Right]);
        assert!(!h.task.is_finished());
        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_failure_still_releases() {
        let h = spawn(ExecutorSettings::default());
        h.backend.switches.fail_advance.store(true, Ordering::SeqCst);
        h.queue.enqueue(input(1, ButtonSymbol::Select));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let calls = h.backend.plain_calls();
        assert_eq!(
            &calls[2..],
            &[
                EmuCall::Press(ButtonSymbol::Select),
                EmuCall::Release(ButtonSymbol::Select),
            ]
        );
        assert_eq!(h.counters.executed.load(Ordering::SeqCst), 1);
        assert!(!h.task.is_finished());
        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_advances_by_speed() {
        let h = spawn(ExecutorSettings {
            render_mode: RenderMode::TimerDriven,
            ..ExecutorSettings::default()
        });

        let (tx, rx) = oneshot::channel();
        h.commands
            .send(SessionCommand::SetSpeed {
                speed: 3,
                respond_to: tx,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 3);

        h.commands.send(SessionCommand::Tick).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.token.cancel();
        h.task.await.unwrap();

        let calls = h.backend.plain_calls();
        assert!(calls.contains(&EmuCall::Advance(360)));
        assert_eq!(h.counters.speed.load(Ordering::SeqCst), 3);
        let frame = h.frames.borrow().clone().unwrap();
        assert_eq!(frame.overlay, "Game | Speed: 3x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_failure_is_fatal() {
        let h = spawn(ExecutorSettings {
            render_mode: RenderMode::TimerDriven,
            ..ExecutorSettings::default()
        });
        h.backend.switches.fail_capture.store(true, Ordering::SeqCst);
        h.commands.send(SessionCommand::Tick).await.unwrap();

        let (_emulator, exit) = h.task.await.unwrap();
        assert!(matches!(exit, ExecutorExit::Fatal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reopens_and_refreshes() {
        let h = spawn(ExecutorSettings::default());
        h.queue.enqueue(input(1, ButtonSymbol::Start));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let (tx, rx) = oneshot::channel();
        h.commands
            .send(SessionCommand::Reset { respond_to: tx })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        // Fresh session renders the same starting frame as the first one did
        let frame = h.frames.borrow().clone().unwrap();
        assert_eq!(frame.frame.pixels, vec![0, 0, 0]);

        h.token.cancel();
        let (emulator, _) = h.task.await.unwrap();
        emulator.close().unwrap();

        let calls = h.backend.calls();
        let first_close = calls
            .iter()
            .position(|(id, c)| *id == 1 && *c == EmuCall::Close)
            .unwrap();
        let second_open = calls
            .iter()
            .position(|(id, c)| *id == 2 && matches!(c, EmuCall::Open(..)))
            .unwrap();
        assert!(second_open < first_close);
        assert!(calls[first_close + 1..].iter().all(|(id, _)| *id == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_missing_state_reports_error() {
        let h = spawn(ExecutorSettings::default());
        let (tx, rx) = oneshot::channel();
        h.commands
            .send(SessionCommand::LoadState {
                path: "missing.state".into(),
                respond_to: tx,
            })
            .await
            .unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_resource_failure());
        h.token.cancel();
        h.task.await.unwrap();
    }
}
