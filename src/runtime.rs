use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use kirinuki_core::action::PointerEvent;
use kirinuki_core::curves::{generate_with, CurveError, ShapeSettings};
use kirinuki_core::grid::Difficulty;
use kirinuki_image::{cut, CancelToken, CutError, CutProgress, CutSettings};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::collaborators::{GameObserver, GameOver};
use crate::placement::{Board, BoardEvent, PlacementEngine, PlacementError, TrayRect};
use crate::session_store::{
    PuzzleImage, RestoredSession, SaveOutcome, SessionError, SessionStore,
};
use crate::status::PuzzleStatus;
use crate::stopwatch::Stopwatch;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Cut(#[from] CutError),
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("game loop has stopped")]
    Closed,
    #[error("background task failed: {0}")]
    Task(String),
}

/// Everything needed to cut a fresh puzzle.
#[derive(Clone, Debug)]
pub struct CutRequest {
    pub image: Arc<RgbaImage>,
    pub source: PuzzleImage,
    pub difficulty: Difficulty,
    pub seed: u32,
    pub shape: ShapeSettings,
    pub cut: CutSettings,
    /// Height of the scatter tray under the picture.
    pub tray_height: f32,
}

/// Copy of the game as seen by the loop at the time of the request.
#[derive(Clone, Debug)]
pub struct GameState {
    pub board: Option<Board>,
    pub elapsed_seconds: u64,
    pub cutting: bool,
    pub clock_running: bool,
}

impl GameState {
    pub fn placed_count(&self) -> usize {
        self.board.as_ref().map_or(0, Board::placed_count)
    }

    pub fn is_complete(&self) -> bool {
        self.board.as_ref().is_some_and(Board::is_complete)
    }
}

pub enum GameMessage {
    Pointer(PointerEvent),
    CutStarted {
        cut_id: u64,
        cancel: CancelToken,
    },
    CutProgress {
        cut_id: u64,
        progress: CutProgress,
    },
    CutFinished {
        cut_id: u64,
        source: PuzzleImage,
        result: Result<Board, RuntimeError>,
    },
    Restore(RestoredSession),
    Suspend,
    Wake,
    WhenReady(oneshot::Sender<bool>),
    Inspect(oneshot::Sender<GameState>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the game loop. All board state lives in the loop task and is only
/// touched by messages, one at a time.
pub struct PuzzleRuntime {
    tx: mpsc::UnboundedSender<GameMessage>,
    store: Arc<SessionStore>,
    active_cut: Mutex<Option<CancelToken>>,
    next_cut_id: AtomicU64,
    task: Option<JoinHandle<()>>,
}

impl PuzzleRuntime {
    /// Spawns the game loop on the current tokio runtime.
    pub fn spawn(store: SessionStore, observer: Arc<dyn GameObserver>) -> Self {
        let store = Arc::new(store);
        let (tx, rx) = mpsc::unbounded_channel();
        let game = GameLoop::new(Arc::clone(&store), observer);
        let task = tokio::spawn(game.run(rx));
        Self {
            tx,
            store,
            active_cut: Mutex::new(None),
            next_cut_id: AtomicU64::new(1),
            task: Some(task),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn send(&self, message: GameMessage) -> Result<(), RuntimeError> {
        self.tx.send(message).map_err(|_| RuntimeError::Closed)
    }

    /// Starts cutting on the blocking pool. Returns false when a cut or save
    /// already holds the status flag.
    pub fn start_cut(&self, request: CutRequest) -> bool {
        let Some(guard) = self.store.status().try_begin(PuzzleStatus::Cutting) else {
            log::info!("runtime: cut skipped, status is {:?}", self.store.status().current());
            return false;
        };
        let cut_id = self.next_cut_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        if let Ok(mut active) = self.active_cut.lock() {
            if let Some(previous) = active.replace(cancel.clone()) {
                previous.cancel();
            }
        }
        if self
            .send(GameMessage::CutStarted {
                cut_id,
                cancel: cancel.clone(),
            })
            .is_err()
        {
            return false;
        }

        let tx = self.tx.clone();
        log::info!(
            "runtime: cutting {} pieces with seed {:#010x}",
            request.difficulty.total(),
            request.seed
        );
        tokio::task::spawn_blocking(move || {
            let progress_tx = tx.clone();
            let result = cut_board(&request, &cancel, |progress| {
                let _ = progress_tx.send(GameMessage::CutProgress { cut_id, progress });
            });
            drop(guard);
            let _ = tx.send(GameMessage::CutFinished {
                cut_id,
                source: request.source,
                result,
            });
        });
        true
    }

    pub fn pointer(&self, event: PointerEvent) -> Result<(), RuntimeError> {
        self.send(GameMessage::Pointer(event))
    }

    /// Loads and deletes the saved game, then hands it to the loop. A corrupt
    /// snapshot is discarded and reported; the caller starts fresh.
    pub async fn resume_saved(&self) -> Result<bool, RuntimeError> {
        let store = Arc::clone(&self.store);
        let restored = tokio::task::spawn_blocking(move || store.resume())
            .await
            .map_err(|err| RuntimeError::Task(err.to_string()))??;
        match restored {
            Some(restored) => {
                self.send(GameMessage::Restore(restored))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pauses the clock and saves in the background.
    pub fn suspend(&self) -> Result<(), RuntimeError> {
        self.send(GameMessage::Suspend)
    }

    pub fn wake(&self) -> Result<(), RuntimeError> {
        self.send(GameMessage::Wake)
    }

    /// Waits for the pending cut. False when it failed or there is no board.
    pub async fn board_ready(&self) -> Result<bool, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameMessage::WhenReady(reply))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn inspect(&self) -> Result<GameState, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameMessage::Inspect(reply))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Stops the loop after any in-flight save has finished.
    pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameMessage::Shutdown(reply))?;
        rx.await.map_err(|_| RuntimeError::Closed)?;
        if let Some(task) = self.task.take() {
            task.await.map_err(|err| RuntimeError::Task(err.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PuzzleRuntime {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active_cut.lock() {
            if let Some(cancel) = active.take() {
                cancel.cancel();
            }
        }
    }
}

fn cut_board<F>(request: &CutRequest, cancel: &CancelToken, progress: F) -> Result<Board, RuntimeError>
where
    F: FnMut(CutProgress),
{
    let (width, height) = request.image.dimensions();
    let Difficulty { cols, rows } = request.difficulty;
    let boundary = generate_with(width, height, cols, rows, request.seed, &request.shape)?;
    let pieces = cut(
        &request.image,
        rows,
        cols,
        &boundary,
        &request.cut,
        cancel,
        progress,
    )?;
    let mut board = Board::new(Arc::new(boundary), pieces)?;
    let tray = TrayRect::below_image(&board, request.tray_height);
    board.scatter(tray, &mut StdRng::seed_from_u64(request.seed as u64));
    Ok(board)
}

struct GameLoop {
    store: Arc<SessionStore>,
    observer: Arc<dyn GameObserver>,
    engine: Option<PlacementEngine>,
    image: Option<PuzzleImage>,
    stopwatch: Stopwatch,
    cut: Option<(u64, CancelToken)>,
    waiters: Vec<oneshot::Sender<bool>>,
    pending_save: Option<JoinHandle<()>>,
}

impl GameLoop {
    fn new(store: Arc<SessionStore>, observer: Arc<dyn GameObserver>) -> Self {
        Self {
            store,
            observer,
            engine: None,
            image: None,
            stopwatch: Stopwatch::new(),
            cut: None,
            waiters: Vec::new(),
            pending_save: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<GameMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                GameMessage::Pointer(event) => self.on_pointer(event).await,
                GameMessage::CutStarted { cut_id, cancel } => {
                    if let Some((_, previous)) = self.cut.replace((cut_id, cancel)) {
                        previous.cancel();
                    }
                }
                GameMessage::CutProgress { cut_id, progress } => {
                    if self.is_current_cut(cut_id) {
                        self.observer.cut_progress(progress);
                    }
                }
                GameMessage::CutFinished {
                    cut_id,
                    source,
                    result,
                } => self.on_cut_finished(cut_id, source, result),
                GameMessage::Restore(restored) => self.on_restore(restored),
                GameMessage::Suspend => self.on_suspend().await,
                GameMessage::Wake => {
                    if self.engine.as_ref().is_some_and(|engine| !engine.is_complete()) {
                        self.stopwatch.start();
                    }
                }
                GameMessage::WhenReady(reply) => {
                    if self.cut.is_some() {
                        self.waiters.push(reply);
                    } else {
                        let _ = reply.send(self.engine.is_some());
                    }
                }
                GameMessage::Inspect(reply) => {
                    let _ = reply.send(self.state());
                }
                GameMessage::Shutdown(reply) => {
                    self.finish_pending_save().await;
                    if let Some((_, cancel)) = self.cut.take() {
                        cancel.cancel();
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
        log::debug!("runtime: game loop stopped");
    }

    fn is_current_cut(&self, cut_id: u64) -> bool {
        self.cut.as_ref().is_some_and(|(current, _)| *current == cut_id)
    }

    fn state(&self) -> GameState {
        GameState {
            board: self.engine.as_ref().map(PlacementEngine::snapshot_board),
            elapsed_seconds: self.stopwatch.elapsed_seconds(),
            cutting: self.cut.is_some(),
            clock_running: self.stopwatch.is_running(),
        }
    }

    fn notify_waiters(&mut self, ready: bool) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(ready);
        }
    }

    fn on_cut_finished(
        &mut self,
        cut_id: u64,
        source: PuzzleImage,
        result: Result<Board, RuntimeError>,
    ) {
        if !self.is_current_cut(cut_id) {
            log::debug!("runtime: dropping stale cut {}", cut_id);
            return;
        }
        self.cut = None;
        match result {
            Ok(board) => {
                let (total, placed) = (board.total(), board.placed_count());
                self.engine = Some(PlacementEngine::new(board));
                self.image = Some(source);
                self.stopwatch = Stopwatch::new();
                self.stopwatch.start();
                log::info!("runtime: board ready with {} pieces", total);
                self.observer.board_ready(total, placed);
                self.notify_waiters(true);
            }
            Err(err) => {
                log::warn!("runtime: cut failed: {}", err);
                self.observer.cut_failed(&err.to_string());
                self.notify_waiters(self.engine.is_some());
            }
        }
    }

    fn on_restore(&mut self, restored: RestoredSession) {
        if let Some((_, cancel)) = self.cut.take() {
            cancel.cancel();
        }
        let RestoredSession {
            board,
            elapsed_seconds,
            image,
        } = restored;
        let (total, placed) = (board.total(), board.placed_count());
        let mut engine = PlacementEngine::new(board);
        engine.bring_movable_to_front();
        self.stopwatch = Stopwatch::resumed_from(elapsed_seconds);
        if !engine.is_complete() {
            self.stopwatch.start();
        }
        self.engine = Some(engine);
        self.image = Some(image);
        self.observer.board_ready(total, placed);
        self.notify_waiters(true);
    }

    async fn on_pointer(&mut self, event: PointerEvent) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let events = engine.handle(event);
        for event in events {
            match event {
                BoardEvent::PiecePlaced { placed, total, .. } => {
                    self.observer.piece_placed(placed, total);
                }
                BoardEvent::Completed => self.on_completed().await,
                _ => {}
            }
        }
    }

    async fn on_completed(&mut self) {
        self.stopwatch.stop();
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let board = engine.board();
        let game = GameOver {
            image_id: self
                .image
                .as_ref()
                .and_then(|image| image.asset_name())
                .map(str::to_string),
            elapsed_seconds: self.stopwatch.elapsed_seconds(),
            difficulty_key: Difficulty {
                cols: board.cols,
                rows: board.rows,
            }
            .key(),
        };
        log::info!(
            "runtime: {} solved in {}s",
            game.picture(),
            game.elapsed_seconds
        );
        self.observer.completed(&game);
        // A save started before the last drop must not outlive the win.
        self.finish_pending_save().await;
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.clear()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("runtime: failed to clear snapshot: {}", err),
            Err(err) => log::warn!("runtime: clear task failed: {}", err),
        }
    }

    async fn on_suspend(&mut self) {
        self.stopwatch.stop();
        self.finish_pending_save().await;
        let (Some(engine), Some(image)) = (self.engine.as_ref(), self.image.clone()) else {
            return;
        };
        let board = engine.snapshot_board();
        let elapsed = self.stopwatch.elapsed_seconds();
        let store = Arc::clone(&self.store);
        let observer = Arc::clone(&self.observer);
        self.pending_save = Some(tokio::task::spawn_blocking(move || {
            match store.save(&board, elapsed, &image) {
                Ok(SaveOutcome::Saved(_)) => observer.saved(),
                Ok(SaveOutcome::Cleared) => log::debug!("runtime: nothing to save"),
                Ok(SaveOutcome::Skipped) => {}
                Err(err) => log::warn!("runtime: save failed: {}", err),
            }
        }));
    }

    async fn finish_pending_save(&mut self) {
        if let Some(save) = self.pending_save.take() {
            if let Err(err) = save.await {
                log::warn!("runtime: save task failed: {}", err);
            }
        }
    }
}
