//! Jigsaw puzzle engine: drag placement with snapping, suspend/resume
//! persistence and the game loop that ties cutting and play together.
//!
//! Geometry lives in `kirinuki-core`, rasters in `kirinuki-image`.

pub mod collaborators;
pub mod config;
pub mod placement;
pub mod runtime;
pub mod session_store;
pub mod status;
pub mod stopwatch;

pub use collaborators::{
    GameObserver, GameOver, HighScores, LedgerObserver, NoopObserver, ScoreEntry,
    UnlockedPictures,
};
pub use config::{AppConfig, ConfigError};
pub use kirinuki_image::Piece;
pub use placement::{Board, BoardEvent, PlacementEngine, PlacementError, TrayRect};
pub use runtime::{CutRequest, GameMessage, GameState, PuzzleRuntime, RuntimeError};
pub use session_store::{
    PuzzleImage, RestoredSession, SaveOutcome, SessionError, SessionSnapshot, SessionStore,
};
pub use status::{PuzzleStatus, StatusFlag, StatusGuard};
pub use stopwatch::{format_clock, Stopwatch};
