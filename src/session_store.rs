use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use kirinuki_core::curves::{generate_with, BoundaryDescriptor};
use kirinuki_core::snapshot::{
    validate_image_ref, ImageRef, PieceRecord, SessionManifest, SESSION_SNAPSHOT_VERSION,
};
use kirinuki_core::codec::{decode_framed, encode_framed};
use kirinuki_image::{decode_png, encode_png, PipelineError, Piece};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::placement::Board;
use crate::status::{PuzzleStatus, StatusFlag};

pub const SAVED_GAME_DIR: &str = "saved_game";
pub const STAGING_DIR: &str = "saved_game.staging";
pub const BACKUP_DIR: &str = "saved_game.backup";
pub const MANIFEST_FILE: &str = "gamestate.bin";
pub const SOURCE_IMAGE_FILE: &str = "source_image.png";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("snapshot io failed: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Image(#[from] PipelineError),
}

/// The picture a puzzle was cut from.
#[derive(Clone, Debug)]
pub enum PuzzleImage {
    /// A bundled picture, looked up by name when needed.
    Asset { name: String },
    /// A picture taken or picked by the player; copied into the snapshot.
    Captured { pixels: Arc<RgbaImage> },
}

impl PuzzleImage {
    /// Gallery name of a bundled picture; captured pictures have none.
    pub fn asset_name(&self) -> Option<&str> {
        match self {
            PuzzleImage::Asset { name } => Some(name),
            PuzzleImage::Captured { .. } => None,
        }
    }
}

/// A snapshot found on disk, not yet turned into a board.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub dir: PathBuf,
    pub manifest: SessionManifest,
}

#[derive(Debug)]
pub struct RestoredSession {
    pub board: Board,
    pub elapsed_seconds: u64,
    pub image: PuzzleImage,
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved(SessionSnapshot),
    /// Nothing worth resuming; any previous snapshot was removed.
    Cleared,
    /// Another cut or save held the status flag.
    Skipped,
}

pub struct SessionStore {
    data_dir: PathBuf,
    status: Arc<StatusFlag>,
    store_boundary: bool,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_status(data_dir, StatusFlag::process())
    }

    pub fn with_status(data_dir: impl Into<PathBuf>, status: Arc<StatusFlag>) -> Self {
        Self {
            data_dir: data_dir.into(),
            status,
            store_boundary: true,
        }
    }

    /// Leaves the boundary out of the manifest; `load` then regenerates it.
    pub fn set_store_boundary(&mut self, store: bool) {
        self.store_boundary = store;
    }

    pub fn status(&self) -> &Arc<StatusFlag> {
        &self.status
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join(SAVED_GAME_DIR)
    }

    fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR)
    }

    fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }

    pub fn save(
        &self,
        board: &Board,
        elapsed_seconds: u64,
        image: &PuzzleImage,
    ) -> Result<SaveOutcome, SessionError> {
        if board.total() == 0 || board.is_complete() {
            self.clear()?;
            return Ok(SaveOutcome::Cleared);
        }
        let Some(_guard) = self.status.try_begin(PuzzleStatus::Saving) else {
            log::info!("session: save skipped, status is {:?}", self.status.current());
            return Ok(SaveOutcome::Skipped);
        };

        let staging = self.staging_dir();
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;
        let manifest = match self.write_staging(&staging, board, elapsed_seconds, image) {
            Ok(manifest) => manifest,
            Err(err) => {
                log::warn!("session: save failed, keeping previous snapshot: {}", err);
                let _ = fs::remove_dir_all(&staging);
                return Err(err);
            }
        };
        self.swap_in(&staging)?;
        log::info!(
            "session: saved {} pieces ({} placed) at {}s",
            board.total(),
            board.placed_count(),
            elapsed_seconds
        );
        Ok(SaveOutcome::Saved(SessionSnapshot {
            dir: self.snapshot_dir(),
            manifest,
        }))
    }

    fn write_staging(
        &self,
        staging: &Path,
        board: &Board,
        elapsed_seconds: u64,
        image: &PuzzleImage,
    ) -> Result<SessionManifest, SessionError> {
        let mut pieces = Vec::with_capacity(board.total());
        for piece in board.pieces() {
            let raster = format!("piece_{}.png", piece.id);
            let bytes = encode_png(&piece.pixels)?;
            fs::write(staging.join(&raster), &bytes)?;
            pieces.push(PieceRecord {
                id: piece.id as u32,
                row: piece.row,
                col: piece.col,
                target: piece.target,
                current: piece.current,
                width: piece.width,
                height: piece.height,
                locked: piece.locked,
                raster,
                digest: sha256(&bytes),
            });
        }
        let (image_ref, source_digest) = match image {
            PuzzleImage::Asset { name } => (ImageRef::Asset { name: name.clone() }, None),
            PuzzleImage::Captured { pixels } => {
                let bytes = encode_png(pixels)?;
                fs::write(staging.join(SOURCE_IMAGE_FILE), &bytes)?;
                (
                    ImageRef::Captured {
                        file: SOURCE_IMAGE_FILE.to_string(),
                    },
                    Some(sha256(&bytes)),
                )
            }
        };
        let manifest = SessionManifest {
            version: SESSION_SNAPSHOT_VERSION,
            image_ref,
            source_digest,
            image_width: board.image_width,
            image_height: board.image_height,
            rows: board.rows,
            cols: board.cols,
            seed: board.seed,
            shape: board.boundary.settings.clone(),
            boundary: self
                .store_boundary
                .then(|| board.boundary.as_ref().clone()),
            elapsed_seconds,
            pieces,
        };
        let bytes = encode_framed(&manifest).map_err(|err| SessionError::Encode(err.to_string()))?;
        fs::write(staging.join(MANIFEST_FILE), bytes)?;
        Ok(manifest)
    }

    /// Replaces the live snapshot with `staging`. The old one sits in the backup
    /// directory until the rename succeeds.
    fn swap_in(&self, staging: &Path) -> Result<(), SessionError> {
        let live = self.snapshot_dir();
        let backup = self.backup_dir();
        remove_dir_if_exists(&backup)?;
        if live.exists() {
            fs::rename(&live, &backup)?;
        }
        if let Err(err) = fs::rename(staging, &live) {
            if backup.exists() {
                let _ = fs::rename(&backup, &live);
            }
            return Err(err.into());
        }
        // The new snapshot is live from here on.
        discard_backup(&backup);
        Ok(())
    }

    /// Finishes an interrupted swap, then reads the manifest if there is one.
    pub fn open(&self) -> Result<Option<SessionSnapshot>, SessionError> {
        let live = self.snapshot_dir();
        let backup = self.backup_dir();
        if !live.exists() && backup.exists() {
            log::warn!("session: restoring snapshot from interrupted save");
            fs::rename(&backup, &live)?;
        } else {
            discard_backup(&backup);
        }
        remove_dir_if_exists(&self.staging_dir())?;

        let manifest_path = live.join(MANIFEST_FILE);
        let bytes = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let manifest: SessionManifest =
            decode_framed(&bytes).map_err(|err| SessionError::Corrupt(err.to_string()))?;
        if manifest.version != SESSION_SNAPSHOT_VERSION {
            return Err(SessionError::Corrupt(format!(
                "snapshot version {} (expected {})",
                manifest.version, SESSION_SNAPSHOT_VERSION
            )));
        }
        validate_image_ref(&manifest.image_ref).map_err(SessionError::Corrupt)?;
        Ok(Some(SessionSnapshot { dir: live, manifest }))
    }

    pub fn load(&self, snapshot: &SessionSnapshot) -> Result<RestoredSession, SessionError> {
        let manifest = &snapshot.manifest;
        let boundary = match &manifest.boundary {
            Some(boundary) => boundary.clone(),
            None => {
                log::debug!("session: regenerating boundary for seed {:#010x}", manifest.seed);
                generate_with(
                    manifest.image_width,
                    manifest.image_height,
                    manifest.cols,
                    manifest.rows,
                    manifest.seed,
                    &manifest.shape,
                )
                .map_err(|err| SessionError::Corrupt(err.to_string()))?
            }
        };
        check_boundary(&boundary, manifest)?;

        let mut pieces = Vec::with_capacity(manifest.pieces.len());
        for record in &manifest.pieces {
            let bytes = read_artifact(&snapshot.dir, &record.raster, &record.digest)?;
            let pixels = decode_png(&bytes)?;
            if pixels.dimensions() != (record.width, record.height) {
                return Err(SessionError::Corrupt(format!(
                    "{} is {}x{}, expected {}x{}",
                    record.raster,
                    pixels.width(),
                    pixels.height(),
                    record.width,
                    record.height
                )));
            }
            pieces.push(Piece {
                id: record.id as usize,
                row: record.row,
                col: record.col,
                target: record.target,
                current: if record.locked {
                    record.target
                } else {
                    record.current
                },
                width: record.width,
                height: record.height,
                pixels: Arc::new(pixels),
                locked: record.locked,
            });
        }

        let image = match &manifest.image_ref {
            ImageRef::Asset { name } => PuzzleImage::Asset { name: name.clone() },
            ImageRef::Captured { file } => {
                let digest = manifest
                    .source_digest
                    .ok_or_else(|| SessionError::Corrupt("missing source digest".to_string()))?;
                let bytes = read_artifact(&snapshot.dir, file, &digest)?;
                PuzzleImage::Captured {
                    pixels: Arc::new(decode_png(&bytes)?),
                }
            }
        };

        let board = Board::new(Arc::new(boundary), pieces)
            .map_err(|err| SessionError::Corrupt(err.to_string()))?;
        Ok(RestoredSession {
            board,
            elapsed_seconds: manifest.elapsed_seconds,
            image,
        })
    }

    /// Loads the saved game and deletes it. A corrupt snapshot is deleted too.
    pub fn resume(&self) -> Result<Option<RestoredSession>, SessionError> {
        let restored = self
            .open()
            .and_then(|snapshot| snapshot.map(|snapshot| self.load(&snapshot)).transpose());
        match restored {
            Ok(Some(restored)) => {
                self.clear()?;
                log::info!(
                    "session: resumed {}/{} placed at {}s",
                    restored.board.placed_count(),
                    restored.board.total(),
                    restored.elapsed_seconds
                );
                Ok(Some(restored))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                log::warn!("session: discarding unreadable snapshot: {}", err);
                self.clear()?;
                Err(err)
            }
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_dir().join(MANIFEST_FILE).exists()
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        remove_dir_if_exists(&self.snapshot_dir())?;
        remove_dir_if_exists(&self.staging_dir())?;
        remove_dir_if_exists(&self.backup_dir())?;
        Ok(())
    }
}

fn check_boundary(
    boundary: &BoundaryDescriptor,
    manifest: &SessionManifest,
) -> Result<(), SessionError> {
    boundary
        .validate()
        .map_err(|err| SessionError::Corrupt(err.to_string()))?;
    if boundary.width != manifest.image_width
        || boundary.height != manifest.image_height
        || boundary.cols != manifest.cols
        || boundary.rows != manifest.rows
    {
        return Err(SessionError::Corrupt(
            "boundary does not match the board".to_string(),
        ));
    }
    Ok(())
}

fn read_artifact(dir: &Path, name: &str, digest: &[u8; 32]) -> Result<Vec<u8>, SessionError> {
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(SessionError::Corrupt(format!("bad artifact name {name}")));
    }
    let bytes = match fs::read(dir.join(name)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SessionError::Corrupt(format!("missing {name}")));
        }
        Err(err) => return Err(err.into()),
    };
    if sha256(&bytes) != *digest {
        return Err(SessionError::Corrupt(format!("{name} digest mismatch")));
    }
    Ok(bytes)
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Leftover backups next to a live snapshot are harmless; failing to remove one
/// is only logged.
fn discard_backup(backup: &Path) {
    if let Err(err) = remove_dir_if_exists(backup) {
        log::warn!("session: could not remove {}: {}", backup.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use kirinuki_core::curves::generate;

    fn small_board() -> Board {
        let boundary = Arc::new(generate(40, 20, 2, 1, 3).expect("generate"));
        let pieces = (0..2u32)
            .map(|id| {
                let pixels = RgbaImage::from_pixel(20, 20, Rgba([id as u8 * 50, 10, 10, 255]));
                Piece {
                    id: id as usize,
                    row: 0,
                    col: id,
                    target: (id as f32 * 20.0, 0.0),
                    current: (id as f32 * 20.0 + 7.0, 90.0),
                    width: 20,
                    height: 20,
                    pixels: Arc::new(pixels),
                    locked: false,
                }
            })
            .collect();
        Board::new(boundary, pieces).expect("board")
    }

    fn asset() -> PuzzleImage {
        PuzzleImage::Asset {
            name: "harbor".to_string(),
        }
    }

    #[test]
    fn missing_snapshot_opens_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::with_status(dir.path(), StatusFlag::new());
        assert!(store.open().expect("open").is_none());
        assert!(store.resume().expect("resume").is_none());
    }

    #[test]
    fn save_writes_manifest_and_rasters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::with_status(dir.path(), StatusFlag::new());
        let outcome = store.save(&small_board(), 12, &asset()).expect("save");
        let SaveOutcome::Saved(snapshot) = outcome else {
            panic!("expected a saved snapshot");
        };
        assert_eq!(snapshot.manifest.pieces.len(), 2);
        assert!(snapshot.dir.join(MANIFEST_FILE).exists());
        assert!(snapshot.dir.join("piece_0.png").exists());
        assert!(snapshot.dir.join("piece_1.png").exists());
        assert!(!dir.path().join(STAGING_DIR).exists());
        assert!(!dir.path().join(BACKUP_DIR).exists());
    }

    #[test]
    fn save_is_skipped_while_cutting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag = StatusFlag::new();
        let store = SessionStore::with_status(dir.path(), flag.clone());
        let _cutting = flag.try_begin(PuzzleStatus::Cutting).expect("idle");
        assert!(matches!(
            store.save(&small_board(), 0, &asset()).expect("save"),
            SaveOutcome::Skipped
        ));
        assert!(!store.has_snapshot());
    }

    #[test]
    fn finished_board_clears_even_while_cutting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag = StatusFlag::new();
        let store = SessionStore::with_status(dir.path(), flag.clone());
        let board = small_board();
        store.save(&board, 5, &asset()).expect("save");
        assert!(store.has_snapshot());

        let solved: Vec<Piece> = board
            .pieces()
            .iter()
            .cloned()
            .map(|mut piece| {
                piece.current = piece.target;
                piece.locked = true;
                piece
            })
            .collect();
        let solved = Board::new(Arc::clone(&board.boundary), solved).expect("board");
        assert!(solved.is_complete());

        let _cutting = flag.try_begin(PuzzleStatus::Cutting).expect("idle");
        assert!(matches!(
            store.save(&solved, 9, &asset()).expect("save"),
            SaveOutcome::Cleared
        ));
        assert!(!store.has_snapshot());
    }

    #[test]
    fn leftover_backup_does_not_block_the_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::with_status(dir.path(), StatusFlag::new());
        store.save(&small_board(), 3, &asset()).expect("save");
        // A plain file cannot be removed as a directory.
        fs::write(dir.path().join(BACKUP_DIR), b"stale").expect("write");

        let snapshot = store.open().expect("open").expect("snapshot");
        assert_eq!(snapshot.manifest.elapsed_seconds, 3);
        let restored = store.load(&snapshot).expect("load");
        assert_eq!(restored.board.total(), 2);
    }

    #[test]
    fn tampered_raster_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::with_status(dir.path(), StatusFlag::new());
        store.save(&small_board(), 1, &asset()).expect("save");
        let raster = store.snapshot_dir().join("piece_1.png");
        let mut bytes = fs::read(&raster).expect("read");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&raster, bytes).expect("write");
        let snapshot = store.open().expect("open").expect("snapshot");
        assert!(matches!(store.load(&snapshot), Err(SessionError::Corrupt(_))));
    }

    #[test]
    fn artifact_names_stay_inside_the_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            read_artifact(dir.path(), "../gamestate.bin", &[0; 32]),
            Err(SessionError::Corrupt(_))
        ));
    }
}
