use std::fs;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use kirinuki::placement::{Board, BoardEvent, PlacementEngine, TrayRect};
use kirinuki::session_store::{
    PuzzleImage, SaveOutcome, SessionError, SessionStore, BACKUP_DIR, MANIFEST_FILE,
    SAVED_GAME_DIR, STAGING_DIR,
};
use kirinuki::status::StatusFlag;
use kirinuki_core::action::PointerEvent;
use kirinuki_core::codec::{decode_framed, encode_framed};
use kirinuki_core::curves::generate;
use kirinuki_core::snapshot::{SessionManifest, SESSION_SNAPSHOT_VERSION};
use kirinuki_image::{cut, CancelToken, CutSettings};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn photo(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 3 % 256) as u8, (y * 11 % 256) as u8, 90, 255])
    })
}

fn cut_board(image: &RgbaImage, cols: u32, rows: u32, seed: u32) -> Board {
    let (width, height) = image.dimensions();
    let boundary = generate(width, height, cols, rows, seed).expect("generate");
    let pieces = cut(
        image,
        rows,
        cols,
        &boundary,
        &CutSettings::default(),
        &CancelToken::new(),
        |_| {},
    )
    .expect("cut");
    let mut board = Board::new(Arc::new(boundary), pieces).expect("board");
    let tray = TrayRect::below_image(&board, 300.0);
    board.scatter(tray, &mut StdRng::seed_from_u64(seed as u64));
    board
}

fn place(engine: &mut PlacementEngine, id: usize) {
    let piece = engine.board().piece(id).expect("piece");
    let (current, target) = (piece.current, piece.target);
    engine.handle(PointerEvent::down(1, current.0, current.1).on_piece(id));
    engine.handle(PointerEvent::up(1, target.0, target.1));
    assert!(engine.board().piece(id).expect("piece").locked);
}

fn store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::with_status(dir.path(), StatusFlag::new())
}

#[test]
fn save_then_resume_restores_the_exact_board() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let image = photo(240, 180);
    let mut engine = PlacementEngine::new(cut_board(&image, 4, 3, 77));
    place(&mut engine, 0);
    place(&mut engine, 5);
    let board = engine.snapshot_board();
    let source = PuzzleImage::Captured {
        pixels: Arc::new(image.clone()),
    };

    let outcome = store.save(&board, 93, &source).expect("save");
    assert!(matches!(outcome, SaveOutcome::Saved(_)));
    assert!(store.has_snapshot());

    let restored = store.resume().expect("resume").expect("snapshot present");
    assert!(!store.has_snapshot());
    assert_eq!(restored.elapsed_seconds, 93);
    assert_eq!(restored.board.z_order(), board.z_order());
    assert_eq!(restored.board.boundary, board.boundary);
    for (before, after) in board.pieces().iter().zip(restored.board.pieces()) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.current, after.current);
        assert_eq!(before.target, after.target);
        assert_eq!(before.locked, after.locked);
        assert_eq!(*before.pixels, *after.pixels);
    }
    match restored.image {
        PuzzleImage::Captured { pixels } => assert_eq!(*pixels, image),
        PuzzleImage::Asset { .. } => panic!("expected the captured picture"),
    }

    let mut engine = PlacementEngine::new(restored.board);
    let locked = engine.board().piece(5).expect("piece").target;
    assert_eq!(
        engine.handle(PointerEvent::down(2, locked.0 + 5.0, locked.1 + 5.0).on_piece(5)),
        vec![BoardEvent::Consumed { piece_id: 5 }]
    );
}

#[test]
fn completed_board_is_never_resumable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let image = photo(120, 120);
    let asset = PuzzleImage::Asset {
        name: "lighthouse".to_string(),
    };
    let mut engine = PlacementEngine::new(cut_board(&image, 2, 2, 3));
    store
        .save(&engine.snapshot_board(), 10, &asset)
        .expect("first save");
    assert!(store.has_snapshot());

    for id in 0..4 {
        place(&mut engine, id);
    }
    assert!(engine.is_complete());
    let outcome = store.save(&engine.snapshot_board(), 20, &asset).expect("save");
    assert!(matches!(outcome, SaveOutcome::Cleared));
    assert!(!store.has_snapshot());
    assert!(store.resume().expect("resume").is_none());
}

#[test]
fn unreadable_manifest_is_rejected_and_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let board = cut_board(&photo(90, 90), 3, 3, 9);
    let asset = PuzzleImage::Asset {
        name: "fields".to_string(),
    };
    store.save(&board, 1, &asset).expect("save");
    let manifest = dir.path().join(SAVED_GAME_DIR).join(MANIFEST_FILE);
    let bytes = fs::read(&manifest).expect("read");
    fs::write(&manifest, &bytes[..bytes.len() / 2]).expect("truncate");

    assert!(matches!(store.resume(), Err(SessionError::Corrupt(_))));
    assert!(!store.has_snapshot());
}

#[test]
fn other_snapshot_versions_are_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let board = cut_board(&photo(90, 90), 3, 3, 9);
    let asset = PuzzleImage::Asset {
        name: "fields".to_string(),
    };
    store.save(&board, 1, &asset).expect("save");
    let path = dir.path().join(SAVED_GAME_DIR).join(MANIFEST_FILE);
    let mut manifest: SessionManifest =
        decode_framed(&fs::read(&path).expect("read")).expect("decode");
    manifest.version = SESSION_SNAPSHOT_VERSION + 1;
    fs::write(&path, encode_framed(&manifest).expect("encode")).expect("write");

    assert!(matches!(store.open(), Err(SessionError::Corrupt(_))));
}

#[test]
fn missing_raster_is_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let board = cut_board(&photo(90, 90), 3, 3, 9);
    let asset = PuzzleImage::Asset {
        name: "fields".to_string(),
    };
    store.save(&board, 1, &asset).expect("save");
    fs::remove_file(dir.path().join(SAVED_GAME_DIR).join("piece_4.png")).expect("remove");
    let snapshot = store.open().expect("open").expect("snapshot");
    assert!(matches!(store.load(&snapshot), Err(SessionError::Corrupt(_))));
}

#[test]
fn snapshot_without_boundary_regenerates_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = store(&dir);
    store.set_store_boundary(false);
    let board = cut_board(&photo(200, 160), 5, 4, 0xdead_beef);
    let asset = PuzzleImage::Asset {
        name: "harbor".to_string(),
    };
    store.save(&board, 5, &asset).expect("save");

    let snapshot = store.open().expect("open").expect("snapshot");
    assert!(snapshot.manifest.boundary.is_none());
    let restored = store.load(&snapshot).expect("load");
    assert_eq!(restored.board.boundary, board.boundary);
    assert_eq!(restored.board.seed, 0xdead_beef);
}

#[test]
fn interrupted_swap_recovers_the_previous_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let board = cut_board(&photo(90, 60), 3, 2, 12);
    let asset = PuzzleImage::Asset {
        name: "meadow".to_string(),
    };
    store.save(&board, 44, &asset).expect("save");

    // Crash after the live snapshot moved aside, before staging was renamed in.
    fs::rename(
        dir.path().join(SAVED_GAME_DIR),
        dir.path().join(BACKUP_DIR),
    )
    .expect("move aside");
    fs::create_dir_all(dir.path().join(STAGING_DIR)).expect("staging");
    fs::write(dir.path().join(STAGING_DIR).join("piece_0.png"), b"half").expect("write");

    let restored = store.resume().expect("resume").expect("recovered");
    assert_eq!(restored.elapsed_seconds, 44);
    assert_eq!(restored.board.z_order(), board.z_order());
    assert!(!dir.path().join(BACKUP_DIR).exists());
    assert!(!dir.path().join(STAGING_DIR).exists());
}

#[test]
fn a_second_save_replaces_the_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store(&dir);
    let asset = PuzzleImage::Asset {
        name: "meadow".to_string(),
    };
    let mut engine = PlacementEngine::new(cut_board(&photo(90, 60), 3, 2, 12));
    store.save(&engine.snapshot_board(), 1, &asset).expect("save");
    place(&mut engine, 2);
    store.save(&engine.snapshot_board(), 2, &asset).expect("save");

    let restored = store.resume().expect("resume").expect("snapshot");
    assert_eq!(restored.elapsed_seconds, 2);
    assert_eq!(restored.board.placed_count(), 1);
    assert!(restored.board.piece(2).expect("piece").locked);
}
