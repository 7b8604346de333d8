use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kirinuki_core::action::{PointerEvent, PointerId, PointerPhase};
use kirinuki_core::curves::BoundaryDescriptor;
use kirinuki_image::Piece;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

/// Vertical gap between the image area and the scatter tray, in board units.
pub const TRAY_GAP: f32 = 16.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("a board needs at least one piece")]
    EmptyBoard,
    #[error("expected {expected} pieces for the grid, found {found}")]
    PieceCount { expected: usize, found: usize },
    #[error("piece {0} appears more than once or lies outside the grid")]
    InvalidPiece(usize),
}

/// Pieces and their z-order (index 0 is the bottom) over one puzzle picture.
#[derive(Clone, Debug)]
pub struct Board {
    pub rows: u32,
    pub cols: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub seed: u32,
    pub boundary: Arc<BoundaryDescriptor>,
    pieces: Vec<Piece>,
    complete: bool,
}

impl Board {
    pub fn new(boundary: Arc<BoundaryDescriptor>, pieces: Vec<Piece>) -> Result<Self, PlacementError> {
        let rows = boundary.rows;
        let cols = boundary.cols;
        if pieces.is_empty() {
            return Err(PlacementError::EmptyBoard);
        }
        let expected = rows as usize * cols as usize;
        if pieces.len() != expected {
            return Err(PlacementError::PieceCount {
                expected,
                found: pieces.len(),
            });
        }
        let mut seen = HashSet::with_capacity(pieces.len());
        for piece in &pieces {
            if piece.id >= expected
                || piece.row >= rows
                || piece.col >= cols
                || !seen.insert(piece.id)
            {
                return Err(PlacementError::InvalidPiece(piece.id));
            }
        }
        let complete = pieces.iter().all(|piece| piece.locked);
        Ok(Self {
            rows,
            cols,
            image_width: boundary.width,
            image_height: boundary.height,
            seed: boundary.seed,
            boundary,
            pieces,
            complete,
        })
    }

    /// Pieces bottom to top.
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn piece(&self, id: usize) -> Option<&Piece> {
        self.pieces.iter().find(|piece| piece.id == id)
    }

    fn index_of(&self, id: usize) -> Option<usize> {
        self.pieces.iter().position(|piece| piece.id == id)
    }

    pub fn z_order(&self) -> Vec<usize> {
        self.pieces.iter().map(|piece| piece.id).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn total(&self) -> usize {
        self.pieces.len()
    }

    pub fn placed_count(&self) -> usize {
        self.pieces.iter().filter(|piece| piece.locked).count()
    }

    /// Topmost piece whose raster is opaque under a board position.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<usize> {
        self.pieces
            .iter()
            .rev()
            .find(|piece| piece.hit(x, y))
            .map(|piece| piece.id)
    }

    fn bring_to_front(&mut self, index: usize) -> usize {
        let piece = self.pieces.remove(index);
        self.pieces.push(piece);
        self.pieces.len() - 1
    }

    fn send_to_back(&mut self, index: usize) {
        let piece = self.pieces.remove(index);
        self.pieces.insert(0, piece);
    }

    /// Keeps locked pieces at the bottom and stacks every movable piece above
    /// them, preserving relative order within each group.
    pub fn bring_movable_to_front(&mut self) {
        let (locked, movable): (Vec<Piece>, Vec<Piece>) =
            self.pieces.drain(..).partition(|piece| piece.locked);
        self.pieces.extend(locked);
        self.pieces.extend(movable);
    }

    /// Shuffles the movable pieces and drops each at a random spot inside `tray`.
    pub fn scatter<R: Rng>(&mut self, tray: TrayRect, rng: &mut R) {
        let (locked, mut movable): (Vec<Piece>, Vec<Piece>) =
            self.pieces.drain(..).partition(|piece| piece.locked);
        movable.shuffle(rng);
        for piece in &mut movable {
            let max_x = (tray.x + tray.width - piece.width as f32).max(tray.x);
            let max_y = (tray.y + tray.height - piece.height as f32).max(tray.y);
            let x = if max_x > tray.x {
                rng.random_range(tray.x..=max_x)
            } else {
                tray.x
            };
            let y = if max_y > tray.y {
                rng.random_range(tray.y..=max_y)
            } else {
                tray.y
            };
            piece.current = (x, y);
        }
        self.pieces.extend(locked);
        self.pieces.extend(movable);
    }
}

/// Area pieces are scattered into, in board units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TrayRect {
    pub fn below_image(board: &Board, height: f32) -> Self {
        Self {
            x: 0.0,
            y: board.image_height as f32 + TRAY_GAP,
            width: board.image_width as f32,
            height: height.max(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoardEvent {
    Picked { piece_id: usize, pointer_id: PointerId },
    Moved { piece_id: usize, x: f32, y: f32 },
    Dropped { piece_id: usize },
    Cancelled { piece_id: usize },
    PiecePlaced { piece_id: usize, placed: usize, total: usize },
    Completed,
    /// Input landed on a locked piece and was swallowed without effect.
    Consumed { piece_id: usize },
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    piece_id: usize,
    offset: (f32, f32),
}

/// Drag interpretation, snapping and completion over a [`Board`].
#[derive(Clone, Debug)]
pub struct PlacementEngine {
    board: Board,
    drags: HashMap<PointerId, Drag>,
    completion_reported: bool,
}

impl PlacementEngine {
    pub fn new(board: Board) -> Self {
        let completion_reported = board.is_complete();
        Self {
            board,
            drags: HashMap::new(),
            completion_reported,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Board without in-flight drags, for saving.
    pub fn snapshot_board(&self) -> Board {
        self.board.clone()
    }

    pub fn into_board(self) -> Board {
        self.board
    }

    pub fn is_complete(&self) -> bool {
        self.board.is_complete()
    }

    pub fn placed_count(&self) -> usize {
        self.board.placed_count()
    }

    pub fn total(&self) -> usize {
        self.board.total()
    }

    pub fn dragged_piece(&self, pointer_id: PointerId) -> Option<usize> {
        self.drags.get(&pointer_id).map(|drag| drag.piece_id)
    }

    pub fn scatter<R: Rng>(&mut self, tray: TrayRect, rng: &mut R) {
        self.drags.clear();
        self.board.scatter(tray, rng);
    }

    pub fn bring_movable_to_front(&mut self) {
        self.board.bring_movable_to_front();
    }

    pub fn handle(&mut self, event: PointerEvent) -> Vec<BoardEvent> {
        let (x, y) = event.board_position();
        match event.phase {
            PointerPhase::Down => self.pointer_down(event.pointer_id, x, y, event.piece),
            PointerPhase::Move => self.pointer_move(event.pointer_id, x, y),
            PointerPhase::Up => self.pointer_up(event.pointer_id, x, y),
            PointerPhase::Cancel => self.pointer_cancel(event.pointer_id),
        }
    }

    fn pointer_down(
        &mut self,
        pointer_id: PointerId,
        x: f32,
        y: f32,
        piece: Option<usize>,
    ) -> Vec<BoardEvent> {
        if self.drags.contains_key(&pointer_id) {
            return Vec::new();
        }
        let Some(piece_id) = piece.or_else(|| self.board.hit_test(x, y)) else {
            return Vec::new();
        };
        if self.drags.values().any(|drag| drag.piece_id == piece_id) {
            return Vec::new();
        }
        let Some(index) = self.board.index_of(piece_id) else {
            log::debug!("placement: pointer {} named unknown piece {}", pointer_id, piece_id);
            return Vec::new();
        };
        if self.board.pieces[index].locked {
            return vec![BoardEvent::Consumed { piece_id }];
        }
        let index = self.board.bring_to_front(index);
        let current = self.board.pieces[index].current;
        self.drags.insert(
            pointer_id,
            Drag {
                piece_id,
                offset: (x - current.0, y - current.1),
            },
        );
        vec![BoardEvent::Picked {
            piece_id,
            pointer_id,
        }]
    }

    fn apply_drag(&mut self, drag: Drag, x: f32, y: f32) -> Option<usize> {
        let index = self.board.index_of(drag.piece_id)?;
        let piece = &mut self.board.pieces[index];
        piece.current = (x - drag.offset.0, y - drag.offset.1);
        Some(index)
    }

    fn pointer_move(&mut self, pointer_id: PointerId, x: f32, y: f32) -> Vec<BoardEvent> {
        let Some(drag) = self.drags.get(&pointer_id).copied() else {
            return Vec::new();
        };
        let Some(index) = self.apply_drag(drag, x, y) else {
            self.drags.remove(&pointer_id);
            return Vec::new();
        };
        let (x, y) = self.board.pieces[index].current;
        vec![BoardEvent::Moved {
            piece_id: drag.piece_id,
            x,
            y,
        }]
    }

    fn pointer_up(&mut self, pointer_id: PointerId, x: f32, y: f32) -> Vec<BoardEvent> {
        let Some(drag) = self.drags.remove(&pointer_id) else {
            return Vec::new();
        };
        let Some(index) = self.apply_drag(drag, x, y) else {
            return Vec::new();
        };
        if !self.board.pieces[index].within_tolerance() {
            return vec![BoardEvent::Dropped {
                piece_id: drag.piece_id,
            }];
        }

        let piece = &mut self.board.pieces[index];
        piece.current = piece.target;
        piece.locked = true;
        self.board.send_to_back(index);
        let placed = self.board.placed_count();
        let total = self.board.total();
        log::debug!("placement: piece {} locked ({}/{})", drag.piece_id, placed, total);
        let mut events = vec![BoardEvent::PiecePlaced {
            piece_id: drag.piece_id,
            placed,
            total,
        }];
        if placed == total {
            self.board.complete = true;
            self.drags.clear();
            if !self.completion_reported {
                self.completion_reported = true;
                log::info!("placement: puzzle complete");
                events.push(BoardEvent::Completed);
            }
        }
        events
    }

    fn pointer_cancel(&mut self, pointer_id: PointerId) -> Vec<BoardEvent> {
        match self.drags.remove(&pointer_id) {
            Some(drag) => vec![BoardEvent::Cancelled {
                piece_id: drag.piece_id,
            }],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use kirinuki_core::action::ViewTransform;
    use kirinuki_core::curves::generate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn board_with(rows: u32, cols: u32, size: u32) -> Board {
        let boundary = Arc::new(
            generate(cols * size, rows * size, cols, rows, 1).expect("generate"),
        );
        let pixels = Arc::new(RgbaImage::from_pixel(size, size, Rgba([9, 9, 9, 255])));
        let pieces = (0..rows * cols)
            .map(|id| {
                let row = id / cols;
                let col = id % cols;
                let target = ((col * size) as f32, (row * size) as f32);
                Piece {
                    id: id as usize,
                    row,
                    col,
                    target,
                    current: (target.0 + 500.0, target.1 + 500.0),
                    width: size,
                    height: size,
                    pixels: pixels.clone(),
                    locked: false,
                }
            })
            .collect();
        Board::new(boundary, pieces).expect("board")
    }

    fn drag_to(engine: &mut PlacementEngine, piece_id: usize, x: f32, y: f32) -> Vec<BoardEvent> {
        let current = engine.board().piece(piece_id).expect("piece").current;
        let mut events = engine.handle(PointerEvent::down(1, current.0, current.1).on_piece(piece_id));
        events.extend(engine.handle(PointerEvent::moved(1, x, y)));
        events.extend(engine.handle(PointerEvent::up(1, x, y)));
        events
    }

    #[test]
    fn drop_within_tolerance_locks() {
        let mut engine = PlacementEngine::new(board_with(1, 2, 90));
        let events = drag_to(&mut engine, 0, 12.0, 0.0);
        assert!(events.contains(&BoardEvent::PiecePlaced {
            piece_id: 0,
            placed: 1,
            total: 2
        }));
        let piece = engine.board().piece(0).expect("piece");
        assert!(piece.locked);
        assert_eq!(piece.current, piece.target);
        assert_eq!(engine.board().z_order()[0], 0);
    }

    #[test]
    fn drop_outside_tolerance_stays_movable() {
        let mut engine = PlacementEngine::new(board_with(1, 2, 90));
        let events = drag_to(&mut engine, 0, 13.0, 13.0);
        assert_eq!(events.last(), Some(&BoardEvent::Dropped { piece_id: 0 }));
        let piece = engine.board().piece(0).expect("piece");
        assert!(!piece.locked);
        assert_eq!(piece.current, (13.0, 13.0));
    }

    #[test]
    fn offset_is_relative_to_the_grab_point() {
        let mut engine = PlacementEngine::new(board_with(1, 1, 50));
        engine.handle(PointerEvent::down(3, 510.0, 520.0));
        let events = engine.handle(PointerEvent::moved(3, 610.0, 620.0));
        assert_eq!(
            events,
            vec![BoardEvent::Moved {
                piece_id: 0,
                x: 600.0,
                y: 600.0
            }]
        );
    }

    #[test]
    fn view_transform_maps_screen_to_board() {
        let mut engine = PlacementEngine::new(board_with(1, 1, 50));
        let view = ViewTransform::new(2.0, 100.0, 0.0);
        engine.handle(PointerEvent::down(1, 1100.0, 1000.0).with_view(view));
        assert_eq!(engine.dragged_piece(1), Some(0));
        let events = engine.handle(PointerEvent::moved(1, 1120.0, 1000.0).with_view(view));
        assert_eq!(
            events,
            vec![BoardEvent::Moved {
                piece_id: 0,
                x: 510.0,
                y: 500.0
            }]
        );
    }

    #[test]
    fn completion_fires_exactly_once() {
        let mut engine = PlacementEngine::new(board_with(2, 2, 40));
        let mut completed = 0;
        for id in 0..4 {
            let target = engine.board().piece(id).expect("piece").target;
            let events = drag_to(&mut engine, id, target.0 + 1.0, target.1 - 1.0);
            completed += events
                .iter()
                .filter(|event| **event == BoardEvent::Completed)
                .count();
        }
        assert_eq!(completed, 1);
        assert!(engine.is_complete());
        for id in 0..4 {
            assert_eq!(
                drag_to(&mut engine, id, 0.0, 0.0),
                vec![BoardEvent::Consumed { piece_id: id }]
            );
        }
    }

    #[test]
    fn locked_pieces_consume_pointers() {
        let mut engine = PlacementEngine::new(board_with(1, 2, 90));
        drag_to(&mut engine, 1, 90.0, 0.0);
        let order = engine.board().z_order();

        let events = engine.handle(PointerEvent::down(2, 100.0, 10.0).on_piece(1));
        assert_eq!(events, vec![BoardEvent::Consumed { piece_id: 1 }]);
        assert_eq!(engine.dragged_piece(2), None);
        assert!(engine.handle(PointerEvent::moved(2, 300.0, 300.0)).is_empty());
        assert!(engine.handle(PointerEvent::up(2, 300.0, 300.0)).is_empty());

        let piece = engine.board().piece(1).expect("piece");
        assert!(piece.locked);
        assert_eq!(piece.current, piece.target);
        assert_eq!(engine.board().z_order(), order);

        // Hit-tested presses on a locked piece are consumed the same way.
        let events = engine.handle(PointerEvent::down(3, 100.0, 10.0));
        assert_eq!(events, vec![BoardEvent::Consumed { piece_id: 1 }]);
    }

    #[test]
    fn unhandled_presses_report_nothing() {
        let mut engine = PlacementEngine::new(board_with(1, 2, 90));
        assert!(engine.handle(PointerEvent::down(1, -50.0, -50.0)).is_empty());
        assert!(engine
            .handle(PointerEvent::down(1, 0.0, 0.0).on_piece(99))
            .is_empty());
    }

    #[test]
    fn a_piece_has_one_owner() {
        let mut engine = PlacementEngine::new(board_with(1, 2, 90));
        assert!(!engine
            .handle(PointerEvent::down(1, 0.0, 0.0).on_piece(0))
            .is_empty());
        assert!(engine
            .handle(PointerEvent::down(2, 0.0, 0.0).on_piece(0))
            .is_empty());
        assert!(engine
            .handle(PointerEvent::down(1, 0.0, 0.0).on_piece(1))
            .is_empty());
        assert!(!engine
            .handle(PointerEvent::down(2, 0.0, 0.0).on_piece(1))
            .is_empty());
    }

    #[test]
    fn cancel_releases_without_snapping() {
        let mut engine = PlacementEngine::new(board_with(1, 1, 90));
        engine.handle(PointerEvent::down(1, 500.0, 500.0).on_piece(0));
        engine.handle(PointerEvent::moved(1, 1.0, 1.0));
        let events = engine.handle(PointerEvent::cancel(1));
        assert_eq!(events, vec![BoardEvent::Cancelled { piece_id: 0 }]);
        assert!(!engine.board().piece(0).expect("piece").locked);
        assert!(engine.handle(PointerEvent::up(1, 1.0, 1.0)).is_empty());
    }

    #[test]
    fn pointer_down_raises_and_hit_test_prefers_top() {
        let mut board = board_with(1, 3, 30);
        for piece in &mut board.pieces {
            piece.current = (0.0, 0.0);
        }
        let mut engine = PlacementEngine::new(board);
        assert_eq!(engine.board().hit_test(5.0, 5.0), Some(2));
        engine.handle(PointerEvent::down(1, 5.0, 5.0).on_piece(0));
        assert_eq!(engine.board().z_order(), vec![1, 2, 0]);
        assert_eq!(engine.board().hit_test(5.0, 5.0), Some(0));
        assert_eq!(engine.board().hit_test(500.0, 5.0), None);
    }

    #[test]
    fn empty_and_mismatched_boards_are_rejected() {
        let boundary = Arc::new(generate(90, 90, 3, 3, 1).expect("generate"));
        assert_eq!(
            Board::new(boundary.clone(), Vec::new()).unwrap_err(),
            PlacementError::EmptyBoard
        );
        let board = board_with(1, 2, 30);
        let pieces = board.pieces().to_vec();
        assert!(matches!(
            Board::new(boundary, pieces),
            Err(PlacementError::PieceCount { .. })
        ));
    }

    #[test]
    fn scatter_is_seeded_and_stays_in_tray() {
        let mut first = board_with(2, 3, 20);
        let mut second = board_with(2, 3, 20);
        let tray = TrayRect::below_image(&first, 200.0);
        first.scatter(tray, &mut StdRng::seed_from_u64(5));
        second.scatter(tray, &mut StdRng::seed_from_u64(5));
        assert_eq!(first.z_order(), second.z_order());
        for piece in first.pieces() {
            assert!(piece.current.0 >= tray.x);
            assert!(piece.current.0 + piece.width as f32 <= tray.x + tray.width);
            assert!(piece.current.1 >= tray.y);
            assert!(piece.current.1 + piece.height as f32 <= tray.y + tray.height);
        }
    }

    #[test]
    fn movable_pieces_rise_above_locked_ones() {
        let mut engine = PlacementEngine::new(board_with(1, 3, 30));
        drag_to(&mut engine, 1, 30.0, 0.0);
        engine.handle(PointerEvent::down(1, 0.0, 0.0).on_piece(2));
        engine.handle(PointerEvent::cancel(1));
        engine.bring_movable_to_front();
        let order = engine.board().z_order();
        assert_eq!(order[0], 1);
        assert_eq!(engine.placed_count(), 1);
        assert_eq!(engine.total(), 3);
    }
}
