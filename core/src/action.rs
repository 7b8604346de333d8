pub type PointerId = i32;

/// Screen to board mapping: `board = (screen - pan) / scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    pub pan_x: f32,
    pub pan_y: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

impl ViewTransform {
    pub fn new(scale: f32, pan_x: f32, pan_y: f32) -> Self {
        Self {
            scale,
            pan_x,
            pan_y,
        }
    }

    fn safe_scale(&self) -> f32 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            1.0
        }
    }

    pub fn to_board(&self, x: f32, y: f32) -> (f32, f32) {
        let scale = self.safe_scale();
        ((x - self.pan_x) / scale, (y - self.pan_y) / scale)
    }

    pub fn to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        let scale = self.safe_scale();
        (x * scale + self.pan_x, y * scale + self.pan_y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

/// One pointer sample in screen coordinates. `piece` names the target directly
/// when the front end already hit-tested it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub pointer_id: PointerId,
    pub x: f32,
    pub y: f32,
    pub piece: Option<usize>,
    pub view: ViewTransform,
}

impl PointerEvent {
    pub fn down(pointer_id: PointerId, x: f32, y: f32) -> Self {
        Self::new(PointerPhase::Down, pointer_id, x, y)
    }

    pub fn moved(pointer_id: PointerId, x: f32, y: f32) -> Self {
        Self::new(PointerPhase::Move, pointer_id, x, y)
    }

    pub fn up(pointer_id: PointerId, x: f32, y: f32) -> Self {
        Self::new(PointerPhase::Up, pointer_id, x, y)
    }

    pub fn cancel(pointer_id: PointerId) -> Self {
        Self::new(PointerPhase::Cancel, pointer_id, 0.0, 0.0)
    }

    fn new(phase: PointerPhase, pointer_id: PointerId, x: f32, y: f32) -> Self {
        Self {
            phase,
            pointer_id,
            x,
            y,
            piece: None,
            view: ViewTransform::default(),
        }
    }

    pub fn on_piece(mut self, piece: usize) -> Self {
        self.piece = Some(piece);
        self
    }

    pub fn with_view(mut self, view: ViewTransform) -> Self {
        self.view = view;
        self
    }

    pub fn board_position(&self) -> (f32, f32) {
        self.view.to_board(self.x, self.y)
    }
}
