pub mod action;
pub mod codec;
pub mod curves;
pub mod game;
pub mod grid;
pub mod snapshot;

pub use action::{PointerEvent, PointerId, PointerPhase, ViewTransform};
pub use codec::{decode, decode_framed, encode, encode_framed, CodecError};
pub use curves::{
    generate, generate_with, BoundaryDescriptor, CurveError, EdgeTrace, PathCommand, Point,
    Segment, ShapeSettings,
};
pub use grid::{
    difficulty_choices, CellRect, Difficulty, GridError, GridLayout, GridParseError,
    DEFAULT_DIFFICULTY,
};
pub use snapshot::{
    validate_image_ref, ImageRef, PieceRecord, SessionManifest, SESSION_SNAPSHOT_VERSION,
};
