use rkyv::{Archive, Deserialize, Serialize};

use crate::curves::{BoundaryDescriptor, ShapeSettings};

pub const SESSION_SNAPSHOT_VERSION: u32 = 1;

/// Where the puzzle picture came from. Bundled assets are referenced by name;
/// captured pictures are copied next to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ImageRef {
    Asset { name: String },
    Captured { file: String },
}

impl ImageRef {
    /// Identifier reported to the gallery when the puzzle is solved.
    pub fn id(&self) -> &str {
        match self {
            ImageRef::Asset { name } => name,
            ImageRef::Captured { file } => file,
        }
    }
}

pub fn validate_image_ref(image_ref: &ImageRef) -> Result<(), String> {
    match image_ref {
        ImageRef::Asset { name } => {
            if name.trim().is_empty() {
                return Err("missing asset name".to_string());
            }
            Ok(())
        }
        ImageRef::Captured { file } => {
            if file.trim().is_empty() {
                return Err("missing captured image file".to_string());
            }
            if file.contains('/') || file.contains('\\') || file.contains("..") {
                return Err(format!("captured image file escapes snapshot dir: {file}"));
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PieceRecord {
    pub id: u32,
    pub row: u32,
    pub col: u32,
    pub target: (f32, f32),
    pub current: (f32, f32),
    pub width: u32,
    pub height: u32,
    pub locked: bool,
    /// Raster file name inside the snapshot directory.
    pub raster: String,
    /// SHA-256 of the raster file bytes.
    pub digest: [u8; 32],
}

/// Manifest of a suspended puzzle. Pieces are listed bottom to top.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SessionManifest {
    pub version: u32,
    pub image_ref: ImageRef,
    /// SHA-256 of the copied source picture, for captured images.
    pub source_digest: Option<[u8; 32]>,
    pub image_width: u32,
    pub image_height: u32,
    pub rows: u32,
    pub cols: u32,
    pub seed: u32,
    pub shape: ShapeSettings,
    /// Absent in older saves; regenerated from the grid and seed.
    pub boundary: Option<BoundaryDescriptor>,
    pub elapsed_seconds: u64,
    pub pieces: Vec<PieceRecord>,
}
