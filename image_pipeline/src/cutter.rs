use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use kirinuki_core::curves::{BoundaryDescriptor, CurveError, PathCommand};
use kirinuki_core::game::{piece_id, snap_tolerance};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum alpha for a pixel to count as part of a piece when hit-testing.
pub const HIT_ALPHA_THRESHOLD: u8 = 128;

#[derive(Debug, Error)]
pub enum CutError {
    #[error("grid must have at least one row and one column")]
    EmptyGrid,
    #[error("requested {rows}x{cols} grid does not match the {boundary_rows}x{boundary_cols} boundary")]
    GridMismatch {
        rows: u32,
        cols: u32,
        boundary_rows: u32,
        boundary_cols: u32,
    },
    #[error("image is {image_width}x{image_height} but the boundary was built for {width}x{height}")]
    Dimensions {
        image_width: u32,
        image_height: u32,
        width: u32,
        height: u32,
    },
    #[error("cut cancelled")]
    Cancelled,
    #[error("mask rasterization failed: {0}")]
    Rasterize(String),
    #[error(transparent)]
    Boundary(#[from] CurveError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutSettings {
    pub anti_alias: bool,
}

impl Default for CutSettings {
    fn default() -> Self {
        Self { anti_alias: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CutProgress {
    pub done: usize,
    pub total: usize,
}

/// Shared cancellation flag, checked before each piece.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A cut piece. Positions are the top-left corner of the raster in board units.
#[derive(Clone, Debug)]
pub struct Piece {
    pub id: usize,
    pub row: u32,
    pub col: u32,
    pub target: (f32, f32),
    pub current: (f32, f32),
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<RgbaImage>,
    pub locked: bool,
}

impl Piece {
    pub fn snap_tolerance(&self) -> f32 {
        snap_tolerance(self.width as f32, self.height as f32)
    }

    pub fn within_tolerance(&self) -> bool {
        let tolerance = self.snap_tolerance();
        (self.current.0 - self.target.0).abs() <= tolerance
            && (self.current.1 - self.target.1).abs() <= tolerance
    }

    /// Alpha of the raster under a board position, 0 outside the box.
    pub fn alpha_at(&self, x: f32, y: f32) -> u8 {
        let local_x = x - self.current.0;
        let local_y = y - self.current.1;
        if local_x < 0.0 || local_y < 0.0 {
            return 0;
        }
        let (px, py) = (local_x as u32, local_y as u32);
        if px >= self.pixels.width() || py >= self.pixels.height() {
            return 0;
        }
        self.pixels.get_pixel(px, py)[3]
    }

    pub fn hit(&self, x: f32, y: f32) -> bool {
        self.alpha_at(x, y) >= HIT_ALPHA_THRESHOLD
    }
}

/// Fills a closed path into an 8-bit coverage mask of `width * height` bytes.
/// `origin` is the image position of the mask's top-left pixel.
pub trait MaskRasterizer: Send + Sync {
    fn fill_mask(
        &self,
        path: &[PathCommand],
        width: u32,
        height: u32,
        origin: (f32, f32),
    ) -> Result<Vec<u8>, CutError>;
}

#[derive(Clone, Debug)]
pub struct SkiaRasterizer {
    anti_alias: bool,
}

impl SkiaRasterizer {
    pub fn new(anti_alias: bool) -> Self {
        Self { anti_alias }
    }
}

impl Default for SkiaRasterizer {
    fn default() -> Self {
        Self::new(CutSettings::default().anti_alias)
    }
}

pub(crate) fn build_path(commands: &[PathCommand]) -> Option<tiny_skia::Path> {
    let mut builder = tiny_skia::PathBuilder::new();
    for command in commands {
        match *command {
            PathCommand::MoveTo { x, y } => builder.move_to(x, y),
            PathCommand::LineTo { x, y } => builder.line_to(x, y),
            PathCommand::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => builder.cubic_to(x1, y1, x2, y2, x, y),
            PathCommand::Close => builder.close(),
        }
    }
    builder.finish()
}

impl MaskRasterizer for SkiaRasterizer {
    fn fill_mask(
        &self,
        path: &[PathCommand],
        width: u32,
        height: u32,
        origin: (f32, f32),
    ) -> Result<Vec<u8>, CutError> {
        let path = build_path(path).ok_or_else(|| CutError::Rasterize("empty path".into()))?;
        let mut mask = tiny_skia::Mask::new(width, height)
            .ok_or_else(|| CutError::Rasterize(format!("invalid mask size {width}x{height}")))?;
        mask.fill_path(
            &path,
            tiny_skia::FillRule::Winding,
            self.anti_alias,
            tiny_skia::Transform::from_translate(-origin.0, -origin.1),
        );
        Ok(mask.data().to_vec())
    }
}

pub struct PieceCutter<R = SkiaRasterizer> {
    rasterizer: R,
}

impl PieceCutter<SkiaRasterizer> {
    pub fn new(settings: &CutSettings) -> Self {
        Self::with_rasterizer(SkiaRasterizer::new(settings.anti_alias))
    }
}

impl<R: MaskRasterizer> PieceCutter<R> {
    pub fn with_rasterizer(rasterizer: R) -> Self {
        Self { rasterizer }
    }

    /// Cuts one raster per cell in row-major order. `progress` fires after each
    /// piece; the cancel token is checked before each piece starts.
    pub fn cut<F>(
        &self,
        image: &RgbaImage,
        rows: u32,
        cols: u32,
        boundary: &BoundaryDescriptor,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<Vec<Piece>, CutError>
    where
        F: FnMut(CutProgress),
    {
        if rows == 0 || cols == 0 {
            return Err(CutError::EmptyGrid);
        }
        if rows != boundary.rows || cols != boundary.cols {
            return Err(CutError::GridMismatch {
                rows,
                cols,
                boundary_rows: boundary.rows,
                boundary_cols: boundary.cols,
            });
        }
        let (image_width, image_height) = image.dimensions();
        if image_width != boundary.width || image_height != boundary.height {
            return Err(CutError::Dimensions {
                image_width,
                image_height,
                width: boundary.width,
                height: boundary.height,
            });
        }
        boundary.validate()?;
        let layout = boundary.layout()?;

        let total = layout.cell_count();
        let mut pieces = Vec::with_capacity(total);
        for cell in layout.cells() {
            if cancel.is_cancelled() {
                log::info!("cutter: cancelled after {}/{} pieces", pieces.len(), total);
                return Err(CutError::Cancelled);
            }
            let (box_x, box_y) = (cell.box_x(), cell.box_y());
            let (width, height) = (cell.box_width(), cell.box_height());
            let path = boundary.cell_path(cell.row, cell.col)?;
            let mask =
                self.rasterizer
                    .fill_mask(&path, width, height, (box_x as f32, box_y as f32))?;
            if mask.len() != (width as usize) * (height as usize) {
                return Err(CutError::Rasterize(format!(
                    "mask has {} bytes for a {}x{} piece",
                    mask.len(),
                    width,
                    height
                )));
            }
            let mut pixels = image::imageops::crop_imm(image, box_x, box_y, width, height).to_image();
            for (pixel, coverage) in pixels.pixels_mut().zip(mask.iter().copied()) {
                let alpha = (pixel[3] as u16 * coverage as u16 + 127) / 255;
                if alpha == 0 {
                    pixel.0 = [0, 0, 0, 0];
                } else {
                    pixel[3] = alpha as u8;
                }
            }
            let target = (box_x as f32, box_y as f32);
            pieces.push(Piece {
                id: piece_id(cell.row, cell.col, cols),
                row: cell.row,
                col: cell.col,
                target,
                current: target,
                width,
                height,
                pixels: Arc::new(pixels),
                locked: false,
            });
            progress(CutProgress {
                done: pieces.len(),
                total,
            });
        }
        log::debug!(
            "cutter: cut {} pieces from {}x{} image",
            total,
            image_width,
            image_height
        );
        Ok(pieces)
    }
}

/// Cuts with the default tiny-skia rasterizer.
pub fn cut<F>(
    image: &RgbaImage,
    rows: u32,
    cols: u32,
    boundary: &BoundaryDescriptor,
    settings: &CutSettings,
    cancel: &CancelToken,
    progress: F,
) -> Result<Vec<Piece>, CutError>
where
    F: FnMut(CutProgress),
{
    PieceCutter::new(settings).cut(image, rows, cols, boundary, cancel, progress)
}
