use image::{Rgba, RgbaImage};
use kirinuki_core::curves::{BoundaryDescriptor, PathCommand};
use serde::{Deserialize, Serialize};

use crate::cutter::build_path;
use crate::PipelineError;

pub const BACKDROP_IMAGE_ALPHA: u8 = 70;
pub const BACKDROP_GRID_WIDTH: f32 = 1.0;

/// What the faint board behind the pieces shows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackdropSettings {
    pub show_image: bool,
    pub show_grid: bool,
    pub image_alpha: u8,
    pub grid_width: f32,
}

impl Default for BackdropSettings {
    fn default() -> Self {
        Self {
            show_image: true,
            show_grid: true,
            image_alpha: BACKDROP_IMAGE_ALPHA,
            grid_width: BACKDROP_GRID_WIDTH,
        }
    }
}

pub fn render_backdrop(
    image: &RgbaImage,
    boundary: &BoundaryDescriptor,
    settings: &BackdropSettings,
) -> Result<RgbaImage, PipelineError> {
    let (width, height) = image.dimensions();
    if width != boundary.width || height != boundary.height {
        return Err(PipelineError::Dimensions);
    }
    let mut canvas = tiny_skia::Pixmap::new(width, height).ok_or(PipelineError::Dimensions)?;

    if settings.show_image && settings.image_alpha > 0 {
        let mut source = tiny_skia::Pixmap::new(width, height).ok_or(PipelineError::Dimensions)?;
        for (dst, src) in source.pixels_mut().iter_mut().zip(image.pixels()) {
            let [r, g, b, a] = src.0;
            *dst = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
        }
        let paint = tiny_skia::PixmapPaint {
            opacity: settings.image_alpha as f32 / 255.0,
            ..tiny_skia::PixmapPaint::default()
        };
        canvas.draw_pixmap(
            0,
            0,
            source.as_ref(),
            &paint,
            tiny_skia::Transform::identity(),
            None,
        );
    }

    if settings.show_grid {
        let mut paint = tiny_skia::Paint::default();
        paint.set_color_rgba8(0, 0, 0, 255);
        paint.anti_alias = true;
        let stroke = tiny_skia::Stroke {
            width: settings.grid_width.max(0.1),
            ..tiny_skia::Stroke::default()
        };
        for edge in boundary.internal_edges() {
            let commands: Vec<PathCommand> = edge.to_path_commands();
            if let Some(path) = build_path(&commands) {
                canvas.stroke_path(
                    &path,
                    &paint,
                    &stroke,
                    tiny_skia::Transform::identity(),
                    None,
                );
            }
        }
    }

    let mut out = RgbaImage::new(width, height);
    for (dst, src) in out.pixels_mut().zip(canvas.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    Ok(out)
}
