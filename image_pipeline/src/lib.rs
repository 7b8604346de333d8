use std::io::Cursor;
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, RgbaImage};

pub mod backdrop;
pub mod cutter;

pub use backdrop::{render_backdrop, BackdropSettings};
pub use cutter::{
    cut, CancelToken, CutError, CutProgress, CutSettings, MaskRasterizer, Piece, PieceCutter,
    SkiaRasterizer,
};

pub const IMAGE_MAX_DIMENSION_DEFAULT: u32 = 2048;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("invalid image dimensions")]
    Dimensions,
    #[error("image io failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Longest side after decoding; larger sources are downscaled first.
    pub max_dim: Option<u32>,
    /// Board size the picture is cropped and scaled to.
    pub viewport: Option<(u32, u32)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dim: Some(IMAGE_MAX_DIMENSION_DEFAULT),
            viewport: None,
        }
    }
}

pub struct ImagePipeline {
    config: PipelineConfig,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Decodes, uprights and sizes a picture for cutting.
    pub fn process(&self, bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
        let rgba = load_image(bytes)?;
        let rgba = resize_to_max_dim(rgba, self.config.max_dim);
        let rgba = match self.config.viewport {
            Some((width, height)) => fit_to_viewport(&rgba, width, height)?,
            None => rgba,
        };
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Dimensions);
        }
        log::debug!("pipeline: prepared {}x{} image", width, height);
        Ok(rgba)
    }

    pub fn process_file(&self, path: &Path) -> Result<RgbaImage, PipelineError> {
        let bytes = std::fs::read(path)?;
        self.process(&bytes)
    }
}

/// Decodes PNG or JPEG bytes into RGBA8 with the EXIF orientation applied.
pub fn load_image(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    let image =
        image::load_from_memory(bytes).map_err(|err| PipelineError::Decode(err.to_string()))?;
    let rgba = image.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(PipelineError::Dimensions);
    }
    let orientation = extract_exif(bytes).and_then(|exif| parse_exif_orientation(&exif));
    if let Some(orientation) = orientation {
        log::debug!("pipeline: applying exif orientation {}", orientation);
    }
    Ok(apply_exif_orientation(rgba, orientation))
}

pub fn load_image_file(path: &Path) -> Result<RgbaImage, PipelineError> {
    let bytes = std::fs::read(path)?;
    load_image(&bytes)
}

/// Center-crops to the target aspect ratio, then scales to exactly `width` x `height`.
pub fn fit_to_viewport(
    image: &RgbaImage,
    width: u32,
    height: u32,
) -> Result<RgbaImage, PipelineError> {
    let (src_w, src_h) = image.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return Err(PipelineError::Dimensions);
    }
    let target_ratio = width as f64 / height as f64;
    let src_ratio = src_w as f64 / src_h as f64;
    let (crop_w, crop_h) = if src_ratio > target_ratio {
        let crop_w = ((src_h as f64) * target_ratio).round().max(1.0) as u32;
        (crop_w.min(src_w), src_h)
    } else {
        let crop_h = ((src_w as f64) / target_ratio).round().max(1.0) as u32;
        (src_w, crop_h.min(src_h))
    };
    let x = (src_w - crop_w) / 2;
    let y = (src_h - crop_h) / 2;
    let cropped = image::imageops::crop_imm(image, x, y, crop_w, crop_h).to_image();
    if crop_w == width && crop_h == height {
        return Ok(cropped);
    }
    Ok(image::imageops::resize(
        &cropped,
        width,
        height,
        FilterType::Triangle,
    ))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|err| PipelineError::Encode(err.to_string()))?;
    Ok(out)
}

pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|err| PipelineError::Decode(err.to_string()))?;
    Ok(image.to_rgba8())
}

fn resize_to_max_dim(rgba: RgbaImage, max_dim: Option<u32>) -> RgbaImage {
    let Some(max_dim) = max_dim else {
        return rgba;
    };
    if max_dim == 0 {
        return rgba;
    }
    let (width, height) = rgba.dimensions();
    let max_axis = width.max(height);
    if max_axis <= max_dim {
        return rgba;
    }
    let scale = max_dim as f32 / max_axis as f32;
    let next_width = ((width as f32) * scale).round().max(1.0) as u32;
    let next_height = ((height as f32) * scale).round().max(1.0) as u32;
    image::imageops::resize(&rgba, next_width, next_height, FilterType::Lanczos3)
}

/// Returns the APP1 EXIF payload of a JPEG, if any.
pub fn extract_exif(bytes: &[u8]) -> Option<Vec<u8>> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut offset = 2;
    while offset + 4 <= bytes.len() {
        if bytes[offset] != 0xFF {
            return None;
        }
        let marker = bytes[offset + 1];
        if marker == 0xD8 || (0xD0..=0xD7).contains(&marker) {
            offset += 2;
            continue;
        }
        // Start of scan: no metadata segments follow.
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
        if len < 2 {
            return None;
        }
        let payload = bytes.get(offset + 4..offset + 2 + len)?;
        if marker == 0xE1 && payload.starts_with(b"Exif\0\0") {
            return Some(payload.to_vec());
        }
        offset += 2 + len;
    }
    None
}

#[derive(Clone, Copy)]
enum ExifEndian {
    Little,
    Big,
}

pub fn parse_exif_orientation(exif: &[u8]) -> Option<u16> {
    let data = if exif.starts_with(b"Exif\0\0") {
        exif.get(6..)?
    } else {
        exif
    };
    if data.len() < 8 {
        return None;
    }
    let endian = match &data[..2] {
        b"II" => ExifEndian::Little,
        b"MM" => ExifEndian::Big,
        _ => return None,
    };
    if read_exif_u16(data, 2, endian)? != 42 {
        return None;
    }
    let ifd_offset = read_exif_u32(data, 4, endian)? as usize;
    let entries = read_exif_u16(data, ifd_offset, endian)? as usize;
    let mut entry_offset = ifd_offset + 2;
    for _ in 0..entries {
        let tag = read_exif_u16(data, entry_offset, endian)?;
        if tag == 0x0112 {
            let field_type = read_exif_u16(data, entry_offset + 2, endian)?;
            let count = read_exif_u32(data, entry_offset + 4, endian)?;
            if field_type != 3 || count < 1 {
                return None;
            }
            let value = read_exif_u16(data, entry_offset + 8, endian)?;
            return (1..=8).contains(&value).then_some(value);
        }
        entry_offset += 12;
    }
    None
}

fn read_exif_u16(data: &[u8], offset: usize, endian: ExifEndian) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(match endian {
        ExifEndian::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        ExifEndian::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
    })
}

fn read_exif_u32(data: &[u8], offset: usize, endian: ExifEndian) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(match endian {
        ExifEndian::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ExifEndian::Big => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    })
}

pub fn apply_exif_orientation<P>(
    image: ImageBuffer<P, Vec<P::Subpixel>>,
    orientation: Option<u16>,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: image::Pixel + 'static,
    P::Subpixel: 'static,
{
    match orientation {
        Some(2) => image::imageops::flip_horizontal(&image),
        Some(3) => image::imageops::rotate180(&image),
        Some(4) => image::imageops::flip_vertical(&image),
        Some(5) => {
            let flipped = image::imageops::flip_horizontal(&image);
            image::imageops::rotate270(&flipped)
        }
        Some(6) => image::imageops::rotate90(&image),
        Some(7) => {
            let flipped = image::imageops::flip_horizontal(&image);
            image::imageops::rotate90(&flipped)
        }
        Some(8) => image::imageops::rotate270(&image),
        _ => image,
    }
}

/// Reads the pixel size from the header without decoding.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), PipelineError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| PipelineError::Decode(err.to_string()))?
        .into_dimensions()
        .map_err(|err| PipelineError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn exif_block(orientation: u16, little: bool) -> Vec<u8> {
        let mut out = b"Exif\0\0".to_vec();
        let u16b = |v: u16| if little { v.to_le_bytes() } else { v.to_be_bytes() };
        let u32b = |v: u32| if little { v.to_le_bytes() } else { v.to_be_bytes() };
        out.extend_from_slice(if little { b"II" } else { b"MM" });
        out.extend_from_slice(&u16b(42));
        out.extend_from_slice(&u32b(8));
        out.extend_from_slice(&u16b(1));
        out.extend_from_slice(&u16b(0x0112));
        out.extend_from_slice(&u16b(3));
        out.extend_from_slice(&u32b(1));
        out.extend_from_slice(&u16b(orientation));
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&u32b(0));
        out
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 128, 255]))
    }

    #[test]
    fn parses_orientation_in_both_byte_orders() {
        assert_eq!(parse_exif_orientation(&exif_block(6, true)), Some(6));
        assert_eq!(parse_exif_orientation(&exif_block(8, false)), Some(8));
        assert_eq!(parse_exif_orientation(&exif_block(0, true)), None);
        assert_eq!(parse_exif_orientation(b"Exif\0\0garbage"), None);
    }

    #[test]
    fn finds_exif_segment_in_jpeg_headers() {
        let exif = exif_block(3, true);
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        jpeg.extend_from_slice(&exif);
        jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        assert_eq!(extract_exif(&jpeg), Some(exif));
        assert_eq!(extract_exif(b"\x89PNG\r\n\x1a\n"), None);
    }

    #[test]
    fn orientation_six_rotates_clockwise() {
        let image = gradient(4, 2);
        let rotated = apply_exif_orientation(image.clone(), Some(6));
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(rotated.get_pixel(1, 0), image.get_pixel(0, 0));
    }

    #[test]
    fn fit_crops_to_aspect_then_scales() {
        let wide = gradient(200, 100);
        let fitted = fit_to_viewport(&wide, 50, 50).expect("fit");
        assert_eq!(fitted.dimensions(), (50, 50));
        let same = fit_to_viewport(&wide, 100, 50).expect("fit");
        assert_eq!(same.dimensions(), (100, 50));
        let tall = fit_to_viewport(&wide, 30, 60).expect("fit");
        assert_eq!(tall.dimensions(), (30, 60));
        assert!(matches!(
            fit_to_viewport(&wide, 0, 60),
            Err(PipelineError::Dimensions)
        ));
    }

    #[test]
    fn exact_aspect_crop_keeps_center_pixels() {
        let wide = gradient(200, 100);
        let fitted = fit_to_viewport(&wide, 100, 100).expect("fit");
        assert_eq!(fitted.get_pixel(0, 0), wide.get_pixel(50, 0));
    }

    #[test]
    fn decodes_png_bytes() {
        let image = gradient(7, 5);
        let bytes = encode_png(&image).expect("encode");
        assert_eq!(image_dimensions(&bytes).expect("dims"), (7, 5));
        let loaded = load_image(&bytes).expect("load");
        assert_eq!(loaded, image);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            load_image(b"definitely not an image"),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn pipeline_limits_size() {
        let bytes = encode_png(&gradient(120, 60)).expect("encode");
        let pipeline = ImagePipeline::new(PipelineConfig {
            max_dim: Some(60),
            viewport: None,
        });
        assert_eq!(pipeline.process(&bytes).expect("process").dimensions(), (60, 30));
        let pipeline = ImagePipeline::new(PipelineConfig {
            max_dim: None,
            viewport: Some((40, 40)),
        });
        assert_eq!(pipeline.process(&bytes).expect("process").dimensions(), (40, 40));
    }
}
