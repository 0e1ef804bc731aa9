use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pawtoon_contracts::{MediaType, PipelineError, SourceImage};

/// Reads an image file, trusting magic bytes over the file extension.
pub fn load_source_image(path: &Path) -> Result<SourceImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        return Err(PipelineError::malformed_encoding(format!(
            "{} is empty",
            path.display()
        ))
        .into());
    }
    let sniffed = image::guess_format(&bytes)
        .ok()
        .and_then(media_type_for_format);
    let Some(media_type) = sniffed.or_else(|| MediaType::from_path(path)) else {
        return Err(PipelineError::malformed_encoding(format!(
            "Unsupported image file {} (expected JPEG, PNG or WebP).",
            path.display()
        ))
        .into());
    };
    Ok(SourceImage::from_bytes(&bytes, media_type))
}

/// Built-in placeholder used when no photo is supplied.
pub fn default_source_image() -> Result<SourceImage> {
    let size = 128u32;
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([236, 228, 214, 255]));
    let fur = Rgba([176, 118, 64, 255]);
    let ear = Rgba([120, 78, 40, 255]);
    let eye = Rgba([32, 24, 20, 255]);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let (x, y) = (x as i32, y as i32);
        let inside = |cx: i32, cy: i32, r: i32| (x - cx).pow(2) + (y - cy).pow(2) <= r * r;
        if inside(48, 60, 6) || inside(80, 60, 6) {
            *pixel = eye;
        } else if inside(64, 72, 36) {
            *pixel = fur;
        } else if inside(36, 36, 14) || inside(92, 36, 14) {
            *pixel = ear;
        }
    }
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode default image")?;
    Ok(SourceImage::from_bytes(out.get_ref(), MediaType::Png))
}

fn media_type_for_format(format: ImageFormat) -> Option<MediaType> {
    match format {
        ImageFormat::Jpeg => Some(MediaType::Jpeg),
        ImageFormat::Png => Some(MediaType::Png),
        ImageFormat::WebP => Some(MediaType::Webp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pawtoon_contracts::{MediaType, PipelineError, PipelineErrorKind};

    use super::{default_source_image, load_source_image};

    #[test]
    fn magic_bytes_beat_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pet.jpg");
        fs::write(&path, default_source_image()?.to_bytes()?)?;
        let loaded = load_source_image(&path)?;
        assert_eq!(loaded.media_type(), MediaType::Png);
        Ok(())
    }

    #[test]
    fn extension_is_fallback_for_unknown_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pet.webp");
        fs::write(&path, b"opaque bytes")?;
        assert_eq!(load_source_image(&path)?.media_type(), MediaType::Webp);
        Ok(())
    }

    #[test]
    fn unsupported_file_is_malformed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"hello")?;
        let err = load_source_image(&path).unwrap_err();
        assert_eq!(PipelineError::from_anyhow(&err).kind, PipelineErrorKind::MalformedEncoding);
        Ok(())
    }

    #[test]
    fn default_image_decodes() -> anyhow::Result<()> {
        let image = default_source_image()?;
        let decoded = image::load_from_memory(&image.to_bytes()?)?;
        assert_eq!((decoded.width(), decoded.height()), (128, 128));
        Ok(())
    }
}
