//! Offline stand-ins for the vendor clients. Output depends only on input.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pawtoon_contracts::{MediaType, PipelineError, SourceImage};
use sha2::{Digest, Sha256};

use super::{AnalysisClient, BackgroundRemovalClient, GenerationClient};

/// A prompt containing this marker makes the dryrun image client refuse.
pub const REFUSE_MARKER: &str = "[[refuse]]";

const DRYRUN_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunVisionClient;

impl AnalysisClient for DryrunVisionClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> Option<&str> {
        Some("dryrun-vision-1")
    }

    fn analyze(&self, image: &SourceImage, _instruction: &str) -> Result<String> {
        let decoded = decode_image(image)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        let [r, g, b, _] = average_color(&decoded);
        Ok(format!(
            "1. Pet type: pet-shaped subject\n\
             2. Breed: unknown (offline analysis)\n\
             3. Physical features: dominant colour #{}, {width}x{height} photo\n\
             4. Posture: sitting\n\
             5. Expression: calm\n\
             6. Fur condition: groomed\n\
             7. Accessories: none\n\
             8. Overall: a {} pet",
            hex::encode([r, g, b]),
            brightness_word(r, g, b)
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunImageClient;

impl GenerationClient for DryrunImageClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> Option<&str> {
        Some("dryrun-image-1")
    }

    fn generate(&self, image: &SourceImage, prompt: &str) -> Result<SourceImage> {
        if prompt.contains(REFUSE_MARKER) {
            return Err(PipelineError::no_image_produced(
                "No image was generated. The model may have refused the prompt.",
            )
            .into());
        }
        let (background, subject) = colors_from_prompt(prompt, image.payload());
        let mut canvas = RgbaImage::from_pixel(DRYRUN_SIZE, DRYRUN_SIZE, background);
        let center = (DRYRUN_SIZE / 2) as i64;
        let radius = (DRYRUN_SIZE / 3) as i64;
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            let dx = x as i64 - center;
            let dy = y as i64 - center;
            if dx * dx + dy * dy <= radius * radius {
                *pixel = subject;
            }
        }
        encode_png(canvas)
    }
}

/// Clears every pixel that matches the top-left corner colour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunBackgroundRemover;

impl BackgroundRemovalClient for DryrunBackgroundRemover {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn remove_background(&self, image: &SourceImage) -> Result<SourceImage> {
        let mut rgba = decode_image(image)?.to_rgba8();
        let Some(corner) = rgba.get_pixel_checked(0, 0).copied() else {
            return encode_png(rgba);
        };
        for pixel in rgba.pixels_mut() {
            if *pixel == corner {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }
        encode_png(rgba)
    }
}

fn decode_image(image: &SourceImage) -> Result<DynamicImage> {
    let bytes = image.to_bytes()?;
    image::load_from_memory(&bytes).context("dryrun could not decode image bytes")
}

fn encode_png(image: RgbaImage) -> Result<SourceImage> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .context("dryrun PNG encode failed")?;
    Ok(SourceImage::from_bytes(out.get_ref(), MediaType::Png))
}

fn colors_from_prompt(prompt: &str, source_payload: &str) -> (Rgba<u8>, Rgba<u8>) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(source_payload.as_bytes());
    let digest = hasher.finalize();
    let background = Rgba([digest[0], digest[1], digest[2], 255]);
    let mut subject = Rgba([digest[3], digest[4], digest[5], 255]);
    if subject == background {
        subject.0[0] = subject.0[0].wrapping_add(128);
    }
    (background, subject)
}

fn average_color(image: &RgbaImage) -> [u8; 4] {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return [0, 0, 0, 0];
    }
    let mut sums = [0u64; 4];
    for pixel in image.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
    }
    sums.map(|sum| (sum / count) as u8)
}

fn brightness_word(r: u8, g: u8, b: u8) -> &'static str {
    let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
    match luma {
        0..=84 => "dark-coated",
        85..=169 => "medium-toned",
        _ => "light-coated",
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use pawtoon_contracts::{PipelineError, PipelineErrorKind, SourceImage};

    use super::*;

    fn solid_png(color: [u8; 4]) -> anyhow::Result<SourceImage> {
        encode_png(RgbaImage::from_pixel(4, 3, Rgba(color)))
    }

    #[test]
    fn vision_reports_dimensions_and_colour() -> anyhow::Result<()> {
        let text = DryrunVisionClient.analyze(&solid_png([200, 100, 50, 255])?, "describe")?;
        assert!(text.contains("#c86432"));
        assert!(text.contains("4x3"));
        assert!(text.contains("medium-toned"));
        Ok(())
    }

    #[test]
    fn generation_is_deterministic_per_prompt() -> anyhow::Result<()> {
        let source = solid_png([1, 2, 3, 255])?;
        let first = DryrunImageClient.generate(&source, "a cartoon corgi")?;
        let again = DryrunImageClient.generate(&source, "a cartoon corgi")?;
        let other = DryrunImageClient.generate(&source, "a cartoon cat")?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(first.media_type(), MediaType::Png);
        Ok(())
    }

    #[test]
    fn refuse_marker_yields_no_image() -> anyhow::Result<()> {
        let err = DryrunImageClient
            .generate(&solid_png([0, 0, 0, 255])?, "please [[refuse]]")
            .unwrap_err();
        assert_eq!(PipelineError::from_anyhow(&err).kind, PipelineErrorKind::NoImageProduced);
        Ok(())
    }

    #[test]
    fn remover_clears_corner_colour() -> anyhow::Result<()> {
        let generated = DryrunImageClient.generate(&solid_png([9, 9, 9, 255])?, "sticker")?;
        let cutout = DryrunBackgroundRemover.remove_background(&generated)?;
        let rgba = decode_image(&cutout)?.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
        assert_eq!(rgba.get_pixel(DRYRUN_SIZE / 2, DRYRUN_SIZE / 2).0[3], 255);
        Ok(())
    }

    #[test]
    fn undecodable_input_is_an_error() {
        let garbage = SourceImage::from_bytes(b"not an image", MediaType::Png);
        assert!(DryrunBackgroundRemover.remove_background(&garbage).is_err());
    }
}
