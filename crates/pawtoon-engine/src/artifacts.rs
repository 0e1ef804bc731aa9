use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pawtoon_contracts::runs::receipts::ReceiptArtifacts;
use pawtoon_contracts::{GeneratedImage, SourceImage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifacts {
    pub original: PathBuf,
    pub cutout: Option<PathBuf>,
}

impl SavedArtifacts {
    pub fn paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.original.clone())
            .chain(self.cutout.clone())
            .collect()
    }
}

impl From<&SavedArtifacts> for ReceiptArtifacts {
    fn from(saved: &SavedArtifacts) -> Self {
        Self {
            original: Some(saved.original.clone()),
            cutout: saved.cutout.clone(),
        }
    }
}

/// Writes `<stem>.<ext>` and, when removal succeeded, `<stem>-cutout.<ext>`.
pub fn save_outputs(
    out_dir: &Path,
    stem: &str,
    generated: &GeneratedImage,
) -> Result<SavedArtifacts> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let original = write_image(out_dir, stem, generated.pre_removal())?;
    let cutout = match generated.cutout() {
        Some(cutout) => Some(write_image(out_dir, &format!("{stem}-cutout"), cutout)?),
        None => None,
    };
    Ok(SavedArtifacts { original, cutout })
}

fn write_image(out_dir: &Path, stem: &str, image: &SourceImage) -> Result<PathBuf> {
    let path = out_dir.join(format!("{stem}.{}", image.media_type().extension()));
    let bytes = image.to_bytes()?;
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pawtoon_contracts::{GeneratedImage, MediaType, SourceImage};

    use super::save_outputs;

    #[test]
    fn writes_original_only_without_cutout() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generated = GeneratedImage::new(SourceImage::from_bytes(b"jpeg-ish", MediaType::Jpeg));
        let saved = save_outputs(&temp.path().join("out"), "run-1", &generated)?;
        assert_eq!(saved.original, temp.path().join("out/run-1.jpg"));
        assert_eq!(saved.cutout, None);
        assert_eq!(fs::read(&saved.original)?, b"jpeg-ish");
        Ok(())
    }

    #[test]
    fn writes_both_when_cutout_present() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generated = GeneratedImage::with_cutout(
            SourceImage::from_bytes(b"y", MediaType::Png),
            SourceImage::from_bytes(b"y-prime", MediaType::Png),
        );
        let saved = save_outputs(temp.path(), "run-2", &generated)?;
        let cutout = saved.cutout.clone().expect("cutout written");
        assert_eq!(cutout, temp.path().join("run-2-cutout.png"));
        assert_eq!(fs::read(cutout)?, b"y-prime");
        assert_eq!(saved.paths().len(), 2);
        Ok(())
    }
}
