//! Digit image folder utilities.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Number of digit classes, one sub-folder each.
pub const NUM_CLASSES: u8 = 10;

/// A folder of digit images laid out as `{root}/{d}/img{d}_{j}.jpg`.
///
/// Images of class `d` are numbered `0..n` where `n` is the number of files in `{root}/{d}`.
#[derive(Debug, Clone)]
pub struct DigitFolder {
    root: PathBuf,
}

impl DigitFolder {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn class_dir(&self, label: u8) -> PathBuf {
        self.root.join(label.to_string())
    }

    /// Path of image `index` of class `label`.
    pub fn image_path(&self, label: u8, index: usize) -> PathBuf {
        self.class_dir(label)
            .join(format!("img{label}_{index}.jpg"))
    }

    /// Number of files in the folder of class `label`.
    pub fn count(&self, label: u8) -> Result<usize> {
        let dir = self.class_dir(label);
        let entries = std::fs::read_dir(&dir).map_err(Error::io(&dir))?;

        Ok(entries.count())
    }

    /// Every `(label, path)` pair, class by class.
    pub fn files(&self) -> Result<Vec<(u8, PathBuf)>> {
        let mut files = Vec::new();

        for label in 0..NUM_CLASSES {
            let count = self.count(label)?;
            files.extend((0..count).map(|index| (label, self.image_path(label, index))));
        }

        Ok(files)
    }
}

/// Write a color-inverted copy of every image of `src` to the same relative path in `dst`.
///
/// Returns the number of images written.
pub fn invert_digits<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<usize> {
    let src = DigitFolder::new(src);
    let dst = DigitFolder::new(dst);
    let mut written = 0;

    for label in 0..NUM_CLASSES {
        let dir = dst.class_dir(label);
        std::fs::create_dir_all(&dir).map_err(Error::io(&dir))?;

        for index in 0..src.count(label)? {
            let from = src.image_path(label, index);
            let to = dst.image_path(label, index);

            let mut image = image::open(&from).map_err(Error::image(&from))?;
            image.invert();
            image.save(&to).map_err(Error::image(&to))?;

            written += 1;
        }

        log::debug!("Inverted class {label}");
    }

    log::info!("Inverted {written} images into {}", dst.root.display());

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_layout() {
        let folder = DigitFolder::new("data");

        assert_eq!(
            folder.image_path(4, 12),
            PathBuf::from("data").join("4").join("img4_12.jpg")
        );
    }

    #[test]
    fn missing_class_folder_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = DigitFolder::new(dir.path()).files();

        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
