// Bridges the `image` codecs and the `ndarray` arrays the tiling engine works on.
// Decoding failures of any kind (missing file, unknown format, corrupt data) are
// reported as `NotFound` so corpus assembly can skip the file and carry on.

use crate::error::{Error, Result};
use image::{ExtendedColorType, ImageEncoder};
use ndarray::{Array2, Array3, ArrayBase, Data, Ix2, Ix3};
use std::path::Path;

/// Source of decoded pixel arrays.
pub trait ImageLoader: Send + Sync {
    /// Loads `path` as an H x W array of luma samples.
    fn load_grayscale(&self, path: &Path) -> Result<Array2<u8>>;

    /// Loads `path` as an H x W x 3 array of RGB samples.
    fn load_color(&self, path: &Path) -> Result<Array3<u8>>;
}

/// Loads images from disk with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load_grayscale(&self, path: &Path) -> Result<Array2<u8>> {
        let luma = open(path)?.into_luma8();
        let (width, height) = luma.dimensions();
        Array2::from_shape_vec((height as usize, width as usize), luma.into_raw())
            .map_err(|e| Error::invalid(e.to_string()))
    }

    fn load_color(&self, path: &Path) -> Result<Array3<u8>> {
        let rgb = open(path)?.into_rgb8();
        let (width, height) = rgb.dimensions();
        Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw())
            .map_err(|e| Error::invalid(e.to_string()))
    }
}

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|e| Error::NotFound {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes a grayscale array as an 8-bit PNG.
pub fn save_grayscale<S>(path: &Path, pixels: &ArrayBase<S, Ix2>) -> Result<()>
where
    S: Data<Elem = u8>,
{
    let (height, width) = pixels.dim();
    write_png(path, width, height, pixels.iter().copied().collect(), ExtendedColorType::L8)
}

/// Writes an H x W x 3 array as an 8-bit RGB PNG.
pub fn save_color<S>(path: &Path, pixels: &ArrayBase<S, Ix3>) -> Result<()>
where
    S: Data<Elem = u8>,
{
    let (height, width, channels) = pixels.dim();
    if channels != 3 {
        return Err(Error::invalid(format!(
            "expected 3 colour channels, got {channels}"
        )));
    }
    write_png(path, width, height, pixels.iter().copied().collect(), ExtendedColorType::Rgb8)
}

fn write_png(
    path: &Path,
    width: usize,
    height: usize,
    buffer: Vec<u8>,
    color: ExtendedColorType,
) -> Result<()> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder
        .write_image(&buffer, width as u32, height as u32, color)
        .map_err(|e| Error::invalid(format!("cannot encode '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn grayscale_png_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gradient.png");
        let pixels = Array2::from_shape_fn((7, 11), |(r, c)| (r * 11 + c) as u8);

        save_grayscale(&path, &pixels).expect("Error Saving File.");
        let loaded = FileImageLoader.load_grayscale(&path).unwrap();
        assert_eq!(loaded, pixels);
    }

    #[test]
    fn color_png_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colour.png");
        let pixels = Array3::from_shape_fn((5, 4, 3), |(r, c, ch)| (r * 40 + c * 10 + ch) as u8);

        save_color(&path, &pixels).expect("Error Saving File.");
        let loaded = FileImageLoader.load_color(&path).unwrap();
        assert_eq!(loaded, pixels);
    }

    #[test]
    fn color_image_loads_as_grayscale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("white.png");
        save_color(&path, &Array3::from_elem((3, 6, 3), 255u8)).unwrap();
        let gray = FileImageLoader.load_grayscale(&path).unwrap();
        assert_eq!(gray.dim(), (3, 6));
        assert!(gray.iter().all(|&v| v == 255));
    }

    #[test]
    fn missing_or_corrupt_files_are_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(
            FileImageLoader.load_grayscale(&missing),
            Err(Error::NotFound { .. })
        ));

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"definitely not a png").unwrap();
        assert!(matches!(
            FileImageLoader.load_color(&corrupt),
            Err(Error::NotFound { .. })
        ));
    }
}
