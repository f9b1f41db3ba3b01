// THEORY:
// Masks arrive as colour-coded images: a labeller paints the region of interest in
// one colour (green by default) and everything else in any other colour. The mask
// codec collapses such an image into a boolean array with one cell per pixel,
// true where the pixel is exactly the reference colour.
//
// Two decoders exist. The lenient one is the general case for images carrying
// several colour codes. The strict one is for masks that are expected to be a
// single flat colour and treats any other pixel as a broken mask.

use crate::core_modules::selector::rounded_percent;
use crate::error::{Error, Result};
use image::Rgb;
use ndarray::{Array2, ArrayBase, ArrayView2, ArrayView3, Axis, Data, Dimension, Ix3};
use serde::Deserialize;

/// Colour used to mark relevant pixels unless configured otherwise.
pub const DEFAULT_MASK_COLOR: &str = "#00ff00";

/// One boolean per pixel of the source image.
pub type BinaryMask = Array2<bool>;

/// How a colour-coded mask image is validated while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    /// Every pixel must be the reference colour.
    Strict,
    /// Pixels of other colours become false.
    #[default]
    Lenient,
}

/// Parses `#rrggbb` (the `#` is optional) into an RGB triple.
pub fn hex_to_rgb(value: &str) -> Result<Rgb<u8>> {
    let digits = value.strip_prefix('#').unwrap_or(value);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::invalid(format!(
            "'{value}' is not a 6-digit hexadecimal colour"
        )));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|e| Error::invalid(format!("bad colour channel in '{value}': {e}")))
    };
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

/// Formats an RGB triple as lowercase `#rrggbb`.
pub fn rgb_to_hex(rgb: Rgb<u8>) -> String {
    let Rgb([r, g, b]) = rgb;
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Marks the pixels of `mask_image` equal to `reference_hex`; other pixels are false.
pub fn decode_lenient<S, D>(mask_image: &ArrayBase<S, D>, reference_hex: &str) -> Result<BinaryMask>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    let image = rgb_view(mask_image)?;
    let reference = hex_to_rgb(reference_hex)?;
    Ok(Array2::from_shape_fn((image.dim().0, image.dim().1), |(r, c)| {
        is_color(&image, r, c, &reference)
    }))
}

/// Like [`decode_lenient`] but fails with `InconsistentMask` on the first pixel of
/// any other colour.
pub fn decode_strict<S, D>(mask_image: &ArrayBase<S, D>, reference_hex: &str) -> Result<BinaryMask>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    let image = rgb_view(mask_image)?;
    let reference = hex_to_rgb(reference_hex)?;
    let (height, width, _) = image.dim();
    for row in 0..height {
        for col in 0..width {
            if !is_color(&image, row, col, &reference) {
                let found = Rgb([image[[row, col, 0]], image[[row, col, 1]], image[[row, col, 2]]]);
                return Err(Error::InconsistentMask {
                    row,
                    col,
                    found: rgb_to_hex(found),
                    expected: rgb_to_hex(reference),
                });
            }
        }
    }
    Ok(Array2::from_elem((height, width), true))
}

/// Decodes with the validation `mode` asks for.
pub fn decode<S, D>(mask_image: &ArrayBase<S, D>, reference_hex: &str, mode: MaskMode) -> Result<BinaryMask>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    match mode {
        MaskMode::Strict => decode_strict(mask_image, reference_hex),
        MaskMode::Lenient => decode_lenient(mask_image, reference_hex),
    }
}

/// Share of true cells, rounded half-up to a whole percent.
pub fn coverage_percent(mask: ArrayView2<'_, bool>) -> u64 {
    rounded_percent(mask.iter().filter(|&&cell| cell).count(), mask.len())
}

fn rgb_view<S, D>(mask_image: &ArrayBase<S, D>) -> Result<ArrayView3<'_, u8>>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    if mask_image.ndim() != 3 || mask_image.len_of(Axis(2)) != 3 {
        return Err(Error::invalid(format!(
            "expected an H x W x 3 colour array, got shape {:?}",
            mask_image.shape()
        )));
    }
    mask_image
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| Error::invalid(e.to_string()))
}

#[inline]
fn is_color(image: &ArrayView3<'_, u8>, row: usize, col: usize, reference: &Rgb<u8>) -> bool {
    (0..3).all(|ch| image[[row, col, ch]] == reference.0[ch])
}
