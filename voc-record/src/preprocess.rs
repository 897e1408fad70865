//! Image loading, resizing and PNG re-encoding.

use crate::{common::*, config::PixelSize};
use sha2::{Digest, Sha256};

/// Image preprocessing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub target: PixelSize,
    pub deinterlace: bool,
    pub grayscale: bool,
}

/// How a source image is brought to the target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Keep every other row and column.
    Deinterlace,
    /// Bilinear resize.
    Resize,
    /// The image already has the target size.
    Passthrough,
}

impl ResizeMode {
    pub fn select(width: u32, height: u32, options: &PreprocessOptions) -> Self {
        let PixelSize { w, h } = options.target;
        let doubled = w.checked_mul(2) == Some(width) && h.checked_mul(2) == Some(height);
        if options.deinterlace && doubled {
            Self::Deinterlace
        } else if width != w || height != h {
            Self::Resize
        } else {
            Self::Passthrough
        }
    }
}

/// The re-encoded image ready to be stored in a record.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    /// PNG bytes.
    pub encoded: Vec<u8>,
    /// Hex sha256 digest of the PNG bytes.
    pub sha256: String,
    /// Per-channel mean of the encoded image.
    pub mean: Vec<f64>,
    pub width: u32,
    pub height: u32,
}

impl PreparedImage {
    pub fn ensure_png(&self) -> Result<()> {
        let format = image::guess_format(&self.encoded)?;
        ensure!(
            format == ImageFormat::Png,
            "image format not PNG, but {:?}",
            format
        );
        Ok(())
    }
}

/// Load the image at `path` and prepare it for a record.
pub fn prepare_image(path: impl AsRef<Path>, options: &PreprocessOptions) -> Result<PreparedImage> {
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("failed to read image file '{}'", path.display()))?
        .to_rgb8();
    debug!(
        "reading {} size {}x{} rescaling to {}",
        path.display(),
        image.width(),
        image.height(),
        options.target
    );

    let image = match ResizeMode::select(image.width(), image.height(), options) {
        ResizeMode::Deinterlace => {
            debug!(
                "deinterlacing {} {}x{} to {}",
                path.display(),
                image.width(),
                image.height(),
                options.target
            );
            deinterlace(&image)
        }
        ResizeMode::Resize => {
            debug!(
                "rescaling {} {}x{} to {}",
                path.display(),
                image.width(),
                image.height(),
                options.target
            );
            let PixelSize { w, h } = options.target;
            image::imageops::resize(&image, w, h, FilterType::Triangle)
        }
        ResizeMode::Passthrough => image,
    };

    let image = if options.grayscale {
        DynamicImage::ImageLuma8(DynamicImage::ImageRgb8(image).to_luma8())
    } else {
        DynamicImage::ImageRgb8(image)
    };

    encode_png(&image)
}

/// Encode through a temporary PNG file and compute the mean of the decoded file.
pub fn encode_png(image: &DynamicImage) -> Result<PreparedImage> {
    let file = tempfile::Builder::new()
        .prefix("voc-record-")
        .suffix(".png")
        .tempfile()?;
    image
        .save_with_format(file.path(), ImageFormat::Png)
        .with_context(|| format!("failed to write '{}'", file.path().display()))?;

    let reread = image::open(file.path())?;
    let mean = channel_mean(&reread);
    let encoded = fs::read(file.path())?;
    let sha256 = format!("{:x}", Sha256::digest(&encoded));

    Ok(PreparedImage {
        encoded,
        sha256,
        mean,
        width: reread.width(),
        height: reread.height(),
    })
}

/// Keep even rows and odd columns, halving both sides.
pub fn deinterlace(image: &RgbImage) -> RgbImage {
    let width = image.width() / 2;
    let height = image.height() / 2;
    RgbImage::from_fn(width, height, |x, y| *image.get_pixel(2 * x + 1, 2 * y))
}

/// Per-channel mean over all pixels. Gray images yield one value, others RGB.
pub fn channel_mean(image: &DynamicImage) -> Vec<f64> {
    match image {
        DynamicImage::ImageLuma8(gray) => mean_of_samples(gray.as_raw(), 1),
        other => mean_of_samples(other.to_rgb8().as_raw(), 3),
    }
}

fn mean_of_samples(samples: &[u8], channels: usize) -> Vec<f64> {
    let num_pixels = samples.len() / channels;
    if num_pixels == 0 {
        return vec![0.0; channels];
    }

    let sums = samples
        .chunks_exact(channels)
        .fold(vec![0u64; channels], |mut sums, pixel| {
            sums.iter_mut()
                .zip(pixel)
                .for_each(|(sum, &value)| *sum += value as u64);
            sums
        });

    sums.into_iter()
        .map(|sum| sum as f64 / num_pixels as f64)
        .collect()
}
