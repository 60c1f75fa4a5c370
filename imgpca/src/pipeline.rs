use std::{error::Error, fmt::Display, thread, time::Instant};

use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use tracing::debug;

use crate::{
    linalg::{Matrix, MatrixError},
    pca::{reduce, ComponentCount, ComponentError},
};

pub const JPEG_QUALITY: u8 = 85;
pub const CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct CompressOptions {
    /// Reduce the three channels on their own threads.
    pub parallel: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// The colour planes of an image in decode (red, green, blue) order,
/// divided by `scale`.
#[derive(Debug, Clone)]
pub struct Planes {
    pub channels: [Matrix; CHANNELS],
    pub scale: f64,
}

pub fn compress(image_bytes: &[u8], k: ComponentCount) -> Result<Vec<u8>> {
    compress_with(image_bytes, k, &CompressOptions::default())
}

/// Decode, reduce every channel to `k` principal components and re-encode
/// as a quality 85 JPEG.
pub fn compress_with(
    image_bytes: &[u8],
    k: ComponentCount,
    options: &CompressOptions,
) -> Result<Vec<u8>> {
    let start = Instant::now();
    let planes = decode_planes(image_bytes)?;
    debug!(
        height = planes.channels[0].height(),
        width = planes.channels[0].width(),
        scale = planes.scale,
        "decoded image"
    );

    let reduced = reduce_planes(&planes, k.get(), options.parallel)?;
    let image = assemble(&reduced, planes.scale)?;
    let bytes = encode_jpeg(&image)?;
    debug!(
        elapsed = ?start.elapsed(),
        input_bytes = image_bytes.len(),
        output_bytes = bytes.len(),
        "compressed image"
    );
    Ok(bytes)
}

/// Decode any supported container into three planes scaled by the
/// brightest sample. Alpha is dropped and grey or palette images are
/// expanded to three channels. An all black image keeps a scale of 1.
pub fn decode_planes(image_bytes: &[u8]) -> Result<Planes> {
    let image = image::load_from_memory(image_bytes)
        .context(PipelineError::Decode)?
        .to_rgb8();
    let height = image.height() as usize;
    let width = image.width() as usize;

    let mut red = Vec::with_capacity(height * width);
    let mut green = Vec::with_capacity(height * width);
    let mut blue = Vec::with_capacity(height * width);
    let mut max: f64 = 0.0;
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        red.push(r as f64);
        green.push(g as f64);
        blue.push(b as f64);
        max = max.max(r.max(g).max(b) as f64);
    }
    let scale = if max > 0.0 { max } else { 1.0 };

    Ok(Planes {
        channels: [
            plane(red, height, width, scale)?,
            plane(green, height, width, scale)?,
            plane(blue, height, width, scale)?,
        ],
        scale,
    })
}

fn plane(values: Vec<f64>, height: usize, width: usize, scale: f64) -> Result<Matrix> {
    let values = values.into_iter().map(|v| v / scale).collect();
    Matrix::new(values, height, width)
}

/// Run `reduce` on each plane. Results are collected by position, so the
/// order threads finish in does not matter.
pub fn reduce_planes(planes: &Planes, k: usize, parallel: bool) -> Result<[Matrix; CHANNELS]> {
    let reduced: Vec<Matrix> = if parallel {
        thread::scope(|scope| {
            let handles: Vec<_> = planes.channels
                .iter()
                .enumerate()
                .map(|(i, channel)| scope.spawn(move || reduce_channel(i, channel, k)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().map_err(|_| PipelineError::ChannelWorker)?)
                .collect::<Result<Vec<Matrix>>>()
        })?
    } else {
        planes.channels
            .iter()
            .enumerate()
            .map(|(i, channel)| reduce_channel(i, channel, k))
            .collect::<Result<Vec<Matrix>>>()?
    };

    reduced
        .try_into()
        .map_err(|_| MatrixError::SizeMismatch.into())
}

fn reduce_channel(index: usize, channel: &Matrix, k: usize) -> Result<Matrix> {
    let start = Instant::now();
    let reduced = reduce(channel, k).with_context(|| format!("Channel {}", index))?;
    debug!(channel = index, elapsed = ?start.elapsed(), "reduced channel");
    Ok(reduced)
}

/// Undo the normalisation and pack the planes into an 8-bit RGB image.
pub fn assemble(channels: &[Matrix; CHANNELS], scale: f64) -> Result<RgbImage> {
    let height = channels[0].height();
    let width = channels[0].width();
    if channels.iter().any(|c| c.height() != height || c.width() != width) {
        return Err(MatrixError::SizeMismatch.into());
    }

    let mut buffer = Vec::with_capacity(height * width * CHANNELS);
    for i in 0..height * width {
        for channel in channels {
            buffer.push(quantize(channel.elements()[i] * scale));
        }
    }
    RgbImage::from_raw(width as u32, height as u32, buffer)
        .ok_or_else(|| MatrixError::SizeMismatch.into())
}

/// Clip to [0, 255] and round to the nearest integer.
pub fn quantize(value: f64) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
        encoder.encode_image(image).context(PipelineError::Encode)?;
    }
    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineError {
    Decode,
    ChannelWorker,
    Encode,
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Decode => write!(f, "Could not decode image"),
            PipelineError::ChannelWorker => write!(f, "Channel worker panicked"),
            PipelineError::Encode => write!(f, "Could not encode JPEG"),
        }
    }
}

impl Error for PipelineError {}

/// Who is to blame for a failed compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ClientInput,
    Internal,
}

impl Fault {
    pub fn of(err: &anyhow::Error) -> Self {
        if let Some(PipelineError::Decode) = err.downcast_ref::<PipelineError>() {
            return Fault::ClientInput;
        }
        if err.downcast_ref::<ComponentError>().is_some() {
            return Fault::ClientInput;
        }
        Fault::Internal
    }
}
