//! Owned sample buffers and their conversion to and from `image` buffers.

use image::{DynamicImage, ExtendedColorType, GrayImage, ImageBuffer, Luma, RgbImage};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RasterError {
    #[error("expected {expected} samples for a {rows}x{cols}x{channels} raster but got {found}")]
    SizeMismatch {
        rows: usize,
        cols: usize,
        channels: usize,
        expected: usize,
        found: usize,
    },
    #[error("expected {expected} channels but got {found}")]
    ChannelMismatch { expected: usize, found: usize },
    #[error("expected a {expected_rows}x{expected_cols} raster but got {rows}x{cols}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("crop window rows {rows:?} cols {cols:?} is empty on this raster")]
    EmptyCrop {
        rows: Range<usize>,
        cols: Range<usize>,
    },
    #[error("cannot encode a {channels} channel raster as {format:?}")]
    UnsupportedEncoding {
        channels: usize,
        format: ExtendedColorType,
    },
    #[error("no views to composite")]
    NoViews,
}

/// An owned, interleaved buffer of `f32` samples.
///
/// Samples are stored row major with channels interleaved, so the sample for
/// `(row, col, channel)` lives at `(row * cols + col) * channels + channel`.
/// Single channel images keep an explicit channel count of one.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    rows: usize,
    cols: usize,
    channels: usize,
    samples: Vec<f32>,
}

impl Raster {
    /// Creates a zero filled raster.
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self::filled(rows, cols, channels, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, channels: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            channels,
            samples: vec![value; rows * cols * channels],
        }
    }

    /// Creates a raster from an interleaved sample buffer.
    pub fn from_samples(
        rows: usize,
        cols: usize,
        channels: usize,
        samples: Vec<f32>,
    ) -> Result<Self, RasterError> {
        let expected = rows * cols * channels;
        if samples.len() != expected {
            return Err(RasterError::SizeMismatch {
                rows,
                cols,
                channels,
                expected,
                found: samples.len(),
            });
        }

        Ok(Self {
            rows,
            cols,
            channels,
            samples,
        })
    }

    /// Creates a raster by evaluating `f(row, col, channel)` for every sample.
    pub fn from_fn(
        rows: usize,
        cols: usize,
        channels: usize,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let samples = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .flat_map(|(row, col)| (0..channels).map(move |ch| (row, col, ch)))
            .map(|(row, col, ch)| f(row, col, ch))
            .collect();

        Self {
            rows,
            cols,
            channels,
            samples,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn get(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.samples[self.index(row, col, channel)]
    }

    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: f32) {
        let index = self.index(row, col, channel);
        self.samples[index] = value;
    }

    /// Returns the interleaved samples of the pixel at `(row, col)`.
    pub fn pixel(&self, row: usize, col: usize) -> &[f32] {
        let start = self.index(row, col, 0);
        &self.samples[start..start + self.channels]
    }

    pub fn as_slice(&self) -> &[f32] {
        self.samples.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.samples.as_mut_slice()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.samples
    }

    fn index(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.cols + col) * self.channels + channel
    }

    /// Copies the samples inside `rows` x `cols` into a new raster.
    ///
    /// Ranges are clamped to the raster. Returns an error if nothing is left.
    pub fn crop(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Raster, RasterError> {
        let row_range = rows.start.min(self.rows)..rows.end.min(self.rows);
        let col_range = cols.start.min(self.cols)..cols.end.min(self.cols);
        if row_range.is_empty() || col_range.is_empty() {
            return Err(RasterError::EmptyCrop { rows, cols });
        }

        let width = col_range.len() * self.channels;
        let mut samples = Vec::with_capacity(row_range.len() * width);
        for row in row_range.clone() {
            let start = self.index(row, col_range.start, 0);
            samples.extend_from_slice(&self.samples[start..start + width]);
        }

        Ok(Raster {
            rows: row_range.len(),
            cols: col_range.len(),
            channels: self.channels,
            samples,
        })
    }

    /// Mirrors the raster left to right.
    pub fn flip_horizontal(&self) -> Raster {
        let mut flipped = self.clone();
        let row_len = self.cols * self.channels;
        if row_len == 0 {
            return flipped;
        }

        for (dst, src) in flipped
            .samples
            .chunks_mut(row_len)
            .zip(self.samples.chunks(row_len))
        {
            for (d, s) in dst
                .chunks_mut(self.channels)
                .zip(src.chunks(self.channels).rev())
            {
                d.copy_from_slice(s);
            }
        }

        flipped
    }

    /// Mirrors the raster top to bottom.
    pub fn flip_vertical(&self) -> Raster {
        let row_len = self.cols * self.channels;
        if row_len == 0 {
            return self.clone();
        }

        Raster {
            rows: self.rows,
            cols: self.cols,
            channels: self.channels,
            samples: self.samples.chunks(row_len).rev().flatten().copied().collect(),
        }
    }

    /// Converts a decoded image into a raster.
    ///
    /// Gray images (8 or 16 bit) become single channel rasters holding the raw
    /// sample values. Everything else is converted to 8-bit RGB.
    pub fn from_image(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(buf) => Self::gray(buf.width(), buf.height(), buf.as_raw()),
            DynamicImage::ImageLuma16(buf) => Self::gray(buf.width(), buf.height(), buf.as_raw()),
            DynamicImage::ImageLumaA8(_) => {
                let buf = image.to_luma8();
                Self::gray(buf.width(), buf.height(), buf.as_raw())
            }
            DynamicImage::ImageLumaA16(_) => {
                let buf = image.to_luma16();
                Self::gray(buf.width(), buf.height(), buf.as_raw())
            }
            _ => {
                let buf = image.to_rgb8();
                Self {
                    rows: buf.height() as usize,
                    cols: buf.width() as usize,
                    channels: 3,
                    samples: buf.as_raw().iter().map(|&s| f32::from(s)).collect(),
                }
            }
        }
    }

    fn gray<T: Copy + Into<f32>>(width: u32, height: u32, raw: &[T]) -> Self {
        Self {
            rows: height as usize,
            cols: width as usize,
            channels: 1,
            samples: raw.iter().map(|&s| s.into()).collect(),
        }
    }

    /// Encodes a three channel raster as 8-bit RGB.
    ///
    /// Samples are truncated towards zero and saturate at the bounds of `u8`.
    pub fn to_rgb8(&self) -> Result<RgbImage, RasterError> {
        self.expect_channels(3, ExtendedColorType::Rgb8)?;
        let (width, height) = self.dimensions();
        let bytes = self.samples.iter().map(|&s| s as u8).collect();
        Ok(RgbImage::from_raw(width, height, bytes).expect("buffer length matches dimensions"))
    }

    /// Encodes a single channel raster as 8-bit gray.
    pub fn to_luma8(&self) -> Result<GrayImage, RasterError> {
        self.expect_channels(1, ExtendedColorType::L8)?;
        let (width, height) = self.dimensions();
        let bytes = self.samples.iter().map(|&s| s as u8).collect();
        Ok(GrayImage::from_raw(width, height, bytes).expect("buffer length matches dimensions"))
    }

    /// Encodes a single channel raster as 16-bit gray.
    pub fn to_luma16(&self) -> Result<ImageBuffer<Luma<u16>, Vec<u16>>, RasterError> {
        self.expect_channels(1, ExtendedColorType::L16)?;
        let (width, height) = self.dimensions();
        let words = self.samples.iter().map(|&s| s as u16).collect();
        Ok(ImageBuffer::from_raw(width, height, words).expect("buffer length matches dimensions"))
    }

    fn expect_channels(&self, channels: usize, format: ExtendedColorType) -> Result<(), RasterError> {
        match self.channels == channels {
            true => Ok(()),
            false => Err(RasterError::UnsupportedEncoding {
                channels: self.channels,
                format,
            }),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn dimensions(&self) -> (u32, u32) {
        (self.cols as u32, self.rows as u32)
    }
}
