//! Raw pixel tensors as handed to `add_image`/`add_images`/`summary.image`.

use crate::backend::ImageArtifact;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageTensorError {
    #[error("shape {shape:?} needs {expected} values, found {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("layout {layout} expects rank {expected}, tensor has rank {actual}")]
    Rank {
        layout: String,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported channel count {0}")]
    Channels(usize),
    #[error("unsupported data format {0:?}")]
    UnsupportedLayout(String),
    #[error("image has a zero-sized dimension")]
    Empty,
}

/// Layout of a single image (`dataformats` of `add_image`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Chw,
    Hwc,
    Hw,
    Wh,
}

impl ImageLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageLayout::Chw => "CHW",
            ImageLayout::Hwc => "HWC",
            ImageLayout::Hw => "HW",
            ImageLayout::Wh => "WH",
        }
    }

    fn rank(self) -> usize {
        match self {
            ImageLayout::Chw | ImageLayout::Hwc => 3,
            ImageLayout::Hw | ImageLayout::Wh => 2,
        }
    }
}

impl FromStr for ImageLayout {
    type Err = ImageTensorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_uppercase().as_str() {
            "CHW" => Ok(ImageLayout::Chw),
            "HWC" => Ok(ImageLayout::Hwc),
            "HW" => Ok(ImageLayout::Hw),
            "WH" => Ok(ImageLayout::Wh),
            _ => Err(ImageTensorError::UnsupportedLayout(raw.to_string())),
        }
    }
}

impl fmt::Display for ImageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of an image batch (`dataformats` of `add_images`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLayout {
    Nchw,
    Nhwc,
}

impl BatchLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchLayout::Nchw => "NCHW",
            BatchLayout::Nhwc => "NHWC",
        }
    }

    fn frame_layout(self) -> ImageLayout {
        match self {
            BatchLayout::Nchw => ImageLayout::Chw,
            BatchLayout::Nhwc => ImageLayout::Hwc,
        }
    }
}

impl FromStr for BatchLayout {
    type Err = ImageTensorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_uppercase().as_str() {
            "NCHW" => Ok(BatchLayout::Nchw),
            "NHWC" => Ok(BatchLayout::Nhwc),
            _ => Err(ImageTensorError::UnsupportedLayout(raw.to_string())),
        }
    }
}

impl fmt::Display for BatchLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel storage. Floats are expected in `[0, 1]` and are scaled to bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl PixelData {
    fn len(&self) -> usize {
        match self {
            PixelData::F32(values) => values.len(),
            PixelData::U8(values) => values.len(),
        }
    }

    fn byte_at(&self, index: usize) -> u8 {
        match self {
            PixelData::F32(values) => (values[index].clamp(0.0, 1.0) * 255.0).round() as u8,
            PixelData::U8(values) => values[index],
        }
    }
}

/// Dense row-major pixel tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: Vec<usize>,
    data: PixelData,
}

impl ImageTensor {
    pub fn new(shape: Vec<usize>, data: PixelData) -> Result<Self, ImageTensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ImageTensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, ImageTensorError> {
        Self::new(shape, PixelData::F32(values))
    }

    pub fn from_u8(shape: Vec<usize>, values: Vec<u8>) -> Result<Self, ImageTensorError> {
        Self::new(shape, PixelData::U8(values))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Converts a single image stored in `layout`.
    pub fn to_image(&self, layout: ImageLayout) -> Result<ImageArtifact, ImageTensorError> {
        self.check_rank(layout.as_str(), layout.rank())?;
        frame(&self.data, 0, &self.shape, layout)
    }

    /// Splits a batch along its leading axis, one image per entry in order.
    pub fn batch(&self, layout: BatchLayout) -> Result<Vec<ImageArtifact>, ImageTensorError> {
        self.check_rank(layout.as_str(), 4)?;
        let frame_shape = &self.shape[1..];
        let stride: usize = frame_shape.iter().product();
        (0..self.shape[0])
            .map(|index| frame(&self.data, index * stride, frame_shape, layout.frame_layout()))
            .collect()
    }

    /// TensorFlow image summaries: rank 4 is an NHWC batch, rank 3 one HWC
    /// image, rank 2 one grayscale image.
    pub fn frames(&self) -> Result<Vec<ImageArtifact>, ImageTensorError> {
        match self.rank() {
            4 => self.batch(BatchLayout::Nhwc),
            3 => self.to_image(ImageLayout::Hwc).map(|image| vec![image]),
            2 => self.to_image(ImageLayout::Hw).map(|image| vec![image]),
            actual => Err(ImageTensorError::Rank {
                layout: "NHWC".to_string(),
                expected: 4,
                actual,
            }),
        }
    }

    fn check_rank(&self, layout: &str, expected: usize) -> Result<(), ImageTensorError> {
        if self.rank() != expected {
            return Err(ImageTensorError::Rank {
                layout: layout.to_string(),
                expected,
                actual: self.rank(),
            });
        }
        Ok(())
    }
}

fn frame(
    data: &PixelData,
    offset: usize,
    shape: &[usize],
    layout: ImageLayout,
) -> Result<ImageArtifact, ImageTensorError> {
    let (height, width, channels) = match layout {
        ImageLayout::Chw => (shape[1], shape[2], shape[0]),
        ImageLayout::Hwc => (shape[0], shape[1], shape[2]),
        ImageLayout::Hw => (shape[0], shape[1], 1),
        ImageLayout::Wh => (shape[1], shape[0], 1),
    };
    if height == 0 || width == 0 {
        return Err(ImageTensorError::Empty);
    }
    if !matches!(channels, 1 | 3 | 4) {
        return Err(ImageTensorError::Channels(channels));
    }
    let source_index = |row: usize, col: usize, channel: usize| match layout {
        ImageLayout::Chw => channel * height * width + row * width + col,
        ImageLayout::Hwc => (row * width + col) * channels + channel,
        ImageLayout::Hw => row * width + col,
        ImageLayout::Wh => col * height + row,
    };
    let mut pixels = Vec::with_capacity(height * width * channels);
    for row in 0..height {
        for col in 0..width {
            for channel in 0..channels {
                pixels.push(data.byte_at(offset + source_index(row, col, channel)));
            }
        }
    }
    let (width, height) = (width as u32, height as u32);
    let bitmap = match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
    };
    bitmap
        .map(ImageArtifact::from_bitmap)
        .ok_or(ImageTensorError::Channels(channels))
}
