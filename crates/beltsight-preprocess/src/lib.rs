//! beltsight‑preprocess – resize + channel reorder + normalise camera frames
//! into the model's fixed input tensor.
//!
//! Models are trained on RGB in `[0, 1]`.  Cameras disagree on byte order
//! (libcamera hands out RGB, V4L2/OpenCV style sources hand out BGR), so the
//! [`Preprocessor`] reads [`Frame::channel_order`] on every call instead of
//! trusting a start-up flag.

use beltsight_camera::{ChannelOrder, Frame};
use ndarray::Array4;
use resize::{new, Pixel, Type};
use rgb::FromSlice;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("frame buffer is {got} bytes, expected {expected}")]
    FrameSize { expected: usize, got: usize },
    #[error("resize failed: {0}")]
    Resize(#[from] resize::Error),
    #[error("target size must be non-zero, got {0}x{1}")]
    EmptyTarget(u32, u32),
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Memory layout of the model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, 3, H, W]` – ONNX exports
    #[default]
    Nchw,
    /// `[1, H, W, 3]` – TFLite style exports
    Nhwc,
}

/// Interpolation used when the camera and model sizes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    Point,
    #[default]
    Triangle,
    Lanczos3,
}

impl Filter {
    fn kind(self) -> Type {
        match self {
            Filter::Point => Type::Point,
            Filter::Triangle => Type::Triangle,
            Filter::Lanczos3 => Type::Lanczos3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Preprocessor {
    dst_w: u32,
    dst_h: u32,
    layout: TensorLayout,
    filter: Filter,
}

impl Preprocessor {
    /// Create a pre‑processor that outputs W×H RGB (0‑1.0f32) in `layout`.
    pub fn new(dst_w: u32, dst_h: u32, layout: TensorLayout) -> Result<Self> {
        if dst_w == 0 || dst_h == 0 {
            return Err(PreprocessError::EmptyTarget(dst_w, dst_h));
        }
        Ok(Self { dst_w, dst_h, layout, filter: Filter::default() })
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.dst_w, self.dst_h)
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn run(&self, frame: &Frame) -> Result<Array4<f32>> {
        let w = frame.width as usize;
        let h = frame.height as usize;
        let expected = w * h * 3;
        if frame.pixels.len() != expected {
            return Err(PreprocessError::FrameSize { expected, got: frame.pixels.len() });
        }

        // 1. resize to the model size (skipped when the camera already matches)
        let (dw, dh) = (self.dst_w as usize, self.dst_h as usize);
        let resized;
        let packed: &[u8] = if (w, h) == (dw, dh) {
            &frame.pixels
        } else {
            let mut dst = vec![0u8; dw * dh * 3];
            let mut resizer = new(w, h, dw, dh, Pixel::RGB8, self.filter.kind())?;
            resizer.resize(frame.pixels.as_rgb(), dst.as_rgb_mut())?;
            resized = dst;
            &resized
        };

        // 2. reorder to RGB and normalise to 0‑1 in one pass
        let (r, g, b) = match frame.channel_order {
            ChannelOrder::Rgb => (0, 1, 2),
            ChannelOrder::Bgr => (2, 1, 0),
        };
        let mut arr = match self.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, dh, dw)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, dh, dw, 3)),
        };
        for (idx, px) in packed.chunks_exact(3).enumerate() {
            let (y, x) = (idx / dw, idx % dw);
            let rgb = [px[r], px[g], px[b]];
            for (c, v) in rgb.into_iter().enumerate() {
                let v = v as f32 / 255.0;
                match self.layout {
                    TensorLayout::Nchw => arr[(0, c, y, x)] = v,
                    TensorLayout::Nhwc => arr[(0, y, x, c)] = v,
                }
            }
        }
        Ok(arr)
    }
}
