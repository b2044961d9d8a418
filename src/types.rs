use std::{fmt, time::Instant};

use anyhow::Result;
use serde::Serialize;

use crate::error::PipelineError;

pub const NUM_HAND_LANDMARKS: usize = 21;
pub const MAX_HANDS: usize = 2;
pub const HAND_FEATURES: usize = MAX_HANDS * NUM_HAND_LANDMARKS * 2;
pub const POSE_FEATURES: usize = 8;
pub const FEATURE_SIZE: usize = HAND_FEATURES + POSE_FEATURES;
pub const SEQUENCE_LENGTH: usize = 30;

/// Both shoulders, then both elbows, in MediaPipe pose numbering.
pub const POSE_INDICES: [usize; 4] = [11, 12, 13, 14];

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected_len = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        if rgba.len() != expected_len {
            return Err(PipelineError::FrameSize {
                got: rgba.len(),
                expected: expected_len,
            }
            .into());
        }
        Ok(Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        })
    }

    pub fn from_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            rgba: img.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Flips the frame left-to-right so the operator sees a mirror image.
    pub fn mirror_horizontal(&mut self) {
        let stride = self.width as usize * 4;
        if stride == 0 {
            return;
        }
        for row in self.rgba.chunks_exact_mut(stride) {
            let (mut left, mut right) = (0usize, self.width as usize - 1);
            while left < right {
                for c in 0..4 {
                    row.swap(left * 4 + c, right * 4 + c);
                }
                left += 1;
                right -= 1;
            }
        }
    }

    pub fn crop(&self, region: &Region) -> Frame {
        let mut rgba = Vec::with_capacity(region.width as usize * region.height as usize * 4);
        let src_stride = self.width as usize * 4;
        for row in region.y..region.y + region.height {
            let start = row as usize * src_stride + region.x as usize * 4;
            let end = start + region.width as usize * 4;
            rgba.extend_from_slice(&self.rgba[start..end]);
        }
        Frame {
            rgba,
            width: region.width,
            height: region.height,
            timestamp: self.timestamp,
        }
    }

    pub fn full_region(&self) -> Region {
        Region {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

/// Detector output in pixel coordinates, `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamps the box to the image. Returns `None` when nothing usable is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let x1 = self.x1.max(0) as i64;
        let y1 = self.y1.max(0) as i64;
        let x2 = (self.x2 as i64).min(width as i64);
        let y2 = (self.y2 as i64).min(height as i64);
        if x2 > x1 && y2 > y1 {
            Some(Region {
                x: x1 as u32,
                y: y1 as u32,
                width: (x2 - x1) as u32,
                height: (y2 - y1) as u32,
            })
        } else {
            None
        }
    }
}

/// A pixel rectangle that lies fully inside its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Maps a point normalized to this region back to frame pixels.
    pub fn to_frame_pixels(&self, point: (f32, f32)) -> (f32, f32) {
        (
            self.x as f32 + point.0 * self.width as f32,
            self.y as f32 + point.1 * self.height as f32,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandLandmarks {
    /// Normalized to the image the hand was detected in.
    pub points: [(f32, f32); NUM_HAND_LANDMARKS],
    pub score: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseLandmarks {
    /// Indexed by landmark id, normalized to the full frame.
    pub points: Vec<(f32, f32)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureVector([f32; FEATURE_SIZE]);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_SIZE])
    }

    pub fn from_parts(hands: &[f32; HAND_FEATURES], pose: &[f32; POSE_FEATURES]) -> Self {
        let mut values = [0.0; FEATURE_SIZE];
        values[..HAND_FEATURES].copy_from_slice(hands);
        values[HAND_FEATURES..].copy_from_slice(pose);
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<[f32; FEATURE_SIZE]> for FeatureVector {
    fn from(values: [f32; FEATURE_SIZE]) -> Self {
        Self(values)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureKind {
    DynamicChangeOfCourt,
    DynamicServeLeft,
    DynamicServeRight,
    StaticBallOut,
    StaticEndOfMatch,
    StaticPointLeft,
    StaticPointRight,
}

impl GestureKind {
    /// Training order; the classifier's output index maps into this table.
    pub const ALL: [GestureKind; 7] = [
        GestureKind::DynamicChangeOfCourt,
        GestureKind::DynamicServeLeft,
        GestureKind::DynamicServeRight,
        GestureKind::StaticBallOut,
        GestureKind::StaticEndOfMatch,
        GestureKind::StaticPointLeft,
        GestureKind::StaticPointRight,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            GestureKind::DynamicChangeOfCourt => "DynamicChangeOfCourt",
            GestureKind::DynamicServeLeft => "DynamicServeLeft",
            GestureKind::DynamicServeRight => "DynamicServeRight",
            GestureKind::StaticBallOut => "StaticBallOut",
            GestureKind::StaticEndOfMatch => "StaticEndOfMatch",
            GestureKind::StaticPointLeft => "StaticPointLeft",
            GestureKind::StaticPointRight => "StaticPointRight",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawPrediction {
    pub class_index: usize,
    pub confidence: f32,
}

impl RawPrediction {
    pub fn new(class_index: usize, confidence: f32) -> Self {
        Self {
            class_index,
            confidence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothedGesture {
    pub kind: GestureKind,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerStatus {
    #[default]
    Starting,
    Running,
    Stopped,
}
