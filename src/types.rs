// Core value types shared by the classifier, the canvas and the workers.

use std::time::Instant;

use image::{Rgb, RgbImage};

use crate::error::Error;

/// Number of landmarks the provider reports per hand.
pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

#[derive(Clone)]
pub struct FrameBuffer {
    pub width: usize,      // how wide the frame is on screen (pixels)
    pub height: usize,     // how tall the frame is on screen (pixels)
    pub pixels: Vec<u32>,  // each entry is 0x00RRGGBB for minifb
}

impl FrameBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, pixels: vec![0u32; width * height] }
    }

    /// Pack an RGB image into window pixels, row-major.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let mut out = Vec::with_capacity((w as usize) * (h as usize));
        for pixel in img.pixels() {
            out.push(pack_rgb(*pixel));
        }
        Self { width: w as usize, height: h as usize, pixels: out }
    }
}

/// One hand keypoint: pixel position in the source frame plus relative depth.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: i32, y: i32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Planar pixel distance; depth is ignored.
    pub fn distance(&self, other: &Landmark) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The fixed 21-point set for one observed hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandLandmarks([Landmark; LANDMARK_COUNT]);

impl HandLandmarks {
    pub const fn new(points: [Landmark; LANDMARK_COUNT]) -> Self {
        Self(points)
    }

    pub fn from_slice(points: &[Landmark]) -> Result<Self, Error> {
        let points: [Landmark; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| Error::InvalidLandmarks(points.len()))?;
        Ok(Self(points))
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.0
    }

    pub fn points_mut(&mut self) -> &mut [Landmark; LANDMARK_COUNT] {
        &mut self.0
    }

    pub fn wrist(&self) -> Landmark { self.0[WRIST] }
    pub fn thumb_tip(&self) -> Landmark { self.0[THUMB_TIP] }
    pub fn index_mcp(&self) -> Landmark { self.0[INDEX_MCP] }
    pub fn index_tip(&self) -> Landmark { self.0[INDEX_TIP] }
    pub fn middle_mcp(&self) -> Landmark { self.0[MIDDLE_MCP] }
    pub fn middle_tip(&self) -> Landmark { self.0[MIDDLE_TIP] }
    pub fn ring_mcp(&self) -> Landmark { self.0[RING_MCP] }
    pub fn ring_tip(&self) -> Landmark { self.0[RING_TIP] }
    pub fn pinky_mcp(&self) -> Landmark { self.0[PINKY_MCP] }
    pub fn pinky_tip(&self) -> Landmark { self.0[PINKY_TIP] }
}

/// Discrete command the classifier settles on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GestureKind {
    /// No hand in view (also the state before anything is confirmed).
    #[default]
    None,
    Fist,
    Pointing,
    OpenPalm,
    Pinch,
    /// A hand is visible but its pose matches no rule.
    Unknown,
}

impl GestureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Fist => "FIST",
            Self::Pointing => "POINTING",
            Self::OpenPalm => "OPEN_PALM",
            Self::Pinch => "PINCH",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Feedback color for overlays (0x00RRGGBB).
    pub fn color(&self) -> u32 {
        match self {
            Self::Pointing => 0x00_00_FF_00,
            Self::Fist => 0x00_00_00_FF,
            Self::OpenPalm => 0x00_FF_FF_00,
            Self::Pinch => 0x00_FF_00_FF,
            Self::None | Self::Unknown => 0x00_FF_FF_FF,
        }
    }
}

impl std::fmt::Display for GestureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position in canvas space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// The stroke being drawn right now. Dropped once committed.
#[derive(Debug, Clone)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: Rgb<u8>,
    pub thickness: u32,
    pub created_at: Instant,
}

impl Stroke {
    pub fn new(start: Point, color: Rgb<u8>, thickness: u32) -> Self {
        Self {
            points: vec![start],
            color,
            thickness,
            created_at: Instant::now(),
        }
    }
}

/// Half-open pixel rectangle: columns `x1..x2`, rows `y1..y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn width(&self) -> u32 { self.x2 - self.x1 }
    pub fn height(&self) -> u32 { self.y2 - self.y1 }
}

/// Pack an RGB pixel as 0x00RRGGBB.
#[inline]
pub fn pack_rgb(px: Rgb<u8>) -> u32 {
    ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32
}
