use anyhow::{Context, Result};
use bytes::Bytes;
use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};

use super::{
    features::Extraction,
    font::{self, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH},
};
use crate::types::{Frame, POSE_INDICES, SmoothedGesture};

pub const HAND_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

/// Shoulder line plus each upper arm, as positions in `POSE_INDICES`.
const POSE_CONNECTIONS: &[(usize, usize)] = &[(0, 1), (0, 2), (1, 3)];

const LINE_THICKNESS: i32 = 3;
const ROI_COLOR: [u8; 4] = [0, 255, 0, 255];
const HAND_LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const HAND_POINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const POSE_COLOR: [u8; 4] = [250, 204, 21, 255];
const PROGRESS_TRACK: [u8; 4] = [64, 64, 64, 255];
const PROGRESS_FILL: [u8; 4] = [255, 255, 255, 255];
const DETECTING_COLOR: [u8; 4] = [0, 255, 255, 255];
const GESTURE_COLOR: [u8; 4] = [0, 200, 0, 255];
const TEXT_SCALE: i32 = 2;

pub struct Overlay<'a> {
    pub extraction: Option<&'a Extraction>,
    pub buffered: usize,
    pub capacity: usize,
    pub gesture: Option<SmoothedGesture>,
}

/// Encodes `frame` as JPEG, drawing `overlay` onto a copy first when given.
pub fn render_jpeg(frame: &Frame, overlay: Option<&Overlay<'_>>, quality: u8) -> Result<Bytes> {
    let mut canvas = Canvas {
        buffer: frame.rgba.clone(),
        width: frame.width,
        height: frame.height,
    };
    if let Some(overlay) = overlay {
        canvas.draw_overlay(overlay);
    }
    canvas.encode_jpeg(quality)
}

struct Canvas {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
}

impl Canvas {
    fn draw_overlay(&mut self, overlay: &Overlay<'_>) {
        if let Some(extraction) = overlay.extraction {
            let region = extraction.region;
            if (region.width, region.height) != (self.width, self.height) {
                self.draw_rect(
                    (region.x as f32, region.y as f32),
                    ((region.x + region.width) as f32, (region.y + region.height) as f32),
                    ROI_COLOR,
                );
            }

            for hand in &extraction.hands {
                let points: Vec<(f32, f32)> =
                    hand.points.iter().map(|p| region.to_frame_pixels(*p)).collect();
                for &(a, b) in HAND_CONNECTIONS {
                    self.draw_line(points[a], points[b], HAND_LINE_COLOR, LINE_THICKNESS);
                }
                for &p in &points {
                    self.fill_circle(p, LINE_THICKNESS + 1, HAND_POINT_COLOR);
                }
            }

            if let Some(pose) = &extraction.pose {
                let (w, h) = (self.width as f32, self.height as f32);
                let joints: Vec<(f32, f32)> = POSE_INDICES
                    .iter()
                    .filter_map(|&idx| pose.points.get(idx))
                    .map(|(x, y)| (x * w, y * h))
                    .collect();
                if joints.len() == POSE_INDICES.len() {
                    for &(a, b) in POSE_CONNECTIONS {
                        self.draw_line(joints[a], joints[b], POSE_COLOR, LINE_THICKNESS);
                    }
                    for &p in &joints {
                        self.fill_circle(p, LINE_THICKNESS + 2, POSE_COLOR);
                    }
                }
            }
        }

        self.draw_status(overlay);
    }

    /// Buffer fill bar, then a solid banner once a gesture is stable, each
    /// followed by its text.
    fn draw_status(&mut self, overlay: &Overlay<'_>) {
        let bar_w = (self.width as f32 * 0.3).max(30.0);
        let (x0, y0) = (10.0, 10.0);
        self.fill_rect((x0, y0), (x0 + bar_w, y0 + 12.0), PROGRESS_TRACK);
        let ratio = overlay.buffered as f32 / overlay.capacity.max(1) as f32;
        if ratio > 0.0 {
            self.fill_rect((x0, y0), (x0 + bar_w * ratio.min(1.0), y0 + 12.0), PROGRESS_FILL);
        }
        let text_x = (x0 + bar_w) as i32 + 8;
        self.draw_text(
            &format!("Buffer {}/{}", overlay.buffered, overlay.capacity),
            (text_x, y0 as i32 - 1),
            TEXT_SCALE,
            PROGRESS_FILL,
        );

        let banner = ((x0, y0 + 20.0), (x0 + bar_w, y0 + 36.0));
        let banner_text = (text_x, banner.0.1 as i32 + 1);
        match overlay.gesture {
            Some(gesture) => {
                let filled = bar_w * gesture.confidence.clamp(0.0, 1.0);
                self.fill_rect(banner.0, (banner.0.0 + filled, banner.1.1), GESTURE_COLOR);
                let label = format!("{} {:.2}", gesture.kind.label(), gesture.confidence);
                self.draw_text(&label, banner_text, TEXT_SCALE, GESTURE_COLOR);
            }
            None => {
                self.draw_rect(banner.0, banner.1, DETECTING_COLOR);
                self.draw_text("Detecting", banner_text, TEXT_SCALE, DETECTING_COLOR);
            }
        }
    }

    fn draw_text(&mut self, text: &str, origin: (i32, i32), scale: i32, color: [u8; 4]) {
        let scale = scale.max(1);
        let mut x = origin.0;
        for c in text.chars() {
            if x >= self.width as i32 {
                break;
            }
            for row in 0..GLYPH_HEIGHT {
                for col in 0..GLYPH_WIDTH {
                    if !font::covers(c, col, row) {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            self.put_pixel(x + col * scale + dx, origin.1 + row * scale + dy, color);
                        }
                    }
                }
            }
            x += ADVANCE * scale;
        }
    }

    fn encode_jpeg(&self, quality: u8) -> Result<Bytes> {
        let rgb: Vec<u8> = self
            .buffer
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        let mut out = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .context("failed to encode annotated frame")?;
        Ok(Bytes::from(out))
    }

    fn draw_rect(&mut self, p0: (f32, f32), p1: (f32, f32), color: [u8; 4]) {
        let corners = [p0, (p1.0, p0.1), p1, (p0.0, p1.1)];
        for i in 0..4 {
            self.draw_line(corners[i], corners[(i + 1) % 4], color, LINE_THICKNESS);
        }
    }

    fn fill_rect(&mut self, p0: (f32, f32), p1: (f32, f32), color: [u8; 4]) {
        let (w, h) = (self.width as f32, self.height as f32);
        for y in p0.1.max(0.0) as i32..p1.1.min(h) as i32 {
            for x in p0.0.max(0.0) as i32..p1.0.min(w) as i32 {
                self.put_pixel(x, y, color);
            }
        }
    }

    /// Bresenham with a diamond stencil, over the part of the segment inside
    /// the canvas grown by the stroke radius.
    fn draw_line(&mut self, p0: (f32, f32), p1: (f32, f32), color: [u8; 4], thickness: i32) {
        let radius = (thickness.max(1) - 1) / 2;
        let bounds = (
            -radius as f64,
            -radius as f64,
            (self.width as i32 - 1 + radius) as f64,
            (self.height as i32 - 1 + radius) as f64,
        );
        let Some((p0, p1)) = clip_segment(
            (p0.0 as f64, p0.1 as f64),
            (p1.0 as f64, p1.1 as f64),
            bounds,
        ) else {
            return;
        };

        let (mut x0, mut y0) = (p0.0.round() as i32, p0.1.round() as i32);
        let (x1, y1) = (p1.0.round() as i32, p1.1.round() as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox.abs() + oy.abs() <= radius {
                        self.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn fill_circle(&mut self, center: (f32, f32), radius: i32, color: [u8; 4]) {
        let reach = radius as f32;
        let inside = |v: f32, len: u32| v.is_finite() && v >= -reach && v <= len as f32 + reach;
        if !inside(center.0, self.width) || !inside(center.1, self.height) {
            return;
        }
        let (cx, cy) = (center.0 as i32, center.1 as i32);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

/// Liang-Barsky: the part of `p0 -> p1` inside `(x_min, y_min, x_max, y_max)`.
fn clip_segment(
    p0: (f64, f64),
    p1: (f64, f64),
    (x_min, y_min, x_max, y_max): (f64, f64, f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    if ![p0.0, p0.1, p1.0, p1.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, p0.0 - x_min),
        (dx, x_max - p0.0),
        (-dy, p0.1 - y_min),
        (dy, y_max - p0.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            if t > t1 {
                return None;
            }
            t0 = t0.max(t);
        } else {
            if t < t0 {
                return None;
            }
            t1 = t1.min(t);
        }
    }
    Some((
        (p0.0 + t0 * dx, p0.1 + t0 * dy),
        (p0.0 + t1 * dx, p0.1 + t1 * dy),
    ))
}
