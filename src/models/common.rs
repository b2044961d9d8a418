use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::{error::PipelineError, types::Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, used by the MediaPipe family of models.
    Nhwc,
    /// `[1, 3, H, W]`, used by YOLO exports.
    Nchw,
}

/// How a frame was scaled and padded into a square model input.
#[derive(Clone, Debug)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    /// Maps a point in model input pixels back to frame pixels.
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (
            px.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            py.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

pub fn letterbox(frame: &Frame, target_size: u32, layout: TensorLayout) -> Result<(Array4<f32>, Letterbox)> {
    check_frame(frame)?;
    if frame.width == 0 || frame.height == 0 {
        return Err(anyhow!("cannot letterbox an empty frame"));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = (frame.width as f32 * scale).round().clamp(1.0, target_size as f32) as u32;
    let new_h = (frame.height as f32 * scale).round().clamp(1.0, target_size as f32) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let pad_x = (side - new_w as usize) / 2;
    let pad_y = (side - new_h as usize) / 2;
    let mut canvas = vec![0u8; side * side * 4];
    let dst_stride = side * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..new_h as usize {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let input = match layout {
        TensorLayout::Nhwc => {
            let normalized: Vec<f32> = canvas
                .par_chunks_exact(4)
                .flat_map_iter(|px| {
                    [
                        px[0] as f32 / 255.0,
                        px[1] as f32 / 255.0,
                        px[2] as f32 / 255.0,
                    ]
                })
                .collect();
            Array4::from_shape_vec((1, side, side, 3), normalized)
        }
        TensorLayout::Nchw => {
            let plane = side * side;
            let mut planar = vec![0f32; plane * 3];
            let (r, rest) = planar.split_at_mut(plane);
            let (g, b) = rest.split_at_mut(plane);
            r.par_iter_mut()
                .zip(g.par_iter_mut())
                .zip(b.par_iter_mut())
                .zip(canvas.par_chunks_exact(4))
                .for_each(|(((r, g), b), px)| {
                    *r = px[0] as f32 / 255.0;
                    *g = px[1] as f32 / 255.0;
                    *b = px[2] as f32 / 255.0;
                });
            Array4::from_shape_vec((1, 3, side, side), planar)
        }
    }
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

/// An oriented square crop, used to feed the hand landmark estimator.
#[derive(Clone, Debug)]
pub struct RotatedCrop {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl RotatedCrop {
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        let ox = self.center.0 + dx * cos - dy * sin;
        let oy = self.center.1 + dx * sin + dy * cos;
        (
            ox.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            oy.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }

    pub fn sample(&self, frame: &Frame) -> Result<Array4<f32>> {
        check_frame(frame)?;
        let size = self.output_size as usize;
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let (sin, cos) = self.angle.sin_cos();

        let mut data = vec![0f32; size * size * 3];
        data.par_chunks_mut(size * 3)
            .enumerate()
            .for_each(|(y, row)| {
                let dy = (y as f32 + 0.5 - half) * scale;
                for x in 0..size {
                    let dx = (x as f32 + 0.5 - half) * scale;
                    let src_x = self.center.0 + dx * cos - dy * sin;
                    let src_y = self.center.1 + dx * sin + dy * cos;
                    row[x * 3..x * 3 + 3].copy_from_slice(&sample_rgb(frame, src_x, src_y));
                }
            });

        Array4::from_shape_vec((1, size, size, 3), data)
            .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))
    }
}

/// Splits a flat model output into `count` points of `stride` values each.
pub fn decode_points(flat: &[f32], count: usize, stride: usize) -> Result<Vec<[f32; 2]>> {
    if stride < 2 || flat.len() < count * stride {
        return Err(anyhow!(
            "unexpected landmark output length: got {}, need {} x {}",
            flat.len(),
            count,
            stride
        ));
    }
    Ok(flat
        .chunks_exact(stride)
        .take(count)
        .map(|chunk| [chunk[0], chunk[1]])
        .collect())
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(PipelineError::FrameSize {
            got: frame.rgba.len(),
            expected: expected_len,
        }
        .into());
    }
    Ok(())
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i32, cy as i32);
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0; 3];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
