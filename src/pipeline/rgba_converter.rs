use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Layouts a capture device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

/// Converts one captured buffer into an RGBA frame. For MJPEG the encoded
/// dimensions win over `width` and `height`.
pub fn to_frame(format: PixelFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    match format {
        PixelFormat::Nv12 => Frame::new(nv12_to_rgba(data, width, height)?, width, height),
        PixelFormat::Yuyv => Frame::new(yuyv_to_rgba(data, width, height)?, width, height),
        PixelFormat::Mjpeg => {
            let (rgba, width, height) = mjpeg_to_rgba(data)?;
            Frame::new(rgba, width, height)
        }
        PixelFormat::Rgb => Frame::new(rgb_like_to_rgba(data, width, height, false)?, width, height),
        PixelFormat::Bgr => Frame::new(rgb_like_to_rgba(data, width, height, true)?, width, height),
        PixelFormat::Gray => Frame::new(gray_to_rgba(data, width, height)?, width, height),
    }
}

fn ensure_len(format: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{format} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let mut rgba = vec![0u8; y_plane_len * 4];
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("YUYV", data, width as usize * height as usize * 2)?;

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder returned no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    Ok((rgba, width, height))
}

fn rgb_like_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    ensure_len(
        if swap_rb { "BGR" } else { "RGB" },
        data,
        width as usize * height as usize * 3,
    )?;

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[..3].copy_from_slice(&[src[2], src[1], src[0]]);
            } else {
                dst[..3].copy_from_slice(src);
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("GRAY", data, pixels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels].par_iter().copied())
        .for_each(|(dst, value)| {
            dst.copy_from_slice(&[value, value, value, 255]);
        });

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};

    use super::*;

    #[test]
    fn bgr_swaps_red_and_blue() {
        let frame = to_frame(PixelFormat::Bgr, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(frame.rgba, vec![3, 2, 1, 255, 6, 5, 4, 255]);
        let frame = to_frame(PixelFormat::Rgb, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(frame.rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn gray_fills_every_channel() {
        let frame = to_frame(PixelFormat::Gray, &[7, 9], 2, 1).unwrap();
        assert_eq!(frame.rgba, vec![7, 7, 7, 255, 9, 9, 9, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = to_frame(PixelFormat::Yuyv, &[0; 7], 2, 2).unwrap_err();
        assert!(err.to_string().contains("YUYV buffer too small"));
        assert!(to_frame(PixelFormat::Nv12, &[0; 5], 2, 2).is_err());
    }

    #[test]
    fn neutral_yuyv_is_gray() {
        let data = [128u8; 4 * 2 * 2];
        let frame = to_frame(PixelFormat::Yuyv, &data, 4, 2).unwrap();
        for px in frame.rgba.chunks_exact(4) {
            for channel in &px[..3] {
                assert!((*channel as i32 - 128).abs() <= 2, "{px:?}");
            }
        }
    }

    #[test]
    fn mjpeg_takes_encoded_dimensions() {
        let rgb = vec![200u8; 8 * 6 * 3];
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode(&rgb, 8, 6, ExtendedColorType::Rgb8)
            .unwrap();

        let frame = to_frame(PixelFormat::Mjpeg, &jpeg, 0, 0).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert!(frame.rgba.chunks_exact(4).all(|px| px[3] == 255));
    }
}
