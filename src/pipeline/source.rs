use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::Receiver;

use crate::types::Frame;

/// Where the inference loop reads frames from. `Ok(None)` means the stream
/// has ended and the loop should stop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Frames pushed by a capture thread. Stale frames are skipped so the loop
/// always works on the newest one.
pub struct ChannelSource {
    frames: Receiver<Frame>,
}

impl ChannelSource {
    pub fn new(frames: Receiver<Frame>) -> Self {
        Self { frames }
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(recv_latest_frame(&self.frames))
    }
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Frame> {
    let mut frame = frame_rx.recv().ok()?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays the images of a directory in file name order.
pub struct ImageFolderSource {
    files: Vec<PathBuf>,
    next: usize,
    repeat: bool,
}

impl ImageFolderSource {
    pub fn open(dir: &Path, repeat: bool) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to read image folder {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            bail!("no images found in {}", dir.display());
        }
        files.sort();
        log::info!("replaying {} images from {}", files.len(), dir.display());

        Ok(Self {
            files,
            next: 0,
            repeat,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageFolderSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next == self.files.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;

        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        Ok(Some(Frame::from_image(image.to_rgba8())))
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    fn solid(width: u32, value: u8) -> Frame {
        Frame::new(vec![value; width as usize * 4], width, 1).unwrap()
    }

    #[test]
    fn channel_source_skips_to_newest_frame() {
        let (tx, rx) = unbounded();
        for value in 1..=3 {
            tx.send(solid(1, value)).unwrap();
        }
        let mut source = ChannelSource::new(rx);
        assert_eq!(source.next_frame().unwrap().unwrap().rgba[0], 3);

        drop(tx);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn image_folder_plays_in_name_order() {
        let dir = std::env::temp_dir().join(format!("gesture-relay-frames-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for (name, value) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            image::RgbaImage::from_pixel(4, 2, image::Rgba([value, 0, 0, 255]))
                .save(dir.join(name))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut source = ImageFolderSource::open(&dir, false).unwrap();
        assert_eq!(source.len(), 3);
        let reds: Vec<u8> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|frame| frame.rgba[0])
            .collect();
        assert_eq!(reds, vec![10, 20, 30]);

        let mut looping = ImageFolderSource::open(&dir, true).unwrap();
        for _ in 0..4 {
            looping.next_frame().unwrap();
        }
        assert_eq!(looping.next_frame().unwrap().unwrap().rgba[0], 20);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_folder_is_rejected() {
        let dir = std::env::temp_dir().join(format!("gesture-relay-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        assert!(ImageFolderSource::open(&dir, false).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
