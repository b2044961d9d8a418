use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    model_download::{default_handpose_estimator_model_path, default_palm_detector_model_path},
    models::ModelPaths,
    pipeline::{LoopConfig, SmootherConfig, TieBreak},
    server::FeedConfig,
};

/// Real-time umpire gesture recognition served over WebSocket and MJPEG.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Address the HTTP server binds to.
    #[arg(long, env = "GESTURE_RELAY_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,
    /// Camera index to capture from.
    #[arg(long, env = "GESTURE_RELAY_CAMERA", default_value_t = 0)]
    pub camera: u32,
    /// Replay the images of this folder instead of opening a camera.
    #[arg(long, env = "GESTURE_RELAY_IMAGES")]
    pub images: Option<PathBuf>,
    /// Start the image folder over when it runs out.
    #[arg(long, requires = "images")]
    pub loop_images: bool,
    /// Print the available cameras and exit.
    #[arg(long)]
    pub list_cameras: bool,

    #[arg(long, env = "GESTURE_RELAY_PALM_MODEL", default_value_os_t = default_palm_detector_model_path())]
    pub palm_model: PathBuf,
    #[arg(long, env = "GESTURE_RELAY_HANDPOSE_MODEL", default_value_os_t = default_handpose_estimator_model_path())]
    pub handpose_model: PathBuf,
    #[arg(long, env = "GESTURE_RELAY_POSE_MODEL", default_value_os_t = ModelPaths::default().pose)]
    pub pose_model: PathBuf,
    #[arg(long, env = "GESTURE_RELAY_SEQUENCE_MODEL", default_value_os_t = ModelPaths::default().sequence)]
    pub sequence_model: PathBuf,
    /// Region-of-interest detector; hands are searched in this box when found.
    #[arg(long, env = "GESTURE_RELAY_OBJECT_MODEL", conflicts_with = "no_object_detector")]
    pub object_model: Option<PathBuf>,
    /// Search hands in the full frame without an object detector.
    #[arg(long)]
    pub no_object_detector: bool,

    /// Keep frames as captured instead of mirroring them.
    #[arg(long)]
    pub no_mirror: bool,
    /// Publish plain frames without landmarks and status.
    #[arg(long)]
    pub no_annotate: bool,
    #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Delay between producer iterations, in milliseconds.
    #[arg(long, env = "GESTURE_RELAY_PACING_MS", default_value_t = 50)]
    pub pacing_ms: u64,
    /// Gesture feed interval, in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub feed_interval_ms: u64,
    /// Video feed interval, in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub media_interval_ms: u64,

    /// Predictions must beat this confidence to take part in the vote.
    #[arg(long, env = "GESTURE_RELAY_THRESHOLD", default_value_t = 0.7, value_parser = parse_threshold)]
    pub threshold: f32,
    /// first-seen, most-recent or lowest-index.
    #[arg(long, default_value = "first-seen")]
    pub tie_break: TieBreak,
}

/// Confidences live in `[0, 1]` and only values strictly above the threshold
/// vote, so anything outside `[0, 1)` would silence the smoother.
fn parse_threshold(value: &str) -> Result<f32, String> {
    let threshold: f32 = value
        .parse()
        .map_err(|err| format!("{value:?} is not a number: {err}"))?;
    if !(0.0..1.0).contains(&threshold) {
        return Err(format!("{threshold} is outside 0.0..1.0"));
    }
    Ok(threshold)
}

#[derive(Clone, Debug, PartialEq)]
pub enum SourceConfig {
    Camera(u32),
    Images { dir: PathBuf, repeat: bool },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen: SocketAddr,
    pub source: SourceConfig,
    pub models: ModelPaths,
    pub producer: LoopConfig,
    pub smoother: SmootherConfig,
    pub feed: FeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            source: SourceConfig::Camera(0),
            models: ModelPaths::default(),
            producer: LoopConfig::default(),
            smoother: SmootherConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let source = match args.images {
            Some(dir) => SourceConfig::Images {
                dir,
                repeat: args.loop_images,
            },
            None => SourceConfig::Camera(args.camera),
        };

        let object_detector = if args.no_object_detector {
            None
        } else {
            args.object_model.or(ModelPaths::default().object_detector)
        };

        Self {
            listen: args.listen,
            source,
            models: ModelPaths {
                palm_detector: args.palm_model,
                handpose_estimator: args.handpose_model,
                pose: args.pose_model,
                object_detector,
                sequence: args.sequence_model,
            },
            producer: LoopConfig {
                pacing: Duration::from_millis(args.pacing_ms),
                mirror: !args.no_mirror,
                annotate: !args.no_annotate,
                jpeg_quality: args.jpeg_quality,
            },
            smoother: SmootherConfig {
                threshold: args.threshold,
                tie_break: args.tie_break,
                ..SmootherConfig::default()
            },
            feed: FeedConfig {
                gesture_interval: Duration::from_millis(args.feed_interval_ms.max(1)),
                media_interval: Duration::from_millis(args.media_interval_ms.max(1)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("gesture-relay").chain(args.iter().copied());
        Args::try_parse_from(argv).unwrap().into()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]);
        let defaults = Config::default();
        assert_eq!(config.listen, defaults.listen);
        assert_eq!(config.source, SourceConfig::Camera(0));
        assert_eq!(config.producer.pacing, Duration::from_millis(50));
        assert!(config.producer.mirror);
        assert_eq!(config.feed.gesture_interval, Duration::from_millis(200));
        assert_eq!(config.feed.media_interval, Duration::from_millis(50));
        assert_eq!(config.smoother.threshold, 0.7);
        assert_eq!(config.smoother.tie_break, TieBreak::FirstSeen);
        assert_eq!(config.models.object_detector, defaults.models.object_detector);
    }

    #[test]
    fn image_replay_and_tuning_flags() {
        let config = parse(&[
            "--images",
            "clips/serve",
            "--loop-images",
            "--no-mirror",
            "--tie-break",
            "most-recent",
            "--threshold",
            "0.8",
            "--no-object-detector",
        ]);
        assert_eq!(
            config.source,
            SourceConfig::Images {
                dir: PathBuf::from("clips/serve"),
                repeat: true
            }
        );
        assert!(!config.producer.mirror);
        assert_eq!(config.smoother.tie_break, TieBreak::MostRecent);
        assert_eq!(config.smoother.threshold, 0.8);
        assert_eq!(config.models.object_detector, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Args::try_parse_from(["gesture-relay", "--tie-break", "random"]).is_err());
        assert!(Args::try_parse_from(["gesture-relay", "--jpeg-quality", "0"]).is_err());
        assert!(Args::try_parse_from(["gesture-relay", "--loop-images"]).is_err());
    }

    #[test]
    fn threshold_must_leave_room_to_vote() {
        for bad in ["1.0", "1.5", "-0.1", "NaN", "inf", "high"] {
            assert!(
                Args::try_parse_from(["gesture-relay", "--threshold", bad]).is_err(),
                "{bad} accepted"
            );
        }
        let config = parse(&["--threshold", "0.0"]);
        assert_eq!(config.smoother.threshold, 0.0);
    }
}
