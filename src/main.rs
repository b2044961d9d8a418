use anyhow::{Context, Result};
use clap::Parser;
use gesture_relay::{
    config::{Args, Config, SourceConfig},
    pipeline::{FrameSource, ImageFolderSource, InferenceLoop, SharedInferenceState},
    server::{self, AppState},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "camera-nokhwa")]
use gesture_relay::pipeline::{CameraStream, ChannelSource, available_cameras, start_camera_stream};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.list_cameras {
        return list_cameras();
    }
    let config = Config::from(args);

    let models = config.models.load().context("failed to load models")?;
    let (source, capture) = open_source(&config.source)?;

    let state = SharedInferenceState::new();
    let producer = InferenceLoop::new(
        source,
        models,
        config.smoother,
        state.clone(),
        config.producer.clone(),
    )
    .spawn()?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {err}");
            return;
        }
        log::info!("shutdown requested");
        signal.cancel();
    });

    let result = server::serve(
        listener,
        AppState {
            state,
            commands: producer.commands(),
            feed: config.feed.clone(),
            shutdown,
        },
    )
    .await;

    // The capture thread goes first so the producer sees its channel close.
    drop(capture);
    producer.stop();
    result
}

#[cfg(feature = "camera-nokhwa")]
type Capture = Option<CameraStream>;
#[cfg(not(feature = "camera-nokhwa"))]
type Capture = ();

fn open_source(source: &SourceConfig) -> Result<(Box<dyn FrameSource>, Capture)> {
    match source {
        SourceConfig::Images { dir, repeat } => {
            let replay = ImageFolderSource::open(dir, *repeat)?;
            Ok((Box::new(replay), Capture::default()))
        }
        #[cfg(feature = "camera-nokhwa")]
        SourceConfig::Camera(index) => {
            let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
            let camera = start_camera_stream(*index, frame_tx)?;
            Ok((Box::new(ChannelSource::new(frame_rx)), Some(camera)))
        }
        #[cfg(not(feature = "camera-nokhwa"))]
        SourceConfig::Camera(_) => {
            anyhow::bail!("built without camera support; replay a folder with --images")
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    for camera in available_cameras()? {
        println!("{}: {}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    anyhow::bail!("built without camera support")
}
