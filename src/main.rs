use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interview_call::call::{CallBackend, CallController, ControllerConfig, HttpCredentialClient};
use interview_call::media::{DeviceManager, FilePlatform, MediaKind, MediaPlatform};
use interview_call::providers::{Provider, DEFAULT_LLM};
use interview_call::recording::{LocalRecorder, WavEncoderFactory};
use interview_call::{create_router, AppState, CallStatus, Config, HttpVendorApi};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "interview-call", version, about = "Mock interview voice calls")]
struct Cli {
    /// Config file path, without extension
    #[arg(long, default_value = "config/interview-call")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the credential routes
    Serve,

    /// List capture devices
    Devices,

    /// Hold an interview call
    Interview {
        #[arg(long, value_enum, default_value = "retell")]
        provider: Provider,

        /// LLM selection key
        #[arg(long, default_value = DEFAULT_LLM)]
        llm: String,

        /// Microphone device id
        #[arg(long)]
        audio_device: Option<String>,

        /// Include the camera
        #[arg(long)]
        video: bool,

        /// End the call after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Skip saving the recording
        #[arg(long)]
        no_download: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Interview Call v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Devices => list_devices(cfg).await,
        Command::Interview {
            provider,
            llm,
            audio_device,
            video,
            duration,
            no_download,
        } => {
            interview(
                cfg,
                provider,
                llm,
                audio_device,
                video,
                duration.map(Duration::from_secs),
                no_download,
            )
            .await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let vendor = Arc::new(HttpVendorApi::new(cfg.retell.clone(), cfg.eleven.clone())?);
    let state = AppState::from_config(vendor, &cfg);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_devices(cfg: Config) -> Result<()> {
    let platform = FilePlatform::new(cfg.media.devices.clone(), cfg.media.frame_ms);
    let devices = platform.enumerate_devices().await?;

    if devices.is_empty() {
        info!("No devices configured; add [[media.devices]] entries to the config");
    }
    for kind in [MediaKind::Audio, MediaKind::Video] {
        for device in devices.iter().filter(|d| d.kind == kind) {
            println!("{:<6} {:<24} {}", kind.to_string(), device.id, device.label);
        }
    }
    Ok(())
}

async fn interview(
    cfg: Config,
    provider: Provider,
    llm: String,
    audio_device: Option<String>,
    video: bool,
    duration: Option<Duration>,
    no_download: bool,
) -> Result<()> {
    if provider.find_llm(&llm).is_none() {
        warn!("{} has no llm named {}; relying on the default agent", provider, llm);
    }

    let platform = Arc::new(FilePlatform::new(cfg.media.devices.clone(), cfg.media.frame_ms));
    let mut device_config = cfg.media.device_config();
    device_config.video |= video;

    let devices = Arc::new(DeviceManager::new(platform, device_config));
    devices.refresh_devices().await?;
    if let Some(id) = audio_device {
        devices.select_audio_device(id).await?;
    }
    devices.watch_device_changes();

    let credentials = Arc::new(HttpCredentialClient::new(cfg.client.base_url.clone())?);
    let backend = CallBackend::for_provider(provider, &cfg);
    let recorder = LocalRecorder::new(
        Arc::new(WavEncoderFactory),
        cfg.recording.recorder_config(),
    );

    let (ended_tx, mut ended_rx) = oneshot::channel();
    let controller = CallController::new(
        ControllerConfig {
            provider,
            llm,
            vad: cfg.vad.vad_config(),
        },
        Arc::clone(&devices),
        credentials,
        Box::new(backend),
        recorder,
    )
    .on_end(move |summary| {
        let _ = ended_tx.send(summary);
    });
    let handle = controller.handle();

    let status = controller.start().await;
    if status == CallStatus::Active {
        info!("Call active, press Ctrl-C to hang up");

        let deadline = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        ticker.tick().await;
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Hanging up");
                    break;
                }
                _ = &mut deadline => {
                    info!("Call duration reached");
                    break;
                }
                _ = &mut ended_rx => {
                    info!("Call ended by the interviewer");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = controller.snapshot();
                    info!(
                        "{}s elapsed, agent speaking: {}, you speaking: {}",
                        snapshot.elapsed_secs, snapshot.is_agent_speaking, snapshot.is_user_speaking
                    );
                }
            }
        }

        handle.end().await;
    } else {
        error!(
            "Call did not start: {}",
            controller.error().unwrap_or_else(|| status.to_string())
        );
    }

    if !no_download && status == CallStatus::Active {
        match handle.download_recording().await {
            Ok(Some(path)) => info!("Recording saved to {}", path.display()),
            Ok(None) => warn!("No recording was captured"),
            Err(e) => warn!("Failed to save recording: {}", e),
        }
    }

    if let Some(record) = controller.fetch_call_record().await {
        if let Some(transcript) = record.transcript {
            info!("Transcript:\n{}", transcript);
        }
        if let Some(url) = record.recording_url {
            info!("Provider recording: {}", url);
        }
    }

    devices.shutdown().await;
    Ok(())
}
