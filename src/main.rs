use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use motion_analysis_client::app::{AppBuilder, ClientCommand};
use motion_analysis_client::config::{AppConfig, ConfigManager, EnvConfigOverride};
use motion_analysis_client::history::SharedHistoryLog;
use motion_analysis_client::source::{TestPatternCamera, VideoClip};
use motion_analysis_client::transport::{ChannelOptions, QuicAnalyzerChannel};
use motion_analysis_client::types::ExerciseMode;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("Motion Analysis Client")
        .version("0.1.0")
        .about("Streams frames to a remote motion analyzer and renders its results")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Load configuration from the given TOML file"),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("ADDR")
                .help("Analyzer address, overriding the configured one"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Initial exercise mode (squat or curl)")
                .default_value("squat"),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let mut manager = ConfigManager::new(PathBuf::from(path));
            manager.load().await?;
            manager.get_config().clone()
        }
        None => AppConfig::default(),
    };
    EnvConfigOverride::apply_overrides(&mut config);

    if let Some(server) = matches.get_one::<String>("server") {
        let addr: std::net::SocketAddr = server.parse()?;
        config.server.address = addr.ip().to_string();
        config.server.port = addr.port();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode: ExerciseMode = matches
        .get_one::<String>("mode")
        .map(|s| s.as_str())
        .unwrap_or("squat")
        .parse()?;

    let server_addr = config.server_addr()?;
    info!("connecting to analyzer at {}", server_addr);

    let options = ChannelOptions {
        server_name: config.server.server_name.clone(),
        connection_timeout: config.server.connection_timeout,
        ..ChannelOptions::default()
    };
    let (sender, messages) = QuicAnalyzerChannel::connect(server_addr, &options).await?;
    info!("analyzer channel connected");

    let history = SharedHistoryLog::new();
    let (app, commands) = AppBuilder::new(config)
        .with_mode(mode)
        .with_channel(Arc::new(sender), messages)
        .with_history(history.clone())
        .build()?;

    let app_task = tokio::spawn(app.run());

    run_console(commands, history).await?;

    app_task.await?;
    info!("shutdown complete");
    Ok(())
}

/// Interactive console driving the client. Commands:
///   video [seconds]  - stream a synthetic video clip
///   camera           - toggle the live camera source
///   mode <name>      - switch exercise mode (squat, curl)
///   stop             - stop the active source
///   history          - print recorded sessions, newest first
///   clear            - clear the history log
///   quit             - shut down
async fn run_console(
    commands: tokio::sync::mpsc::Sender<ClientCommand>,
    history: SharedHistoryLog,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("console ready; commands: video [seconds], camera, mode <name>, stop, history, clear, quit");

    let stdin = tokio::io::stdin();
    let mut lines = LinesStream::new(BufReader::new(stdin).lines());
    let mut camera_active = false;

    while let Some(line) = lines.next().await {
        let line = line?;
        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "video" => {
                let seconds: u64 = parts
                    .get(1)
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(10);
                let frame_interval = Duration::from_millis(40);
                let frame_count = (seconds * 1000 / 40) as usize;
                let clip = VideoClip::synthetic(640, 480, frame_count, frame_interval);
                info!("streaming a {}s synthetic clip", seconds);
                camera_active = false;
                commands.send(ClientCommand::StartVideo(clip)).await?;
            }

            "camera" => {
                if camera_active {
                    camera_active = false;
                    commands.send(ClientCommand::StopSource).await?;
                    info!("camera stopped");
                } else {
                    camera_active = true;
                    let device = Box::new(TestPatternCamera::new(640, 480));
                    commands.send(ClientCommand::StartCamera(device)).await?;
                    info!("camera started");
                }
            }

            "mode" => match parts.get(1).map(|value| value.parse::<ExerciseMode>()) {
                Some(Ok(mode)) => {
                    commands.send(ClientCommand::SetMode(mode)).await?;
                    info!("mode set to {}", mode);
                }
                _ => error!("usage: mode <squat|curl>"),
            },

            "stop" => {
                camera_active = false;
                commands.send(ClientCommand::StopSource).await?;
            }

            "history" => {
                let entries = history.snapshot();
                if entries.is_empty() {
                    info!("no sessions recorded");
                } else {
                    for entry in entries {
                        info!(
                            "{} | {} | {} reps",
                            entry.timestamp.format("%H:%M:%S"),
                            entry.mode.as_str().to_uppercase(),
                            entry.reps
                        );
                    }
                }
            }

            "clear" => {
                history.clear();
                info!("history cleared");
            }

            "quit" | "exit" => {
                commands.send(ClientCommand::Shutdown).await?;
                break;
            }

            other => {
                error!("unknown command: {}", other);
            }
        }
    }

    Ok(())
}
