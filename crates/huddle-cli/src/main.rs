use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use huddle_core::controls::{ControlBar, device_options};
use huddle_core::media::simulated::SimulatedMediaDevices;
use huddle_core::media::DeviceKind;
use huddle_core::peers::SPEAKER_INTERVAL;
use huddle_core::{
    ChatMessage, MeetingSession, Participant, Role, SessionConfig, SessionEvent,
    SessionEventListener, SettingsStore, SimulatedPeers, VirtualBackgroundMode,
};
use huddle_video::{CanvasStreamFactory, GridRenderer};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(author, version, about = "Headless video meeting session driven from stdin")]
struct Cli {
    /// Directory holding settings.json. Defaults to the user config dir.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a simulated meeting and read commands from stdin.
    Join(JoinArgs),
    /// Show or change persisted settings.
    Settings(SettingsArgs),
}

#[derive(Args)]
struct JoinArgs {
    /// Meeting title shown in the header.
    #[arg(long, default_value = "Weekly sync")]
    title: String,
    /// Meeting code.
    #[arg(long, default_value = "abc-defg-hij")]
    code: String,
    /// Display name for this session; overrides settings.
    #[arg(long)]
    name: Option<String>,
    /// Turn the camera on after joining.
    #[arg(long)]
    camera: bool,
    /// Unmute the microphone after joining.
    #[arg(long)]
    mic: bool,
    /// Show the recording indicator.
    #[arg(long)]
    recording: bool,
    /// Join an empty meeting instead of the demo roster.
    #[arg(long)]
    alone: bool,
    /// Seed for the simulated speaker election.
    #[arg(long)]
    seed: Option<u64>,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    mic_on_join: Option<bool>,
    #[arg(long)]
    camera_on_join: Option<bool>,
    /// Capture resolution as WIDTHxHEIGHT.
    #[arg(long)]
    resolution: Option<String>,
}

fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| {
                tracing_subscriber::EnvFilter::try_new("huddle_core=debug,huddle_video=info,huddle=info")
            })
            .unwrap_or_default();
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}

fn data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(dirs::config_dir()
            .context("no user config directory; pass --data-dir")?
            .join("huddle")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let store = SettingsStore::new(data_dir(cli.data_dir)?);
    match cli.command {
        Commands::Join(args) => join(args, store).await,
        Commands::Settings(args) => settings(args, &store),
    }
}

fn settings(args: SettingsArgs, store: &SettingsStore) -> Result<()> {
    if let Some(name) = args.name {
        store.set_display_name(Some(name).filter(|n| !n.trim().is_empty()));
    }
    if let Some(enabled) = args.mic_on_join {
        store.set_mic_enabled_on_join(enabled);
    }
    if let Some(enabled) = args.camera_on_join {
        store.set_camera_enabled_on_join(enabled);
    }
    if let Some(resolution) = args.resolution {
        let (width, height) = parse_resolution(&resolution)?;
        store.set_camera_resolution(width, height);
    }
    println!("{}", serde_json::to_string_pretty(&store.get())?);
    eprintln!("settings file: {}", store.path().display());
    Ok(())
}

fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let Some((w, h)) = value.split_once(['x', 'X']) else {
        bail!("resolution must look like 1280x720, got {value:?}");
    };
    let width: u32 = w.trim().parse().with_context(|| format!("bad width in {value:?}"))?;
    let height: u32 = h.trim().parse().with_context(|| format!("bad height in {value:?}"))?;
    if width == 0 || height == 0 {
        bail!("resolution must be non-zero");
    }
    Ok((width, height))
}

/// Prints session events to stdout.
struct ConsoleListener {
    json: bool,
}

impl SessionEventListener for ConsoleListener {
    fn on_event(&self, event: SessionEvent) {
        if matches!(event, SessionEvent::ClockTick { .. }) && !self.json {
            return;
        }
        let value = event_json(&event);
        if self.json {
            println!("{value}");
        } else {
            println!("* {} {}", value["type"].as_str().unwrap_or("event"), value["data"]);
        }
    }
}

fn event_json(event: &SessionEvent) -> serde_json::Value {
    match event {
        SessionEvent::ParticipantJoined(p) => json!({"type": "participant_joined", "data": p}),
        SessionEvent::ParticipantLeft(id) => json!({"type": "participant_left", "data": id}),
        SessionEvent::ParticipantUpdated(p) => json!({"type": "participant_updated", "data": p}),
        SessionEvent::ActiveSpeakerChanged(id) => json!({"type": "active_speaker", "data": id}),
        SessionEvent::ChatMessageReceived(m) => json!({"type": "chat_received", "data": m}),
        SessionEvent::ChatMessageSent(m) => json!({"type": "chat_sent", "data": m}),
        SessionEvent::UnreadCountChanged(n) => json!({"type": "unread", "data": n}),
        SessionEvent::CameraError(e) => {
            json!({"type": "camera_error", "data": {"kind": e, "message": e.to_string()}})
        }
        SessionEvent::LocalStreamChanged(id) => json!({"type": "local_stream", "data": id}),
        SessionEvent::ScreenShareChanged(on) => json!({"type": "screen_share", "data": on}),
        SessionEvent::ScreenShareFailed(msg) => json!({"type": "screen_share_failed", "data": msg}),
        SessionEvent::PanelChanged(panel) => json!({"type": "panel", "data": panel}),
        SessionEvent::PinChanged(id) => json!({"type": "pin", "data": id}),
        SessionEvent::VirtualBackgroundChanged(mode) => {
            json!({"type": "virtual_background", "data": mode})
        }
        SessionEvent::ClockTick { elapsed_seconds } => {
            json!({"type": "clock", "data": huddle_core::session::format_clock(*elapsed_seconds)})
        }
        SessionEvent::ControlsVisibilityChanged(visible) => {
            json!({"type": "controls_visible", "data": visible})
        }
        SessionEvent::LayoutChanged(spec) => json!({"type": "layout", "data": spec}),
        SessionEvent::Left => json!({"type": "left", "data": null}),
    }
}

const HELP: &str = "\
commands:
  m v s c p b l         shortcuts: mute, video, share, chat, participants, background, leave
  pin <id>              pin or unpin a participant
  bg none|blur|background
  say <text>            send a chat message
  recv <id> <text>      simulate an inbound message
  join <id> <name>      simulate a participant joining
  drop <id>             simulate a participant leaving
  hide | show           page visibility
  move                  pointer activity
  camera <device-id>    switch camera
  state | grid | toolbar | people | chat | devices
  help | leave";

async fn join(args: JoinArgs, store: SettingsStore) -> Result<()> {
    let settings = store.get();
    let mut config = SessionConfig::from_settings(&args.title, &args.code, &settings);
    config.is_recording = args.recording;
    config.start_with_camera |= args.camera;
    config.start_with_mic |= args.mic;
    if let Some(name) = args.name {
        config.local_name = name;
    }

    let roster = if args.alone {
        Vec::new()
    } else {
        SimulatedPeers::demo_roster()
    };
    let peers = Arc::new(match args.seed {
        Some(seed) => SimulatedPeers::seeded(roster, SPEAKER_INTERVAL, seed),
        None => SimulatedPeers::new(roster, SPEAKER_INTERVAL),
    });
    let devices = Arc::new(SimulatedMediaDevices::new());

    let (left_tx, mut left_rx) = oneshot::channel::<()>();
    let session = MeetingSession::new(
        config,
        devices,
        peers.clone(),
        Box::new(move || {
            let _ = left_tx.send(());
        }),
    );
    session.add_listener(Arc::new(ConsoleListener { json: args.json }));
    session.mount().await;

    let mut grid = GridRenderer::new(Arc::new(CanvasStreamFactory));
    if !args.json {
        println!("{HELP}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut left_rx => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    session.leave().await;
                    break;
                };
                if let Err(e) = run_command(&session, &peers, &mut grid, line.trim()).await {
                    eprintln!("error: {e:#}");
                }
            }
        }
    }

    grid.clear();
    // Give listeners a moment to flush the final events.
    tokio::time::sleep(Duration::from_millis(20)).await;
    tracing::info!("session closed");
    Ok(())
}

async fn run_command(
    session: &MeetingSession,
    peers: &SimulatedPeers,
    grid: &mut GridRenderer,
    line: &str,
) -> Result<()> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    session.pointer_moved().await;

    match cmd {
        "" => {}
        "help" | "?" => println!("{HELP}"),
        "leave" | "quit" | "exit" => session.leave().await,
        "pin" => {
            let pinned = session.toggle_pin(rest).await?;
            println!("pinned: {}", pinned.as_deref().unwrap_or("nobody"));
        }
        "bg" => {
            let mode = VirtualBackgroundMode::parse(rest)
                .with_context(|| format!("unknown background {rest:?}"))?;
            session.set_virtual_background(mode).await;
        }
        "say" => {
            session.send_chat_message(rest, None).await?;
        }
        "recv" => {
            let (sender_id, text) = rest.split_once(' ').context("usage: recv <id> <text>")?;
            let name = session
                .participants()
                .await
                .into_iter()
                .find(|p| p.id == sender_id)
                .map(|p| p.display_name)
                .unwrap_or_else(|| sender_id.to_string());
            session
                .receive_chat_message(ChatMessage::new(sender_id, name, text, None))
                .await;
        }
        "join" => {
            let (id, name) = rest.split_once(' ').context("usage: join <id> <name>")?;
            peers.join(Participant {
                is_video_off: false,
                ..Participant::remote(id, name, Role::Attendee)
            });
        }
        "drop" => peers.leave(rest),
        "hide" => session.set_document_hidden(true).await,
        "show" => session.set_document_hidden(false).await,
        "move" => {}
        "camera" => {
            let device = (!rest.is_empty()).then(|| rest.to_string());
            session.select_camera(device).await;
        }
        "state" => println!("{}", serde_json::to_string_pretty(&session.snapshot().await)?),
        "grid" => {
            let rendered = grid.render(&session.tiles().await);
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        "toolbar" => {
            let buttons = ControlBar::buttons(&session.control_bar().await);
            println!("{}", serde_json::to_string_pretty(&buttons)?);
        }
        "people" => {
            println!("{}", serde_json::to_string_pretty(&session.participants_panel().await)?)
        }
        "chat" => println!("{}", serde_json::to_string_pretty(&session.chat_panel().await)?),
        "devices" => {
            let selected = session.preferences().await.selected_camera;
            let options = device_options(
                &session.devices().await,
                DeviceKind::VideoInput,
                selected.as_deref(),
            );
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
        _ => {
            let mut chars = cmd.chars();
            match (chars.next(), chars.next()) {
                (Some(key), None) => {
                    if session.handle_shortcut(key).await.is_none() {
                        bail!("unknown shortcut {key:?}");
                    }
                }
                _ => bail!("unknown command {cmd:?}; try help"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parsing() {
        assert_eq!(parse_resolution("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_resolution(" 640 X 360 ").unwrap(), (640, 360));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn events_have_type_tags() {
        let value = event_json(&SessionEvent::ClockTick { elapsed_seconds: 61 });
        assert_eq!(value["type"], "clock");
        assert_eq!(value["data"], "01:01");
        let value = event_json(&SessionEvent::PinChanged(None));
        assert!(value["data"].is_null());
    }

    #[test]
    fn cli_parses_join_flags() {
        let cli = Cli::try_parse_from(["huddle", "--data-dir", "/tmp/x", "join", "--camera", "--seed", "4"])
            .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Commands::Join(args) => {
                assert!(args.camera);
                assert_eq!(args.seed, Some(4));
                assert_eq!(args.code, "abc-defg-hij");
            }
            Commands::Settings(_) => panic!("expected join"),
        }
    }
}
