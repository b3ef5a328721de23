use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, run_event_loop, websocket_url, ClientSettings, ConnectionManager, EngraverApi,
    EngraverSession, EventLoop, Mirror, MoveDirection, PreviewBackend, Rotation, SessionEvent,
    UiAction,
};
use shared::{
    domain::{CenterAxis, EngraveMode},
    protocol::StatusSnapshot,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::{timeout, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "engraver", about = "Control a network-attached laser engraver")]
struct Cli {
    /// Device server, e.g. http://192.168.1.20:8008
    #[arg(long)]
    server_url: Option<String>,
    /// Settings file; defaults to ./engraver.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    debounce_ms: Option<u64>,
    /// How long to wait for the device to answer.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current device status.
    Status,
    Fan {
        #[arg(value_enum)]
        state: Switch,
    },
    Home,
    Connect,
    Disconnect,
    Move {
        #[arg(value_enum)]
        direction: Direction,
        #[arg(long, default_value_t = 1.0)]
        mm: f64,
    },
    /// Start framing along an axis, or stop framing when no axis is given.
    Frame {
        #[arg(long, value_enum)]
        axis: Option<Axis>,
        #[arg(long)]
        use_center: bool,
        #[arg(long)]
        width: Option<String>,
        #[arg(long)]
        height: Option<String>,
    },
    Engrave {
        #[command(flatten)]
        preview: PreviewOpts,
        #[arg(long, default_value_t = 100)]
        power: u8,
        #[arg(long, default_value_t = 10)]
        depth: u8,
        #[arg(long)]
        use_center: bool,
    },
    Stop,
    /// Stream status, progress and log lines until interrupted.
    Watch,
    Fonts,
    Upload {
        path: PathBuf,
    },
    /// Render the preview and print its display list as JSON.
    Preview {
        #[command(flatten)]
        preview: PreviewOpts,
        #[arg(long)]
        use_center: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct PreviewOpts {
    #[arg(long, value_enum, default_value_t = Mode::Image)]
    mode: Mode,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    font: Option<String>,
    /// Pixels, or millimeters with an `mm` suffix.
    #[arg(long)]
    width: Option<String>,
    #[arg(long)]
    height: Option<String>,
    #[arg(long, value_enum)]
    rotate: Vec<Turn>,
    #[arg(long, value_enum)]
    mirror: Vec<Flip>,
    #[arg(long)]
    contrast: Option<f64>,
    #[arg(long)]
    brightness: Option<f64>,
}

impl PreviewOpts {
    fn actions(&self) -> Vec<UiAction> {
        let mut actions = vec![UiAction::SetMode(self.mode.into())];
        if let Some(font) = &self.font {
            actions.push(UiAction::SelectFont(font.clone()));
        }
        if let Some(text) = &self.text {
            actions.push(UiAction::EditText(text.clone()));
        }
        if let Some(width) = &self.width {
            actions.push(UiAction::EditWidth(width.clone()));
        }
        if let Some(height) = &self.height {
            actions.push(UiAction::EditHeight(height.clone()));
        }
        if let Some(contrast) = self.contrast {
            actions.push(UiAction::EditContrast(contrast));
        }
        if let Some(brightness) = self.brightness {
            actions.push(UiAction::EditBrightness(brightness));
        }
        actions.extend(self.rotate.iter().map(|turn| UiAction::Rotate((*turn).into())));
        actions.extend(self.mirror.iter().map(|flip| UiAction::ToggleMirror((*flip).into())));
        actions
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Switch {
    On,
    Off,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl From<Direction> for MoveDirection {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Left => MoveDirection::Left,
            Direction::Right => MoveDirection::Right,
            Direction::Up => MoveDirection::Up,
            Direction::Down => MoveDirection::Down,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Xy,
}

impl From<Axis> for CenterAxis {
    fn from(value: Axis) -> Self {
        match value {
            Axis::X => CenterAxis::X,
            Axis::Y => CenterAxis::Y,
            Axis::Xy => CenterAxis::Xy,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Image,
    Text,
}

impl From<Mode> for EngraveMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Image => EngraveMode::Image,
            Mode::Text => EngraveMode::Text,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Turn {
    Ccw,
    Cw,
}

impl From<Turn> for Rotation {
    fn from(value: Turn) -> Self {
        match value {
            Turn::Ccw => Rotation::CounterClockwise,
            Turn::Cw => Rotation::Clockwise,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Flip {
    Tb,
    Lr,
}

impl From<Flip> for Mirror {
    fn from(value: Flip) -> Self {
        match value {
            Flip::Tb => Mirror::TopBottom,
            Flip::Lr => Mirror::LeftRight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(debounce_ms) = cli.debounce_ms {
        settings.debounce_ms = debounce_ms;
    }
    let wait = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        Command::Status => run_device(&settings, Vec::new(), wait).await,
        Command::Fan { state } => {
            let on = matches!(state, Switch::On);
            run_device(&settings, vec![UiAction::Fan(on)], wait).await
        }
        Command::Home => run_device(&settings, vec![UiAction::Home], wait).await,
        Command::Connect => run_device(&settings, vec![UiAction::Connect], wait).await,
        Command::Disconnect => run_device(&settings, vec![UiAction::Disconnect], wait).await,
        Command::Move { direction, mm } => {
            let actions = vec![
                UiAction::SetMoveDistance(mm),
                UiAction::Move(direction.into()),
            ];
            run_device(&settings, actions, wait).await
        }
        Command::Frame {
            axis,
            use_center,
            width,
            height,
        } => {
            let mut actions = vec![UiAction::SetUseCenter(use_center)];
            actions.extend(width.map(UiAction::EditWidth));
            actions.extend(height.map(UiAction::EditHeight));
            actions.push(UiAction::SetCenterAxis(axis.map(Into::into)));
            actions.push(UiAction::Frame);
            run_device(&settings, actions, wait).await
        }
        Command::Engrave {
            preview,
            power,
            depth,
            use_center,
        } => {
            let mut actions = preview.actions();
            actions.push(UiAction::SetUseCenter(use_center));
            actions.push(UiAction::SetPower(power));
            actions.push(UiAction::SetDepth(depth));
            actions.push(UiAction::Engrave);
            run_device(&settings, actions, wait).await
        }
        Command::Stop => run_device(&settings, vec![UiAction::StopEngraving], wait).await,
        Command::Watch => watch(&settings, wait).await,
        Command::Fonts => {
            let api = EngraverApi::new(&settings.server_url)?;
            let fonts = api.fonts().await?;
            println!("{}", serde_json::to_string_pretty(&fonts)?);
            Ok(())
        }
        Command::Upload { path } => {
            let api = EngraverApi::new(&settings.server_url)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload.png")
                .to_string();
            api.upload(&filename, bytes).await?;
            println!("uploaded {filename}");
            Ok(())
        }
        Command::Preview {
            preview,
            use_center,
        } => render_preview(&settings, &preview, use_center).await,
    }
}

struct Running {
    manager: ConnectionManager,
    actions: mpsc::UnboundedSender<UiAction>,
    events: broadcast::Receiver<SessionEvent>,
    task: tokio::task::JoinHandle<EngraverSession>,
}

fn start_session(settings: &ClientSettings) -> Result<Running> {
    let api = Arc::new(EngraverApi::new(&settings.server_url)?);
    let mut manager = ConnectionManager::new(
        websocket_url(&settings.server_url)?,
        settings.retry_policy(),
    );
    let inbound = manager.take_inbound()?;
    manager.connect()?;

    let (events_tx, events) = broadcast::channel(1024);
    let (actions, actions_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_event_loop(EventLoop {
        session: EngraverSession::new(settings),
        backend: api,
        inbound,
        actions: actions_rx,
        commands: manager.sender(),
        events: events_tx,
        link: manager.link_state(),
    }));
    Ok(Running {
        manager,
        actions,
        events,
        task,
    })
}

impl Running {
    async fn finish(self) -> Result<EngraverSession> {
        drop(self.actions);
        let session = self.task.await.context("session task failed")?;
        self.manager.shutdown().await;
        Ok(session)
    }
}

async fn next_status(
    events: &mut broadcast::Receiver<SessionEvent>,
    wait: Duration,
) -> Result<StatusSnapshot> {
    timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StatusChanged { status, .. }) => return Ok(status),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    bail!("session ended before the device reported status")
                }
            }
        }
    })
    .await
    .context("timed out waiting for device status")?
}

/// Waits for the startup status, issues `actions`, then prints the status that answers them.
async fn run_device(settings: &ClientSettings, actions: Vec<UiAction>, wait: Duration) -> Result<()> {
    let mut running = start_session(settings)?;
    let mut status = next_status(&mut running.events, wait).await?;
    if !actions.is_empty() {
        for action in actions {
            running
                .actions
                .send(action)
                .context("session stopped unexpectedly")?;
        }
        status = next_status(&mut running.events, wait).await?;
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    running.finish().await?;
    Ok(())
}

async fn watch(settings: &ClientSettings, wait: Duration) -> Result<()> {
    let mut running = start_session(settings)?;
    let mut link = running.manager.link_state();
    info!(server_url = %settings.server_url, "watching device; press Ctrl-C to stop");
    let started = Instant::now();
    let mut seen_status = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                info!(?state, "link state changed");
            }
            event = running.events.recv() => match event {
                Ok(SessionEvent::StatusChanged { status, enablement }) => {
                    seen_status = true;
                    println!(
                        "status {} locked={} disabled={}",
                        serde_json::to_string(&status)?,
                        enablement.locked,
                        enablement.total_disabled
                    );
                }
                Ok(SessionEvent::ProgressChanged(progress)) => match progress.fraction {
                    Some(fraction) => println!("progress {:?} {:.0}%", progress.phase, fraction * 100.0),
                    None => println!("progress idle"),
                },
                Ok(SessionEvent::LogAppended(entry)) => {
                    println!("{} {}", entry.received_at.format("%H:%M:%S"), entry.line);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
        if !seen_status && started.elapsed() > wait {
            warn!("no status from device yet; still retrying");
            seen_status = true;
        }
    }

    running.finish().await?;
    Ok(())
}

async fn render_preview(settings: &ClientSettings, opts: &PreviewOpts, use_center: bool) -> Result<()> {
    let api = EngraverApi::new(&settings.server_url)?;
    let mut session = EngraverSession::new(settings);
    let now = Instant::now();

    if opts.mode == Mode::Text && opts.font.is_none() {
        session.on_fonts(api.fonts().await?);
    }
    let mut ticket = None;
    for action in opts.actions() {
        ticket = session.on_action(action, now).preview.or(ticket);
    }
    session.on_action(UiAction::SetUseCenter(use_center), now);
    // Flush debounced edits so the request reflects every option.
    ticket = session
        .on_deadline(now + settings.debounce())
        .preview
        .or(ticket);
    let Some(ticket) = ticket else {
        bail!("no preview request was produced");
    };

    info!(url = %api.preview_url(&ticket.request)?, "fetching preview");
    let bytes = api.fetch_preview(&ticket.request).await;
    let effects = session.on_preview_loaded(ticket.generation, bytes);
    for event in effects.events {
        match event {
            SessionEvent::PreviewRendered {
                display_list,
                summary,
            } => {
                let output = serde_json::json!({
                    "request": ticket.request,
                    "summary": summary,
                    "display_list": display_list,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }
            SessionEvent::PreviewFailed(reason) => bail!("preview failed: {reason}"),
            _ => {}
        }
    }
    bail!("preview produced no output")
}
