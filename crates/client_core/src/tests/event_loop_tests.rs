use std::{io::Cursor, sync::Mutex, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use image::{ImageFormat, RgbaImage};
use shared::{
    domain::{EngraveMode, FontEntry},
    protocol::{Frame, StatusSnapshot},
};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};

use super::*;
use crate::{
    connection::{ConnectionManager, RetryPolicy},
    debounce::PreviewRequest,
    error::ClientError,
    render::DrawOp,
};

const WAIT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct FakeBackend {
    requests: Mutex<Vec<PreviewRequest>>,
    fonts: Vec<FontEntry>,
    fail_fonts: bool,
    /// Font requests never complete.
    hang_fonts: bool,
}

impl FakeBackend {
    fn requests(&self) -> Vec<PreviewRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl PreviewBackend for FakeBackend {
    async fn fonts(&self) -> ClientResult<Vec<FontEntry>> {
        if self.hang_fonts {
            std::future::pending::<()>().await;
        }
        if self.fail_fonts {
            return Err(ClientError::NotRunning);
        }
        Ok(self.fonts.clone())
    }

    async fn fetch_preview(&self, request: &PreviewRequest) -> ClientResult<Vec<u8>> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut bytes = Vec::new();
        RgbaImage::new(request.width, request.height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        Ok(bytes)
    }
}

struct Harness {
    actions: mpsc::UnboundedSender<UiAction>,
    inbound: mpsc::UnboundedSender<Frame>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    events: broadcast::Receiver<SessionEvent>,
    link: watch::Sender<LinkState>,
    backend: Arc<FakeBackend>,
    task: JoinHandle<EngraverSession>,
}

fn spawn_loop(backend: FakeBackend) -> Harness {
    let backend = Arc::new(backend);
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (commands, outbound) = CommandSender::channel();
    let (events_tx, events) = broadcast::channel(256);
    let (link, link_rx) = watch::channel(LinkState::Connected);
    let task = tokio::spawn(run_event_loop(EventLoop {
        session: EngraverSession::default(),
        backend: Arc::clone(&backend),
        inbound: inbound_rx,
        actions: actions_rx,
        commands,
        events: events_tx,
        link: link_rx,
    }));
    Harness {
        actions: actions_tx,
        inbound: inbound_tx,
        outbound,
        events,
        link,
        backend,
        task,
    }
}

async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_rendered(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::PreviewRendered { .. })
}

#[tokio::test(start_paused = true)]
async fn burst_of_width_edits_fetches_one_preview_with_the_last_value() {
    let mut harness = spawn_loop(FakeBackend::default());
    next_matching(&mut harness.events, is_rendered).await;
    assert_eq!(harness.backend.requests().len(), 1);

    let started = Instant::now();
    for width in [300, 310, 320, 330, 340] {
        harness
            .actions
            .send(UiAction::EditWidth(width.to_string()))
            .expect("loop alive");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness
        .actions
        .send(UiAction::EditWidth("350".into()))
        .expect("loop alive");

    let event = next_matching(&mut harness.events, is_rendered).await;
    assert!(started.elapsed() >= Duration::from_millis(800 + 750));
    let SessionEvent::PreviewRendered { display_list, .. } = event else {
        unreachable!();
    };
    assert!(display_list.ops.iter().any(|op| matches!(
        op,
        DrawOp::Image {
            source_width: 350,
            ..
        }
    )));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let requests = harness.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].width, 350);

    drop(harness.actions);
    let session = harness.task.await.expect("loop task");
    assert_eq!(session.params().width, 350);
}

#[tokio::test(start_paused = true)]
async fn startup_status_is_answered_by_inbound_status_frame() {
    let mut harness = spawn_loop(FakeBackend::default());

    let first = timeout(WAIT, harness.outbound.recv())
        .await
        .expect("timed out")
        .expect("status command");
    assert!(matches!(first, Frame::Command(ref command) if command.name == "status"));

    harness
        .inbound
        .send(Frame::Status(StatusSnapshot {
            connected: true,
            ..StatusSnapshot::default()
        }))
        .expect("loop alive");

    let event = next_matching(&mut harness.events, |event| {
        matches!(event, SessionEvent::StatusChanged { .. })
    })
    .await;
    let SessionEvent::StatusChanged { enablement, .. } = event else {
        unreachable!();
    };
    assert!(!enablement.locked);
    assert!(!enablement.total_disabled);

    drop(harness.inbound);
    harness.actions.send(UiAction::Home).expect("loop alive");
    let home = timeout(WAIT, harness.outbound.recv())
        .await
        .expect("timed out")
        .expect("home command");
    assert!(matches!(home, Frame::Command(ref command) if command.name == "home"));

    drop(harness.actions);
    let session = harness.task.await.expect("loop task");
    assert_eq!(session.outstanding_commands(), 1);
}

#[tokio::test(start_paused = true)]
async fn font_list_auto_selects_first_entry() {
    let mut harness = spawn_loop(FakeBackend {
        fonts: vec![
            FontEntry {
                name: "Serif".into(),
                file: "serif.ttf".into(),
            },
            FontEntry {
                name: "Sans".into(),
                file: "sans.ttf".into(),
            },
        ],
        ..FakeBackend::default()
    });

    let event = next_matching(&mut harness.events, |event| {
        matches!(event, SessionEvent::FontsUpdated { .. })
    })
    .await;
    let SessionEvent::FontsUpdated { fonts, selected } = event else {
        unreachable!();
    };
    assert_eq!(fonts.len(), 2);
    assert_eq!(selected, "serif.ttf");

    harness
        .actions
        .send(UiAction::SetMode(EngraveMode::Text))
        .expect("loop alive");
    let event = next_matching(&mut harness.events, |event| {
        matches!(event, SessionEvent::PreviewRequested(request) if request.mode == EngraveMode::Text)
    })
    .await;
    let SessionEvent::PreviewRequested(request) = event else {
        unreachable!();
    };
    assert_eq!(request.font.as_deref(), Some("serif.ttf"));
    assert_eq!(request.text.as_deref(), Some("Hello world!"));
}

#[tokio::test(start_paused = true)]
async fn failed_font_fetch_keeps_server_default() {
    let mut harness = spawn_loop(FakeBackend {
        fail_fonts: true,
        ..FakeBackend::default()
    });
    next_matching(&mut harness.events, is_rendered).await;

    drop(harness.actions);
    let session = harness.task.await.expect("loop task");
    assert_eq!(session.selected_font(), "");
    assert!(session.fonts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_font_fetch_is_cancelled_when_the_loop_ends() {
    let mut harness = spawn_loop(FakeBackend {
        hang_fonts: true,
        ..FakeBackend::default()
    });
    next_matching(&mut harness.events, is_rendered).await;

    drop(harness.actions);
    let session = harness.task.await.expect("loop task");
    assert!(session.fonts().is_empty());
    assert_eq!(Arc::strong_count(&harness.backend), 1);
}

fn is_status(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::StatusChanged { .. })
}

#[tokio::test(start_paused = true)]
async fn link_outage_disables_controls_and_reconnect_refreshes_status() {
    let mut harness = spawn_loop(FakeBackend::default());
    let first = timeout(WAIT, harness.outbound.recv())
        .await
        .expect("timed out")
        .expect("status command");
    assert!(matches!(first, Frame::Command(ref command) if command.name == "status"));
    harness
        .inbound
        .send(Frame::Status(StatusSnapshot {
            connected: true,
            ..StatusSnapshot::default()
        }))
        .expect("loop alive");
    next_matching(&mut harness.events, is_status).await;

    harness.actions.send(UiAction::Home).expect("loop alive");
    next_matching(&mut harness.events, |event| {
        matches!(event, SessionEvent::CommandSent { name, .. } if name == "home")
    })
    .await;

    harness
        .link
        .send(LinkState::Connecting { attempt: 1 })
        .expect("loop alive");
    let event = next_matching(&mut harness.events, is_status).await;
    let SessionEvent::StatusChanged { status, enablement } = event else {
        unreachable!();
    };
    assert!(!status.connected);
    assert!(enablement.total_disabled);
    assert!(enablement.locked);

    harness.link.send(LinkState::Connected).expect("loop alive");
    let mut names = Vec::new();
    while names.last().map(String::as_str) != Some("status") {
        let frame = timeout(WAIT, harness.outbound.recv())
            .await
            .expect("timed out")
            .expect("outbound open");
        if let Frame::Command(command) = frame {
            names.push(command.name);
        }
    }
    assert_eq!(names, vec!["home", "status"]);

    drop(harness.actions);
    let session = harness.task.await.expect("loop task");
    assert_eq!(session.outstanding_commands(), 2);
}

/// Answers every command with a connected status, except `home`, which drops the socket.
async fn flaky_device(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(body) = message else {
            continue;
        };
        let Ok(Frame::Command(command)) = Frame::decode(&body) else {
            continue;
        };
        if command.name == "home" {
            let _ = socket.close().await;
            return;
        }
        let status = Frame::Status(StatusSnapshot {
            connected: true,
            ..StatusSnapshot::default()
        });
        let text = status.encode().expect("encode");
        if socket.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
}

async fn flaky_ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(flaky_device)
}

#[tokio::test]
async fn dropped_socket_reaches_the_session_as_a_disconnected_status() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind device");
    let addr = listener.local_addr().expect("device addr");
    let app = Router::new().route("/ws", get(flaky_ws_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut manager =
        ConnectionManager::new(format!("ws://{addr}/ws"), RetryPolicy::fixed(Duration::from_secs(60)));
    let inbound = manager.take_inbound().expect("inbound");
    manager.connect().expect("connect");

    let (actions, actions_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events) = broadcast::channel(256);
    let task = tokio::spawn(run_event_loop(EventLoop {
        session: EngraverSession::default(),
        backend: Arc::new(FakeBackend::default()),
        inbound,
        actions: actions_rx,
        commands: manager.sender(),
        events: events_tx,
        link: manager.link_state(),
    }));

    next_matching(&mut events, |event| {
        matches!(event, SessionEvent::StatusChanged { status, enablement }
            if status.connected && !enablement.locked)
    })
    .await;

    actions.send(UiAction::Home).expect("loop alive");
    let event = next_matching(&mut events, |event| {
        matches!(event, SessionEvent::StatusChanged { status, .. } if !status.connected)
    })
    .await;
    let SessionEvent::StatusChanged { enablement, .. } = event else {
        unreachable!();
    };
    assert!(enablement.total_disabled);
    assert!(enablement.locked);

    drop(actions);
    let session = task.await.expect("loop task");
    assert_eq!(session.outstanding_commands(), 1);
    manager.shutdown().await;
}
