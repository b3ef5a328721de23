//! The synchronous heart of the client. Every input (an inbound frame, a user action, an expired
//! debounce timer, a finished preview load, the font list) is turned into [`Effects`]: commands
//! to put on the wire, at most one preview fetch to start, and events to publish.

use shared::{
    domain::{CenterAxis, EngraveMode, FontEntry},
    protocol::{Command, EngraveArgs, Frame, FrameArgs, LogMessage, StatusSnapshot},
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    command_state::{CommandStateMachine, Enablement},
    connection::LinkState,
    debounce::{FieldEdit, ParameterPipeline, PreviewField, PreviewParams, PreviewRequest},
    error::ClientResult,
    progress::{Demuxed, LogEntry, ProgressLog, ProgressState},
    render::{DisplayList, DisplaySize, PreviewImage, PreviewRenderer, RenderSummary},
    settings::ClientSettings,
    transform::{Mirror, Rotation},
    units::{MoveDirection, SizeInput},
};

/// Everything a front end can ask of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    RequestStatus,
    Fan(bool),
    Home,
    Connect,
    Disconnect,
    Move(MoveDirection),
    SetMoveDistance(f64),
    SetUseCenter(bool),
    SetCenterAxis(Option<CenterAxis>),
    Frame,
    SetPower(u8),
    SetDepth(u8),
    Engrave,
    StopEngraving,
    /// Raw size text such as `"250"` or `"12.7 mm"`.
    EditWidth(String),
    EditHeight(String),
    EditText(String),
    EditContrast(f64),
    EditBrightness(f64),
    SetMode(EngraveMode),
    SelectFont(String),
    Rotate(Rotation),
    ToggleMirror(Mirror),
    Resize(DisplaySize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        status: StatusSnapshot,
        enablement: Enablement,
    },
    CommandSent {
        name: String,
        enablement: Enablement,
    },
    ProgressChanged(ProgressState),
    LogAppended(LogEntry),
    /// Hint for a front end to follow the tail of the log.
    ScrollToBottom,
    SizeInfo {
        field: PreviewField,
        info: String,
    },
    PreviewRequested(PreviewRequest),
    PreviewRendered {
        display_list: DisplayList,
        summary: RenderSummary,
    },
    PreviewFailed(String),
    FontsUpdated {
        fonts: Vec<FontEntry>,
        selected: String,
    },
}

/// A preview fetch tagged with the generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewTicket {
    pub generation: u64,
    pub request: PreviewRequest,
}

#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub commands: Vec<Command>,
    pub preview: Option<PreviewTicket>,
    pub events: Vec<SessionEvent>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.preview.is_none() && self.events.is_empty()
    }
}

pub struct EngraverSession {
    machine: CommandStateMachine,
    log: ProgressLog,
    pipeline: ParameterPipeline,
    renderer: PreviewRenderer,
    display: DisplaySize,
    fonts: Vec<FontEntry>,
    width_input: SizeInput,
    height_input: SizeInput,
    move_distance_mm: f64,
    power: u8,
    depth: u8,
    use_center: bool,
    center_axis: Option<CenterAxis>,
    saved_axis: Option<CenterAxis>,
    preview_generation: u64,
    link_up: bool,
    link_dropped: bool,
}

impl Default for EngraverSession {
    fn default() -> Self {
        Self::new(&ClientSettings::default())
    }
}

impl EngraverSession {
    pub fn new(settings: &ClientSettings) -> Self {
        let params = PreviewParams::default();
        Self {
            machine: CommandStateMachine::new(),
            log: ProgressLog::default(),
            width_input: SizeInput::new(params.width),
            height_input: SizeInput::new(params.height),
            pipeline: ParameterPipeline::new(settings.debounce(), params),
            renderer: PreviewRenderer::new(settings.renderer_config()),
            display: settings.display_size(),
            fonts: Vec::new(),
            move_distance_mm: settings.move_distance_mm,
            power: settings.power.min(100),
            depth: settings.depth.min(100),
            use_center: false,
            center_axis: None,
            saved_axis: None,
            preview_generation: 0,
            link_up: false,
            link_dropped: false,
        }
    }

    pub fn status(&self) -> &StatusSnapshot {
        self.machine.status()
    }

    pub fn enablement(&self) -> Enablement {
        self.machine.enablement()
    }

    pub fn outstanding_commands(&self) -> u32 {
        self.machine.outstanding()
    }

    pub fn progress(&self) -> ProgressState {
        self.log.progress()
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        self.log.entries()
    }

    pub fn params(&self) -> &PreviewParams {
        self.pipeline.params()
    }

    pub fn transformation(&self) -> String {
        self.pipeline.transform().transformation()
    }

    pub fn fonts(&self) -> &[FontEntry] {
        &self.fonts
    }

    pub fn selected_font(&self) -> &str {
        &self.pipeline.params().font
    }

    pub fn renderer(&self) -> &PreviewRenderer {
        &self.renderer
    }

    pub fn width_info(&self) -> &str {
        self.width_input.info()
    }

    pub fn height_info(&self) -> &str {
        self.height_input.info()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pipeline.next_deadline()
    }

    /// Asks the device for its first status and requests the initial preview.
    pub fn start(&mut self) -> Effects {
        let mut effects = Effects::default();
        self.send(Command::status(), &mut effects);
        let request = self.pipeline.request();
        self.request_preview(request, &mut effects);
        effects
    }

    pub fn on_frame(&mut self, frame: Frame) -> Effects {
        let mut effects = Effects::default();
        match frame {
            Frame::Status(status) => self.on_status(status, &mut effects),
            Frame::Message(message) => self.on_message(&message, &mut effects),
            Frame::Command(command) => {
                debug!(command = %command.name, "ignoring command frame from device");
            }
        }
        effects
    }

    fn on_status(&mut self, status: StatusSnapshot, effects: &mut Effects) {
        let engraving = status.engraving;
        let enablement = self.machine.on_status(status.clone());
        debug!(
            connected = status.connected,
            framing = status.framing,
            engraving,
            "status received"
        );
        effects.events.push(SessionEvent::StatusChanged { status, enablement });
        if !engraving && self.log.reset_progress() {
            effects
                .events
                .push(SessionEvent::ProgressChanged(self.log.progress()));
        }
    }

    fn on_message(&mut self, message: &LogMessage, effects: &mut Effects) {
        match self.log.ingest(message) {
            Demuxed::Progress(progress) => {
                effects.events.push(SessionEvent::ProgressChanged(progress));
            }
            Demuxed::Log(entry) => {
                effects.events.push(SessionEvent::LogAppended(entry));
                effects.events.push(SessionEvent::ScrollToBottom);
            }
        }
    }

    /// Tracks the control link. Losing it marks the device disconnected without touching the
    /// command lock; coming back after an outage asks for a fresh status.
    pub fn on_link(&mut self, link: LinkState) -> Effects {
        let mut effects = Effects::default();
        match link {
            LinkState::Connected => {
                if self.link_dropped {
                    info!("control link restored; requesting status");
                    self.send(Command::status(), &mut effects);
                }
                self.link_up = true;
                self.link_dropped = false;
            }
            LinkState::Idle | LinkState::Connecting { .. } | LinkState::Closed => {
                // A status may report a connection before the link change is observed.
                if self.link_up || self.machine.status().connected {
                    self.link_up = false;
                    self.link_dropped = true;
                    let enablement = self.machine.on_link_lost();
                    warn!(?link, locked = enablement.locked, "control link lost");
                    effects.events.push(SessionEvent::StatusChanged {
                        status: self.machine.status().clone(),
                        enablement,
                    });
                }
            }
        }
        effects
    }

    pub fn on_action(&mut self, action: UiAction, now: Instant) -> Effects {
        let mut effects = Effects::default();
        match action {
            UiAction::RequestStatus => self.send(Command::status(), &mut effects),
            UiAction::Fan(on) => self.send(Command::fan(on), &mut effects),
            UiAction::Home => self.send(Command::home(), &mut effects),
            UiAction::Connect => self.send(Command::connect(), &mut effects),
            UiAction::Disconnect => self.send(Command::disconnect(), &mut effects),
            UiAction::Move(direction) => {
                let (dx, dy) = direction.delta(self.move_distance_mm);
                self.send(Command::move_by(dx, dy), &mut effects);
            }
            UiAction::SetMoveDistance(mm) => {
                if mm.is_finite() && mm > 0.0 {
                    self.move_distance_mm = mm;
                } else {
                    warn!(mm, "ignoring non-positive move distance");
                }
            }
            UiAction::SetUseCenter(use_center) => {
                self.use_center = use_center;
                if self.renderer.set_center(use_center) {
                    self.render_into(&mut effects);
                }
            }
            UiAction::SetCenterAxis(axis) => self.center_axis = axis,
            UiAction::Frame => {
                let command = self.frame_command();
                self.send(command, &mut effects);
            }
            UiAction::SetPower(power) => self.power = power.min(100),
            UiAction::SetDepth(depth) => self.depth = depth.min(100),
            UiAction::Engrave => {
                let command = self.engrave_command();
                self.send(command, &mut effects);
            }
            UiAction::StopEngraving => self.send(Command::stop_engraving(), &mut effects),
            UiAction::EditWidth(raw) => {
                if let Some(value) = self.width_input.update(&raw) {
                    self.pipeline.edit(FieldEdit::Width(value), now);
                    effects.events.push(SessionEvent::SizeInfo {
                        field: PreviewField::Width,
                        info: self.width_input.info().to_string(),
                    });
                } else {
                    debug!(input = %raw, "ignoring unparseable width");
                }
            }
            UiAction::EditHeight(raw) => {
                if let Some(value) = self.height_input.update(&raw) {
                    self.pipeline.edit(FieldEdit::Height(value), now);
                    effects.events.push(SessionEvent::SizeInfo {
                        field: PreviewField::Height,
                        info: self.height_input.info().to_string(),
                    });
                } else {
                    debug!(input = %raw, "ignoring unparseable height");
                }
            }
            UiAction::EditText(text) => self.pipeline.edit(FieldEdit::Text(text), now),
            UiAction::EditContrast(value) => self.pipeline.edit(FieldEdit::Contrast(value), now),
            UiAction::EditBrightness(value) => {
                self.pipeline.edit(FieldEdit::Brightness(value), now)
            }
            UiAction::SetMode(mode) => {
                let request = self.pipeline.set_mode(mode);
                self.request_preview(request, &mut effects);
            }
            UiAction::SelectFont(font) => {
                let request = self.pipeline.set_font(font);
                self.request_preview(request, &mut effects);
            }
            UiAction::Rotate(direction) => {
                let request = self.pipeline.rotate(direction);
                self.request_preview(request, &mut effects);
            }
            UiAction::ToggleMirror(bit) => {
                let request = self.pipeline.toggle_mirror(bit);
                self.request_preview(request, &mut effects);
            }
            // Takes effect on the next render; resizing alone never redraws.
            UiAction::Resize(display) => self.display = display,
        }
        effects
    }

    /// Fires any debounce timers that have expired by `now`.
    pub fn on_deadline(&mut self, now: Instant) -> Effects {
        let mut effects = Effects::default();
        if let Some(request) = self.pipeline.poll(now) {
            self.request_preview(request, &mut effects);
        }
        effects
    }

    /// Installs the font list, selecting the first entry when nothing is selected yet.
    pub fn on_fonts(&mut self, fonts: Vec<FontEntry>) -> Effects {
        let mut effects = Effects::default();
        let auto_select = self
            .selected_font()
            .is_empty()
            .then(|| fonts.first().map(|font| font.file.clone()))
            .flatten();
        self.fonts = fonts;
        if let Some(file) = auto_select {
            info!(font = %file, "selecting first available font");
            let request = self.pipeline.set_font(file);
            if request.mode == EngraveMode::Text {
                self.request_preview(request, &mut effects);
            }
        }
        effects.events.push(SessionEvent::FontsUpdated {
            fonts: self.fonts.clone(),
            selected: self.selected_font().to_string(),
        });
        effects
    }

    /// Accepts the bytes of a finished fetch. Results of superseded requests are dropped.
    pub fn on_preview_loaded(&mut self, generation: u64, result: ClientResult<Vec<u8>>) -> Effects {
        let mut effects = Effects::default();
        if generation != self.preview_generation {
            debug!(
                generation,
                current = self.preview_generation,
                "dropping stale preview"
            );
            return effects;
        }
        let decoded = result.and_then(|bytes| PreviewImage::decode(&bytes));
        match decoded {
            Ok(image) => {
                self.renderer.set_image(image);
                self.render_into(&mut effects);
            }
            Err(err) => {
                warn!(generation, error = %err, "preview load failed; keeping previous image");
                effects
                    .events
                    .push(SessionEvent::PreviewFailed(err.to_string()));
            }
        }
        effects
    }

    /// Renders the current image into a fresh display list.
    pub fn render(&self) -> Option<(DisplayList, RenderSummary)> {
        let mut display_list = DisplayList::default();
        let summary = self.renderer.render(self.display, &mut display_list)?;
        Some((display_list, summary))
    }

    fn render_into(&self, effects: &mut Effects) {
        if let Some((display_list, summary)) = self.render() {
            effects.events.push(SessionEvent::PreviewRendered {
                display_list,
                summary,
            });
        }
    }

    fn request_preview(&mut self, request: PreviewRequest, effects: &mut Effects) {
        self.preview_generation += 1;
        effects
            .events
            .push(SessionEvent::PreviewRequested(request.clone()));
        effects.preview = Some(PreviewTicket {
            generation: self.preview_generation,
            request,
        });
    }

    fn send(&mut self, command: Command, effects: &mut Effects) {
        self.machine.on_send();
        effects.events.push(SessionEvent::CommandSent {
            name: command.name.clone(),
            enablement: self.machine.enablement(),
        });
        effects.commands.push(command);
    }

    fn frame_command(&mut self) -> Command {
        let params = self.pipeline.params();
        let (fx, fy) = (params.width, params.height);
        match self.center_axis {
            Some(axis) => {
                self.saved_axis = Some(axis);
                Command::frame_start(FrameArgs {
                    fx,
                    fy,
                    use_center: self.use_center,
                    center_axis: Some(axis),
                })
            }
            None => Command::frame_stop(FrameArgs {
                fx,
                fy,
                use_center: self.use_center,
                center_axis: self.saved_axis,
            }),
        }
    }

    fn engrave_command(&self) -> Command {
        let params = self.pipeline.params();
        Command::engrave(EngraveArgs {
            mode: params.mode,
            use_center: self.use_center,
            trf: self.pipeline.transform().transformation(),
            width: params.width,
            height: params.height,
            power: self.power,
            depth: self.depth,
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
