//! Realtime control client for a network-attached laser engraver.

pub mod api;
pub mod command_state;
pub mod connection;
pub mod debounce;
pub mod error;
pub mod event_loop;
pub mod progress;
pub mod render;
pub mod session;
pub mod settings;
pub mod transform;
pub mod units;

pub use api::{websocket_url, EngraverApi, PreviewBackend};
pub use command_state::{CommandPhase, CommandStateMachine, Enablement};
pub use connection::{CommandSender, ConnectionManager, InboundFrames, LinkState, RetryPolicy};
pub use debounce::{FieldEdit, ParameterPipeline, PreviewParams, PreviewRequest};
pub use error::{ClientError, ClientResult};
pub use event_loop::{run_event_loop, EventLoop};
pub use progress::{LogEntry, ProgressLog, ProgressPhase, ProgressState};
pub use render::{DisplayList, DisplaySize, DrawOp, DrawSurface, PreviewImage, PreviewRenderer};
pub use session::{Effects, EngraverSession, SessionEvent, UiAction};
pub use settings::{load_settings, ClientSettings};
pub use transform::{Mirror, Rotation, TransformState};
pub use units::{MoveDirection, SizeInput};
