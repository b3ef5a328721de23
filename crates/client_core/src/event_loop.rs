//! Drives an [`EngraverSession`] from its asynchronous sources on a single task.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    api::PreviewBackend,
    connection::{CommandSender, InboundFrames, LinkState},
    error::ClientResult,
    session::{Effects, EngraverSession, SessionEvent, UiAction},
};

pub type PreviewLoad = (u64, ClientResult<Vec<u8>>);

pub struct EventLoop<B: PreviewBackend + 'static> {
    pub session: EngraverSession,
    pub backend: Arc<B>,
    pub inbound: InboundFrames,
    pub actions: mpsc::UnboundedReceiver<UiAction>,
    pub commands: CommandSender,
    pub events: broadcast::Sender<SessionEvent>,
    pub link: watch::Receiver<LinkState>,
}

/// Runs until the action channel closes, then hands the session back.
///
/// Each input is handled to completion before the next one is looked at, so the session never
/// sees interleaved updates.
pub async fn run_event_loop<B: PreviewBackend + 'static>(parts: EventLoop<B>) -> EngraverSession {
    let EventLoop {
        mut session,
        backend,
        mut inbound,
        mut actions,
        commands,
        events,
        mut link,
    } = parts;

    let mut loads: JoinSet<PreviewLoad> = JoinSet::new();
    let mut fonts_task = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { backend.fonts().await })
    };
    let mut fonts_pending = true;
    let mut inbound_open = true;
    let mut link_open = true;

    let effects = session.start();
    apply(effects, &backend, &commands, &events, &mut loads);
    let initial = *link.borrow_and_update();
    let effects = session.on_link(initial);
    apply(effects, &backend, &commands, &events, &mut loads);

    loop {
        let deadline = session.next_deadline();
        let effects = tokio::select! {
            frame = inbound.recv(), if inbound_open => match frame {
                Some(frame) => session.on_frame(frame),
                None => {
                    info!("control channel receiver closed");
                    inbound_open = false;
                    continue;
                }
            },
            changed = link.changed(), if link_open => match changed {
                Ok(()) => {
                    let state = *link.borrow_and_update();
                    session.on_link(state)
                }
                Err(_) => {
                    debug!("link state sender dropped");
                    link_open = false;
                    continue;
                }
            },
            action = actions.recv() => match action {
                Some(action) => session.on_action(action, Instant::now()),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                session.on_deadline(Instant::now())
            }
            Some(joined) = loads.join_next(), if !loads.is_empty() => match joined {
                Ok((generation, result)) => session.on_preview_loaded(generation, result),
                Err(err) => {
                    warn!(error = %err, "preview load task failed");
                    continue;
                }
            },
            fonts = &mut fonts_task, if fonts_pending => {
                fonts_pending = false;
                match fonts {
                    Ok(Ok(fonts)) => {
                        info!(count = fonts.len(), "font list loaded");
                        session.on_fonts(fonts)
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "font list unavailable; using server default");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "font fetch task failed");
                        continue;
                    }
                }
            }
        };
        apply(effects, &backend, &commands, &events, &mut loads);
    }

    // Nothing spawned here may outlive the loop.
    if fonts_pending {
        fonts_task.abort();
        let _ = fonts_task.await;
    }
    loads.shutdown().await;
    session
}

fn apply<B: PreviewBackend + 'static>(
    effects: Effects,
    backend: &Arc<B>,
    commands: &CommandSender,
    events: &broadcast::Sender<SessionEvent>,
    loads: &mut JoinSet<PreviewLoad>,
) {
    for command in effects.commands {
        commands.send(command);
    }
    if let Some(ticket) = effects.preview {
        debug!(generation = ticket.generation, mode = ticket.request.mode.as_str(), "loading preview");
        let backend = Arc::clone(backend);
        loads.spawn(async move {
            let result = backend.fetch_preview(&ticket.request).await;
            (ticket.generation, result)
        });
    }
    for event in effects.events {
        // No subscribers is fine; events are informational.
        let _ = events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/event_loop_tests.rs"]
mod tests;
