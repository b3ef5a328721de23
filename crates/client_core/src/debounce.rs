//! Per-field debouncing of preview parameters.
//!
//! Each debounced field owns an explicit timer: an edit cancels the pending deadline and
//! schedules a new one a quiet period later. The owner drives time by calling
//! [`ParameterPipeline::poll`] at or after [`ParameterPipeline::next_deadline`].

use std::time::Duration;

use serde::Serialize;
use shared::domain::EngraveMode;
use tokio::time::Instant;

use crate::transform::{Mirror, Rotation, TransformState};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(T, Instant)>,
    last_emitted: Option<T>,
}

impl<T: Clone + PartialEq> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            last_emitted: None,
        }
    }

    pub fn edit(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.quiet));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Yields the surviving value once its quiet period has elapsed, unless it equals the
    /// previously emitted one.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => {}
            _ => return None,
        }
        let (value, _) = self.pending.take()?;
        if self.last_emitted.as_ref() == Some(&value) {
            return None;
        }
        self.last_emitted = Some(value.clone());
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewField {
    Width,
    Height,
    Text,
    Contrast,
    Brightness,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    Width(u32),
    Height(u32),
    Text(String),
    Contrast(f64),
    Brightness(f64),
}

impl FieldEdit {
    pub fn field(&self) -> PreviewField {
        match self {
            FieldEdit::Width(_) => PreviewField::Width,
            FieldEdit::Height(_) => PreviewField::Height,
            FieldEdit::Text(_) => PreviewField::Text,
            FieldEdit::Contrast(_) => PreviewField::Contrast,
            FieldEdit::Brightness(_) => PreviewField::Brightness,
        }
    }
}

/// Snapshot of everything the image endpoints need. Not retained after use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRequest {
    pub mode: EngraveMode,
    pub width: u32,
    pub height: u32,
    pub text: Option<String>,
    pub font: Option<String>,
    pub transformation: String,
    pub contrast: f64,
    pub brightness: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewParams {
    pub mode: EngraveMode,
    pub width: u32,
    pub height: u32,
    pub text: String,
    pub font: String,
    pub contrast: f64,
    pub brightness: f64,
}

impl Default for PreviewParams {
    fn default() -> Self {
        Self {
            mode: EngraveMode::Image,
            width: 250,
            height: 250,
            text: "Hello world!".to_string(),
            font: String::new(),
            contrast: 0.0,
            brightness: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterPipeline {
    params: PreviewParams,
    transform: TransformState,
    width: Debouncer<u32>,
    height: Debouncer<u32>,
    text: Debouncer<String>,
    contrast: Debouncer<f64>,
    brightness: Debouncer<f64>,
}

impl Default for ParameterPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD, PreviewParams::default())
    }
}

impl ParameterPipeline {
    pub fn new(quiet: Duration, params: PreviewParams) -> Self {
        Self {
            params,
            transform: TransformState::default(),
            width: Debouncer::new(quiet),
            height: Debouncer::new(quiet),
            text: Debouncer::new(quiet),
            contrast: Debouncer::new(quiet),
            brightness: Debouncer::new(quiet),
        }
    }

    pub fn params(&self) -> &PreviewParams {
        &self.params
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    /// Applies the value right away; regeneration waits for the field's quiet period.
    pub fn edit(&mut self, edit: FieldEdit, now: Instant) {
        match edit {
            FieldEdit::Width(value) => {
                self.params.width = value;
                self.width.edit(value, now);
            }
            FieldEdit::Height(value) => {
                self.params.height = value;
                self.height.edit(value, now);
            }
            FieldEdit::Text(value) => {
                self.params.text = value.clone();
                self.text.edit(value, now);
            }
            FieldEdit::Contrast(value) => {
                self.params.contrast = value;
                self.contrast.edit(value, now);
            }
            FieldEdit::Brightness(value) => {
                self.params.brightness = value;
                self.brightness.edit(value, now);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.width.deadline(),
            self.height.deadline(),
            self.text.deadline(),
            self.contrast.deadline(),
            self.brightness.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fires expired timers. Several fields expiring together still yield one request.
    pub fn poll(&mut self, now: Instant) -> Option<PreviewRequest> {
        let fired = [
            self.width.poll(now).is_some(),
            self.height.poll(now).is_some(),
            self.text.poll(now).is_some(),
            self.contrast.poll(now).is_some(),
            self.brightness.poll(now).is_some(),
        ];
        fired.contains(&true).then(|| self.request())
    }

    pub fn set_mode(&mut self, mode: EngraveMode) -> PreviewRequest {
        self.params.mode = mode;
        self.request()
    }

    pub fn set_font(&mut self, font: impl Into<String>) -> PreviewRequest {
        self.params.font = font.into();
        self.request()
    }

    pub fn rotate(&mut self, direction: Rotation) -> PreviewRequest {
        self.transform.rotate(direction);
        self.request()
    }

    pub fn toggle_mirror(&mut self, bit: Mirror) -> PreviewRequest {
        self.transform.toggle_mirror(bit);
        self.request()
    }

    pub fn request(&self) -> PreviewRequest {
        let text_mode = self.params.mode == EngraveMode::Text;
        PreviewRequest {
            mode: self.params.mode,
            width: self.params.width,
            height: self.params.height,
            text: text_mode.then(|| self.params.text.clone()),
            font: text_mode.then(|| self.params.font.clone()),
            transformation: self.transform.transformation(),
            contrast: self.params.contrast,
            brightness: self.params.brightness,
        }
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
