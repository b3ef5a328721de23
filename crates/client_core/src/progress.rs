//! Splits inbound log messages into progress updates and scrollback lines.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use shared::protocol::LogMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    #[default]
    None,
    /// Image rows are being sent to the device.
    Transfer,
    /// The device reports burn progress.
    Engrave,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProgressState {
    pub fraction: Option<f64>,
    pub phase: ProgressPhase,
}

impl ProgressState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.fraction.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub received_at: DateTime<Utc>,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Demuxed {
    Progress(ProgressState),
    Log(LogEntry),
}

fn progress_pattern() -> &'static Regex {
    static PROGRESS: OnceLock<Regex> = OnceLock::new();
    PROGRESS.get_or_init(|| {
        Regex::new(r"^\r(sending: )?([0-9]{1,3})% done\s*$").expect("invalid regex pattern")
    })
}

/// Classifies one message: either a progress update or a log line, never both.
pub fn demux(message: &LogMessage) -> Demuxed {
    if let Some(caps) = progress_pattern().captures(&message.content) {
        let percent: u16 = caps[2].parse().unwrap_or_default();
        let phase = if caps.get(1).is_some() {
            ProgressPhase::Transfer
        } else {
            ProgressPhase::Engrave
        };
        return Demuxed::Progress(ProgressState {
            fraction: Some((f64::from(percent) / 100.0).min(1.0)),
            phase,
        });
    }
    Demuxed::Log(LogEntry {
        received_at: Utc::now(),
        line: format!("[{}] {}", message.severity, message.content),
    })
}

/// Scrollback of plain log lines plus the current progress.
#[derive(Debug, Default)]
pub struct ProgressLog {
    progress: ProgressState,
    entries: Vec<LogEntry>,
}

impl ProgressLog {
    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn ingest(&mut self, message: &LogMessage) -> Demuxed {
        let demuxed = demux(message);
        match &demuxed {
            Demuxed::Progress(progress) => self.progress = *progress,
            Demuxed::Log(entry) => self.entries.push(entry.clone()),
        }
        demuxed
    }

    /// Returns true when progress was active and has been cleared.
    pub fn reset_progress(&mut self) -> bool {
        let was_active = self.progress != ProgressState::default();
        self.progress.reset();
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(content: &str) -> LogMessage {
        LogMessage::new("INFO", content)
    }

    #[test]
    fn transfer_marker_selects_transfer_phase() {
        let Demuxed::Progress(progress) = demux(&info("\rsending: 42% done")) else {
            panic!("expected progress");
        };
        assert_eq!(progress.fraction, Some(0.42));
        assert_eq!(progress.phase, ProgressPhase::Transfer);
    }

    #[test]
    fn plain_percentage_is_engrave_phase() {
        let Demuxed::Progress(progress) = demux(&info("\r7% done")) else {
            panic!("expected progress");
        };
        assert_eq!(progress.fraction, Some(0.07));
        assert_eq!(progress.phase, ProgressPhase::Engrave);
    }

    #[test]
    fn zero_padded_percentage_from_device_is_accepted() {
        let Demuxed::Progress(progress) = demux(&info("\r07% done")) else {
            panic!("expected progress");
        };
        assert_eq!(progress.fraction, Some(0.07));
    }

    #[test]
    fn ordinary_text_goes_to_the_log_verbatim() {
        let Demuxed::Log(entry) = demux(&info("hello world")) else {
            panic!("expected log entry");
        };
        assert_eq!(entry.line, "[INFO] hello world");
    }

    #[test]
    fn progress_requires_leading_control_character() {
        assert!(matches!(demux(&info("42% done")), Demuxed::Log(_)));
        assert!(matches!(demux(&info("\r1234% done")), Demuxed::Log(_)));
    }

    #[test]
    fn out_of_range_percentage_is_clamped() {
        let Demuxed::Progress(progress) = demux(&info("\r150% done")) else {
            panic!("expected progress");
        };
        assert_eq!(progress.fraction, Some(1.0));
    }

    #[test]
    fn log_either_appends_or_updates_progress() {
        let mut log = ProgressLog::default();
        log.ingest(&info("\rsending: 10% done"));
        assert!(log.entries().is_empty());
        assert_eq!(log.progress().phase, ProgressPhase::Transfer);

        log.ingest(&LogMessage::new("WARN", "value 2000 to high"));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.progress().fraction, Some(0.1));

        assert!(log.reset_progress());
        assert!(!log.progress().is_active());
        assert!(!log.reset_progress());
    }
}
