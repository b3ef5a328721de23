//! Pixel/millimeter conversion at the device's fixed 500 dpi resolution.

use std::sync::OnceLock;

use regex::Regex;
pub use shared::domain::PX_PER_MM;

pub fn mm_to_px(mm: f64) -> i64 {
    (mm * PX_PER_MM).round() as i64
}

pub fn px_to_mm(px: i64) -> f64 {
    px as f64 / PX_PER_MM
}

/// `"12.7 mm"`, one decimal.
pub fn format_mm(px: i64) -> String {
    format!("{:.1} mm", px_to_mm(px))
}

/// Signed pixel displacement for a move of `distance_mm`.
pub fn displacement_px(distance_mm: f64) -> i64 {
    mm_to_px(distance_mm)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Left,
    Right,
    Up,
    Down,
}

impl MoveDirection {
    /// `(dx, dy)` in pixels. Up and left are negative.
    pub fn delta(self, distance_mm: f64) -> (i64, i64) {
        match self {
            MoveDirection::Right => (displacement_px(distance_mm), 0),
            MoveDirection::Left => (displacement_px(-distance_mm), 0),
            MoveDirection::Down => (0, displacement_px(distance_mm)),
            MoveDirection::Up => (0, displacement_px(-distance_mm)),
        }
    }
}

fn mm_pattern() -> &'static Regex {
    static MM: OnceLock<Regex> = OnceLock::new();
    MM.get_or_init(|| Regex::new(r"^([0-9]+(.[0-9]*)?) *mm$").expect("invalid regex pattern"))
}

fn px_pattern() -> &'static Regex {
    static PX: OnceLock<Regex> = OnceLock::new();
    PX.get_or_init(|| Regex::new(r"^([0-9]+) *(px)?$").expect("invalid regex pattern"))
}

/// Parses `"12.5mm"`, `"12 mm"`, `"250"` or `"250 px"` into pixels.
pub fn parse_size(input: &str) -> Option<u32> {
    if let Some(caps) = mm_pattern().captures(input) {
        let mm: f64 = caps[1].parse().ok()?;
        return u32::try_from(mm_to_px(mm)).ok();
    }
    let caps = px_pattern().captures(input)?;
    caps[1].parse().ok()
}

/// A size field that keeps its last valid value when given unparseable input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeInput {
    value: u32,
    info: String,
}

impl SizeInput {
    pub fn new(value: u32) -> Self {
        Self {
            value,
            info: format_mm(i64::from(value)),
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    /// Returns the new pixel value when the input was understood.
    pub fn update(&mut self, input: &str) -> Option<u32> {
        let value = parse_size(input.trim())?;
        self.value = value;
        self.info = format_mm(i64::from(value));
        Some(value)
    }
}
