use serde::{Deserialize, Serialize};

/// Device resolution: 500 dots per inch.
pub const PX_PER_MM: f64 = 500.0 / 25.4;

/// Axis the device centers the frame/engraving on when `useCenter` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterAxis {
    X,
    Y,
    Xy,
}

impl CenterAxis {
    /// Case-insensitive; anything other than `x`, `y` or `xy` is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "x" => Some(CenterAxis::X),
            "y" => Some(CenterAxis::Y),
            "xy" => Some(CenterAxis::Xy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CenterAxis::X => "x",
            CenterAxis::Y => "y",
            CenterAxis::Xy => "xy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngraveMode {
    #[default]
    Image,
    Text,
}

impl EngraveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EngraveMode::Image => "image",
            EngraveMode::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontEntry {
    pub name: String,
    pub file: String,
}
