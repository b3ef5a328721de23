//! Preview rendering: fits the device raster into the viewport and overlays a millimeter ruler
//! and the reference-point crosshair.
//!
//! Drawing goes through [`DrawSurface`]; [`DisplayList`] records the calls so a front end can
//! replay them on whatever canvas it owns.

use image::RgbaImage;
use serde::Serialize;

use crate::{error::ClientResult, units::PX_PER_MM};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 0xff };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stroke {
    pub color: Color,
    pub width: f64,
    pub alpha: f64,
}

impl Stroke {
    const RULER: Stroke = Stroke {
        color: Color::BLACK,
        width: 1.0,
        alpha: 1.0,
    };
    const CROSSHAIR: Stroke = Stroke {
        color: Color::BLUE,
        width: 3.0,
        alpha: 0.8,
    };
}

const RULER_FONT_PX: f64 = 8.0;
const DIMENSION_FONT_PX: f64 = 12.0;

pub trait DrawSurface {
    fn clear(&mut self, width: f64, height: f64);
    fn line(&mut self, from: Point, to: Point, stroke: Stroke);
    fn text(&mut self, at: Point, text: &str, font_px: f64);
    fn image(&mut self, dest: Rect, image: &PreviewImage);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear {
        width: f64,
        height: f64,
    },
    Line {
        from: Point,
        to: Point,
        stroke: Stroke,
    },
    Text {
        at: Point,
        text: String,
        font_px: f64,
    },
    Image {
        dest: Rect,
        source_width: u32,
        source_height: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayList {
    pub ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn texts(&self) -> impl Iterator<Item = (&Point, &str)> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { at, text, .. } => Some((at, text.as_str())),
            _ => None,
        })
    }

    pub fn lines(&self) -> impl Iterator<Item = (&Point, &Point, &Stroke)> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Line { from, to, stroke } => Some((from, to, stroke)),
            _ => None,
        })
    }
}

impl DrawSurface for DisplayList {
    fn clear(&mut self, width: f64, height: f64) {
        // Everything drawn before a clear is gone.
        self.ops.clear();
        self.ops.push(DrawOp::Clear { width, height });
    }

    fn line(&mut self, from: Point, to: Point, stroke: Stroke) {
        self.ops.push(DrawOp::Line { from, to, stroke });
    }

    fn text(&mut self, at: Point, text: &str, font_px: f64) {
        self.ops.push(DrawOp::Text {
            at,
            text: text.to_string(),
            font_px,
        });
    }

    fn image(&mut self, dest: Rect, image: &PreviewImage) {
        self.ops.push(DrawOp::Image {
            dest,
            source_width: image.width(),
            source_height: image.height(),
        });
    }
}

/// A decoded preview raster in device pixels.
#[derive(Debug, Clone)]
pub struct PreviewImage {
    pixels: RgbaImage,
}

impl PreviewImage {
    pub fn decode(bytes: &[u8]) -> ClientResult<Self> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self {
            pixels: decoded.to_rgba8(),
        })
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RendererConfig {
    /// Ruler band width, also the crosshair span.
    pub margin: f64,
    /// Display height kept for the controls.
    pub reserved: f64,
    pub width_factor: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            margin: 16.0,
            reserved: 640.0,
            width_factor: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn from_display(display: DisplaySize, config: &RendererConfig) -> Self {
        Self::new(
            display.width * config.width_factor,
            display.height - config.reserved,
        )
    }
}

/// Smallest integer divisor that fits the image inside the viewport.
pub fn downscale_factor(width: u32, height: u32, viewport: Viewport) -> u32 {
    let viewport = Viewport::new(viewport.width, viewport.height);
    let fits = |factor: u32| {
        f64::from(width) / f64::from(factor) <= viewport.width
            && f64::from(height) / f64::from(factor) <= viewport.height
    };
    let estimate = (f64::from(width) / viewport.width)
        .ceil()
        .max((f64::from(height) / viewport.height).ceil())
        .max(1.0);
    // Float casts saturate; the nudges below absorb rounding in the estimate.
    let mut factor = estimate as u32;
    while factor < u32::MAX && !fits(factor) {
        factor += 1;
    }
    while factor > 1 && fits(factor - 1) {
        factor -= 1;
    }
    factor
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderSummary {
    pub viewport: Viewport,
    pub factor: u32,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Default)]
pub struct PreviewRenderer {
    config: RendererConfig,
    image: Option<PreviewImage>,
    center: bool,
}

impl PreviewRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            image: None,
            center: false,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn image(&self) -> Option<&PreviewImage> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: PreviewImage) {
        self.image = Some(image);
    }

    pub fn center(&self) -> bool {
        self.center
    }

    /// Returns true when the flag changed and the preview needs redrawing.
    pub fn set_center(&mut self, center: bool) -> bool {
        if center == self.center {
            return false;
        }
        self.center = center;
        true
    }

    pub fn render<S: DrawSurface>(
        &self,
        display: DisplaySize,
        surface: &mut S,
    ) -> Option<RenderSummary> {
        let image = self.image.as_ref()?;
        let margin = self.config.margin;
        let viewport = Viewport::from_display(display, &self.config);
        let factor = downscale_factor(image.width(), image.height(), viewport);
        let scale = 1.0 / f64::from(factor);
        let scaled_width = f64::from(image.width()) * scale;
        let scaled_height = f64::from(image.height()) * scale;

        surface.clear(viewport.width + margin, viewport.height + margin);
        self.draw_ruler(Axis::Horizontal, image.width(), scale, surface);
        self.draw_ruler(Axis::Vertical, image.height(), scale, surface);
        surface.image(
            Rect {
                x: margin,
                y: margin,
                width: scaled_width,
                height: scaled_height,
            },
            image,
        );
        self.draw_reference_point(scaled_width, scaled_height, surface);

        let width = f64::from(image.width());
        let height = f64::from(image.height());
        surface.text(
            Point::new(
                scaled_width + margin + 8.0,
                scale * (height + margin) / 2.0 + 8.0,
            ),
            &image.height().to_string(),
            DIMENSION_FONT_PX,
        );
        surface.text(
            Point::new(scale * (width + margin) / 2.0, scaled_height + margin + 16.0),
            &image.width().to_string(),
            DIMENSION_FONT_PX,
        );

        Some(RenderSummary {
            viewport,
            factor,
            scale,
        })
    }

    fn draw_ruler<S: DrawSurface>(&self, axis: Axis, length_px: u32, scale: f64, surface: &mut S) {
        let margin = self.config.margin;
        let length = f64::from(length_px);
        let whole_mm = (length / PX_PER_MM).trunc() as u32;
        let step = PX_PER_MM * scale;
        let far_edge = (length * scale).round();

        for mm in 1..=whole_mm {
            let pos = f64::from(mm) * step + margin;
            let start = match mm % 10 {
                0 => {
                    if (f64::from(mm) * step).round() != far_edge {
                        let at = match axis {
                            Axis::Horizontal => Point::new(pos + 2.0, margin / 3.0),
                            Axis::Vertical => Point::new(0.0, pos + 8.0),
                        };
                        surface.text(at, &mm.to_string(), RULER_FONT_PX);
                    }
                    0.0
                }
                5 => margin / 4.0,
                _ => margin / 2.0,
            };
            let (from, to) = match axis {
                Axis::Horizontal => (Point::new(pos, start), Point::new(pos, margin)),
                Axis::Vertical => (Point::new(start, pos), Point::new(margin, pos)),
            };
            surface.line(from, to, Stroke::RULER);
        }

        let label = format!("{:.1} mm", length / PX_PER_MM);
        let at = match axis {
            Axis::Horizontal => Point::new(length * scale + margin + 2.0, margin),
            Axis::Vertical => Point::new(0.0, length * scale + margin + 8.0),
        };
        surface.text(at, &label, RULER_FONT_PX);
    }

    fn draw_reference_point<S: DrawSurface>(
        &self,
        scaled_width: f64,
        scaled_height: f64,
        surface: &mut S,
    ) {
        let margin = self.config.margin;
        let (mut x, mut y) = (margin, margin);
        if self.center {
            x += scaled_width / 2.0;
            y += scaled_height / 2.0;
        }
        let arm = margin / 2.0;
        surface.line(
            Point::new(x - arm, y),
            Point::new(x + arm, y),
            Stroke::CROSSHAIR,
        );
        surface.line(
            Point::new(x, y - arm),
            Point::new(x, y + arm),
            Stroke::CROSSHAIR,
        );
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
