use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};

use super::*;

const LARGE_DISPLAY: DisplaySize = DisplaySize {
    width: 2000.0,
    height: 2000.0,
};

fn render(image: PreviewImage, center: bool, display: DisplaySize) -> (DisplayList, RenderSummary) {
    let mut renderer = PreviewRenderer::new(RendererConfig::default());
    renderer.set_image(image);
    renderer.set_center(center);
    let mut list = DisplayList::default();
    let summary = renderer.render(display, &mut list).expect("image is loaded");
    (list, summary)
}

fn texts(list: &DisplayList) -> Vec<String> {
    list.texts().map(|(_, text)| text.to_string()).collect()
}

fn ruler_lines(list: &DisplayList) -> Vec<(Point, Point)> {
    list.lines()
        .filter(|(_, _, stroke)| stroke.color == Color::BLACK)
        .map(|(from, to, _)| (*from, *to))
        .collect()
}

#[test]
fn downscale_factor_is_smallest_divisor_that_fits_both_axes() {
    // 1000/2 and 1000/3 both exceed a 300 px tall viewport.
    assert_eq!(downscale_factor(1000, 1000, Viewport::new(400.0, 300.0)), 4);
    assert_eq!(downscale_factor(1000, 1000, Viewport::new(500.0, 500.0)), 2);
    assert_eq!(downscale_factor(1000, 400, Viewport::new(400.0, 1000.0)), 3);
    assert_eq!(downscale_factor(250, 250, Viewport::new(400.0, 300.0)), 1);
}

fn stepped_factor(width: u32, height: u32, viewport: Viewport) -> u32 {
    let mut factor = 1;
    while f64::from(width) / f64::from(factor) > viewport.width
        || f64::from(height) / f64::from(factor) > viewport.height
    {
        factor += 1;
    }
    factor
}

#[test]
fn downscale_factor_matches_stepwise_search() {
    let viewports = [
        Viewport::new(1.0, 1.0),
        Viewport::new(7.5, 3.0),
        Viewport::new(300.0, 400.0),
        Viewport::new(333.3, 299.9),
        Viewport::new(800.0, 360.0),
    ];
    for viewport in viewports {
        for width in (1..=2400).step_by(97) {
            for height in [1, 2, 299, 300, 301, 999, 1000, 1001, 2047] {
                assert_eq!(
                    downscale_factor(width, height, viewport),
                    stepped_factor(width, height, viewport),
                    "{width}x{height} in {viewport:?}"
                );
            }
        }
    }
}

#[test]
fn huge_raster_in_tiny_viewport_gets_its_divisor_directly() {
    let dot = Viewport::new(0.5, 0.0);
    assert_eq!(downscale_factor(4_000_000_000, 3, dot), 4_000_000_000);
    assert_eq!(downscale_factor(u32::MAX, u32::MAX, dot), u32::MAX);
    assert_eq!(
        downscale_factor(u32::MAX, 1, Viewport::new(f64::INFINITY, 1.0)),
        1
    );
}

#[test]
fn viewport_is_derived_from_display_and_never_empty() {
    let config = RendererConfig::default();
    let viewport = Viewport::from_display(
        DisplaySize {
            width: 1000.0,
            height: 1000.0,
        },
        &config,
    );
    assert_eq!(viewport.width, 800.0);
    assert_eq!(viewport.height, 360.0);

    let cramped = Viewport::from_display(
        DisplaySize {
            width: 1000.0,
            height: 300.0,
        },
        &config,
    );
    assert_eq!(cramped.height, 1.0);
    assert_eq!(downscale_factor(10, 10, cramped), 10);
}

#[test]
fn draws_one_tick_per_whole_millimeter_with_decade_labels() {
    // 500 x 300 px is 25.4 x 15.2 mm.
    let (list, summary) = render(PreviewImage::blank(500, 300), false, LARGE_DISPLAY);
    assert_eq!(summary.factor, 1);
    assert_eq!(summary.scale, 1.0);

    assert_eq!(ruler_lines(&list).len(), 25 + 15);
    let labels = texts(&list);
    assert_eq!(labels.iter().filter(|t| *t == "10").count(), 2);
    assert_eq!(labels.iter().filter(|t| *t == "20").count(), 1);
    assert!(labels.contains(&"25.4 mm".to_string()));
    assert!(labels.contains(&"15.2 mm".to_string()));
    assert!(labels.contains(&"500".to_string()));
    assert!(labels.contains(&"300".to_string()));
}

#[test]
fn tick_length_grows_at_fifth_and_tenth_millimeter() {
    let (list, _) = render(PreviewImage::blank(500, 300), false, LARGE_DISPLAY);
    let margin = RendererConfig::default().margin;
    let top: Vec<_> = ruler_lines(&list)
        .into_iter()
        .filter(|(from, to)| from.x == to.x)
        .collect();
    assert_eq!(top.len(), 25);
    // index 0 is the first millimeter
    assert_eq!(top[0].0.y, margin / 2.0);
    assert_eq!(top[4].0.y, margin / 4.0);
    assert_eq!(top[9].0.y, 0.0);
    assert!(top.iter().all(|(_, to)| to.y == margin));

    let expected_x = PX_PER_MM + margin;
    assert!((top[0].0.x - expected_x).abs() < 1e-9);
}

#[test]
fn decade_label_at_far_edge_is_suppressed() {
    // 197 px rounds to exactly 10 mm worth of ticks.
    let (list, _) = render(PreviewImage::blank(197, 100), false, LARGE_DISPLAY);
    let labels = texts(&list);
    assert!(!labels.contains(&"10".to_string()));
    assert!(labels.contains(&"10.0 mm".to_string()));
    assert!(labels.contains(&"5.1 mm".to_string()));
}

#[test]
fn physical_size_label_is_drawn_even_below_one_millimeter() {
    let (list, _) = render(PreviewImage::blank(10, 10), false, LARGE_DISPLAY);
    assert!(ruler_lines(&list).is_empty());
    let labels = texts(&list);
    assert_eq!(labels.iter().filter(|t| *t == "0.5 mm").count(), 2);
}

#[test]
fn image_is_scaled_and_offset_by_the_ruler_margin() {
    let display = DisplaySize {
        width: 500.0,
        height: 940.0,
    };
    let (list, summary) = render(PreviewImage::blank(1000, 1000), false, display);
    assert_eq!(summary.viewport, Viewport::new(400.0, 300.0));
    assert_eq!(summary.factor, 4);

    let image_op = list
        .ops
        .iter()
        .find_map(|op| match op {
            DrawOp::Image { dest, .. } => Some(*dest),
            _ => None,
        })
        .expect("image drawn");
    assert_eq!(
        image_op,
        Rect {
            x: 16.0,
            y: 16.0,
            width: 250.0,
            height: 250.0,
        }
    );
    assert!(matches!(list.ops[0], DrawOp::Clear { .. }));
}

#[test]
fn crosshair_moves_to_center_when_flag_is_set() {
    let crosshair = |list: &DisplayList| -> Vec<(Point, Point)> {
        list.lines()
            .filter(|(_, _, stroke)| stroke.color == Color::BLUE)
            .map(|(from, to, _)| (*from, *to))
            .collect()
    };

    let (corner, _) = render(PreviewImage::blank(200, 100), false, LARGE_DISPLAY);
    assert_eq!(
        crosshair(&corner),
        vec![
            (Point::new(8.0, 16.0), Point::new(24.0, 16.0)),
            (Point::new(16.0, 8.0), Point::new(16.0, 24.0)),
        ]
    );

    let (centered, _) = render(PreviewImage::blank(200, 100), true, LARGE_DISPLAY);
    assert_eq!(
        crosshair(&centered),
        vec![
            (Point::new(108.0, 66.0), Point::new(124.0, 66.0)),
            (Point::new(116.0, 58.0), Point::new(116.0, 74.0)),
        ]
    );
}

#[test]
fn center_toggle_reports_whether_redraw_is_needed() {
    let mut renderer = PreviewRenderer::default();
    assert!(!renderer.set_center(false));
    assert!(renderer.set_center(true));
    assert!(!renderer.set_center(true));
    assert!(renderer.center());
}

#[test]
fn nothing_is_drawn_before_an_image_loads() {
    let renderer = PreviewRenderer::default();
    let mut list = DisplayList::default();
    assert!(renderer.render(LARGE_DISPLAY, &mut list).is_none());
    assert!(list.ops.is_empty());
}

#[test]
fn rerender_replaces_previous_display_list() {
    let mut renderer = PreviewRenderer::default();
    renderer.set_image(PreviewImage::blank(300, 300));
    let mut list = DisplayList::default();
    renderer.render(LARGE_DISPLAY, &mut list);
    let first_len = list.ops.len();
    renderer.render(LARGE_DISPLAY, &mut list);
    assert_eq!(list.ops.len(), first_len);
}

#[test]
fn decodes_png_bytes_and_rejects_garbage() {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::new(4, 3))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    let image = PreviewImage::decode(&bytes).expect("decode");
    assert_eq!((image.width(), image.height()), (4, 3));

    assert!(PreviewImage::decode(b"not an image").is_err());
}
