//! Overlay composition. Pure functions from a snapshot to pixels.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::draw::{draw_label, draw_label_boxed, draw_thick_rectangle, fill_rect, GLYPH_HEIGHT};
use super::{ShelfSummary, VisualSnapshot};
use crate::detect::DetectedObject;
use crate::frame::DepthImage;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;
pub const WAITING_MESSAGE: &str = "WAITING FOR DATA...";
pub const BANNER_HEIGHT: u32 = 80;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const BAR_BACKGROUND: Rgb<u8> = Rgb([100, 100, 100]);
const BAR_RED: Rgb<u8> = Rgb([255, 0, 0]);
const BAR_ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
const BAR_GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Black frame with the waiting message.
pub fn placeholder() -> RgbImage {
    let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    draw_label(&mut image, 50, PLACEHOLDER_HEIGHT as i32 / 2, WAITING_MESSAGE, WHITE);
    image
}

/// Pseudo-color a depth image. Valid (non-zero) samples are scaled linearly
/// between their min and max; an image with no valid sample renders black.
pub fn colorize_depth(depth: &DepthImage) -> RgbImage {
    let valid = depth.pixels().map(|p| p.0[0]).filter(|&mm| mm > 0);
    let (min, max) = valid.fold((u16::MAX, 0u16), |(lo, hi), mm| (lo.min(mm), hi.max(mm)));
    if max == 0 {
        return RgbImage::new(depth.width(), depth.height());
    }

    let span = (max - min) as f32;
    RgbImage::from_fn(depth.width(), depth.height(), |x, y| {
        let mm = depth.get_pixel(x, y).0[0];
        let level = if mm > 0 && span > 0.0 {
            (mm - min) as f32 / span
        } else {
            0.0
        };
        jet(level)
    })
}

/// JET colormap, `level` in [0, 1].
pub fn jet(level: f32) -> Rgb<u8> {
    let v = level.clamp(0.0, 1.0);
    let channel = |center: f32| {
        let c = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Downscale to at most `max_width`, keeping the aspect ratio.
pub fn fit_width(image: &RgbImage, max_width: u32) -> Option<RgbImage> {
    if max_width == 0 || image.width() <= max_width {
        return None;
    }
    let scale = max_width as f64 / image.width() as f64;
    let height = ((image.height() as f64 * scale) as u32).max(1);
    Some(imageops::resize(image, max_width, height, FilterType::Triangle))
}

pub fn usage_bar_color(usage_percentage: f64) -> Rgb<u8> {
    if usage_percentage > 80.0 {
        BAR_RED
    } else if usage_percentage > 60.0 {
        BAR_ORANGE
    } else {
        BAR_GREEN
    }
}

/// Pixel box for an object. A direct linear mapping of position and extent
/// onto the image; not a camera projection.
pub fn object_box(object: &DetectedObject, width: u32, height: u32) -> (i32, i32, i32, i32) {
    let w = width as f64;
    let h = height as f64;
    let center_x = (object.x * w) as i32;
    let center_y = (object.y * h) as i32;
    let half_w = (object.width * w / 2.0) as i32 / 2;
    let half_h = (object.height * h / 2.0) as i32 / 2;
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    (
        (center_x - half_w).max(0),
        (center_y - half_h).max(0),
        (center_x + half_w).min(max_x),
        (center_y + half_h).min(max_y),
    )
}

pub fn annotate_objects(image: &mut RgbImage, objects: &[DetectedObject]) {
    let (width, height) = image.dimensions();
    for object in objects {
        let (x1, y1, x2, y2) = object_box(object, width, height);
        if x2 < x1 || y2 < y1 {
            continue;
        }
        // Green at high confidence, red at low.
        let c = object.confidence.clamp(0.0, 1.0);
        let color = Rgb([(255.0 * (1.0 - c)) as u8, (255.0 * c) as u8, 0]);
        draw_thick_rectangle(image, x1, y1, x2, y2, 2, color);
        let label = format!("{} ({:.2})", object.object_type, object.confidence);
        draw_label_boxed(image, x1, (y1 - GLYPH_HEIGHT - 3).max(0), &label, color, BLACK);
    }
}

/// Prepend the summary banner with the usage bar.
pub fn add_shelf_info(image: &RgbImage, summary: &ShelfSummary) -> RgbImage {
    let width = image.width();
    let mut out = RgbImage::new(width, image.height() + BANNER_HEIGHT);
    imageops::replace(&mut out, image, 0, BANNER_HEIGHT as i64);

    draw_label(&mut out, 10, 10, &format!("SHELF: {}", summary.shelf_id), WHITE);
    let volumes = format!(
        "TOTAL: {:.2} M3 | USED: {:.2} M3 | FREE: {:.2} M3 | OBJECTS: {}",
        summary.total_volume, summary.occupied_volume, summary.free_volume, summary.object_count
    );
    draw_label(&mut out, 10, 30, &volumes, WHITE);

    let bar_x = 10;
    let bar_y = 52;
    let bar_width = (width as f64 * 0.6) as i32;
    let bar_height = 20;
    fill_rect(&mut out, bar_x, bar_y, bar_x + bar_width, bar_y + bar_height, BAR_BACKGROUND);
    let usage = summary.usage_percentage;
    let filled = ((bar_width as f64 * usage / 100.0) as i32).clamp(0, bar_width);
    if filled > 0 {
        fill_rect(&mut out, bar_x, bar_y, bar_x + filled, bar_y + bar_height, usage_bar_color(usage));
    }
    draw_label(
        &mut out,
        bar_x + bar_width + 10,
        bar_y + 6,
        &format!("{:.1}%", usage),
        WHITE,
    );
    out
}

/// Render one overlay frame from a snapshot.
pub fn compose(snapshot: &VisualSnapshot) -> RgbImage {
    let annotated = snapshot.color.as_deref().map(|color| {
        let mut image = color.clone();
        annotate_objects(&mut image, &snapshot.objects);
        image
    });

    let body = match (annotated, snapshot.depth.as_deref()) {
        (None, None) => return placeholder(),
        (Some(color), None) => color,
        (None, Some(depth)) => depth.clone(),
        (Some(color), Some(depth)) => side_by_side(&color, depth),
    };

    match &snapshot.summary {
        Some(summary) => add_shelf_info(&body, summary),
        None => body,
    }
}

fn side_by_side(color: &RgbImage, depth: &RgbImage) -> RgbImage {
    let (w, h) = color.dimensions();
    let resized;
    let depth = if depth.dimensions() != (w, h) {
        resized = imageops::resize(depth, w, h, FilterType::Triangle);
        &resized
    } else {
        depth
    };
    let mut out = RgbImage::new(w * 2, h);
    imageops::replace(&mut out, color, 0, 0);
    imageops::replace(&mut out, depth, w as i64, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::sync::Arc;

    fn object(x: f64, y: f64, confidence: f64) -> DetectedObject {
        DetectedObject {
            id: "o".to_string(),
            x,
            y,
            z: 0.1,
            width: 0.4,
            height: 0.4,
            depth: 0.2,
            confidence,
            object_type: "box".to_string(),
        }
    }

    #[test]
    fn depth_scaling_ignores_invalid_pixels() {
        let mut depth = DepthImage::from_pixel(3, 1, Luma([0]));
        depth.put_pixel(1, 0, Luma([1000]));
        depth.put_pixel(2, 0, Luma([3000]));
        let colored = colorize_depth(&depth);
        assert_eq!(*colored.get_pixel(1, 0), jet(0.0));
        assert_eq!(*colored.get_pixel(2, 0), jet(1.0));
    }

    #[test]
    fn all_invalid_depth_is_black() {
        let colored = colorize_depth(&DepthImage::new(4, 4));
        assert!(colored.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn jet_endpoints() {
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
    }

    #[test]
    fn usage_thresholds() {
        assert_eq!(usage_bar_color(81.0), BAR_RED);
        assert_eq!(usage_bar_color(80.0), BAR_ORANGE);
        assert_eq!(usage_bar_color(61.0), BAR_ORANGE);
        assert_eq!(usage_bar_color(60.0), BAR_GREEN);
    }

    #[test]
    fn object_box_is_linear_and_clamped() {
        assert_eq!(object_box(&object(0.5, 0.5, 0.9), 100, 100), (40, 40, 60, 60));
        assert_eq!(object_box(&object(1.5, 0.0, 0.9), 100, 100), (140, 0, 99, 10));
    }

    #[test]
    fn compose_handles_missing_data() {
        let empty = VisualSnapshot::default();
        assert_eq!(compose(&empty).dimensions(), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));

        let snapshot = VisualSnapshot {
            color: Some(Arc::new(RgbImage::new(40, 30))),
            depth: Some(Arc::new(RgbImage::new(20, 15))),
            objects: vec![object(0.5, 0.5, 0.9)],
            summary: Some(ShelfSummary {
                shelf_id: "A1".to_string(),
                total_volume: 1.0,
                occupied_volume: 0.9,
                free_volume: 0.1,
                usage_percentage: 90.0,
                object_count: 1,
            }),
        };
        let frame = compose(&snapshot);
        assert_eq!(frame.dimensions(), (80, 30 + BANNER_HEIGHT));
        // Usage bar starts red at 90%.
        assert_eq!(*frame.get_pixel(12, 60), BAR_RED);
    }
}
