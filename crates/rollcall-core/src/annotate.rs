//! Drawing recognition results onto an image.

use crate::types::BoundingBox;
use image::{Rgb, RgbImage};

pub const RECOGNIZED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;

/// Draw a hollow rectangle outline for `bbox`, clipped to the image.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || thickness == 0 {
        return;
    }

    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);
    let left = clamp_x(bbox.x);
    let top = clamp_y(bbox.y);
    let right = clamp_x(bbox.x + bbox.width);
    let bottom = clamp_y(bbox.y + bbox.height);
    if right < left || bottom < top {
        return;
    }

    for t in 0..thickness {
        for x in left..=right {
            if let Some(y) = top.checked_add(t).filter(|&y| y <= bottom) {
                image.put_pixel(x, y, color);
            }
            if let Some(y) = bottom.checked_sub(t).filter(|&y| y >= top) {
                image.put_pixel(x, y, color);
            }
        }
        for y in top..=bottom {
            if let Some(x) = left.checked_add(t).filter(|&x| x <= right) {
                image.put_pixel(x, y, color);
            }
            if let Some(x) = right.checked_sub(t).filter(|&x| x >= left) {
                image.put_pixel(x, y, color);
            }
        }
    }
}
