//! Bounding-box crops masked by the detection outline

use crate::models::{BoundingBox, Detection};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use tracing::{debug, warn};

const MASK_ON: Luma<u8> = Luma([255]);

/// Slice `[y, y + height) x [x, x + width)` out of `image` and zero every
/// pixel outside the detection's polygon.
///
/// Boxes carry their centre in `(x, y)`, so the slice starts at the centre.
/// It is clipped to the image and may be smaller than the box near the right
/// and bottom borders. Empty or degenerate outlines give an all-zero crop.
pub fn crop_region(image: &RgbImage, detection: &Detection) -> RgbImage {
    let (x, y, width, height) = clip_box(&detection.bbox, image.width(), image.height());
    let mut crop = image::imageops::crop_imm(image, x, y, width, height).to_image();

    let mask = polygon_mask(&detection.polygon, width, height);
    apply_mask(&mut crop, &mask);
    crop
}

/// Clip a box to `[0, width) x [0, height)`, returning `(x, y, w, h)`.
pub fn clip_box(bbox: &BoundingBox, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let clamp = |v: i64, hi: u32| v.clamp(0, hi as i64) as u32;

    let x0 = clamp(bbox.x as i64, width);
    let y0 = clamp(bbox.y as i64, height);
    let x1 = clamp(bbox.x as i64 + bbox.width.max(0) as i64, width);
    let y1 = clamp(bbox.y as i64 + bbox.height.max(0) as i64, height);

    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

/// Rasterize a polygon into a `width x height` mask (255 inside, boundary
/// included). The polygon is first moved so its own minimum corner sits at
/// the origin.
pub fn polygon_mask(polygon: &[[i32; 2]], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 || polygon.is_empty() {
        return mask;
    }

    let points = normalize_polygon(polygon);
    match points.len() {
        0 => {}
        1 => {
            let p = points[0];
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
                mask.put_pixel(p.x as u32, p.y as u32, MASK_ON);
            }
        }
        2 => {
            debug!("Outline collapsed to a segment, drawing a line");
            draw_line_segment_mut(
                &mut mask,
                (points[0].x as f32, points[0].y as f32),
                (points[1].x as f32, points[1].y as f32),
                MASK_ON,
            );
        }
        _ => draw_polygon_mut(&mut mask, &points, MASK_ON),
    }

    mask
}

/// Translate to the local frame and drop repeated vertices. The polygon
/// drawer rejects outlines whose last vertex repeats the first.
fn normalize_polygon(polygon: &[[i32; 2]]) -> Vec<Point<i32>> {
    let min_x = polygon.iter().map(|p| p[0]).min().unwrap_or(0);
    let min_y = polygon.iter().map(|p| p[1]).min().unwrap_or(0);

    let mut points: Vec<Point<i32>> = Vec::with_capacity(polygon.len());
    for p in polygon {
        let point = Point::new(p[0] - min_x, p[1] - min_y);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    if points.len() < polygon.len() {
        debug!(
            "Outline reduced from {} to {} vertices",
            polygon.len(),
            points.len()
        );
    }
    points
}

/// Zero the pixels of `crop` where `mask` is 0. Both must share dimensions.
pub fn apply_mask(crop: &mut RgbImage, mask: &GrayImage) {
    if crop.dimensions() != mask.dimensions() {
        warn!(
            "Mask {:?} does not match crop {:?}, zeroing the crop",
            mask.dimensions(),
            crop.dimensions()
        );
        crop.pixels_mut().for_each(|p| *p = Rgb([0, 0, 0]));
        return;
    }

    for (pixel, m) in crop.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            *pixel = Rgb([0, 0, 0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(bbox: BoundingBox, polygon: Vec<[i32; 2]>) -> Detection {
        Detection {
            bbox,
            polygon,
            class_id: 0,
            confidence: 0.9,
        }
    }

    fn square(x: i32, y: i32, side: i32) -> Vec<[i32; 2]> {
        vec![[x, y], [x + side - 1, y], [x + side - 1, y + side - 1], [x, y + side - 1]]
    }

    #[test]
    fn test_full_square_mask_keeps_everything() {
        let image = RgbImage::from_pixel(20, 20, Rgb([10, 20, 30]));
        let det = detection(BoundingBox::new(5, 5, 8, 8), square(5, 5, 8));
        let crop = crop_region(&image, &det);

        assert_eq!(crop.dimensions(), (8, 8));
        assert!(crop.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn test_empty_polygon_zeroes_crop() {
        let image = RgbImage::from_pixel(10, 10, Rgb([200, 200, 200]));
        let det = detection(BoundingBox::new(0, 0, 10, 10), vec![]);
        let crop = crop_region(&image, &det);

        assert_eq!(crop.dimensions(), (10, 10));
        assert!(crop.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_triangle_zeroes_outside() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let det = detection(
            BoundingBox::new(0, 0, 10, 10),
            vec![[0, 0], [9, 0], [0, 9]],
        );
        let crop = crop_region(&image, &det);

        assert_eq!(*crop.get_pixel(0, 0), Rgb([255, 255, 255]));
        assert_eq!(*crop.get_pixel(9, 9), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_polygon_moved_to_own_minimum() {
        // Outline in source coordinates far from the origin.
        let mask = polygon_mask(&square(100, 200, 4), 4, 4);
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_closed_polygon_repeating_first_vertex() {
        let mut outline = square(0, 0, 5);
        outline.push(outline[0]);
        let mask = polygon_mask(&outline, 5, 5);
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_single_point_polygon() {
        let mask = polygon_mask(&[[7, 7], [7, 7], [7, 7]], 3, 3);
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 1);
    }

    #[test]
    fn test_two_point_polygon_draws_segment() {
        let mask = polygon_mask(&[[0, 0], [4, 0]], 5, 5);
        for x in 0..5 {
            assert_eq!(mask.get_pixel(x, 0)[0], 255);
        }
        assert_eq!(mask.get_pixel(0, 1)[0], 0);
    }

    #[test]
    fn test_box_clipped_to_image() {
        let image = RgbImage::from_pixel(10, 10, Rgb([1, 1, 1]));
        let det = detection(BoundingBox::new(6, 6, 10, 10), square(6, 6, 4));
        let crop = crop_region(&image, &det);
        assert_eq!(crop.dimensions(), (4, 4));
    }

    #[test]
    fn test_box_outside_image_is_empty() {
        let image = RgbImage::from_pixel(10, 10, Rgb([1, 1, 1]));
        let det = detection(BoundingBox::new(20, 20, 5, 5), square(20, 20, 5));
        let crop = crop_region(&image, &det);
        assert_eq!(crop.dimensions(), (0, 0));
    }

    #[test]
    fn test_slice_starts_at_box_centre() {
        // Object spans (10, 10)-(19, 19); its box centre is (15, 15).
        let image = RgbImage::from_pixel(20, 20, Rgb([40, 80, 120]));
        let det = detection(
            BoundingBox::new(15, 15, 10, 10),
            vec![[10, 10], [19, 10], [10, 19]],
        );
        let crop = crop_region(&image, &det);

        assert_eq!(crop.dimensions(), (5, 5));
        let lit = crop.pixels().filter(|p| **p != Rgb([0, 0, 0])).count();
        assert_eq!(lit, 25);
    }

    #[test]
    fn test_clip_box_negative_origin() {
        let bbox = BoundingBox::new(-3, -2, 6, 6);
        assert_eq!(clip_box(&bbox, 10, 10), (0, 0, 3, 4));
    }

    #[test]
    fn test_apply_mask_dimension_mismatch_zeroes() {
        let mut crop = RgbImage::from_pixel(3, 3, Rgb([9, 9, 9]));
        let mask = GrayImage::from_pixel(2, 2, Luma([255]));
        apply_mask(&mut crop, &mask);
        assert!(crop.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
