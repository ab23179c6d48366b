//! Отрисовка результатов поверх кадра. На возвращаемые данные не влияет.

use opencv::calib3d;
use opencv::core::{Point, Point2f, Point3f, Scalar, Vector, no_array};
use opencv::imgproc;
use opencv::objdetect::{draw_detected_corners_charuco, draw_detected_markers};
use opencv::prelude::*;

use crate::calibration::CameraParameters;
use crate::detection::{BoardCorners, MarkerDetections};
use crate::error::Result;
use crate::pose::{PoseEstimate, project_points};

// Цвета в BGR
fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 255.0)
}

fn blue() -> Scalar {
    Scalar::new(255.0, 0.0, 0.0, 255.0)
}

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 255.0)
}

fn yellow() -> Scalar {
    Scalar::new(0.0, 255.0, 255.0, 255.0)
}

/// Цветная копия кадра, чтобы было на чём рисовать цветом.
pub fn to_color(image: &Mat) -> Result<Mat> {
    if image.channels() == 3 {
        return Ok(image.clone());
    }
    let mut color = Mat::default();
    imgproc::cvt_color_def(image, &mut color, imgproc::COLOR_GRAY2BGR)?;
    Ok(color)
}

fn to_pixel(p: Point2f) -> Point {
    Point::new(p.x as i32, p.y as i32)
}

pub fn draw_markers(image: &mut Mat, detections: &MarkerDetections) -> Result<()> {
    if detections.is_empty() {
        return Ok(());
    }
    let (corners, ids) = detections.to_opencv();
    draw_detected_markers(image, &corners, &ids, green())?;
    Ok(())
}

/// Контур, центр и номер каждого маркера.
pub fn draw_marker_outlines(image: &mut Mat, detections: &MarkerDetections) -> Result<()> {
    for marker in &detections.markers {
        let pts = marker.corners.map(to_pixel);
        for i in 0..4 {
            imgproc::line(image, pts[i], pts[(i + 1) % 4], green(), 2, imgproc::LINE_8, 0)?;
        }
        let center = Point::new((pts[0].x + pts[2].x) / 2, (pts[0].y + pts[2].y) / 2);
        imgproc::circle(image, center, 4, red(), -1, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            image,
            &marker.id.to_string(),
            Point::new(pts[0].x, pts[0].y - 15),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            green(),
            2,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn draw_board_corners(image: &mut Mat, corners: &BoardCorners) -> Result<()> {
    if !corners.interpolated {
        return Ok(());
    }
    let (points, ids) = corners.to_opencv();
    draw_detected_corners_charuco(image, &points, &ids, green())?;
    Ok(())
}

/// Оси системы координат объекта: X красная, Y зелёная, Z синяя.
pub fn draw_axes(
    image: &mut Mat,
    camera: &CameraParameters,
    pose: &PoseEstimate,
    length: f32,
    thickness: i32,
) -> Result<()> {
    calib3d::draw_frame_axes(
        image,
        &camera.camera_matrix_mat()?,
        &camera.distortion_mat()?,
        &pose.rvec_mat()?,
        &pose.tvec_mat()?,
        length,
        thickness,
    )?;
    Ok(())
}

/// Углы маркера точками.
pub fn draw_marker_corners(image: &mut Mat, detections: &MarkerDetections) -> Result<()> {
    for marker in &detections.markers {
        for corner in marker.corners {
            imgproc::circle(image, to_pixel(corner), 2, yellow(), -1, imgproc::LINE_8, 0)?;
        }
    }
    Ok(())
}

/// Параллелепипед над объектом: основание залито зелёным,
/// рёбра синие, верхняя грань красная.
pub fn draw_pose_box(
    image: &mut Mat,
    camera: &CameraParameters,
    pose: &PoseEstimate,
    half_size: f32,
) -> Result<()> {
    let s = half_size;
    let h = 2.0 * half_size;
    let corners = [
        Point3f::new(-s, s, 0.0),
        Point3f::new(s, s, 0.0),
        Point3f::new(s, -s, 0.0),
        Point3f::new(-s, -s, 0.0),
        Point3f::new(-s, s, h),
        Point3f::new(s, s, h),
        Point3f::new(s, -s, h),
        Point3f::new(-s, -s, h),
    ];
    let projected: Vec<Point> = project_points(camera, pose, &corners)?
        .into_iter()
        .map(to_pixel)
        .collect();

    let floor: Vector<Vector<Point>> = Vector::from_iter([Vector::from_slice(&projected[..4])]);
    imgproc::draw_contours(
        image,
        &floor,
        -1,
        green(),
        -1,
        imgproc::LINE_8,
        &no_array(),
        i32::MAX,
        Point::default(),
    )?;
    for i in 0..4 {
        imgproc::line(image, projected[i], projected[i + 4], blue(), 2, imgproc::LINE_8, 0)?;
    }
    let top: Vector<Vector<Point>> = Vector::from_iter([Vector::from_slice(&projected[4..])]);
    imgproc::draw_contours(
        image,
        &top,
        -1,
        red(),
        2,
        imgproc::LINE_8,
        &no_array(),
        i32::MAX,
        Point::default(),
    )?;
    Ok(())
}

pub fn pose_text(pose: &PoseEstimate) -> String {
    format!(
        "({:.2}, {:.2}, {:.2}) [m] | Camera distance: {:.2} m",
        pose.tvec[0],
        pose.tvec[1],
        pose.tvec[2],
        pose.distance()
    )
}

pub fn draw_pose_text(image: &mut Mat, pose: &PoseEstimate) -> Result<()> {
    let origin = Point::new(10, image.rows() - 15);
    put_line(image, &pose_text(pose), origin)
}

/// Строка состояния в верхнем левом углу.
pub fn draw_status(image: &mut Mat, text: &str) -> Result<()> {
    put_line(image, text, Point::new(10, 25))
}

fn put_line(image: &mut Mat, text: &str, origin: Point) -> Result<()> {
    imgproc::put_text(
        image,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        green(),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
