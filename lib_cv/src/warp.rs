use opencv::core::{self, CV_8UC1, Point, Point2f, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{Error, Result};

/// Вклеивает `patch` в `scene` по четырёхугольнику `quad`
/// (углы по порядку: левый верхний, правый верхний, правый нижний, левый нижний).
pub fn overlay_quad(scene: &Mat, patch: &Mat, quad: [Point2f; 4]) -> Result<Mat> {
    if scene.channels() != patch.channels() {
        return Err(Error::Configuration(format!(
            "у сцены {} каналов, у вставки {}",
            scene.channels(),
            patch.channels()
        )));
    }
    let w = patch.cols() as f32;
    let h = patch.rows() as f32;
    let src = Vector::<Point2f>::from_slice(&[
        Point2f::new(0.0, 0.0),
        Point2f::new(w, 0.0),
        Point2f::new(w, h),
        Point2f::new(0.0, h),
    ]);
    let dst = Vector::<Point2f>::from_slice(&quad);
    let homography = imgproc::get_perspective_transform(&src, &dst, core::DECOMP_LU)?;

    let mut warped = Mat::default();
    imgproc::warp_perspective(
        patch,
        &mut warped,
        &homography,
        scene.size()?,
        imgproc::INTER_LINEAR,
        core::BORDER_CONSTANT,
        Scalar::default(),
    )?;

    let mut mask = Mat::zeros(scene.rows(), scene.cols(), CV_8UC1)?.to_mat()?;
    let polygon: Vector<Point> = quad
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    imgproc::fill_convex_poly(&mut mask, &polygon, Scalar::all(255.0), imgproc::LINE_AA, 0)?;

    // Расширяем маску, чтобы край вставки не оставлял щель
    let kernel = imgproc::get_structuring_element(
        imgproc::MORPH_RECT,
        Size::new(3, 3),
        Point::new(-1, -1),
    )?;
    let mut dilated = Mat::default();
    imgproc::dilate(
        &mask,
        &mut dilated,
        &kernel,
        Point::new(-1, -1),
        2,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;

    let mut output = scene.clone();
    warped.copy_to_masked(&mut output, &dilated)?;
    Ok(output)
}
