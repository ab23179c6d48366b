use log::debug;
use opencv::calib3d;
use opencv::core::{Point2f, Point3f, Vector};
use opencv::prelude::*;

use crate::board::Board;
use crate::calibration::{CameraParameters, mat_values, values_to_mat};
use crate::detection::{BoardCorners, MarkerDetections};
use crate::error::Result;

/// Меньше углов решатель PnP не принимает.
pub const MIN_BOARD_CORNERS: usize = 4;

/// Положение маркера или доски относительно камеры на одном кадре.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseEstimate {
    /// `None` для позы всей доски.
    pub marker_id: Option<i32>,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl PoseEstimate {
    fn from_mats(marker_id: Option<i32>, rvec: &Mat, tvec: &Mat) -> Result<Self> {
        let r = mat_values(rvec)?;
        let t = mat_values(tvec)?;
        Ok(Self {
            marker_id,
            rvec: [r[0], r[1], r[2]],
            tvec: [t[0], t[1], t[2]],
        })
    }

    /// Расстояние от камеры до начала координат объекта.
    pub fn distance(&self) -> f64 {
        self.tvec.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn rvec_mat(&self) -> Result<Mat> {
        values_to_mat(3, 1, &self.rvec)
    }

    pub fn tvec_mat(&self) -> Result<Mat> {
        values_to_mat(3, 1, &self.tvec)
    }
}

/// Проекция точек объекта на изображение при заданной позе.
pub fn project_points(
    camera: &CameraParameters,
    pose: &PoseEstimate,
    points: &[Point3f],
) -> Result<Vec<Point2f>> {
    let object_points = Vector::<Point3f>::from_slice(points);
    let mut image_points = Vector::<Point2f>::new();
    calib3d::project_points_def(
        &object_points,
        &pose.rvec_mat()?,
        &pose.tvec_mat()?,
        &camera.camera_matrix_mat()?,
        &camera.distortion_mat()?,
        &mut image_points,
    )?;
    Ok(image_points.to_vec())
}

pub struct PoseEstimator {
    board: Board,
    camera: CameraParameters,
    marker_length: f32,
    camera_matrix: Mat,
    dist_coeffs: Mat,
}

impl PoseEstimator {
    pub fn new(board: Board, camera: CameraParameters) -> Result<Self> {
        let camera_matrix = camera.camera_matrix_mat()?;
        let dist_coeffs = camera.distortion_mat()?;
        let marker_length = board.spec().marker_length;
        Ok(Self {
            board,
            camera,
            marker_length,
            camera_matrix,
            dist_coeffs,
        })
    }

    /// Отдельные маркеры могут быть напечатаны другого размера, чем на доске.
    pub fn with_marker_length(mut self, marker_length: f32) -> Self {
        self.marker_length = marker_length;
        self
    }

    pub fn camera(&self) -> &CameraParameters {
        &self.camera
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn marker_length(&self) -> f32 {
        self.marker_length
    }

    /// Поза каждого маркера отдельно, без согласования между маркерами.
    pub fn estimate_marker_poses(&self, detections: &MarkerDetections) -> Result<Vec<PoseEstimate>> {
        let half = self.marker_length / 2.0;
        let object_points = Vector::<Point3f>::from_slice(&[
            Point3f::new(-half, half, 0.0),
            Point3f::new(half, half, 0.0),
            Point3f::new(half, -half, 0.0),
            Point3f::new(-half, -half, 0.0),
        ]);

        let mut poses = Vec::with_capacity(detections.len());
        for marker in &detections.markers {
            let image_points = Vector::<Point2f>::from_slice(&marker.corners);
            let mut rvec = Mat::default();
            let mut tvec = Mat::default();
            let solved = calib3d::solve_pnp(
                &object_points,
                &image_points,
                &self.camera_matrix,
                &self.dist_coeffs,
                &mut rvec,
                &mut tvec,
                false,
                calib3d::SOLVEPNP_IPPE_SQUARE,
            )?;
            if !solved {
                debug!("Поза маркера {} не найдена", marker.id);
                continue;
            }
            poses.push(PoseEstimate::from_mats(Some(marker.id), &rvec, &tvec)?);
        }
        Ok(poses)
    }

    /// Поза доски по всем найденным углам. `None`, если углов мало
    /// или решатель не сошёлся: это не ошибка.
    pub fn estimate_board_pose(&self, corners: &BoardCorners) -> Result<Option<PoseEstimate>> {
        if !corners.interpolated || corners.len() < MIN_BOARD_CORNERS {
            return Ok(None);
        }
        let (points, ids) = corners.to_opencv();
        let mut obj_points = Mat::default();
        let mut img_points = Mat::default();
        self.board
            .charuco()
            .match_image_points(&points, &ids, &mut obj_points, &mut img_points)?;
        if (obj_points.total() as usize) < MIN_BOARD_CORNERS {
            return Ok(None);
        }

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = calib3d::solve_pnp(
            &obj_points,
            &img_points,
            &self.camera_matrix,
            &self.dist_coeffs,
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if !solved {
            return Ok(None);
        }
        Ok(Some(PoseEstimate::from_mats(None, &rvec, &tvec)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_translation_norm() {
        let pose = PoseEstimate {
            marker_id: None,
            rvec: [0.0; 3],
            tvec: [3.0, 0.0, 4.0],
        };
        assert!((pose.distance() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn projection_of_axis_point_hits_principal_point() {
        let camera = CameraParameters::pinhole(500.0, 500.0, 320.0, 240.0);
        let pose = PoseEstimate {
            marker_id: None,
            rvec: [0.0; 3],
            tvec: [0.0, 0.0, 2.0],
        };
        let projected = project_points(
            &camera,
            &pose,
            &[Point3f::new(0.0, 0.0, 0.0), Point3f::new(0.2, 0.0, 0.0)],
        )
        .unwrap();
        assert!((projected[0].x - 320.0).abs() < 1e-3);
        assert!((projected[0].y - 240.0).abs() < 1e-3);
        assert!((projected[1].x - 370.0).abs() < 1e-3);
    }

    #[test]
    fn board_pose_needs_enough_corners() {
        let board = Board::new(crate::board::BoardSpec::default()).unwrap();
        let estimator =
            PoseEstimator::new(board, CameraParameters::pinhole(500.0, 500.0, 320.0, 240.0))
                .unwrap();
        assert_eq!(
            estimator
                .estimate_board_pose(&BoardCorners::not_found())
                .unwrap(),
            None
        );
    }
}
