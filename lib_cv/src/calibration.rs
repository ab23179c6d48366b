use std::time::{Duration, Instant};

use log::{debug, info, warn};
use opencv::calib3d;
use opencv::core::{CV_64F, Scalar, Size, TermCriteria, TermCriteria_Type, Vector};
use opencv::prelude::*;

use crate::board::Board;
use crate::detection::{BoardCorners, DetectionResult, Detector, MarkerBackend, OpenCvBackend};
use crate::error::{Error, Result};
use crate::source::Frame;

/// Внутренние параметры камеры: матрица 3x3 и коэффициенты дисторсии
/// (k1, k2, p1, p2, k3 для модели по умолчанию).
#[derive(Clone, Debug, PartialEq)]
pub struct CameraParameters {
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion: Vec<f64>,
}

impl CameraParameters {
    /// Идеальная камера-обскура без дисторсии.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            camera_matrix: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            distortion: vec![0.0; 5],
        }
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }

    /// Те же внутренние параметры с нулевой дисторсией
    /// (для кадров, у которых дисторсия уже исправлена).
    pub fn without_distortion(&self) -> Self {
        Self {
            camera_matrix: self.camera_matrix,
            distortion: vec![0.0; self.distortion.len().max(5)],
        }
    }

    pub fn from_mats(camera_matrix: &Mat, distortion: &Mat) -> Result<Self> {
        if camera_matrix.rows() != 3 || camera_matrix.cols() != 3 {
            return Err(Error::Configuration(format!(
                "матрица камеры должна быть 3x3, получено {}x{}",
                camera_matrix.rows(),
                camera_matrix.cols()
            )));
        }
        let values = mat_values(camera_matrix)?;
        let mut matrix = [[0.0; 3]; 3];
        for (i, v) in values.into_iter().enumerate() {
            matrix[i / 3][i % 3] = v;
        }
        Ok(Self {
            camera_matrix: matrix,
            distortion: mat_values(distortion)?,
        })
    }

    pub fn camera_matrix_mat(&self) -> Result<Mat> {
        let values: Vec<f64> = self.camera_matrix.iter().flatten().copied().collect();
        values_to_mat(3, 3, &values)
    }

    /// Коэффициенты дисторсии строкой 1xK.
    pub fn distortion_mat(&self) -> Result<Mat> {
        values_to_mat(1, self.distortion.len() as i32, &self.distortion)
    }

    pub fn undistort(&self, image: &Mat) -> Result<Mat> {
        let mut undistorted = Mat::default();
        calib3d::undistort_def(
            image,
            &mut undistorted,
            &self.camera_matrix_mat()?,
            &self.distortion_mat()?,
        )?;
        Ok(undistorted)
    }
}

/// Все элементы матрицы построчно, приведённые к f64.
pub(crate) fn mat_values(mat: &Mat) -> Result<Vec<f64>> {
    let mut converted = Mat::default();
    mat.convert_to(&mut converted, CV_64F, 1.0, 0.0)?;
    let mut values = Vec::with_capacity((converted.rows() * converted.cols()) as usize);
    for r in 0..converted.rows() {
        for c in 0..converted.cols() {
            values.push(*converted.at_2d::<f64>(r, c)?);
        }
    }
    Ok(values)
}

pub(crate) fn values_to_mat(rows: i32, cols: i32, values: &[f64]) -> Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_64F, Scalar::all(0.0))?;
    for (i, v) in values.iter().enumerate() {
        let i = i as i32;
        *mat.at_2d_mut::<f64>(i / cols, i % cols)? = *v;
    }
    Ok(mat)
}

/// Углы доски с одного принятого кадра.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSample {
    pub frame_index: Option<usize>,
    pub corners: BoardCorners,
    pub image_size: Size,
}

/// Правила приёма кадров в калибровку.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplePolicy {
    /// Сколько кадров нужно для перехода в `Ready`.
    pub min_samples: usize,
    /// Минимум маркеров на кадре.
    pub min_markers: usize,
    /// Минимум углов доски на кадре.
    pub min_corners: usize,
    /// Минимальный интервал между принятыми кадрами (потоковый режим).
    pub min_interval: Option<Duration>,
    /// После стольких кадров сбор останавливается (потоковый режим).
    pub target_samples: Option<usize>,
}

impl Default for SamplePolicy {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_markers: 8,
            min_corners: 4,
            min_interval: None,
            target_samples: None,
        }
    }
}

impl SamplePolicy {
    pub fn streaming(min_samples: usize, min_interval: Duration, target_samples: usize) -> Self {
        Self {
            min_samples,
            min_interval: Some(min_interval),
            target_samples: Some(target_samples),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    Collecting,
    Ready,
    Solved,
}

/// Что стало с кадром после наблюдения.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    Accepted,
    TooFewMarkers,
    NoBoardCorners,
    TooFewCorners,
    TooSoon,
}

/// Набирает кадры доски и один раз решает задачу калибровки.
pub struct CalibrationAccumulator<B: MarkerBackend = OpenCvBackend> {
    board: Board,
    detector: Detector<B>,
    policy: SamplePolicy,
    samples: Vec<CalibrationSample>,
    last_accepted: Option<Instant>,
    frames_seen: usize,
    exhausted: bool,
    solved: Option<CameraParameters>,
    rms_error: Option<f64>,
}

impl<B: MarkerBackend> CalibrationAccumulator<B> {
    pub fn new(board: Board, detector: Detector<B>, policy: SamplePolicy) -> Self {
        Self {
            board,
            detector,
            policy,
            samples: Vec::new(),
            last_accepted: None,
            frames_seen: 0,
            exhausted: false,
            solved: None,
            rms_error: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn detector(&self) -> &Detector<B> {
        &self.detector
    }

    pub fn policy(&self) -> &SamplePolicy {
        &self.policy
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    pub fn state(&self) -> AccumulatorState {
        if self.solved.is_some() {
            AccumulatorState::Solved
        } else if self.samples.len() >= self.policy.min_samples
            || (self.exhausted && !self.samples.is_empty())
        {
            AccumulatorState::Ready
        } else {
            AccumulatorState::Collecting
        }
    }

    pub fn target_reached(&self) -> bool {
        self.policy
            .target_samples
            .is_some_and(|target| self.samples.len() >= target)
    }

    /// Источник кадров исчерпан: можно калибровать по тому, что набрано.
    pub fn finish(&mut self) {
        self.exhausted = true;
    }

    pub fn observe(&mut self, frame: &Frame) -> Result<(Observation, DetectionResult)> {
        self.observe_at(frame, Instant::now())
    }

    pub fn observe_at(
        &mut self,
        frame: &Frame,
        at: Instant,
    ) -> Result<(Observation, DetectionResult)> {
        if self.solved.is_some() {
            return Err(Error::AlreadySolved);
        }
        let detection = self.detector.detect(&frame.image)?;
        let observation = self.accept(&detection, Some(frame.index), at)?;
        Ok((observation, detection))
    }

    /// Наблюдение по уже готовому результату детектора.
    pub fn observe_detection(
        &mut self,
        detection: &DetectionResult,
        at: Instant,
    ) -> Result<Observation> {
        self.accept(detection, None, at)
    }

    fn accept(
        &mut self,
        detection: &DetectionResult,
        frame_index: Option<usize>,
        at: Instant,
    ) -> Result<Observation> {
        if self.solved.is_some() {
            return Err(Error::AlreadySolved);
        }
        self.frames_seen += 1;

        if detection.markers.len() < self.policy.min_markers {
            return Ok(Observation::TooFewMarkers);
        }
        if !detection.board.interpolated {
            return Ok(Observation::NoBoardCorners);
        }
        if detection.board.len() < self.policy.min_corners {
            return Ok(Observation::TooFewCorners);
        }
        if let (Some(interval), Some(last)) = (self.policy.min_interval, self.last_accepted) {
            if at.saturating_duration_since(last) < interval {
                return Ok(Observation::TooSoon);
            }
        }

        self.samples.push(CalibrationSample {
            frame_index,
            corners: detection.board.clone(),
            image_size: detection.image_size,
        });
        self.last_accepted = Some(at);
        debug!(
            "Кадр принят: маркеров {}, углов {}, всего кадров {}",
            detection.markers.len(),
            detection.board.len(),
            self.samples.len()
        );
        Ok(Observation::Accepted)
    }

    /// Калибровка по всем набранным кадрам. Выполняется один раз за сессию.
    pub fn solve(&mut self) -> Result<CameraParameters> {
        match self.state() {
            AccumulatorState::Solved => return Err(Error::AlreadySolved),
            AccumulatorState::Collecting => {
                return Err(Error::InsufficientSamples {
                    collected: self.samples.len(),
                });
            }
            AccumulatorState::Ready => {}
        }

        let image_size = self.samples[0].image_size;
        if let Some(other) = self.samples.iter().find(|s| s.image_size != image_size) {
            return Err(Error::ResolutionMismatch {
                expected: image_size,
                found: other.image_size,
            });
        }

        let mut object_points = Vector::<Mat>::new();
        let mut image_points = Vector::<Mat>::new();
        for sample in &self.samples {
            if sample.corners.is_empty() {
                warn!("Кадр {:?} без углов доски, пропускаем", sample.frame_index);
                continue;
            }
            let (corners, ids) = sample.corners.to_opencv();
            let mut obj_points = Mat::default();
            let mut img_points = Mat::default();
            self.board.charuco().match_image_points(
                &corners,
                &ids,
                &mut obj_points,
                &mut img_points,
            )?;
            if obj_points.empty() || img_points.empty() {
                warn!("Кадр {:?} не сопоставлен с доской, пропускаем", sample.frame_index);
                continue;
            }
            object_points.push(obj_points);
            image_points.push(img_points);
        }
        if object_points.is_empty() {
            warn!("Ни один из {} кадров не сопоставлен с доской", self.samples.len());
            return Err(Error::InsufficientSamples {
                collected: self.samples.len(),
            });
        }

        let mut camera_matrix = Mat::default();
        let mut dist_coeffs = Mat::default();
        let mut r_vecs = Vector::<Mat>::new();
        let mut t_vecs = Vector::<Mat>::new();
        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32,
            30,
            f64::EPSILON,
        )?;

        let stopwatch = Instant::now();
        let rms = calib3d::calibrate_camera(
            &object_points,
            &image_points,
            image_size,
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut r_vecs,
            &mut t_vecs,
            0,
            criteria,
        )?;
        info!(
            "Калибровка по {} кадрам заняла {:?}, ошибка репроекции {:.4} px",
            object_points.len(),
            stopwatch.elapsed(),
            rms
        );

        let parameters = CameraParameters::from_mats(&camera_matrix, &dist_coeffs)?;
        self.rms_error = Some(rms);
        self.solved = Some(parameters.clone());
        Ok(parameters)
    }

    pub fn parameters(&self) -> Option<&CameraParameters> {
        self.solved.as_ref()
    }

    pub fn rms_error(&self) -> Option<f64> {
        self.rms_error
    }
}
