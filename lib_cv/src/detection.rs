use log::trace;
use opencv::core::{Point2f, Size, Vector};
use opencv::objdetect::{ArucoDetector, CharucoDetector, DetectorParameters, RefineParameters};
use opencv::prelude::*;

use crate::board::Board;
use crate::error::Result;

/// Маркер, найденный на кадре. Углы в порядке OpenCV:
/// левый верхний, правый верхний, правый нижний, левый нижний.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectedMarker {
    pub id: i32,
    pub corners: [Point2f; 4],
}

impl DetectedMarker {
    pub fn center(&self) -> Point2f {
        let sum = self
            .corners
            .iter()
            .fold(Point2f::new(0.0, 0.0), |acc, p| Point2f::new(acc.x + p.x, acc.y + p.y));
        Point2f::new(sum.x / 4.0, sum.y / 4.0)
    }
}

/// Все маркеры кадра. Пустой результат - нормальный исход, не ошибка.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerDetections {
    pub markers: Vec<DetectedMarker>,
}

impl MarkerDetections {
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.markers.iter().map(|m| m.id).collect()
    }

    pub fn from_opencv(corners: &Vector<Vector<Point2f>>, ids: &Vector<i32>) -> Result<Self> {
        let mut markers = Vec::with_capacity(ids.len());
        for (quad, id) in corners.iter().zip(ids.iter()) {
            if quad.len() != 4 {
                continue;
            }
            markers.push(DetectedMarker {
                id,
                corners: [quad.get(0)?, quad.get(1)?, quad.get(2)?, quad.get(3)?],
            });
        }
        Ok(Self { markers })
    }

    pub fn to_opencv(&self) -> (Vector<Vector<Point2f>>, Vector<i32>) {
        let corners = self
            .markers
            .iter()
            .map(|m| Vector::from_slice(&m.corners))
            .collect();
        let ids = self.markers.iter().map(|m| m.id).collect();
        (corners, ids)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardCorner {
    pub id: i32,
    pub position: Point2f,
}

/// Уточнённые углы шахматной доски ChArUco.
/// При `interpolated == false` список углов пуст.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardCorners {
    pub interpolated: bool,
    pub corners: Vec<BoardCorner>,
}

impl BoardCorners {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn from_opencv(corners: &Vector<Point2f>, ids: &Vector<i32>) -> Self {
        let corners: Vec<BoardCorner> = corners
            .iter()
            .zip(ids.iter())
            .map(|(position, id)| BoardCorner { id, position })
            .collect();
        Self {
            interpolated: !corners.is_empty(),
            corners,
        }
    }

    pub fn to_opencv(&self) -> (Vector<Point2f>, Vector<i32>) {
        let points = self.corners.iter().map(|c| c.position).collect();
        let ids = self.corners.iter().map(|c| c.id).collect();
        (points, ids)
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

/// Результат обработки одного кадра.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub markers: MarkerDetections,
    pub board: BoardCorners,
    pub image_size: Size,
}

/// Внешняя библиотека поиска маркеров.
pub trait MarkerBackend {
    fn detect_markers(&self, image: &Mat) -> Result<MarkerDetections>;

    /// Интерполяция углов доски по уже найденным маркерам.
    fn interpolate_board_corners(
        &self,
        markers: &MarkerDetections,
        image: &Mat,
    ) -> Result<BoardCorners>;
}

pub struct OpenCvBackend {
    aruco: ArucoDetector,
    charuco: CharucoDetector,
}

impl OpenCvBackend {
    pub fn new(board: &Board) -> Result<Self> {
        let aruco = ArucoDetector::new(
            board.dictionary(),
            &DetectorParameters::default()?,
            RefineParameters::new_def()?,
        )?;
        let charuco = CharucoDetector::new_def(board.charuco())?;
        Ok(Self { aruco, charuco })
    }
}

impl MarkerBackend for OpenCvBackend {
    fn detect_markers(&self, image: &Mat) -> Result<MarkerDetections> {
        let mut corners: Vector<Vector<Point2f>> = Vector::new();
        let mut ids: Vector<i32> = Vector::new();
        self.aruco.detect_markers_def(image, &mut corners, &mut ids)?;
        MarkerDetections::from_opencv(&corners, &ids)
    }

    fn interpolate_board_corners(
        &self,
        markers: &MarkerDetections,
        image: &Mat,
    ) -> Result<BoardCorners> {
        // Маркеры передаются готовыми, поэтому детектор доски только
        // интерполирует углы и не ищет маркеры повторно.
        let (mut marker_corners, mut marker_ids) = markers.to_opencv();
        let mut charuco_corners: Vector<Point2f> = Vector::new();
        let mut charuco_ids: Vector<i32> = Vector::new();
        self.charuco.detect_board(
            image,
            &mut charuco_corners,
            &mut charuco_ids,
            &mut marker_corners,
            &mut marker_ids,
        )?;
        Ok(BoardCorners::from_opencv(&charuco_corners, &charuco_ids))
    }
}

pub struct Detector<B: MarkerBackend = OpenCvBackend> {
    backend: B,
}

impl Detector<OpenCvBackend> {
    pub fn new(board: &Board) -> Result<Self> {
        Ok(Self::with_backend(OpenCvBackend::new(board)?))
    }
}

impl<B: MarkerBackend> Detector<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn detect_markers(&self, image: &Mat) -> Result<MarkerDetections> {
        self.backend.detect_markers(image)
    }

    /// Маркеры и углы доски. Без маркеров интерполяция не вызывается.
    pub fn detect(&self, image: &Mat) -> Result<DetectionResult> {
        let markers = self.backend.detect_markers(image)?;
        let board = if markers.is_empty() {
            BoardCorners::not_found()
        } else {
            self.backend.interpolate_board_corners(&markers, image)?
        };
        trace!(
            "Маркеров: {}, углов доски: {}",
            markers.len(),
            board.corners.len()
        );
        Ok(DetectionResult {
            markers,
            board,
            image_size: image.size()?,
        })
    }
}
