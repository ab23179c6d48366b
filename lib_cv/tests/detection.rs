mod common;

use std::cell::Cell;

use lib_cv::Error;
use lib_cv::board::Board;
use lib_cv::detection::{BoardCorners, Detector, MarkerBackend, MarkerDetections, OpenCvBackend};
use lib_cv::source::{FrameSource, SourceDescriptor};
use opencv::core::Mat;
use opencv::prelude::*;

use common::*;

/// Настоящий детектор, который считает вызовы интерполяции.
struct CountingBackend {
    inner: OpenCvBackend,
    interpolations: Cell<usize>,
}

impl CountingBackend {
    fn new(board: &Board) -> Self {
        Self {
            inner: OpenCvBackend::new(board).unwrap(),
            interpolations: Cell::new(0),
        }
    }
}

impl MarkerBackend for CountingBackend {
    fn detect_markers(&self, image: &Mat) -> lib_cv::Result<MarkerDetections> {
        self.inner.detect_markers(image)
    }

    fn interpolate_board_corners(
        &self,
        markers: &MarkerDetections,
        image: &Mat,
    ) -> lib_cv::Result<BoardCorners> {
        self.interpolations.set(self.interpolations.get() + 1);
        self.inner.interpolate_board_corners(markers, image)
    }
}

#[test]
fn board_rendering_is_deterministic() {
    let board = synthetic_board();
    let first = board.render().unwrap();
    let second = board.render().unwrap();
    assert_eq!((first.cols(), first.rows()), (300, 420));
    assert_eq!(first.data_bytes().unwrap(), second.data_bytes().unwrap());

    let again = synthetic_board().render().unwrap();
    assert_eq!(first.data_bytes().unwrap(), again.data_bytes().unwrap());
}

#[test]
fn blank_frame_skips_interpolation() {
    let board = synthetic_board();
    let detector = Detector::with_backend(CountingBackend::new(&board));
    let result = detector.detect(&white_frame()).unwrap();
    assert!(result.markers.is_empty());
    assert!(!result.board.interpolated);
    assert!(result.board.is_empty());
    assert_eq!(detector.backend().interpolations.get(), 0);
}

#[test]
fn frontal_view_finds_whole_board() {
    let board = synthetic_board();
    let detector = Detector::with_backend(CountingBackend::new(&board));
    let view = synthetic_view(&board, 0.0, 0.0, (0.0, 0.0), 0.5);
    let result = detector.detect(&view).unwrap();

    let mut ids = result.markers.ids();
    ids.sort_unstable();
    assert_eq!(ids, (0..17).collect::<Vec<i32>>());
    assert!(result.board.interpolated);
    // Внутренних углов у доски 5x7: 4 * 6
    assert!(result.board.len() >= 20 && result.board.len() <= 24);
    assert_eq!(detector.backend().interpolations.get(), 1);
    assert_eq!(result.image_size, FRAME);
}

#[test]
fn empty_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "не изображение").unwrap();
    let err = FrameSource::open(&SourceDescriptor::directory(dir.path()))
        .err()
        .unwrap();
    assert!(matches!(err, Error::EmptySource { .. }));
}
