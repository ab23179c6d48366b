mod common;

use lib_cv::Error;
use lib_cv::calibration::{AccumulatorState, CalibrationAccumulator, Observation, SamplePolicy};
use lib_cv::detection::Detector;
use lib_cv::persistence;
use lib_cv::session::run_offline_calibration;
use lib_cv::source::{Frame, FrameSource, SourceDescriptor};
use opencv::core::Vector;
use opencv::imgcodecs;

use common::*;

fn accumulator() -> CalibrationAccumulator {
    let board = synthetic_board();
    let detector = Detector::new(&board).unwrap();
    CalibrationAccumulator::new(
        board,
        detector,
        SamplePolicy {
            min_samples: 5,
            ..SamplePolicy::default()
        },
    )
}

fn views() -> Vec<Frame> {
    let board = synthetic_board();
    VIEW_TILTS
        .iter()
        .enumerate()
        .map(|(i, &(ax, ay))| {
            let offset = ((i as f64 - 4.5) * 0.004, 0.0);
            Frame::new(synthetic_view(&board, ax, ay, offset, 0.5), i)
        })
        .collect()
}

#[test]
fn synthetic_views_calibrate_once() {
    init_logging();
    let mut accumulator = accumulator();
    assert_eq!(accumulator.state(), AccumulatorState::Collecting);

    for frame in views() {
        let (observation, _) = accumulator.observe(&frame).unwrap();
        assert_eq!(observation, Observation::Accepted, "кадр {}", frame.index);
        let expected = if accumulator.samples().len() >= 5 {
            AccumulatorState::Ready
        } else {
            AccumulatorState::Collecting
        };
        assert_eq!(accumulator.state(), expected);
    }
    assert_eq!(accumulator.samples().len(), VIEW_TILTS.len());

    let parameters = accumulator.solve().unwrap();
    assert_eq!(accumulator.state(), AccumulatorState::Solved);
    assert!(parameters.fx() > 0.0 && parameters.fy() > 0.0);
    assert!((parameters.fx() - FOCAL).abs() < FOCAL * 0.1, "fx = {}", parameters.fx());
    assert!((parameters.fy() - FOCAL).abs() < FOCAL * 0.1, "fy = {}", parameters.fy());
    assert_eq!(parameters.distortion.len(), 5);
    assert!(accumulator.rms_error().is_some_and(|rms| rms < 2.0));

    assert!(matches!(accumulator.solve(), Err(Error::AlreadySolved)));
    assert_eq!(accumulator.parameters(), Some(&parameters));
    let extra = views().remove(0);
    assert!(matches!(accumulator.observe(&extra), Err(Error::AlreadySolved)));
}

#[test]
fn too_few_views_are_insufficient() {
    let mut accumulator = accumulator();
    for frame in views().into_iter().take(3) {
        accumulator.observe(&frame).unwrap();
    }
    assert!(matches!(
        accumulator.solve(),
        Err(Error::InsufficientSamples { collected: 3 })
    ));
}

#[test]
fn directory_of_views_calibrates_and_persists() {
    init_logging();
    let frames_dir = tempfile::tempdir().unwrap();
    for frame in views() {
        let path = frames_dir.path().join(format!("view_{:02}.png", frame.index));
        assert!(imgcodecs::imwrite(&path.to_string_lossy(), &frame.image, &Vector::new()).unwrap());
    }
    std::fs::write(frames_dir.path().join("readme.txt"), "skip").unwrap();

    let source = FrameSource::open(&SourceDescriptor::directory(frames_dir.path())).unwrap();
    assert_eq!(source.len_hint(), Some(VIEW_TILTS.len()));

    let mut accumulator = accumulator();
    let parameters = run_offline_calibration(source, &mut accumulator).unwrap();
    assert_eq!(accumulator.frames_seen(), VIEW_TILTS.len());

    let output = tempfile::tempdir().unwrap();
    persistence::save(&parameters, output.path()).unwrap();
    assert_eq!(persistence::load(output.path()).unwrap(), parameters);
}
