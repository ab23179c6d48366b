//! Однопоточные циклы обработки: один кадр - один шаг. Каждый шаг читает
//! кадр, обрабатывает его, показывает результат и проверяет команду.
//!
//! Ошибка OpenCV при обработке кадра пишется в лог, кадр пропускается.
//! Остальные ошибки и ошибки показа прерывают цикл.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use opencv::core::Vector;
use opencv::highgui;
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::board::Board;
use crate::calibration::{CalibrationAccumulator, CameraParameters, Observation};
use crate::config::PoseSettings;
use crate::detection::{DetectionResult, Detector, MarkerBackend, OpenCvBackend};
use crate::error::{Error, Result};
use crate::overlay;
use crate::pose::{PoseEstimate, PoseEstimator};
use crate::source::Frame;

/// Команда пользователя, прочитанная после показа кадра.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    SaveFrame,
}

/// Куда показывать кадры и откуда читать команды.
pub trait Viewer {
    fn present(&mut self, image: &Mat) -> Result<Option<Command>>;
}

/// Окно highgui. `q`/Esc - выход, `s` - сохранить кадр.
pub struct HighGuiViewer {
    window: String,
    delay_ms: i32,
}

impl HighGuiViewer {
    /// `delay_ms == 0` ждёт нажатия клавиши на каждом кадре.
    pub fn new(window: &str, delay_ms: i32) -> Result<Self> {
        highgui::named_window(window, highgui::WINDOW_KEEPRATIO)?;
        Ok(Self {
            window: window.to_string(),
            delay_ms,
        })
    }
}

impl Viewer for HighGuiViewer {
    fn present(&mut self, image: &Mat) -> Result<Option<Command>> {
        highgui::imshow(&self.window, image)?;
        let key = highgui::wait_key(self.delay_ms)?;
        Ok(command_for_key(key))
    }
}

impl Drop for HighGuiViewer {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.window);
    }
}

pub fn command_for_key(key: i32) -> Option<Command> {
    if key < 0 {
        return None;
    }
    match (key & 0xFF) as u8 {
        27 | b'q' => Some(Command::Quit),
        b's' => Some(Command::SaveFrame),
        _ => None,
    }
}

/// `Ok(None)` для кадра, который пропускается из-за ошибки OpenCV.
fn skip_failed_frame<T>(index: usize, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::OpenCv(e)) => {
            warn!("Кадр {index} пропущен: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Показывает поток и сохраняет кадры по команде. Возвращает пути сохранённых файлов.
pub fn run_capture<V: Viewer>(
    frames: impl IntoIterator<Item = Frame>,
    viewer: &mut V,
    save_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(save_dir).map_err(|e| Error::PathUnwritable {
        path: save_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut saved = Vec::new();
    for frame in frames {
        match viewer.present(&frame.image)? {
            Some(Command::Quit) => break,
            Some(Command::SaveFrame) => {
                let path = save_dir.join(capture_file_name(frame.index));
                let written =
                    imgcodecs::imwrite(&path.to_string_lossy(), &frame.image, &Vector::new())?;
                if !written {
                    return Err(Error::PathUnwritable {
                        path,
                        reason: "imwrite не записал кадр".to_string(),
                    });
                }
                info!("Кадр {} сохранён в {}", frame.index, path.display());
                saved.push(path);
            }
            None => {}
        }
    }
    Ok(saved)
}

fn capture_file_name(index: usize) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("frame_{millis}_{index:05}.jpg")
}

/// Набирает кадры до конца источника и калибрует один раз по всем.
pub fn run_offline_calibration<B: MarkerBackend>(
    frames: impl IntoIterator<Item = Frame>,
    accumulator: &mut CalibrationAccumulator<B>,
) -> Result<CameraParameters> {
    for frame in frames {
        let Some((observation, detection)) =
            skip_failed_frame(frame.index, accumulator.observe(&frame))?
        else {
            continue;
        };
        debug!(
            "Кадр {}: маркеров {}, углов {}, {:?}",
            frame.index,
            detection.markers.len(),
            detection.board.len(),
            observation
        );
    }
    accumulator.finish();
    info!(
        "Принято {} кадров из {}",
        accumulator.samples().len(),
        accumulator.frames_seen()
    );
    accumulator.solve()
}

/// Калибровка с камеры: кадры принимаются не чаще заданного интервала,
/// при наборе нужного количества калибровка запускается сама.
pub fn run_live_calibration<V: Viewer, B: MarkerBackend>(
    frames: impl IntoIterator<Item = Frame>,
    viewer: &mut V,
    accumulator: &mut CalibrationAccumulator<B>,
) -> Result<CameraParameters> {
    let target = accumulator.policy().target_samples;
    for frame in frames {
        let Some((observation, detection)) =
            skip_failed_frame(frame.index, accumulator.observe(&frame))?
        else {
            continue;
        };
        if observation == Observation::Accepted {
            info!(
                "Принят кадр {} ({} из {:?})",
                frame.index,
                accumulator.samples().len(),
                target
            );
        }

        let status = match target {
            Some(target) => format!("Samples: {}/{}", accumulator.samples().len(), target),
            None => format!("Samples: {}", accumulator.samples().len()),
        };
        let canvas =
            skip_failed_frame(frame.index, draw_calibration_frame(&frame, &detection, &status))?;
        let command = match canvas {
            Some(canvas) => viewer.present(&canvas)?,
            None => None,
        };

        if accumulator.target_reached() {
            info!("Набрано нужное количество кадров, калибруем");
            break;
        }
        if command == Some(Command::Quit) {
            info!("Сбор кадров остановлен пользователем");
            break;
        }
    }
    accumulator.finish();
    accumulator.solve()
}

fn draw_calibration_frame(
    frame: &Frame,
    detection: &DetectionResult,
    status: &str,
) -> Result<Mat> {
    let mut canvas = overlay::to_color(&frame.image)?;
    overlay::draw_markers(&mut canvas, &detection.markers)?;
    overlay::draw_board_corners(&mut canvas, &detection.board)?;
    overlay::draw_status(&mut canvas, status)?;
    Ok(canvas)
}

/// Показ найденных маркеров с номерами. Возвращает число показанных кадров.
pub fn run_marker_preview<V: Viewer, B: MarkerBackend>(
    frames: impl IntoIterator<Item = Frame>,
    viewer: &mut V,
    detector: &Detector<B>,
) -> Result<usize> {
    let mut shown = 0;
    for frame in frames {
        let drawn = detector.detect_markers(&frame.image).and_then(|markers| {
            let mut canvas = overlay::to_color(&frame.image)?;
            overlay::draw_marker_outlines(&mut canvas, &markers)?;
            Ok(canvas)
        });
        let Some(canvas) = skip_failed_frame(frame.index, drawn)? else {
            continue;
        };
        shown += 1;
        if viewer.present(&canvas)? == Some(Command::Quit) {
            break;
        }
    }
    Ok(shown)
}

/// Показ первых `limit` кадров с исправленной дисторсией.
pub fn preview_undistorted<V: Viewer>(
    frames: impl IntoIterator<Item = Frame>,
    viewer: &mut V,
    camera: &CameraParameters,
    limit: usize,
) -> Result<()> {
    for frame in frames.into_iter().take(limit) {
        let Some(undistorted) = skip_failed_frame(frame.index, camera.undistort(&frame.image))?
        else {
            continue;
        };
        if viewer.present(&undistorted)? == Some(Command::Quit) {
            break;
        }
    }
    Ok(())
}

/// Позы одного кадра.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramePoses {
    pub markers: Vec<PoseEstimate>,
    pub board: Option<PoseEstimate>,
}

/// Оценка поз маркеров и доски на каждом кадре.
pub struct PoseSession<B: MarkerBackend = OpenCvBackend> {
    detector: Detector<B>,
    estimator: PoseEstimator,
    undistort: Option<CameraParameters>,
    settings: PoseSettings,
}

impl PoseSession<OpenCvBackend> {
    pub fn new(board: Board, camera: CameraParameters, settings: PoseSettings) -> Result<Self> {
        let detector = Detector::new(&board)?;
        Self::with_detector(board, detector, camera, settings)
    }
}

impl<B: MarkerBackend> PoseSession<B> {
    pub fn with_detector(
        board: Board,
        detector: Detector<B>,
        camera: CameraParameters,
        settings: PoseSettings,
    ) -> Result<Self> {
        // Если кадр уже исправлен, позу считаем без дисторсии
        let (estimator_camera, undistort) = if settings.undistort {
            (camera.without_distortion(), Some(camera))
        } else {
            (camera, None)
        };
        let mut estimator = PoseEstimator::new(board, estimator_camera)?;
        if let Some(marker_length) = settings.marker_length {
            estimator = estimator.with_marker_length(marker_length);
        }
        Ok(Self {
            detector,
            estimator,
            undistort,
            settings,
        })
    }

    pub fn estimator(&self) -> &PoseEstimator {
        &self.estimator
    }

    /// Позы на кадре и кадр с отрисовкой.
    pub fn process(&self, image: &Mat) -> Result<(FramePoses, Mat)> {
        let image = match &self.undistort {
            Some(camera) => camera.undistort(image)?,
            None => image.clone(),
        };
        let detection = self.detector.detect(&image)?;
        let camera = self.estimator.camera();

        let mut canvas = overlay::to_color(&image)?;
        overlay::draw_markers(&mut canvas, &detection.markers)?;
        overlay::draw_marker_corners(&mut canvas, &detection.markers)?;

        let markers = self.estimator.estimate_marker_poses(&detection.markers)?;
        for pose in &markers {
            overlay::draw_axes(&mut canvas, camera, pose, self.settings.axis_length, 1)?;
            overlay::draw_pose_box(&mut canvas, camera, pose, self.settings.box_half_size)?;
        }

        let board = self.estimator.estimate_board_pose(&detection.board)?;
        if let Some(pose) = &board {
            debug!("{}", overlay::pose_text(pose));
            overlay::draw_axes(&mut canvas, camera, pose, self.settings.board_axis_length, 5)?;
            overlay::draw_pose_text(&mut canvas, pose)?;
        }
        Ok((FramePoses { markers, board }, canvas))
    }

    /// Возвращает число обработанных кадров.
    pub fn run<V: Viewer>(
        &self,
        frames: impl IntoIterator<Item = Frame>,
        viewer: &mut V,
    ) -> Result<usize> {
        let mut processed = 0;
        for frame in frames {
            let Some((poses, canvas)) = skip_failed_frame(frame.index, self.process(&frame.image))?
            else {
                continue;
            };
            processed += 1;
            if let Some(board) = &poses.board {
                info!("Кадр {}: {}", frame.index, overlay::pose_text(board));
            }
            if viewer.present(&canvas)? == Some(Command::Quit) {
                break;
            }
        }
        Ok(processed)
    }
}
