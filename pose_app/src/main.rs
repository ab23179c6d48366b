use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lib_cv::board::Board;
use lib_cv::config::AppConfig;
use lib_cv::detection::Detector;
use lib_cv::session::{self, HighGuiViewer, PoseSession};
use lib_cv::source::{FrameSource, SourceDescriptor};
use lib_cv::{Error, Result, persistence, warp};
use log::{error, info};
use opencv::core::{Point2f, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;

#[derive(Parser)]
#[command(name = "pose_app")]
#[command(about = "Поиск маркеров ArUco и оценка поз относительно камеры")]
struct Cli {
    /// Файл конфигурации (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Номер камеры вместо источника из конфигурации.
    #[arg(long, global = true)]
    device: Option<i32>,

    /// Видеофайл вместо источника из конфигурации.
    #[arg(long, global = true, conflicts_with = "device")]
    video: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Показ найденных маркеров с номерами.
    Markers,

    /// Позы маркеров и доски на каждом кадре.
    Pose {
        /// Каталог с camera_matrix.yml и dist_coeffs.yml.
        #[arg(long)]
        calibration: Option<PathBuf>,
    },

    /// Вклеить изображение доски в сцену по четырём точкам.
    Warp {
        /// Изображение сцены.
        #[arg(long)]
        scene: PathBuf,

        /// Углы четырёхугольника: x0,y0,x1,y1,x2,y2,x3,y3 по часовой стрелке с левого верхнего.
        #[arg(long, required = true, value_delimiter = ',', num_args = 8, allow_negative_numbers = true)]
        quad: Vec<f32>,

        /// Куда записать результат.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(index) = cli.device {
        config.source = SourceDescriptor::Device { index };
    } else if let Some(path) = &cli.video {
        config.source = SourceDescriptor::Video { path: path.clone() };
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let board = Board::new(config.board.clone())?;

    match &cli.command {
        Commands::Markers => {
            let detector = Detector::new(&board)?;
            let frames = FrameSource::open(&config.source)?;
            let mut viewer = HighGuiViewer::new("Маркеры", 1)?;
            let shown = session::run_marker_preview(frames, &mut viewer, &detector)?;
            info!("Показано кадров: {shown}");
        }
        Commands::Pose { calibration } => {
            let directory = calibration.as_ref().unwrap_or(&config.output_dir);
            let camera = persistence::load(directory)?;
            let pose_session = PoseSession::new(board, camera, config.pose.clone())?;
            let frames = FrameSource::open(&config.source)?;
            let mut viewer = HighGuiViewer::new("Позы", 1)?;
            let processed = pose_session.run(frames, &mut viewer)?;
            info!("Обработано кадров: {processed}");
        }
        Commands::Warp { scene, quad, out } => {
            let scene_image = imgcodecs::imread(&scene.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
            if scene_image.empty() {
                return Err(Error::PathUnreadable {
                    path: scene.clone(),
                    reason: "изображение не прочитано".to_string(),
                });
            }
            let patch = lib_cv::overlay::to_color(&board.render_annotated()?)?;
            let corners = [
                Point2f::new(quad[0], quad[1]),
                Point2f::new(quad[2], quad[3]),
                Point2f::new(quad[4], quad[5]),
                Point2f::new(quad[6], quad[7]),
            ];
            let result = warp::overlay_quad(&scene_image, &patch, corners)?;
            if !imgcodecs::imwrite(&out.to_string_lossy(), &result, &Vector::new())? {
                return Err(Error::PathUnwritable {
                    path: out.clone(),
                    reason: "imwrite не записал изображение".to_string(),
                });
            }
            info!("Результат записан в {}", out.display());
        }
    }
    Ok(())
}
