use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lib_cv::Result;
use lib_cv::board::Board;
use lib_cv::calibration::{CalibrationAccumulator, CameraParameters};
use lib_cv::config::AppConfig;
use lib_cv::detection::Detector;
use lib_cv::persistence;
use lib_cv::session::{self, HighGuiViewer};
use lib_cv::source::{FrameSource, SourceDescriptor};
use log::{error, info};

#[derive(Parser)]
#[command(name = "calibration_app")]
#[command(about = "Калибровка камеры по доске ChArUco")]
struct Cli {
    /// Файл конфигурации (JSON). Без него используются значения по умолчанию.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Показ потока и сохранение кадров по клавише `s`.
    Capture {
        #[command(flatten)]
        source: SourceArgs,

        /// Каталог для сохранённых кадров.
        #[arg(long)]
        out: PathBuf,
    },

    /// Калибровка по всем кадрам источника.
    Calibrate {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Калибровка с камеры: кадры набираются с паузой, калибровка запускается сама.
    Live {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct SourceArgs {
    /// Каталог с изображениями.
    #[arg(long, conflicts_with_all = ["device", "video"])]
    images: Option<PathBuf>,

    /// Номер камеры.
    #[arg(long, conflicts_with = "video")]
    device: Option<i32>,

    /// Видеофайл.
    #[arg(long)]
    video: Option<PathBuf>,
}

impl SourceArgs {
    fn descriptor(&self) -> Option<SourceDescriptor> {
        if let Some(directory) = &self.images {
            return Some(SourceDescriptor::directory(directory));
        }
        if let Some(index) = self.device {
            return Some(SourceDescriptor::Device { index });
        }
        self.video
            .as_ref()
            .map(|path| SourceDescriptor::Video { path: path.clone() })
    }
}

#[derive(Debug, Clone, Args)]
struct OutputArgs {
    /// Каталог для camera_matrix.yml и dist_coeffs.yml.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Показать несколько кадров с исправленной дисторсией.
    #[arg(long)]
    preview: bool,
}

const PREVIEW_FRAMES: usize = 5;

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

fn load_config(path: Option<&PathBuf>, source: &SourceArgs) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(descriptor) = source.descriptor() {
        config.source = descriptor;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Capture { source, out } => {
            let config = load_config(cli.config.as_ref(), source)?;
            let frames = FrameSource::open(&config.source)?;
            let mut viewer = HighGuiViewer::new("Захват кадров", 30)?;
            let saved = session::run_capture(frames, &mut viewer, out)?;
            info!("Сохранено кадров: {}", saved.len());
            Ok(())
        }
        Commands::Calibrate { source, output } => {
            let config = load_config(cli.config.as_ref(), source)?;
            let board = Board::new(config.board.clone())?;
            let detector = Detector::new(&board)?;
            let mut accumulator =
                CalibrationAccumulator::new(board, detector, config.calibration.offline_policy());
            let frames = FrameSource::open(&config.source)?;
            let parameters = session::run_offline_calibration(frames, &mut accumulator)?;
            finish(&config, output, &parameters)
        }
        Commands::Live { source, output } => {
            let config = load_config(cli.config.as_ref(), source)?;
            let board = Board::new(config.board.clone())?;
            let detector = Detector::new(&board)?;
            let mut accumulator =
                CalibrationAccumulator::new(board, detector, config.calibration.streaming_policy());
            let frames = FrameSource::open(&config.source)?;
            let parameters = {
                let mut viewer = HighGuiViewer::new("Калибровка", 1)?;
                session::run_live_calibration(frames, &mut viewer, &mut accumulator)?
            };
            finish(&config, output, &parameters)
        }
    }
}

fn finish(config: &AppConfig, output: &OutputArgs, parameters: &CameraParameters) -> Result<()> {
    info!("Матрица камеры: {:?}", parameters.camera_matrix);
    info!("Коэффициенты дисторсии: {:?}", parameters.distortion);

    let directory = output.output.as_ref().unwrap_or(&config.output_dir);
    persistence::save(parameters, directory)?;

    if output.preview {
        let frames = FrameSource::open(&config.source)?;
        let mut viewer = HighGuiViewer::new("Без дисторсии", 0)?;
        session::preview_undistorted(frames, &mut viewer, parameters, PREVIEW_FRAMES)?;
    }
    Ok(())
}
