use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use generate_calibration_pattern::GenCalibPatternApp;
use lib_cv::board::{Board, render_marker};
use lib_cv::config::AppConfig;
use lib_cv::{Error, Result};
use log::{error, info};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;

/// Без `--output` открывается окно генератора.
#[derive(Parser)]
#[command(name = "generate_calibration_pattern")]
#[command(about = "Генерация изображения доски ChArUco или отдельного маркера")]
struct Cli {
    /// Файл конфигурации (JSON), из него берётся геометрия доски.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Записать PNG без окна.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Вместо доски записать маркер с этим номером.
    #[arg(long, requires = "output")]
    marker_id: Option<i32>,

    /// Сторона маркера в пикселях.
    #[arg(long, default_value_t = 400)]
    marker_size: i32,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(output) = &cli.output else {
        return match run_gui(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    };

    match write_headless(&cli, &config, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn write_headless(cli: &Cli, config: &AppConfig, output: &Path) -> Result<()> {
    let image: Mat = match cli.marker_id {
        Some(id) => render_marker(config.board.dictionary, id, cli.marker_size)?,
        None => Board::new(config.board.clone())?.render_annotated()?,
    };
    if !imgcodecs::imwrite(&output.to_string_lossy(), &image, &Vector::new())? {
        return Err(Error::PathUnwritable {
            path: output.to_path_buf(),
            reason: "imwrite не записал изображение".to_string(),
        });
    }
    info!("Изображение записано в {}", output.display());
    Ok(())
}

fn run_gui(config: AppConfig) -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 700.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "ChArUco Generator",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_pixels_per_point(1.5);
            Ok(Box::new(GenCalibPatternApp::with_spec(config.board)))
        }),
    )
}
