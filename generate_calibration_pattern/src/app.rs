use std::ops::RangeInclusive;
use std::path::Path;

use eframe::egui::{self, ColorImage, SliderClamping};
use lib_cv::board::{Board, BoardSpec, MarkerDictionary};
use log::{error, info};
use opencv::core::Vector;
use opencv::{imgcodecs, imgproc, prelude::*};

pub struct GenCalibPatternApp {
    texture_handle: Option<egui::TextureHandle>,
    spec: BoardSpec,
    square_length_mm: f32,
    marker_length_mm: f32,
    /// Спецификация, по которой построена текущая текстура.
    rendered: Option<BoardSpec>,
    status: Option<String>,
}

impl Default for GenCalibPatternApp {
    fn default() -> Self {
        Self::with_spec(BoardSpec::default())
    }
}

impl GenCalibPatternApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(spec: BoardSpec) -> Self {
        Self {
            texture_handle: None,
            square_length_mm: spec.square_length * 1000.0,
            marker_length_mm: spec.marker_length * 1000.0,
            spec,
            rendered: None,
            status: None,
        }
    }

    fn current_spec(&self) -> BoardSpec {
        BoardSpec {
            square_length: self.square_length_mm / 1000.0,
            marker_length: self.marker_length_mm / 1000.0,
            ..self.spec.clone()
        }
    }

    pub fn generate_pattern(&self) -> lib_cv::Result<ColorImage> {
        let board = Board::new(self.current_spec())?;
        let mat_image = board.render_annotated()?;
        let frame_size = [mat_image.cols() as usize, mat_image.rows() as usize];
        let mut rgb_image = Mat::default();
        imgproc::cvt_color_def(&mat_image, &mut rgb_image, imgproc::COLOR_GRAY2RGB)?;
        Ok(ColorImage::from_rgb(frame_size, rgb_image.data_bytes()?))
    }

    pub fn set_texture_handler(&mut self, ctx: &egui::Context) -> lib_cv::Result<()> {
        let spec = self.current_spec();
        if self.rendered.as_ref() == Some(&spec) {
            return Ok(());
        }
        self.rendered = Some(spec);
        let color_image = self.generate_pattern()?;

        if let Some(handle) = &mut self.texture_handle {
            handle.set(color_image, egui::TextureOptions::NEAREST);
        } else {
            self.texture_handle = Some(ctx.load_texture(
                "pattern_texture",
                color_image,
                egui::TextureOptions::NEAREST,
            ));
        }
        Ok(())
    }

    fn save_pattern(&mut self, path: &Path) {
        let result = Board::new(self.current_spec())
            .and_then(|board| board.render_annotated())
            .and_then(|image| {
                Ok(imgcodecs::imwrite(
                    &path.to_string_lossy(),
                    &image,
                    &Vector::new(),
                )?)
            });
        self.status = Some(match result {
            Ok(true) => {
                info!("Доска сохранена в {}", path.display());
                format!("Сохранено: {}", path.display())
            }
            Ok(false) => format!("Не удалось записать {}", path.display()),
            Err(e) => {
                error!("Не удалось сохранить доску: {e}");
                e.to_string()
            }
        });
    }

    fn render_parameters(&mut self, ui: &mut egui::Ui) {
        let markers_available = self.spec.dictionary.capacity() as i32;
        ui.add(
            egui::Slider::new(
                &mut self.spec.squares_y,
                RangeInclusive::new(2, (markers_available * 2 / self.spec.squares_x).max(2)),
            )
            .text("Длина")
            .clamping(SliderClamping::Always),
        );
        ui.add(
            egui::Slider::new(
                &mut self.spec.squares_x,
                RangeInclusive::new(2, (markers_available * 2 / self.spec.squares_y).max(2)),
            )
            .text("Ширина")
            .clamping(SliderClamping::Always),
        );
        ui.add(
            egui::Slider::new(&mut self.square_length_mm, RangeInclusive::new(5.0, 100.0))
                .text("Размер квадрата, мм")
                .clamping(SliderClamping::Always),
        );
        let marker_max = (self.square_length_mm * 0.9).max(1.0);
        ui.add(
            egui::Slider::new(&mut self.marker_length_mm, RangeInclusive::new(1.0, marker_max))
                .text("Размер маркера, мм")
                .clamping(SliderClamping::Always),
        );
        ui.add(
            egui::Slider::new(&mut self.spec.render_width_px, RangeInclusive::new(200, 4000))
                .text("Ширина изображения, px"),
        );
        ui.add(
            egui::Slider::new(&mut self.spec.margin_px, RangeInclusive::new(0, 200))
                .text("Поле, px"),
        );
        egui::ComboBox::from_label("Наборы маркеров")
            .selected_text(self.spec.dictionary.name())
            .show_ui(ui, |ui| {
                for d in MarkerDictionary::ALL {
                    ui.selectable_value(&mut self.spec.dictionary, d, d.name());
                }
            });

        ui.separator();
        if ui.button("Сохранить PNG").clicked() {
            if let Some(path) = rfd::FileDialog::new()
                .set_title("Сохранить доску")
                .add_filter("PNG", &["png"])
                .set_file_name("charuco_board.png")
                .save_file()
            {
                self.save_pattern(&path);
            }
        }
        if let Some(status) = &self.status {
            ui.label(status);
        }
    }
}

impl eframe::App for GenCalibPatternApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::SidePanel::left("parameters").show(ctx, |ui| self.render_parameters(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Err(e) = self.set_texture_handler(ctx) {
                self.texture_handle = None;
                self.status = Some(format!("Паттерн не сгенерирован: {e}"));
            }
            if let Some(texture) = &self.texture_handle {
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Image::from_texture(texture).shrink_to_fit())
                });
            } else {
                ui.label("Паттерн не сгенерирован");
            }
        });
    }
}
