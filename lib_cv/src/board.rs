use std::fmt;

use opencv::core::{Point, Scalar, Size};
use opencv::imgproc;
use opencv::objdetect::{self, CharucoBoard, Dictionary, PredefinedDictionaryType};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Поддерживаемые словари маркеров. Имена совпадают с именами OpenCV.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MarkerDictionary {
    #[default]
    #[serde(rename = "DICT_4X4_50")]
    Dict4x4_50,
    #[serde(rename = "DICT_4X4_100")]
    Dict4x4_100,
    #[serde(rename = "DICT_4X4_250")]
    Dict4x4_250,
    #[serde(rename = "DICT_4X4_1000")]
    Dict4x4_1000,
    #[serde(rename = "DICT_5X5_50")]
    Dict5x5_50,
    #[serde(rename = "DICT_5X5_100")]
    Dict5x5_100,
    #[serde(rename = "DICT_5X5_250")]
    Dict5x5_250,
    #[serde(rename = "DICT_5X5_1000")]
    Dict5x5_1000,
    #[serde(rename = "DICT_6X6_50")]
    Dict6x6_50,
    #[serde(rename = "DICT_6X6_100")]
    Dict6x6_100,
    #[serde(rename = "DICT_6X6_250")]
    Dict6x6_250,
    #[serde(rename = "DICT_6X6_1000")]
    Dict6x6_1000,
    #[serde(rename = "DICT_7X7_50")]
    Dict7x7_50,
    #[serde(rename = "DICT_7X7_100")]
    Dict7x7_100,
    #[serde(rename = "DICT_7X7_250")]
    Dict7x7_250,
    #[serde(rename = "DICT_7X7_1000")]
    Dict7x7_1000,
    #[serde(rename = "DICT_ARUCO_ORIGINAL")]
    ArucoOriginal,
    #[serde(rename = "DICT_APRILTAG_16h5")]
    AprilTag16h5,
    #[serde(rename = "DICT_APRILTAG_25h9")]
    AprilTag25h9,
    #[serde(rename = "DICT_APRILTAG_36h10")]
    AprilTag36h10,
    #[serde(rename = "DICT_APRILTAG_36h11")]
    AprilTag36h11,
}

impl MarkerDictionary {
    pub const ALL: [MarkerDictionary; 21] = [
        MarkerDictionary::Dict4x4_50,
        MarkerDictionary::Dict4x4_100,
        MarkerDictionary::Dict4x4_250,
        MarkerDictionary::Dict4x4_1000,
        MarkerDictionary::Dict5x5_50,
        MarkerDictionary::Dict5x5_100,
        MarkerDictionary::Dict5x5_250,
        MarkerDictionary::Dict5x5_1000,
        MarkerDictionary::Dict6x6_50,
        MarkerDictionary::Dict6x6_100,
        MarkerDictionary::Dict6x6_250,
        MarkerDictionary::Dict6x6_1000,
        MarkerDictionary::Dict7x7_50,
        MarkerDictionary::Dict7x7_100,
        MarkerDictionary::Dict7x7_250,
        MarkerDictionary::Dict7x7_1000,
        MarkerDictionary::ArucoOriginal,
        MarkerDictionary::AprilTag16h5,
        MarkerDictionary::AprilTag25h9,
        MarkerDictionary::AprilTag36h10,
        MarkerDictionary::AprilTag36h11,
    ];

    pub fn opencv_type(self) -> PredefinedDictionaryType {
        use MarkerDictionary::*;
        match self {
            Dict4x4_50 => PredefinedDictionaryType::DICT_4X4_50,
            Dict4x4_100 => PredefinedDictionaryType::DICT_4X4_100,
            Dict4x4_250 => PredefinedDictionaryType::DICT_4X4_250,
            Dict4x4_1000 => PredefinedDictionaryType::DICT_4X4_1000,
            Dict5x5_50 => PredefinedDictionaryType::DICT_5X5_50,
            Dict5x5_100 => PredefinedDictionaryType::DICT_5X5_100,
            Dict5x5_250 => PredefinedDictionaryType::DICT_5X5_250,
            Dict5x5_1000 => PredefinedDictionaryType::DICT_5X5_1000,
            Dict6x6_50 => PredefinedDictionaryType::DICT_6X6_50,
            Dict6x6_100 => PredefinedDictionaryType::DICT_6X6_100,
            Dict6x6_250 => PredefinedDictionaryType::DICT_6X6_250,
            Dict6x6_1000 => PredefinedDictionaryType::DICT_6X6_1000,
            Dict7x7_50 => PredefinedDictionaryType::DICT_7X7_50,
            Dict7x7_100 => PredefinedDictionaryType::DICT_7X7_100,
            Dict7x7_250 => PredefinedDictionaryType::DICT_7X7_250,
            Dict7x7_1000 => PredefinedDictionaryType::DICT_7X7_1000,
            ArucoOriginal => PredefinedDictionaryType::DICT_ARUCO_ORIGINAL,
            AprilTag16h5 => PredefinedDictionaryType::DICT_APRILTAG_16h5,
            AprilTag25h9 => PredefinedDictionaryType::DICT_APRILTAG_25h9,
            AprilTag36h10 => PredefinedDictionaryType::DICT_APRILTAG_36h10,
            AprilTag36h11 => PredefinedDictionaryType::DICT_APRILTAG_36h11,
        }
    }

    pub fn name(self) -> &'static str {
        use MarkerDictionary::*;
        match self {
            Dict4x4_50 => "DICT_4X4_50",
            Dict4x4_100 => "DICT_4X4_100",
            Dict4x4_250 => "DICT_4X4_250",
            Dict4x4_1000 => "DICT_4X4_1000",
            Dict5x5_50 => "DICT_5X5_50",
            Dict5x5_100 => "DICT_5X5_100",
            Dict5x5_250 => "DICT_5X5_250",
            Dict5x5_1000 => "DICT_5X5_1000",
            Dict6x6_50 => "DICT_6X6_50",
            Dict6x6_100 => "DICT_6X6_100",
            Dict6x6_250 => "DICT_6X6_250",
            Dict6x6_1000 => "DICT_6X6_1000",
            Dict7x7_50 => "DICT_7X7_50",
            Dict7x7_100 => "DICT_7X7_100",
            Dict7x7_250 => "DICT_7X7_250",
            Dict7x7_1000 => "DICT_7X7_1000",
            ArucoOriginal => "DICT_ARUCO_ORIGINAL",
            AprilTag16h5 => "DICT_APRILTAG_16h5",
            AprilTag25h9 => "DICT_APRILTAG_25h9",
            AprilTag36h10 => "DICT_APRILTAG_36h10",
            AprilTag36h11 => "DICT_APRILTAG_36h11",
        }
    }

    /// Количество маркеров в словаре.
    pub fn capacity(self) -> usize {
        use MarkerDictionary::*;
        match self {
            ArucoOriginal => 1024,
            AprilTag16h5 => 30,
            AprilTag25h9 => 35,
            AprilTag36h10 => 2320,
            AprilTag36h11 => 587,
            // Для DICT_NxN_M размер словаря закодирован в имени
            other => other
                .name()
                .rsplit_once('_')
                .and_then(|(_, amount)| amount.parse().ok())
                .unwrap_or(0),
        }
    }

    pub fn load(self) -> Result<Dictionary> {
        Ok(objdetect::get_predefined_dictionary(self.opencv_type())?)
    }
}

impl fmt::Display for MarkerDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Геометрия доски ChArUco.
///
/// `squares_x`/`squares_y` - количество клеток по горизонтали и вертикали,
/// длины в метрах, размеры изображения в пикселях.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSpec {
    pub dictionary: MarkerDictionary,
    pub squares_x: i32,
    pub squares_y: i32,
    pub square_length: f32,
    pub marker_length: f32,
    pub render_width_px: i32,
    pub margin_px: i32,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            dictionary: MarkerDictionary::Dict4x4_50,
            squares_x: 6,
            squares_y: 4,
            square_length: 0.030,
            marker_length: 0.015,
            render_width_px: 1123,
            margin_px: 20,
        }
    }
}

impl BoardSpec {
    /// Число маркеров на доске: они занимают белые клетки, т.е. половину.
    pub fn marker_count(&self) -> usize {
        (self.squares_x.max(0) as usize * self.squares_y.max(0) as usize) / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(Error::Configuration(format!(
                "доска должна быть не меньше 2x2 клеток, задано {}x{}",
                self.squares_x, self.squares_y
            )));
        }
        if !self.square_length.is_finite() || !self.marker_length.is_finite() {
            return Err(Error::Configuration(
                "размеры клетки и маркера должны быть конечными".to_string(),
            ));
        }
        if self.marker_length <= 0.0 {
            return Err(Error::Configuration(format!(
                "размер маркера должен быть положительным, задано {}",
                self.marker_length
            )));
        }
        if self.square_length <= self.marker_length {
            return Err(Error::Configuration(format!(
                "клетка ({}) должна быть больше маркера ({})",
                self.square_length, self.marker_length
            )));
        }
        if self.render_width_px <= 0 || self.margin_px < 0 {
            return Err(Error::Configuration(format!(
                "некорректный размер изображения {} или поля {}",
                self.render_width_px, self.margin_px
            )));
        }
        if 2 * i64::from(self.margin_px) >= i64::from(self.render_width_px) {
            return Err(Error::Configuration(format!(
                "поля {} px не помещаются в ширину {} px",
                self.margin_px, self.render_width_px
            )));
        }
        let height = self.render_height_px().ok_or_else(|| {
            Error::Configuration(format!(
                "высота изображения {}x{} клеток при ширине {} px не помещается в i32",
                self.squares_x, self.squares_y, self.render_width_px
            ))
        })?;
        if 2 * i64::from(self.margin_px) >= i64::from(height) {
            return Err(Error::Configuration(format!(
                "поля {} px не помещаются в высоту {} px",
                self.margin_px, height
            )));
        }
        let needed = self.marker_count();
        let available = self.dictionary.capacity();
        if needed > available {
            return Err(Error::Configuration(format!(
                "доске нужно {needed} маркеров, в словаре {} только {available}",
                self.dictionary
            )));
        }
        Ok(())
    }

    /// Размер изображения доски: ширина задана, высота по пропорции клеток.
    pub fn render_size(&self) -> Size {
        Size::new(self.render_width_px, self.render_height_px().unwrap_or(0))
    }

    /// `None`, если высота не помещается в i32.
    fn render_height_px(&self) -> Option<i32> {
        self.render_width_px
            .checked_mul(self.squares_y)?
            .checked_div(self.squares_x)
    }
}

/// Проверенная спецификация вместе с объектами OpenCV.
pub struct Board {
    spec: BoardSpec,
    dictionary: Dictionary,
    charuco: CharucoBoard,
}

impl Board {
    pub fn new(spec: BoardSpec) -> Result<Self> {
        spec.validate()?;
        let dictionary = spec.dictionary.load()?;
        let charuco = CharucoBoard::new_def(
            Size::new(spec.squares_x, spec.squares_y),
            spec.square_length,
            spec.marker_length,
            &dictionary,
        )?;
        Ok(Self {
            spec,
            dictionary,
            charuco,
        })
    }

    /// Отдельная копия доски (объекты OpenCV не клонируются напрямую).
    pub fn try_clone(&self) -> Result<Self> {
        Self::new(self.spec.clone())
    }

    pub fn spec(&self) -> &BoardSpec {
        &self.spec
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn charuco(&self) -> &CharucoBoard {
        &self.charuco
    }

    /// Изображение доски для печати (CV_8UC1).
    pub fn render(&self) -> Result<Mat> {
        let mut image = Mat::default();
        self.charuco
            .generate_image(self.spec.render_size(), &mut image, self.spec.margin_px, 1)?;
        Ok(image)
    }

    pub fn caption(&self) -> String {
        format!(
            "Pattern: {}x{} | Square Size: {:.1} mm | Marker: {:.1} mm | Dictionary: {}",
            self.spec.squares_x,
            self.spec.squares_y,
            self.spec.square_length * 1000.0,
            self.spec.marker_length * 1000.0,
            self.spec.dictionary
        )
    }

    /// Изображение доски с подписью параметров в нижнем поле.
    pub fn render_annotated(&self) -> Result<Mat> {
        let mut image = self.render()?;
        let origin = Point::new(
            self.spec.margin_px / 2,
            image.rows() - self.spec.margin_px / 2,
        );
        imgproc::put_text(
            &mut image,
            &self.caption(),
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.3,
            Scalar::all(27.0),
            1,
            imgproc::LINE_8,
            false,
        )?;
        Ok(image)
    }
}

/// Изображение одиночного маркера со стороной `side_px`.
pub fn render_marker(dictionary: MarkerDictionary, id: i32, side_px: i32) -> Result<Mat> {
    if id < 0 || id as usize >= dictionary.capacity() {
        return Err(Error::Configuration(format!(
            "маркера {id} нет в словаре {dictionary} ({} маркеров)",
            dictionary.capacity()
        )));
    }
    if side_px <= 0 {
        return Err(Error::Configuration(format!(
            "размер маркера должен быть положительным, задано {side_px}"
        )));
    }
    let mut image = Mat::default();
    objdetect::generate_image_marker(&dictionary.load()?, id, side_px, &mut image, 1)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_parsed_from_name() {
        assert_eq!(MarkerDictionary::Dict4x4_50.capacity(), 50);
        assert_eq!(MarkerDictionary::Dict6x6_250.capacity(), 250);
        assert_eq!(MarkerDictionary::Dict7x7_1000.capacity(), 1000);
        assert_eq!(MarkerDictionary::AprilTag36h11.capacity(), 587);
    }

    #[test]
    fn every_dictionary_has_unique_name() {
        let mut names: Vec<_> = MarkerDictionary::ALL.iter().map(|d| d.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MarkerDictionary::ALL.len());
    }

    #[test]
    fn dictionary_serializes_with_opencv_name() {
        let json = serde_json::to_string(&MarkerDictionary::Dict5x5_100).unwrap();
        assert_eq!(json, "\"DICT_5X5_100\"");
        let parsed: MarkerDictionary = serde_json::from_str("\"DICT_APRILTAG_16h5\"").unwrap();
        assert_eq!(parsed, MarkerDictionary::AprilTag16h5);
    }

    #[test]
    fn default_spec_is_valid() {
        BoardSpec::default().validate().unwrap();
        assert_eq!(BoardSpec::default().render_size(), Size::new(1123, 748));
    }

    #[test]
    fn rejects_marker_not_smaller_than_square() {
        let spec = BoardSpec {
            marker_length: 0.03,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_degenerate_grid() {
        let spec = BoardSpec {
            squares_y: 1,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
        let spec = BoardSpec {
            squares_x: 0,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_non_positive_marker() {
        let spec = BoardSpec {
            marker_length: 0.0,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_board_larger_than_dictionary() {
        let spec = BoardSpec {
            squares_x: 12,
            squares_y: 10,
            ..BoardSpec::default()
        };
        assert_eq!(spec.marker_count(), 60);
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
        let spec = BoardSpec {
            dictionary: MarkerDictionary::Dict4x4_100,
            ..spec
        };
        spec.validate().unwrap();
    }

    #[test]
    fn rejects_margin_wider_than_image() {
        let spec = BoardSpec {
            render_width_px: 40,
            margin_px: 20,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_margin_taller_than_image() {
        let spec = BoardSpec {
            dictionary: MarkerDictionary::Dict4x4_100,
            squares_x: 100,
            squares_y: 2,
            render_width_px: 1123,
            margin_px: 20,
            ..BoardSpec::default()
        };
        assert_eq!(spec.render_size().height, 22);
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
        assert!(matches!(Board::new(spec), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_height_overflow() {
        let spec = BoardSpec {
            dictionary: MarkerDictionary::Dict4x4_1000,
            squares_x: 40,
            squares_y: 30,
            render_width_px: 100_000_000,
            margin_px: 20,
            ..BoardSpec::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn caption_lists_geometry() {
        let board = Board::new(BoardSpec::default()).unwrap();
        assert_eq!(
            board.caption(),
            "Pattern: 6x4 | Square Size: 30.0 mm | Marker: 15.0 mm | Dictionary: DICT_4X4_50"
        );
    }

    #[test]
    fn marker_id_outside_dictionary_is_rejected() {
        assert!(matches!(
            render_marker(MarkerDictionary::Dict4x4_50, 50, 100),
            Err(Error::Configuration(_))
        ));
    }
}
