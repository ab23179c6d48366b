use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::BoardSpec;
use crate::calibration::SamplePolicy;
use crate::error::{Error, Result};
use crate::source::SourceDescriptor;

/// Настройки набора кадров для калибровки.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub min_samples: usize,
    pub min_markers: usize,
    /// Пауза между кадрами при калибровке с камеры, секунды.
    pub sample_interval_secs: f64,
    /// Сколько кадров набрать с камеры до автоматической калибровки.
    pub target_samples: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_markers: 8,
            sample_interval_secs: 5.0,
            target_samples: 20,
        }
    }
}

impl CalibrationSettings {
    pub fn offline_policy(&self) -> SamplePolicy {
        SamplePolicy {
            min_samples: self.min_samples,
            min_markers: self.min_markers,
            ..SamplePolicy::default()
        }
    }

    pub fn streaming_policy(&self) -> SamplePolicy {
        SamplePolicy {
            min_markers: self.min_markers,
            ..SamplePolicy::streaming(
                self.min_samples,
                Duration::from_secs_f64(self.sample_interval_secs),
                self.target_samples,
            )
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSettings {
    /// Длина осей маркера, метры.
    pub axis_length: f32,
    /// Длина осей доски, метры.
    pub board_axis_length: f32,
    /// Половина стороны рисуемого параллелепипеда, метры.
    pub box_half_size: f32,
    /// Размер отдельных маркеров, если отличается от маркеров доски.
    pub marker_length: Option<f32>,
    /// Исправлять дисторсию перед поиском маркеров.
    pub undistort: bool,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            axis_length: 0.02,
            board_axis_length: 0.1,
            box_half_size: 0.03,
            marker_length: None,
            undistort: true,
        }
    }
}

/// Конфигурация всех приложений. Проверяется один раз при загрузке.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub board: BoardSpec,
    pub source: SourceDescriptor,
    pub output_dir: PathBuf,
    pub calibration: CalibrationSettings,
    pub pose: PoseSettings,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("не удалось прочитать {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("ошибка разбора конфигурации: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("ошибка записи конфигурации: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.board.validate()?;
        let calibration = &self.calibration;
        if calibration.min_samples == 0 {
            return Err(Error::Configuration(
                "min_samples должен быть положительным".to_string(),
            ));
        }
        if !calibration.sample_interval_secs.is_finite() || calibration.sample_interval_secs < 0.0 {
            return Err(Error::Configuration(format!(
                "некорректный интервал между кадрами: {}",
                calibration.sample_interval_secs
            )));
        }
        if calibration.target_samples < calibration.min_samples {
            return Err(Error::Configuration(format!(
                "target_samples ({}) меньше min_samples ({})",
                calibration.target_samples, calibration.min_samples
            )));
        }
        let pose = &self.pose;
        if !(pose.axis_length > 0.0 && pose.board_axis_length > 0.0 && pose.box_half_size > 0.0) {
            return Err(Error::Configuration(
                "размеры осей и параллелепипеда должны быть положительными".to_string(),
            ));
        }
        if pose.marker_length.is_some_and(|len| !(len > 0.0 && len.is_finite())) {
            return Err(Error::Configuration(
                "размер маркера должен быть положительным".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MarkerDictionary;

    #[test]
    fn empty_json_gives_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.board.dictionary, MarkerDictionary::Dict4x4_50);
    }

    #[test]
    fn partial_board_overrides_keep_other_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "board": {"dictionary": "DICT_5X5_100", "squares_x": 7, "squares_y": 5},
                "source": {"kind": "files", "directory": "assets/frames"},
                "output_dir": "assets"
            }"#,
        )
        .unwrap();
        assert_eq!(config.board.dictionary, MarkerDictionary::Dict5x5_100);
        assert_eq!(config.board.squares_x, 7);
        assert_eq!(config.board.square_length, BoardSpec::default().square_length);
        assert_eq!(config.output_dir, PathBuf::from("assets"));
    }

    #[test]
    fn invalid_geometry_is_configuration_error() {
        let err = AppConfig::from_json(r#"{"board": {"square_length": 0.01}}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn unknown_dictionary_is_configuration_error() {
        let err = AppConfig::from_json(r#"{"board": {"dictionary": "DICT_3X3_10"}}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn target_below_minimum_is_rejected() {
        let err = AppConfig::from_json(r#"{"calibration": {"min_samples": 10, "target_samples": 3}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            source: SourceDescriptor::Video {
                path: PathBuf::from("stream.mp4"),
            },
            ..AppConfig::default()
        };
        fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn streaming_policy_carries_interval() {
        let policy = CalibrationSettings::default().streaming_policy();
        assert_eq!(policy.min_interval, Some(Duration::from_secs(5)));
        assert_eq!(policy.target_samples, Some(20));
        assert_eq!(policy.min_markers, 8);
    }
}
