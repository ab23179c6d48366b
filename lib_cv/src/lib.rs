//! Поиск маркеров ArUco и доски ChArUco, калибровка камеры, оценка поз
//! и хранение параметров камеры поверх OpenCV.

pub mod board;
pub mod calibration;
pub mod config;
pub mod detection;
pub mod error;
pub mod overlay;
pub mod persistence;
pub mod pose;
pub mod session;
pub mod source;
pub mod warp;

pub use error::{Error, Result};
