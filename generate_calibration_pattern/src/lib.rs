mod app;

pub use app::GenCalibPatternApp;
