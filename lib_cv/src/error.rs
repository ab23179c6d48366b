use std::path::PathBuf;

use opencv::core::Size;

/// Ошибки библиотеки. "Маркеры не найдены" и "поза не определена" ошибками
/// не являются: это обычные исходы кадра с пустым результатом.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("некорректная конфигурация: {0}")]
    Configuration(String),
    #[error("источник кадров недоступен: {0}")]
    SourceUnavailable(String),
    #[error("в {directory} нет изображений с расширениями {extensions:?}")]
    EmptySource {
        directory: PathBuf,
        extensions: Vec<String>,
    },
    /// `collected` - число принятых кадров, даже если ни один не сопоставился с доской.
    #[error("недостаточно кадров для калибровки: принято {collected}")]
    InsufficientSamples { collected: usize },
    #[error(
        "разрешение кадров различается: ожидалось {}x{}, получено {}x{}",
        expected.width, expected.height, found.width, found.height
    )]
    ResolutionMismatch { expected: Size, found: Size },
    #[error("калибровка в этой сессии уже выполнена")]
    AlreadySolved,
    #[error("не удалось записать {path}: {reason}")]
    PathUnwritable { path: PathBuf, reason: String },
    #[error("не удалось прочитать {path}: {reason}")]
    PathUnreadable { path: PathBuf, reason: String },
    #[error("повреждённые данные в {path}: {reason}")]
    MalformedData { path: PathBuf, reason: String },
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
