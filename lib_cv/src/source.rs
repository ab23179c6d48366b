use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use opencv::core::Size;
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Откуда брать кадры.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// Все файлы каталога с указанными расширениями.
    Files {
        directory: PathBuf,
        #[serde(default = "default_extensions")]
        extensions: Vec<String>,
    },
    /// Камера по индексу.
    Device { index: i32 },
    /// Видеофайл.
    Video { path: PathBuf },
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "png".to_string()]
}

impl Default for SourceDescriptor {
    fn default() -> Self {
        SourceDescriptor::Device { index: 0 }
    }
}

impl SourceDescriptor {
    pub fn directory(directory: impl Into<PathBuf>) -> Self {
        SourceDescriptor::Files {
            directory: directory.into(),
            extensions: default_extensions(),
        }
    }
}

/// Кадр и его порядковый номер в потоке.
#[derive(Debug)]
pub struct Frame {
    pub image: Mat,
    pub index: usize,
}

impl Frame {
    pub fn new(image: Mat, index: usize) -> Self {
        Self { image, index }
    }

    pub fn size(&self) -> Result<Size> {
        Ok(self.image.size()?)
    }
}

enum Backend {
    Files {
        paths: Vec<PathBuf>,
        position: usize,
    },
    Capture(VideoCapture),
}

/// Ленивая последовательность кадров. `None` из итератора означает конец
/// потока: файлы закончились или камера перестала отдавать кадры.
pub struct FrameSource {
    backend: Backend,
    next_index: usize,
}

impl FrameSource {
    pub fn open(descriptor: &SourceDescriptor) -> Result<Self> {
        let backend = match descriptor {
            SourceDescriptor::Files {
                directory,
                extensions,
            } => {
                let paths = list_images(directory, extensions)?;
                info!("Найдено {} изображений в {}", paths.len(), directory.display());
                Backend::Files { paths, position: 0 }
            }
            SourceDescriptor::Device { index } => {
                let capture = VideoCapture::new(*index, videoio::CAP_ANY)?;
                if !capture.is_opened()? {
                    return Err(Error::SourceUnavailable(format!(
                        "не удалось открыть камеру {index}"
                    )));
                }
                info!("Камера {index} открыта");
                Backend::Capture(capture)
            }
            SourceDescriptor::Video { path } => {
                if !path.is_file() {
                    return Err(Error::SourceUnavailable(format!(
                        "видеофайл {} не найден",
                        path.display()
                    )));
                }
                let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
                if !capture.is_opened()? {
                    return Err(Error::SourceUnavailable(format!(
                        "не удалось открыть видео {}",
                        path.display()
                    )));
                }
                info!("Видео {} открыто", path.display());
                Backend::Capture(capture)
            }
        };
        Ok(Self {
            backend,
            next_index: 0,
        })
    }

    /// Размер кадра, если источник его сообщает (камера, видео).
    pub fn frame_size_hint(&self) -> Option<Size> {
        match &self.backend {
            Backend::Files { .. } => None,
            Backend::Capture(capture) => {
                let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).ok()?;
                let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()?;
                (width > 0.0 && height > 0.0).then(|| Size::new(width as i32, height as i32))
            }
        }
    }

    /// Количество файлов; для камеры и видео неизвестно.
    pub fn len_hint(&self) -> Option<usize> {
        match &self.backend {
            Backend::Files { paths, .. } => Some(paths.len()),
            Backend::Capture(_) => None,
        }
    }

    fn read_next(&mut self) -> Option<Mat> {
        match &mut self.backend {
            Backend::Files { paths, position } => {
                while let Some(path) = paths.get(*position) {
                    *position += 1;
                    match imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR) {
                        Ok(image) if !image.empty() => {
                            debug!("Прочитано {}", path.display());
                            return Some(image);
                        }
                        Ok(_) => warn!("Не удалось декодировать {}, пропускаем", path.display()),
                        Err(e) => warn!("Ошибка чтения {}: {}", path.display(), e),
                    }
                }
                None
            }
            Backend::Capture(capture) => {
                let mut image = Mat::default();
                match capture.read(&mut image) {
                    Ok(true) if !image.empty() => Some(image),
                    Ok(_) => {
                        info!("Поток кадров закончился");
                        None
                    }
                    Err(e) => {
                        warn!("Ошибка чтения кадра: {}", e);
                        None
                    }
                }
            }
        }
    }
}

impl Iterator for FrameSource {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let image = self.read_next()?;
        let frame = Frame::new(image, self.next_index);
        self.next_index += 1;
        Some(frame)
    }
}

fn list_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|e| {
        Error::SourceUnavailable(format!(
            "не удалось прочитать каталог {}: {}",
            directory.display(),
            e
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::EmptySource {
            directory: directory.to_path_buf(),
            extensions: extensions.to_vec(),
        });
    }
    Ok(paths)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext)))
}
