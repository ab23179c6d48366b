//! Хранение параметров камеры: два файла OpenCV FileStorage в одном каталоге,
//! матрица камеры 3x3 и строка коэффициентов дисторсии 1xK.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use opencv::core::{FileStorage, FileStorage_Mode};
use opencv::prelude::*;

use crate::calibration::{CameraParameters, mat_values};
use crate::error::{Error, Result};

pub const CAMERA_MATRIX_FILE: &str = "camera_matrix.yml";
pub const DIST_COEFFS_FILE: &str = "dist_coeffs.yml";

const CAMERA_MATRIX_NODE: &str = "camera_matrix";
const DIST_COEFFS_NODE: &str = "dist_coeffs";

pub fn save(parameters: &CameraParameters, directory: impl AsRef<Path>) -> Result<()> {
    let directory = directory.as_ref();
    fs::create_dir_all(directory).map_err(|e| Error::PathUnwritable {
        path: directory.to_path_buf(),
        reason: e.to_string(),
    })?;

    write_node(
        &directory.join(CAMERA_MATRIX_FILE),
        CAMERA_MATRIX_NODE,
        &parameters.camera_matrix_mat()?,
    )?;
    write_node(
        &directory.join(DIST_COEFFS_FILE),
        DIST_COEFFS_NODE,
        &parameters.distortion_mat()?,
    )?;
    info!("Параметры камеры сохранены в {}", directory.display());
    Ok(())
}

pub fn load(directory: impl AsRef<Path>) -> Result<CameraParameters> {
    let directory = directory.as_ref();
    let camera_matrix_path = directory.join(CAMERA_MATRIX_FILE);
    let dist_coeffs_path = directory.join(DIST_COEFFS_FILE);

    let camera_matrix = read_node(&camera_matrix_path, CAMERA_MATRIX_NODE)?;
    if (camera_matrix.rows, camera_matrix.cols) != (3, 3) {
        return Err(malformed(
            &camera_matrix_path,
            format!(
                "ожидалась матрица 3x3, получено {}x{}",
                camera_matrix.rows, camera_matrix.cols
            ),
        ));
    }
    let distortion = read_node(&dist_coeffs_path, DIST_COEFFS_NODE)?;
    if distortion.rows != 1 && distortion.cols != 1 {
        return Err(malformed(
            &dist_coeffs_path,
            format!(
                "ожидался вектор, получено {}x{}",
                distortion.rows, distortion.cols
            ),
        ));
    }
    if distortion.values.is_empty() {
        return Err(malformed(&dist_coeffs_path, "пустой вектор дисторсии"));
    }

    let mut matrix = [[0.0; 3]; 3];
    for (i, v) in camera_matrix.values.into_iter().enumerate() {
        matrix[i / 3][i % 3] = v;
    }
    info!("Параметры камеры загружены из {}", directory.display());
    Ok(CameraParameters {
        camera_matrix: matrix,
        distortion: distortion.values,
    })
}

fn write_node(path: &Path, name: &str, mat: &Mat) -> Result<()> {
    let unwritable = |reason: String| Error::PathUnwritable {
        path: path.to_path_buf(),
        reason,
    };
    let mut storage = FileStorage::new(
        &path.to_string_lossy(),
        FileStorage_Mode::WRITE as i32,
        "",
    )
    .map_err(|e| unwritable(e.to_string()))?;
    if !storage.is_opened()? {
        return Err(unwritable("файл не открылся на запись".to_string()));
    }
    storage
        .write_mat(name, mat)
        .map_err(|e| unwritable(e.to_string()))?;
    storage.release().map_err(|e| unwritable(e.to_string()))?;
    Ok(())
}

/// Матрица из узла: размеры и значения построчно.
struct NodeMatrix {
    rows: i32,
    cols: i32,
    values: Vec<f64>,
}

fn read_node(path: &Path, name: &str) -> Result<NodeMatrix> {
    if !path.is_file() {
        return Err(Error::PathUnreadable {
            path: path.to_path_buf(),
            reason: "файл не найден".to_string(),
        });
    }
    let storage = FileStorage::new(&path.to_string_lossy(), FileStorage_Mode::READ as i32, "")
        .map_err(|e| malformed(path, e.to_string()))?;
    if !storage.is_opened()? {
        return Err(Error::PathUnreadable {
            path: path.to_path_buf(),
            reason: "файл не открылся на чтение".to_string(),
        });
    }
    let node = storage.get(name)?;
    if node.is_none()? || node.empty()? {
        return Err(malformed(path, format!("нет узла {name}")));
    }
    let mat = node.mat().map_err(|e| malformed(path, e.to_string()))?;
    if mat.empty() {
        return Err(malformed(path, format!("узел {name} не является матрицей")));
    }
    if mat.channels() != 1 {
        return Err(malformed(path, format!("узел {name} многоканальный")));
    }
    let values = mat_values(&mat)?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(malformed(path, "нечисловые значения"));
    }
    Ok(NodeMatrix {
        rows: mat.rows(),
        cols: mat.cols(),
        values,
    })
}

fn malformed(path: &Path, reason: impl Into<String>) -> Error {
    Error::MalformedData {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::values_to_mat;

    fn sample_parameters() -> CameraParameters {
        CameraParameters {
            camera_matrix: [
                [812.345_678_901_234_5, 0.0, 319.875_000_000_1],
                [0.0, 809.123_456_789, 241.000_000_000_3],
                [0.0, 0.0, 1.0],
            ],
            distortion: vec![-0.123_456_789, 0.087_654_321, 1.5e-4, -2.25e-4, -0.012_345],
        }
    }

    #[test]
    fn load_returns_what_was_saved() {
        let dir = tempfile::tempdir().unwrap();
        let parameters = sample_parameters();
        save(&parameters, dir.path()).unwrap();
        assert!(dir.path().join(CAMERA_MATRIX_FILE).is_file());
        assert!(dir.path().join(DIST_COEFFS_FILE).is_file());
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded, parameters);
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        save(&sample_parameters(), &nested).unwrap();
        assert_eq!(load(&nested).unwrap(), sample_parameters());
    }

    #[test]
    fn missing_files_are_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path()), Err(Error::PathUnreadable { .. })));
    }

    #[test]
    fn directory_under_a_file_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            save(&sample_parameters(), file.join("calibration")),
            Err(Error::PathUnwritable { .. })
        ));
    }

    #[test]
    fn wrong_node_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_parameters(), dir.path()).unwrap();
        fs::write(
            dir.path().join(CAMERA_MATRIX_FILE),
            "%YAML:1.0\n---\nsomething_else: 3\n",
        )
        .unwrap();
        assert!(matches!(load(dir.path()), Err(Error::MalformedData { .. })));
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_parameters(), dir.path()).unwrap();
        // Подменяем матрицу камеры строкой коэффициентов
        fs::copy(
            dir.path().join(DIST_COEFFS_FILE),
            dir.path().join("tmp.yml"),
        )
        .unwrap();
        let text = fs::read_to_string(dir.path().join("tmp.yml"))
            .unwrap()
            .replace(DIST_COEFFS_NODE, CAMERA_MATRIX_NODE);
        fs::write(dir.path().join(CAMERA_MATRIX_FILE), text).unwrap();
        assert!(matches!(load(dir.path()), Err(Error::MalformedData { .. })));
    }

    #[test]
    fn flat_camera_matrix_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_parameters(), dir.path()).unwrap();
        let values: Vec<f64> = sample_parameters()
            .camera_matrix
            .iter()
            .flatten()
            .copied()
            .collect();
        for (rows, cols) in [(1, 9), (9, 1)] {
            write_node(
                &dir.path().join(CAMERA_MATRIX_FILE),
                CAMERA_MATRIX_NODE,
                &values_to_mat(rows, cols, &values).unwrap(),
            )
            .unwrap();
            assert!(
                matches!(load(dir.path()), Err(Error::MalformedData { .. })),
                "{rows}x{cols}"
            );
        }
    }

    #[test]
    fn square_distortion_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_parameters(), dir.path()).unwrap();
        write_node(
            &dir.path().join(DIST_COEFFS_FILE),
            DIST_COEFFS_NODE,
            &values_to_mat(3, 3, &[0.0; 9]).unwrap(),
        )
        .unwrap();
        assert!(matches!(load(dir.path()), Err(Error::MalformedData { .. })));
    }

    #[test]
    fn column_distortion_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let parameters = sample_parameters();
        save(&parameters, dir.path()).unwrap();
        write_node(
            &dir.path().join(DIST_COEFFS_FILE),
            DIST_COEFFS_NODE,
            &values_to_mat(5, 1, &parameters.distortion).unwrap(),
        )
        .unwrap();
        assert_eq!(load(dir.path()).unwrap(), parameters);
    }
}
