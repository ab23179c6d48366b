#![allow(dead_code)]

use lib_cv::board::{Board, BoardSpec, MarkerDictionary};
use opencv::core::{self, CV_8UC1, Mat, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;

pub const FRAME: Size = Size {
    width: 640,
    height: 480,
};
pub const FOCAL: f64 = 600.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Доска 5x7, 60 px на клетку, без поля.
pub fn synthetic_board() -> Board {
    Board::new(BoardSpec {
        dictionary: MarkerDictionary::Dict4x4_50,
        squares_x: 5,
        squares_y: 7,
        square_length: 0.04,
        marker_length: 0.03,
        render_width_px: 300,
        margin_px: 0,
    })
    .unwrap()
}

fn rotation(tilt_x_deg: f64, tilt_y_deg: f64) -> [[f64; 3]; 3] {
    let (sa, ca) = tilt_x_deg.to_radians().sin_cos();
    let (sb, cb) = tilt_y_deg.to_radians().sin_cos();
    // Ry * Rx
    [
        [cb, sb * sa, sb * ca],
        [0.0, ca, -sa],
        [-sb, cb * sa, cb * ca],
    ]
}

/// Вид отрисованной доски камерой с fx = fy = `FOCAL` и центром в середине кадра.
/// Центр доски на расстоянии `depth`, доска наклонена на заданные углы.
pub fn synthetic_view(
    board: &Board,
    tilt_x_deg: f64,
    tilt_y_deg: f64,
    offset: (f64, f64),
    depth: f64,
) -> Mat {
    let pattern = board.render().unwrap();
    let spec = board.spec();
    let pixels_per_meter = spec.render_width_px as f64 / (spec.squares_x as f64 * spec.square_length as f64);
    let width_m = pattern.cols() as f64 / pixels_per_meter;
    let height_m = pattern.rows() as f64 / pixels_per_meter;

    let r = rotation(tilt_x_deg, tilt_y_deg);
    let t = [offset.0, offset.1, depth];
    let k = [
        [FOCAL, 0.0, FRAME.width as f64 / 2.0],
        [0.0, FOCAL, FRAME.height as f64 / 2.0],
        [0.0, 0.0, 1.0],
    ];
    // Пиксели доски в метры с центром доски в начале координат
    let s = [
        [1.0 / pixels_per_meter, 0.0, -width_m / 2.0],
        [0.0, 1.0 / pixels_per_meter, -height_m / 2.0],
        [0.0, 0.0, 1.0],
    ];
    let extrinsic = [
        [r[0][0], r[0][1], t[0]],
        [r[1][0], r[1][1], t[1]],
        [r[2][0], r[2][1], t[2]],
    ];
    let h = mul(&mul(&k, &extrinsic), &s);

    let homography = Mat::from_slice_2d(&h).unwrap();
    let mut view = Mat::default();
    imgproc::warp_perspective(
        &pattern,
        &mut view,
        &homography,
        FRAME,
        imgproc::INTER_LINEAR,
        core::BORDER_CONSTANT,
        Scalar::all(255.0),
    )
    .unwrap();
    view
}

fn mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Наклоны, которых хватает для устойчивой калибровки.
pub const VIEW_TILTS: [(f64, f64); 10] = [
    (0.0, 0.0),
    (20.0, 0.0),
    (-20.0, 0.0),
    (0.0, 20.0),
    (0.0, -20.0),
    (15.0, 15.0),
    (-15.0, 15.0),
    (15.0, -15.0),
    (-15.0, -15.0),
    (10.0, -5.0),
];

pub fn white_frame() -> Mat {
    Mat::new_size_with_default(FRAME, CV_8UC1, Scalar::all(255.0)).unwrap()
}

/// Копирует `patch` в `frame` левым верхним углом в (x, y).
pub fn paste(frame: &mut Mat, patch: &Mat, x: i32, y: i32) {
    for r in 0..patch.rows() {
        for c in 0..patch.cols() {
            *frame.at_2d_mut::<u8>(y + r, x + c).unwrap() = *patch.at_2d::<u8>(r, c).unwrap();
        }
    }
}
