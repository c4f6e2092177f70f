use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// センサメッセージのヘッダにある撮影時刻
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub sec: i32,
    pub nanosec: u32,
}

impl Stamp {
    pub fn new(sec: i32, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }
}

/// BGR8 カラー画像。`pixels[[row, col, channel]]`
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub stamp: Stamp,
    pub frame_id: String,
    pub pixels: Array3<u8>,
}

impl ColorFrame {
    /// interleaved BGR8 バッファを包む。宣言サイズと長さを検証
    pub fn from_bgr(
        width: u32,
        height: u32,
        data: Vec<u8>,
        stamp: Stamp,
        frame_id: impl Into<String>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyImage);
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        let pixels = Array3::from_shape_vec((height as usize, width as usize, 3), data)
            .map_err(|_| FrameError::BufferSize {
                expected,
                actual: expected,
            })?;
        Ok(Self {
            stamp,
            frame_id: frame_id.into(),
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.shape()[1] as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.shape()[0] as u32
    }
}

/// 1チャンネル深度画像（センサの生の単位 = mm）
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub stamp: Stamp,
    pub depth: Array2<f32>,
}

impl DepthFrame {
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>, stamp: Stamp) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyImage);
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        let depth = Array2::from_shape_vec((height as usize, width as usize), data)
            .map_err(|_| FrameError::BufferSize {
                expected,
                actual: expected,
            })?;
        Ok(Self { stamp, depth })
    }

    pub fn width(&self) -> u32 {
        self.depth.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.depth.nrows() as u32
    }

    /// (row, col) の生の値。範囲外なら None
    pub fn at(&self, row: i64, col: i64) -> Option<f32> {
        if row < 0 || col < 0 {
            return None;
        }
        self.depth.get((row as usize, col as usize)).copied()
    }
}

/// ピンホールカメラの内部パラメータ
///
/// 最初のキャリブレーションが届くまでは全て0。この状態がパイプライン全体の「未準備」を表す
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// 行優先 3x3 カメラ行列 K から生成
    pub fn from_k(k: &[f64; 9]) -> Self {
        Self {
            fx: k[0] as f32,
            cx: k[2] as f32,
            fy: k[4] as f32,
            cy: k[5] as f32,
        }
    }

    /// 焦点距離が非ゼロかつ全て有限
    pub fn is_ready(&self) -> bool {
        self.fx != 0.0
            && self.fy != 0.0
            && [self.fx, self.fy, self.cx, self.cy].iter().all(|v| v.is_finite())
    }
}
