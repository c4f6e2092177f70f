use serde::{Deserialize, Serialize};

use crate::frame::Stamp;

/// 元画像ピクセル座標の検出1件（中心形式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub confidence: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
}

/// カラーフレーム1枚分の全検出。空でも publish する
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxArray {
    /// Model name the boxes came from
    pub kind: String,
    pub stamp: Stamp,
    pub boxes: Vec<BoundingBox>,
}

/// ラベル付き3D位置。センサ座標（X前方, Y左, Z上）メートル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedDetection {
    pub label: String,
    pub confidence: f32,
    pub position: [f32; 3],
    pub frame_id: String,
    pub stamp: Stamp,
    /// Model name the detection came from
    pub kind: String,
}
