use ndarray::{ArrayViewD, Axis, Ix3};

use super::bbox::BBox;
use crate::error::ConfigError;

/// Record layout: [cx, cy, w, h, objectness, class_score_0 .. class_score_{K-1}]
pub const RECORD_HEADER: usize = 5;

/// リサイズ画像座標のボックス候補（NMS 前）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    /// レコードの objectness（クラススコアではない）
    pub confidence: f32,
    pub bbox: BBox,
}

/// 出力テンソル走査時のしきい値
#[derive(Debug, Clone, Copy)]
pub struct DecodeThresholds {
    /// objectness はこれ以上
    pub confidence: f32,
    /// 最大クラススコアはこれより大きいこと
    pub score: f32,
}

/// `[1, N, 5 + K]` テンソルを走査し、両方のしきい値を通ったレコードを返す
///
/// 候補はテンソル順。それ以外の形状はモデルと設定の不整合なので致命的エラー
pub fn decode(
    output: ArrayViewD<f32>,
    num_classes: usize,
    thresholds: DecodeThresholds,
) -> Result<Vec<Candidate>, ConfigError> {
    let stride = RECORD_HEADER + num_classes;
    let shape = output.shape().to_vec();
    let mismatch = || ConfigError::TensorShape {
        expected: stride,
        actual: shape.clone(),
    };
    if num_classes == 0 || shape.len() != 3 || shape[0] != 1 || shape[2] != stride {
        return Err(mismatch());
    }
    let output = output.into_dimensionality::<Ix3>().map_err(|_| mismatch())?;

    let records = output.index_axis(Axis(0), 0);
    let mut candidates = Vec::new();

    for record in records.axis_iter(Axis(0)) {
        let objectness = record[4];
        if objectness.is_nan() || objectness < thresholds.confidence {
            continue;
        }

        // 最大クラススコア（同値なら先頭のインデックス）
        let mut class_id = 0;
        let mut max_score = f32::NEG_INFINITY;
        for k in 0..num_classes {
            let score = record[RECORD_HEADER + k];
            if score > max_score {
                max_score = score;
                class_id = k;
            }
        }

        if max_score > thresholds.score {
            candidates.push(Candidate {
                class_id,
                confidence: objectness,
                bbox: BBox::from_center(record[0], record[1], record[2], record[3]),
            });
        }
    }

    Ok(candidates)
}
