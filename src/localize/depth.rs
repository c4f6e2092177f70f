//! 画像領域から1点の深度を求める
//!
//! 保持している深度フレームを領域内でサンプルし、メートルに変換、範囲外を除いて中央値を取る。
//! サンプルが空なら `NaN` になり、呼び出し側では不正な幾何と同じ扱い

use crate::config::{DepthConfig, RangeCheck};
use crate::frame::DepthFrame;

/// サンプリングするピクセル領域
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// 半開区間 `[x0, x1) x [y0, y1)`。境界は整数に切り捨て
    Box { x: [f32; 2], y: [f32; 2] },
    /// 全 x と全 y の直積（ピクセルのリストではない）
    Grid { xs: Vec<f32>, ys: Vec<f32> },
}

impl Region {
    /// x が2個なら矩形、それ以外はグリッド
    ///
    /// 矩形では y の先頭2つだけ使う。y が2個未満なら矩形にできないのでグリッド扱い
    pub fn from_coords(xs: Vec<f32>, ys: Vec<f32>) -> Self {
        if xs.len() == 2 && ys.len() >= 2 {
            Region::Box {
                x: [xs[0], xs[1]],
                y: [ys[0], ys[1]],
            }
        } else {
            Region::Grid { xs, ys }
        }
    }

    /// x と y それぞれの平均
    pub fn anchor(&self) -> (f32, f32) {
        fn mean(v: &[f32]) -> f32 {
            v.iter().sum::<f32>() / v.len() as f32
        }
        match self {
            Region::Box { x, y } => (mean(x), mean(y)),
            Region::Grid { xs, ys } => (mean(xs), mean(ys)),
        }
    }
}

/// 採用する深度範囲（メートル）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min_m: f32,
    pub max_m: f32,
    /// 生の値 -> メートル
    pub scale: f32,
    pub check: RangeCheck,
}

impl DepthRange {
    pub fn from_config(config: &DepthConfig) -> Self {
        Self {
            min_m: config.min_m,
            max_m: config.max_m,
            scale: config.scale,
            check: config.range_check,
        }
    }

    pub fn admits(&self, meters: f32) -> bool {
        match self.check {
            RangeCheck::Strict => meters > self.min_m && meters < self.max_m,
            RangeCheck::Legacy => true,
        }
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self::from_config(&DepthConfig::default())
    }
}

/// 採用したサンプル（メートル、行優先の走査順）
pub fn collect_samples(depth: &DepthFrame, region: &Region, range: &DepthRange) -> Vec<f32> {
    let mut samples = Vec::new();
    let mut visit = |col: i64, row: i64| {
        if let Some(raw) = depth.at(row, col) {
            let d = range.scale * raw;
            if range.admits(d) {
                samples.push(d);
            }
        }
    };

    match region {
        Region::Box { x, y } => {
            let mut col = x[0] as i64;
            while (col as f32) < x[1] {
                let mut row = y[0] as i64;
                while (row as f32) < y[1] {
                    visit(col, row);
                    row += 1;
                }
                col += 1;
            }
        }
        Region::Grid { xs, ys } => {
            for &x in xs {
                for &y in ys {
                    visit(x as i64, y as i64);
                }
            }
        }
    }
    samples
}

/// 選択アルゴリズムで中央値を求める（`samples` は並べ替わる）。空なら NaN
///
/// 偶数個のときは pivot と下側パーティションの最大値の平均
pub fn median(samples: &mut [f32]) -> f32 {
    let n = samples.len();
    if n == 0 {
        return f32::NAN;
    }
    let mid = n / 2;
    let (lower, pivot, _) = samples.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let pivot = *pivot;
    if n % 2 == 0 {
        let left = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (left + pivot) / 2.0
    } else {
        pivot
    }
}

/// 深度1点と、それを割り当てるピクセル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthEstimate {
    /// 中央値深度（メートル）。サンプルが無ければ NaN
    pub depth_m: f32,
    pub u: f32,
    pub v: f32,
    pub sample_count: usize,
}

impl DepthEstimate {
    pub fn is_valid(&self) -> bool {
        self.depth_m.is_finite()
    }
}

/// 領域をサンプルして1点の推定値にする
pub fn estimate(depth: &DepthFrame, region: &Region, range: &DepthRange) -> DepthEstimate {
    let mut samples = collect_samples(depth, region, range);
    let (u, v) = region.anchor();
    DepthEstimate {
        depth_m: median(&mut samples),
        u,
        v,
        sample_count: samples.len(),
    }
}
