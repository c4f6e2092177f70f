//! フレーム単位の処理: カラー画像からボックスと3D位置を出す
//!
//! 深度とキャリブレーションは別ストリームで届き、[`SharedSensors`] を更新するだけ。
//! カラーフレームごとにその状態のスナップショットを取り、letterbox → 推論 → decode →
//! NMS → 3D化 を行う。処理中に深度が差し替わっても、スナップショットしたフレームを使い続ける

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{Config, DepthMode};
use crate::depth_service::{DepthQuery, DetectionContext, MedianDepthRequest};
use crate::detect::{decode, letterbox, suppress, BBox, DecodeThresholds, LabelSet};
use crate::error::{ConfigError, PipelineError};
use crate::frame::{CameraIntrinsics, ColorFrame, DepthFrame};
use crate::inference::{Detector, ModelLoader};
use crate::localize::{estimate, localize, DepthRange, Region};
use crate::report::{BoundingBox, BoundingBoxArray, LocalizedDetection};

// ============================================================================
// Shared sensor state
// ============================================================================

#[derive(Debug, Default)]
struct SensorInner {
    intrinsics: CameraIntrinsics,
    depth: Option<Arc<DepthFrame>>,
}

/// 1回のカラー処理で使うキャリブレーション + 最新深度
#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    pub intrinsics: CameraIntrinsics,
    pub depth: Arc<DepthFrame>,
}

/// 入力ストリーム間で共有する最新の内部パラメータと深度フレーム
///
/// 書き込みは write lock 下で値ごと差し替える。読み出しは `Arc` を clone してすぐ lock を離す
#[derive(Debug, Clone, Default)]
pub struct SharedSensors {
    inner: Arc<RwLock<SensorInner>>,
    depth_drop_logged: Arc<AtomicBool>,
}

impl SharedSensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内部パラメータを更新。初めて有効になったときだけ true
    ///
    /// 一度キャリブレーション済みになったら、無効な値は無視する（待機状態には戻らない）
    pub fn update_intrinsics(&self, intrinsics: CameraIntrinsics) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let was_ready = inner.intrinsics.is_ready();
        if was_ready && !intrinsics.is_ready() {
            warn!("ignoring degenerate camera info: {:?}", intrinsics);
            return false;
        }
        inner.intrinsics = intrinsics;
        let became_ready = !was_ready && intrinsics.is_ready();
        if became_ready {
            info!(
                "camera calibrated: fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
                intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
            );
        }
        became_ready
    }

    /// 深度フレームを差し替える。キャリブレーション前のフレームは捨てる
    pub fn update_depth(&self, frame: DepthFrame) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.intrinsics.is_ready() {
            if !self.depth_drop_logged.swap(true, Ordering::Relaxed) {
                info!("depth image received before camera info, dropping until calibrated");
            }
            return false;
        }
        if inner.depth.is_none() {
            info!("first depth image: {}x{}", frame.width(), frame.height());
        }
        inner.depth = Some(Arc::new(frame));
        true
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).intrinsics
    }

    pub fn is_calibrated(&self) -> bool {
        self.intrinsics().is_ready()
    }

    /// キャリブレーションと深度が揃うまでは None
    pub fn snapshot(&self) -> Option<SensorSnapshot> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if !inner.intrinsics.is_ready() {
            return None;
        }
        inner.depth.as_ref().map(|depth| SensorSnapshot {
            intrinsics: inner.intrinsics,
            depth: Arc::clone(depth),
        })
    }
}

// ============================================================================
// Settings / outputs
// ============================================================================

/// カラーストリームから見た準備状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    WaitingCalibration,
    Ready,
}

/// フレーム処理が参照する設定値
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model_name: String,
    /// 出力 frame id。空ならカラーフレームの id を使う
    pub frame_id: String,
    pub depth_mode: DepthMode,
    pub publish_poses: bool,
    pub thresholds: DecodeThresholds,
    pub nms_threshold: f32,
    pub input_size: u32,
    pub pad_color: [u8; 3],
    pub depth_range: DepthRange,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_name: config.node.model_name.clone(),
            frame_id: config.node.camera_frame_id.clone(),
            depth_mode: config.node.depth_mode,
            publish_poses: config.node.publish_poses,
            thresholds: DecodeThresholds {
                confidence: config.detection.confidence_threshold,
                score: config.detection.score_threshold,
            },
            nms_threshold: config.detection.nms_threshold,
            input_size: config.detection.input_size,
            pad_color: config.detection.pad_color,
            depth_range: DepthRange::from_config(&config.depth),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// カラーフレーム1枚の処理結果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// NMS 後の全検出（3D化できたかどうかに関係なく）
    pub boxes: BoundingBoxArray,
    /// local モード: 幾何チェックを通った検出
    pub poses: Vec<LocalizedDetection>,
    /// remote モード: 検出ごとの深度問い合わせ（非同期で応答）
    pub depth_queries: Vec<DepthQuery>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// キャリブレーションか深度が未着。フレームはスキップ
    NotReady,
    Processed(FrameReport),
}

// ============================================================================
// Model lifecycle
// ============================================================================

enum ModelStage<L: ModelLoader> {
    Uninitialized(L),
    Ready(L::Detector),
    Failed(String),
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline<L: ModelLoader> {
    settings: PipelineSettings,
    labels: LabelSet,
    sensors: SharedSensors,
    model: ModelStage<L>,
    waiting_logged: bool,
    first_frame_logged: bool,
}

impl<L: ModelLoader> Pipeline<L> {
    pub fn new(settings: PipelineSettings, labels: LabelSet, sensors: SharedSensors, loader: L) -> Self {
        Self {
            settings,
            labels,
            sensors,
            model: ModelStage::Uninitialized(loader),
            waiting_logged: false,
            first_frame_logged: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.sensors.snapshot().is_some() {
            PipelineState::Ready
        } else {
            PipelineState::WaitingCalibration
        }
    }

    /// 初回にビルドして以降は使い回す。失敗したら失敗のまま
    fn detector(&mut self) -> Result<&mut L::Detector, ConfigError> {
        if matches!(self.model, ModelStage::Uninitialized(_)) {
            let stage = std::mem::replace(&mut self.model, ModelStage::Failed(String::new()));
            if let ModelStage::Uninitialized(loader) = stage {
                self.model = match loader.load() {
                    Ok(detector) => {
                        info!("model '{}' ready", self.settings.model_name);
                        ModelStage::Ready(detector)
                    }
                    Err(e) => {
                        error!("model '{}' failed to load: {:#}", self.settings.model_name, e);
                        ModelStage::Failed(format!("{:#}", e))
                    }
                };
            }
        }
        match &mut self.model {
            ModelStage::Ready(detector) => Ok(detector),
            ModelStage::Failed(reason) => Err(ConfigError::Model(reason.clone())),
            ModelStage::Uninitialized(_) => Err(ConfigError::Model("model not built".to_string())),
        }
    }

    /// カラーフレーム1枚を最後まで処理する
    pub fn process_color(&mut self, frame: &ColorFrame) -> Result<FrameOutcome, PipelineError> {
        let Some(sensors) = self.sensors.snapshot() else {
            if !self.waiting_logged {
                info!("waiting for camera info and depth image");
                self.waiting_logged = true;
            }
            return Ok(FrameOutcome::NotReady);
        };
        if !self.first_frame_logged {
            info!("first color image: {}x{}", frame.width(), frame.height());
            self.first_frame_logged = true;
        }

        let input = letterbox(frame, self.settings.input_size, self.settings.pad_color)?;
        let output = self
            .detector()?
            .infer(&input)
            .map_err(PipelineError::Inference)?;
        let candidates = decode(output.view(), self.labels.len(), self.settings.thresholds)?;
        let kept = suppress(&candidates, self.settings.thresholds.score, self.settings.nms_threshold);

        let frame_id = if self.settings.frame_id.is_empty() {
            frame.frame_id.clone()
        } else {
            self.settings.frame_id.clone()
        };

        let mut report = FrameReport {
            boxes: BoundingBoxArray {
                kind: self.settings.model_name.clone(),
                stamp: frame.stamp,
                boxes: Vec::with_capacity(kept.len()),
            },
            poses: Vec::new(),
            depth_queries: Vec::new(),
        };

        for det in &kept {
            let label = self.labels.name(det.class_id).unwrap_or("unknown").to_string();
            let bbox = input.mapping.unscale_box(&det.bbox);
            let (cx, cy) = bbox.center();
            debug!(
                "detected {} ({:.2}) at ({:.1}, {:.1}) size {:.1}x{:.1}",
                label, det.confidence, cx, cy, bbox.width, bbox.height
            );
            report.boxes.boxes.push(BoundingBox {
                label: label.clone(),
                confidence: det.confidence,
                cx,
                cy,
                width: bbox.width,
                height: bbox.height,
            });

            if !self.settings.publish_poses {
                continue;
            }
            let region = clamp_region(&bbox, frame.width(), frame.height());
            match self.settings.depth_mode {
                DepthMode::Local => {
                    let Some(position) = self.locate(&region, &sensors) else {
                        debug!("{}: no usable depth, dropped", label);
                        continue;
                    };
                    report.poses.push(LocalizedDetection {
                        label,
                        confidence: det.confidence,
                        position: [position.x, position.y, position.z],
                        frame_id: frame_id.clone(),
                        stamp: frame.stamp,
                        kind: self.settings.model_name.clone(),
                    });
                }
                DepthMode::Remote => {
                    let (x, y) = match region {
                        Region::Box { x, y } => (x.to_vec(), y.to_vec()),
                        Region::Grid { xs, ys } => (xs, ys),
                    };
                    report.depth_queries.push(DepthQuery {
                        request: MedianDepthRequest {
                            stamp: frame.stamp,
                            x,
                            y,
                        },
                        context: DetectionContext {
                            label,
                            confidence: det.confidence,
                            stamp: frame.stamp,
                            frame_id: frame_id.clone(),
                            kind: self.settings.model_name.clone(),
                        },
                    });
                }
            }
        }

        Ok(FrameOutcome::Processed(report))
    }

    fn locate(&self, region: &Region, sensors: &SensorSnapshot) -> Option<nalgebra::Vector3<f32>> {
        let est = estimate(&sensors.depth, region, &self.settings.depth_range);
        if !est.is_valid() {
            return None;
        }
        localize(est.u, est.v, est.depth_m, &sensors.intrinsics)
    }
}

/// 元画像のボックス -> 深度サンプリング領域（画像内にクランプ）
pub fn clamp_region(bbox: &BBox, width: u32, height: u32) -> Region {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    Region::Box {
        x: [bbox.x.max(0.0), (bbox.x + bbox.width).min(max_x)],
        y: [bbox.y.max(0.0), (bbox.y + bbox.height).min(max_y)],
    }
}
