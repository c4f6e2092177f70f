use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub depth: DepthConfig,
}

/// 深度をどこで引くか
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepthMode {
    /// カラー処理内で保持中の深度フレームをサンプル
    #[default]
    Local,
    /// 深度サービスに問い合わせ、完了ハンドラから publish
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// `<weights_dir>/<model_name>.onnx` とラベルファイル名の両方に使う
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_weights_dir")]
    pub weights_dir: String,
    /// 出力 frame id。空ならカラー画像の frame id を使う
    #[serde(default)]
    pub camera_frame_id: String,
    #[serde(default)]
    pub depth_mode: DepthMode,
    /// 3D位置を出すかどうか（ボックスは常に出す）
    #[serde(default = "default_publish_poses")]
    pub publish_poses: bool,
    /// 推論スレッド待ちのカラーフレーム数。超えたら新しいものを捨てる
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:9100".to_string() }
fn default_model_name() -> String { "hazmat".to_string() }
fn default_weights_dir() -> String { "weights".to_string() }
fn default_publish_poses() -> bool { true }
fn default_frame_queue() -> usize { 1 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            model_name: default_model_name(),
            weights_dir: default_weights_dir(),
            camera_frame_id: String::new(),
            depth_mode: DepthMode::default(),
            publish_poses: default_publish_poses(),
            frame_queue: default_frame_queue(),
        }
    }
}

impl NodeConfig {
    pub fn model_path(&self) -> PathBuf {
        Path::new(&self.weights_dir).join(format!("{}.onnx", self.model_name))
    }

    pub fn label_path(&self) -> PathBuf {
        Path::new(&self.weights_dir).join(format!("{}.yaml", self.model_name))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// objectness の下限（以上）
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// 最大クラススコアはこれより大きいこと
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// これを超える IoU で弱い方を抑制
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    /// letterbox の一辺
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// letterbox パディングの BGR 色
    #[serde(default = "default_pad_color")]
    pub pad_color: [u8; 3],
}

fn default_confidence_threshold() -> f32 { 0.8 }
fn default_score_threshold() -> f32 { 0.2 }
fn default_nms_threshold() -> f32 { 0.4 }
fn default_input_size() -> u32 { 640 }
fn default_pad_color() -> [u8; 3] { [100, 100, 100] }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            score_threshold: default_score_threshold(),
            nms_threshold: default_nms_threshold(),
            input_size: default_input_size(),
            pad_color: default_pad_color(),
        }
    }
}

/// 中央値に入れる深度サンプルの判定方法
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RangeCheck {
    /// Keep `min < d < max`
    #[default]
    Strict,
    /// 全サンプルを採用（連鎖比較 `min < d < max` と同じ挙動）
    Legacy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepthConfig {
    /// 下限（メートル、境界含まず）
    #[serde(default = "default_min_m")]
    pub min_m: f32,
    /// 上限（メートル、境界含まず）
    #[serde(default = "default_max_m")]
    pub max_m: f32,
    /// 生の深度値 -> メートル
    #[serde(default = "default_depth_scale")]
    pub scale: f32,
    #[serde(default)]
    pub range_check: RangeCheck,
}

fn default_min_m() -> f32 { 0.01 }
fn default_max_m() -> f32 { 4.0 }
fn default_depth_scale() -> f32 { 0.001 }

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            min_m: default_min_m(),
            max_m: default_max_m(),
            scale: default_depth_scale(),
            range_check: RangeCheck::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// 値の範囲チェック。0 サイズの入力や範囲外のしきい値はここで弾く
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.input_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detection.input_size",
                reason: "must be greater than 0".to_string(),
            });
        }
        for (field, value) in [
            ("detection.confidence_threshold", d.confidence_threshold),
            ("detection.score_threshold", d.score_threshold),
            ("detection.nms_threshold", d.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }

        let depth = &self.depth;
        if !(depth.scale.is_finite() && depth.scale > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "depth.scale",
                reason: format!("{} must be a positive number", depth.scale),
            });
        }
        if !(depth.min_m.is_finite() && depth.max_m.is_finite() && depth.min_m < depth.max_m) {
            return Err(ConfigError::InvalidValue {
                field: "depth.min_m",
                reason: format!("range [{}, {}] is empty", depth.min_m, depth.max_m),
            });
        }
        Ok(())
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}; using default configuration", e);
                Self::default()
            }
        }
    }
}
