//! 検出パイプラインのエラー型
//!
//! 致命的なのは設定の問題だけ。壊れたフレームや推論失敗はそのフレームを捨てて続行する。
//! キャリブレーション未着や不正な幾何はエラーではなく、[`crate::pipeline::FrameOutcome`]
//! や検出の欠落として表れる

use thiserror::Error;

/// モデルと設定の不整合。直すまでフレームを処理できない
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Output tensor does not have the `[1, N, 5 + K]` layout.
    #[error("output tensor shape mismatch: expected [1, N, {expected}], got {actual:?}")]
    TensorShape {
        /// Expected record stride (5 + number of classes).
        expected: usize,
        /// Actual tensor shape.
        actual: Vec<usize>,
    },

    /// Label file missing or unparsable.
    #[error("failed to load label file {path}: {reason}")]
    LabelFile {
        /// Path of the label file.
        path: String,
        /// Underlying reason.
        reason: String,
    },

    /// Label file parsed but contains no classes.
    #[error("label set is empty")]
    NoLabels,

    /// 有効範囲外の設定値
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Dotted config key, e.g. `detection.input_size`.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The model could not be loaded or compiled.
    #[error("model initialization failed: {0}")]
    Model(String),
}

/// 宣言サイズと一致しないフレームバッファ
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Pixel buffer length disagrees with `width * height * channels`.
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSize {
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
    },

    /// Zero width or height.
    #[error("empty image")]
    EmptyImage,

    /// The resampler rejected the image.
    #[error("resize failed: {0}")]
    Resize(String),
}

/// パイプライン1回分で起こりうるエラー
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
}

impl PipelineError {
    /// 致命的エラーはノードを止める。それ以外はフレームを捨てるだけ
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
