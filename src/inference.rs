//! ネットワーク推論の境界
//!
//! パイプラインが必要とするのは「letterbox 画像を入れて `[1, N, 5 + K]` テンソルを得る」ことだけ。
//! モデルのビルドと実行を分け、ビルドはパイプラインが初めて準備完了になったときに1回だけ行う

use anyhow::Result;
use ndarray::{Array3, Array4, ArrayD};

use crate::detect::LetterboxedImage;

/// 推論を1回実行
pub trait Detector {
    fn infer(&mut self, input: &LetterboxedImage) -> Result<ArrayD<f32>>;
}

/// [`Detector`] をビルドする。消費されるので2回は走らない
pub trait ModelLoader {
    type Detector: Detector;

    fn load(self) -> Result<Self::Detector>;
}

impl<D, F> ModelLoader for F
where
    D: Detector,
    F: FnOnce() -> Result<D>,
{
    type Detector = D;

    fn load(self) -> Result<D> {
        self()
    }
}

/// BGR u8 HWC -> RGB f32 NCHW `[1, 3, H, W]`、[0, 1] に正規化
pub fn to_nchw_rgb(pixels: &Array3<u8>) -> Array4<f32> {
    let (h, w, _) = pixels.dim();
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for y in 0..h {
        for x in 0..w {
            // BGR -> RGB
            tensor[[0, 0, y, x]] = pixels[[y, x, 2]] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixels[[y, x, 1]] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixels[[y, x, 0]] as f32 / 255.0;
        }
    }
    tensor
}

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxDetector, OnnxModel};

#[cfg(feature = "onnx")]
mod onnx {
    use anyhow::{Context, Result};
    use ndarray::ArrayD;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::PathBuf;

    use super::{to_nchw_rgb, Detector, ModelLoader};
    use crate::detect::LetterboxedImage;

    /// ディスク上の ONNX モデル（未コンパイル）
    #[derive(Debug, Clone)]
    pub struct OnnxModel {
        pub path: PathBuf,
    }

    impl OnnxModel {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    impl ModelLoader for OnnxModel {
        type Detector = OnnxDetector;

        fn load(self) -> Result<OnnxDetector> {
            let builder = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?;

            #[cfg(feature = "cuda")]
            let builder = {
                tracing::info!("attempting CUDA execution provider");
                builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default().build(),
                ])?
            };

            let session = builder
                .commit_from_file(&self.path)
                .with_context(|| format!("Failed to load ONNX model {}", self.path.display()))?;
            tracing::info!("model loaded: {}", self.path.display());
            Ok(OnnxDetector { session })
        }
    }

    /// YOLOv5 形式検出器のコンパイル済みセッション
    pub struct OnnxDetector {
        session: Session,
    }

    impl Detector for OnnxDetector {
        fn infer(&mut self, input: &LetterboxedImage) -> Result<ArrayD<f32>> {
            let input_tensor = Tensor::from_array(to_nchw_rgb(&input.pixels))?;
            let outputs = self
                .session
                .run(ort::inputs![input_tensor])
                .context("Inference failed")?;

            let output: ndarray::ArrayViewD<f32> = outputs[0]
                .try_extract_array()
                .context("Failed to extract output tensor")?;
            Ok(output.to_owned())
        }
    }
}
