use std::time::Instant;

use anyhow::Result;
use ndarray::{Array3, ArrayD};

use object_locator::config::Config;
use object_locator::detect::decode::RECORD_HEADER;
use object_locator::detect::{letterbox, LabelSet, LetterboxedImage};
use object_locator::frame::{CameraIntrinsics, ColorFrame, DepthFrame, Stamp};
use object_locator::inference::{to_nchw_rgb, Detector};
use object_locator::pipeline::{FrameOutcome, Pipeline, PipelineSettings, SharedSensors};

/// YOLOv5s at 640 emits 25200 records
const RECORDS: usize = 25200;

/// Fixed tensor instead of a network, so only the CPU-side stages are timed
struct Synthetic(ArrayD<f32>);

impl Detector for Synthetic {
    fn infer(&mut self, _input: &LetterboxedImage) -> Result<ArrayD<f32>> {
        Ok(self.0.clone())
    }
}

/// Mostly background records with a handful of overlapping objects
fn synthetic_output(num_classes: usize) -> ArrayD<f32> {
    let stride = RECORD_HEADER + num_classes;
    let mut out = Array3::<f32>::zeros((1, RECORDS, stride));
    for i in 0..RECORDS {
        let cx = (i % 80) as f32 * 8.0;
        let cy = (i / 80 % 80) as f32 * 8.0;
        out[[0, i, 0]] = cx;
        out[[0, i, 1]] = cy;
        out[[0, i, 2]] = 40.0;
        out[[0, i, 3]] = 40.0;
        out[[0, i, 4]] = if i % 250 == 0 { 0.9 } else { 0.05 };
        out[[0, i, RECORD_HEADER + i % num_classes]] = 0.7;
    }
    out.into_dyn()
}

fn main() -> Result<()> {
    let config = Config::load_or_default("config.toml");
    let labels = LabelSet::hazmat();
    let output = synthetic_output(labels.len());

    let (width, height) = (1280u32, 720u32);
    let color = ColorFrame::from_bgr(width, height, vec![128; (width * height * 3) as usize], Stamp::default(), "camera")?;
    let depth = DepthFrame::from_raw(width, height, vec![1500.0; (width * height) as usize], Stamp::default())?;

    let sensors = SharedSensors::new();
    sensors.update_intrinsics(CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0));
    sensors.update_depth(depth);

    let iterations = 50;

    // 前処理のみ
    let start = Instant::now();
    for _ in 0..iterations {
        let boxed = letterbox(&color, config.detection.input_size, config.detection.pad_color)?;
        let _ = to_nchw_rgb(&boxed.pixels);
    }
    let pre_ms = start.elapsed().as_secs_f64() * 1000.0 / iterations as f64;

    // 後処理込みの1フレーム
    let mut pipeline = Pipeline::new(
        PipelineSettings::from_config(&config),
        labels,
        sensors,
        move || -> Result<Synthetic> { Ok(Synthetic(output)) },
    );
    let mut detections = 0;
    let start = Instant::now();
    for _ in 0..iterations {
        if let FrameOutcome::Processed(report) = pipeline.process_color(&color)? {
            detections = report.boxes.boxes.len();
        }
    }
    let frame_ms = start.elapsed().as_secs_f64() * 1000.0 / iterations as f64;

    println!("Letterbox + tensor: {:.2}ms/frame", pre_ms);
    println!("Full frame (no network): {:.2}ms/frame = {:.1} FPS, {} boxes", frame_ms, 1000.0 / frame_ms, detections);

    Ok(())
}
