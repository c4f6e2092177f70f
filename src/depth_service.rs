//! 中央値深度のリクエスト/レスポンスサービス
//!
//! カラー処理の外で深度を引く場合（`depth_mode = "remote"`）に使う。
//! サービスは [`SharedSensors`] を保持し、[`MedianDepthRequest`] にカメラ座標の点で答える。
//! 呼び出し側は [`DepthQuery`] を投げ、[`DetectionContext`] はリクエストと一緒に
//! 完了ハンドラへ渡される。完了順は不定なので、対応付けは context の stamp だけで行う。

use anyhow::{anyhow, Context, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frame::Stamp;
use crate::localize::{estimate, is_valid_position, optical_to_pose, pixel_to_point, DepthRange, Region};
use crate::pipeline::SharedSensors;
use crate::report::LocalizedDetection;

/// x が2個なら矩形、それ以外は全 x と全 y の組み合わせ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianDepthRequest {
    pub stamp: Stamp,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

/// カメラ座標（X右, Y下, Z前方）メートル単位。不明なら NaN
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MedianDepthResponse {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MedianDepthResponse {
    pub fn unknown() -> Self {
        Self {
            x: f32::NAN,
            y: f32::NAN,
            z: f32::NAN,
        }
    }
}

/// 完了ハンドラが検出結果を publish するのに必要な情報
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionContext {
    pub label: String,
    pub confidence: f32,
    pub stamp: Stamp,
    pub frame_id: String,
    pub kind: String,
}

impl DetectionContext {
    /// 応答を出力座標系に変換。NaN/Inf やゼロベクトルなら None
    pub fn complete(self, response: &MedianDepthResponse) -> Option<LocalizedDetection> {
        let pose = optical_to_pose(&Point3::new(response.x, response.y, response.z));
        if !is_valid_position(&pose) {
            return None;
        }
        Some(LocalizedDetection {
            label: self.label,
            confidence: self.confidence,
            position: [pose.x, pose.y, pose.z],
            frame_id: self.frame_id,
            stamp: self.stamp,
            kind: self.kind,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthQuery {
    pub request: MedianDepthRequest,
    pub context: DetectionContext,
}

// ---------------------------------------------------------------------------

pub struct DepthService {
    sensors: SharedSensors,
    range: DepthRange,
}

impl DepthService {
    pub fn new(sensors: SharedSensors, range: DepthRange) -> Self {
        Self { sensors, range }
    }

    /// 最新の深度フレームで1リクエストに答える
    pub fn median_depth(&self, request: &MedianDepthRequest) -> MedianDepthResponse {
        let Some(snapshot) = self.sensors.snapshot() else {
            return MedianDepthResponse::unknown();
        };
        if request.x.is_empty() || request.y.is_empty() {
            return MedianDepthResponse::unknown();
        }
        let region = Region::from_coords(request.x.clone(), request.y.clone());
        let est = estimate(&snapshot.depth, &region, &self.range);
        let p = pixel_to_point(est.u, est.v, est.depth_m, &snapshot.intrinsics);
        debug!(
            "median depth {:.3}m from {} samples at ({:.1}, {:.1})",
            est.depth_m, est.sample_count, est.u, est.v
        );
        MedianDepthResponse { x: p.x, y: p.y, z: p.z }
    }

    /// tokio タスクでリクエストを処理する。ランタイム内から呼ぶこと
    pub fn spawn(self, capacity: usize) -> DepthClient {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let handle = Handle::current();
        handle.spawn(async move {
            info!("depth service started");
            while let Some((request, reply)) = rx.recv().await {
                let _ = reply.send(self.median_depth(&request));
            }
            info!("depth service stopped");
        });
        DepthClient { tx, handle }
    }
}

type Job = (MedianDepthRequest, oneshot::Sender<MedianDepthResponse>);

/// clone して使う。ブロッキングスレッドからは [`DepthClient::submit`] 経由
#[derive(Clone)]
pub struct DepthClient {
    tx: mpsc::Sender<Job>,
    handle: Handle,
}

impl DepthClient {
    pub async fn request(&self, request: MedianDepthRequest) -> Result<MedianDepthResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| anyhow!("depth service is not running"))?;
        reply_rx.await.context("depth service dropped the request")
    }

    /// クエリを投げる。`on_complete` は有効な応答のときだけ呼ばれる
    pub fn submit<F>(&self, query: DepthQuery, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(LocalizedDetection) + Send + 'static,
    {
        let client = self.clone();
        self.handle.spawn(async move {
            let DepthQuery { request, context } = query;
            match client.request(request).await {
                Ok(response) => {
                    let label = context.label.clone();
                    match context.complete(&response) {
                        Some(det) => on_complete(det),
                        None => debug!("{}: depth lookup gave no usable point, dropped", label),
                    }
                }
                Err(e) => warn!("depth lookup failed: {:#}", e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RangeCheck;
    use crate::frame::{CameraIntrinsics, DepthFrame};

    fn ready_sensors(mm: f32) -> SharedSensors {
        let sensors = SharedSensors::new();
        sensors.update_intrinsics(CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0));
        let frame = DepthFrame::from_raw(640, 480, vec![mm; 640 * 480], Stamp::default()).unwrap();
        sensors.update_depth(frame);
        sensors
    }

    fn box_request(stamp: Stamp) -> MedianDepthRequest {
        MedianDepthRequest {
            stamp,
            x: vec![300.0, 340.0],
            y: vec![220.0, 260.0],
        }
    }

    fn context(stamp: Stamp) -> DetectionContext {
        DetectionContext {
            label: "oxygen".to_string(),
            confidence: 0.95,
            stamp,
            frame_id: "camera".to_string(),
            kind: "hazmat".to_string(),
        }
    }

    #[test]
    fn test_median_depth_at_principal_point() {
        let service = DepthService::new(ready_sensors(2000.0), DepthRange::default());
        let r = service.median_depth(&box_request(Stamp::default()));
        assert!(r.x.abs() < 1e-6);
        assert!(r.y.abs() < 1e-6);
        assert!((r.z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_before_ready() {
        let service = DepthService::new(SharedSensors::new(), DepthRange::default());
        let r = service.median_depth(&box_request(Stamp::default()));
        assert!(r.z.is_nan());
    }

    #[test]
    fn test_grid_request() {
        let service = DepthService::new(ready_sensors(1000.0), DepthRange::default());
        let r = service.median_depth(&MedianDepthRequest {
            stamp: Stamp::default(),
            x: vec![320.0, 321.0, 322.0],
            y: vec![240.0],
        });
        assert!((r.z - 1.0).abs() < 1e-6);
        assert!((r.x - 0.002).abs() < 1e-6);
    }

    #[test]
    fn test_complete_rejects_zero_and_nan() {
        let zero = MedianDepthResponse { x: 0.0, y: 0.0, z: 0.0 };
        assert!(context(Stamp::default()).complete(&zero).is_none());
        assert!(context(Stamp::default()).complete(&MedianDepthResponse::unknown()).is_none());

        let ok = MedianDepthResponse { x: 0.1, y: -0.2, z: 1.5 };
        let det = context(Stamp::new(3, 0)).complete(&ok).unwrap();
        assert_eq!(det.position, [1.5, -0.1, 0.2]);
        assert_eq!(det.stamp, Stamp::new(3, 0));
        assert_eq!(det.label, "oxygen");
    }

    #[tokio::test]
    async fn test_request_roundtrip_through_task() {
        let client = DepthService::new(ready_sensors(2000.0), DepthRange::default()).spawn(4);
        let r = client.request(box_request(Stamp::default())).await.unwrap();
        assert!((r.z - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_submit_carries_context() {
        let client = DepthService::new(ready_sensors(2000.0), DepthRange::default()).spawn(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for sec in 0..3 {
            let stamp = Stamp::new(sec, 0);
            let tx = tx.clone();
            let query = DepthQuery {
                request: box_request(stamp),
                context: context(stamp),
            };
            handles.push(client.submit(query, move |det| {
                let _ = tx.send(det);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut stamps = Vec::new();
        while let Ok(det) = rx.try_recv() {
            assert_eq!(det.label, "oxygen");
            assert!((det.position[0] - 2.0).abs() < 1e-6);
            stamps.push(det.stamp);
        }
        // 到着順は保証しない
        stamps.sort();
        assert_eq!(stamps, vec![Stamp::new(0, 0), Stamp::new(1, 0), Stamp::new(2, 0)]);
    }

    #[tokio::test]
    async fn test_submit_drops_zero_depth_in_legacy_mode() {
        let range = DepthRange {
            check: RangeCheck::Legacy,
            ..DepthRange::default()
        };
        let client = DepthService::new(ready_sensors(0.0), range).spawn(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let query = DepthQuery {
            request: box_request(Stamp::default()),
            context: context(Stamp::default()),
        };
        client
            .submit(query, move |det| {
                let _ = tx.send(det);
            })
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
