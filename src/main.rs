//! 検出ノード: TCP でカラー/深度/カメラ情報を受け取り、検出器を回して
//! バウンディングボックスと3D位置を返す

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use object_locator::config::{Config, DepthMode};
use object_locator::depth_service::{DepthClient, DepthService};
use object_locator::detect::LabelSet;
use object_locator::error::PipelineError;
use object_locator::frame::{CameraIntrinsics, ColorFrame, DepthFrame, Stamp};
use object_locator::inference::OnnxModel;
use object_locator::pipeline::{FrameOutcome, Pipeline, PipelineSettings, SharedSensors};
use object_locator::protocol::{self, ClientMessage, ServerMessage};

// ===========================================================================
// Logging
// ===========================================================================

fn init_logging() -> Result<PathBuf> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(format!("logs/detection_{}.log", ts));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(path)
}

// ===========================================================================
// TCP receive loop
// ===========================================================================

struct RawColor {
    stamp: Stamp,
    frame_id: String,
    width: u32,
    height: u32,
    bgr: Vec<u8>,
}

/// 深度とカメラ情報は共有状態に直接書く
/// カラー画像はパイプラインスレッドのキューへ。詰まっていれば捨てる
async fn tcp_receive_loop(
    stream: tokio::net::TcpStream,
    tx: mpsc::SyncSender<RawColor>,
    mut out_rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    sensors: SharedSensors,
    frame_drop_count: Arc<AtomicU32>,
) -> Result<()> {
    use futures::StreamExt as _;

    let framed = protocol::message_stream(stream);
    let (mut sink, mut reader) = framed.split();

    loop {
        tokio::select! {
            result = reader.next() => {
                let bytes = match result {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(anyhow::anyhow!("connection closed")),
                };
                // 壊れたメッセージはそのフレームだけ捨てて接続は維持する
                let Some(msg) = protocol::decode_client_message(&bytes) else {
                    continue;
                };
                match msg {
                    ClientMessage::CameraInfo { k } => {
                        sensors.update_intrinsics(CameraIntrinsics::from_k(&k));
                    }
                    ClientMessage::DepthImage { stamp, width, height, depth_mm } => {
                        match DepthFrame::from_raw(width, height, depth_mm, stamp) {
                            Ok(frame) => { sensors.update_depth(frame); }
                            Err(e) => warn!("dropping depth image: {}", e),
                        }
                    }
                    ClientMessage::ColorImage { stamp, frame_id, width, height, bgr } => {
                        let raw = RawColor { stamp, frame_id, width, height, bgr };
                        if tx.try_send(raw).is_err() {
                            frame_drop_count.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            Some(out_msg) = out_rx.recv() => {
                protocol::send_to_sink(&mut sink, &out_msg).await?;
            }
        }
    }
}

// ===========================================================================
// Pipeline loop (sync, blocking)
// ===========================================================================

/// Err を返すのは設定起因の致命的エラーのみ
fn run_pipeline_loop(
    rx: &mpsc::Receiver<RawColor>,
    pipeline: &mut Pipeline<OnnxModel>,
    depth_client: Option<&DepthClient>,
    out_tx: &tokio::sync::mpsc::Sender<ServerMessage>,
    frame_drop_count: &AtomicU32,
) -> Result<()> {
    let mut frames: u32 = 0;
    let mut published: u32 = 0;
    let mut stats_timer = Instant::now();

    loop {
        let raw = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(raw) => raw,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("TCP channel disconnected");
                return Ok(());
            }
        };

        let outcome = ColorFrame::from_bgr(raw.width, raw.height, raw.bgr, raw.stamp, raw.frame_id)
            .map_err(PipelineError::from)
            .and_then(|frame| pipeline.process_color(&frame));

        match outcome {
            Ok(FrameOutcome::NotReady) => {}
            Ok(FrameOutcome::Processed(report)) => {
                frames += 1;
                let _ = out_tx.blocking_send(ServerMessage::BoundingBoxes(report.boxes));
                for det in report.poses {
                    published += 1;
                    let _ = out_tx.blocking_send(ServerMessage::WorldInfo(det));
                }
                if let Some(client) = depth_client {
                    for query in report.depth_queries {
                        let tx = out_tx.clone();
                        client.submit(query, move |det| {
                            if tx.try_send(ServerMessage::WorldInfo(det)).is_err() {
                                warn!("output queue full, dropping localized detection");
                            }
                        });
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                error!("{}", e);
                return Err(e.into());
            }
            Err(e) => warn!("frame dropped: {}", e),
        }

        let elapsed = stats_timer.elapsed();
        if elapsed >= Duration::from_secs(5) {
            let drops = frame_drop_count.swap(0, Ordering::Relaxed);
            info!(
                "FPS: {:.1} (localized: {} drop: {})",
                frames as f32 / elapsed.as_secs_f32(),
                published,
                drops
            );
            frames = 0;
            published = 0;
            stats_timer = Instant::now();
        }
    }
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let log_path = init_logging()?;
    let config = Config::load_or_default(&config_path);

    info!("Detection Node ({})", env!("GIT_VERSION"));
    info!("Log: {}", log_path.display());
    info!("Listen: {}", config.node.listen_addr);
    info!("Model: {}", config.node.model_path().display());
    info!("Depth mode: {:?}", config.node.depth_mode);

    let labels = LabelSet::for_model(&config.node.model_name, config.node.label_path())?;
    info!("Labels: {} classes", labels.len());

    let sensors = SharedSensors::new();
    let settings = PipelineSettings::from_config(&config);
    let depth_client = match config.node.depth_mode {
        DepthMode::Remote => Some(DepthService::new(sensors.clone(), settings.depth_range).spawn(64)),
        DepthMode::Local => None,
    };
    let mut pipeline = Pipeline::new(
        settings,
        labels,
        sensors.clone(),
        OnnxModel::new(config.node.model_path()),
    );

    let bind_addr: std::net::SocketAddr = config.node.listen_addr.parse()
        .context("invalid listen_addr")?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Listening on {}", bind_addr);

    loop {
        let (tcp_stream, addr) = listener.accept().await?;
        tcp_stream.set_nodelay(true)?;
        info!("Client connected: {}", addr);

        let (tx, rx) = mpsc::sync_channel::<RawColor>(config.node.frame_queue.max(1));
        let (out_tx, out_rx) = tokio::sync::mpsc::channel::<ServerMessage>(64);
        let frame_drop_count = Arc::new(AtomicU32::new(0));
        let frame_drop_count2 = Arc::clone(&frame_drop_count);
        let sensors2 = sensors.clone();

        let tcp_task = tokio::spawn(async move {
            if let Err(e) = tcp_receive_loop(tcp_stream, tx, out_rx, sensors2, frame_drop_count2).await {
                warn!("TCP error: {}", e);
            }
        });

        let result = tokio::task::block_in_place(|| {
            run_pipeline_loop(&rx, &mut pipeline, depth_client.as_ref(), &out_tx, &frame_drop_count)
        });

        tcp_task.abort();
        if let Err(e) = result {
            bail!("configuration error, shutting down: {:#}", e);
        }
        info!("Client disconnected, waiting for next connection...");
    }
}
