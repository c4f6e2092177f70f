//! センサクライアントと検出ノード間の TCP プロトコル
//!
//! length-delimited フレーム1つに bincode メッセージ1つ

use bytes::Bytes;
use futures::{Sink, SinkExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::frame::Stamp;
use crate::report::{BoundingBoxArray, LocalizedDetection};

/// 受け付ける最大フレーム長。1920x1080 BGR で約6MB
pub const MAX_FRAME_LENGTH: usize = 32 * 1024 * 1024;

// --- Message types ---

/// Client → node
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Row-major 3x3 camera matrix K
    CameraInfo { k: [f64; 9] },
    ColorImage {
        stamp: Stamp,
        frame_id: String,
        width: u32,
        height: u32,
        /// Interleaved BGR8, row-major
        bgr: Vec<u8>,
    },
    DepthImage {
        stamp: Stamp,
        width: u32,
        height: u32,
        /// Millimeters, row-major
        depth_mm: Vec<f32>,
    },
}

/// Node → client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    BoundingBoxes(BoundingBoxArray),
    WorldInfo(LocalizedDetection),
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// length-delimited のメッセージストリームを作成
pub fn message_stream(stream: TcpStream) -> MessageStream {
    Framed::new(stream, codec())
}

pub fn encode<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(msg)?))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// メッセージを bincode + 長さプレフィックスで sink に送る
/// 通常は split した [`MessageStream`] の書き込み側
pub async fn send_to_sink<S, T>(sink: &mut S, msg: &T) -> anyhow::Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    T: Serialize,
{
    sink.send(encode(msg)?).await?;
    Ok(())
}

/// クライアントメッセージを1つデコードする
/// 壊れたペイロードはログを出して捨てる（接続は切らない）
pub fn decode_client_message(bytes: &[u8]) -> Option<ClientMessage> {
    match decode::<ClientMessage>(bytes) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!("dropping malformed message ({} bytes): {:#}", bytes.len(), e);
            None
        }
    }
}
