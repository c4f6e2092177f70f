pub mod bbox;
pub mod decode;
pub mod labels;
pub mod letterbox;
pub mod nms;

pub use bbox::BBox;
pub use decode::{decode, Candidate, DecodeThresholds};
pub use labels::LabelSet;
pub use letterbox::{letterbox, LetterboxMapping, LetterboxedImage};
pub use nms::suppress;
