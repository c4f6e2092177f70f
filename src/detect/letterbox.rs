use fast_image_resize as fr;
use ndarray::{s, Array3};

use super::bbox::BBox;
use crate::error::FrameError;
use crate::frame::ColorFrame;

/// 正方形のネットワーク入力に対するリサイズ + パディングのパラメータ
///
/// 画像を `scale` 倍して `new_w x new_h` にし、右に `pad_w`、下に `pad_h` を詰める。
/// 計算元のフレームにだけ有効
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxMapping {
    pub src_width: u32,
    pub src_height: u32,
    pub target: u32,
    pub scale: f32,
    pub new_width: u32,
    pub new_height: u32,
    pub pad_w: u32,
    pub pad_h: u32,
}

impl LetterboxMapping {
    /// `target` が 0 なら 1 として扱う（`Config::load` で事前に弾く）
    pub fn compute(src_width: u32, src_height: u32, target: u32) -> Self {
        let target = target.max(1);
        let w = src_width as f32;
        let h = src_height as f32;
        let scale = target as f32 / w.max(h);
        // 極端に細長い画像でも1pxは残す
        let new_width = ((w * scale).round() as u32).clamp(1, target);
        let new_height = ((h * scale).round() as u32).clamp(1, target);

        Self {
            src_width,
            src_height,
            target,
            scale,
            new_width,
            new_height,
            pad_w: target - new_width,
            pad_h: target - new_height,
        }
    }

    /// 軸ごとの 元画像 / リサイズ画像 の比率。パディングは分母に含めない
    pub fn inverse_ratio(&self) -> (f32, f32) {
        (
            self.src_width as f32 / (self.target - self.pad_w) as f32,
            self.src_height as f32 / (self.target - self.pad_h) as f32,
        )
    }

    /// リサイズ画像のボックス -> 元画像のボックス
    pub fn unscale_box(&self, bbox: &BBox) -> BBox {
        let (rx, ry) = self.inverse_ratio();
        bbox.scaled(rx, ry)
    }

    /// 元画像のボックス -> リサイズ画像のボックス
    pub fn scale_box(&self, bbox: &BBox) -> BBox {
        let (rx, ry) = self.inverse_ratio();
        bbox.scaled(1.0 / rx, 1.0 / ry)
    }
}

/// 正方形のネットワーク入力と、元フレームへの逆変換
#[derive(Debug, Clone)]
pub struct LetterboxedImage {
    /// BGR8, `[target, target, 3]`
    pub pixels: Array3<u8>,
    pub mapping: LetterboxMapping,
}

/// 縮小・リサイズ後、右と下を `pad_color` で埋める
pub fn letterbox(frame: &ColorFrame, target: u32, pad_color: [u8; 3]) -> Result<LetterboxedImage, FrameError> {
    let mapping = LetterboxMapping::compute(frame.width(), frame.height(), target);
    let resized = resize(&frame.pixels, mapping.new_width, mapping.new_height)?;

    let t = mapping.target as usize;
    let (new_w, new_h) = (mapping.new_width as usize, mapping.new_height as usize);
    let mut pixels = Array3::<u8>::zeros((t, t, 3));
    for c in 0..3 {
        pixels.slice_mut(s![.., .., c]).fill(pad_color[c]);
    }
    pixels.slice_mut(s![0..new_h, 0..new_w, ..]).assign(&resized);

    Ok(LetterboxedImage { pixels, mapping })
}

/// 3チャンネル u8 画像のリサイズ
///
/// 縮小は面積平均（Box）、拡大はバイリニア。OpenCV の INTER_AREA と同じ使い分け。
pub fn resize(src: &Array3<u8>, new_width: u32, new_height: u32) -> Result<Array3<u8>, FrameError> {
    let (src_h, src_w, channels) = src.dim();
    if src_h == 0 || src_w == 0 || new_width == 0 || new_height == 0 {
        return Err(FrameError::EmptyImage);
    }
    if channels != 3 {
        return Err(FrameError::Resize(format!("expected 3 channels, got {}", channels)));
    }

    let contiguous = src.as_standard_layout();
    let data = contiguous
        .as_slice()
        .ok_or_else(|| FrameError::Resize("non-contiguous source".to_string()))?;
    let src_image = fr::images::ImageRef::new(src_w as u32, src_h as u32, data, fr::PixelType::U8x3)
        .map_err(|e| FrameError::Resize(e.to_string()))?;
    let mut dst_image = fr::images::Image::new(new_width, new_height, fr::PixelType::U8x3);

    let enlarging = new_width as usize > src_w || new_height as usize > src_h;
    let filter = if enlarging {
        fr::FilterType::Bilinear
    } else {
        fr::FilterType::Box
    };
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter));
    fr::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| FrameError::Resize(e.to_string()))?;

    Array3::from_shape_vec((new_height as usize, new_width as usize, 3), dst_image.into_vec())
        .map_err(|e| FrameError::Resize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Stamp;

    fn solid_frame(width: u32, height: u32, bgr: [u8; 3]) -> ColorFrame {
        let data: Vec<u8> = (0..width * height).flat_map(|_| bgr).collect();
        ColorFrame::from_bgr(width, height, data, Stamp::default(), "cam").unwrap()
    }

    #[test]
    fn test_mapping_landscape() {
        let m = LetterboxMapping::compute(1280, 720, 640);
        assert!((m.scale - 0.5).abs() < 1e-6);
        assert_eq!((m.new_width, m.new_height), (640, 360));
        assert_eq!((m.pad_w, m.pad_h), (0, 280));
    }

    #[test]
    fn test_mapping_portrait() {
        let m = LetterboxMapping::compute(480, 640, 640);
        assert_eq!((m.new_width, m.new_height), (480, 640));
        assert_eq!((m.pad_w, m.pad_h), (160, 0));
    }

    #[test]
    fn test_mapping_rounds_new_size() {
        // 640 / 1000 = 0.64, 333 * 0.64 = 213.12 -> 213
        let m = LetterboxMapping::compute(1000, 333, 640);
        assert_eq!(m.new_width, 640);
        assert_eq!(m.new_height, 213);
        assert_eq!(m.pad_h, 427);
    }

    #[test]
    fn test_inverse_ratio_excludes_padding() {
        let m = LetterboxMapping::compute(1280, 720, 640);
        let (rx, ry) = m.inverse_ratio();
        assert!((rx - 2.0).abs() < 1e-6);
        assert!((ry - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_round_trip() {
        for &(w, h) in &[(1280u32, 720u32), (640, 480), (1000, 333), (300, 900)] {
            let m = LetterboxMapping::compute(w, h, 640);
            let native = BBox::new(12.5, 40.0, 100.25, 63.0);
            let back = m.unscale_box(&m.scale_box(&native));
            assert!((back.x - native.x).abs() < 1e-3, "{}x{}: {:?}", w, h, back);
            assert!((back.y - native.y).abs() < 1e-3, "{}x{}: {:?}", w, h, back);
            assert!((back.width - native.width).abs() < 1e-3, "{}x{}: {:?}", w, h, back);
            assert!((back.height - native.height).abs() < 1e-3, "{}x{}: {:?}", w, h, back);
        }
    }

    #[test]
    fn test_letterbox_pads_bottom_right() {
        let frame = solid_frame(8, 4, [10, 20, 30]);
        let out = letterbox(&frame, 4, [100, 100, 100]).unwrap();
        assert_eq!(out.pixels.dim(), (4, 4, 3));
        assert_eq!((out.mapping.new_width, out.mapping.new_height), (4, 2));

        // 画像部分
        assert_eq!(out.pixels[[0, 0, 0]], 10);
        assert_eq!(out.pixels[[1, 3, 2]], 30);
        // パディング部分
        assert_eq!(out.pixels[[2, 0, 0]], 100);
        assert_eq!(out.pixels[[3, 3, 1]], 100);
    }

    #[test]
    fn test_zero_target_does_not_panic() {
        let m = LetterboxMapping::compute(640, 480, 0);
        assert_eq!(m.target, 1);
        assert_eq!((m.new_width, m.new_height), (1, 1));
        assert_eq!((m.pad_w, m.pad_h), (0, 0));
    }

    #[test]
    fn test_resize_averages_blocks() {
        // 4x2 -> 2x1、全チャンネル同じ値
        let values = [[0u8, 100, 50, 50], [100, 200, 50, 50]];
        let mut src = Array3::<u8>::zeros((2, 4, 3));
        for (row, line) in values.iter().enumerate() {
            for (col, &v) in line.iter().enumerate() {
                src.slice_mut(s![row, col, ..]).fill(v);
            }
        }

        let dst = resize(&src, 2, 1).unwrap();
        assert_eq!(dst.dim(), (1, 2, 3));
        assert!((dst[[0, 0, 0]] as i32 - 100).abs() <= 1, "{:?}", dst);
        assert!((dst[[0, 1, 2]] as i32 - 50).abs() <= 1, "{:?}", dst);
    }

    #[test]
    fn test_resize_enlarging_interpolates() {
        // 2x1 [0, 100] -> 4x1: 拡大はブロック複製ではなく線形補間
        let mut src = Array3::<u8>::zeros((1, 2, 3));
        src.slice_mut(s![0, 1, ..]).fill(100);

        let dst = resize(&src, 4, 1).unwrap();
        let row: Vec<i32> = (0..4).map(|x| dst[[0, x, 1]] as i32).collect();
        let expected = [0, 25, 75, 100];
        for (got, want) in row.iter().zip(expected) {
            assert!((got - want).abs() <= 2, "{:?}", row);
        }
    }

    #[test]
    fn test_small_frame_letterbox_upscales() {
        let mut frame = solid_frame(2, 1, [0, 0, 0]);
        frame.pixels.slice_mut(s![0, 1, ..]).fill(100);
        let out = letterbox(&frame, 4, [100, 100, 100]).unwrap();
        assert_eq!((out.mapping.new_width, out.mapping.new_height), (4, 2));
        let v = out.pixels[[0, 1, 0]] as i32;
        assert!(v > 5 && v < 60, "{}", v);
    }

    #[test]
    fn test_resize_identity() {
        let frame = solid_frame(5, 3, [1, 2, 3]);
        let dst = resize(&frame.pixels, 5, 3).unwrap();
        assert_eq!(dst, frame.pixels);
    }
}
