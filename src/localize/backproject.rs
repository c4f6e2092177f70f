use nalgebra::{Point3, Vector3};

use crate::frame::CameraIntrinsics;

/// ピクセル + 深度 -> カメラ座標（X右, Y下, Z前方）
pub fn pixel_to_point(u: f32, v: f32, depth: f32, intrinsics: &CameraIntrinsics) -> Point3<f32> {
    Point3::new(
        (u - intrinsics.cx) * depth / intrinsics.fx,
        (v - intrinsics.cy) * depth / intrinsics.fy,
        depth,
    )
}

/// カメラ光学座標 -> 出力座標系（X前方, Y左, Z上）
pub fn optical_to_pose(p: &Point3<f32>) -> Vector3<f32> {
    Vector3::new(p.z, -p.x, -p.y)
}

/// NaN/Inf を含む、またはゼロベクトルなら不正
pub fn is_valid_position(v: &Vector3<f32>) -> bool {
    v.iter().all(|c| c.is_finite()) && v.iter().any(|&c| c != 0.0)
}

/// 逆投影して座標変換。不正な幾何なら None
pub fn localize(u: f32, v: f32, depth: f32, intrinsics: &CameraIntrinsics) -> Option<Vector3<f32>> {
    let pose = optical_to_pose(&pixel_to_point(u, v, depth, intrinsics));
    is_valid_position(&pose).then_some(pose)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    #[test]
    fn test_principal_point() {
        let pose = localize(320.0, 240.0, 2.0, &intrinsics()).unwrap();
        assert_eq!(pose.x, 2.0);
        assert_eq!(pose.y, 0.0);
        assert_eq!(pose.z, 0.0);
    }

    #[test]
    fn test_off_axis_pixel() {
        // 右下のピクセル → カメラ座標 x>0, y>0 → 出力 y<0 (右), z<0 (下)
        let p = pixel_to_point(420.0, 290.0, 2.0, &intrinsics());
        assert!((p.x - 0.4).abs() < 1e-6);
        assert!((p.y - 0.2).abs() < 1e-6);
        assert_eq!(p.z, 2.0);

        let pose = optical_to_pose(&p);
        assert!((pose.x - 2.0).abs() < 1e-6);
        assert!((pose.y + 0.4).abs() < 1e-6);
        assert!((pose.z + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_nan_depth_dropped() {
        assert!(localize(100.0, 100.0, f32::NAN, &intrinsics()).is_none());
    }

    #[test]
    fn test_infinite_result_dropped() {
        let degenerate = CameraIntrinsics::new(0.0, 500.0, 320.0, 240.0);
        assert!(localize(400.0, 240.0, 1.0, &degenerate).is_none());
        assert!(localize(320.0, 240.0, f32::INFINITY, &intrinsics()).is_none());
    }

    #[test]
    fn test_zero_depth_dropped() {
        assert!(localize(100.0, 100.0, 0.0, &intrinsics()).is_none());
    }
}
