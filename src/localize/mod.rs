pub mod backproject;
pub mod depth;

pub use backproject::{is_valid_position, localize, optical_to_pose, pixel_to_point};
pub use depth::{estimate, median, DepthEstimate, DepthRange, Region};
