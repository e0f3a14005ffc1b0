//! Angle helpers shared by the spatializer.
//!
//! Angles are in degrees. Facing angles are measured in the XY plane, counter
//! clockwise from +X, matching the world coordinates of
//! [`SoundLocation`](crate::sound::SoundLocation).

pub use glam::Vec3;

/// Direction of the `(x, y)` vector in degrees, in `[0, 360)`.
pub fn vector_angle_degrees(x: f32, y: f32) -> f32 {
    let angle = y.atan2(x).to_degrees();
    if angle < 0.0 { angle + 360.0 } else { angle }
}

/// Signed difference `to - from`, normalized to `(-180, 180]`.
pub fn relative_angle_degrees(from: f32, to: f32) -> f32 {
    let mut delta = (to - from) % 360.0;
    if delta <= -180.0 {
        delta += 360.0;
    } else if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

pub fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + (b - a) * t
}
