use super::AtomicF32;
use crate::math::Vec3;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "location#{}", self.0)
    }
}

/// A position and facing owned by game logic.
///
/// Written from any thread, read by the processing thread once per voice
/// update. Components are independent atomics, so a reader may observe a
/// half-updated position for one tick.
#[derive(Debug)]
pub struct SoundLocation {
    id: LocationId,
    x: AtomicF32,
    y: AtomicF32,
    z: AtomicF32,
    angle: AtomicF32,
}

impl SoundLocation {
    pub fn new(position: Vec3, angle: f32) -> Self {
        Self {
            id: LocationId(NEXT_LOCATION_ID.fetch_add(1, Ordering::Relaxed)),
            x: AtomicF32::new(position.x),
            y: AtomicF32::new(position.y),
            z: AtomicF32::new(position.z),
            angle: AtomicF32::new(angle),
        }
    }

    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self::new(Vec3::new(x, y, z), 0.0)
    }

    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x.load(), self.y.load(), self.z.load())
    }

    pub fn set_position(&self, position: Vec3) {
        self.x.store(position.x);
        self.y.store(position.y);
        self.z.store(position.z);
    }

    /// Facing in degrees, counter clockwise from +X in the XY plane.
    pub fn angle(&self) -> f32 {
        self.angle.load()
    }

    pub fn set_angle(&self, angle: f32) {
        self.angle.store(angle);
    }
}

impl Default for SoundLocation {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_updates() {
        let location = SoundLocation::at(1.0, 2.0, 3.0);
        location.set_position(Vec3::new(4.0, 5.0, 6.0));
        location.set_angle(90.0);
        assert_eq!(location.position(), Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(location.angle(), 90.0);
        assert_ne!(location.id(), SoundLocation::default().id());
    }
}
