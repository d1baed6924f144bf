use serde::{Deserialize, Serialize};

use crate::{
    camera::CameraDescriptor,
    observer::{Infall, ObserverParams},
    spacetime::Spacetime,
    Result,
};

/// Everything a frame depends on apart from the animation time and the
/// environment map. The relativity toggle travels with the scene so frames
/// with different settings can be rendered side by side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub camera: CameraDescriptor,
    pub observer: ObserverParams,
    /// Selects curved spacetime and the aberrating observer frame.
    pub relativity: bool,
    pub mass: f64,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera: CameraDescriptor::default(),
            observer: ObserverParams::default(),
            relativity: true,
            mass: 1.0,
        }
    }
}

impl Scene {
    pub fn validate(&self) -> Result<()> {
        self.spacetime()?;
        self.camera.validate()?;
        self.observer.validate(self.mass)
    }

    pub fn spacetime(&self) -> Result<Spacetime> {
        Spacetime::new(self.mass, self.relativity)
    }

    pub fn infall(&self) -> Result<Infall> {
        Infall::new(self.observer, self.mass)
    }
}
