//! Boundary with the keyframe timeline.
//!
//! The core never stores keyframes. It asks an [`AnimationSource`] for the
//! resolved value of each known property at a given time and folds the
//! answers into a copy of the base scene. Time is the observer's proper time.

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{scene::Scene, BhDiverError, Result};

/// Shape of an animated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Scalar,
    Toggle,
    Vector,
}

/// Every property the timeline can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyId {
    /// Radius the observer passes at proper time zero.
    InitialRadius,
    Mass,
    FieldOfView,
    Yaw,
    Pitch,
    /// Viewing direction in the observer frame; overrides yaw and pitch.
    ViewDirection,
    Relativity,
}

impl PropertyId {
    pub const ALL: [PropertyId; 7] = [
        PropertyId::InitialRadius,
        PropertyId::Mass,
        PropertyId::FieldOfView,
        PropertyId::Yaw,
        PropertyId::Pitch,
        PropertyId::ViewDirection,
        PropertyId::Relativity,
    ];

    pub fn kind(self) -> PropertyKind {
        match self {
            Self::InitialRadius | Self::Mass | Self::FieldOfView | Self::Yaw | Self::Pitch => {
                PropertyKind::Scalar
            }
            Self::ViewDirection => PropertyKind::Vector,
            Self::Relativity => PropertyKind::Toggle,
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitialRadius => "initial_radius",
            Self::Mass => "mass",
            Self::FieldOfView => "field_of_view",
            Self::Yaw => "yaw",
            Self::Pitch => "pitch",
            Self::ViewDirection => "view_direction",
            Self::Relativity => "relativity",
        };
        f.write_str(name)
    }
}

/// A resolved property value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Toggle(bool),
    Scalar(f64),
    Vector(DVec3),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Scalar(_) => PropertyKind::Scalar,
            Self::Toggle(_) => PropertyKind::Toggle,
            Self::Vector(_) => PropertyKind::Vector,
        }
    }
}

/// Supplier of animated values, typically a keyframe timeline.
pub trait AnimationSource: Send + Sync {
    /// Value of `property` at proper time `time`, or `None` when the property
    /// is not animated and the base scene value applies.
    fn value_at(&self, property: PropertyId, time: f64) -> Option<PropertyValue>;
}

/// Source that animates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Static;

impl AnimationSource for Static {
    fn value_at(&self, _property: PropertyId, _time: f64) -> Option<PropertyValue> {
        None
    }
}

/// Applies every animated property at `time` to a copy of `base`.
pub fn resolve_scene(base: &Scene, source: &dyn AnimationSource, time: f64) -> Result<Scene> {
    let mut scene = *base;

    for property in PropertyId::ALL {
        let Some(value) = source.value_at(property, time) else {
            continue;
        };

        match (property, value) {
            (PropertyId::InitialRadius, PropertyValue::Scalar(v)) => {
                scene.observer.initial_radius = v
            }
            (PropertyId::Mass, PropertyValue::Scalar(v)) => scene.mass = v,
            (PropertyId::FieldOfView, PropertyValue::Scalar(v)) => scene.camera.fov_degrees = v,
            (PropertyId::Yaw, PropertyValue::Scalar(v)) => scene.camera.yaw_degrees = v,
            (PropertyId::Pitch, PropertyValue::Scalar(v)) => scene.camera.pitch_degrees = v,
            (PropertyId::ViewDirection, PropertyValue::Vector(direction)) => {
                let (yaw, pitch) = facing(direction)?;
                scene.camera.yaw_degrees = yaw;
                scene.camera.pitch_degrees = pitch;
            }
            (PropertyId::Relativity, PropertyValue::Toggle(on)) => scene.relativity = on,
            _ => {
                return Err(BhDiverError::config(format!(
                    "property {property} expects a {:?} value, got {value:?}",
                    property.kind()
                )))
            }
        }
    }

    Ok(scene)
}

/// Yaw and pitch in degrees that turn the default view (`-z`) onto
/// `direction`.
fn facing(direction: DVec3) -> Result<(f64, f64)> {
    let direction = direction.try_normalize().ok_or_else(|| {
        BhDiverError::config(format!("view direction must be non-zero, got {direction}"))
    })?;
    let pitch = direction.y.clamp(-1.0, 1.0).asin();
    let yaw = (-direction.x).atan2(-direction.z);
    Ok((yaw.to_degrees(), pitch.to_degrees()))
}

/// `count` evenly spaced times covering `[start, start + duration]`.
pub fn frame_times(start: f64, duration: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..count)
            .map(|i| start + duration * i as f64 / (count - 1) as f64)
            .collect(),
    }
}
