//! Keyframe storage standing in for the timeline editor.

use std::{collections::BTreeMap, path::Path};

use bh_diver_core::{AnimationSource, BhDiverError, PropertyId, PropertyValue, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Holds each value until the next keyframe.
    Step,
}

/// Keyframes of a single property, kept sorted by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    pub interpolation: Interpolation,
    pub keyframes: Vec<Keyframe>,
}

impl Track {
    fn sample(&self, time: f64) -> Option<PropertyValue> {
        let after = self.keyframes.partition_point(|key| key.time <= time);
        let next = self.keyframes.get(after);
        let previous = after.checked_sub(1).and_then(|i| self.keyframes.get(i));

        match (previous, next) {
            (None, None) => None,
            (Some(key), None) | (None, Some(key)) => Some(key.value),
            (Some(a), Some(b)) => {
                if self.interpolation == Interpolation::Step {
                    return Some(a.value);
                }
                let t = (time - a.time) / (b.time - a.time);
                Some(interpolate(a.value, b.value, t))
            }
        }
    }
}

fn interpolate(a: PropertyValue, b: PropertyValue, t: f64) -> PropertyValue {
    match (a, b) {
        (PropertyValue::Scalar(a), PropertyValue::Scalar(b)) => PropertyValue::Scalar(a + (b - a) * t),
        (PropertyValue::Vector(a), PropertyValue::Vector(b)) => PropertyValue::Vector(a.lerp(b, t)),
        // Toggles switch at the next keyframe.
        (a, _) => a,
    }
}

/// Animated properties keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeTimeline {
    tracks: BTreeMap<PropertyId, Track>,
}

impl KeyframeTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut timeline: Self = serde_json::from_str(text)?;
        for (property, track) in &mut timeline.tracks {
            for key in &track.keyframes {
                check(*property, key)?;
            }
            track.keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
        Ok(timeline)
    }

    /// Adds or replaces the keyframe of `property` at `time`.
    pub fn insert(&mut self, property: PropertyId, time: f64, value: PropertyValue) -> Result<()> {
        let key = Keyframe { time, value };
        check(property, &key)?;

        let keyframes = &mut self.tracks.entry(property).or_default().keyframes;
        match keyframes.binary_search_by(|k| k.time.total_cmp(&time)) {
            Ok(index) => keyframes[index] = key,
            Err(index) => keyframes.insert(index, key),
        }
        Ok(())
    }

    pub fn remove(&mut self, property: PropertyId, time: f64) -> bool {
        let Some(track) = self.tracks.get_mut(&property) else {
            return false;
        };
        let before = track.keyframes.len();
        track.keyframes.retain(|k| k.time != time);
        before != track.keyframes.len()
    }

    pub fn set_interpolation(&mut self, property: PropertyId, interpolation: Interpolation) {
        self.tracks.entry(property).or_default().interpolation = interpolation;
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.values().all(|t| t.keyframes.is_empty())
    }
}

fn check(property: PropertyId, key: &Keyframe) -> Result<()> {
    if !key.time.is_finite() {
        return Err(BhDiverError::config(format!(
            "keyframe time for {property} must be finite"
        )));
    }
    let kind = key.value.kind();
    if kind != property.kind() {
        return Err(BhDiverError::config(format!(
            "keyframe for {property} holds a {kind:?}, expected {:?}",
            property.kind()
        )));
    }
    let finite = match key.value {
        PropertyValue::Scalar(v) => v.is_finite(),
        PropertyValue::Vector(v) => v.is_finite(),
        PropertyValue::Toggle(_) => true,
    };
    if !finite {
        return Err(BhDiverError::config(format!("non-finite keyframe value for {property}")));
    }
    Ok(())
}

impl AnimationSource for KeyframeTimeline {
    fn value_at(&self, property: PropertyId, time: f64) -> Option<PropertyValue> {
        self.tracks.get(&property)?.sample(time)
    }
}
