//! The action state table and its edge histories.
//!
//! The gesture recognizer writes one scalar per bound path on every
//! sync-actions tick; the readers below turn those scalars into OpenXR
//! action states, tracking per-path change edges the way a native
//! controller's runtime would.

pub mod gestures;

use crate::config::{Config, GestureKind};
use crate::hands::{JointSet, Side};
use crate::registry::{BindingId, PathInterner};
use log::trace;
use openxr_sys as xr;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// One gesture with its target bindings resolved to interned ids, so the
/// per-frame pass never touches a string.
pub struct CompiledGesture {
    pub kind: GestureKind,
    pub near: f32,
    pub far: f32,
    pub targets: [Option<GestureTarget>; 2],
}

pub struct GestureTarget {
    pub binding: BindingId,
    /// Present when the target ends in `/value`: analog triggers expose the
    /// same scalar on their `/click` sibling.
    pub click: Option<BindingId>,
}

/// Resolves the configured gesture targets against the interner once, at
/// arm time.
pub fn compile_gestures(config: &Config, interner: &PathInterner) -> Vec<CompiledGesture> {
    GestureKind::ALL
        .into_iter()
        .map(|kind| {
            let gesture = config.gesture(kind);
            let targets = Side::BOTH.map(|side| {
                let target = &gesture.target[side.index()];
                if target.is_empty() {
                    return None;
                }
                let full = format!("{}{}", side.user_path(), target);
                let click = full
                    .strip_suffix("/value")
                    .map(|stem| interner.intern(&format!("{stem}/click")));
                Some(GestureTarget {
                    binding: interner.intern(&full),
                    click,
                })
            });
            CompiledGesture {
                kind,
                near: gesture.near,
                far: gesture.far,
                targets,
            }
        })
        .collect()
}

pub struct BooleanRead {
    pub value: bool,
    pub changed: bool,
    pub last_change: xr::Time,
}

pub struct FloatRead {
    pub value: f32,
    pub changed: bool,
    pub last_change: xr::Time,
}

#[derive(Default)]
pub struct InputState {
    scalars: RwLock<HashMap<BindingId, f32>>,
    bool_history: Mutex<HashMap<BindingId, (bool, xr::Time)>>,
    float_history: Mutex<HashMap<BindingId, (f32, xr::Time)>>,
    /// Joints latched by the most recent sync, kept for the frame-end
    /// visualization hook.
    last_joints: Mutex<[Option<JointSet>; 2]>,
}

impl InputState {
    /// Runs the recognizer over freshly sampled joints and updates the
    /// state table for every enabled side.
    pub fn sync(
        &self,
        gestures: &[CompiledGesture],
        enabled: [bool; 2],
        sampled: [Option<JointSet>; 2],
        interner: &PathInterner,
    ) {
        for side in Side::BOTH {
            if !enabled[side.index()] {
                continue;
            }
            for gesture in gestures {
                let Some(target) = &gesture.targets[side.index()] else {
                    continue;
                };
                let Some(value) =
                    gestures::evaluate(gesture.kind, side, &sampled, gesture.near, gesture.far)
                else {
                    continue;
                };
                trace!("{} -> {value:.3}", interner.name(target.binding));
                let mut scalars = self.scalars.write().unwrap();
                scalars.insert(target.binding, value);
                if let Some(click) = target.click {
                    scalars.insert(click, value);
                }
            }
        }
        *self.last_joints.lock().unwrap() = sampled;
    }

    pub fn last_joints(&self) -> [Option<JointSet>; 2] {
        *self.last_joints.lock().unwrap()
    }

    pub fn read_boolean(
        &self,
        binding: BindingId,
        threshold: f32,
        now: xr::Time,
    ) -> Option<BooleanRead> {
        let scalar = *self.scalars.read().unwrap().get(&binding)?;
        let value = scalar >= threshold;
        let mut history = self.bool_history.lock().unwrap();
        let (changed, last_change) = match history.get(&binding) {
            Some(&(previous, at)) => (value != previous, if value != previous { now } else { at }),
            None => (false, now),
        };
        history.insert(binding, (value, last_change));
        Some(BooleanRead {
            value,
            changed,
            last_change,
        })
    }

    pub fn read_float(&self, binding: BindingId, now: xr::Time) -> Option<FloatRead> {
        let value = *self.scalars.read().unwrap().get(&binding)?;
        let mut history = self.float_history.lock().unwrap();
        let (changed, last_change) = match history.get(&binding) {
            Some(&(previous, at)) => (value != previous, if value != previous { now } else { at }),
            None => (false, now),
        };
        history.insert(binding, (value, last_change));
        Some(FloatRead {
            value,
            changed,
            last_change,
        })
    }

    pub fn clear(&self) {
        self.scalars.write().unwrap().clear();
        self.bool_history.lock().unwrap().clear();
        self.float_history.lock().unwrap().clear();
        *self.last_joints.lock().unwrap() = [None, None];
    }

    #[cfg(test)]
    fn set_scalar(&self, binding: BindingId, value: f32) {
        self.scalars.write().unwrap().insert(binding, value);
    }
}
