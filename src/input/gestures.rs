//! Distance-based gesture scalars.
//!
//! Every gesture reduces to one or more joint-pair distances mapped through
//! a `near`/`far` window: at or inside `near` the scalar is 1, at or beyond
//! `far` it is 0, linear in between. Joint radii are ignored; the window is
//! expected to account for them.

use crate::config::GestureKind;
use crate::convert::to_vec3;
use crate::hands::{joint, pose_valid, JointSet, Side};

/// Which joints a gesture reads, and from whose hand.
pub enum Shape {
    /// Two joints on the gesturing hand.
    Own(usize, usize),
    /// A joint on the gesturing hand touched by the other hand's index tip.
    Tapped(usize),
    /// Curl of middle, ring and little fingers toward their metacarpals.
    Squeeze,
}

pub fn shape(kind: GestureKind) -> Shape {
    match kind {
        GestureKind::Pinch => Shape::Own(joint::THUMB_TIP, joint::INDEX_TIP),
        GestureKind::ThumbPress => Shape::Own(joint::INDEX_INTERMEDIATE, joint::THUMB_TIP),
        GestureKind::IndexBend => Shape::Own(joint::INDEX_PROXIMAL, joint::INDEX_TIP),
        GestureKind::Squeeze => Shape::Squeeze,
        GestureKind::PalmTap => Shape::Tapped(joint::PALM),
        GestureKind::WristTap => Shape::Tapped(joint::WRIST),
        GestureKind::IndexProximalTap => Shape::Tapped(joint::INDEX_PROXIMAL),
        GestureKind::LittleProximalTap => Shape::Tapped(joint::LITTLE_PROXIMAL),
    }
}

pub fn scalar(distance: f32, near: f32, far: f32) -> f32 {
    1.0 - (distance.clamp(near, far) - near) / (far - near)
}

/// Squeeze combines three finger curls but tolerates one finger staying
/// extended: drop the smallest scalar, average the other two.
pub fn squeeze_scalar(mut scalars: [f32; 3]) -> f32 {
    scalars.sort_by(f32::total_cmp);
    (scalars[1] + scalars[2]) / 2.0
}

fn distance(a: &JointSet, ai: usize, b: &JointSet, bi: usize) -> Option<f32> {
    (pose_valid(a[ai].location_flags) && pose_valid(b[bi].location_flags))
        .then(|| to_vec3(a[ai].pose.position).distance(to_vec3(b[bi].pose.position)))
}

const SQUEEZE_FINGERS: [(usize, usize); 3] = [
    (joint::MIDDLE_TIP, joint::MIDDLE_METACARPAL),
    (joint::RING_TIP, joint::RING_METACARPAL),
    (joint::LITTLE_TIP, joint::LITTLE_METACARPAL),
];

/// Evaluates one gesture for `side`, given whatever joints were sampled
/// this tick. Returns `None` when a referenced joint is missing or invalid.
pub fn evaluate(
    kind: GestureKind,
    side: Side,
    sampled: &[Option<JointSet>; 2],
    near: f32,
    far: f32,
) -> Option<f32> {
    let own = sampled[side.index()].as_ref()?;
    match shape(kind) {
        Shape::Own(a, b) => Some(scalar(distance(own, a, own, b)?, near, far)),
        Shape::Tapped(a) => {
            let other = sampled[side.other().index()].as_ref()?;
            Some(scalar(distance(own, a, other, joint::INDEX_TIP)?, near, far))
        }
        Shape::Squeeze => {
            let mut scalars = [0.0; 3];
            for (slot, (tip, metacarpal)) in scalars.iter_mut().zip(SQUEEZE_FINGERS) {
                *slot = scalar(distance(own, tip, own, metacarpal)?, near, far);
            }
            Some(squeeze_scalar(scalars))
        }
    }
}
