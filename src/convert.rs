use glam::{Affine3A, Quat, Vec3};
use openxr_sys as xr;

pub fn to_vec3(v: xr::Vector3f) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_quat(q: xr::Quaternionf) -> Quat {
    Quat::from_xyzw(q.x, q.y, q.z, q.w)
}

pub fn to_affine(pose: xr::Posef) -> Affine3A {
    Affine3A::from_rotation_translation(to_quat(pose.orientation), to_vec3(pose.position))
}

pub fn to_pose(affine: Affine3A) -> xr::Posef {
    let (_, rot, pos) = affine.to_scale_rotation_translation();
    let rot = rot.normalize();
    xr::Posef {
        orientation: xr::Quaternionf {
            x: rot.x,
            y: rot.y,
            z: rot.z,
            w: rot.w,
        },
        position: xr::Vector3f {
            x: pos.x,
            y: pos.y,
            z: pos.z,
        },
    }
}

/// Re-projects a sampled joint pose into a controller pose. The per-hand
/// offset is applied in the joint frame, and the caller's action-space
/// offset in the resulting controller frame.
pub fn compose_offsets(
    joint_pose: xr::Posef,
    hand_offset: xr::Posef,
    space_offset: xr::Posef,
) -> xr::Posef {
    to_pose(to_affine(joint_pose) * to_affine(hand_offset) * to_affine(space_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation(x: f32, y: f32, z: f32) -> xr::Posef {
        xr::Posef {
            orientation: xr::Posef::IDENTITY.orientation,
            position: xr::Vector3f { x, y, z },
        }
    }

    #[test]
    fn identity_offsets_preserve_joint_pose() {
        let joint = xr::Posef {
            orientation: xr::Quaternionf {
                x: 0.0,
                y: std::f32::consts::FRAC_1_SQRT_2,
                z: 0.0,
                w: std::f32::consts::FRAC_1_SQRT_2,
            },
            position: xr::Vector3f {
                x: 0.5,
                y: -1.0,
                z: 2.0,
            },
        };
        let out = compose_offsets(joint, xr::Posef::IDENTITY, xr::Posef::IDENTITY);
        assert!((out.position.x - joint.position.x).abs() < 1e-6);
        assert!((out.position.y - joint.position.y).abs() < 1e-6);
        assert!((out.position.z - joint.position.z).abs() < 1e-6);
        assert!((out.orientation.y - joint.orientation.y).abs() < 1e-6);
        assert!((out.orientation.w - joint.orientation.w).abs() < 1e-6);
    }

    #[test]
    fn hand_offset_applies_in_joint_frame() {
        let palm = translation(1.0, 1.0, 1.0);
        let offset = translation(0.0, 0.0, 0.03);
        let out = compose_offsets(palm, offset, xr::Posef::IDENTITY);
        assert!((out.position.x - 1.0).abs() < 1e-6);
        assert!((out.position.y - 1.0).abs() < 1e-6);
        assert!((out.position.z - 1.03).abs() < 1e-6);
    }

    #[test]
    fn offsets_rotate_with_the_joint() {
        // Joint rotated 90 degrees around Y: an offset along +Z comes out
        // along +X in the base space.
        let joint = xr::Posef {
            orientation: xr::Quaternionf {
                x: 0.0,
                y: std::f32::consts::FRAC_1_SQRT_2,
                z: 0.0,
                w: std::f32::consts::FRAC_1_SQRT_2,
            },
            position: xr::Vector3f {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
        };
        let offset = translation(0.0, 0.0, 0.1);
        let out = compose_offsets(joint, offset, xr::Posef::IDENTITY);
        assert!((out.position.x - 0.1).abs() < 1e-6);
        assert!(out.position.y.abs() < 1e-6);
        assert!(out.position.z.abs() < 1e-6);
    }
}
