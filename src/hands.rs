//! Thin façade over the downstream XR_EXT_hand_tracking implementation.

use openxr_sys as xr;
use std::ffi::CStr;

pub const HAND_TRACKING_EXTENSION: &CStr = c"XR_EXT_hand_tracking";

pub const JOINT_COUNT: usize = 26;

/// XrHandJointEXT values for the joints the gesture recognizer cares about.
pub mod joint {
    pub const PALM: usize = 0;
    pub const WRIST: usize = 1;
    pub const THUMB_TIP: usize = 5;
    pub const INDEX_PROXIMAL: usize = 7;
    pub const INDEX_INTERMEDIATE: usize = 8;
    pub const INDEX_TIP: usize = 10;
    pub const MIDDLE_METACARPAL: usize = 11;
    pub const MIDDLE_TIP: usize = 15;
    pub const RING_METACARPAL: usize = 16;
    pub const RING_TIP: usize = 20;
    pub const LITTLE_METACARPAL: usize = 21;
    pub const LITTLE_PROXIMAL: usize = 22;
    pub const LITTLE_TIP: usize = 25;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    #[inline]
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn user_path(self) -> &'static str {
        match self {
            Side::Left => "/user/hand/left",
            Side::Right => "/user/hand/right",
        }
    }
}

pub type JointSet = [xr::HandJointLocationEXT; JOINT_COUNT];

#[inline]
pub fn pose_valid(flags: xr::SpaceLocationFlags) -> bool {
    flags.contains(xr::SpaceLocationFlags::POSITION_VALID | xr::SpaceLocationFlags::ORIENTATION_VALID)
}

/// The XR_EXT_hand_tracking entry points resolved through the downstream
/// chain.
#[derive(Copy, Clone)]
pub struct HandTracking {
    pub create: xr::pfn::CreateHandTrackerEXT,
    pub destroy: xr::pfn::DestroyHandTrackerEXT,
    pub locate: xr::pfn::LocateHandJointsEXT,
}

impl HandTracking {
    pub fn create_tracker(
        &self,
        session: xr::Session,
        side: Side,
    ) -> Result<xr::HandTrackerEXT, xr::Result> {
        let info = xr::HandTrackerCreateInfoEXT {
            ty: xr::HandTrackerCreateInfoEXT::TYPE,
            next: std::ptr::null(),
            hand: match side {
                Side::Left => xr::HandEXT::LEFT,
                Side::Right => xr::HandEXT::RIGHT,
            },
            hand_joint_set: xr::HandJointSetEXT::DEFAULT,
        };
        let mut tracker = xr::HandTrackerEXT::NULL;
        let res = unsafe { (self.create)(session, &info, &mut tracker) };
        if res == xr::Result::SUCCESS {
            Ok(tracker)
        } else {
            Err(res)
        }
    }

    pub fn destroy_tracker(&self, tracker: xr::HandTrackerEXT) {
        if tracker != xr::HandTrackerEXT::NULL {
            unsafe { (self.destroy)(tracker) };
        }
    }

    /// Locates the full default joint set of one hand at `time` in `base`.
    pub fn locate_joints(
        &self,
        tracker: xr::HandTrackerEXT,
        base: xr::Space,
        time: xr::Time,
    ) -> Result<JointSet, xr::Result> {
        let mut joints = [xr::HandJointLocationEXT {
            location_flags: xr::SpaceLocationFlags::default(),
            pose: xr::Posef::IDENTITY,
            radius: 0.0,
        }; JOINT_COUNT];
        let mut locations = xr::HandJointLocationsEXT {
            ty: xr::HandJointLocationsEXT::TYPE,
            next: std::ptr::null_mut(),
            is_active: false.into(),
            joint_count: JOINT_COUNT as u32,
            joint_locations: joints.as_mut_ptr(),
        };
        let info = xr::HandJointsLocateInfoEXT {
            ty: xr::HandJointsLocateInfoEXT::TYPE,
            next: std::ptr::null(),
            base_space: base,
            time,
        };
        let res = unsafe { (self.locate)(tracker, &info, &mut locations) };
        if res == xr::Result::SUCCESS {
            Ok(joints)
        } else {
            Err(res)
        }
    }
}

/// Per-session hand-tracking handles. Created when the session is, torn
/// down with it.
pub struct TrackerPair {
    pub trackers: [xr::HandTrackerEXT; 2],
    pub reference_space: xr::Space,
}

impl TrackerPair {
    #[inline]
    pub fn tracker(&self, side: Side) -> xr::HandTrackerEXT {
        self.trackers[side.index()]
    }
}
