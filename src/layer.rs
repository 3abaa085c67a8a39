//! The engine: one object owning every table the hooks touch, created by
//! the create-instance trampoline and shared with the dispatch module.

use crate::config::Config;
use crate::convert;
use crate::dispatch::NextTable;
use crate::hands::{HandTracking, Side, TrackerPair};
use crate::input::{compile_gestures, CompiledGesture, InputState};
use crate::registry::{ActionRegistry, BindingId, PathCache, PathInterner, PoseKind, SpaceEntry, SpaceRegistry};
use crate::visualize::{FrameHands, HandVisualizer};
use log::{debug, info, trace, warn};
use openxr_sys as xr;
use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    OnceLock, RwLock,
};

pub const LAYER_NAME: &str = "XR_APILAYER_NOVENDOR_hand_to_controller";

/// Latches the predicted display time: recorded at wait-frame, promoted at
/// begin-frame. Everything the engine answers within a frame uses the
/// promoted value.
#[derive(Default)]
pub(crate) struct FrameClock {
    waited: AtomicI64,
    begun: AtomicI64,
}

impl FrameClock {
    fn record_wait(&self, time: xr::Time) {
        self.waited.store(time.as_nanos(), Ordering::Relaxed);
    }

    fn latch(&self) {
        self.begun
            .store(self.waited.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    #[inline]
    pub fn begun(&self) -> xr::Time {
        xr::Time::from_nanos(self.begun.load(Ordering::Relaxed))
    }
}

/// Why the layer stayed in pass-through for this instance.
#[derive(Debug)]
#[allow(dead_code)] // Results aren't used, but they're printed
pub(crate) enum ArmError {
    ExtensionUnavailable,
    SystemUnavailable(xr::Result),
    HandTrackingUnsupported,
    ResolveFailed(&'static str, xr::Result),
    ConfigMissing,
    ProfileUnresolved,
}

struct SessionState {
    handle: xr::Session,
    trackers: TrackerPair,
}

/// Runtime entry points the engine calls on its own behalf (as opposed to
/// the chain links in [`NextTable`], which belong to intercepted calls).
#[derive(Copy, Clone)]
struct RuntimeFns {
    create_reference_space: xr::pfn::CreateReferenceSpace,
    destroy_space: xr::pfn::DestroySpace,
}

macro_rules! resolve_fn {
    ($gipa:expr, $instance:expr, $name:literal, $pfn:ty) => {{
        let mut function: Option<xr::pfn::VoidFunction> = None;
        let name = concat!($name, "\0");
        let res = unsafe { ($gipa)($instance, name.as_ptr() as *const _, &mut function) };
        match function {
            Some(f) if res == xr::Result::SUCCESS => {
                Ok(unsafe { std::mem::transmute::<xr::pfn::VoidFunction, $pfn>(f) })
            }
            _ => Err(ArmError::ResolveFailed(
                $name,
                if res == xr::Result::SUCCESS {
                    xr::Result::ERROR_FUNCTION_UNSUPPORTED
                } else {
                    res
                },
            )),
        }
    }};
}

macro_rules! next {
    ($self:ident.$field:ident) => {
        match *$self.next.$field.read().unwrap() {
            Some(f) => f,
            None => return xr::Result::ERROR_FUNCTION_UNSUPPORTED,
        }
    };
}

pub struct Layer {
    pub(crate) next: NextTable,
    runtime: RuntimeFns,
    hand_tracking: HandTracking,
    config: Config,
    profile_path: xr::Path,
    interner: PathInterner,
    paths: PathCache,
    gestures: Vec<CompiledGesture>,
    actions: RwLock<ActionRegistry>,
    spaces: RwLock<SpaceRegistry>,
    input: InputState,
    frame: FrameClock,
    session: RwLock<Option<SessionState>>,
    advertise: AtomicBool,
    visualizer: OnceLock<Box<dyn HandVisualizer>>,
}

impl Layer {
    /// Arms the engine against a freshly created downstream instance.
    /// Failure leaves the layer as a pass-through; nothing here is fatal to
    /// the application.
    pub(crate) fn new(
        instance: xr::Instance,
        gipa: xr::pfn::GetInstanceProcAddr,
        hand_tracking_enabled: bool,
        application_name: &str,
        engine_name: &str,
    ) -> Result<Self, ArmError> {
        if !hand_tracking_enabled {
            return Err(ArmError::ExtensionUnavailable);
        }

        let get_system = resolve_fn!(gipa, instance, "xrGetSystem", xr::pfn::GetSystem)?;
        let get_system_properties = resolve_fn!(
            gipa,
            instance,
            "xrGetSystemProperties",
            xr::pfn::GetSystemProperties
        )?;

        let system_info = xr::SystemGetInfo {
            ty: xr::SystemGetInfo::TYPE,
            next: std::ptr::null(),
            form_factor: xr::FormFactor::HEAD_MOUNTED_DISPLAY,
        };
        let mut system_id = xr::SystemId::from_raw(0);
        let res = unsafe { get_system(instance, &system_info, &mut system_id) };
        if res != xr::Result::SUCCESS {
            return Err(ArmError::SystemUnavailable(res));
        }

        let mut hand_tracking_props = xr::SystemHandTrackingPropertiesEXT {
            ty: xr::SystemHandTrackingPropertiesEXT::TYPE,
            next: std::ptr::null_mut(),
            supports_hand_tracking: false.into(),
        };
        let mut system_props =
            unsafe { std::mem::MaybeUninit::<xr::SystemProperties>::zeroed().assume_init() };
        system_props.ty = xr::SystemProperties::TYPE;
        system_props.next = &mut hand_tracking_props as *mut _ as *mut _;
        let res = unsafe { get_system_properties(instance, system_id, &mut system_props) };
        if res != xr::Result::SUCCESS {
            return Err(ArmError::SystemUnavailable(res));
        }
        if hand_tracking_props.supports_hand_tracking != true.into() {
            return Err(ArmError::HandTrackingUnsupported);
        }

        let hand_tracking = HandTracking {
            create: resolve_fn!(
                gipa,
                instance,
                "xrCreateHandTrackerEXT",
                xr::pfn::CreateHandTrackerEXT
            )?,
            destroy: resolve_fn!(
                gipa,
                instance,
                "xrDestroyHandTrackerEXT",
                xr::pfn::DestroyHandTrackerEXT
            )?,
            locate: resolve_fn!(
                gipa,
                instance,
                "xrLocateHandJointsEXT",
                xr::pfn::LocateHandJointsEXT
            )?,
        };
        let runtime = RuntimeFns {
            create_reference_space: resolve_fn!(
                gipa,
                instance,
                "xrCreateReferenceSpace",
                xr::pfn::CreateReferenceSpace
            )?,
            destroy_space: resolve_fn!(gipa, instance, "xrDestroySpace", xr::pfn::DestroySpace)?,
        };
        let paths = PathCache::new(
            instance,
            resolve_fn!(gipa, instance, "xrStringToPath", xr::pfn::StringToPath)?,
            resolve_fn!(gipa, instance, "xrPathToString", xr::pfn::PathToString)?,
        );

        let config = Config::load(application_name, engine_name);
        if !config.loaded {
            return Err(ArmError::ConfigMissing);
        }
        let profile_path = paths
            .path(&config.raw_interaction_profile)
            .ok_or(ArmError::ProfileUnresolved)?;

        let interner = PathInterner::default();
        let gestures = compile_gestures(&config, &interner);

        Ok(Self {
            next: NextTable::default(),
            runtime,
            hand_tracking,
            config,
            profile_path,
            interner,
            paths,
            gestures,
            actions: Default::default(),
            spaces: Default::default(),
            input: InputState::default(),
            frame: FrameClock::default(),
            session: RwLock::new(None),
            advertise: AtomicBool::new(false),
            visualizer: OnceLock::new(),
        })
    }

    pub(crate) fn install_visualizer(&self, visualizer: Box<dyn HandVisualizer>) -> bool {
        self.visualizer.set(visualizer).is_ok()
    }

    pub(crate) fn visualizer_installed(&self) -> bool {
        self.visualizer.get().is_some()
    }

    fn resolve_binding(&self, action: xr::Action, subaction: xr::Path) -> Option<BindingId> {
        let registry = self.actions.read().unwrap();
        if subaction == xr::Path::NULL {
            registry.resolve(action, None, &self.interner)
        } else {
            let prefix = self.paths.string(subaction)?;
            registry.resolve(action, Some(&prefix[..]), &self.interner)
        }
    }

    // Frame timing.

    pub(crate) fn wait_frame(
        &self,
        session: xr::Session,
        info: *const xr::FrameWaitInfo,
        state: *mut xr::FrameState,
    ) -> xr::Result {
        trace!("xrWaitFrame");
        let next = next!(self.wait_frame);
        let res = unsafe { next(session, info, state) };
        if res == xr::Result::SUCCESS {
            if let Some(state) = unsafe { state.as_ref() } {
                self.frame.record_wait(state.predicted_display_time);
            }
        }
        res
    }

    pub(crate) fn begin_frame(
        &self,
        session: xr::Session,
        info: *const xr::FrameBeginInfo,
    ) -> xr::Result {
        trace!("xrBeginFrame");
        let next = next!(self.begin_frame);
        let res = unsafe { next(session, info) };
        if res == xr::Result::SUCCESS {
            self.frame.latch();
        }
        res
    }

    // Session lifecycle.

    pub(crate) fn create_session(
        &self,
        instance: xr::Instance,
        info: *const xr::SessionCreateInfo,
        session: *mut xr::Session,
    ) -> xr::Result {
        trace!("xrCreateSession");
        let next = next!(self.create_session);
        let res = unsafe { next(instance, info, session) };
        if res != xr::Result::SUCCESS {
            return res;
        }
        let handle = unsafe { *session };
        match self.create_trackers(handle) {
            Ok(trackers) => {
                *self.session.write().unwrap() = Some(SessionState { handle, trackers });
                self.advertise.store(true, Ordering::Release);
                info!("Hand trackers ready; will advertise {}", self.config.raw_interaction_profile);
            }
            // The session still works, we just never synthesize for it.
            Err(e) => warn!("Failed to create hand trackers: {e:?}"),
        }
        res
    }

    fn create_trackers(&self, session: xr::Session) -> Result<TrackerPair, xr::Result> {
        let info = xr::ReferenceSpaceCreateInfo {
            ty: xr::ReferenceSpaceCreateInfo::TYPE,
            next: std::ptr::null(),
            reference_space_type: xr::ReferenceSpaceType::LOCAL,
            pose_in_reference_space: xr::Posef::IDENTITY,
        };
        let mut reference_space = xr::Space::NULL;
        let res =
            unsafe { (self.runtime.create_reference_space)(session, &info, &mut reference_space) };
        if res != xr::Result::SUCCESS {
            return Err(res);
        }
        let left = match self.hand_tracking.create_tracker(session, Side::Left) {
            Ok(tracker) => tracker,
            Err(e) => {
                unsafe { (self.runtime.destroy_space)(reference_space) };
                return Err(e);
            }
        };
        let right = match self.hand_tracking.create_tracker(session, Side::Right) {
            Ok(tracker) => tracker,
            Err(e) => {
                self.hand_tracking.destroy_tracker(left);
                unsafe { (self.runtime.destroy_space)(reference_space) };
                return Err(e);
            }
        };
        Ok(TrackerPair {
            trackers: [left, right],
            reference_space,
        })
    }

    pub(crate) fn destroy_session(&self, session: xr::Session) -> xr::Result {
        trace!("xrDestroySession");
        let next = next!(self.destroy_session);
        let res = unsafe { next(session) };
        if res != xr::Result::SUCCESS {
            return res;
        }
        let state = self.session.write().unwrap().take();
        if let Some(state) = state {
            for tracker in state.trackers.trackers {
                self.hand_tracking.destroy_tracker(tracker);
            }
            unsafe { (self.runtime.destroy_space)(state.trackers.reference_space) };
        }
        self.input.clear();
        self.actions.write().unwrap().clear();
        self.spaces.write().unwrap().clear();
        self.advertise.store(false, Ordering::Release);
        res
    }

    // Profile advertisement.

    pub(crate) fn poll_event(
        &self,
        instance: xr::Instance,
        event_data: *mut xr::EventDataBuffer,
    ) -> xr::Result {
        trace!("xrPollEvent");
        let session = self.session.read().unwrap().as_ref().map(|s| s.handle);
        if let Some(session) = session {
            if self.advertise.swap(false, Ordering::AcqRel) {
                debug!("Advertising our interaction profile to the application");
                unsafe {
                    (event_data as *mut xr::EventDataInteractionProfileChanged).write(
                        xr::EventDataInteractionProfileChanged {
                            ty: xr::EventDataInteractionProfileChanged::TYPE,
                            next: std::ptr::null(),
                            session,
                        },
                    );
                }
                return xr::Result::SUCCESS;
            }
        }
        let next = next!(self.poll_event);
        unsafe { next(instance, event_data) }
    }

    pub(crate) fn get_current_interaction_profile(
        &self,
        session: xr::Session,
        top_level_user_path: xr::Path,
        interaction_profile: *mut xr::InteractionProfileState,
    ) -> xr::Result {
        trace!("xrGetCurrentInteractionProfile");
        let ours = top_level_user_path == xr::Path::NULL
            || match self.paths.string(top_level_user_path) {
                Some(path) => {
                    path.is_empty()
                        || &*path == Side::Left.user_path()
                        || &*path == Side::Right.user_path()
                }
                // An unresolvable path is not one of ours to answer for.
                None => false,
            };
        if ours {
            if let Some(state) = unsafe { interaction_profile.as_mut() } {
                state.interaction_profile = self.profile_path;
            }
            return xr::Result::SUCCESS;
        }
        let next = next!(self.get_current_interaction_profile);
        unsafe { next(session, top_level_user_path, interaction_profile) }
    }

    // Binding and space capture.

    pub(crate) fn suggest_interaction_profile_bindings(
        &self,
        instance: xr::Instance,
        suggested_bindings: *const xr::InteractionProfileSuggestedBinding,
    ) -> xr::Result {
        trace!("xrSuggestInteractionProfileBindings");
        let next = next!(self.suggest_interaction_profile_bindings);
        let res = unsafe { next(instance, suggested_bindings) };
        if res != xr::Result::SUCCESS {
            return res;
        }
        let Some(suggested) = (unsafe { suggested_bindings.as_ref() }) else {
            return res;
        };
        let Some(profile) = self.paths.string(suggested.interaction_profile) else {
            return res;
        };
        info!("Application is suggesting bindings for interaction profile: {profile}");
        if *profile != *self.config.raw_interaction_profile
            || suggested.count_suggested_bindings == 0
        {
            return res;
        }
        let bindings = unsafe {
            std::slice::from_raw_parts(
                suggested.suggested_bindings,
                suggested.count_suggested_bindings as usize,
            )
        };
        let mut actions = self.actions.write().unwrap();
        for binding in bindings {
            let Some(path) = self.paths.string(binding.binding) else {
                continue;
            };
            if path.starts_with(Side::Left.user_path()) || path.starts_with(Side::Right.user_path())
            {
                debug!("Tracking binding {path}");
                actions.record(binding.action, self.interner.intern(&path));
            }
        }
        info!("Binding to this interaction profile");
        res
    }

    pub(crate) fn create_action_space(
        &self,
        session: xr::Session,
        create_info: *const xr::ActionSpaceCreateInfo,
        space: *mut xr::Space,
    ) -> xr::Result {
        trace!("xrCreateActionSpace");
        let next = next!(self.create_action_space);
        let res = unsafe { next(session, create_info, space) };
        if res != xr::Result::SUCCESS {
            return res;
        }
        let Some(info) = (unsafe { create_info.as_ref() }) else {
            return res;
        };
        // Only bindings under the hand user paths ever make it into the
        // registry, so a resolved binding is always ours to synthesize.
        let Some(binding) = self.resolve_binding(info.action, info.subaction_path) else {
            return res;
        };
        let name = self.interner.name(binding);
        let side = if name.starts_with(Side::Right.user_path()) {
            Side::Right
        } else {
            Side::Left
        };
        let kind = if name.contains("/input/grip/pose") {
            Some(PoseKind::Grip)
        } else if name.contains("/input/aim/pose") {
            Some(PoseKind::Aim)
        } else {
            None
        };
        debug!("Tracking action space on {name}");
        self.spaces.write().unwrap().insert(
            unsafe { *space },
            SpaceEntry {
                binding,
                side,
                kind,
                pose_in_action_space: info.pose_in_action_space,
            },
        );
        res
    }

    pub(crate) fn destroy_space(&self, space: xr::Space) -> xr::Result {
        trace!("xrDestroySpace");
        let next = next!(self.destroy_space);
        let res = unsafe { next(space) };
        if res == xr::Result::SUCCESS {
            self.spaces.write().unwrap().remove(space);
        }
        res
    }

    // Pose synthesis.

    pub(crate) fn locate_space(
        &self,
        space: xr::Space,
        base_space: xr::Space,
        time: xr::Time,
        location: *mut xr::SpaceLocation,
    ) -> xr::Result {
        trace!("xrLocateSpace");
        if let Some(entry) = self.spaces.read().unwrap().get(space) {
            if let Some(kind) = entry.kind {
                if self.config.enabled[entry.side.index()] {
                    let tracker = self
                        .session
                        .read()
                        .unwrap()
                        .as_ref()
                        .map(|s| s.trackers.tracker(entry.side));
                    if let Some(tracker) = tracker {
                        trace!("Synthesizing {:?} {kind:?} pose", entry.side);
                        // The sampler sees the caller's time and base space,
                        // never our internal reference space.
                        return match self.hand_tracking.locate_joints(tracker, base_space, time) {
                            Ok(joints) => {
                                let index = match kind {
                                    PoseKind::Grip => self.config.grip_joint,
                                    PoseKind::Aim => self.config.aim_joint,
                                };
                                let joint = &joints[index];
                                if let Some(location) = unsafe { location.as_mut() } {
                                    location.location_flags = joint.location_flags;
                                    location.pose = convert::compose_offsets(
                                        joint.pose,
                                        self.config.transform[entry.side.index()],
                                        entry.pose_in_action_space,
                                    );
                                }
                                xr::Result::SUCCESS
                            }
                            Err(res) => res,
                        };
                    }
                }
            }
        }
        let next = next!(self.locate_space);
        unsafe { next(space, base_space, time, location) }
    }

    // Gesture recognition.

    pub(crate) fn sync_actions(
        &self,
        session: xr::Session,
        sync_info: *const xr::ActionsSyncInfo,
    ) -> xr::Result {
        trace!("xrSyncActions");
        let next = next!(self.sync_actions);
        let res = unsafe { next(session, sync_info) };
        if res != xr::Result::SUCCESS {
            return res;
        }
        let begun = self.frame.begun();
        if begun.as_nanos() == 0 {
            // No frame has begun; there is no valid time to sample at.
            return res;
        }
        let guard = self.session.read().unwrap();
        let Some(state) = guard.as_ref() else {
            return res;
        };
        // Both hands are sampled even when one side is disabled, so the
        // enabled side's two-handed gestures keep working.
        let sampled = Side::BOTH.map(|side| {
            match self.hand_tracking.locate_joints(
                state.trackers.tracker(side),
                state.trackers.reference_space,
                begun,
            ) {
                Ok(joints) => Some(joints),
                Err(e) => {
                    debug!("Failed to get {side:?} hand pose: {e:?}");
                    None
                }
            }
        });
        drop(guard);
        self.input
            .sync(&self.gestures, self.config.enabled, sampled, &self.interner);
        res
    }

    // Action state reads.

    pub(crate) fn get_action_state_boolean(
        &self,
        session: xr::Session,
        get_info: *const xr::ActionStateGetInfo,
        state: *mut xr::ActionStateBoolean,
    ) -> xr::Result {
        trace!("xrGetActionStateBoolean");
        if let Some(info) = unsafe { get_info.as_ref() } {
            if let Some(binding) = self.resolve_binding(info.action, info.subaction_path) {
                if let Some(read) =
                    self.input
                        .read_boolean(binding, self.config.click_threshold, self.frame.begun())
                {
                    if let Some(state) = unsafe { state.as_mut() } {
                        state.current_state = read.value.into();
                        state.changed_since_last_sync = read.changed.into();
                        state.last_change_time = read.last_change;
                        state.is_active = true.into();
                    }
                    return xr::Result::SUCCESS;
                }
            }
        }
        let next = next!(self.get_action_state_boolean);
        unsafe { next(session, get_info, state) }
    }

    pub(crate) fn get_action_state_float(
        &self,
        session: xr::Session,
        get_info: *const xr::ActionStateGetInfo,
        state: *mut xr::ActionStateFloat,
    ) -> xr::Result {
        trace!("xrGetActionStateFloat");
        if let Some(info) = unsafe { get_info.as_ref() } {
            if let Some(binding) = self.resolve_binding(info.action, info.subaction_path) {
                if let Some(read) = self.input.read_float(binding, self.frame.begun()) {
                    if let Some(state) = unsafe { state.as_mut() } {
                        state.current_state = read.value;
                        state.changed_since_last_sync = read.changed.into();
                        state.last_change_time = read.last_change;
                        state.is_active = true.into();
                    }
                    return xr::Result::SUCCESS;
                }
            }
        }
        let next = next!(self.get_action_state_float);
        unsafe { next(session, get_info, state) }
    }

    pub(crate) fn get_action_state_pose(
        &self,
        session: xr::Session,
        get_info: *const xr::ActionStateGetInfo,
        state: *mut xr::ActionStatePose,
    ) -> xr::Result {
        trace!("xrGetActionStatePose");
        if let Some(info) = unsafe { get_info.as_ref() } {
            if self.resolve_binding(info.action, info.subaction_path).is_some() {
                // The hands are always tracked as far as the app can tell.
                if let Some(state) = unsafe { state.as_mut() } {
                    state.is_active = true.into();
                }
                return xr::Result::SUCCESS;
            }
        }
        let next = next!(self.get_action_state_pose);
        unsafe { next(session, get_info, state) }
    }

    // Frame end / visualization.

    pub(crate) fn end_frame(
        &self,
        session: xr::Session,
        frame_end_info: *const xr::FrameEndInfo,
    ) -> xr::Result {
        trace!("xrEndFrame");
        if let Some(visualizer) = self.visualizer.get() {
            visualizer.render(&FrameHands {
                time: self.frame.begun(),
                joints: self.input.last_joints(),
            });
        }
        let next = next!(self.end_frame);
        unsafe { next(session, frame_end_info) }
    }
}
