//! A fake downstream OpenXR runtime.
//!
//! Implements just enough of the API surface for the hand-to-controller
//! layer to negotiate, arm itself and run frames against it, plus `pub`
//! hooks for tests to inject hand-joint poses and inspect what reached the
//! runtime. Handles are process-global; tests that share state should
//! serialize themselves.

use openxr_sys as xr;
use paste::paste;
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, CStr};
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Arc, LazyLock, Mutex,
};

pub const JOINT_COUNT: usize = 26;

const FRAME_STEP_NANOS: i64 = 1000;

static TRACKED: LazyLock<xr::SpaceLocationFlags> = LazyLock::new(|| {
    xr::SpaceLocationFlags::POSITION_VALID
        | xr::SpaceLocationFlags::POSITION_TRACKED
        | xr::SpaceLocationFlags::ORIENTATION_VALID
        | xr::SpaceLocationFlags::ORIENTATION_TRACKED
});

static EXTENSION_AVAILABLE: AtomicBool = AtomicBool::new(true);
static SYSTEM_SUPPORT: AtomicBool = AtomicBool::new(true);

/// Whether XR_EXT_hand_tracking shows up in the runtime's extension list.
pub fn set_hand_tracking_extension(available: bool) {
    EXTENSION_AVAILABLE.store(available, Ordering::Relaxed);
}

/// Whether the HMD system claims hand-tracking support.
pub fn set_system_hand_tracking(supported: bool) {
    SYSTEM_SUPPORT.store(supported, Ordering::Relaxed);
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }
}

#[derive(Copy, Clone)]
struct JointStub {
    pose: xr::Posef,
    valid: bool,
}

struct HandState {
    joints: [JointStub; JOINT_COUNT],
    result: xr::Result,
}

impl Default for HandState {
    fn default() -> Self {
        Self {
            joints: [JointStub {
                pose: xr::Posef::IDENTITY,
                valid: false,
            }; JOINT_COUNT],
            result: xr::Result::SUCCESS,
        }
    }
}

struct Instance {
    paths: Mutex<Vec<String>>,
    events: Mutex<VecDeque<Vec<u8>>>,
}

impl Instance {
    fn path_string(&self, path: xr::Path) -> Option<String> {
        let raw = path.into_raw();
        if raw == 0 {
            return None;
        }
        self.paths.lock().unwrap().get(raw as usize - 1).cloned()
    }

    fn intern_path(&self, s: &str) -> xr::Path {
        let mut paths = self.paths.lock().unwrap();
        let index = match paths.iter().position(|p| p == s) {
            Some(index) => index,
            None => {
                paths.push(s.to_owned());
                paths.len() - 1
            }
        };
        xr::Path::from_raw(index as u64 + 1)
    }
}

struct Session {
    instance: u64,
    hands: [Mutex<HandState>; 2],
    predicted: AtomicI64,
}

struct ActionSet {
    instance: u64,
}

struct Action {
    instance: u64,
    suggested: Mutex<Vec<(xr::Path, xr::Path)>>,
}

enum SpaceKind {
    Reference,
    Action { offset: xr::Posef },
}

struct Space {
    kind: SpaceKind,
}

struct HandTracker {
    session: u64,
    hand: usize,
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

macro_rules! handle_store {
    ($store:ident: $ty:ty) => {
        static $store: LazyLock<Mutex<HashMap<u64, Arc<$ty>>>> = LazyLock::new(Default::default);
    };
}

handle_store!(INSTANCES: Instance);
handle_store!(SESSIONS: Session);
handle_store!(ACTION_SETS: ActionSet);
handle_store!(ACTIONS: Action);
handle_store!(SPACES: Space);
handle_store!(TRACKERS: HandTracker);

fn insert<T>(store: &Mutex<HashMap<u64, Arc<T>>>, value: T) -> u64 {
    let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    store.lock().unwrap().insert(id, Arc::new(value));
    id
}

fn get<T>(store: &Mutex<HashMap<u64, Arc<T>>>, raw: u64) -> Option<Arc<T>> {
    store.lock().unwrap().get(&raw).cloned()
}

macro_rules! get_handle {
    ($store:ident, $handle:expr) => {
        match get(&$store, $handle.into_raw()) {
            Some(handle) => handle,
            None => {
                println!("unknown handle for {} ({:?})", stringify!($handle), $handle);
                return xr::Result::ERROR_HANDLE_INVALID;
            }
        }
    };
}

// Test hooks.

fn with_hand<R>(session: xr::Session, hand: Hand, f: impl FnOnce(&mut HandState) -> R) -> R {
    let session = get(&SESSIONS, session.into_raw()).expect("unknown session");
    let mut state = session.hands[hand.index()].lock().unwrap();
    f(&mut state)
}

/// Places a joint at `position` with identity orientation and marks it
/// valid.
pub fn set_joint(session: xr::Session, hand: Hand, joint: usize, position: [f32; 3]) {
    set_joint_pose(
        session,
        hand,
        joint,
        xr::Posef {
            orientation: xr::Posef::IDENTITY.orientation,
            position: xr::Vector3f {
                x: position[0],
                y: position[1],
                z: position[2],
            },
        },
    );
}

pub fn set_joint_pose(session: xr::Session, hand: Hand, joint: usize, pose: xr::Posef) {
    with_hand(session, hand, |state| {
        state.joints[joint] = JointStub { pose, valid: true };
    });
}

/// Marks every joint of the hand invalid again.
pub fn clear_hand(session: xr::Session, hand: Hand) {
    with_hand(session, hand, |state| *state = HandState::default());
}

/// Makes xrLocateHandJointsEXT fail for this hand with `result`.
pub fn fail_hand(session: xr::Session, hand: Hand, result: xr::Result) {
    with_hand(session, hand, |state| state.result = result);
}

/// The time handed out by the most recent xrWaitFrame.
pub fn predicted_display_time(session: xr::Session) -> xr::Time {
    let session = get(&SESSIONS, session.into_raw()).expect("unknown session");
    xr::Time::from_nanos(session.predicted.load(Ordering::Relaxed))
}

fn queue_event<T: Copy>(instance: &Instance, event: T) {
    let bytes = unsafe {
        std::slice::from_raw_parts(&event as *const T as *const u8, std::mem::size_of::<T>())
    }
    .to_vec();
    instance.events.lock().unwrap().push_back(bytes);
}

/// Puts a session state change on the runtime's event queue.
pub fn queue_session_state_event(session: xr::Session, state: xr::SessionState) {
    let session_obj = get(&SESSIONS, session.into_raw()).expect("unknown session");
    let instance = get(&INSTANCES, session_obj.instance).expect("unknown instance");
    queue_event(
        &instance,
        xr::EventDataSessionStateChanged {
            ty: xr::EventDataSessionStateChanged::TYPE,
            next: std::ptr::null(),
            session,
            state,
            time: xr::Time::from_nanos(0),
        },
    );
}

static LAST_HAND_LOCATE: Mutex<Option<(xr::Space, xr::Time)>> = Mutex::new(None);

/// Base space and time of the most recent xrLocateHandJointsEXT call.
pub fn last_hand_locate() -> Option<(xr::Space, xr::Time)> {
    *LAST_HAND_LOCATE.lock().unwrap()
}

/// The binding strings suggested for an action, in suggestion order.
pub fn get_suggested_bindings(action: xr::Action) -> Vec<String> {
    let action = get(&ACTIONS, action.into_raw()).expect("unknown action");
    let instance = get(&INSTANCES, action.instance).expect("unknown instance");
    let result = action
        .suggested
        .lock()
        .unwrap()
        .iter()
        .map(|(_, binding)| instance.path_string(*binding).expect("unknown path"))
        .collect();
    result
}

// Entry points.

pub extern "system" fn create_instance(
    _info: *const xr::InstanceCreateInfo,
    instance: *mut xr::Instance,
) -> xr::Result {
    let id = insert(
        &INSTANCES,
        Instance {
            paths: Mutex::default(),
            events: Mutex::default(),
        },
    );
    unsafe { instance.write(xr::Instance::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn destroy_instance(instance: xr::Instance) -> xr::Result {
    INSTANCES.lock().unwrap().remove(&instance.into_raw());
    xr::Result::SUCCESS
}

extern "system" fn enumerate_instance_extension_properties(
    _layer_name: *const c_char,
    capacity: u32,
    count: *mut u32,
    properties: *mut xr::ExtensionProperties,
) -> xr::Result {
    let available: u32 = EXTENSION_AVAILABLE.load(Ordering::Relaxed).into();
    unsafe { count.write(available) };
    if capacity == 0 || available == 0 {
        return xr::Result::SUCCESS;
    }
    if capacity < available {
        return xr::Result::ERROR_SIZE_INSUFFICIENT;
    }
    let mut prop = xr::ExtensionProperties {
        ty: xr::ExtensionProperties::TYPE,
        next: std::ptr::null_mut(),
        extension_name: [0; xr::MAX_EXTENSION_NAME_SIZE],
        extension_version: 4,
    };
    let name = b"XR_EXT_hand_tracking\0";
    for (out, b) in prop.extension_name.iter_mut().zip(name) {
        *out = *b as c_char;
    }
    unsafe { properties.write(prop) };
    xr::Result::SUCCESS
}

extern "system" fn get_system(
    _instance: xr::Instance,
    _info: *const xr::SystemGetInfo,
    system_id: *mut xr::SystemId,
) -> xr::Result {
    unsafe { system_id.write(xr::SystemId::from_raw(1)) };
    xr::Result::SUCCESS
}

extern "system" fn get_system_properties(
    _instance: xr::Instance,
    _system_id: xr::SystemId,
    properties: *mut xr::SystemProperties,
) -> xr::Result {
    let properties = unsafe { properties.as_mut() }.unwrap();
    let mut next = properties.next as *mut xr::BaseOutStructure;
    while !next.is_null() {
        let header = unsafe { &mut *next };
        if header.ty == xr::SystemHandTrackingPropertiesEXT::TYPE {
            let props = next as *mut xr::SystemHandTrackingPropertiesEXT;
            unsafe {
                (*props).supports_hand_tracking = SYSTEM_SUPPORT.load(Ordering::Relaxed).into();
            }
        }
        next = header.next;
    }
    xr::Result::SUCCESS
}

extern "system" fn string_to_path(
    instance: xr::Instance,
    string: *const c_char,
    path: *mut xr::Path,
) -> xr::Result {
    let instance = get_handle!(INSTANCES, instance);
    let s = unsafe { CStr::from_ptr(string) }.to_str().unwrap();
    unsafe { path.write(instance.intern_path(s)) };
    xr::Result::SUCCESS
}

extern "system" fn path_to_string(
    instance: xr::Instance,
    path: xr::Path,
    capacity: u32,
    count: *mut u32,
    buffer: *mut c_char,
) -> xr::Result {
    let instance = get_handle!(INSTANCES, instance);
    let Some(value) = instance.path_string(path) else {
        return xr::Result::ERROR_PATH_INVALID;
    };
    let bytes = [value.as_bytes(), &[0]].concat();
    unsafe { count.write(bytes.len() as u32) };
    if capacity > 0 {
        if (capacity as usize) < bytes.len() {
            return xr::Result::ERROR_SIZE_INSUFFICIENT;
        }
        let out = unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, bytes.len()) };
        out.copy_from_slice(&bytes);
    }
    xr::Result::SUCCESS
}

extern "system" fn create_session(
    instance: xr::Instance,
    _info: *const xr::SessionCreateInfo,
    session: *mut xr::Session,
) -> xr::Result {
    let _ = get_handle!(INSTANCES, instance);
    let id = insert(
        &SESSIONS,
        Session {
            instance: instance.into_raw(),
            hands: Default::default(),
            predicted: AtomicI64::new(0),
        },
    );
    unsafe { session.write(xr::Session::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn destroy_session(session: xr::Session) -> xr::Result {
    SESSIONS.lock().unwrap().remove(&session.into_raw());
    xr::Result::SUCCESS
}

extern "system" fn create_reference_space(
    session: xr::Session,
    _info: *const xr::ReferenceSpaceCreateInfo,
    space: *mut xr::Space,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let id = insert(
        &SPACES,
        Space {
            kind: SpaceKind::Reference,
        },
    );
    unsafe { space.write(xr::Space::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn destroy_space(space: xr::Space) -> xr::Result {
    SPACES.lock().unwrap().remove(&space.into_raw());
    xr::Result::SUCCESS
}

extern "system" fn create_action_set(
    instance: xr::Instance,
    _info: *const xr::ActionSetCreateInfo,
    set: *mut xr::ActionSet,
) -> xr::Result {
    let _ = get_handle!(INSTANCES, instance);
    let id = insert(
        &ACTION_SETS,
        ActionSet {
            instance: instance.into_raw(),
        },
    );
    unsafe { set.write(xr::ActionSet::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn create_action(
    set: xr::ActionSet,
    _info: *const xr::ActionCreateInfo,
    action: *mut xr::Action,
) -> xr::Result {
    let set = get_handle!(ACTION_SETS, set);
    let id = insert(
        &ACTIONS,
        Action {
            instance: set.instance,
            suggested: Mutex::default(),
        },
    );
    unsafe { action.write(xr::Action::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn suggest_interaction_profile_bindings(
    instance: xr::Instance,
    suggested_bindings: *const xr::InteractionProfileSuggestedBinding,
) -> xr::Result {
    let _ = get_handle!(INSTANCES, instance);
    let suggested = unsafe { suggested_bindings.as_ref() }.unwrap();
    let bindings = unsafe {
        std::slice::from_raw_parts(
            suggested.suggested_bindings,
            suggested.count_suggested_bindings as usize,
        )
    };
    for binding in bindings {
        let action = get_handle!(ACTIONS, binding.action);
        action
            .suggested
            .lock()
            .unwrap()
            .push((suggested.interaction_profile, binding.binding));
    }
    xr::Result::SUCCESS
}

extern "system" fn create_action_space(
    session: xr::Session,
    info: *const xr::ActionSpaceCreateInfo,
    space: *mut xr::Space,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let info = unsafe { info.as_ref() }.unwrap();
    let id = insert(
        &SPACES,
        Space {
            kind: SpaceKind::Action {
                offset: info.pose_in_action_space,
            },
        },
    );
    unsafe { space.write(xr::Space::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn locate_space(
    space: xr::Space,
    _base_space: xr::Space,
    _time: xr::Time,
    location: *mut xr::SpaceLocation,
) -> xr::Result {
    let space = get_handle!(SPACES, space);
    let pose = match space.kind {
        SpaceKind::Reference => xr::Posef::IDENTITY,
        SpaceKind::Action { offset } => offset,
    };
    let location = unsafe { location.as_mut() }.unwrap();
    location.location_flags = *TRACKED;
    location.pose = pose;
    xr::Result::SUCCESS
}

extern "system" fn wait_frame(
    session: xr::Session,
    _info: *const xr::FrameWaitInfo,
    state: *mut xr::FrameState,
) -> xr::Result {
    let session = get_handle!(SESSIONS, session);
    let time = session.predicted.fetch_add(FRAME_STEP_NANOS, Ordering::Relaxed) + FRAME_STEP_NANOS;
    let state = unsafe { state.as_mut() }.unwrap();
    state.predicted_display_time = xr::Time::from_nanos(time);
    state.predicted_display_period = xr::Duration::from_nanos(FRAME_STEP_NANOS);
    state.should_render = true.into();
    xr::Result::SUCCESS
}

extern "system" fn begin_frame(
    session: xr::Session,
    _info: *const xr::FrameBeginInfo,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    xr::Result::SUCCESS
}

extern "system" fn end_frame(session: xr::Session, _info: *const xr::FrameEndInfo) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    xr::Result::SUCCESS
}

extern "system" fn poll_event(
    instance: xr::Instance,
    buffer: *mut xr::EventDataBuffer,
) -> xr::Result {
    let instance = get_handle!(INSTANCES, instance);
    let mut events = instance.events.lock().unwrap();
    match events.pop_front() {
        Some(event) => {
            unsafe {
                buffer.cast::<u8>().copy_from(event.as_ptr(), event.len());
            }
            xr::Result::SUCCESS
        }
        None => xr::Result::EVENT_UNAVAILABLE,
    }
}

extern "system" fn sync_actions(
    session: xr::Session,
    _info: *const xr::ActionsSyncInfo,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    xr::Result::SUCCESS
}

extern "system" fn get_action_state_boolean(
    session: xr::Session,
    _info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStateBoolean,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let state = unsafe { state.as_mut() }.unwrap();
    state.current_state = false.into();
    state.changed_since_last_sync = false.into();
    state.last_change_time = xr::Time::from_nanos(0);
    state.is_active = false.into();
    xr::Result::SUCCESS
}

extern "system" fn get_action_state_float(
    session: xr::Session,
    _info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStateFloat,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let state = unsafe { state.as_mut() }.unwrap();
    state.current_state = 0.0;
    state.changed_since_last_sync = false.into();
    state.last_change_time = xr::Time::from_nanos(0);
    state.is_active = false.into();
    xr::Result::SUCCESS
}

extern "system" fn get_action_state_pose(
    session: xr::Session,
    _info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStatePose,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let state = unsafe { state.as_mut() }.unwrap();
    state.is_active = false.into();
    xr::Result::SUCCESS
}

extern "system" fn get_current_interaction_profile(
    session: xr::Session,
    _top_level_user_path: xr::Path,
    interaction_profile: *mut xr::InteractionProfileState,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let state = unsafe { interaction_profile.as_mut() }.unwrap();
    // This runtime never binds a real profile.
    state.interaction_profile = xr::Path::NULL;
    xr::Result::SUCCESS
}

extern "system" fn create_hand_tracker_e_x_t(
    session: xr::Session,
    info: *const xr::HandTrackerCreateInfoEXT,
    tracker: *mut xr::HandTrackerEXT,
) -> xr::Result {
    let _ = get_handle!(SESSIONS, session);
    let info = unsafe { info.as_ref() }.unwrap();
    let hand = match info.hand {
        xr::HandEXT::LEFT => 0,
        xr::HandEXT::RIGHT => 1,
        other => {
            println!("bad hand {other:?}");
            return xr::Result::ERROR_VALIDATION_FAILURE;
        }
    };
    let id = insert(
        &TRACKERS,
        HandTracker {
            session: session.into_raw(),
            hand,
        },
    );
    unsafe { tracker.write(xr::HandTrackerEXT::from_raw(id)) };
    xr::Result::SUCCESS
}

extern "system" fn destroy_hand_tracker_e_x_t(tracker: xr::HandTrackerEXT) -> xr::Result {
    TRACKERS.lock().unwrap().remove(&tracker.into_raw());
    xr::Result::SUCCESS
}

extern "system" fn locate_hand_joints_e_x_t(
    tracker: xr::HandTrackerEXT,
    info: *const xr::HandJointsLocateInfoEXT,
    locations: *mut xr::HandJointLocationsEXT,
) -> xr::Result {
    let tracker = get_handle!(TRACKERS, tracker);
    {
        let info = unsafe { info.as_ref() }.unwrap();
        *LAST_HAND_LOCATE.lock().unwrap() = Some((info.base_space, info.time));
    }
    let session = match get(&SESSIONS, tracker.session) {
        Some(session) => session,
        None => return xr::Result::ERROR_SESSION_LOST,
    };
    let state = session.hands[tracker.hand].lock().unwrap();
    if state.result != xr::Result::SUCCESS {
        return state.result;
    }
    let locations = unsafe { locations.as_mut() }.unwrap();
    let count = (locations.joint_count as usize).min(JOINT_COUNT);
    let out = unsafe { std::slice::from_raw_parts_mut(locations.joint_locations, count) };
    let mut any_valid = false;
    for (out, joint) in out.iter_mut().zip(state.joints.iter()) {
        any_valid |= joint.valid;
        *out = xr::HandJointLocationEXT {
            location_flags: if joint.valid {
                *TRACKED
            } else {
                xr::SpaceLocationFlags::default()
            },
            pose: joint.pose,
            radius: 0.01,
        };
    }
    locations.is_active = any_valid.into();
    xr::Result::SUCCESS
}

/// Generates match arms mapping "xrName" onto the snake_case functions
/// above.
macro_rules! get_fn {
    ($name:expr, [$($func:ident),+ $(,)?]) => {
        match $name.to_bytes() {
            $(
                x if x == concat!("xr", stringify!($func)).as_bytes() => Some(unsafe {
                    std::mem::transmute::<xr::pfn::$func, xr::pfn::VoidFunction>(
                        paste! { [<$func:snake>] } as xr::pfn::$func,
                    )
                }),
            )+
            _ => None,
        }
    };
}

pub extern "system" fn get_instance_proc_addr(
    instance: xr::Instance,
    name: *const c_char,
    function: *mut Option<xr::pfn::VoidFunction>,
) -> xr::Result {
    let name = unsafe { CStr::from_ptr(name) };

    let resolved = if instance == xr::Instance::NULL {
        get_fn!(name, [CreateInstance, EnumerateInstanceExtensionProperties])
    } else {
        get_fn!(
            name,
            [
                CreateInstance,
                DestroyInstance,
                EnumerateInstanceExtensionProperties,
                GetSystem,
                GetSystemProperties,
                StringToPath,
                PathToString,
                CreateSession,
                DestroySession,
                CreateReferenceSpace,
                DestroySpace,
                CreateActionSet,
                CreateAction,
                SuggestInteractionProfileBindings,
                GetCurrentInteractionProfile,
                CreateActionSpace,
                LocateSpace,
                WaitFrame,
                BeginFrame,
                EndFrame,
                PollEvent,
                SyncActions,
                GetActionStateBoolean,
                GetActionStateFloat,
                GetActionStatePose,
                CreateHandTrackerEXT,
                DestroyHandTrackerEXT,
                LocateHandJointsEXT,
            ]
        )
    };

    unsafe { *function = resolved };
    match resolved {
        Some(_) => xr::Result::SUCCESS,
        None => xr::Result::ERROR_FUNCTION_UNSUPPORTED,
    }
}
