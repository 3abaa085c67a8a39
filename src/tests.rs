//! Full-stack tests: negotiate through the loader structures, create an
//! instance on top of the fakert runtime, then drive frames through the
//! resolved function pointers exactly as an application would.

use crate::config::{DEFAULT_PROFILE, ENV_CONFIG_DIR};
use crate::hands::joint;
use crate::loader::{
    ApiLayerCreateInfo, ApiLayerNextInfo, CreateApiLayerInstance, LoaderInterfaceStructs,
    NegotiateApiLayerRequest, NegotiateLoaderInfo, API_LAYER_CREATE_INFO_STRUCT_VERSION,
    API_LAYER_INFO_STRUCT_VERSION, API_LAYER_MAX_SETTINGS_PATH_SIZE,
    API_LAYER_NEXT_INFO_STRUCT_VERSION, CURRENT_LOADER_API_LAYER_VERSION,
    LOADER_INFO_STRUCT_VERSION,
};
use crate::{xrNegotiateLoaderApiLayerInterface, LAYER_NAME};
use fakert::Hand;
use openxr_sys as xr;
use std::ffi::{c_char, CStr, CString};
use std::mem::MaybeUninit;
use std::sync::{Mutex, MutexGuard, PoisonError};

const APP_NAME: &str = "cubes";
const ENGINE_NAME: &str = "cubesengine";

// The engine slot and the fakert handle stores are process-wide, so
// fixtures take turns.
static TEST_LOCK: Mutex<()> = Mutex::new(());

fn fill_chars<const N: usize>(out: &mut [c_char; N], s: &str) {
    for (slot, b) in out.iter_mut().zip(s.as_bytes()) {
        *slot = *b as c_char;
    }
}

extern "system" fn chain_create_instance(
    info: *const xr::InstanceCreateInfo,
    _layer_info: *const ApiLayerCreateInfo,
    instance: *mut xr::Instance,
) -> xr::Result {
    fakert::create_instance(info, instance)
}

fn valid_loader_info() -> NegotiateLoaderInfo {
    NegotiateLoaderInfo {
        struct_type: LoaderInterfaceStructs::LOADER_INFO,
        struct_version: LOADER_INFO_STRUCT_VERSION,
        struct_size: std::mem::size_of::<NegotiateLoaderInfo>(),
        min_interface_version: 1,
        max_interface_version: CURRENT_LOADER_API_LAYER_VERSION,
        min_api_version: xr::Version::new(1, 0, 0),
        max_api_version: xr::CURRENT_API_VERSION,
    }
}

fn empty_request() -> NegotiateApiLayerRequest {
    NegotiateApiLayerRequest {
        struct_type: LoaderInterfaceStructs::API_LAYER_REQUEST,
        struct_version: API_LAYER_INFO_STRUCT_VERSION,
        struct_size: std::mem::size_of::<NegotiateApiLayerRequest>(),
        layer_interface_version: 0,
        layer_api_version: xr::Version::new(0, 0, 0),
        get_instance_proc_addr: None,
        create_api_layer_instance: None,
    }
}

fn negotiate() -> (xr::pfn::GetInstanceProcAddr, CreateApiLayerInstance) {
    let loader_info = valid_loader_info();
    let mut request = empty_request();
    let res =
        unsafe { xrNegotiateLoaderApiLayerInterface(&loader_info, std::ptr::null(), &mut request) };
    assert_eq!(res, xr::Result::SUCCESS);
    (
        request.get_instance_proc_addr.unwrap(),
        request.create_api_layer_instance.unwrap(),
    )
}

struct Fixture {
    _guard: MutexGuard<'static, ()>,
    gipa: xr::pfn::GetInstanceProcAddr,
    instance: xr::Instance,
}

macro_rules! api {
    ($fixture:expr, $name:literal, $pfn:ty) => {{
        let f = $fixture
            .resolve($name)
            .unwrap_or_else(|| panic!("{:?} did not resolve", $name));
        unsafe { std::mem::transmute::<xr::pfn::VoidFunction, $pfn>(f) }
    }};
}

impl Fixture {
    fn new(config: Option<&str>) -> Self {
        match config {
            Some(text) => Self::create(&[(APP_NAME, text)], true, true),
            None => Self::create(&[], true, true),
        }
    }

    fn create(config_files: &[(&str, &str)], extension: bool, system_support: bool) -> Self {
        let guard = TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        fakert::set_hand_tracking_extension(extension);
        fakert::set_system_hand_tracking(system_support);

        let dir = std::env::temp_dir().join(format!(
            "hand-to-controller-tests-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for name in [APP_NAME, ENGINE_NAME] {
            let _ = std::fs::remove_file(dir.join(format!("{name}.cfg")));
        }
        for (name, text) in config_files {
            std::fs::write(dir.join(format!("{name}.cfg")), text).unwrap();
        }
        std::env::set_var(ENV_CONFIG_DIR, &dir);

        let (gipa, create) = negotiate();

        let mut next_info = ApiLayerNextInfo {
            struct_type: LoaderInterfaceStructs::API_LAYER_NEXT_INFO,
            struct_version: API_LAYER_NEXT_INFO_STRUCT_VERSION,
            struct_size: std::mem::size_of::<ApiLayerNextInfo>(),
            layer_name: [0; xr::MAX_API_LAYER_NAME_SIZE],
            next_get_instance_proc_addr: fakert::get_instance_proc_addr
                as xr::pfn::GetInstanceProcAddr,
            next_create_api_layer_instance: chain_create_instance,
            next: std::ptr::null_mut(),
        };
        fill_chars(&mut next_info.layer_name, LAYER_NAME);

        let layer_info = ApiLayerCreateInfo {
            struct_type: LoaderInterfaceStructs::API_LAYER_CREATE_INFO,
            struct_version: API_LAYER_CREATE_INFO_STRUCT_VERSION,
            struct_size: std::mem::size_of::<ApiLayerCreateInfo>(),
            loader_instance: std::ptr::null_mut(),
            settings_file_location: [0; API_LAYER_MAX_SETTINGS_PATH_SIZE],
            next_info: &mut next_info,
        };

        let mut app_info = xr::ApplicationInfo {
            application_name: [0; xr::MAX_APPLICATION_NAME_SIZE],
            application_version: 1,
            engine_name: [0; xr::MAX_ENGINE_NAME_SIZE],
            engine_version: 1,
            api_version: xr::CURRENT_API_VERSION,
        };
        fill_chars(&mut app_info.application_name, APP_NAME);
        fill_chars(&mut app_info.engine_name, ENGINE_NAME);
        let create_info = xr::InstanceCreateInfo {
            ty: xr::InstanceCreateInfo::TYPE,
            next: std::ptr::null(),
            create_flags: Default::default(),
            application_info: app_info,
            enabled_api_layer_count: 0,
            enabled_api_layer_names: std::ptr::null(),
            enabled_extension_count: 0,
            enabled_extension_names: std::ptr::null(),
        };

        let mut instance = xr::Instance::NULL;
        let res = unsafe { create(&create_info, &layer_info, &mut instance) };
        assert_eq!(res, xr::Result::SUCCESS);

        Self {
            _guard: guard,
            gipa,
            instance,
        }
    }

    fn resolve(&self, name: &CStr) -> Option<xr::pfn::VoidFunction> {
        let mut function = None;
        let res = unsafe { (self.gipa)(self.instance, name.as_ptr(), &mut function) };
        if res == xr::Result::SUCCESS {
            function
        } else {
            None
        }
    }

    fn downstream(&self, name: &CStr) -> Option<xr::pfn::VoidFunction> {
        let mut function = None;
        let res = fakert::get_instance_proc_addr(self.instance, name.as_ptr(), &mut function);
        if res == xr::Result::SUCCESS {
            function
        } else {
            None
        }
    }

    fn create_session(&self) -> xr::Session {
        let create = api!(self, c"xrCreateSession", xr::pfn::CreateSession);
        let info = xr::SessionCreateInfo {
            ty: xr::SessionCreateInfo::TYPE,
            next: std::ptr::null(),
            create_flags: Default::default(),
            system_id: xr::SystemId::from_raw(1),
        };
        let mut session = xr::Session::NULL;
        assert_eq!(
            unsafe { create(self.instance, &info, &mut session) },
            xr::Result::SUCCESS
        );
        session
    }

    fn string_to_path(&self, s: &str) -> xr::Path {
        let string_to_path = api!(self, c"xrStringToPath", xr::pfn::StringToPath);
        let s = CString::new(s).unwrap();
        let mut path = xr::Path::NULL;
        assert_eq!(
            unsafe { string_to_path(self.instance, s.as_ptr(), &mut path) },
            xr::Result::SUCCESS
        );
        path
    }

    fn create_action(&self) -> xr::Action {
        let create_set = api!(self, c"xrCreateActionSet", xr::pfn::CreateActionSet);
        let mut set_info =
            unsafe { MaybeUninit::<xr::ActionSetCreateInfo>::zeroed().assume_init() };
        set_info.ty = xr::ActionSetCreateInfo::TYPE;
        let mut set = xr::ActionSet::NULL;
        assert_eq!(
            unsafe { create_set(self.instance, &set_info, &mut set) },
            xr::Result::SUCCESS
        );

        let create_action = api!(self, c"xrCreateAction", xr::pfn::CreateAction);
        let mut action_info = unsafe { MaybeUninit::<xr::ActionCreateInfo>::zeroed().assume_init() };
        action_info.ty = xr::ActionCreateInfo::TYPE;
        let mut action = xr::Action::NULL;
        assert_eq!(
            unsafe { create_action(set, &action_info, &mut action) },
            xr::Result::SUCCESS
        );
        action
    }

    fn suggest(&self, bindings: &[(xr::Action, &str)]) {
        let suggest = api!(
            self,
            c"xrSuggestInteractionProfileBindings",
            xr::pfn::SuggestInteractionProfileBindings
        );
        let suggested: Vec<xr::ActionSuggestedBinding> = bindings
            .iter()
            .map(|(action, path)| xr::ActionSuggestedBinding {
                action: *action,
                binding: self.string_to_path(path),
            })
            .collect();
        let info = xr::InteractionProfileSuggestedBinding {
            ty: xr::InteractionProfileSuggestedBinding::TYPE,
            next: std::ptr::null(),
            interaction_profile: self.string_to_path(DEFAULT_PROFILE),
            count_suggested_bindings: suggested.len() as u32,
            suggested_bindings: suggested.as_ptr(),
        };
        assert_eq!(
            unsafe { suggest(self.instance, &info) },
            xr::Result::SUCCESS
        );
    }

    fn create_action_space(&self, session: xr::Session, action: xr::Action) -> xr::Space {
        let create = api!(self, c"xrCreateActionSpace", xr::pfn::CreateActionSpace);
        let info = xr::ActionSpaceCreateInfo {
            ty: xr::ActionSpaceCreateInfo::TYPE,
            next: std::ptr::null(),
            action,
            subaction_path: xr::Path::NULL,
            pose_in_action_space: xr::Posef::IDENTITY,
        };
        let mut space = xr::Space::NULL;
        assert_eq!(
            unsafe { create(session, &info, &mut space) },
            xr::Result::SUCCESS
        );
        space
    }

    fn create_reference_space(&self, session: xr::Session) -> xr::Space {
        let create = api!(self, c"xrCreateReferenceSpace", xr::pfn::CreateReferenceSpace);
        let info = xr::ReferenceSpaceCreateInfo {
            ty: xr::ReferenceSpaceCreateInfo::TYPE,
            next: std::ptr::null(),
            reference_space_type: xr::ReferenceSpaceType::LOCAL,
            pose_in_reference_space: xr::Posef::IDENTITY,
        };
        let mut space = xr::Space::NULL;
        assert_eq!(
            unsafe { create(session, &info, &mut space) },
            xr::Result::SUCCESS
        );
        space
    }

    /// One wait/begin pair; returns the latched predicted display time.
    fn frame(&self, session: xr::Session) -> xr::Time {
        let wait = api!(self, c"xrWaitFrame", xr::pfn::WaitFrame);
        let begin = api!(self, c"xrBeginFrame", xr::pfn::BeginFrame);
        let wait_info = xr::FrameWaitInfo {
            ty: xr::FrameWaitInfo::TYPE,
            next: std::ptr::null(),
        };
        let mut state = unsafe { MaybeUninit::<xr::FrameState>::zeroed().assume_init() };
        state.ty = xr::FrameState::TYPE;
        assert_eq!(
            unsafe { wait(session, &wait_info, &mut state) },
            xr::Result::SUCCESS
        );
        let begin_info = xr::FrameBeginInfo {
            ty: xr::FrameBeginInfo::TYPE,
            next: std::ptr::null(),
        };
        assert_eq!(unsafe { begin(session, &begin_info) }, xr::Result::SUCCESS);
        state.predicted_display_time
    }

    fn sync(&self, session: xr::Session) {
        let sync = api!(self, c"xrSyncActions", xr::pfn::SyncActions);
        let info = xr::ActionsSyncInfo {
            ty: xr::ActionsSyncInfo::TYPE,
            next: std::ptr::null(),
            count_active_action_sets: 0,
            active_action_sets: std::ptr::null(),
        };
        assert_eq!(unsafe { sync(session, &info) }, xr::Result::SUCCESS);
    }

    fn read_boolean(
        &self,
        session: xr::Session,
        action: xr::Action,
        subaction: xr::Path,
    ) -> xr::ActionStateBoolean {
        let get = api!(self, c"xrGetActionStateBoolean", xr::pfn::GetActionStateBoolean);
        let info = xr::ActionStateGetInfo {
            ty: xr::ActionStateGetInfo::TYPE,
            next: std::ptr::null(),
            action,
            subaction_path: subaction,
        };
        let mut state = xr::ActionStateBoolean {
            ty: xr::ActionStateBoolean::TYPE,
            next: std::ptr::null_mut(),
            current_state: false.into(),
            changed_since_last_sync: false.into(),
            last_change_time: xr::Time::from_nanos(0),
            is_active: false.into(),
        };
        assert_eq!(
            unsafe { get(session, &info, &mut state) },
            xr::Result::SUCCESS
        );
        state
    }

    fn read_float(&self, session: xr::Session, action: xr::Action) -> xr::ActionStateFloat {
        let get = api!(self, c"xrGetActionStateFloat", xr::pfn::GetActionStateFloat);
        let info = xr::ActionStateGetInfo {
            ty: xr::ActionStateGetInfo::TYPE,
            next: std::ptr::null(),
            action,
            subaction_path: xr::Path::NULL,
        };
        let mut state = xr::ActionStateFloat {
            ty: xr::ActionStateFloat::TYPE,
            next: std::ptr::null_mut(),
            current_state: 0.0,
            changed_since_last_sync: false.into(),
            last_change_time: xr::Time::from_nanos(0),
            is_active: false.into(),
        };
        assert_eq!(
            unsafe { get(session, &info, &mut state) },
            xr::Result::SUCCESS
        );
        state
    }
}

#[test]
fn negotiate_validates_the_handshake() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    // Interface version we don't speak.
    let mut info = valid_loader_info();
    info.max_interface_version = CURRENT_LOADER_API_LAYER_VERSION + 1;
    info.min_interface_version = CURRENT_LOADER_API_LAYER_VERSION + 1;
    let mut request = empty_request();
    assert_eq!(
        unsafe { xrNegotiateLoaderApiLayerInterface(&info, std::ptr::null(), &mut request) },
        xr::Result::ERROR_INITIALIZATION_FAILED
    );

    // API version cap below ours.
    let mut info = valid_loader_info();
    info.max_api_version = xr::Version::new(0, 1, 0);
    assert_eq!(
        unsafe { xrNegotiateLoaderApiLayerInterface(&info, std::ptr::null(), &mut request) },
        xr::Result::ERROR_INITIALIZATION_FAILED
    );

    // Struct size mismatch.
    let mut info = valid_loader_info();
    info.struct_size = 1;
    assert_eq!(
        unsafe { xrNegotiateLoaderApiLayerInterface(&info, std::ptr::null(), &mut request) },
        xr::Result::ERROR_INITIALIZATION_FAILED
    );

    // Somebody else's layer name.
    let info = valid_loader_info();
    let name = c"XR_APILAYER_NOVENDOR_somebody_else";
    assert_eq!(
        unsafe { xrNegotiateLoaderApiLayerInterface(&info, name.as_ptr(), &mut request) },
        xr::Result::ERROR_INITIALIZATION_FAILED
    );

    // And the happy path fills the request out.
    let info = valid_loader_info();
    let name = CString::new(LAYER_NAME).unwrap();
    assert_eq!(
        unsafe { xrNegotiateLoaderApiLayerInterface(&info, name.as_ptr(), &mut request) },
        xr::Result::SUCCESS
    );
    assert_eq!(request.layer_interface_version, CURRENT_LOADER_API_LAYER_VERSION);
    assert!(request.get_instance_proc_addr.is_some());
    assert!(request.create_api_layer_instance.is_some());
}

#[test]
fn passthrough_without_config() {
    let fixture = Fixture::new(None);
    for name in [c"xrWaitFrame", c"xrSyncActions", c"xrLocateSpace"] {
        assert_eq!(
            fixture.resolve(name).map(|f| f as usize),
            fixture.downstream(name).map(|f| f as usize),
            "{name:?} should pass through untouched"
        );
    }
}

#[test]
fn passthrough_without_hand_tracking_extension() {
    let fixture = Fixture::create(&[(APP_NAME, "click_threshold=0.5\n")], false, true);
    assert_eq!(
        fixture.resolve(c"xrWaitFrame").map(|f| f as usize),
        fixture.downstream(c"xrWaitFrame").map(|f| f as usize)
    );
}

#[test]
fn passthrough_without_system_support() {
    let fixture = Fixture::create(&[(APP_NAME, "click_threshold=0.5\n")], true, false);
    assert_eq!(
        fixture.resolve(c"xrGetActionStateBoolean").map(|f| f as usize),
        fixture.downstream(c"xrGetActionStateBoolean").map(|f| f as usize)
    );
}

#[test]
fn armed_layer_substitutes_only_intercepted_calls() {
    let fixture = Fixture::new(Some("click_threshold=0.5\n"));
    for name in [c"xrWaitFrame", c"xrSyncActions", c"xrPollEvent"] {
        assert_ne!(
            fixture.resolve(name).map(|f| f as usize),
            fixture.downstream(name).map(|f| f as usize),
            "{name:?} should be intercepted"
        );
    }
    // Calls the engine has no hand in stay untouched.
    for name in [c"xrCreateActionSet", c"xrCreateAction", c"xrStringToPath"] {
        assert_eq!(
            fixture.resolve(name).map(|f| f as usize),
            fixture.downstream(name).map(|f| f as usize),
            "{name:?} should pass through"
        );
    }
}

#[test]
fn config_loads_by_engine_name_as_fallback() {
    let fixture = Fixture::create(&[(ENGINE_NAME, "click_threshold=0.6\n")], true, true);
    assert_ne!(
        fixture.resolve(c"xrWaitFrame").map(|f| f as usize),
        fixture.downstream(c"xrWaitFrame").map(|f| f as usize)
    );
}

#[test]
fn pinch_closes_trigger() {
    let fixture = Fixture::new(Some(
        "click_threshold=0.5\n\
         pinch.near=0.01\n\
         pinch.far=0.06\n\
         left.pinch=/input/trigger/value\n",
    ));
    let session = fixture.create_session();

    let trigger_value = fixture.create_action();
    let trigger_click = fixture.create_action();
    fixture.suggest(&[
        (trigger_value, "/user/hand/left/input/trigger/value"),
        (trigger_click, "/user/hand/left/input/trigger/click"),
    ]);
    assert_eq!(
        fakert::get_suggested_bindings(trigger_value),
        vec!["/user/hand/left/input/trigger/value".to_owned()],
        "suggestion must reach the downstream runtime"
    );

    fakert::set_joint(session, Hand::Left, joint::THUMB_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Left, joint::INDEX_TIP, [0.01, 0.0, 0.0]);

    let begun = fixture.frame(session);
    assert_eq!(begun, fakert::predicted_display_time(session));
    fixture.sync(session);

    let float = fixture.read_float(session, trigger_value);
    assert_eq!(float.is_active, true.into());
    assert_eq!(float.current_state, 1.0);

    let boolean = fixture.read_boolean(session, trigger_value, xr::Path::NULL);
    assert_eq!(boolean.is_active, true.into());
    assert_eq!(boolean.current_state, true.into());
    assert_eq!(boolean.changed_since_last_sync, false.into());
    assert_eq!(boolean.last_change_time, begun);

    // The /value write mirrors onto the /click sibling.
    let click = fixture.read_boolean(session, trigger_click, xr::Path::NULL);
    assert_eq!(click.current_state, true.into());

    // Open the pinch: scalar drops to 0, and the next read reports the
    // edge at the new frame time.
    fakert::set_joint(session, Hand::Left, joint::INDEX_TIP, [0.06, 0.0, 0.0]);
    let begun = fixture.frame(session);
    fixture.sync(session);

    let float = fixture.read_float(session, trigger_value);
    assert_eq!(float.current_state, 0.0);
    assert_eq!(float.changed_since_last_sync, true.into());
    assert_eq!(float.last_change_time, begun);

    let boolean = fixture.read_boolean(session, trigger_value, xr::Path::NULL);
    assert_eq!(boolean.current_state, false.into());
    assert_eq!(boolean.changed_since_last_sync, true.into());
    assert_eq!(boolean.last_change_time, begun);

    // Steady state keeps the old edge time.
    fixture.frame(session);
    fixture.sync(session);
    let again = fixture.read_boolean(session, trigger_value, xr::Path::NULL);
    assert_eq!(again.changed_since_last_sync, false.into());
    assert_eq!(again.last_change_time, begun);

    // Sub-action-path lookup resolves the same binding.
    let left = fixture.string_to_path("/user/hand/left");
    let via_subaction = fixture.read_boolean(session, trigger_value, left);
    assert_eq!(via_subaction.is_active, true.into());
}

#[test]
fn sync_before_the_first_frame_emits_nothing() {
    let fixture = Fixture::new(Some("left.pinch=/input/trigger/value\n"));
    let session = fixture.create_session();
    let action = fixture.create_action();
    fixture.suggest(&[(action, "/user/hand/left/input/trigger/value")]);
    fakert::set_joint(session, Hand::Left, joint::THUMB_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Left, joint::INDEX_TIP, [0.0, 0.0, 0.0]);

    fixture.sync(session);
    let state = fixture.read_float(session, action);
    assert_eq!(state.is_active, false.into(), "no frame, no gesture output");

    fixture.frame(session);
    fixture.sync(session);
    let state = fixture.read_float(session, action);
    assert_eq!(state.is_active, true.into());
    assert_eq!(state.current_state, 1.0);
}

#[test]
fn squeeze_tolerates_one_extended_finger() {
    let fixture = Fixture::new(Some("squeeze.near=0.01\nsqueeze.far=0.07\n"));
    let session = fixture.create_session();
    let squeeze = fixture.create_action();
    fixture.suggest(&[(squeeze, "/user/hand/left/input/squeeze/value")]);

    // Distances picked to map onto scalars 0.1, 0.8 and 0.9; the outlier
    // finger is dropped and the rest average to 0.85.
    for (tip, metacarpal, distance) in [
        (joint::MIDDLE_TIP, joint::MIDDLE_METACARPAL, 0.064),
        (joint::RING_TIP, joint::RING_METACARPAL, 0.022),
        (joint::LITTLE_TIP, joint::LITTLE_METACARPAL, 0.016),
    ] {
        fakert::set_joint(session, Hand::Left, metacarpal, [0.0, 0.0, 0.0]);
        fakert::set_joint(session, Hand::Left, tip, [distance, 0.0, 0.0]);
    }

    fixture.frame(session);
    fixture.sync(session);
    let state = fixture.read_float(session, squeeze);
    assert_eq!(state.is_active, true.into());
    assert!(
        (state.current_state - 0.85).abs() < 1e-5,
        "got {}",
        state.current_state
    );
}

#[test]
fn grip_pose_composition() {
    let fixture = Fixture::new(Some("left.transform.vec=0 0 0.03\n"));
    let session = fixture.create_session();
    let grip = fixture.create_action();
    fixture.suggest(&[(grip, "/user/hand/left/input/grip/pose")]);
    let space = fixture.create_action_space(session, grip);
    let base = fixture.create_reference_space(session);

    fakert::set_joint(session, Hand::Left, joint::PALM, [1.0, 1.0, 1.0]);

    let locate = api!(fixture, c"xrLocateSpace", xr::pfn::LocateSpace);
    let time = xr::Time::from_nanos(777);
    let mut location = xr::SpaceLocation {
        ty: xr::SpaceLocation::TYPE,
        next: std::ptr::null_mut(),
        location_flags: Default::default(),
        pose: xr::Posef::IDENTITY,
    };
    assert_eq!(
        unsafe { locate(space, base, time, &mut location) },
        xr::Result::SUCCESS
    );

    assert!(location
        .location_flags
        .contains(xr::SpaceLocationFlags::POSITION_VALID));
    assert!((location.pose.position.x - 1.0).abs() < 1e-6);
    assert!((location.pose.position.y - 1.0).abs() < 1e-6);
    assert!((location.pose.position.z - 1.03).abs() < 1e-6);

    // The hand sampler saw the caller's base space and time, not the
    // engine's internals.
    assert_eq!(fakert::last_hand_locate(), Some((base, time)));

    // Pose-typed action state is always active on a hand binding.
    let get_pose = api!(fixture, c"xrGetActionStatePose", xr::pfn::GetActionStatePose);
    let info = xr::ActionStateGetInfo {
        ty: xr::ActionStateGetInfo::TYPE,
        next: std::ptr::null(),
        action: grip,
        subaction_path: xr::Path::NULL,
    };
    let mut state = xr::ActionStatePose {
        ty: xr::ActionStatePose::TYPE,
        next: std::ptr::null_mut(),
        is_active: false.into(),
    };
    assert_eq!(
        unsafe { get_pose(session, &info, &mut state) },
        xr::Result::SUCCESS
    );
    assert_eq!(state.is_active, true.into());
}

#[test]
fn profile_event_precedes_the_downstream_queue() {
    let fixture = Fixture::new(Some("click_threshold=0.5\n"));
    let session = fixture.create_session();
    fakert::queue_session_state_event(session, xr::SessionState::FOCUSED);

    let poll = api!(fixture, c"xrPollEvent", xr::pfn::PollEvent);
    let mut buffer = xr::EventDataBuffer {
        ty: xr::EventDataBuffer::TYPE,
        next: std::ptr::null(),
        varying: [0; 4000],
    };

    // First poll: our synthesized profile change, ahead of anything the
    // runtime queued.
    assert_eq!(
        unsafe { poll(fixture.instance, &mut buffer) },
        xr::Result::SUCCESS
    );
    let event = unsafe {
        &*(&buffer as *const xr::EventDataBuffer as *const xr::EventDataInteractionProfileChanged)
    };
    assert_eq!(event.ty, xr::EventDataInteractionProfileChanged::TYPE);
    assert_eq!(event.session, session);

    // Second poll: the runtime's own event comes through.
    assert_eq!(
        unsafe { poll(fixture.instance, &mut buffer) },
        xr::Result::SUCCESS
    );
    assert_eq!(buffer.ty, xr::EventDataSessionStateChanged::TYPE);

    // Then the queue runs dry; the synthetic event never repeats.
    assert_eq!(
        unsafe { poll(fixture.instance, &mut buffer) },
        xr::Result::EVENT_UNAVAILABLE
    );
}

#[test]
fn current_profile_synthesized_for_hand_paths() {
    let fixture = Fixture::new(Some("click_threshold=0.5\n"));
    let session = fixture.create_session();
    let expected = fixture.string_to_path(DEFAULT_PROFILE);

    let get = api!(
        fixture,
        c"xrGetCurrentInteractionProfile",
        xr::pfn::GetCurrentInteractionProfile
    );
    let mut state = xr::InteractionProfileState {
        ty: xr::InteractionProfileState::TYPE,
        next: std::ptr::null_mut(),
        interaction_profile: xr::Path::NULL,
    };

    for path in [
        xr::Path::NULL,
        fixture.string_to_path("/user/hand/left"),
        fixture.string_to_path("/user/hand/right"),
    ] {
        assert_eq!(
            unsafe { get(session, path, &mut state) },
            xr::Result::SUCCESS
        );
        assert_eq!(state.interaction_profile, expected);
    }

    // Anything else is the runtime's business; fakert reports no profile.
    let head = fixture.string_to_path("/user/head");
    assert_eq!(
        unsafe { get(session, head, &mut state) },
        xr::Result::SUCCESS
    );
    assert_eq!(state.interaction_profile, xr::Path::NULL);
}

#[test]
fn disabled_hand_blocks_actions_and_poses() {
    let fixture = Fixture::new(Some("right.enabled=false\n"));
    let session = fixture.create_session();

    let trigger = fixture.create_action();
    let grip = fixture.create_action();
    fixture.suggest(&[
        (trigger, "/user/hand/right/input/trigger/value"),
        (grip, "/user/hand/right/input/grip/pose"),
    ]);
    let space = fixture.create_action_space(session, grip);
    let base = fixture.create_reference_space(session);

    // A perfect pinch on the disabled hand.
    fakert::set_joint(session, Hand::Right, joint::THUMB_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Right, joint::INDEX_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Right, joint::PALM, [5.0, 5.0, 5.0]);

    fixture.frame(session);
    fixture.sync(session);

    // No scalar was written, so the read forwards to the runtime's
    // inactive default.
    let state = fixture.read_float(session, trigger);
    assert_eq!(state.is_active, false.into());

    // The grip space falls through to the downstream locate, not a
    // synthesized palm pose.
    let locate = api!(fixture, c"xrLocateSpace", xr::pfn::LocateSpace);
    let mut location = xr::SpaceLocation {
        ty: xr::SpaceLocation::TYPE,
        next: std::ptr::null_mut(),
        location_flags: Default::default(),
        pose: xr::Posef::IDENTITY,
    };
    assert_eq!(
        unsafe { locate(space, base, xr::Time::from_nanos(1), &mut location) },
        xr::Result::SUCCESS
    );
    assert_eq!(location.pose.position.z, 0.0);
}

#[test]
fn cross_hand_gesture_reads_the_other_hands_index_tip() {
    let fixture = Fixture::new(Some("left.wrist_tap=/input/menu/click\n"));
    let session = fixture.create_session();
    let menu = fixture.create_action();
    fixture.suggest(&[(menu, "/user/hand/left/input/menu/click")]);

    fakert::set_joint(session, Hand::Left, joint::WRIST, [0.0, 0.0, 0.0]);
    fixture.frame(session);
    fixture.sync(session);
    // Right hand missing: the cross-hand gesture stays unwritten.
    let state = fixture.read_boolean(session, menu, xr::Path::NULL);
    assert_eq!(state.is_active, false.into());

    fakert::set_joint(session, Hand::Right, joint::INDEX_TIP, [0.0, 0.0, 0.01]);
    fixture.frame(session);
    fixture.sync(session);
    let state = fixture.read_boolean(session, menu, xr::Path::NULL);
    assert_eq!(state.is_active, true.into());
    assert_eq!(state.current_state, true.into());
}

#[test]
fn failed_hand_sampling_is_transient() {
    let fixture = Fixture::new(Some("left.pinch=/input/trigger/value\n"));
    let session = fixture.create_session();
    let action = fixture.create_action();
    fixture.suggest(&[(action, "/user/hand/left/input/trigger/value")]);

    fakert::set_joint(session, Hand::Left, joint::THUMB_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Left, joint::INDEX_TIP, [0.0, 0.0, 0.0]);
    fixture.frame(session);
    fixture.sync(session);
    assert_eq!(fixture.read_float(session, action).current_state, 1.0);

    // The tracker hiccups for a frame: the stale scalar keeps reporting
    // and nothing gets stuck.
    fakert::fail_hand(session, Hand::Left, xr::Result::ERROR_TIME_INVALID);
    fixture.frame(session);
    fixture.sync(session);
    let state = fixture.read_float(session, action);
    assert_eq!(state.current_state, 1.0);
    assert_eq!(state.changed_since_last_sync, false.into());
}

#[test]
fn installed_visualizer_receives_latched_joints() {
    use std::sync::Arc;

    struct Recorder {
        frames: Arc<Mutex<Vec<(i64, bool)>>>,
    }
    impl crate::HandVisualizer for Recorder {
        fn render(&self, frame: &crate::FrameHands) {
            self.frames
                .lock()
                .unwrap()
                .push((frame.time.as_nanos(), frame.joints[0].is_some()));
        }
    }

    let fixture = Fixture::new(Some("left.pinch=/input/trigger/value\n"));
    let session = fixture.create_session();

    let frames = Arc::new(Mutex::new(Vec::new()));
    assert!(crate::install_visualizer(Box::new(Recorder {
        frames: frames.clone(),
    })));

    // The hook only attaches to xrEndFrame resolved after installation.
    let end_frame = api!(fixture, c"xrEndFrame", xr::pfn::EndFrame);

    fakert::set_joint(session, Hand::Left, joint::PALM, [0.0, 1.0, 0.0]);
    let begun = fixture.frame(session);
    fixture.sync(session);

    let mut end_info = unsafe { MaybeUninit::<xr::FrameEndInfo>::zeroed().assume_init() };
    end_info.ty = xr::FrameEndInfo::TYPE;
    assert_eq!(unsafe { end_frame(session, &end_info) }, xr::Result::SUCCESS);

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], (begun.as_nanos(), true));
}

#[test]
fn destroy_session_tears_the_tables_down() {
    let fixture = Fixture::new(Some("left.pinch=/input/trigger/value\n"));
    let session = fixture.create_session();
    let action = fixture.create_action();
    fixture.suggest(&[(action, "/user/hand/left/input/trigger/value")]);
    fakert::set_joint(session, Hand::Left, joint::THUMB_TIP, [0.0, 0.0, 0.0]);
    fakert::set_joint(session, Hand::Left, joint::INDEX_TIP, [0.0, 0.0, 0.0]);
    fixture.frame(session);
    fixture.sync(session);
    assert_eq!(fixture.read_float(session, action).is_active, true.into());

    let destroy = api!(fixture, c"xrDestroySession", xr::pfn::DestroySession);
    assert_eq!(unsafe { destroy(session) }, xr::Result::SUCCESS);

    // A fresh session starts from an empty table.
    let session = fixture.create_session();
    fixture.frame(session);
    fixture.sync(session);
    let state = fixture.read_float(session, action);
    assert_eq!(state.is_active, false.into());
}
