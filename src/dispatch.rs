//! Interception dispatch: validates the layer-chain handshake, owns the
//! process-wide engine slot, and splices trampolines into the downstream
//! resolver for the calls the engine handles.

use crate::hands::HAND_TRACKING_EXTENSION;
use crate::layer::{Layer, LAYER_NAME};
use crate::loader::{
    ApiLayerCreateInfo, LoaderInterfaceStructs, API_LAYER_CREATE_INFO_STRUCT_VERSION,
    API_LAYER_NEXT_INFO_STRUCT_VERSION,
};
use crate::visualize::HandVisualizer;
use log::{debug, info, warn};
use openxr_sys as xr;
use std::ffi::{c_char, CStr};
use std::sync::{Arc, RwLock};

/// Chain links to the downstream implementations of every intercepted
/// call, captured when the loader resolves each name through us.
#[derive(Default)]
pub(crate) struct NextTable {
    pub(crate) wait_frame: RwLock<Option<xr::pfn::WaitFrame>>,
    pub(crate) begin_frame: RwLock<Option<xr::pfn::BeginFrame>>,
    pub(crate) end_frame: RwLock<Option<xr::pfn::EndFrame>>,
    pub(crate) create_session: RwLock<Option<xr::pfn::CreateSession>>,
    pub(crate) destroy_session: RwLock<Option<xr::pfn::DestroySession>>,
    pub(crate) poll_event: RwLock<Option<xr::pfn::PollEvent>>,
    pub(crate) get_current_interaction_profile:
        RwLock<Option<xr::pfn::GetCurrentInteractionProfile>>,
    pub(crate) suggest_interaction_profile_bindings:
        RwLock<Option<xr::pfn::SuggestInteractionProfileBindings>>,
    pub(crate) create_action_space: RwLock<Option<xr::pfn::CreateActionSpace>>,
    pub(crate) destroy_space: RwLock<Option<xr::pfn::DestroySpace>>,
    pub(crate) locate_space: RwLock<Option<xr::pfn::LocateSpace>>,
    pub(crate) sync_actions: RwLock<Option<xr::pfn::SyncActions>>,
    pub(crate) get_action_state_boolean: RwLock<Option<xr::pfn::GetActionStateBoolean>>,
    pub(crate) get_action_state_float: RwLock<Option<xr::pfn::GetActionStateFloat>>,
    pub(crate) get_action_state_pose: RwLock<Option<xr::pfn::GetActionStatePose>>,
}

struct Chain {
    next_gipa: xr::pfn::GetInstanceProcAddr,
    /// `None` keeps the layer as a pure pass-through.
    engine: Option<Arc<Layer>>,
}

static CHAIN: RwLock<Option<Chain>> = RwLock::new(None);

fn engine() -> Option<Arc<Layer>> {
    CHAIN
        .read()
        .unwrap()
        .as_ref()
        .and_then(|chain| chain.engine.clone())
}

/// Hands a renderer to the armed engine. Returns false if the layer is in
/// pass-through or a renderer was installed already. Install before the
/// application resolves xrEndFrame, or the hook never attaches.
pub fn install_visualizer(visualizer: Box<dyn HandVisualizer>) -> bool {
    match engine() {
        Some(engine) => engine.install_visualizer(visualizer),
        None => false,
    }
}

fn cstr_from_chars(chars: &[c_char]) -> Option<&CStr> {
    let bytes = unsafe { std::slice::from_raw_parts(chars.as_ptr() as *const u8, chars.len()) };
    CStr::from_bytes_until_nul(bytes).ok()
}

/// Asks the downstream chain for its extension list before the instance
/// exists; `xrEnumerateInstanceExtensionProperties` is specified to resolve
/// against a null instance.
fn probe_hand_tracking(gipa: xr::pfn::GetInstanceProcAddr) -> bool {
    let mut function: Option<xr::pfn::VoidFunction> = None;
    let res = unsafe {
        gipa(
            xr::Instance::NULL,
            c"xrEnumerateInstanceExtensionProperties".as_ptr(),
            &mut function,
        )
    };
    let Some(function) = function else {
        warn!("Downstream chain cannot enumerate extensions without an instance ({res:?})");
        return false;
    };
    if res != xr::Result::SUCCESS {
        warn!("Downstream chain cannot enumerate extensions without an instance ({res:?})");
        return false;
    }
    let enumerate = unsafe {
        std::mem::transmute::<xr::pfn::VoidFunction, xr::pfn::EnumerateInstanceExtensionProperties>(
            function,
        )
    };

    let mut count = 0;
    if unsafe { enumerate(std::ptr::null(), 0, &mut count, std::ptr::null_mut()) }
        != xr::Result::SUCCESS
    {
        return false;
    }
    let mut properties = vec![
        xr::ExtensionProperties {
            ty: xr::ExtensionProperties::TYPE,
            next: std::ptr::null_mut(),
            extension_name: [0; xr::MAX_EXTENSION_NAME_SIZE],
            extension_version: 0,
        };
        count as usize
    ];
    if unsafe { enumerate(std::ptr::null(), count, &mut count, properties.as_mut_ptr()) }
        != xr::Result::SUCCESS
    {
        return false;
    }
    properties
        .iter()
        .take(count as usize)
        .any(|p| cstr_from_chars(&p.extension_name) == Some(HAND_TRACKING_EXTENSION))
}

pub(crate) extern "system" fn create_api_layer_instance(
    info: *const xr::InstanceCreateInfo,
    layer_info: *const ApiLayerCreateInfo,
    instance: *mut xr::Instance,
) -> xr::Result {
    debug!("xrCreateApiLayerInstance");

    let (Some(create_info), Some(layer_info)) =
        (unsafe { info.as_ref() }, unsafe { layer_info.as_ref() })
    else {
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    };
    if layer_info.struct_type != LoaderInterfaceStructs::API_LAYER_CREATE_INFO
        || layer_info.struct_version != API_LAYER_CREATE_INFO_STRUCT_VERSION
        || layer_info.struct_size != std::mem::size_of::<ApiLayerCreateInfo>()
    {
        warn!("xrCreateApiLayerInstance validation failed");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    }
    let Some(next_info) = (unsafe { layer_info.next_info.as_ref() }) else {
        warn!("xrCreateApiLayerInstance validation failed");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    };
    if next_info.struct_type != LoaderInterfaceStructs::API_LAYER_NEXT_INFO
        || next_info.struct_version != API_LAYER_NEXT_INFO_STRUCT_VERSION
        || next_info.struct_size != std::mem::size_of::<crate::loader::ApiLayerNextInfo>()
        || cstr_from_chars(&next_info.layer_name).map(CStr::to_bytes) != Some(LAYER_NAME.as_bytes())
    {
        warn!("xrCreateApiLayerInstance validation failed");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    }

    let next_gipa = next_info.next_get_instance_proc_addr;
    let next_create = next_info.next_create_api_layer_instance;

    let has_hand_tracking = probe_hand_tracking(next_gipa);

    // Enable XR_EXT_hand_tracking on the downstream instance on top of
    // whatever the application asked for.
    let mut chain_create_info = *create_info;
    let mut extension_names: Vec<*const c_char> = Vec::new();
    if has_hand_tracking {
        if create_info.enabled_extension_count > 0 {
            extension_names.extend_from_slice(unsafe {
                std::slice::from_raw_parts(
                    create_info.enabled_extension_names,
                    create_info.enabled_extension_count as usize,
                )
            });
        }
        if !extension_names
            .iter()
            .any(|&name| unsafe { CStr::from_ptr(name) } == HAND_TRACKING_EXTENSION)
        {
            extension_names.push(HAND_TRACKING_EXTENSION.as_ptr());
        }
        chain_create_info.enabled_extension_names = extension_names.as_ptr();
        chain_create_info.enabled_extension_count = extension_names.len() as u32;
    } else {
        info!("XR_EXT_hand_tracking is not offered by the runtime or any upstream layer");
    }

    let mut chain_layer_info = *layer_info;
    chain_layer_info.next_info = next_info.next;

    let res = unsafe { next_create(&chain_create_info, &chain_layer_info, instance) };
    if res != xr::Result::SUCCESS {
        return res;
    }

    let application_name = cstr_from_chars(&create_info.application_info.application_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let engine_name = cstr_from_chars(&create_info.application_info.engine_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let engine = match Layer::new(
        unsafe { *instance },
        next_gipa,
        has_hand_tracking,
        &application_name,
        &engine_name,
    ) {
        Ok(layer) => Some(Arc::new(layer)),
        Err(e) => {
            info!("Hand-to-controller is disarmed for this instance: {e:?}");
            None
        }
    };
    *CHAIN.write().unwrap() = Some(Chain { next_gipa, engine });

    res
}

macro_rules! trampoline {
    ($name:ident($($arg:ident: $ty:ty),+ $(,)?)) => {
        extern "system" fn $name($($arg: $ty),+) -> xr::Result {
            match engine() {
                Some(layer) => layer.$name($($arg),+),
                None => xr::Result::ERROR_HANDLE_INVALID,
            }
        }
    };
}

trampoline!(wait_frame(
    session: xr::Session,
    info: *const xr::FrameWaitInfo,
    state: *mut xr::FrameState,
));
trampoline!(begin_frame(session: xr::Session, info: *const xr::FrameBeginInfo));
trampoline!(end_frame(session: xr::Session, info: *const xr::FrameEndInfo));
trampoline!(create_session(
    instance: xr::Instance,
    info: *const xr::SessionCreateInfo,
    session: *mut xr::Session,
));
trampoline!(destroy_session(session: xr::Session));
trampoline!(poll_event(instance: xr::Instance, event_data: *mut xr::EventDataBuffer));
trampoline!(get_current_interaction_profile(
    session: xr::Session,
    top_level_user_path: xr::Path,
    interaction_profile: *mut xr::InteractionProfileState,
));
trampoline!(suggest_interaction_profile_bindings(
    instance: xr::Instance,
    suggested_bindings: *const xr::InteractionProfileSuggestedBinding,
));
trampoline!(create_action_space(
    session: xr::Session,
    create_info: *const xr::ActionSpaceCreateInfo,
    space: *mut xr::Space,
));
trampoline!(destroy_space(space: xr::Space));
trampoline!(locate_space(
    space: xr::Space,
    base_space: xr::Space,
    time: xr::Time,
    location: *mut xr::SpaceLocation,
));
trampoline!(sync_actions(session: xr::Session, sync_info: *const xr::ActionsSyncInfo));
trampoline!(get_action_state_boolean(
    session: xr::Session,
    get_info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStateBoolean,
));
trampoline!(get_action_state_float(
    session: xr::Session,
    get_info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStateFloat,
));
trampoline!(get_action_state_pose(
    session: xr::Session,
    get_info: *const xr::ActionStateGetInfo,
    state: *mut xr::ActionStatePose,
));

pub(crate) extern "system" fn get_instance_proc_addr(
    instance: xr::Instance,
    name: *const c_char,
    function: *mut Option<xr::pfn::VoidFunction>,
) -> xr::Result {
    let guard = CHAIN.read().unwrap();
    let Some(chain) = guard.as_ref() else {
        return xr::Result::ERROR_HANDLE_INVALID;
    };
    let res = unsafe { (chain.next_gipa)(instance, name, function) };
    if res != xr::Result::SUCCESS {
        // Unresolvable names pass through untouched.
        return res;
    }
    let Some(layer) = chain.engine.clone() else {
        return res;
    };
    drop(guard);

    let name = unsafe { CStr::from_ptr(name) };

    // Capture the downstream pointer as our chain link and substitute the
    // trampoline.
    macro_rules! hook {
        ($field:ident, $pfn:ty) => {{
            if let Some(downstream) = unsafe { (*function).take() } {
                *layer.next.$field.write().unwrap() =
                    Some(unsafe { std::mem::transmute::<xr::pfn::VoidFunction, $pfn>(downstream) });
                unsafe {
                    *function = Some(std::mem::transmute::<$pfn, xr::pfn::VoidFunction>(
                        $field as $pfn,
                    ));
                }
            }
        }};
    }

    match name.to_bytes() {
        b"xrWaitFrame" => hook!(wait_frame, xr::pfn::WaitFrame),
        b"xrBeginFrame" => hook!(begin_frame, xr::pfn::BeginFrame),
        b"xrCreateSession" => hook!(create_session, xr::pfn::CreateSession),
        b"xrDestroySession" => hook!(destroy_session, xr::pfn::DestroySession),
        b"xrPollEvent" => hook!(poll_event, xr::pfn::PollEvent),
        b"xrGetCurrentInteractionProfile" => hook!(
            get_current_interaction_profile,
            xr::pfn::GetCurrentInteractionProfile
        ),
        b"xrSuggestInteractionProfileBindings" => hook!(
            suggest_interaction_profile_bindings,
            xr::pfn::SuggestInteractionProfileBindings
        ),
        b"xrCreateActionSpace" => hook!(create_action_space, xr::pfn::CreateActionSpace),
        b"xrDestroySpace" => hook!(destroy_space, xr::pfn::DestroySpace),
        b"xrLocateSpace" => hook!(locate_space, xr::pfn::LocateSpace),
        b"xrSyncActions" => hook!(sync_actions, xr::pfn::SyncActions),
        b"xrGetActionStateBoolean" => {
            hook!(get_action_state_boolean, xr::pfn::GetActionStateBoolean)
        }
        b"xrGetActionStateFloat" => hook!(get_action_state_float, xr::pfn::GetActionStateFloat),
        b"xrGetActionStatePose" => hook!(get_action_state_pose, xr::pfn::GetActionStatePose),
        b"xrEndFrame" if layer.visualizer_installed() => hook!(end_frame, xr::pfn::EndFrame),
        _ => {}
    }

    res
}
