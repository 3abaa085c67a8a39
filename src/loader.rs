//! The loader negotiation ABI (`openxr_loader_negotiation.h`).
//!
//! These structures are owned by the OpenXR loader and handed to us by
//! pointer; the layouts here must match the C header bit for bit.

use openxr_sys as xr;
use std::ffi::{c_char, c_void};

pub const CURRENT_LOADER_API_LAYER_VERSION: u32 = 1;
pub const LOADER_INFO_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_INFO_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_CREATE_INFO_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_NEXT_INFO_STRUCT_VERSION: u32 = 1;

pub const API_LAYER_MAX_SETTINGS_PATH_SIZE: usize = 512;

/// XrLoaderInterfaceStructs. The misspelled variant is faithful to the
/// header.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoaderInterfaceStructs(i32);

#[allow(dead_code)]
impl LoaderInterfaceStructs {
    pub const UNINTIALIZED: Self = Self(0);
    pub const LOADER_INFO: Self = Self(1);
    pub const API_LAYER_REQUEST: Self = Self(2);
    pub const RUNTIME_REQUEST: Self = Self(3);
    pub const API_LAYER_CREATE_INFO: Self = Self(4);
    pub const API_LAYER_NEXT_INFO: Self = Self(5);
}

/// PFN_xrCreateApiLayerInstance.
pub type CreateApiLayerInstance = unsafe extern "system" fn(
    *const xr::InstanceCreateInfo,
    *const ApiLayerCreateInfo,
    *mut xr::Instance,
) -> xr::Result;

/// XrNegotiateLoaderInfo, filled out by the loader before it calls our
/// negotiation entry point.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NegotiateLoaderInfo {
    pub struct_type: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub min_interface_version: u32,
    pub max_interface_version: u32,
    pub min_api_version: xr::Version,
    pub max_api_version: xr::Version,
}

/// XrNegotiateApiLayerRequest, filled out by us during negotiation.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct NegotiateApiLayerRequest {
    pub struct_type: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub layer_interface_version: u32,
    pub layer_api_version: xr::Version,
    pub get_instance_proc_addr: Option<xr::pfn::GetInstanceProcAddr>,
    pub create_api_layer_instance: Option<CreateApiLayerInstance>,
}

/// XrApiLayerNextInfo: one link of the loader's layer chain.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct ApiLayerNextInfo {
    pub struct_type: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub layer_name: [c_char; xr::MAX_API_LAYER_NAME_SIZE],
    pub next_get_instance_proc_addr: xr::pfn::GetInstanceProcAddr,
    pub next_create_api_layer_instance: CreateApiLayerInstance,
    pub next: *mut ApiLayerNextInfo,
}

/// XrApiLayerCreateInfo, passed to xrCreateApiLayerInstance.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct ApiLayerCreateInfo {
    pub struct_type: LoaderInterfaceStructs,
    pub struct_version: u32,
    pub struct_size: usize,
    pub loader_instance: *mut c_void,
    pub settings_file_location: [c_char; API_LAYER_MAX_SETTINGS_PATH_SIZE],
    pub next_info: *mut ApiLayerNextInfo,
}
