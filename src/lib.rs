mod config;
mod convert;
mod dispatch;
mod hands;
mod input;
mod layer;
mod loader;
mod registry;
mod visualize;

#[cfg(test)]
mod tests;

pub use dispatch::install_visualizer;
pub use layer::LAYER_NAME;
pub use visualize::{FrameHands, HandVisualizer};

use loader::{
    NegotiateApiLayerRequest, NegotiateLoaderInfo, API_LAYER_INFO_STRUCT_VERSION,
    CURRENT_LOADER_API_LAYER_VERSION, LOADER_INFO_STRUCT_VERSION,
};
use log::{info, warn};
use openxr_sys as xr;
use std::ffi::{c_char, CStr};

fn init_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let mut builder = env_logger::Builder::new();
        #[allow(unused_mut)]
        let mut startup_err: Option<String> = None;

        #[cfg(not(test))]
        {
            use std::path::Path;

            struct ComboWriter(std::fs::File, std::io::Stderr);

            impl std::io::Write for ComboWriter {
                fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                    let _ = self.0.write(buf)?;
                    self.1.write(buf)
                }

                fn flush(&mut self) -> std::io::Result<()> {
                    self.0.flush()?;
                    self.1.flush()
                }
            }

            let state_dir = std::env::var("XDG_STATE_HOME")
                .or_else(|_| std::env::var("HOME").map(|h| h + "/.local/state"));

            if let Ok(state) = state_dir {
                let path = Path::new(&state).join("hand_to_controller");
                let mut setup = || {
                    let path = path.join(format!("{LAYER_NAME}.log"));
                    match std::fs::File::create(path) {
                        Ok(file) => {
                            let writer = ComboWriter(file, std::io::stderr());
                            builder.target(env_logger::Target::Pipe(Box::new(writer)));
                        }
                        Err(e) => startup_err = Some(format!("Failed to create log file: {e:?}")),
                    }
                };

                match std::fs::create_dir_all(&path) {
                    Ok(_) => setup(),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => setup(),
                    err => {
                        startup_err = Some(format!(
                            "Failed to create log directory ({path:?}): {err:?}"
                        ))
                    }
                }
            }

            std::panic::set_hook(Box::new(|info| {
                log::error!("{info}");
                let backtrace = std::backtrace::Backtrace::force_capture();
                log::error!("Backtrace: \n{backtrace}");
                // Unwinding back into the application through a C ABI frame
                // is not an option.
                std::process::abort();
            }));
        }

        // safety: who cares lol
        unsafe {
            time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound)
        };

        builder
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .is_test(cfg!(test))
            .format(|buf, record| {
                use std::io::Write;
                use time::macros::format_description;

                let style = buf.default_level_style(record.level());
                let now = time::OffsetDateTime::now_local()
                    .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
                let now = now
                    .format(format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                    ))
                    .unwrap();

                write!(buf, "[{now} {style}{:5}{style:#}", record.level())?;
                if let Some(path) = record.module_path() {
                    write!(buf, " {}", path)?;
                }
                writeln!(buf, " {:?}] {}", std::thread::current().id(), record.args())
            })
            .init();

        info!("Initializing {LAYER_NAME}");
        if let Some(err) = startup_err {
            warn!("{err}");
        }
    });
}

fn version_parts(v: xr::Version) -> (u16, u16, u32) {
    (v.major(), v.minor(), v.patch())
}

/// Entry point for the loader: validates the negotiation request and
/// publishes our resolver and create-instance trampoline.
///
/// # Safety
///
/// `loader_info` and `api_layer_request` must point to the loader's
/// negotiation structures; `api_layer_name`, when non-null, must be a valid
/// C string.
#[no_mangle]
pub unsafe extern "system" fn xrNegotiateLoaderApiLayerInterface(
    loader_info: *const NegotiateLoaderInfo,
    api_layer_name: *const c_char,
    api_layer_request: *mut NegotiateApiLayerRequest,
) -> xr::Result {
    init_logging();

    if !api_layer_name.is_null()
        && unsafe { CStr::from_ptr(api_layer_name) }.to_bytes() != LAYER_NAME.as_bytes()
    {
        warn!("Invalid apiLayerName");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    }

    let (Some(loader_info), Some(request)) = (
        unsafe { loader_info.as_ref() },
        unsafe { api_layer_request.as_mut() },
    ) else {
        warn!("xrNegotiateLoaderApiLayerInterface validation failed");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    };

    if loader_info.struct_type != loader::LoaderInterfaceStructs::LOADER_INFO
        || loader_info.struct_version != LOADER_INFO_STRUCT_VERSION
        || loader_info.struct_size != std::mem::size_of::<NegotiateLoaderInfo>()
        || request.struct_type != loader::LoaderInterfaceStructs::API_LAYER_REQUEST
        || request.struct_version != API_LAYER_INFO_STRUCT_VERSION
        || request.struct_size != std::mem::size_of::<NegotiateApiLayerRequest>()
        || loader_info.min_interface_version > CURRENT_LOADER_API_LAYER_VERSION
        || loader_info.max_interface_version < CURRENT_LOADER_API_LAYER_VERSION
        || loader_info.max_interface_version > CURRENT_LOADER_API_LAYER_VERSION
        || version_parts(loader_info.max_api_version) < version_parts(xr::CURRENT_API_VERSION)
        || version_parts(loader_info.min_api_version) > version_parts(xr::CURRENT_API_VERSION)
    {
        warn!("xrNegotiateLoaderApiLayerInterface validation failed");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    }

    request.layer_interface_version = CURRENT_LOADER_API_LAYER_VERSION;
    request.layer_api_version = xr::CURRENT_API_VERSION;
    request.get_instance_proc_addr =
        Some(dispatch::get_instance_proc_addr as xr::pfn::GetInstanceProcAddr);
    request.create_api_layer_instance =
        Some(dispatch::create_api_layer_instance as loader::CreateApiLayerInstance);

    info!("{LAYER_NAME} layer is active");

    xr::Result::SUCCESS
}
