// src/install/registry.rs

//! Platform install-registration seam
//!
//! Registration hands (title id, installation base) to the platform's
//! install utility and gets a raw status code back. Status decoding lives
//! with the installer; this module only defines the seam and the status
//! constants every implementation shares.

use std::path::Path;
use tracing::info;

/// Status returned for a title the platform already knows about. Treated as
/// a successful restore, not a failure.
pub const STATUS_ALREADY_REGISTERED: i32 = 0x80990002_u32 as i32;

/// Status for a successful new registration
pub const STATUS_OK: i32 = 0;

/// Registration call into the platform install service
pub trait InstallRegistry {
    /// Register `title_id` with its installation base directory. Returns
    /// the platform status code; anything other than `STATUS_OK` or
    /// `STATUS_ALREADY_REGISTERED` is a rejection.
    fn register(&self, title_id: &str, install_base: &Path) -> i32;
}

/// Registry for host builds without the platform SDK: accepts everything
/// and logs the call
pub struct DryRunRegistry;

impl InstallRegistry for DryRunRegistry {
    fn register(&self, title_id: &str, install_base: &Path) -> i32 {
        info!(
            title_id,
            base = %install_base.display(),
            "dry-run registration accepted"
        );
        STATUS_OK
    }
}

#[cfg(feature = "platform")]
mod platform {
    //! Bindings to the console install utility, only linked on-device

    use super::{InstallRegistry, STATUS_OK};
    use std::ffi::CString;
    use std::path::Path;
    use std::sync::Once;

    extern "C" {
        fn sceAppInstUtilInitialize() -> i32;
        fn sceAppInstUtilAppInstallTitleDir(
            title_id: *const libc_char,
            install_path: *const libc_char,
            reserved: *mut core::ffi::c_void,
        ) -> i32;
    }

    #[allow(non_camel_case_types)]
    type libc_char = core::ffi::c_char;

    static INIT: Once = Once::new();

    /// Registry backed by the platform install utility
    pub struct PlatformRegistry;

    impl PlatformRegistry {
        pub fn new() -> Self {
            INIT.call_once(|| unsafe {
                sceAppInstUtilInitialize();
            });
            Self
        }
    }

    impl Default for PlatformRegistry {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InstallRegistry for PlatformRegistry {
        fn register(&self, title_id: &str, install_base: &Path) -> i32 {
            let Ok(id) = CString::new(title_id) else {
                return -1;
            };
            let Ok(base) = CString::new(install_base.to_string_lossy().as_bytes()) else {
                return -1;
            };
            let status = unsafe {
                sceAppInstUtilAppInstallTitleDir(
                    id.as_ptr(),
                    base.as_ptr(),
                    std::ptr::null_mut(),
                )
            };
            if status == STATUS_OK {
                // The platform needs a beat before the tile is usable
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            status
        }
    }
}

#[cfg(feature = "platform")]
pub use platform::PlatformRegistry;
