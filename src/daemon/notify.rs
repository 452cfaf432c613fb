// src/daemon/notify.rs

//! User-facing notifications
//!
//! Two channels: a short native banner (behind the `Notifier` trait so host
//! builds and tests can swap in a logger) and a pipe-delimited toast file
//! `{title_id}|{title_name}|{message}` consumed by an external presentation
//! layer. The toast file holds only the most recent event; the journals are
//! the durable record.

use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Banner notification delivery
pub trait Notifier {
    fn banner(&self, message: &str);
}

/// Notifier for host builds: banners go to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn banner(&self, message: &str) {
        info!(target: "banner", "{message}");
    }
}

/// Write the toast side-channel file, replacing any previous line
pub fn write_toast(path: &Path, title_id: &str, title_name: &str, message: &str) -> io::Result<()> {
    fs::write(path, format!("{title_id}|{title_name}|{message}"))
}

#[cfg(feature = "platform")]
mod platform {
    //! Native banner delivery through the kernel notification request

    use super::Notifier;

    const MESSAGE_CAPACITY: usize = 3075;

    #[repr(C)]
    struct NotifyRequest {
        unused: [u8; 45],
        message: [u8; MESSAGE_CAPACITY],
    }

    extern "C" {
        fn sceKernelSendNotificationRequest(
            device: i32,
            request: *mut NotifyRequest,
            size: usize,
            blocking: i32,
        ) -> i32;
    }

    pub struct PlatformNotifier;

    impl Notifier for PlatformNotifier {
        fn banner(&self, message: &str) {
            let mut request = NotifyRequest {
                unused: [0; 45],
                message: [0; MESSAGE_CAPACITY],
            };
            let bytes = message.as_bytes();
            let len = bytes.len().min(MESSAGE_CAPACITY - 1);
            request.message[..len].copy_from_slice(&bytes[..len]);
            unsafe {
                sceKernelSendNotificationRequest(
                    0,
                    &mut request,
                    std::mem::size_of::<NotifyRequest>(),
                    0,
                );
            }
        }
    }
}

#[cfg(feature = "platform")]
pub use platform::PlatformNotifier;
