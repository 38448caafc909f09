/// Macro for prefixed progress logging.
///
/// Expands to a `tracing` info event carrying the prefix as its `scope`
/// field, so progress lines share the subscriber configured by
/// `logging::init`.
///
/// Usage:
/// ```ignore
/// log_status!("provision", "Writing vhost for {}", domain);
/// log_status!("service", "Reloaded {}", name);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        ::tracing::info!(scope = $prefix, "{}", format_args!($($arg)*))
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `skydock::service` instead of `skydock::core::service`
pub use core::*;
pub use utils::*;
