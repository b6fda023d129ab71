// crates/isobus-rs/src/logging.rs
use alloc::format;
use alloc::string::String;

/// Trait for structs that provide metadata for logging
pub trait LogMetadata {
    fn meta(&self) -> String;
}

/// Identifies a client session in log output by its own and its partner's address.
pub struct SessionContext {
    pub component: &'static str,
    pub local_address: Option<u8>,
    pub partner_address: Option<u8>,
}

impl LogMetadata for SessionContext {
    fn meta(&self) -> String {
        let fmt_addr = |a: Option<u8>| match a {
            Some(a) => format!("{a:#04x}"),
            None => String::from("--"),
        };
        format!(
            "{} {}->{}",
            self.component,
            fmt_addr(self.local_address),
            fmt_addr(self.partner_address)
        )
    }
}

// =============================================
// Logging Macros (namespaced under crate::logging)
// =============================================

macro_rules! ctx_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::logging::LogMetadata::meta(&$ctx);
        ::log::info!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! ctx_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::logging::LogMetadata::meta(&$ctx);
        ::log::warn!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! ctx_error {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::logging::LogMetadata::meta(&$ctx);
        ::log::error!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

macro_rules! ctx_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::logging::LogMetadata::meta(&$ctx);
        ::log::debug!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
}

// Re-export macros for use in other files
pub(crate) use ctx_debug;
pub(crate) use ctx_error;
pub(crate) use ctx_info;
pub(crate) use ctx_warn;
