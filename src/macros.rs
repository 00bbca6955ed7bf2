//! Macros to ease conditional code based on enabled features.

// Depending on the features not all macros are used.
#![allow(unused_macros)]

/// The `os-poll` feature is enabled.
macro_rules! cfg_os_poll {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "os-poll")]
            #[cfg_attr(docsrs, doc(cfg(feature = "os-poll")))]
            $item
        )*
    }
}

/// The `os-ext` feature is enabled. Gates the daemonizer and PID file helper,
/// which only make sense on Unix.
macro_rules! cfg_os_ext {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "os-ext")]
            #[cfg_attr(docsrs, doc(cfg(feature = "os-ext")))]
            $item
        )*
    }
}

/// The `os-poll` feature is enabled and the target supports epoll.
///
/// `--cfg runtime_unsupported_force_poll_poll` forces the generic `poll(2)`
/// backend even on Linux/Android, the same escape hatch mio's own
/// `mio_unsupported_force_poll_poll` gives its CI for exercising the
/// poll(2) fallback on a platform that would otherwise always pick epoll.
macro_rules! cfg_epoll_selector {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                feature = "os-poll",
                not(runtime_unsupported_force_poll_poll),
                any(target_os = "android", target_os = "linux"),
            ))]
            $item
        )*
    };
}

/// The `os-poll` feature is enabled and the target is a generic poll(2)-only
/// Unix (anything that isn't Linux/Android, or Linux/Android with
/// `--cfg runtime_unsupported_force_poll_poll` set).
macro_rules! cfg_poll_selector {
    ($($item:item)*) => {
        $(
            #[cfg(all(
                unix,
                feature = "os-poll",
                any(
                    runtime_unsupported_force_poll_poll,
                    not(any(target_os = "android", target_os = "linux")),
                ),
            ))]
            $item
        )*
    };
}

/// Internal diagnostic breadcrumbs, gated behind the optional `log` feature.
/// Kept separate from the [`crate::log`] subsystem this crate hands to its
/// own callers: these macros are for people debugging this crate itself.
// `::log::...` (leading `::`) is used throughout rather than `log::...` so
// these resolve to the extern crate unambiguously; this crate also has a
// `log` module (the asynchronous logger handed to callers) and an
// unqualified path would be ambiguous between the two.
macro_rules! log_error {
    ($($arg:tt)*) => { #[cfg(feature = "log")] ::log::error!($($arg)*); };
}
macro_rules! log_warn {
    ($($arg:tt)*) => { #[cfg(feature = "log")] ::log::warn!($($arg)*); };
}
macro_rules! log_info {
    ($($arg:tt)*) => { #[cfg(feature = "log")] ::log::info!($($arg)*); };
}
macro_rules! log_debug {
    ($($arg:tt)*) => { #[cfg(feature = "log")] ::log::debug!($($arg)*); };
}
macro_rules! log_trace {
    ($($arg:tt)*) => { #[cfg(feature = "log")] ::log::trace!($($arg)*); };
}

/// Defines a small bitflags-style newtype without pulling in the `bitflags`
/// crate for the handful of single-bit flag sets this crate needs.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn from_bits(bits: $repr) -> $name {
                $name(bits)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}
