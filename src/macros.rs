#[cfg(feature = "log")]
#[macro_use]
mod log_impl {
    macro_rules! hitag_log {
        (trace, $($arg:expr),*) => { log::trace!($($arg),*); };
        (debug, $($arg:expr),*) => { log::debug!($($arg),*); };
        (warn, $($arg:expr),*) => { log::warn!($($arg),*); };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log_impl {
    macro_rules! hitag_log {
        ($level:ident, $($arg:expr),*) => { $( let _ = $arg; )* }
    }
}

macro_rules! hitag_trace {
    ($($arg:expr),*) => (hitag_log!(trace, $($arg),*));
}

macro_rules! hitag_debug {
    ($($arg:expr),*) => (hitag_log!(debug, $($arg),*));
}

macro_rules! hitag_warn {
    ($($arg:expr),*) => (hitag_log!(warn, $($arg),*));
}
