//! Logging macros that forward to `defmt` or `log`, or compile to nothing.
#![allow(unused_macros)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("You may not enable both `defmt` and `log` features.");

/// Expands a logging macro for the selected backend.
macro_rules! forward_log {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log")))]
            let _ = ($( & $x ),*);
        }
    };
}

/// Log at trace level.
macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        forward_log!(trace, $s $(, $x)*)
    };
}

/// Log at debug level.
macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        forward_log!(debug, $s $(, $x)*)
    };
}

/// Log at info level.
macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        forward_log!(info, $s $(, $x)*)
    };
}

/// Log at warning level.
macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        forward_log!(warn, $s $(, $x)*)
    };
}

/// Log at error level.
macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        forward_log!(error, $s $(, $x)*)
    };
}
