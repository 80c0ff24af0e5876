//! Logging shim
//!
//! `trace!` through `error!` forward to `log` or `defmt` depending on the
//! enabled feature. With neither enabled they still evaluate their arguments
//! so call sites don't produce unused-variable warnings. Format strings take
//! positional arguments only, since both backends must accept them.

#[cfg(all(feature = "log", feature = "defmt", not(doc)))]
compile_error!("features `log` and `defmt` are mutually exclusive");

#[cfg(all(not(doc), feature = "defmt"))]
#[doc(hidden)]
#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! __cic_log {
    ($level:ident, $s:literal $(, $x:expr)*) => {
        ::defmt::$level!($s $(, $x)*)
    };
}

#[cfg(all(not(doc), feature = "log", not(feature = "defmt")))]
#[doc(hidden)]
#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! __cic_log {
    ($level:ident, $s:literal $(, $x:expr)*) => {
        ::log::$level!($s $(, $x)*)
    };
}

#[cfg(any(doc, not(any(feature = "defmt", feature = "log"))))]
#[doc(hidden)]
#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! __cic_log {
    ($level:ident, $s:literal $(, $x:expr)*) => {{
        let _ = ($( & $x ),*);
    }};
}

/// Logs a trace message
#[macro_export]
macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        $crate::__cic_log!(trace, $s $(, $x)*)
    };
}

/// Logs a debug message
#[macro_export]
macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        $crate::__cic_log!(debug, $s $(, $x)*)
    };
}

/// Logs an info message
#[macro_export]
macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        $crate::__cic_log!(info, $s $(, $x)*)
    };
}

/// Logs a warning
#[macro_export]
macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        $crate::__cic_log!(warn, $s $(, $x)*)
    };
}

/// Logs an error
#[macro_export]
macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        $crate::__cic_log!(error, $s $(, $x)*)
    };
}
