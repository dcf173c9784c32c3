//! Internal logging macros that wrap `tracing` when the feature is enabled.
//!
//! Every event is emitted under the `log_broadcaster` target. Call sites list structured fields
//! first and end with a message literal; with the `tracing` feature disabled the field expressions
//! are still evaluated (by reference) and nothing is recorded.

#[cfg(feature = "tracing")]
#[allow(unused_macros)]
macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "log_broadcaster", $($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {
        $crate::__trace_consume!($($arg)*)
    };
}

#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => { log_event!(error, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => { log_event!(warn, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => { log_event!(info, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => { log_event!(debug, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => { log_event!(trace, $($arg)*) };
}

#[doc(hidden)]
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! __trace_consume {
    ($field:ident = % $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__trace_consume!($($rest)*); }
    };
    ($field:ident = ? $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__trace_consume!($($rest)*); }
    };
    ($field:ident = $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__trace_consume!($($rest)*); }
    };
    ($lit:literal $($rest:tt)*) => {
        $crate::__trace_consume!($($rest)*)
    };
    () => {};
}
