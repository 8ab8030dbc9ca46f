/// Logs at the given level if the call's `debug` flag is set, and at `trace` level otherwise.
macro_rules! rpc_log {
    ($debug:expr, $level:ident, $($arg:tt)+) => {
        if $debug {
            tracing::$level!($($arg)+)
        }
        else {
            tracing::trace!($($arg)+)
        }
    };
}

pub mod call_id;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod pending_calls;
pub mod resolver;
