/// Trace-level log of a dropped or malformed frame/message. The bus is
/// noisy by assumption (see the core's error handling design) so this is
/// the only place most protocol errors are ever observed.
#[macro_export]
macro_rules! net_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}

/// Debug-level log for state-machine transitions (alias arbitration,
/// reassembly buffer lifecycle) that are too frequent for `info!`.
#[macro_export]
macro_rules! net_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}
