//! Native functions exposed to every program.
//!
//! Natives follow the host ABI exactly: the VM validates arity, passes the
//! argument slice, and pushes the returned value. They have no access to the
//! heap, so they can only produce non-object values.

use std::sync::OnceLock;
use std::time::Instant;

use crate::object::NativeFn;
use crate::value::Value;

/// Every native the VM registers at startup: `(name, arity, callback)`.
pub(crate) fn all() -> &'static [(&'static str, usize, NativeFn)] {
    &[("clock", 0, clock)]
}

/// Seconds elapsed since the process first asked for the time, as a number.
/// Useful for timing scripts: only differences between readings matter.
fn clock(_args: &[Value]) -> Value {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Value::Number(epoch.elapsed().as_secs_f64())
}
