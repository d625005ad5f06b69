//! Built-in native functions, exposed to Ember source as ordinary global
//! callables. The only one in scope here is `clock`.

use ember_core::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in seconds, as a number. Never
/// blocks; takes no arguments.
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock is before the Unix epoch".to_string())?;
    Ok(Value::number(now.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_returns_a_nonnegative_number() {
        let v = clock(&[]).unwrap();
        assert!(v.is_number());
        assert!(v.as_number() > 0.0);
    }
}
