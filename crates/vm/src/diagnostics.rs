//! SIGQUIT diagnostics dump, in the spirit of a JVM thread dump: send the
//! process `SIGQUIT` and it prints a snapshot of VM bookkeeping to stderr
//! without stopping execution. Unix-only; a no-op everywhere else (the
//! signal itself doesn't exist, so there's nothing to wait for).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct DiagnosticsFlag(Arc<AtomicBool>);

impl DiagnosticsFlag {
    #[cfg(all(unix, feature = "diagnostics"))]
    pub fn install() -> DiagnosticsFlag {
        let flag = Arc::new(AtomicBool::new(false));
        if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGQUIT, Arc::clone(&flag)) {
            tracing::warn!(error = %err, "failed to install SIGQUIT diagnostics handler");
        }
        DiagnosticsFlag(flag)
    }

    #[cfg(not(all(unix, feature = "diagnostics")))]
    pub fn install() -> DiagnosticsFlag {
        DiagnosticsFlag(Arc::new(AtomicBool::new(false)))
    }

    /// Returns whether a dump was requested since the last call, clearing
    /// the flag. Cheap enough to poll once per dispatch loop iteration.
    pub fn take_requested(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

pub struct DiagnosticsSnapshot {
    pub bytes_allocated: usize,
    pub value_stack_depth: usize,
    pub call_frame_depth: usize,
}

pub fn dump(snapshot: &DiagnosticsSnapshot) {
    eprintln!("--- ember diagnostics (SIGQUIT) ---");
    eprintln!("heap bytes allocated : {}", snapshot.bytes_allocated);
    eprintln!("value stack depth    : {}", snapshot.value_stack_depth);
    eprintln!("call frame depth     : {}", snapshot.call_frame_depth);
    eprintln!("-----------------------------------");
}
