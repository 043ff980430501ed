//! Emergency Stop flag.
//!
//! One flag per backend process, shared by the intake loop, every worker
//! thread, the periodic reporters and every hardware unit. Reading it never
//! takes a lock. Set by `M112` or by an escalated hardware fault, cleared
//! only by `M999`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Shared handle to the Emergency Stop flag.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct EmergencyStop {
    flag: Arc<AtomicBool>,
}

impl EmergencyStop {
    /// New, cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` if this call changed it.
    pub fn trigger(&self) -> bool {
        let changed = !self.flag.swap(true, Ordering::SeqCst);
        if changed {
            error!("Emergency stop flag set");
        }
        changed
    }

    /// Clear the flag. Returns `true` if this call changed it.
    pub fn clear(&self) -> bool {
        let changed = self.flag.swap(false, Ordering::SeqCst);
        if changed {
            info!("Emergency stop flag cleared");
        }
        changed
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_trigger_and_clear() {
        let stop = EmergencyStop::new();
        assert!(!stop.is_set());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.is_set());
        assert!(stop.clear());
        assert!(!stop.clear());
        assert!(!stop.is_set());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let stop = EmergencyStop::new();
        let other = stop.clone();
        thread::spawn(move || {
            other.trigger();
        })
        .join()
        .unwrap();
        assert!(stop.is_set());
    }
}
