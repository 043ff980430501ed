//! Hardware registry.
//!
//! Owns the registered units in registration order and gates access to them
//! with the Emergency Stop flag. The registry is built once at startup and
//! then shared read-only (`Arc<HardwareRegistry>`) by the dispatcher,
//! every worker and the periodic reporters.
//!
//! # Gating
//!
//! | Operation | Gated by flag |
//! |-----------|---------------|
//! | `connect` / `disconnect` | no |
//! | `stop` / `emergency_stop` / `device_info` | no |
//! | everything else (via [`HardwareRegistry::guarded`]) | yes |

use crate::error::EngineError;
use crate::safety::EmergencyStop;
use stacker_common::hardware::{Capabilities, DeviceInfo, HardwareError, SharedUnit};
use tracing::{debug, error, info, warn};

/// Registered hardware units with flag-gated access.
pub struct HardwareRegistry {
    units: Vec<SharedUnit>,
    safety: EmergencyStop,
}

impl HardwareRegistry {
    /// Create an empty registry bound to the given Emergency Stop flag.
    pub fn new(safety: EmergencyStop) -> Self {
        Self {
            units: Vec::new(),
            safety,
        }
    }

    /// Register a unit.
    ///
    /// # Errors
    /// Returns `EngineError::DuplicateUnit` if the axis letter is taken.
    pub fn register(&mut self, unit: SharedUnit) -> Result<(), EngineError> {
        let id = unit.id();
        if self.get(id).is_some() {
            return Err(EngineError::DuplicateUnit(id));
        }
        debug!("Registered unit {} ({})", id, unit.unit_type());
        self.units.push(unit);
        Ok(())
    }

    /// Unit registered under `id`.
    pub fn get(&self, id: char) -> Option<&SharedUnit> {
        self.units.iter().find(|u| u.id() == id)
    }

    /// Units in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedUnit> {
        self.units.iter()
    }

    /// Units advertising every flag in `caps`.
    pub fn with_capability(&self, caps: Capabilities) -> impl Iterator<Item = &SharedUnit> {
        self.units
            .iter()
            .filter(move |u| u.capabilities().contains(caps))
    }

    pub fn ids(&self) -> Vec<char> {
        self.units.iter().map(|u| u.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn safety(&self) -> &EmergencyStop {
        &self.safety
    }

    /// Run a hardware operation unless the Emergency Stop flag is set.
    pub fn guarded<T>(
        &self,
        op: impl FnOnce() -> Result<T, HardwareError>,
    ) -> Result<T, HardwareError> {
        if self.safety.is_set() {
            return Err(HardwareError::EmergencyStopped);
        }
        op()
    }

    // ─── Fleet operations ───────────────────────────────────────────

    /// Connect every unit. All units are attempted; the first error is returned.
    pub fn connect_all(&self) -> Result<(), HardwareError> {
        let mut first = None;
        for unit in &self.units {
            match unit.connect() {
                Ok(()) => debug!("Unit {} connected", unit.id()),
                Err(e) => {
                    error!("Unit {} failed to connect: {}", unit.id(), e);
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Disconnect every unit. Failures are logged and the first is returned.
    pub fn disconnect_all(&self) -> Result<(), HardwareError> {
        let mut first = None;
        for unit in &self.units {
            if let Err(e) = unit.disconnect() {
                warn!("Unit {} failed to disconnect: {}", unit.id(), e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Command every unit to halt immediately. Never gated.
    pub fn emergency_stop_all(&self) {
        for unit in &self.units {
            if let Err(e) = unit.emergency_stop() {
                error!("Unit {} emergency stop failed: {}", unit.id(), e);
            }
        }
    }

    /// Static description of every unit.
    pub fn device_infos(&self) -> Vec<DeviceInfo> {
        self.units.iter().map(|u| u.device_info()).collect()
    }

    /// Log the registered fleet.
    pub fn log_fleet(&self) {
        info!("Hardware fleet: {} unit(s)", self.units.len());
        for info in self.device_infos() {
            info!(
                "  {} {} [{}] connected={}",
                info.id,
                info.unit_type,
                info.capabilities.join("|"),
                info.connected
            );
        }
    }
}

impl std::fmt::Debug for HardwareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareRegistry")
            .field("units", &self.ids())
            .field("emergency_stop", &self.safety.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacker_common::hardware::HardwareUnit;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Probe {
        id: char,
        caps: Capabilities,
        connected: AtomicBool,
        halts: AtomicUsize,
        fail_connect: bool,
    }

    impl Probe {
        fn new(id: char, caps: Capabilities) -> Arc<Self> {
            Arc::new(Self {
                id,
                caps,
                connected: AtomicBool::new(false),
                halts: AtomicUsize::new(0),
                fail_connect: false,
            })
        }
    }

    impl HardwareUnit for Probe {
        fn id(&self) -> char {
            self.id
        }
        fn unit_type(&self) -> &str {
            "probe"
        }
        fn capabilities(&self) -> Capabilities {
            self.caps
        }
        fn connect(&self) -> Result<(), HardwareError> {
            if self.fail_connect {
                return Err(HardwareError::fatal("no device"));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn disconnect(&self) -> Result<(), HardwareError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn stop(&self) -> Result<(), HardwareError> {
            Ok(())
        }
        fn emergency_stop(&self) -> Result<(), HardwareError> {
            self.halts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = HardwareRegistry::new(EmergencyStop::new());
        registry.register(Probe::new('X', Capabilities::LINEAR)).unwrap();
        let err = registry
            .register(Probe::new('X', Capabilities::LINEAR))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateUnit('X')));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_and_capability_filter() {
        let mut registry = HardwareRegistry::new(EmergencyStop::new());
        registry.register(Probe::new('X', Capabilities::LINEAR)).unwrap();
        registry
            .register(Probe::new('L', Capabilities::ROTARY | Capabilities::TEMPERATURE))
            .unwrap();

        assert!(registry.get('L').is_some());
        assert!(registry.get('Q').is_none());
        assert_eq!(registry.ids(), vec!['X', 'L']);

        let hot: Vec<char> = registry
            .with_capability(Capabilities::TEMPERATURE)
            .map(|u| u.id())
            .collect();
        assert_eq!(hot, vec!['L']);
    }

    #[test]
    fn test_guarded_refuses_when_flag_set() {
        let safety = EmergencyStop::new();
        let registry = HardwareRegistry::new(safety.clone());
        assert_eq!(registry.guarded(|| Ok(1)), Ok(1));

        safety.trigger();
        let mut called = false;
        let result: Result<(), _> = registry.guarded(|| {
            called = true;
            Ok(())
        });
        assert_eq!(result, Err(HardwareError::EmergencyStopped));
        assert!(!called);
    }

    #[test]
    fn test_fleet_operations_ignore_flag() {
        let safety = EmergencyStop::new();
        let mut registry = HardwareRegistry::new(safety.clone());
        let probe = Probe::new('Z', Capabilities::LINEAR);
        registry.register(probe.clone()).unwrap();

        safety.trigger();
        registry.connect_all().unwrap();
        assert!(probe.is_connected());
        registry.emergency_stop_all();
        assert_eq!(probe.halts.load(Ordering::SeqCst), 1);
        registry.disconnect_all().unwrap();
        assert!(!probe.is_connected());
    }

    #[test]
    fn test_connect_all_attempts_every_unit() {
        let mut registry = HardwareRegistry::new(EmergencyStop::new());
        registry
            .register(Arc::new(Probe {
                fail_connect: true,
                ..Arc::into_inner(Probe::new('X', Capabilities::LINEAR)).unwrap()
            }))
            .unwrap();
        let healthy = Probe::new('Y', Capabilities::LINEAR);
        registry.register(healthy.clone()).unwrap();

        assert!(registry.connect_all().is_err());
        assert!(healthy.is_connected());
    }
}
