//! Fleet construction from configuration.
//!
//! Every enabled `[[units]]` entry becomes one simulated unit. Units of
//! kind `xy_stepper` naming the same `controller` share one
//! [`SimController`]; every other unit gets a private controller.

use crate::drivers::simulation::{SimController, create_unit};
use crate::error::EngineError;
use crate::registry::HardwareRegistry;
use crate::safety::EmergencyStop;
use stacker_common::config::{BackendConfig, UnitConfig, UnitKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Build the hardware registry described by `config`.
///
/// Falls back to [`default_units`] when the configuration lists no units.
///
/// # Errors
/// Returns `EngineError::DuplicateUnit` if two entries share an axis letter.
pub fn build_fleet(
    config: &BackendConfig,
    safety: &EmergencyStop,
) -> Result<HardwareRegistry, EngineError> {
    let units: Vec<UnitConfig> = if config.units.is_empty() {
        info!("No units configured, using the default simulated fleet");
        default_units()
    } else {
        config.enabled_units().cloned().collect()
    };

    let mut controllers: HashMap<String, Arc<SimController>> = HashMap::new();
    let mut registry = HardwareRegistry::new(safety.clone());

    for unit in &units {
        let name = match (&unit.kind, &unit.controller) {
            (UnitKind::XyStepper, Some(name)) => name.clone(),
            _ => format!("unit_{}", unit.id),
        };
        let controller = controllers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(SimController::new(name)))
            .clone();

        registry.register(create_unit(
            unit,
            controller,
            config.engine.check_interval,
            safety,
        ))?;
    }

    info!(
        "Built fleet of {} unit(s) on {} controller(s)",
        registry.len(),
        controllers.len()
    );
    Ok(registry)
}

/// Default simulated fleet: focus stages X/Y/Z, XY base H/J, heated bed L.
pub fn default_units() -> Vec<UnitConfig> {
    let mut units = vec![
        UnitConfig::new('X', UnitKind::Linear),
        UnitConfig::new('Y', UnitKind::Linear),
        UnitConfig::new('Z', UnitKind::Linear),
        UnitConfig::new('H', UnitKind::XyStepper),
        UnitConfig::new('J', UnitKind::XyStepper),
        UnitConfig::new('L', UnitKind::HeatedBed),
    ];
    for unit in &mut units {
        if unit.kind == UnitKind::XyStepper {
            unit.controller = Some("base".to_string());
        }
    }
    units
}
