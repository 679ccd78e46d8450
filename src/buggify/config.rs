//! Fault probability configuration

use super::faults::ALL_FAULTS;
use std::collections::HashMap;

/// Per-fault probabilities plus a global switch
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub enabled: bool,
    probabilities: HashMap<String, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultConfig {
    /// Enabled, no per-fault probabilities (only explicit overrides fire)
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            probabilities: HashMap::new(),
        }
    }

    /// Nothing ever fires
    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            probabilities: HashMap::new(),
        }
    }

    /// Default probabilities from `ALL_FAULTS`
    pub fn moderate() -> Self {
        let mut config = Self::new();
        for (id, prob) in ALL_FAULTS {
            config.set(id, *prob);
        }
        config
    }

    pub fn set(&mut self, fault_id: &str, probability: f64) {
        self.probabilities
            .insert(fault_id.to_string(), probability.clamp(0.0, 1.0));
    }

    /// Probability for a fault, 0.0 when unknown or disabled
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.probabilities.get(fault_id).copied().unwrap_or(0.0)
    }
}
