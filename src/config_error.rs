//! Error handling for controller configuration and frame lookups

use std::time::Duration;

/// Unified error to report failures during controller construction.
/// Any of these is fatal: the control loop never starts on a bad configuration.
#[derive(Debug)]
pub enum ConfigError {
    UnknownCommandInterface(String),
    UnknownTask(String),
    UnknownControlSpace(String),
    UnknownTrajectoryKind(String),
    ZeroJointCount,
    StartupTimeout { waited: Duration },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ConfigError::UnknownCommandInterface(ref value) =>
                write!(f, "Unknown command interface: '{}' (expected 'velocity' or 'effort')", value),
            ConfigError::UnknownTask(ref value) =>
                write!(f, "Unknown task: '{}' (expected 'positioning' or 'look_at_point')", value),
            ConfigError::UnknownControlSpace(ref value) =>
                write!(f, "Unknown control space: '{}' (expected 'jnt' or 'op')", value),
            ConfigError::UnknownTrajectoryKind(ref value) =>
                write!(f, "Unknown trajectory kind: '{}' (expected 'none', 'lin_pol', 'lin_trap', 'cir_pol' or 'cir_trap')", value),
            ConfigError::ZeroJointCount =>
                write!(f, "The robot model reports zero joints"),
            ConfigError::StartupTimeout { waited } =>
                write!(f, "No joint state sample arrived within {:?}", waited),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure of a named-frame transform lookup. Non-fatal by contract:
/// the caller keeps the previously resolved pose for the current cycle.
#[derive(Debug)]
pub struct PoseLookupError {
    pub base_frame: String,
    pub target_frame: String,
    pub reason: String,
}

impl std::fmt::Display for PoseLookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Could not resolve transform {} -> {}: {}",
            self.base_frame, self.target_frame, self.reason
        )
    }
}

impl std::error::Error for PoseLookupError {}
