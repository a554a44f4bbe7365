//! Control-mode selection.
//!
//! The mode is a 4-tuple fixed for the process lifetime: command interface,
//! task, control space and trajectory kind. It is validated once at
//! construction from the configuration strings; any unrecognized value aborts
//! initialization before the first control cycle. There are no runtime mode
//! transitions, so each cycle dispatches through one exhaustive match.

use std::str::FromStr;

use crate::config_error::ConfigError;

/// Which command the controller emits every cycle: joint velocities or
/// joint efforts (torques).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandInterface {
    Velocity,
    Effort,
}

impl FromStr for CommandInterface {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "velocity" => Ok(CommandInterface::Velocity),
            "effort" => Ok(CommandInterface::Effort),
            other => Err(ConfigError::UnknownCommandInterface(other.to_string())),
        }
    }
}

/// What the controller is trying to achieve: reach a Cartesian pose, or keep
/// a detected target on the camera's optical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Positioning,
    LookAtPoint,
}

impl FromStr for Task {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positioning" => Ok(Task::Positioning),
            "look_at_point" => Ok(Task::LookAtPoint),
            other => Err(ConfigError::UnknownTask(other.to_string())),
        }
    }
}

/// Space in which the effort controller closes the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSpace {
    Joint,
    Operational,
}

impl FromStr for ControlSpace {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jnt" => Ok(ControlSpace::Joint),
            "op" => Ok(ControlSpace::Operational),
            other => Err(ConfigError::UnknownControlSpace(other.to_string())),
        }
    }
}

/// Profile of the (optional) Cartesian trajectory. The planners themselves
/// are external; the kind is validated and carried so that configurations
/// naming one remain accepted. `None` is the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryKind {
    None,
    LinearPolynomial,
    LinearTrapezoidal,
    CircularPolynomial,
    CircularTrapezoidal,
}

impl FromStr for TrajectoryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TrajectoryKind::None),
            "lin_pol" => Ok(TrajectoryKind::LinearPolynomial),
            "lin_trap" => Ok(TrajectoryKind::LinearTrapezoidal),
            "cir_pol" => Ok(TrajectoryKind::CircularPolynomial),
            "cir_trap" => Ok(TrajectoryKind::CircularTrapezoidal),
            other => Err(ConfigError::UnknownTrajectoryKind(other.to_string())),
        }
    }
}

/// The validated mode tuple. Every combination of legal member values is a
/// legal mode; rejection happens per member, at construction only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMode {
    pub interface: CommandInterface,
    pub task: Task,
    pub space: ControlSpace,
    pub trajectory: TrajectoryKind,
}

impl ControlMode {
    /// Validates the four configuration strings. The first offending value is
    /// reported; the caller is expected to treat any error as fatal.
    pub fn new(
        interface: &str,
        task: &str,
        space: &str,
        trajectory: &str,
    ) -> Result<Self, ConfigError> {
        Ok(ControlMode {
            interface: interface.parse()?,
            task: task.parse()?,
            space: space.parse()?,
            trajectory: trajectory.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACES: [&str; 2] = ["velocity", "effort"];
    const TASKS: [&str; 2] = ["positioning", "look_at_point"];
    const SPACES: [&str; 2] = ["jnt", "op"];
    const TRAJECTORIES: [&str; 5] = ["none", "lin_pol", "lin_trap", "cir_pol", "cir_trap"];

    #[test]
    fn all_enumerated_tuples_accepted() {
        let mut accepted = 0;
        for interface in INTERFACES {
            for task in TASKS {
                for space in SPACES {
                    for trajectory in TRAJECTORIES {
                        let mode = ControlMode::new(interface, task, space, trajectory);
                        assert!(mode.is_ok(), "{interface}/{task}/{space}/{trajectory} rejected");
                        accepted += 1;
                    }
                }
            }
        }
        assert_eq!(accepted, 40);
    }

    #[test]
    fn unknown_members_rejected() {
        assert!(matches!(
            ControlMode::new("position", "positioning", "jnt", "none"),
            Err(ConfigError::UnknownCommandInterface(_))
        ));
        assert!(matches!(
            ControlMode::new("velocity", "invalid", "jnt", "none"),
            Err(ConfigError::UnknownTask(_))
        ));
        assert!(matches!(
            ControlMode::new("velocity", "positioning", "cartesian", "none"),
            Err(ConfigError::UnknownControlSpace(_))
        ));
        assert!(matches!(
            ControlMode::new("velocity", "positioning", "jnt", "spline"),
            Err(ConfigError::UnknownTrajectoryKind(_))
        ));
    }

    #[test]
    fn empty_strings_rejected() {
        assert!(ControlMode::new("", "positioning", "jnt", "none").is_err());
        assert!(ControlMode::new("velocity", "", "jnt", "none").is_err());
    }

    #[test]
    fn case_sensitive_matching() {
        assert!(ControlMode::new("Velocity", "positioning", "jnt", "none").is_err());
    }
}
