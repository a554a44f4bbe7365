//! Real-time control core of a robotic-manipulator controller: converts a
//! Cartesian or visual target into per-cycle joint velocity or effort
//! commands.
//!
//! The crate covers the three algorithms that run inside the fixed-period
//! control callback: the mode/task selection, a resolved-rate differential
//! inverse-kinematics solver with pose-error feedback, and an image-based
//! visual-servoing engine that keeps a detected target on the camera's
//! optical axis, with null-space redundancy resolution. The kinematic model,
//! the transform lookup service and the joint-space inverse-dynamics
//! controller are external collaborators behind the traits in
//! [`robot_traits`]; the core borrows them per call and owns none of them.
//!
//! # Features
//!
//! - One bounded-size numeric command per cycle, regardless of transient
//!   sensing failures: failed transform lookups fall back to the last
//!   successfully resolved pose.
//! - Damped least-squares pseudoinverse keeps the solve bounded near
//!   singularities (no saturation to actuator limits, by contract).
//! - The mode 4-tuple (command interface, task, control space, trajectory
//!   kind) is validated once at construction; an invalid value is fatal
//!   before the first cycle runs.
//! - The whole core is a pure function of its inputs plus an explicit
//!   mutable state struct, so it is unit-testable without any runtime
//!   harness.
//!
//! # Example
//!
//! See `main.rs` for a complete simulated run: a planar robot model, a
//! scripted pose provider and a PD joint-space controller wired into the
//! loop for both tasks and both command interfaces.

pub mod config_error;
pub mod robot_traits;

pub mod mode;

pub mod pose_error;
pub mod diff_ik;
pub mod visual_servoing;

pub mod cycle;
