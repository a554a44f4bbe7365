//! Trait seams between the control core and its external collaborators.
//!
//! The control core owns none of them: the robot model, the pose provider and
//! the joint-space controller are borrowed per call, so ownership and lifetime
//! stay explicit at each boundary. Joint-space quantities are dynamically
//! sized because the joint count N is fixed at construction from the robot
//! model, not at compile time.

extern crate nalgebra as na;

use std::time::Duration;

use na::{DMatrix, DVector, Isometry3, Vector6};

use crate::config_error::PoseLookupError;

/// Pose of a rigid body: Cartesian position and rotation quaternion.
/// The unit quaternion keeps the rotation orthonormal under composition.
pub type Pose = Isometry3<f64>;

/// Fixed-length ordered sequence of N joint values. Sized once from the
/// robot model at setup and only overwritten afterwards, never resized.
pub type JointVector = DVector<f64>;

/// 6xN matrix mapping joint velocities to the end-effector twist.
/// Recomputed by the robot model each cycle from its current state.
pub type Jacobian = DMatrix<f64>;

/// Linear (first three components) and angular velocity of a rigid body.
/// The frame it is expressed in is documented at each point of use; mixing
/// frames without an explicit transformation is an invariant violation.
pub type Twist = Vector6<f64>;

/// One joint-state reading delivered by the sensor side.
#[derive(Debug, Clone)]
pub struct JointStateSample {
    pub positions: JointVector,
    pub velocities: JointVector,
    pub efforts: JointVector,
}

/// Joint-space references integrated across cycles for effort control.
/// Mutated in place by [`JointSpaceController::closed_loop_ik`].
#[derive(Debug, Clone)]
pub struct JointReferences {
    pub position: JointVector,
    pub velocity: JointVector,
    pub acceleration: JointVector,
}

impl JointReferences {
    pub fn zeroed(joint_count: usize) -> Self {
        JointReferences {
            position: JointVector::zeros(joint_count),
            velocity: JointVector::zeros(joint_count),
            acceleration: JointVector::zeros(joint_count),
        }
    }
}

/// Kinematic/dynamic model of the manipulator. The `update` call advances the
/// internal state used by all subsequent reads, which is how the control loop
/// performs its predictive (dead-reckoning) state synchronization.
pub trait RobotModel {
    fn update(&mut self, positions: &JointVector, velocities: &JointVector);
    fn end_effector_pose(&self) -> Pose;
    fn end_effector_jacobian(&self) -> Jacobian;
    fn gravity_torques(&self) -> JointVector;

    /// May be approximate or iterative; the failure policy is the adapter's.
    fn inverse_kinematics(&self, target: &Pose) -> Result<JointVector, &'static str>;

    fn joint_positions(&self) -> JointVector;
    fn joint_velocities(&self) -> JointVector;
    fn joint_count(&self) -> usize;
    fn set_joint_limits(&mut self, min: &JointVector, max: &JointVector);
}

/// Resolves a named-frame-to-named-frame transform. The wait is bounded by
/// `timeout` (at most one control period) and the call may fail; on failure
/// the caller must retain the previously cached pose.
pub trait PoseProvider {
    fn lookup(
        &mut self,
        base_frame: &str,
        target_frame: &str,
        timeout: Duration,
    ) -> Result<Pose, PoseLookupError>;
}

/// Joint-space inverse-dynamics / CLIK controller converting references into
/// torques. Gravity compensation is this collaborator's business, so the
/// control loop subtracts the model's gravity torques from its output.
pub trait JointSpaceController {
    /// Inverse dynamics on joint-space references.
    fn inverse_dynamics(
        &self,
        robot: &dyn RobotModel,
        desired_positions: &JointVector,
        desired_velocities: &JointVector,
        desired_accelerations: &JointVector,
        kp: f64,
        kd: f64,
    ) -> JointVector;

    /// Inverse dynamics directly on an operational-space reference.
    fn inverse_dynamics_operational(
        &self,
        robot: &dyn RobotModel,
        desired_pose: &Pose,
        desired_velocity: &Twist,
        desired_acceleration: &Twist,
        kp: f64,
        kd: f64,
        lambda: f64,
    ) -> JointVector;

    /// Closed-loop inverse kinematics: integrates `references` one step
    /// toward the desired Cartesian trajectory.
    #[allow(clippy::too_many_arguments)]
    fn closed_loop_ik(
        &self,
        robot: &dyn RobotModel,
        desired_pose: &Pose,
        desired_velocity: &Twist,
        desired_acceleration: &Twist,
        kp: f64,
        kd: f64,
        references: &mut JointReferences,
        dt: f64,
        lambda: f64,
    );
}

/// Source of asynchronously arriving joint-state samples. `latest` returns
/// `None` until the first sample has been received.
pub trait JointStateSource {
    fn latest(&mut self) -> Option<JointStateSample>;
}
