//! The per-cycle control step and its state.
//!
//! One step runs per fixed control period and always produces a fixed-length
//! numeric command, whatever happens to the transform lookups in between. The
//! step borrows all collaborators (robot model, pose provider, joint-space
//! controller); it owns only the mode, the gains and the mutable state it is
//! handed, which keeps the whole core testable without any runtime harness.
//!
//! Execution is single-threaded and cooperative: the sensor side overwrites
//! the joint-state vectors between steps, never concurrently with one. A port
//! to a multi-threaded executor must add synchronization around the shared
//! joint vectors and the cached poses.

extern crate nalgebra as na;

use std::time::Duration;

use na::Vector3;
use tracing::{debug, info};

use crate::config_error::ConfigError;
use crate::diff_ik::{euler_step, resolved_rate};
use crate::mode::{CommandInterface, ControlMode, ControlSpace, Task};
use crate::pose_error::pose_error_twist;
use crate::robot_traits::{
    JointReferences, JointStateSample, JointStateSource, JointSpaceController, JointVector, Pose,
    PoseProvider, RobotModel, Twist,
};
use crate::visual_servoing::LookAtPoint;

/// Names of the coordinate frames resolved through the pose provider.
#[derive(Debug, Clone)]
pub struct FrameNames {
    pub base: String,
    pub target: String,
    pub camera: String,
}

impl Default for FrameNames {
    fn default() -> Self {
        FrameNames {
            base: "world".to_string(),
            target: "aruco_marker_frame".to_string(),
            camera: "camera_optical_frame".to_string(),
        }
    }
}

/// All controller gains, with the defaults the controller was tuned with.
#[derive(Debug, Clone, Copy)]
pub struct Gains {
    /// Proportional gain on the linear pose error (resolved-rate).
    pub k_linear: f64,
    /// Proportional gain on the orientation error (resolved-rate).
    pub k_angular: f64,
    /// Pseudoinverse damping for the resolved-rate solve.
    pub lambda: f64,
    /// Proportional gain of the visual-servoing bearing task.
    pub k_look_at: f64,
    /// CLIK gains and damping.
    pub kp_clik: f64,
    pub kd_clik: f64,
    pub lambda_clik: f64,
    /// Joint-space inverse-dynamics gains.
    pub kp_joint: f64,
    pub kd_joint: f64,
    /// Operational-space inverse-dynamics gains and damping.
    pub kp_operational: f64,
    pub kd_operational: f64,
    pub lambda_operational: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Gains {
            k_linear: 5.0,
            k_angular: 3.0,
            lambda: 0.01,
            k_look_at: 2.0,
            kp_clik: 10.0,
            kd_clik: 4.0,
            lambda_clik: 0.01,
            kp_joint: 12.0,
            kd_joint: 5.0,
            kp_operational: 8.0,
            kd_operational: 5.0,
            lambda_operational: 0.01,
        }
    }
}

/// The command emitted at the end of every cycle: one length-N vector on the
/// single channel fixed at startup by the command interface.
#[derive(Debug, Clone)]
pub enum Command {
    Velocity(JointVector),
    Effort(JointVector),
}

impl Command {
    pub fn interface(&self) -> CommandInterface {
        match self {
            Command::Velocity(_) => CommandInterface::Velocity,
            Command::Effort(_) => CommandInterface::Effort,
        }
    }

    pub fn values(&self) -> &JointVector {
        match self {
            Command::Velocity(values) | Command::Effort(values) => values,
        }
    }
}

/// Mutable per-cycle state: the three live joint vectors, the integrated
/// effort references and the cached poses that persist across failed lookups.
#[derive(Debug, Clone)]
pub struct ControlState {
    pub positions: JointVector,
    pub velocities: JointVector,
    pub efforts: JointVector,
    pub references: JointReferences,
    /// Last successfully resolved base-to-target pose.
    pub target_pose: Pose,
    /// Last successfully resolved target position in the camera optical frame.
    pub target_in_camera: Vector3<f64>,
    pub time: f64,
}

impl ControlState {
    /// Builds the state from the first joint-state sample. The cached target
    /// pose starts at the given initial guess (commonly the end-effector
    /// pose at startup) and the cached bearing starts centered.
    pub fn new(sample: &JointStateSample, initial_target: Pose) -> Self {
        let n = sample.positions.len();
        let mut references = JointReferences::zeroed(n);
        references.position = sample.positions.clone();
        ControlState {
            positions: sample.positions.clone(),
            velocities: sample.velocities.clone(),
            efforts: sample.efforts.clone(),
            references,
            target_pose: initial_target,
            target_in_camera: Vector3::z(),
            time: 0.0,
        }
    }

    /// Overwrites the shared joint vectors with fresh sensor data. Called
    /// from the sensor side between control steps.
    pub fn absorb_sample(&mut self, sample: &JointStateSample) {
        self.positions.copy_from(&sample.positions);
        self.velocities.copy_from(&sample.velocities);
        self.efforts.copy_from(&sample.efforts);
    }
}

/// Blocks until the first joint-state sample arrives, polling with bounded
/// backoff (doubling from 1 ms up to one control period). Gives up after
/// `startup_timeout` so a dead sensor source cannot hang startup forever.
pub fn wait_for_first_sample(
    source: &mut dyn JointStateSource,
    period: Duration,
    startup_timeout: Duration,
) -> Result<JointStateSample, ConfigError> {
    let mut backoff = Duration::from_millis(1);
    let mut waited = Duration::ZERO;
    loop {
        if let Some(sample) = source.latest() {
            return Ok(sample);
        }
        if waited >= startup_timeout {
            return Err(ConfigError::StartupTimeout { waited });
        }
        info!("No joint state received yet, waiting {:?}", backoff);
        std::thread::sleep(backoff);
        waited += backoff;
        backoff = (backoff * 2).min(period);
    }
}

/// The control loop: a validated mode plus everything constant across cycles.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    mode: ControlMode,
    gains: Gains,
    frames: FrameNames,
    /// Constant transform from the tool (end-effector) frame to the camera
    /// optical frame.
    tool_to_camera: Pose,
    period: Duration,
    /// Optional secondary joint-velocity objective, injected through the
    /// null-space projector of the visual task. Off by default.
    secondary_task: Option<JointVector>,
}

impl ControlLoop {
    pub fn new(mode: ControlMode, gains: Gains, frames: FrameNames, tool_to_camera: Pose, period: Duration) -> Self {
        ControlLoop {
            mode,
            gains,
            frames,
            tool_to_camera,
            period,
            secondary_task: None,
        }
    }

    pub fn with_secondary_task(mut self, objective: JointVector) -> Self {
        self.secondary_task = Some(objective);
        self
    }

    pub fn mode(&self) -> &ControlMode {
        &self.mode
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs one control cycle: refreshes the cached poses (keeping stale
    /// values on lookup failure), computes the command for the active mode,
    /// pushes the predicted joint state back into the robot model so the next
    /// cycle's Jacobian and pose reads already reflect this command, and
    /// returns the assembled fixed-length command.
    pub fn control_step(
        &self,
        state: &mut ControlState,
        robot: &mut dyn RobotModel,
        poses: &mut dyn PoseProvider,
        controller: &dyn JointSpaceController,
    ) -> anyhow::Result<Command> {
        let dt = self.period.as_secs_f64();
        state.time += dt;

        let command = match self.mode.task {
            Task::Positioning => self.positioning_step(state, robot, poses, controller, dt)?,
            Task::LookAtPoint => self.look_at_point_step(state, robot, poses, controller, dt)?,
        };

        // Dead-reckoning update: sensor feedback arrives asynchronously and
        // may lag the control period, so the model is advanced with the
        // predicted state instead.
        robot.update(&state.positions, &state.velocities);
        Ok(command)
    }

    fn positioning_step(
        &self,
        state: &mut ControlState,
        robot: &mut dyn RobotModel,
        poses: &mut dyn PoseProvider,
        controller: &dyn JointSpaceController,
        dt: f64,
    ) -> anyhow::Result<Command> {
        match poses.lookup(&self.frames.base, &self.frames.target, self.period) {
            Ok(pose) => state.target_pose = pose,
            Err(error) => debug!("Keeping cached target pose: {}", error),
        }
        let desired = state.target_pose;

        match self.mode.interface {
            CommandInterface::Velocity => {
                let current = robot.end_effector_pose();
                let twist =
                    pose_error_twist(&desired, &current, self.gains.k_linear, self.gains.k_angular);
                let jacobian = robot.end_effector_jacobian();
                let velocities = resolved_rate(&jacobian, &twist, self.gains.lambda)
                    .map_err(anyhow::Error::msg)?;
                state.positions = euler_step(&state.positions, &velocities, dt);
                state.velocities = velocities;
                Ok(Command::Velocity(state.velocities.clone()))
            }
            CommandInterface::Effort => match self.mode.space {
                ControlSpace::Joint => {
                    // Joint-space route: CLIK tracks the desired pose into
                    // the joint references, inverse dynamics turns them into
                    // torques; gravity is the collaborator's business.
                    controller.closed_loop_ik(
                        robot,
                        &desired,
                        &Twist::zeros(),
                        &Twist::zeros(),
                        self.gains.kp_clik,
                        self.gains.kd_clik,
                        &mut state.references,
                        dt,
                        self.gains.lambda_clik,
                    );
                    let torques = controller.inverse_dynamics(
                        robot,
                        &state.references.position,
                        &state.references.velocity,
                        &state.references.acceleration,
                        self.gains.kp_joint,
                        self.gains.kd_joint,
                    );
                    state.efforts = torques - robot.gravity_torques();
                    Ok(Command::Effort(state.efforts.clone()))
                }
                ControlSpace::Operational => {
                    let torques = controller.inverse_dynamics_operational(
                        robot,
                        &desired,
                        &Twist::zeros(),
                        &Twist::zeros(),
                        self.gains.kp_operational,
                        self.gains.kd_operational,
                        self.gains.lambda_operational,
                    );
                    state.efforts = torques - robot.gravity_torques();
                    // Keep the joint reference aligned with the goal pose for
                    // final regulation; a failed solve keeps the previous one.
                    match robot.inverse_kinematics(&desired) {
                        Ok(reference) => state.references.position = reference,
                        Err(error) => debug!("Keeping previous joint reference: {}", error),
                    }
                    Ok(Command::Effort(state.efforts.clone()))
                }
            },
        }
    }

    fn look_at_point_step(
        &self,
        state: &mut ControlState,
        robot: &mut dyn RobotModel,
        poses: &mut dyn PoseProvider,
        controller: &dyn JointSpaceController,
        dt: f64,
    ) -> anyhow::Result<Command> {
        match poses.lookup(&self.frames.camera, &self.frames.target, self.period) {
            Ok(pose) => state.target_in_camera = pose.translation.vector,
            Err(error) => debug!("Keeping cached target bearing: {}", error),
        }

        let camera_pose = robot.end_effector_pose() * self.tool_to_camera;
        let camera_rotation = camera_pose.rotation.to_rotation_matrix();
        let tool_to_camera = self.tool_to_camera.rotation.to_rotation_matrix();
        let jacobian = robot.end_effector_jacobian();

        let law = LookAtPoint {
            gain: self.gains.k_look_at,
            lambda: self.gains.lambda,
        };
        let velocities = law
            .joint_velocity(
                &state.target_in_camera,
                &camera_rotation,
                &tool_to_camera,
                &jacobian,
                self.secondary_task.as_ref(),
            )
            .map_err(anyhow::Error::msg)?;

        match self.mode.interface {
            CommandInterface::Velocity => {
                state.positions = euler_step(&state.positions, &velocities, dt);
                state.velocities = velocities;
                Ok(Command::Velocity(state.velocities.clone()))
            }
            CommandInterface::Effort => {
                // Integrate a joint reference along the visual velocity and
                // hand it to the inverse-dynamics controller with zero
                // reference acceleration.
                state.references.position =
                    euler_step(&state.references.position, &velocities, dt);
                state.references.velocity = velocities;
                state.references.acceleration.fill(0.0);
                let torques = controller.inverse_dynamics(
                    robot,
                    &state.references.position,
                    &state.references.velocity,
                    &state.references.acceleration,
                    self.gains.kp_joint,
                    self.gains.kd_joint,
                );
                state.efforts = torques - robot.gravity_torques();
                Ok(Command::Effort(state.efforts.clone()))
            }
        }
    }
}
