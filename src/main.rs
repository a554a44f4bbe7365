//! Simulated run of the control core: a planar seven-joint robot, a scripted
//! pose provider and a PD joint-space controller, wired together the same way
//! a real runtime would wire its model, transform buffer and controller.

extern crate nalgebra as na;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
use tracing::info;

use rs_servo_core::config_error::PoseLookupError;
use rs_servo_core::cycle::{wait_for_first_sample, Command, ControlLoop, ControlState, FrameNames, Gains};
use rs_servo_core::diff_ik::{euler_step, numeric_jacobian, resolved_rate};
use rs_servo_core::mode::ControlMode;
use rs_servo_core::pose_error::pose_error_twist;
use rs_servo_core::robot_traits::{
    Jacobian, JointReferences, JointStateSample, JointStateSource, JointSpaceController,
    JointVector, Pose, PoseProvider, RobotModel, Twist,
};

#[derive(Parser, Debug)]
#[command(about = "Resolved-rate / visual-servoing control core, simulated")]
struct Cli {
    /// Command interface: velocity or effort
    #[arg(long, default_value = "velocity")]
    cmd_interface: String,

    /// Task: positioning or look_at_point
    #[arg(long, default_value = "positioning")]
    task: String,

    /// Control space for effort control: jnt or op
    #[arg(long, default_value = "jnt")]
    cont_type: String,

    /// Trajectory kind: none, lin_pol, lin_trap, cir_pol or cir_trap
    #[arg(long, default_value = "none")]
    traj_type: String,

    /// Number of control cycles to simulate
    #[arg(long, default_value_t = 500)]
    cycles: u32,
}

const JOINTS: usize = 7;
const LINK_LENGTH: f64 = 0.2;

/// Planar chain with equal links, every joint rotating about the base Z axis.
/// The Jacobian comes from numeric differentiation of the forward kinematics.
struct PlanarRobot {
    positions: JointVector,
    velocities: JointVector,
    limit_min: JointVector,
    limit_max: JointVector,
}

impl PlanarRobot {
    fn new() -> Self {
        PlanarRobot {
            positions: JointVector::zeros(JOINTS),
            velocities: JointVector::zeros(JOINTS),
            limit_min: JointVector::from_element(JOINTS, f64::NEG_INFINITY),
            limit_max: JointVector::from_element(JOINTS, f64::INFINITY),
        }
    }

    fn forward(qs: &JointVector) -> Pose {
        let mut angle = 0.0;
        let mut x = 0.0;
        let mut y = 0.0;
        for i in 0..qs.len() {
            angle += qs[i];
            x += angle.cos() * LINK_LENGTH;
            y += angle.sin() * LINK_LENGTH;
        }
        Isometry3::from_parts(
            Translation3::new(x, y, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
        )
    }
}

impl RobotModel for PlanarRobot {
    fn update(&mut self, positions: &JointVector, velocities: &JointVector) {
        // The model itself respects its configured limits; the control core
        // deliberately does not enforce them.
        for i in 0..positions.len() {
            self.positions[i] = positions[i].clamp(self.limit_min[i], self.limit_max[i]);
        }
        self.velocities.copy_from(velocities);
    }

    fn end_effector_pose(&self) -> Pose {
        Self::forward(&self.positions)
    }

    fn end_effector_jacobian(&self) -> Jacobian {
        numeric_jacobian(Self::forward, &self.positions, 1e-7)
    }

    fn gravity_torques(&self) -> JointVector {
        // The chain moves in a horizontal plane.
        JointVector::zeros(JOINTS)
    }

    fn inverse_kinematics(&self, _target: &Pose) -> Result<JointVector, &'static str> {
        // Good enough for regulation references in this demo.
        Ok(self.positions.clone())
    }

    fn joint_positions(&self) -> JointVector {
        self.positions.clone()
    }

    fn joint_velocities(&self) -> JointVector {
        self.velocities.clone()
    }

    fn joint_count(&self) -> usize {
        JOINTS
    }

    fn set_joint_limits(&mut self, min: &JointVector, max: &JointVector) {
        self.limit_min.copy_from(min);
        self.limit_max.copy_from(max);
    }
}

/// Scripted transform buffer: knows where the target marker is in the world
/// and where the camera currently is, and fails every so often to exercise
/// the stale-pose fallback.
struct ScriptedPoseProvider {
    target_in_world: Pose,
    camera_in_world: Pose,
    fail_every: u32,
    lookups: u32,
}

impl PoseProvider for ScriptedPoseProvider {
    fn lookup(
        &mut self,
        base_frame: &str,
        target_frame: &str,
        _timeout: Duration,
    ) -> Result<Pose, PoseLookupError> {
        self.lookups += 1;
        if self.fail_every > 0 && self.lookups % self.fail_every == 0 {
            return Err(PoseLookupError {
                base_frame: base_frame.to_string(),
                target_frame: target_frame.to_string(),
                reason: "simulated dropout".to_string(),
            });
        }
        if base_frame == "camera_optical_frame" {
            Ok(self.camera_in_world.inverse() * self.target_in_world)
        } else {
            Ok(self.target_in_world)
        }
    }
}

/// PD stand-in for the external inverse-dynamics/CLIK controller. A real
/// deployment plugs a dynamics-aware implementation in behind the same trait.
struct PdJointSpaceController;

impl JointSpaceController for PdJointSpaceController {
    fn inverse_dynamics(
        &self,
        robot: &dyn RobotModel,
        desired_positions: &JointVector,
        desired_velocities: &JointVector,
        desired_accelerations: &JointVector,
        kp: f64,
        kd: f64,
    ) -> JointVector {
        let position_error = desired_positions - robot.joint_positions();
        let velocity_error = desired_velocities - robot.joint_velocities();
        position_error * kp + velocity_error * kd + desired_accelerations
    }

    fn inverse_dynamics_operational(
        &self,
        robot: &dyn RobotModel,
        desired_pose: &Pose,
        _desired_velocity: &Twist,
        _desired_acceleration: &Twist,
        kp: f64,
        _kd: f64,
        lambda: f64,
    ) -> JointVector {
        let twist = pose_error_twist(desired_pose, &robot.end_effector_pose(), kp, kp);
        resolved_rate(&robot.end_effector_jacobian(), &twist, lambda)
            .unwrap_or_else(|_| JointVector::zeros(robot.joint_count()))
    }

    fn closed_loop_ik(
        &self,
        robot: &dyn RobotModel,
        desired_pose: &Pose,
        _desired_velocity: &Twist,
        _desired_acceleration: &Twist,
        kp: f64,
        _kd: f64,
        references: &mut JointReferences,
        dt: f64,
        lambda: f64,
    ) {
        let twist = pose_error_twist(desired_pose, &robot.end_effector_pose(), kp, kp);
        if let Ok(velocity) = resolved_rate(&robot.end_effector_jacobian(), &twist, lambda) {
            references.position = euler_step(&references.position, &velocity, dt);
            references.velocity = velocity;
            references.acceleration.fill(0.0);
        }
    }
}

/// Sensor source that delivers a single initial sample, as if the first
/// joint-state message had just arrived.
struct InitialSampleSource {
    sample: Option<JointStateSample>,
}

impl JointStateSource for InitialSampleSource {
    fn latest(&mut self) -> Option<JointStateSample> {
        self.sample.take()
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Invalid mode strings abort here, before any control cycle runs.
    let mode = ControlMode::new(&cli.cmd_interface, &cli.task, &cli.cont_type, &cli.traj_type)
        .context("Invalid controller configuration")?;
    info!("Mode: {:?}", mode);

    let period = Duration::from_millis(10);
    let mut robot = PlanarRobot::new();

    // Alternating limits as on the 7-axis arm this controller was tuned for.
    let limit = JointVector::from_fn(JOINTS, |i, _| if i % 2 == 0 { 2.96 } else { 2.09 });
    robot.set_joint_limits(&(-limit.clone()), &limit);

    let mut source = InitialSampleSource {
        sample: Some(JointStateSample {
            positions: JointVector::from_fn(JOINTS, |i, _| 0.1 + 0.05 * i as f64),
            velocities: JointVector::zeros(JOINTS),
            efforts: JointVector::zeros(JOINTS),
        }),
    };
    let first = wait_for_first_sample(&mut source, period, Duration::from_secs(5))?;
    robot.update(&first.positions, &first.velocities);

    // Tool-to-camera transform: camera looks along the tool X axis.
    let tool_to_camera = Isometry3::from_parts(
        Translation3::new(0.05, 0.0, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
    );

    let initial_pose = robot.end_effector_pose();
    let target_in_world = initial_pose
        * Isometry3::from_parts(Translation3::new(0.1, -0.1, 0.0), UnitQuaternion::identity());
    let mut provider = ScriptedPoseProvider {
        target_in_world,
        camera_in_world: initial_pose * tool_to_camera,
        fail_every: 50,
        lookups: 0,
    };

    let control = ControlLoop::new(
        mode,
        Gains::default(),
        FrameNames::default(),
        tool_to_camera,
        period,
    );
    let mut state = ControlState::new(&first, initial_pose);

    let controller = PdJointSpaceController;
    for cycle in 0..cli.cycles {
        provider.camera_in_world = robot.end_effector_pose() * tool_to_camera;
        let command: Command =
            control.control_step(&mut state, &mut robot, &mut provider, &controller)?;

        if cycle % 50 == 0 {
            let error = (target_in_world.translation.vector
                - robot.end_effector_pose().translation.vector)
                .norm();
            info!(
                "cycle {:4}: |command| = {:.4}, position error = {:.4} m",
                cycle,
                command.values().norm(),
                error
            );
        }
    }

    match mode.task {
        rs_servo_core::mode::Task::Positioning => {
            let final_error = (target_in_world.translation.vector
                - robot.end_effector_pose().translation.vector)
                .norm();
            info!(
                "Finished after {} cycles, final position error {:.4} m",
                cli.cycles, final_error
            );
        }
        rs_servo_core::mode::Task::LookAtPoint => {
            let camera = robot.end_effector_pose() * tool_to_camera;
            let bearing = (camera.inverse() * target_in_world).translation.vector.normalize();
            info!(
                "Finished after {} cycles, final bearing ({:.3}, {:.3}, {:.3})",
                cli.cycles, bearing.x, bearing.y, bearing.z
            );
        }
    }
    Ok(())
}
