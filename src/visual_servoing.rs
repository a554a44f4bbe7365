//! Image-based visual servoing ("look at point").
//!
//! Drives the camera's optical axis toward a detected target using bearing
//! information only: no full target pose is required. The manipulator
//! redundancy left over by the three-dimensional bearing task is resolved
//! through a null-space projector, so a secondary joint-velocity objective
//! can be injected without disturbing the primary task.

extern crate nalgebra as na;

use na::{DMatrix, Matrix3, Matrix3x6, Matrix6, Rotation3, Vector3};

use crate::diff_ik::damped_pseudoinverse;
use crate::robot_traits::{Jacobian, JointVector};

/// A detected target as seen by the camera: unit bearing vector from the
/// optical center plus the depth recovered from the raw translation.
#[derive(Debug, Clone)]
pub struct VisualFeature {
    /// Unit vector from the camera optical center to the target.
    pub bearing: Vector3<f64>,
    /// Distance to the target, `|cPo|`.
    pub depth: f64,
}

impl VisualFeature {
    /// Extracts depth and bearing from the target position in the camera
    /// optical frame. Fails if the target sits at the optical center, where
    /// the bearing is undefined.
    pub fn from_target(target_in_camera: &Vector3<f64>) -> Result<Self, &'static str> {
        let depth = target_in_camera.norm();
        if depth <= f64::EPSILON {
            return Err("Target at the camera optical center, bearing undefined");
        }
        Ok(VisualFeature {
            bearing: target_in_camera / depth,
            depth,
        })
    }
}

/// Skew-symmetric matrix of `v`, so that `skew(v) * x == v x x` for all x.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Interaction matrix of a unit-bearing feature, 3x6, in the camera frame:
/// `L = [ -(1/depth)(I - s st) | skew(s) ]`.
pub fn interaction_matrix(feature: &VisualFeature) -> Matrix3x6<f64> {
    let s = feature.bearing;
    let left = -(Matrix3::identity() - s * s.transpose()) / feature.depth;
    let mut l = Matrix3x6::zeros();
    l.fixed_view_mut::<3, 3>(0, 0).copy_from(&left);
    l.fixed_view_mut::<3, 3>(0, 3).copy_from(&skew(&s));
    l
}

/// 6x6 block-diagonal matrix rotating a twist between frames:
/// the same rotation applied to the linear and the angular block.
pub fn block_rotation(rotation: &Rotation3<f64>) -> Matrix6<f64> {
    let r = rotation.matrix();
    let mut block = Matrix6::zeros();
    block.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    block.fixed_view_mut::<3, 3>(3, 3).copy_from(r);
    block
}

/// Null-space projector of the task matrix `M` given its pseudoinverse:
/// `N = I - M+ M`. Velocities projected through `N` do not affect the
/// primary task (`M N ~ 0`) and `N` is idempotent.
pub fn null_space_projector(task_matrix: &DMatrix<f64>, pseudoinverse: &DMatrix<f64>) -> DMatrix<f64> {
    let n = task_matrix.ncols();
    DMatrix::identity(n, n) - pseudoinverse * task_matrix
}

/// The visual-servoing control law. Fixed desired bearing: the optical axis,
/// `s_d = (0, 0, 1)`.
#[derive(Debug, Clone, Copy)]
pub struct LookAtPoint {
    /// Proportional gain of the primary bearing task.
    pub gain: f64,
    /// Damping factor of the pseudoinverse.
    pub lambda: f64,
}

impl LookAtPoint {
    /// The desired bearing, along the camera optical axis.
    pub fn desired_bearing() -> Vector3<f64> {
        Vector3::z()
    }

    /// Computes the joint velocity centering the target on the optical axis.
    ///
    /// # Arguments
    ///
    /// * `target_in_camera` - target position in the camera optical frame
    /// * `camera_rotation` - camera orientation in the base frame
    /// * `tool_to_camera` - constant rotation from the tool frame to the camera frame
    /// * `jacobian` - robot Jacobian (6xN) in the tool frame
    /// * `secondary` - optional secondary joint-velocity objective, projected
    ///   into the null space of the primary task before being added
    ///
    /// When the target is already centered the primary velocity is (close to)
    /// zero; the magnitude is bounded by the damping near rank deficiency but
    /// not clamped to actuator limits.
    pub fn joint_velocity(
        &self,
        target_in_camera: &Vector3<f64>,
        camera_rotation: &Rotation3<f64>,
        tool_to_camera: &Rotation3<f64>,
        jacobian: &Jacobian,
        secondary: Option<&JointVector>,
    ) -> Result<JointVector, &'static str> {
        let feature = VisualFeature::from_target(target_in_camera)?;

        // Interaction matrix in the camera frame, then rotated to base.
        let l_camera = interaction_matrix(&feature);
        let l_base = l_camera * block_rotation(camera_rotation);

        // Robot Jacobian mapped to camera-frame twists.
        let tool_block = block_rotation(tool_to_camera);
        let camera_jacobian =
            DMatrix::from_column_slice(6, 6, tool_block.as_slice()) * jacobian;

        // Combined feature Jacobian, 3xN.
        let task_matrix =
            DMatrix::from_column_slice(3, 6, l_base.as_slice()) * &camera_jacobian;

        let pseudoinverse = damped_pseudoinverse(&task_matrix, self.lambda)?;
        let mut velocity: JointVector = self.gain * (&pseudoinverse * Self::desired_bearing());

        if let Some(objective) = secondary {
            let projector = null_space_projector(&task_matrix, &pseudoinverse);
            velocity += projector * objective;
        }
        Ok(velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-6;

    fn random_jacobian(n: usize, rng: &mut StdRng) -> Jacobian {
        DMatrix::from_fn(6, n, |_, _| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn skew_encodes_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-0.7, 0.4, 1.1);
        let via_matrix = skew(&a) * b;
        let direct = a.cross(&b);
        assert!((via_matrix - direct).norm() < 1e-12);
    }

    #[test]
    fn feature_rejects_target_at_optical_center() {
        assert!(VisualFeature::from_target(&Vector3::zeros()).is_err());
    }

    #[test]
    fn target_straight_ahead_gives_unit_depth_and_axis_bearing() {
        let feature = VisualFeature::from_target(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert!((feature.depth - 1.0).abs() < 1e-12);
        assert!((feature.bearing - Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn centered_target_commands_no_motion() {
        // s == s_d: the primary velocity must vanish for any Jacobian.
        let mut rng = StdRng::seed_from_u64(21);
        let law = LookAtPoint { gain: 2.0, lambda: 0.01 };
        for _ in 0..10 {
            let jacobian = random_jacobian(7, &mut rng);
            let velocity = law
                .joint_velocity(
                    &Vector3::new(0.0, 0.0, 1.0),
                    &Rotation3::identity(),
                    &Rotation3::identity(),
                    &jacobian,
                    None,
                )
                .unwrap();
            assert!(velocity.norm() < EPSILON, "norm = {}", velocity.norm());
        }
    }

    #[test]
    fn off_axis_target_commands_centering_rotation() {
        // Target along +X, camera frame aligned with base, identity tool
        // mapping: the Jacobian is identity on the first six joints, so the
        // commanded camera twist equals the first six joint velocities.
        let law = LookAtPoint { gain: 1.0, lambda: 0.01 };
        let mut jacobian = DMatrix::zeros(6, 6);
        for i in 0..6 {
            jacobian[(i, i)] = 1.0;
        }
        let velocity = law
            .joint_velocity(
                &Vector3::new(1.0, 0.0, 0.0),
                &Rotation3::identity(),
                &Rotation3::identity(),
                &jacobian,
                None,
            )
            .unwrap();
        assert!(velocity.norm() > 0.1);
        // Check the commanded motion actually turns the bearing toward the
        // optical axis: the feature rate L * qdot must have a positive Z
        // component (s moves from (1,0,0) toward (0,0,1)).
        let feature = VisualFeature::from_target(&Vector3::new(1.0, 0.0, 0.0)).unwrap();
        let l = interaction_matrix(&feature);
        let bearing_rate = DMatrix::from_column_slice(3, 6, l.as_slice()) * &velocity;
        assert!(bearing_rate[2] > 0.0, "sz rate = {}", bearing_rate[2]);
        assert!(velocity[4] > 0.0, "wy = {}", velocity[4]);
    }

    #[test]
    fn projector_annihilates_task_and_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            let jacobian = random_jacobian(7, &mut rng);
            let feature =
                VisualFeature::from_target(&Vector3::new(0.4, -0.2, 1.5)).unwrap();
            let l = interaction_matrix(&feature);
            let task_matrix =
                DMatrix::from_column_slice(3, 6, l.as_slice()) * &jacobian;
            let pseudoinverse = damped_pseudoinverse(&task_matrix, 0.0).unwrap();
            let projector = null_space_projector(&task_matrix, &pseudoinverse);

            let annihilation = (&task_matrix * &projector).norm();
            assert!(annihilation < EPSILON, "|M N| = {}", annihilation);

            let idempotency = (&projector * &projector - &projector).norm();
            assert!(idempotency < EPSILON, "|N N - N| = {}", idempotency);
        }
    }

    #[test]
    fn secondary_objective_does_not_disturb_primary_task() {
        let law = LookAtPoint { gain: 1.0, lambda: 0.0 };
        let mut rng = StdRng::seed_from_u64(3);
        let jacobian = random_jacobian(7, &mut rng);
        let target = Vector3::new(0.3, 0.1, 2.0);
        let secondary = JointVector::from_fn(7, |i, _| (i as f64 - 3.0) * 0.2);

        let primary_only = law
            .joint_velocity(&target, &Rotation3::identity(), &Rotation3::identity(), &jacobian, None)
            .unwrap();
        let with_secondary = law
            .joint_velocity(
                &target,
                &Rotation3::identity(),
                &Rotation3::identity(),
                &jacobian,
                Some(&secondary),
            )
            .unwrap();

        // Rebuild the task matrix to compare the realized feature rates.
        let feature = VisualFeature::from_target(&target).unwrap();
        let l = interaction_matrix(&feature);
        let task_matrix =
            DMatrix::from_column_slice(3, 6, l.as_slice()) * &jacobian;
        let rate_difference =
            (&task_matrix * &with_secondary - &task_matrix * &primary_only).norm();
        assert!(rate_difference < 1e-9, "feature rate changed by {}", rate_difference);
    }
}
