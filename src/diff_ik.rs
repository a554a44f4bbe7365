//! Differential inverse kinematics (resolved-rate control).
//!
//! Maps a desired Cartesian twist to joint velocities through the damped
//! pseudoinverse of the Jacobian, then integrates joint positions with
//! explicit Euler at the fixed control period. Near a singularity the damping
//! bounds the solution numerically, but the resulting velocity is not clamped
//! to actuator limits; saturation is a hardening option outside this core.

extern crate nalgebra as na;

use na::linalg::SVD;
use na::DMatrix;

use crate::robot_traits::{Jacobian, JointVector, Pose, Twist};

/// Default damping factor for the pseudoinverse.
pub const DEFAULT_DAMPING: f64 = 0.01;

/// Damped least-squares (Moore-Penrose) pseudoinverse:
/// `M+ = Mt (M Mt + lambda^2 I)^-1`.
///
/// With a non-zero `lambda` the bracketed matrix is positive definite and the
/// direct inverse exists; the SVD pseudoinverse is kept as a fallback should
/// the inversion still fail numerically.
pub fn damped_pseudoinverse(matrix: &DMatrix<f64>, lambda: f64) -> Result<DMatrix<f64>, &'static str> {
    let rows = matrix.nrows();
    let gram = matrix * matrix.transpose() + DMatrix::identity(rows, rows) * (lambda * lambda);
    if let Some(gram_inverse) = gram.try_inverse() {
        return Ok(matrix.transpose() * gram_inverse);
    }
    let svd = SVD::new(matrix.clone(), true, true);
    match svd.pseudo_inverse(lambda) {
        Ok(pseudoinverse) => Ok(pseudoinverse),
        Err(_) => Err("Unable to compute the pseudoinverse"),
    }
}

/// Joint velocities realizing the desired end-effector twist:
/// `qdot = J+ v`. The twist must be expressed in the same frame as the
/// Jacobian. The guarantee `J * qdot ~ v` holds while `J` is
/// well-conditioned; near rank deficiency the damping takes over and the
/// realized twist degrades gracefully instead of blowing up.
pub fn resolved_rate(
    jacobian: &Jacobian,
    desired_twist: &Twist,
    lambda: f64,
) -> Result<JointVector, &'static str> {
    let pseudoinverse = damped_pseudoinverse(jacobian, lambda)?;
    Ok(pseudoinverse * desired_twist)
}

/// One explicit Euler step, `q_next = q + qdot * dt`. Deterministic: the same
/// inputs produce bit-identical output.
pub fn euler_step(positions: &JointVector, velocities: &JointVector, dt: f64) -> JointVector {
    positions + velocities * dt
}

/// Numeric 6xN Jacobian of an arbitrary forward-kinematics function, by
/// one-sided finite differences with disturbance `epsilon`. Robot-model
/// adapters without an analytic Jacobian can build on this.
pub fn numeric_jacobian<F>(forward: F, positions: &JointVector, epsilon: f64) -> Jacobian
where
    F: Fn(&JointVector) -> Pose,
{
    let n = positions.len();
    let current_pose = forward(positions);
    let current_position = current_pose.translation.vector;
    let current_orientation = current_pose.rotation;

    let mut jacobian = DMatrix::zeros(6, n);
    for i in 0..n {
        let mut perturbed = positions.clone();
        perturbed[i] += epsilon;
        let perturbed_pose = forward(&perturbed);

        let delta_position = (perturbed_pose.translation.vector - current_position) / epsilon;
        let delta_orientation =
            (perturbed_pose.rotation * current_orientation.inverse()).scaled_axis() / epsilon;

        jacobian.view_mut((0, i), (3, 1)).copy_from(&delta_position);
        jacobian.view_mut((3, i), (3, 1)).copy_from(&delta_orientation);
    }
    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-6;

    fn well_conditioned_jacobian(n: usize, rng: &mut StdRng) -> Jacobian {
        // Identity blocks plus a small random perturbation keep the
        // condition number low (well under 10).
        let mut jacobian = DMatrix::zeros(6, n);
        for i in 0..6 {
            jacobian[(i, i % n)] = 1.0;
        }
        for value in jacobian.iter_mut() {
            *value += rng.random_range(-0.05..0.05);
        }
        jacobian
    }

    #[test]
    fn round_trip_on_well_conditioned_jacobian() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let jacobian = well_conditioned_jacobian(7, &mut rng);
            let twist = Twist::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            // Undamped solve so that J * J+ * v == v to numerical precision.
            let velocities = resolved_rate(&jacobian, &twist, 0.0).unwrap();
            let realized = &jacobian * &velocities;
            for i in 0..6 {
                assert!(
                    (realized[i] - twist[i]).abs() < EPSILON,
                    "component {} not recovered: {} vs {}",
                    i,
                    realized[i],
                    twist[i]
                );
            }
        }
    }

    #[test]
    fn damping_bounds_singular_solve() {
        // Rank-1 Jacobian: without damping the pseudoinverse would explode
        // along the lost directions.
        let mut jacobian = DMatrix::zeros(6, 7);
        jacobian[(0, 0)] = 1.0;
        let twist = Twist::new(0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        let velocities = resolved_rate(&jacobian, &twist, DEFAULT_DAMPING).unwrap();
        assert!(velocities.norm().is_finite());
        // The commanded direction is unreachable; the damped solution stays
        // near zero instead of diverging.
        assert!(velocities.norm() < 1.0);
    }

    #[test]
    fn euler_step_is_bit_exact() {
        let positions = JointVector::from_vec(vec![0.1, -0.2, 0.3, 0.0, 1.5, -3.0, 0.7]);
        let velocities = JointVector::from_vec(vec![1.0, 0.5, -0.25, 0.0, 2.0, -1.0, 0.125]);
        let dt = 0.01;
        let expected = JointVector::from_iterator(
            7,
            (0..7).map(|i| positions[i] + velocities[i] * dt),
        );
        let first = euler_step(&positions, &velocities, dt);
        let second = euler_step(&positions, &velocities, dt);
        assert_eq!(first, expected);
        assert_eq!(first, second);
    }

    #[test]
    fn numeric_jacobian_of_single_rotary_joint() {
        // One rotary joint with a unit lever arm: rotating the joint moves
        // the end-effector along Y and rotates it about Z, both with unit
        // derivative at zero.
        let forward = |qs: &JointVector| {
            let angle = qs[0];
            Isometry3::from_parts(
                Translation3::new(angle.cos(), angle.sin(), 0.0),
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
            )
        };
        let positions = JointVector::zeros(1);
        let jacobian = numeric_jacobian(forward, &positions, EPSILON);
        assert!((jacobian[(0, 0)] - 0.0).abs() < 1e-5);
        assert!((jacobian[(1, 0)] - 1.0).abs() < 1e-5);
        assert!((jacobian[(5, 0)] - 1.0).abs() < 1e-5);
    }
}
