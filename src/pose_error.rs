//! Linear and rotational discrepancy between two poses.
//!
//! Both poses must already be expressed in the same reference frame; no
//! transformation happens here.

extern crate nalgebra as na;

use na::Vector3;

use crate::robot_traits::{Pose, Twist};

/// Plain vector difference of the translations, `p_desired - p_current`.
pub fn linear_error(desired: &Pose, current: &Pose) -> Vector3<f64> {
    desired.translation.vector - current.translation.vector
}

/// First-order orientation error between two rotation matrices:
/// `e_o = 0.5 * sum_i (r_i x d_i)` over the column pairs of the current and
/// desired rotation.
///
/// Known limitation: the approximation holds for small angular discrepancies
/// only. Near a 180-degree rotation it becomes non-monotonic and can vanish
/// for poses that are not aligned at all. Callers relying on large-angle
/// convergence need a different error representation.
pub fn orientation_error(desired: &Pose, current: &Pose) -> Vector3<f64> {
    let r_desired = desired.rotation.to_rotation_matrix();
    let r_current = current.rotation.to_rotation_matrix();

    let mut sum = Vector3::zeros();
    for i in 0..3 {
        let r_i: Vector3<f64> = r_current.matrix().column(i).into_owned();
        let d_i: Vector3<f64> = r_desired.matrix().column(i).into_owned();
        sum += r_i.cross(&d_i);
    }
    0.5 * sum
}

/// Desired Cartesian twist from the pose error, with the proportional gain
/// applied per axis group (linear and angular gains differ on purpose).
/// Expressed in the common frame of the two poses.
pub fn pose_error_twist(desired: &Pose, current: &Pose, k_lin: f64, k_ang: f64) -> Twist {
    let e_p = linear_error(desired, current);
    let e_o = orientation_error(desired, current);
    Twist::new(
        k_lin * e_p.x, k_lin * e_p.y, k_lin * e_p.z,
        k_ang * e_o.x, k_ang * e_o.y, k_ang * e_o.z,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Translation3, UnitQuaternion};

    fn pose(x: f64, y: f64, z: f64, rotation: UnitQuaternion<f64>) -> Pose {
        Pose::from_parts(Translation3::new(x, y, z), rotation)
    }

    #[test]
    fn identical_orientations_give_exactly_zero() {
        let identity = pose(0.0, 0.0, 0.0, UnitQuaternion::identity());
        let error = orientation_error(&identity, &identity);
        assert_eq!(error, Vector3::zeros());
    }

    #[test]
    fn linear_error_is_plain_subtraction() {
        let desired = pose(1.0, -2.0, 3.0, UnitQuaternion::identity());
        let current = pose(0.5, 0.0, 3.0, UnitQuaternion::identity());
        assert_eq!(linear_error(&desired, &current), Vector3::new(0.5, -2.0, 0.0));
    }

    #[test]
    fn small_rotation_error_matches_axis_angle() {
        // For a small rotation the first-order error approximates the
        // rotation vector itself.
        let angle = 0.01;
        let desired = pose(
            0.0, 0.0, 0.0,
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
        );
        let current = pose(0.0, 0.0, 0.0, UnitQuaternion::identity());
        let error = orientation_error(&desired, &current);
        assert!((error.z - angle).abs() < 1e-6);
        assert!(error.x.abs() < 1e-9);
        assert!(error.y.abs() < 1e-9);
    }

    #[test]
    fn gains_applied_per_axis_group() {
        let desired = pose(
            1.0, 0.0, 0.0,
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.01),
        );
        let current = pose(0.0, 0.0, 0.0, UnitQuaternion::identity());
        let twist = pose_error_twist(&desired, &current, 5.0, 3.0);
        assert!((twist[0] - 5.0).abs() < 1e-12);
        assert!((twist[5] - 3.0 * 0.01).abs() < 1e-6);
    }
}
