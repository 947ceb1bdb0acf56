use nalgebra as na;

use crate::biped::{MassModel, RobotDimensions};
use crate::ik::{arm_forward_kinematics, leg_chain};
use crate::joints::{JointValues, Side};

/// Height of the head mass above the neck joint.
const HEAD_COM_HEIGHT: f64 = 0.05;

/// Centre of mass of the whole robot in the torso frame for the given joint angles.
///
/// Every link is a point mass at its midpoint, which is accurate enough for balancing
/// against the support foot.
pub fn center_of_mass(
    joints: &JointValues,
    body_tilt: &na::Vector2<f64>,
    dims: &RobotDimensions,
    masses: &MassModel,
) -> na::Vector3<f64> {
    let body = crate::ik::body_rotation(body_tilt);
    let mut weighted = na::Vector3::zeros();
    let mut total = 0.0;
    let mut add = |mass: f64, position: na::Vector3<f64>| {
        weighted += position * mass;
        total += mass;
    };

    add(masses.torso, body * na::Vector3::from(masses.torso_com));
    add(
        masses.head,
        body * na::Vector3::new(0.0, 0.0, dims.neck_offset_z + HEAD_COM_HEIGHT),
    );

    for side in [Side::Left, Side::Right] {
        let shoulder = dims.shoulder_position(side.sign());
        let (elbow, hand) = arm_forward_kinematics(&joints.arm(side), dims);
        add(masses.upper_arm, body * (shoulder + elbow * 0.5));
        add(masses.lower_arm, body * (shoulder + (elbow + hand) * 0.5));

        let chain = leg_chain(&joints.leg(side), side, body_tilt, dims);
        let ankle = chain.ankle.translation.vector;
        let foot = chain.ankle * na::Point3::new(0.0, 0.0, -0.5 * dims.foot_height);
        add(masses.pelvis, chain.hip);
        add(masses.thigh, (chain.hip + chain.knee) * 0.5);
        add(masses.tibia, (chain.knee + ankle) * 0.5);
        add(masses.foot, foot.coords);
    }

    if total > 0.0 {
        weighted / total
    } else {
        na::Vector3::zeros()
    }
}

/// Ground-projected outline of a foot, counter-clockwise.
pub fn foot_support_polygon(
    ankle: &na::Isometry3<f64>,
    dims: &RobotDimensions,
) -> Vec<na::Vector2<f64>> {
    let half_length = dims.foot_size[0] / 2.0;
    let half_width = dims.foot_size[1] / 2.0;

    [
        (-half_length, -half_width),
        (half_length, -half_width),
        (half_length, half_width),
        (-half_length, half_width),
    ]
    .into_iter()
    .map(|(x, y)| {
        let corner = ankle * na::Point3::new(x, y, -dims.foot_height);
        na::Vector2::new(corner.x, corner.y)
    })
    .collect()
}

fn cross(o: &na::Vector2<f64>, a: &na::Vector2<f64>, b: &na::Vector2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull of a point set, counter-clockwise (monotone chain).
pub fn convex_hull(points: &[na::Vector2<f64>]) -> Vec<na::Vector2<f64>> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<na::Vector2<f64>> = Vec::with_capacity(sorted.len() * 2);
    for pass in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &na::Vector2<f64>>> = if pass == 0 {
            Box::new(sorted.iter())
        } else {
            Box::new(sorted.iter().rev())
        };
        for point in iter {
            while hull.len() >= start + 2
                && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], point) <= 0.0
            {
                hull.pop();
            }
            hull.push(*point);
        }
        // the last point of each chain starts the next one
        hull.pop();
    }
    hull
}

/// Whether `point` lies inside (or on the border of) a counter-clockwise convex polygon.
pub fn is_inside_convex_polygon(point: &na::Vector2<f64>, polygon: &[na::Vector2<f64>]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .all(|(a, b)| cross(a, b, point) >= 0.0)
}

/// Support polygon of both feet standing on the ground.
pub fn double_support_polygon(
    left: &na::Isometry3<f64>,
    right: &na::Isometry3<f64>,
    dims: &RobotDimensions,
) -> Vec<na::Vector2<f64>> {
    let mut corners = foot_support_polygon(left, dims);
    corners.extend(foot_support_polygon(right, dims));
    convex_hull(&corners)
}
