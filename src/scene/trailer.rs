use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Oriented box given by its centre pose and half extents.
#[derive(Debug, Clone, PartialEq)]
pub struct Cuboid {
    pub pose: Isometry3<f64>,
    pub half_extents: Vector3<f64>,
}

impl Cuboid {
    pub fn new(pose: Isometry3<f64>, half_extents: Vector3<f64>) -> Self {
        Self { pose, half_extents }
    }

    /// Axis-aligned box from its minimum and maximum corners.
    pub fn from_corners(min: Point3<f64>, max: Point3<f64>) -> Self {
        let center = nalgebra::center(&min, &max);
        Self {
            pose: Isometry3::translation(center.x, center.y, center.z),
            half_extents: (max - min) / 2.0,
        }
    }

    /// Distance from `point` to the box surface, zero inside.
    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        let local = self.pose.inverse_transform_point(point);
        let outside = Vector3::new(
            (local.x.abs() - self.half_extents.x).max(0.0),
            (local.y.abs() - self.half_extents.y).max(0.0),
            (local.z.abs() - self.half_extents.z).max(0.0),
        );
        outside.norm()
    }

    /// Corners of the world-frame axis-aligned bounding box.
    pub fn aabb(&self) -> (Point3<f64>, Point3<f64>) {
        let rotation = self.pose.rotation.to_rotation_matrix();
        let abs = rotation.matrix().abs();
        let extent = abs * self.half_extents;
        let center = Point3::from(self.pose.translation.vector);
        (center - extent, center + extent)
    }
}

/// Interior dimensions of the trailer, in the world frame.
///
/// The trailer is split into separate panels so that a convex-hull collision
/// backend does not fill in the hollow container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailerGeometry {
    /// Open end, where the robot stands.
    pub front_x: f64,
    pub back_x: f64,
    pub half_width: f64,
    pub floor_z: f64,
    pub roof_z: f64,
    pub wall_thickness: f64,
}

impl Default for TrailerGeometry {
    fn default() -> Self {
        Self {
            front_x: -1.0,
            back_x: 4.25,
            half_width: 1.55,
            floor_z: 0.0,
            roof_z: 2.9,
            wall_thickness: 0.05,
        }
    }
}

impl TrailerGeometry {
    pub fn floor(&self) -> Cuboid {
        let t = self.wall_thickness;
        Cuboid::from_corners(
            Point3::new(self.front_x, -self.half_width - t, self.floor_z - t),
            Point3::new(self.back_x + t, self.half_width + t, self.floor_z),
        )
    }

    pub fn roof(&self) -> Cuboid {
        let t = self.wall_thickness;
        Cuboid::from_corners(
            Point3::new(self.front_x, -self.half_width - t, self.roof_z),
            Point3::new(self.back_x + t, self.half_width + t, self.roof_z + t),
        )
    }

    pub fn back(&self) -> Cuboid {
        let t = self.wall_thickness;
        Cuboid::from_corners(
            Point3::new(self.back_x, -self.half_width, self.floor_z),
            Point3::new(self.back_x + t, self.half_width, self.roof_z),
        )
    }

    pub fn right_side(&self) -> Cuboid {
        let t = self.wall_thickness;
        Cuboid::from_corners(
            Point3::new(self.front_x, -self.half_width - t, self.floor_z),
            Point3::new(self.back_x, -self.half_width, self.roof_z),
        )
    }

    pub fn left_side(&self) -> Cuboid {
        let t = self.wall_thickness;
        Cuboid::from_corners(
            Point3::new(self.front_x, self.half_width, self.floor_z),
            Point3::new(self.back_x, self.half_width + t, self.roof_z),
        )
    }

    /// Every panel, roof included.
    pub fn panels(&self) -> Vec<(&'static str, Cuboid)> {
        vec![
            ("Truck_Trailer_Floor", self.floor()),
            ("Truck_Trailer_Right_Side", self.right_side()),
            ("Truck_Trailer_Left_Side", self.left_side()),
            ("Truck_Trailer_Roof", self.roof()),
            ("Truck_Trailer_Back", self.back()),
        ]
    }
}
