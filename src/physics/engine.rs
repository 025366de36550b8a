use std::collections::HashMap;

use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::PhysicsEngine;
use crate::scene::{box_model_name, TrailerGeometry, ROBOT_BASE_MODEL, ROOF_MODEL};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Gravity acceleration along z (m/s², negative for downward).
    pub gravity: f64,
    pub time_step: f64,
    pub box_edge: f64,
    pub box_mass: f64,
    /// Coulomb friction coefficient for supported boxes.
    pub friction: f64,
    /// Overlap resolution passes per step.
    pub solver_iterations: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            gravity: -9.81,
            time_step: 0.001,
            box_edge: 0.5,
            box_mass: 20.0,
            friction: 0.5,
            solver_iterations: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct Body {
    name: String,
    pose: Isometry3<f64>,
    velocity: Vector3<f64>,
    force: Vector3<f64>,
    /// Half extents of the collision box, `None` for bodies that only carry a pose.
    half_extents: Option<Vector3<f64>>,
    mass: f64,
    locked: bool,
    supported: bool,
}

impl Body {
    fn center(&self) -> Point3<f64> {
        Point3::from(self.pose.translation.vector)
    }
}

/// Boxes as axis-aligned point masses in the trailer.
///
/// The roof body defines the ceiling: its pose offsets `roof_z`, so lifting
/// the roof opens the trailer from above.
#[derive(Debug, Clone)]
pub struct BoxPileEngine {
    trailer: TrailerGeometry,
    options: EngineOptions,
    bodies: Vec<Body>,
    index: HashMap<String, usize>,
    time: f64,
}

impl BoxPileEngine {
    pub fn new(trailer: TrailerGeometry, options: EngineOptions) -> Self {
        Self {
            trailer,
            options,
            bodies: vec![],
            index: HashMap::new(),
            time: 0.0,
        }
    }

    /// Engine with the roof, the robot base and `num_boxes` boxes registered.
    pub fn for_scene(trailer: TrailerGeometry, options: EngineOptions, num_boxes: usize) -> Self {
        let mut engine = Self::new(trailer, options);
        engine.add_fixture(ROOF_MODEL, Isometry3::identity());
        engine.add_fixture(ROBOT_BASE_MODEL, Isometry3::identity());
        let edge = engine.options.box_edge;
        for i in 0..num_boxes {
            // parked in a row on the floor until placed
            let x = engine.trailer.front_x + edge * (i as f64 + 0.5);
            engine.add_box(
                &box_model_name(i),
                Isometry3::translation(x, 0.0, engine.trailer.floor_z + edge / 2.0),
            );
        }
        engine
    }

    pub fn add_box(&mut self, name: &str, pose: Isometry3<f64>) {
        let half = self.options.box_edge / 2.0;
        self.insert(Body {
            name: name.to_string(),
            pose,
            velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            half_extents: Some(Vector3::repeat(half)),
            mass: self.options.box_mass,
            locked: false,
            supported: false,
        });
    }

    /// Body without collision geometry.
    pub fn add_fixture(&mut self, name: &str, pose: Isometry3<f64>) {
        self.insert(Body {
            name: name.to_string(),
            pose,
            velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            half_extents: None,
            mass: 1.0,
            locked: false,
            supported: false,
        });
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    fn insert(&mut self, body: Body) {
        match self.index.get(&body.name) {
            Some(&i) => self.bodies[i] = body,
            None => {
                self.index.insert(body.name.clone(), self.bodies.len());
                self.bodies.push(body);
            }
        }
    }

    fn body_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownBody(name.to_string()))
    }

    fn ceiling(&self) -> f64 {
        let lift = self
            .index
            .get(ROOF_MODEL)
            .map(|&i| self.bodies[i].pose.translation.vector.z)
            .unwrap_or(0.0);
        self.trailer.roof_z + lift
    }

    fn step(&mut self, dt: f64) {
        let gravity = Vector3::new(0.0, 0.0, self.options.gravity);
        let friction = self.options.friction * self.options.gravity.abs();

        for body in self.bodies.iter_mut().filter(|b| !b.locked) {
            body.velocity += (gravity + body.force / body.mass) * dt;
            if body.supported {
                let horizontal = Vector3::new(body.velocity.x, body.velocity.y, 0.0);
                let speed = horizontal.norm();
                if speed > 0.0 {
                    let reduced = (speed - friction * dt).max(0.0);
                    body.velocity.x *= reduced / speed;
                    body.velocity.y *= reduced / speed;
                }
            }
            body.pose.translation.vector += body.velocity * dt;
            body.supported = false;
        }

        for _ in 0..self.options.solver_iterations {
            self.resolve_box_collisions();
        }
        self.resolve_container_collisions();
    }

    fn resolve_container_collisions(&mut self) {
        let ceiling = self.ceiling();
        let t = &self.trailer;
        for body in self.bodies.iter_mut().filter(|b| !b.locked) {
            let Some(half) = body.half_extents else {
                continue;
            };
            let p = &mut body.pose.translation.vector;
            let v = &mut body.velocity;

            if p.z < t.floor_z + half.z {
                p.z = t.floor_z + half.z;
                v.z = v.z.max(0.0);
                body.supported = true;
            }
            if p.z > ceiling - half.z && ceiling - half.z >= t.floor_z + half.z {
                p.z = ceiling - half.z;
                v.z = v.z.min(0.0);
            }

            if p.x < t.front_x + half.x {
                p.x = t.front_x + half.x;
                v.x = v.x.max(0.0);
            } else if p.x > t.back_x - half.x {
                p.x = t.back_x - half.x;
                v.x = v.x.min(0.0);
            }

            if p.y < -t.half_width + half.y {
                p.y = -t.half_width + half.y;
                v.y = v.y.max(0.0);
            } else if p.y > t.half_width - half.y {
                p.y = t.half_width - half.y;
                v.y = v.y.min(0.0);
            }
        }
    }

    /// Separates overlapping boxes along the axis of least overlap and
    /// merges their velocities along that axis.
    fn resolve_box_collisions(&mut self) {
        let n = self.bodies.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let (Some(ha), Some(hb)) = (self.bodies[i].half_extents, self.bodies[j].half_extents)
                else {
                    continue;
                };
                if self.bodies[i].locked && self.bodies[j].locked {
                    continue;
                }
                let ca = self.bodies[i].center();
                let cb = self.bodies[j].center();
                let d = cb - ca;
                let overlap = Vector3::new(
                    ha.x + hb.x - d.x.abs(),
                    ha.y + hb.y - d.y.abs(),
                    ha.z + hb.z - d.z.abs(),
                );
                if overlap.x <= 0.0 || overlap.y <= 0.0 || overlap.z <= 0.0 {
                    continue;
                }

                let axis = overlap.imin();
                let depth = overlap[axis];
                let sign = if d[axis] >= 0.0 { 1.0 } else { -1.0 };

                let (ma, mb) = (self.bodies[i].mass, self.bodies[j].mass);
                let (ra, rb) = match (self.bodies[i].locked, self.bodies[j].locked) {
                    (true, _) => (0.0, 1.0),
                    (_, true) => (1.0, 0.0),
                    _ => (mb / (ma + mb), ma / (ma + mb)),
                };
                self.bodies[i].pose.translation.vector[axis] -= sign * depth * ra;
                self.bodies[j].pose.translation.vector[axis] += sign * depth * rb;

                let va = self.bodies[i].velocity[axis];
                let vb = self.bodies[j].velocity[axis];
                // approaching along the axis: inelastic merge
                if (vb - va) * sign < 0.0 {
                    let shared = if ra == 0.0 {
                        va
                    } else if rb == 0.0 {
                        vb
                    } else {
                        (ma * va + mb * vb) / (ma + mb)
                    };
                    self.bodies[i].velocity[axis] = shared;
                    self.bodies[j].velocity[axis] = shared;
                }

                if axis == 2 {
                    // the upper box rests on the lower one
                    if sign > 0.0 {
                        self.bodies[j].supported = true;
                    } else {
                        self.bodies[i].supported = true;
                    }
                }
            }
        }
    }
}

impl PhysicsEngine for BoxPileEngine {
    fn time(&self) -> f64 {
        self.time
    }

    fn advance_to(&mut self, t: f64) -> Result<()> {
        let step = self.options.time_step;
        if step <= 0.0 {
            return Err(Error::Solver(format!("invalid time step {step}")));
        }
        let mut steps = 0usize;
        while self.time < t - 1e-12 {
            let dt = if t - self.time <= step {
                let dt = t - self.time;
                self.time = t;
                dt
            } else {
                self.time += step;
                step
            };
            self.step(dt);
            steps += 1;
        }
        trace!(time = self.time, steps, "advanced");
        Ok(())
    }

    fn set_free_body_pose(&mut self, body: &str, pose: Isometry3<f64>) -> Result<()> {
        let i = self.body_index(body)?;
        let body = &mut self.bodies[i];
        body.pose = pose;
        body.velocity = Vector3::zeros();
        Ok(())
    }

    fn free_body_pose(&self, body: &str) -> Result<Isometry3<f64>> {
        Ok(self.bodies[self.body_index(body)?].pose)
    }

    fn apply_force(&mut self, body: &str, force: Vector3<f64>) -> Result<()> {
        let i = self.body_index(body)?;
        self.bodies[i].force = force;
        Ok(())
    }

    fn clear_forces(&mut self) {
        for body in &mut self.bodies {
            body.force = Vector3::zeros();
        }
    }

    fn lock_body(&mut self, body: &str) -> Result<()> {
        let i = self.body_index(body)?;
        let body = &mut self.bodies[i];
        body.locked = true;
        body.velocity = Vector3::zeros();
        Ok(())
    }
}
