//! Graph of submap poses and relative pose constraints.
//!
//! Optimization is a pure function of the graph: [`PoseGraph::optimize`] returns the new poses
//! and only [`PoseGraph::apply`] writes them back.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info};
use nalgebra::{DMatrix, DVector, Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};
use serde_derive::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    submap::SubmapId,
    transform::Transform,
};

/// Configuration of the pose graph optimization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphParams {
    /// Frames between optimization passes. Zero disables the optimization.
    pub optimize_every_frames: usize,
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// The optimization converges when the relative error reduction of a step is below it.
    pub tolerance: f64,
}

impl Default for PoseGraphParams {
    fn default() -> Self {
        Self {
            optimize_every_frames: 10,
            max_iterations: 50,
            tolerance: 1e-6,
        }
    }
}

/// Relative pose constraint: `relative_pose` maps points of `to` into `from`.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub from: SubmapId,
    pub to: SubmapId,
    pub relative_pose: Transform,
    /// Information weight of the constraint.
    pub weight: f32,
}

/// Result of an optimization pass.
#[derive(Clone, Debug)]
pub struct OptimizationSummary {
    /// Optimized pose of every node, including the anchor.
    pub poses: BTreeMap<SubmapId, Transform>,
    pub iterations: usize,
    /// Root of the weighted squared error before and after the pass.
    pub initial_error: f64,
    pub final_error: f64,
}

/// Nodes are submap poses (submap to world), edges are relative constraints between them.
/// The node with the smallest id is the anchor and is never moved.
#[derive(Clone, Debug, Default)]
pub struct PoseGraph {
    nodes: BTreeMap<SubmapId, Transform>,
    edges: BTreeMap<(SubmapId, SubmapId), Edge>,
    dirty: bool,
}

fn exp(tangent: &Vector6<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(tangent[0], tangent[1], tangent[2]),
        UnitQuaternion::from_scaled_axis(Vector3::new(tangent[3], tangent[4], tangent[5])),
    )
}

fn log(isometry: &Isometry3<f64>) -> Vector6<f64> {
    let t = isometry.translation.vector;
    let r = isometry.rotation.scaled_axis();
    Vector6::new(t[0], t[1], t[2], r[0], r[1], r[2])
}

/// Flattened problem: the anchor is fixed, the other nodes own 6 parameters each.
struct Problem {
    anchor_pose: Isometry3<f64>,
    /// Parameter block of each node, `None` for the anchor.
    blocks: BTreeMap<SubmapId, Option<usize>>,
    edges: Vec<(SubmapId, SubmapId, Isometry3<f64>, f64)>,
}

impl Problem {
    fn pose(&self, params: &DVector<f64>, id: &SubmapId) -> Isometry3<f64> {
        match self.blocks.get(id).copied().flatten() {
            Some(block) => exp(&Vector6::from_iterator(
                params.rows(block * 6, 6).iter().copied(),
            )),
            None => self.anchor_pose,
        }
    }

    fn edge_residual(
        measurement: &Isometry3<f64>,
        pose_from: &Isometry3<f64>,
        pose_to: &Isometry3<f64>,
        weight_sqrt: f64,
    ) -> Vector6<f64> {
        log(&(measurement.inverse() * pose_from.inverse() * pose_to)) * weight_sqrt
    }

    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let mut residuals = DVector::zeros(self.edges.len() * 6);
        for (index, (from, to, measurement, weight)) in self.edges.iter().enumerate() {
            let residual = Self::edge_residual(
                measurement,
                &self.pose(params, from),
                &self.pose(params, to),
                weight.sqrt(),
            );
            residuals.fixed_rows_mut::<6>(index * 6).copy_from(&residual);
        }
        residuals
    }

    fn error(&self, params: &DVector<f64>) -> f64 {
        self.residuals(params).norm_squared()
    }

    /// Central difference Jacobian, each edge only depends on the blocks of its two nodes.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        const EPS: f64 = 1e-6;
        let mut jacobian = DMatrix::zeros(self.edges.len() * 6, params.len());

        for (index, (from, to, measurement, weight)) in self.edges.iter().enumerate() {
            let weight_sqrt = weight.sqrt();
            for id in [from, to] {
                let block = match self.blocks.get(id).copied().flatten() {
                    Some(block) => block,
                    None => continue,
                };
                for p in 0..6 {
                    let column = block * 6 + p;
                    let mut params_plus = params.clone();
                    let mut params_minus = params.clone();
                    params_plus[column] += EPS;
                    params_minus[column] -= EPS;

                    let plus = Self::edge_residual(
                        measurement,
                        &self.pose(&params_plus, from),
                        &self.pose(&params_plus, to),
                        weight_sqrt,
                    );
                    let minus = Self::edge_residual(
                        measurement,
                        &self.pose(&params_minus, from),
                        &self.pose(&params_minus, to),
                        weight_sqrt,
                    );
                    for r in 0..6 {
                        jacobian[(index * 6 + r, column)] += (plus[r] - minus[r]) / (2.0 * EPS);
                    }
                }
            }
        }

        jacobian
    }
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node or replaces the pose of an existing one.
    pub fn add_node(&mut self, id: SubmapId, pose: Transform) {
        self.nodes.insert(id, pose);
        self.dirty = true;
    }

    /// Adds a constraint between two existing nodes. A constraint between the same pair,
    /// in any direction, is replaced.
    pub fn add_edge(
        &mut self,
        from: SubmapId,
        to: SubmapId,
        relative_pose: Transform,
        weight: f32,
    ) -> Result<()> {
        if from == to {
            return Err(Error::invalid_parameter(format!(
                "edge from {from} to itself"
            )));
        }
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(Error::invalid_parameter(format!("unknown node {id}")));
            }
        }
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(Error::invalid_parameter(format!(
                "edge weight must be positive, got {weight}"
            )));
        }

        let edge = if from < to {
            Edge {
                from,
                to,
                relative_pose,
                weight,
            }
        } else {
            Edge {
                from: to,
                to: from,
                relative_pose: relative_pose.inverse(),
                weight,
            }
        };
        self.edges.insert((edge.from, edge.to), edge);
        self.dirty = true;
        Ok(())
    }

    pub fn node(&self, id: SubmapId) -> Option<&Transform> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (SubmapId, &Transform)> + '_ {
        self.nodes.iter().map(|(id, pose)| (*id, pose))
    }

    /// Constraint between two nodes, oriented as asked.
    pub fn edge(&self, from: SubmapId, to: SubmapId) -> Option<Edge> {
        if from < to {
            self.edges.get(&(from, to)).cloned()
        } else {
            self.edges.get(&(to, from)).map(|edge| Edge {
                from,
                to,
                relative_pose: edge.relative_pose.inverse(),
                weight: edge.weight,
            })
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values()
    }

    pub fn len_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn len_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn anchor(&self) -> Option<SubmapId> {
        self.nodes.keys().next().copied()
    }

    /// Whether nodes or edges changed since the last applied optimization.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.dirty = false;
    }

    fn check_connected(&self, anchor: SubmapId) -> Result<()> {
        let mut adjacency: BTreeMap<SubmapId, Vec<SubmapId>> = BTreeMap::new();
        for (from, to) in self.edges.keys() {
            adjacency.entry(*from).or_default().push(*to);
            adjacency.entry(*to).or_default().push(*from);
        }

        let mut visited = BTreeSet::from([anchor]);
        let mut queue = VecDeque::from([anchor]);
        while let Some(id) = queue.pop_front() {
            for next in adjacency.get(&id).into_iter().flatten() {
                if visited.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }

        match self.nodes.keys().find(|id| !visited.contains(*id)) {
            Some(id) => Err(Error::OptimizationDidNotConverge {
                iterations: 0,
                reason: format!("node {id} is not connected to the anchor"),
            }),
            None => Ok(()),
        }
    }

    fn problem(&self, anchor: SubmapId) -> (Problem, DVector<f64>) {
        let mut blocks = BTreeMap::new();
        let mut initial = Vec::new();
        for (id, pose) in self.nodes.iter() {
            if *id == anchor {
                blocks.insert(*id, None);
            } else {
                blocks.insert(*id, Some(initial.len() / 6));
                initial.extend(log(&pose.to_f64()).iter());
            }
        }

        let anchor_pose = self
            .nodes
            .get(&anchor)
            .map(|pose| pose.to_f64())
            .unwrap_or_else(Isometry3::identity);
        let edges = self
            .edges
            .values()
            .map(|edge| {
                (
                    edge.from,
                    edge.to,
                    edge.relative_pose.to_f64(),
                    edge.weight as f64,
                )
            })
            .collect();

        (
            Problem {
                anchor_pose,
                blocks,
                edges,
            },
            DVector::from_vec(initial),
        )
    }

    /// Levenberg-Marquardt over the poses of all nodes but the anchor, minimizing the weighted
    /// squared log error of the constraints. The graph is not modified.
    ///
    /// Fails with [`Error::OptimizationDidNotConverge`] when a node is not connected to the anchor,
    /// the system is ill-conditioned or the iteration cap is reached before convergence.
    pub fn optimize(&self, params: &PoseGraphParams) -> Result<OptimizationSummary> {
        const LAMBDA_UP: f64 = 10.0;
        const LAMBDA_DOWN: f64 = 0.1;
        const MIN_LAMBDA: f64 = 1e-10;
        const MAX_LAMBDA: f64 = 1e10;
        const MIN_ERROR: f64 = 1e-14;

        let anchor = match self.anchor() {
            Some(anchor) => anchor,
            None => {
                return Ok(OptimizationSummary {
                    poses: BTreeMap::new(),
                    iterations: 0,
                    initial_error: 0.0,
                    final_error: 0.0,
                })
            }
        };
        self.check_connected(anchor)?;

        let (problem, mut current) = self.problem(anchor);
        let initial_error = problem.error(&current);
        let fail = |iterations: usize, reason: &str| Error::OptimizationDidNotConverge {
            iterations,
            reason: reason.to_string(),
        };
        if !initial_error.is_finite() {
            return Err(fail(0, "non finite initial error"));
        }

        let mut current_error = initial_error;
        let mut lambda = 1e-3;
        let mut iterations = 0;
        let mut converged = current.is_empty() || current_error < MIN_ERROR;

        while !converged && iterations < params.max_iterations {
            iterations += 1;

            let residuals = problem.residuals(&current);
            let jacobian = problem.jacobian(&current);
            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < MIN_ERROR {
                converged = true;
                break;
            }

            let mut damped = jacobian.transpose() * &jacobian;
            for i in 0..current.len() {
                damped[(i, i)] += lambda * damped[(i, i)].max(1e-6);
            }
            let delta = damped
                .lu()
                .solve(&(-&gradient))
                .ok_or_else(|| fail(iterations, "singular system"))?;
            if delta.iter().any(|v| !v.is_finite()) {
                return Err(fail(iterations, "non finite update"));
            }

            let trial = &current + &delta;
            let trial_error = problem.error(&trial);
            if trial_error.is_finite() && trial_error < current_error {
                let reduction = (current_error - trial_error) / current_error;
                current = trial;
                current_error = trial_error;
                lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);
                converged = reduction < params.tolerance || current_error < MIN_ERROR;
            } else {
                lambda = (lambda * LAMBDA_UP).min(MAX_LAMBDA);
                // No step reduces the error any further.
                converged = lambda >= MAX_LAMBDA || delta.norm() < MIN_ERROR;
            }
        }

        if !converged {
            return Err(fail(iterations, "iteration cap reached"));
        }

        let poses = problem
            .blocks
            .keys()
            .map(|id| (*id, Transform::from_f64(&problem.pose(&current, id))))
            .collect();

        debug!(
            "pose graph: {} nodes, {} edges, {} iterations, error {:.6} -> {:.6}",
            self.nodes.len(),
            self.edges.len(),
            iterations,
            initial_error.sqrt(),
            current_error.sqrt()
        );

        Ok(OptimizationSummary {
            poses,
            iterations,
            initial_error: initial_error.sqrt(),
            final_error: current_error.sqrt(),
        })
    }

    /// Commits optimized poses. Unknown ids are ignored.
    pub fn apply(&mut self, summary: &OptimizationSummary) {
        for (id, pose) in summary.poses.iter() {
            if let Some(node) = self.nodes.get_mut(id) {
                *node = *pose;
            }
        }
        self.dirty = false;
        info!(
            "pose graph optimized in {} iterations, error {:.6} -> {:.6}",
            summary.iterations, summary.initial_error, summary.final_error
        );
    }
}
