use std::collections::BTreeMap;

use log::{debug, info};

use crate::{
    error::{Error, Result},
    pose_graph::Edge,
    range_image::RangeImage,
    transform::Transform,
    volume::VolumeParams,
};

use super::{PoseConstraint, Submap, SubmapId, SubmapParams};

/// Topology changes decided by [`SubmapManager::update_map`]. The caller mirrors them in the pose graph.
#[derive(Clone, Debug, Default)]
pub struct MapUpdate {
    /// Edge from the previous current submap to the spawned one.
    pub spawned: Option<Edge>,
    pub retired: Vec<SubmapId>,
    /// Consensus constraints that gained inliers since they were last reported.
    pub refined: Vec<Edge>,
}

/// Owns the submaps and decides which one is current, which ones are active and when a new one is spawned.
pub struct SubmapManager {
    params: SubmapParams,
    volume_params: VolumeParams,
    submaps: BTreeMap<SubmapId, Submap>,
    current: Option<SubmapId>,
    next_id: u32,
    last_spawn_frame: usize,
    /// Keyed by `(from, to)` with `from < to`.
    constraints: BTreeMap<(SubmapId, SubmapId), PoseConstraint>,
}

impl SubmapManager {
    pub fn new(params: SubmapParams, volume_params: VolumeParams) -> Self {
        Self {
            params,
            volume_params,
            submaps: BTreeMap::new(),
            current: None,
            next_id: 0,
            last_spawn_frame: 0,
            constraints: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &SubmapParams {
        &self.params
    }

    fn create(&mut self, pose: Transform, frame_index: usize) -> Result<SubmapId> {
        let id = SubmapId(self.next_id);
        let mut submap = Submap::new(id, pose, self.volume_params.clone(), frame_index)?;
        submap.activate();
        self.submaps.insert(id, submap);
        self.next_id += 1;
        self.last_spawn_frame = frame_index;
        self.current = Some(id);
        Ok(id)
    }

    /// Creates the first submap at `pose` and makes it current.
    pub fn spawn_first(&mut self, pose: Transform, frame_index: usize) -> Result<SubmapId> {
        if !self.submaps.is_empty() {
            return Err(Error::invalid_parameter(
                "the first submap was already spawned",
            ));
        }
        let id = self.create(pose, frame_index)?;
        info!("{} spawned at frame {}", id, frame_index);
        Ok(id)
    }

    pub fn current_id(&self) -> Option<SubmapId> {
        self.current
    }

    pub fn current(&self) -> Option<&Submap> {
        self.current.and_then(|id| self.submaps.get(&id))
    }

    pub fn current_mut(&mut self) -> Option<&mut Submap> {
        self.current.and_then(|id| self.submaps.get_mut(&id))
    }

    pub fn get(&self, id: SubmapId) -> Option<&Submap> {
        self.submaps.get(&id)
    }

    pub fn get_mut(&mut self, id: SubmapId) -> Option<&mut Submap> {
        self.submaps.get_mut(&id)
    }

    /// All submaps in ascending id order, retired ones included.
    pub fn submaps(&self) -> impl Iterator<Item = &Submap> + '_ {
        self.submaps.values()
    }

    pub fn submaps_mut(&mut self) -> impl Iterator<Item = &mut Submap> + '_ {
        self.submaps.values_mut()
    }

    pub fn len(&self) -> usize {
        self.submaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submaps.is_empty()
    }

    pub fn active_ids(&self) -> Vec<SubmapId> {
        self.submaps
            .values()
            .filter(|submap| submap.is_active())
            .map(|submap| submap.id)
            .collect()
    }

    /// Active submaps that receive the frame, in ascending id order: those whose visibility reaches
    /// the integration floor and those never integrated.
    pub fn integration_targets(&self) -> Vec<SubmapId> {
        self.submaps
            .values()
            .filter(|submap| {
                submap.is_active()
                    && (submap.visibility_ratio >= self.params.integrate_visibility_floor
                        || submap.integrated_frames == 0)
            })
            .map(|submap| submap.id)
            .collect()
    }

    /// Records the relative pose between the current submap and every other submap tracked in this frame.
    pub fn record_observations(&mut self, tracked: &[SubmapId]) {
        let current = match self.current() {
            Some(current) => current,
            None => return,
        };
        let current_id = current.id;
        let current_camera_inv = current.camera_pose.inverse();

        let mut observations = Vec::new();
        for id in tracked.iter().filter(|id| **id != current_id) {
            if let Some(submap) = self.submaps.get(id) {
                // Points of the current submap into the other one.
                let relative = &submap.camera_pose * &current_camera_inv;
                if *id < current_id {
                    observations.push(((*id, current_id), relative));
                } else {
                    observations.push(((current_id, *id), relative.inverse()));
                }
            }
        }

        let max_observations = self.params.max_constraint_observations;
        for (key, relative) in observations {
            self.constraints
                .entry(key)
                .or_insert_with(|| PoseConstraint::new(max_observations))
                .push(relative);
        }
    }

    pub fn constraint(&self, from: SubmapId, to: SubmapId) -> Option<&PoseConstraint> {
        self.constraints.get(&(from.min(to), from.max(to)))
    }

    fn spawn(&mut self, frame_index: usize, model: Vec<RangeImage>) -> Result<Option<Edge>> {
        let (parent, pose, relative_pose) = match self.current() {
            Some(current) => (
                current.id,
                current.camera_in_world(),
                current.camera_pose,
            ),
            None => return Ok(None),
        };

        let id = self.create(pose, frame_index)?;
        if let Some(submap) = self.submaps.get_mut(&id) {
            submap.set_model(model);
        }
        info!(
            "{} spawned from {} at frame {}",
            id, parent, frame_index
        );

        Ok(Some(Edge {
            from: parent,
            to: id,
            relative_pose,
            weight: self.params.spawn_edge_weight,
        }))
    }

    /// Applies the life cycle policy after a frame was processed:
    ///
    /// * Active submaps other than the current one whose visibility fell below the retire threshold
    ///   become inactive.
    /// * A new submap is spawned at the camera pose, with `frame_pyramid` as its tracking model, when
    ///   `force_spawn` is set and the current submap holds data, which then becomes inactive, or, with
    ///   healthy tracking, when the visibility of the current submap falls
    ///   below the spawn threshold and enough frames passed since the last spawn. It becomes current.
    /// * Constraints with enough agreeing observations are reported for the pose graph.
    pub fn update_map(
        &mut self,
        frame_index: usize,
        tracking_healthy: bool,
        force_spawn: bool,
        frame_pyramid: &[RangeImage],
    ) -> Result<MapUpdate> {
        let mut update = MapUpdate::default();
        let current_id = self.current;

        for submap in self.submaps.values_mut() {
            if Some(submap.id) != current_id
                && submap.is_active()
                && submap.visibility_ratio < self.params.retire_visibility_threshold
            {
                submap.retire();
                info!(
                    "{} retired at frame {}, visibility {:.3}",
                    submap.id, frame_index, submap.visibility_ratio
                );
                update.retired.push(submap.id);
            }
        }

        // An empty submap that is out of units is not relieved by another empty one.
        let (forced, wants_spawn) = match self.current() {
            Some(current) => {
                let forced = force_spawn && current.integrated_frames > 0;
                let wants_spawn = forced
                    || (tracking_healthy
                        && current.visibility_ratio < self.params.spawn_visibility_threshold
                        && frame_index.saturating_sub(self.last_spawn_frame)
                            >= self.params.min_frames_between_spawns);
                (forced, wants_spawn)
            }
            None => (false, false),
        };
        if wants_spawn {
            update.spawned = self.spawn(frame_index, frame_pyramid.to_vec())?;
        }
        if forced {
            if let Some(parent) = update
                .spawned
                .as_ref()
                .and_then(|edge| self.submaps.get_mut(&edge.from))
            {
                parent.retire();
                info!("{} retired at frame {}, out of units", parent.id, frame_index);
                update.retired.push(parent.id);
            }
        }

        let (translation, angle, min_inliers) = (
            self.params.constraint_inlier_translation,
            self.params.constraint_inlier_angle,
            self.params.min_constraint_inliers,
        );
        for ((from, to), constraint) in self.constraints.iter_mut() {
            if let Some((relative_pose, inliers)) = constraint.refined(translation, angle, min_inliers)
            {
                debug!(
                    "constraint {} -> {} refined with {} inliers",
                    from, to, inliers
                );
                update.refined.push(Edge {
                    from: *from,
                    to: *to,
                    relative_pose,
                    weight: inliers as f32,
                });
            }
        }

        Ok(update)
    }

    /// Drops every submap and constraint.
    pub fn reset(&mut self) {
        self.submaps.clear();
        self.constraints.clear();
        self.current = None;
        self.next_id = 0;
        self.last_spawn_frame = 0;
    }
}
