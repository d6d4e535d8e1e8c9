//! Per-frame orchestration: track, integrate, manage submaps, optimize.
use log::{debug, info, warn};
use nalgebra::Vector3;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    image::DepthFrame,
    params::Params,
    pointcloud::PointCloud,
    pose_graph::PoseGraph,
    range_image::{RangeImage, RangeImageBuilder},
    render::Shading,
    submap::{MapUpdate, Submap, SubmapId, SubmapManager},
    tracker::Tracker,
    trajectory::Trajectory,
    transform::Transform,
    volume::{IntegrationSummary, TsdfVolume},
};

/// What happened to a processed frame.
#[derive(Clone, Debug)]
pub struct FrameStatus {
    pub frame_index: usize,
    /// Camera to world.
    pub camera_pose: Transform,
    /// Tracking reference of the frame.
    pub current_submap: SubmapId,
    /// Submaps whose pose came from their own alignment.
    pub tracked: Vec<SubmapId>,
    pub integrated: Vec<SubmapId>,
    pub spawned: Option<SubmapId>,
    pub retired: Vec<SubmapId>,
    pub optimized: bool,
    /// The current submap ran out of units and the frame was not integrated into it.
    pub resource_exhausted: bool,
}

/// Large scale reconstruction from a stream of depth frames.
///
/// The map is split in submaps, each with its own TSDF volume. Frames are tracked against the
/// surface of the current submap and fused into the active ones. Submaps are linked by
/// relative pose constraints that are periodically optimized to keep the map consistent.
pub struct ReconstructionEngine {
    params: Params,
    tracker: Tracker,
    builder: RangeImageBuilder,
    shading: Shading,
    submaps: SubmapManager,
    pose_graph: PoseGraph,
    trajectory: Trajectory,
    frame_count: usize,
    last_optimization_frame: usize,
}

impl ReconstructionEngine {
    /// Fails with [`Error::InvalidConfiguration`] on invalid parameters.
    pub fn new(params: Params) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            tracker: Tracker::new(params.icp_params()),
            builder: RangeImageBuilder::default().pyramid_levels(params.pyramid_levels),
            shading: Shading::default(),
            submaps: SubmapManager::new(params.submap.clone(), params.volume.clone()),
            pose_graph: PoseGraph::new(),
            trajectory: Trajectory::default(),
            frame_count: 0,
            last_optimization_frame: 0,
            params,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Processes a frame. Returns false when the frame is rejected or tracking is lost, leaving the
    /// engine as before the call, and when the current submap ran out of units. The frame is then not
    /// fused into it, and if it already holds data a new submap takes over.
    pub fn update(&mut self, frame: &DepthFrame) -> bool {
        match self.try_update(frame) {
            Ok(status) => !status.resource_exhausted,
            Err(err) => {
                warn!("frame {} dropped: {}", self.frame_count, err);
                false
            }
        }
    }

    /// Same as [`ReconstructionEngine::update`] for raw depth in sensor units, scaled by `depth_factor`.
    pub fn update_raw(&mut self, depth: &ArrayView2<u16>) -> bool {
        match DepthFrame::from_raw_depth(self.params.intrinsics.clone(), depth, self.params.depth_factor)
        {
            Ok(frame) => self.update(&frame),
            Err(err) => {
                warn!("frame {} dropped: {}", self.frame_count, err);
                false
            }
        }
    }

    fn check_frame(&self, frame: &DepthFrame) -> Result<()> {
        if frame.width() != self.params.width() || frame.height() != self.params.height() {
            return Err(Error::InvalidFrame(format!(
                "{}x{} frame, the engine expects {}x{}",
                frame.width(),
                frame.height(),
                self.params.width(),
                self.params.height()
            )));
        }
        Ok(())
    }

    /// Processes a frame and reports what happened to it.
    ///
    /// Fails with [`Error::InvalidFrame`] or [`Error::TrackingLost`] without changing the engine.
    pub fn try_update(&mut self, frame: &DepthFrame) -> Result<FrameStatus> {
        self.check_frame(frame)?;
        let frame = frame.clone().truncate(self.params.truncate_threshold);
        let pyramid = self.builder.build(&frame);

        let current_id = match self.submaps.current_id() {
            Some(id) => id,
            None => return self.start(&frame, pyramid),
        };
        let frame_index = self.frame_count;

        // Nothing is modified until the current submap is tracked.
        let (camera_poses, tracked, tracking_healthy) =
            self.track(&pyramid, current_id).map_err(|err| {
                warn!("tracking lost at frame {}: {}", frame_index, err);
                err
            })?;

        for (id, camera_pose) in camera_poses {
            if let Some(submap) = self.submaps.get_mut(id) {
                submap.camera_pose = camera_pose;
            }
        }

        let (integrated, resource_exhausted) = self.integrate(&frame, current_id)?;
        self.refresh_active();
        self.submaps.record_observations(&tracked);

        let update = self.submaps.update_map(
            frame_index,
            tracking_healthy,
            resource_exhausted,
            &pyramid,
        )?;
        self.apply_map_update(&update)?;
        let optimized = self.optimize_if_due(frame_index);

        let camera_pose = self
            .submaps
            .get(current_id)
            .map(|submap| submap.camera_in_world())
            .unwrap_or_default();
        self.trajectory.push(
            camera_pose,
            frame.timestamp.unwrap_or(frame_index as f64),
        );
        self.frame_count += 1;

        debug!(
            "frame {}: tracked {:?}, integrated {:?}, current visibility {:.3}",
            frame_index,
            tracked,
            integrated,
            self.submaps
                .get(current_id)
                .map(|submap| submap.visibility_ratio)
                .unwrap_or(0.0)
        );

        Ok(FrameStatus {
            frame_index,
            camera_pose,
            current_submap: current_id,
            tracked,
            integrated,
            spawned: update.spawned.map(|edge| edge.to),
            retired: update.retired,
            optimized,
            resource_exhausted,
        })
    }

    /// The first frame defines the world frame and the first submap.
    fn start(&mut self, frame: &DepthFrame, pyramid: Vec<RangeImage>) -> Result<FrameStatus> {
        let frame_index = self.frame_count;
        let id = self.submaps.spawn_first(Transform::eye(), frame_index)?;
        self.pose_graph.add_node(id, Transform::eye());

        let (width, height, levels) = (
            self.params.width(),
            self.params.height(),
            self.params.pyramid_levels,
        );
        let intrinsics = self.params.intrinsics.clone();

        let mut integrated = Vec::new();
        let mut resource_exhausted = false;
        if let Some(submap) = self.submaps.current_mut() {
            submap.set_model(pyramid);
            match submap.integrate(frame) {
                Ok(_) => {
                    integrated.push(id);
                    submap.refresh_model(&intrinsics, width, height, levels);
                }
                Err(Error::ResourceExhausted { required, budget }) => {
                    warn!(
                        "{} is out of units ({} > {}), frame not integrated",
                        id, required, budget
                    );
                    resource_exhausted = true;
                }
                Err(err) => return Err(err),
            }
            submap.update_visibility(&intrinsics, width, height);
        }

        self.trajectory.push(
            Transform::eye(),
            frame.timestamp.unwrap_or(frame_index as f64),
        );
        self.frame_count += 1;

        Ok(FrameStatus {
            frame_index,
            camera_pose: Transform::eye(),
            current_submap: id,
            tracked: Vec::new(),
            integrated,
            spawned: Some(id),
            retired: Vec::new(),
            optimized: false,
            resource_exhausted,
        })
    }

    /// Camera pose of the frame in every active submap, the submaps tracked on their own and
    /// whether the current tracking is healthy. Fails only if the current submap is lost.
    fn track(
        &self,
        pyramid: &[RangeImage],
        current_id: SubmapId,
    ) -> Result<(Vec<(SubmapId, Transform)>, Vec<SubmapId>, bool)> {
        let current = self
            .submaps
            .get(current_id)
            .ok_or_else(|| Error::tracking_lost(format!("{current_id} does not exist")))?;
        let result = self.tracker.track(pyramid, current)?;
        let tracking_healthy =
            result.converged || result.residual.sqrt() < self.params.icp_huber_delta;
        let camera_in_world = &current.pose * &result.camera_pose;

        let mut camera_poses = vec![(current_id, result.camera_pose)];
        let mut tracked = vec![current_id];
        for id in self.submaps.active_ids() {
            if id == current_id {
                continue;
            }
            let submap = match self.submaps.get(id) {
                Some(submap) => submap,
                None => continue,
            };
            let derived = &submap.pose.inverse() * &camera_in_world;
            let camera_pose = if self.params.submap.track_all_active {
                match self.tracker.track(pyramid, submap) {
                    Ok(result) => {
                        tracked.push(id);
                        result.camera_pose
                    }
                    Err(err) => {
                        debug!("{} not tracked, using the derived pose: {}", id, err);
                        derived
                    }
                }
            } else {
                derived
            };
            camera_poses.push((id, camera_pose));
        }

        Ok((camera_poses, tracked, tracking_healthy))
    }

    /// Fuses the frame into the integration targets that moved enough. Each target is a distinct
    /// volume, so they are integrated in parallel.
    fn integrate(
        &mut self,
        frame: &DepthFrame,
        current_id: SubmapId,
    ) -> Result<(Vec<SubmapId>, bool)> {
        let targets = self.submaps.integration_targets();
        let min_movement = self.params.min_camera_movement;

        let results: Vec<(SubmapId, Result<IntegrationSummary>)> = self
            .submaps
            .submaps_mut()
            .filter(|submap| targets.contains(&submap.id) && submap.has_moved(min_movement))
            .collect::<Vec<&mut Submap>>()
            .into_par_iter()
            .map(|submap| (submap.id, submap.integrate(frame)))
            .collect();

        let mut integrated = Vec::new();
        let mut resource_exhausted = false;
        for (id, result) in results {
            match result {
                Ok(_) => integrated.push(id),
                Err(Error::ResourceExhausted { required, budget }) => {
                    warn!(
                        "{} is out of units ({} > {}), frame not integrated",
                        id, required, budget
                    );
                    resource_exhausted |= id == current_id;
                }
                Err(err) => return Err(err),
            }
        }
        Ok((integrated, resource_exhausted))
    }

    /// New tracking models and visibility of the active submaps, from their new camera poses.
    fn refresh_active(&mut self) {
        let (width, height, levels) = (
            self.params.width(),
            self.params.height(),
            self.params.pyramid_levels,
        );
        let intrinsics = &self.params.intrinsics;

        for submap in self.submaps.submaps_mut().filter(|submap| submap.is_active()) {
            // Submaps without data keep the frame they were spawned with.
            if submap.integrated_frames > 0 {
                submap.refresh_model(intrinsics, width, height, levels);
            }
            submap.update_visibility(intrinsics, width, height);
        }
    }

    fn apply_map_update(&mut self, update: &MapUpdate) -> Result<()> {
        if let Some(edge) = &update.spawned {
            let pose = self
                .submaps
                .get(edge.to)
                .map(|submap| submap.pose)
                .unwrap_or_default();
            self.pose_graph.add_node(edge.to, pose);
            self.pose_graph
                .add_edge(edge.from, edge.to, edge.relative_pose, edge.weight)?;
        }
        for edge in update.refined.iter() {
            self.pose_graph
                .add_edge(edge.from, edge.to, edge.relative_pose, edge.weight)?;
        }
        Ok(())
    }

    /// Runs the pose graph optimization on its cadence. A failed pass keeps the poses.
    fn optimize_if_due(&mut self, frame_index: usize) -> bool {
        let every = self.params.pose_graph.optimize_every_frames;
        if every == 0
            || frame_index - self.last_optimization_frame < every
            || !self.pose_graph.is_dirty()
        {
            return false;
        }
        self.last_optimization_frame = frame_index;

        match self.pose_graph.optimize(&self.params.pose_graph) {
            Ok(summary) => {
                self.pose_graph.apply(&summary);
                for (id, pose) in summary.poses.iter() {
                    if let Some(submap) = self.submaps.get_mut(*id) {
                        submap.pose = *pose;
                    }
                }
                true
            }
            Err(err) => {
                warn!("{}, submap poses kept", err);
                false
            }
        }
    }

    /// Shaded surface of the current submap, seen from `camera_to_world`, or from the last
    /// tracked pose when `None`. Black before the first frame.
    pub fn render(&self, camera_to_world: Option<&Transform>) -> Array3<u8> {
        let (width, height) = (self.params.width(), self.params.height());
        let current = match self.submaps.current() {
            Some(current) => current,
            None => return Array3::zeros((height, width, 3)),
        };

        let camera_to_world = camera_to_world
            .copied()
            .unwrap_or_else(|| current.camera_in_world());
        let camera_pose = &current.pose.inverse() * &camera_to_world;
        let surface =
            current
                .volume
                .raycast(&camera_pose, &self.params.intrinsics, width, height);

        let light = camera_to_world
            .inverse()
            .transform_vector(&Vector3::from(self.params.light_pose));
        self.shading.render(&surface, &light)
    }

    /// Near surface points and normals of every submap, in the world frame, ordered by submap id.
    pub fn points_normals(&self) -> impl Iterator<Item = (Vector3<f32>, Vector3<f32>)> + '_ {
        self.submaps
            .submaps()
            .flat_map(|submap| submap.world_points_normals())
    }

    pub fn get_cloud(&self) -> PointCloud {
        PointCloud::from_points_normals(self.points_normals())
    }

    /// Near surface points in the world frame, shape (N, 3).
    pub fn get_points(&self) -> Array2<f32> {
        self.get_cloud().points
    }

    /// Normals of the distance field at world `points` (shape (N, 3)). The current submap is
    /// sampled first, then the others by id. Points outside of every surface get zero normals.
    pub fn get_normals(&self, points: &Array2<f32>) -> Array2<f32> {
        let current = self.submaps.current();
        let mut normals = Array2::<f32>::zeros((points.len_of(Axis(0)), 3));

        normals
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(points.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut normal, point)| {
                let point = Vector3::new(point[0], point[1], point[2]);
                let sampled = current
                    .and_then(|submap| submap.normal_at_world(&point))
                    .or_else(|| {
                        self.submaps
                            .submaps()
                            .filter(|submap| Some(submap.id) != current.map(|c| c.id))
                            .find_map(|submap| submap.normal_at_world(&point))
                    });
                if let Some(value) = sampled {
                    normal[0] = value[0];
                    normal[1] = value[1];
                    normal[2] = value[2];
                }
            });
        normals
    }

    /// Drops every submap, the pose graph and the trajectory.
    pub fn reset(&mut self) {
        self.submaps.reset();
        self.pose_graph.clear();
        self.trajectory.clear();
        self.frame_count = 0;
        self.last_optimization_frame = 0;
        info!("reconstruction reset");
    }

    /// Camera to world pose of the last processed frame.
    pub fn pose(&self) -> Transform {
        self.trajectory
            .last()
            .map(|(pose, _)| pose)
            .unwrap_or_default()
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn submaps(&self) -> &SubmapManager {
        &self.submaps
    }

    pub fn pose_graph(&self) -> &PoseGraph {
        &self.pose_graph
    }

    /// Frames processed since the creation or the last reset.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metrics::TransformMetrics, synthetic::SyntheticScene, unit_test::small_engine_params,
    };
    use ndarray::Array2;
    use rstest::*;

    fn wall_frame(params: &Params, distance: f32) -> DepthFrame {
        SyntheticScene::wall(distance).render_depth(
            &params.intrinsics,
            params.width(),
            params.height(),
            &Transform::eye(),
            0,
        )
    }

    #[rstest]
    fn should_reject_invalid_configuration(mut small_engine_params: Params) {
        small_engine_params.pyramid_levels = 2;
        assert!(matches!(
            ReconstructionEngine::new(small_engine_params),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    fn should_reject_frames_of_other_size(small_engine_params: Params) {
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();
        let frame = DepthFrame::new(
            engine.params().intrinsics.clone(),
            Array2::from_elem((10, 10), 1.0),
        );
        assert!(matches!(
            engine.try_update(&frame),
            Err(Error::InvalidFrame(_))
        ));
        assert!(!engine.update(&frame));
        assert_eq!(engine.frame_count(), 0);
    }

    #[rstest]
    fn should_start_map_with_first_frame(small_engine_params: Params) {
        let frame = wall_frame(&small_engine_params, 2.0);
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();

        let status = engine.try_update(&frame).unwrap();
        assert_eq!(status.spawned, Some(SubmapId(0)));
        assert_eq!(status.integrated, vec![SubmapId(0)]);
        assert_eq!(engine.pose_graph().anchor(), Some(SubmapId(0)));
        assert!(engine.get_points().len_of(Axis(0)) > 0);
    }

    #[rstest]
    fn should_keep_state_when_tracking_is_lost(small_engine_params: Params) {
        let frame = wall_frame(&small_engine_params, 2.0);
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();
        assert!(engine.update(&frame));

        let empty = DepthFrame::new(
            engine.params().intrinsics.clone(),
            Array2::zeros((engine.params().height(), engine.params().width())),
        );
        let points_before = engine.get_points();
        assert!(matches!(
            engine.try_update(&empty),
            Err(Error::TrackingLost(_))
        ));
        assert_eq!(engine.frame_count(), 1);
        assert_eq!(engine.trajectory().len(), 1);
        assert_eq!(engine.get_points(), points_before);
    }

    #[rstest]
    fn should_update_from_raw_depth(small_engine_params: Params) {
        let factor = small_engine_params.depth_factor;
        let raw = Array2::<u16>::from_elem(
            (small_engine_params.height(), small_engine_params.width()),
            (2.0 * factor) as u16,
        );
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();
        assert!(engine.update_raw(&raw.view()));
        assert_eq!(engine.submaps().len(), 1);
    }

    #[rstest]
    fn should_render_before_and_after_first_frame(small_engine_params: Params) {
        let frame = wall_frame(&small_engine_params, 2.0);
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();
        assert!(engine.render(None).iter().all(|v| *v == 0));

        engine.update(&frame);
        let image = engine.render(None);
        assert_eq!(image.shape(), &[120, 160, 3]);
        assert!(image[[60, 80, 0]] > 0);
        assert!(engine.render(Some(&Transform::eye())).iter().any(|v| *v > 0));
    }

    #[rstest]
    fn should_hand_over_when_out_of_units(small_engine_params: Params) {
        let room = SyntheticScene::room().render_depth(
            &small_engine_params.intrinsics,
            small_engine_params.width(),
            small_engine_params.height(),
            &Transform::eye(),
            0,
        );
        // Everything but the back wall: fewer units than the whole room.
        let near = room.clone().truncate(2.45);

        let units = {
            let mut engine = ReconstructionEngine::new(small_engine_params.clone()).unwrap();
            assert!(engine.update(&near));
            engine.submaps().get(SubmapId(0)).unwrap().volume.active_units()
        };

        let mut params = small_engine_params;
        params.volume.max_active_units = units;
        let mut engine = ReconstructionEngine::new(params).unwrap();
        assert!(engine.update(&near));

        let status = engine.try_update(&room).unwrap();
        assert!(status.resource_exhausted);
        assert!(status.integrated.is_empty());
        assert_eq!(status.spawned, Some(SubmapId(1)));
        assert_eq!(status.retired, vec![SubmapId(0)]);
        assert_eq!(status.camera_pose, engine.pose());
        assert!(TransformMetrics::new(&status.camera_pose, &Transform::eye()).translation < 0.01);
        assert_eq!(
            engine.submaps().get(SubmapId(0)).unwrap().volume.active_units(),
            units
        );

        // The empty child cannot hold the room either: the frame is dropped without spawning.
        assert!(!engine.update(&room));
        assert_eq!(engine.submaps().len(), 2);
        assert_eq!(engine.submaps().active_ids(), vec![SubmapId(1)]);
        assert_eq!(engine.submaps().current().unwrap().integrated_frames, 0);
        assert_eq!(engine.frame_count(), 3);
    }

    #[rstest]
    fn should_sample_field_normals(small_engine_params: Params) {
        let frame = wall_frame(&small_engine_params, 2.0);
        let mut engine = ReconstructionEngine::new(small_engine_params).unwrap();
        engine.update(&frame);

        let points = ndarray::array![[0.0, 0.0, 1.98], [0.0, 0.0, 10.0]];
        let normals = engine.get_normals(&points);
        assert!(normals[[0, 2]] < -0.9);
        assert_eq!(normals.row(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }
}
