//! Ordering of the render passes within one frame.

/// One recorded operation of a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameStep {
    /// Copy the terrain's cached light-space depth into the scene map.
    CopyCachedShadow,
    /// Terrain depth from the light.
    TerrainShadow,
    /// Object depth from the light.
    ObjectShadows,
    Skybox,
    Terrain,
    /// Objects, sampling the scene shadow map.
    Objects,
}

impl FrameStep {
    pub fn writes_shadow_map(self) -> bool {
        matches!(
            self,
            FrameStep::CopyCachedShadow | FrameStep::TerrainShadow | FrameStep::ObjectShadows
        )
    }

    pub fn samples_shadow_map(self) -> bool {
        matches!(self, FrameStep::Terrain | FrameStep::Objects)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassKind {
    /// Depth only, rendered into the scene shadow map.
    Shadow,
    /// Surface color plus the scene depth buffer.
    Color,
}

/// How a pass starts its depth attachment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DepthLoad {
    Clear,
    /// Keep the contents, which a preceding copy wrote.
    Load,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub kind: PassKind,
    pub color_attachments: usize,
    pub depth_load: DepthLoad,
    /// Work recorded before the pass begins, outside of it.
    pub before: Vec<FrameStep>,
    pub steps: Vec<FrameStep>,
}

/// The passes of one frame, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    pub passes: Vec<PassPlan>,
}

impl FramePlan {
    /// Plans a frame.
    ///
    /// * `shadow_map` - a scene shadow map exists
    /// * `cached_terrain_shadow` - the terrain keeps its own light-space depth
    /// * `terrain` - a terrain is present
    pub fn new(shadow_map: bool, cached_terrain_shadow: bool, terrain: bool) -> Self {
        let mut passes = Vec::with_capacity(2);

        if shadow_map {
            let cached = terrain && cached_terrain_shadow;
            let mut steps = Vec::new();
            if terrain && !cached {
                steps.push(FrameStep::TerrainShadow);
            }
            steps.push(FrameStep::ObjectShadows);
            passes.push(PassPlan {
                kind: PassKind::Shadow,
                color_attachments: 0,
                depth_load: if cached { DepthLoad::Load } else { DepthLoad::Clear },
                before: if cached { vec![FrameStep::CopyCachedShadow] } else { Vec::new() },
                steps,
            });
        }

        let mut steps = vec![FrameStep::Skybox];
        if terrain {
            steps.push(FrameStep::Terrain);
        }
        steps.push(FrameStep::Objects);
        passes.push(PassPlan {
            kind: PassKind::Color,
            color_attachments: 1,
            depth_load: DepthLoad::Clear,
            before: Vec::new(),
            steps,
        });

        Self { passes }
    }

    pub fn shadow_pass(&self) -> Option<&PassPlan> {
        self.passes.iter().find(|pass| pass.kind == PassKind::Shadow)
    }

    pub fn color_pass(&self) -> Option<&PassPlan> {
        self.passes.iter().find(|pass| pass.kind == PassKind::Color)
    }

    /// Every step in recording order, including the ones outside passes.
    pub fn steps(&self) -> impl Iterator<Item = FrameStep> + '_ {
        self.passes
            .iter()
            .flat_map(|pass| pass.before.iter().chain(pass.steps.iter()).copied())
    }

    /// True when no step samples the shadow map before every write to it
    /// has been recorded in an earlier pass.
    pub fn shadow_writes_precede_samples(&self) -> bool {
        let mut seen_sample = false;
        for pass in &self.passes {
            let samples = pass.steps.iter().any(|step| step.samples_shadow_map());
            let writes = pass
                .before
                .iter()
                .chain(pass.steps.iter())
                .any(|step| step.writes_shadow_map());
            if writes && (seen_sample || samples) {
                return false;
            }
            seen_sample |= samples;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_pass_has_no_color_attachments() {
        let plan = FramePlan::new(true, false, true);
        let shadow = plan.shadow_pass().unwrap();
        assert_eq!(shadow.color_attachments, 0);
        assert_eq!(shadow.depth_load, DepthLoad::Clear);
        assert_eq!(shadow.steps, vec![FrameStep::TerrainShadow, FrameStep::ObjectShadows]);
    }

    #[test]
    fn test_shadow_precedes_color() {
        let plan = FramePlan::new(true, false, true);
        assert_eq!(plan.passes[0].kind, PassKind::Shadow);
        assert_eq!(plan.passes[1].kind, PassKind::Color);
        assert!(plan.shadow_writes_precede_samples());
    }

    #[test]
    fn test_cached_terrain_shadow_is_copied_and_loaded() {
        let plan = FramePlan::new(true, true, true);
        let shadow = plan.shadow_pass().unwrap();
        assert_eq!(shadow.before, vec![FrameStep::CopyCachedShadow]);
        assert_eq!(shadow.depth_load, DepthLoad::Load);
        assert!(!shadow.steps.contains(&FrameStep::TerrainShadow));
        assert!(plan.shadow_writes_precede_samples());
    }

    #[test]
    fn test_no_shadow_map_means_color_only() {
        let plan = FramePlan::new(false, false, true);
        assert_eq!(plan.passes.len(), 1);
        let steps: Vec<_> = plan.steps().collect();
        assert_eq!(steps, vec![FrameStep::Skybox, FrameStep::Terrain, FrameStep::Objects]);
    }

    #[test]
    fn test_without_terrain() {
        let plan = FramePlan::new(true, true, false);
        let shadow = plan.shadow_pass().unwrap();
        assert!(shadow.before.is_empty());
        assert_eq!(shadow.steps, vec![FrameStep::ObjectShadows]);
        assert_eq!(plan.color_pass().unwrap().steps, vec![FrameStep::Skybox, FrameStep::Objects]);
    }

    #[test]
    fn test_misordered_plan_is_detected() {
        let mut plan = FramePlan::new(true, false, true);
        plan.passes.reverse();
        assert!(!plan.shadow_writes_precede_samples());
    }
}
