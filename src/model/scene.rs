use glam::{Mat4, Quat, Vec3};

use crate::config::{color_to_rgb, StageConfig};

/// Handle to a model added to a [`Scene`]. Models are never removed, so ids stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(pub usize);

#[derive(Debug, Clone, Default)]
pub struct MorphTarget {
    pub position_deltas: Vec<[f32; 3]>,
    pub normal_deltas: Vec<[f32; 3]>,
}

/// CPU geometry of one node, with optional morph targets.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub morph_targets: Vec<MorphTarget>,
    pub color: [f32; 4],
}

impl MeshData {
    pub fn has_morphs(&self) -> bool {
        !self.morph_targets.is_empty()
    }

    /// Positions and normals with `weights` applied. Missing weights count as zero.
    pub fn blended(&self, weights: &[f32]) -> (Vec<[f32; 3]>, Vec<[f32; 3]>) {
        let mut positions = self.positions.clone();
        let mut normals = self.normals.clone();
        for (target, &w) in self.morph_targets.iter().zip(weights) {
            if w == 0.0 {
                continue;
            }
            for (p, d) in positions.iter_mut().zip(&target.position_deltas) {
                p[0] += d[0] * w;
                p[1] += d[1] * w;
                p[2] += d[2] * w;
            }
            for (n, d) in normals.iter_mut().zip(&target.normal_deltas) {
                n[0] += d[0] * w;
                n[1] += d[1] * w;
                n[2] += d[2] * w;
            }
        }
        (positions, normals)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    /// Always a lower index than this node.
    pub parent: Option<usize>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<MeshData>,
    pub weights: Vec<f32>,
}

impl Node {
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// A loaded model: node 0 is the root, every other node descends from it.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Model {
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.nodes[0]
    }

    pub fn position(&self) -> Vec3 {
        self.root().translation
    }

    /// Place the model: position replaces the root translation, scale multiplies it.
    pub fn place(&mut self, position: Vec3, scale: f32) {
        let root = self.root_mut();
        root.translation = position;
        root.scale *= scale;
    }

    /// World matrix of every node, in node order.
    pub fn world_matrices(&self) -> Vec<Mat4> {
        let mut out: Vec<Mat4> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let local = node.local_matrix();
            let world = match node.parent {
                Some(p) if p < out.len() => out[p] * local,
                _ => local,
            };
            out.push(world);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub color: [f32; 3],
    pub intensity: f32,
    pub position: Vec3,
}

impl DirectionalLight {
    /// Direction light travels, from its position towards the origin.
    pub fn direction(&self) -> Vec3 {
        (-self.position).normalize_or_zero()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Grid {
    pub size: f32,
    pub divisions: u32,
}

impl Grid {
    /// Line segments in the XZ plane, centred on the origin.
    pub fn line_segments(&self) -> Vec<([f32; 3], [f32; 3])> {
        let half = self.size / 2.0;
        let step = self.size / self.divisions.max(1) as f32;
        let mut lines = Vec::with_capacity(2 * (self.divisions as usize + 1));
        for i in 0..=self.divisions {
            let k = -half + i as f32 * step;
            lines.push(([-half, 0.0, k], [half, 0.0, k]));
            lines.push(([k, 0.0, -half], [k, 0.0, half]));
        }
        lines
    }
}

pub struct Scene {
    pub background: [f32; 3],
    pub directional: DirectionalLight,
    pub ambient: AmbientLight,
    pub grid: Grid,
    models: Vec<Model>,
}

impl Scene {
    pub fn new(config: &StageConfig) -> Self {
        Self {
            background: color_to_rgb(config.background),
            directional: DirectionalLight {
                color: color_to_rgb(config.directional_light.color),
                intensity: config.directional_light.intensity,
                position: Vec3::from(config.directional_light.position),
            },
            ambient: AmbientLight {
                color: color_to_rgb(config.ambient_light.color),
                intensity: config.ambient_light.intensity,
            },
            grid: Grid {
                size: config.grid.size,
                divisions: config.grid.divisions,
            },
            models: Vec::new(),
        }
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        self.models.get_mut(id.0)
    }

    pub fn models(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.models.iter().enumerate().map(|(i, m)| (ModelId(i), m))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node(parent: Option<usize>, translation: Vec3) -> Node {
        Node {
            name: None,
            parent,
            translation,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: None,
            weights: Vec::new(),
        }
    }

    pub(crate) fn two_node_model() -> Model {
        Model {
            name: "test".into(),
            nodes: vec![node(None, Vec3::ZERO), node(Some(0), Vec3::new(0.0, 1.0, 0.0))],
        }
    }

    #[test]
    fn place_overrides_translation_and_multiplies_scale() {
        let mut model = two_node_model();
        model.root_mut().translation = Vec3::new(5.0, 5.0, 5.0);
        model.root_mut().scale = Vec3::splat(2.0);
        model.place(Vec3::new(-7.5, 0.0, -10.0), 0.125);
        assert_eq!(model.position(), Vec3::new(-7.5, 0.0, -10.0));
        assert_eq!(model.root().scale, Vec3::splat(0.25));
    }

    #[test]
    fn child_world_matrix_includes_parent() {
        let mut model = two_node_model();
        model.place(Vec3::new(1.0, 0.0, 0.0), 2.0);
        let worlds = model.world_matrices();
        let child_origin = worlds[1].transform_point3(Vec3::ZERO);
        assert!((child_origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn morph_weights_blend_deltas() {
        let mesh = MeshData {
            positions: vec![[0.0, 0.0, 0.0]],
            normals: vec![[0.0, 1.0, 0.0]],
            indices: vec![0],
            morph_targets: vec![
                MorphTarget { position_deltas: vec![[1.0, 0.0, 0.0]], normal_deltas: vec![] },
                MorphTarget { position_deltas: vec![[0.0, 2.0, 0.0]], normal_deltas: vec![] },
            ],
            color: [1.0; 4],
        };
        let (p, n) = mesh.blended(&[0.5, 0.25]);
        assert_eq!(p[0], [0.5, 0.5, 0.0]);
        assert_eq!(n[0], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn grid_has_two_lines_per_division_boundary() {
        let grid = Grid { size: 1000.0, divisions: 100 };
        let lines = grid.line_segments();
        assert_eq!(lines.len(), 202);
        assert_eq!(lines[0].0, [-500.0, 0.0, -500.0]);
    }

    #[test]
    fn scene_ids_are_stable_insertion_indices() {
        let mut scene = Scene::new(&StageConfig::default());
        assert!(scene.is_empty());
        let a = scene.add_model(two_node_model());
        let b = scene.add_model(two_node_model());
        assert_eq!((a, b), (ModelId(0), ModelId(1)));
        assert_eq!(scene.len(), 2);
        assert!(scene.model(ModelId(2)).is_none());
    }
}
