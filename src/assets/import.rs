//! glTF to CPU model: the first root node's subtree plus all animation clips.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Quat, Vec3};
use gltf::animation::util::ReadOutputs;

use crate::error::AssetError;
use crate::model::{
    AnimationClip, Interpolation, KeyframeTrack, MeshData, Model, MorphTarget, Node, TrackValues,
};

use super::LoadedModel;

const DEFAULT_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

#[cfg(not(target_arch = "wasm32"))]
pub fn load_path(path: &std::path::Path) -> Result<LoadedModel, AssetError> {
    let name = path.display().to_string();
    let (doc, buffers, _images) = gltf::import(path).map_err(|source| AssetError::Gltf {
        path: name.clone(),
        source,
    })?;
    build(&name, &doc, &buffers)
}

/// Parse a self-contained glTF (`.glb`, or `.gltf` with embedded buffers).
pub fn load_slice(name: &str, bytes: &[u8]) -> Result<LoadedModel, AssetError> {
    let (doc, buffers, _images) = gltf::import_slice(bytes).map_err(|source| AssetError::Gltf {
        path: name.to_string(),
        source,
    })?;
    build(name, &doc, &buffers)
}

pub fn build(
    name: &str,
    doc: &gltf::Document,
    buffers: &[gltf::buffer::Data],
) -> Result<LoadedModel, AssetError> {
    let root = doc
        .default_scene()
        .or_else(|| doc.scenes().next())
        .and_then(|scene| scene.nodes().next())
        .ok_or_else(|| AssetError::EmptyScene {
            path: name.to_string(),
        })?;

    // Flatten depth-first so parents precede children
    let mut nodes = Vec::new();
    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut stack = vec![(root, None::<usize>)];
    while let Some((node, parent)) = stack.pop() {
        let index = nodes.len();
        remap.insert(node.index(), index);
        nodes.push(read_node(&node, parent, buffers));
        let children: Vec<_> = node.children().collect();
        for child in children.into_iter().rev() {
            stack.push((child, Some(index)));
        }
    }

    let clips = doc
        .animations()
        .map(|anim| Arc::new(read_clip(&anim, &remap, buffers)))
        .collect::<Vec<_>>();

    tracing::debug!(
        "{}: {} nodes, {} clips",
        name,
        nodes.len(),
        clips.len()
    );

    Ok(LoadedModel {
        model: Model {
            name: name.to_string(),
            nodes,
        },
        clips,
    })
}

fn read_node(node: &gltf::Node, parent: Option<usize>, buffers: &[gltf::buffer::Data]) -> Node {
    let (t, r, s) = node.transform().decomposed();
    let mesh = node.mesh().and_then(|m| read_mesh(&m, buffers));
    let weights = node
        .weights()
        .map(<[f32]>::to_vec)
        .or_else(|| node.mesh().and_then(|m| m.weights().map(<[f32]>::to_vec)))
        .unwrap_or_default();
    Node {
        name: node.name().map(str::to_string),
        parent,
        translation: Vec3::from(t),
        rotation: Quat::from_array(r).normalize(),
        scale: Vec3::from(s),
        mesh,
        weights,
    }
}

/// All primitives of a mesh merged into one vertex/index set.
fn read_mesh(mesh: &gltf::Mesh, buffers: &[gltf::buffer::Data]) -> Option<MeshData> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut morph_targets: Vec<MorphTarget> = Vec::new();
    let mut color = None;

    for prim in mesh.primitives() {
        if prim.mode() != gltf::mesh::Mode::Triangles {
            continue;
        }
        let reader = prim.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let Some(pos) = reader.read_positions() else {
            continue;
        };
        let pos: Vec<[f32; 3]> = pos.collect();
        let count = pos.len();
        let base = positions.len();
        let nrm: Vec<[f32; 3]> = match reader.read_normals() {
            Some(it) => it.collect(),
            None => vec![[0.0, 1.0, 0.0]; count],
        };

        match reader.read_indices() {
            Some(it) => indices.extend(it.into_u32().map(|i| base as u32 + i)),
            None => indices.extend((0..count as u32).map(|i| base as u32 + i)),
        }

        for (i, (p_deltas, n_deltas, _)) in reader.read_morph_targets().enumerate() {
            if morph_targets.len() <= i {
                morph_targets.push(MorphTarget {
                    position_deltas: vec![[0.0; 3]; base],
                    normal_deltas: vec![[0.0; 3]; base],
                });
            }
            let target = &mut morph_targets[i];
            let mut p: Vec<[f32; 3]> = p_deltas.map(|it| it.collect()).unwrap_or_default();
            let mut n: Vec<[f32; 3]> = n_deltas.map(|it| it.collect()).unwrap_or_default();
            p.resize(count, [0.0; 3]);
            n.resize(count, [0.0; 3]);
            target.position_deltas.extend(p);
            target.normal_deltas.extend(n);
        }

        positions.extend(pos);
        normals.extend(nrm);

        // Targets this primitive lacks stay zero for its vertices
        for target in &mut morph_targets {
            target.position_deltas.resize(positions.len(), [0.0; 3]);
            target.normal_deltas.resize(positions.len(), [0.0; 3]);
        }

        if color.is_none() {
            color = Some(prim.material().pbr_metallic_roughness().base_color_factor());
        }
    }

    if positions.is_empty() {
        return None;
    }
    Some(MeshData {
        positions,
        normals,
        indices,
        morph_targets,
        color: color.unwrap_or(DEFAULT_COLOR),
    })
}

fn read_clip(
    anim: &gltf::Animation,
    remap: &HashMap<usize, usize>,
    buffers: &[gltf::buffer::Data],
) -> AnimationClip {
    let mut tracks = Vec::new();
    for ch in anim.channels() {
        // Channels aimed outside the model's subtree have nothing to drive
        let Some(&node) = remap.get(&ch.target().node().index()) else {
            continue;
        };
        let reader = ch.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let Some(inputs) = reader.read_inputs() else {
            continue;
        };
        let times: Vec<f32> = inputs.collect();
        if times.is_empty() {
            continue;
        }
        let Some(outputs) = reader.read_outputs() else {
            continue;
        };

        let cubic = ch.sampler().interpolation() == gltf::animation::Interpolation::CubicSpline;
        let interpolation = match ch.sampler().interpolation() {
            gltf::animation::Interpolation::Step => Interpolation::Step,
            _ => Interpolation::Linear,
        };

        let values = match outputs {
            ReadOutputs::Translations(it) => {
                TrackValues::Translation(spline_values(it.map(Vec3::from).collect(), cubic))
            }
            ReadOutputs::Rotations(it) => TrackValues::Rotation(spline_values(
                it.into_f32().map(|q| Quat::from_array(q).normalize()).collect(),
                cubic,
            )),
            ReadOutputs::Scales(it) => {
                TrackValues::Scale(spline_values(it.map(Vec3::from).collect(), cubic))
            }
            ReadOutputs::MorphTargetWeights(it) => {
                let raw: Vec<f32> = it.into_f32().collect();
                let Some(values) = weight_values(raw, times.len(), cubic) else {
                    tracing::warn!(
                        "animation '{}': weight output does not match {} keys, track skipped",
                        anim.name().unwrap_or(""),
                        times.len()
                    );
                    continue;
                };
                values
            }
        };

        tracks.push(KeyframeTrack {
            node,
            times,
            values,
            interpolation,
        });
    }
    AnimationClip::new(anim.name().unwrap_or("").to_string(), tracks)
}

/// Morph weight keys, flattened, with tangents dropped for cubic splines.
/// `None` when the output length is not a whole number of weights per key.
fn weight_values(raw: Vec<f32>, keys: usize, cubic: bool) -> Option<TrackValues> {
    let stride = if cubic { 3 } else { 1 };
    let per_key = raw.len() / (keys * stride);
    if per_key == 0 || raw.len() != keys * stride * per_key {
        return None;
    }
    let values = if cubic {
        raw.chunks_exact(per_key * 3)
            .flat_map(|block| block[per_key..per_key * 2].iter().copied())
            .collect()
    } else {
        raw
    };
    Some(TrackValues::Weights { values, per_key })
}

/// Cubic spline keys come as (in-tangent, value, out-tangent); keep the values.
fn spline_values<T: Copy>(raw: Vec<T>, cubic: bool) -> Vec<T> {
    if cubic {
        raw.chunks(3).filter_map(|c| c.get(1).copied()).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spline_values_keeps_middle_of_each_triplet() {
        let raw = vec![0, 1, 2, 3, 4, 5];
        assert_eq!(spline_values(raw.clone(), true), vec![1, 4]);
        assert_eq!(spline_values(raw.clone(), false), raw);
    }

    #[test]
    fn garbage_bytes_are_a_gltf_error() {
        let err = load_slice("junk.glb", b"definitely not gltf").unwrap_err();
        assert!(matches!(err, AssetError::Gltf { .. }));
    }

    #[test]
    fn scene_without_nodes_is_empty_scene_error() {
        let json = br#"{"asset":{"version":"2.0"}}"#;
        let err = load_slice("empty.gltf", json).unwrap_err();
        assert!(matches!(err, AssetError::EmptyScene { .. }));
    }

    #[test]
    fn node_hierarchy_is_flattened_parent_first() {
        let json = br#"{
            "asset": {"version": "2.0"},
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {"name": "root", "children": [1, 2], "translation": [1.0, 2.0, 3.0]},
                {"name": "a", "children": [3]},
                {"name": "b", "scale": [2.0, 2.0, 2.0]},
                {"name": "a1"}
            ]
        }"#;
        let loaded = load_slice("tree.gltf", json).unwrap();
        let names: Vec<_> = loaded
            .model
            .nodes
            .iter()
            .map(|n| n.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert_eq!(loaded.model.nodes[2].parent, Some(1));
        assert_eq!(loaded.model.nodes[3].parent, Some(0));
        assert_eq!(loaded.model.position(), Vec3::new(1.0, 2.0, 3.0));
        assert!(loaded.clips.is_empty());
    }

    #[test]
    fn weight_values_rejects_lengths_that_do_not_fit_the_keys() {
        assert!(weight_values(vec![0.5], 1, true).is_none());
        assert!(weight_values(vec![0.0; 7], 2, true).is_none());
        assert!(weight_values(vec![0.0; 3], 2, false).is_none());
        match weight_values(vec![9.0, 1.0, 9.0, 9.0, 2.0, 9.0], 2, true) {
            Some(TrackValues::Weights { values, per_key }) => {
                assert_eq!(per_key, 1);
                assert_eq!(values, vec![1.0, 2.0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_cubic_weight_output_skips_the_track() {
        // One key, one float: not even a single (in, value, out) triplet
        let json = br#"{
            "asset": {"version": "2.0"},
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [{"name": "root"}],
            "buffers": [{"byteLength": 8, "uri": "data:application/octet-stream;base64,AAAAAAAAAD8="}],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 4},
                {"buffer": 0, "byteOffset": 4, "byteLength": 4}
            ],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 1, "type": "SCALAR", "min": [0.0], "max": [0.0]},
                {"bufferView": 1, "componentType": 5126, "count": 1, "type": "SCALAR"}
            ],
            "animations": [{
                "name": "broken",
                "samplers": [{"input": 0, "output": 1, "interpolation": "CUBICSPLINE"}],
                "channels": [{"sampler": 0, "target": {"node": 0, "path": "weights"}}]
            }]
        }"#;
        let loaded = load_slice("broken.gltf", json).unwrap();
        assert_eq!(loaded.clips.len(), 1);
        assert!(loaded.clips[0].tracks.is_empty());
    }

    #[test]
    fn translation_channels_target_flattened_nodes() {
        // glTF node 0 is the child, so it lands at index 1 after flattening
        let json = br#"{
            "asset": {"version": "2.0"},
            "scene": 0,
            "scenes": [{"nodes": [1]}],
            "nodes": [{"name": "arm"}, {"name": "root", "children": [0]}],
            "buffers": [{"byteLength": 104, "uri": "data:application/octet-stream;base64,AAAAAAAAgD8AAAAAAAAAAAAAAAAAAAAAAAAAQAAAAAAAABBBAAAQQQAAEEEAAAAAAACAPwAAAAAAABBBAAAQQQAAEEEAABBBAAAQQQAAEEEAAAAAAABAQAAAAAAAABBBAAAQQQAAEEE="}],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 8},
                {"buffer": 0, "byteOffset": 8, "byteLength": 24},
                {"buffer": 0, "byteOffset": 32, "byteLength": 72}
            ],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0.0], "max": [1.0]},
                {"bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC3"},
                {"bufferView": 2, "componentType": 5126, "count": 6, "type": "VEC3"}
            ],
            "animations": [
                {
                    "name": "lift",
                    "samplers": [{"input": 0, "output": 1, "interpolation": "LINEAR"}],
                    "channels": [{"sampler": 0, "target": {"node": 0, "path": "translation"}}]
                },
                {
                    "name": "lift_smooth",
                    "samplers": [{"input": 0, "output": 2, "interpolation": "CUBICSPLINE"}],
                    "channels": [{"sampler": 0, "target": {"node": 0, "path": "translation"}}]
                }
            ]
        }"#;
        let loaded = load_slice("arm.gltf", json).unwrap();
        assert_eq!(loaded.model.nodes[1].name.as_deref(), Some("arm"));
        assert_eq!(loaded.clips.len(), 2);

        let linear = &loaded.clips[0];
        assert_eq!(linear.name, "lift");
        assert_eq!(linear.duration, 1.0);
        assert_eq!(linear.tracks[0].node, 1);
        match &linear.tracks[0].values {
            TrackValues::Translation(v) => assert_eq!(v, &vec![Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)]),
            other => panic!("unexpected {other:?}"),
        }

        let cubic = &loaded.clips[1];
        assert_eq!(cubic.tracks[0].node, 1);
        assert_eq!(cubic.tracks[0].interpolation, Interpolation::Linear);
        match &cubic.tracks[0].values {
            TrackValues::Translation(v) => {
                assert_eq!(v, &vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 3.0, 0.0)])
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
