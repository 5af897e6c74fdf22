use std::collections::HashMap;

use nalgebra::{Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde_json::Value;

/// MMD units per metre.
pub(crate) const MIKU_METER: f32 = 12.5;

// ─── Node hierarchy helpers ───────────────────────────────────────────────────

/// Collect child→parent node index mapping from glTF JSON.
pub(crate) fn collect_parent_index_map_from_json(json: &Value) -> HashMap<usize, usize> {
    let mut parent_map = HashMap::<usize, usize>::new();
    let Some(nodes) = json.get("nodes").and_then(Value::as_array) else {
        return parent_map;
    };

    for (parent_index, node) in nodes.iter().enumerate() {
        for child_index in node_children(node) {
            parent_map.entry(child_index).or_insert(parent_index);
        }
    }

    parent_map
}

pub(crate) fn node_children(node: &Value) -> impl Iterator<Item = usize> + '_ {
    node.get("children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|child| child.as_u64().map(|value| value as usize))
}

/// Scene roots: the default scene's node list, else every node without a parent.
pub(crate) fn collect_root_nodes(json: &Value, parent_map: &HashMap<usize, usize>) -> Vec<usize> {
    let scene_index = json.get("scene").and_then(Value::as_u64).unwrap_or(0) as usize;
    let scene_roots: Vec<usize> = json
        .get("scenes")
        .and_then(Value::as_array)
        .and_then(|scenes| scenes.get(scene_index))
        .and_then(|scene| scene.get("nodes"))
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|node| node.as_u64().map(|value| value as usize))
                .collect()
        })
        .unwrap_or_default();
    if !scene_roots.is_empty() {
        return scene_roots;
    }

    let node_count = json
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    (0..node_count)
        .filter(|index| !parent_map.contains_key(index))
        .collect()
}

/// Build local transform matrix from a glTF node JSON object.
pub(crate) fn node_to_local_matrix(node: &Value) -> Matrix4<f32> {
    if let Some(matrix) = node.get("matrix").and_then(Value::as_array)
        && matrix.len() == 16
    {
        let mut values = [0.0f32; 16];
        for (index, value) in matrix.iter().enumerate() {
            values[index] = value.as_f64().unwrap_or(0.0) as f32;
        }
        return Matrix4::from_column_slice(&values);
    }

    let translation = read_vec3(node, "translation", 0.0);
    let scale = read_vec3(node, "scale", 1.0);
    let rotation = node
        .get("rotation")
        .and_then(Value::as_array)
        .filter(|values| values.len() == 4)
        .map(|values| {
            UnitQuaternion::from_quaternion(Quaternion::new(
                values[3].as_f64().unwrap_or(1.0) as f32,
                values[0].as_f64().unwrap_or(0.0) as f32,
                values[1].as_f64().unwrap_or(0.0) as f32,
                values[2].as_f64().unwrap_or(0.0) as f32,
            ))
        })
        .unwrap_or_else(UnitQuaternion::identity);

    Translation3::from(translation).to_homogeneous()
        * rotation.to_homogeneous()
        * Matrix4::new_nonuniform_scaling(&scale)
}

fn read_vec3(node: &Value, key: &str, fallback: f64) -> Vector3<f32> {
    node.get(key)
        .and_then(Value::as_array)
        .filter(|values| values.len() == 3)
        .map(|values| {
            Vector3::new(
                values[0].as_f64().unwrap_or(fallback) as f32,
                values[1].as_f64().unwrap_or(fallback) as f32,
                values[2].as_f64().unwrap_or(fallback) as f32,
            )
        })
        .unwrap_or_else(|| Vector3::repeat(fallback as f32))
}

/// Compute world matrices from local transforms and parent links.
///
/// A parent chain that loops back on itself is cut at the repeated node.
pub(crate) fn compute_node_world_matrices(
    local_matrices: &[Matrix4<f32>],
    parent_map: &HashMap<usize, usize>,
) -> Vec<Matrix4<f32>> {
    let mut worlds = vec![Matrix4::<f32>::identity(); local_matrices.len()];
    let mut resolved = vec![false; local_matrices.len()];

    for index in 0..local_matrices.len() {
        let mut chain = vec![index];
        let mut cursor = index;
        while let Some(parent) = parent_map.get(&cursor).copied() {
            if parent >= local_matrices.len() || resolved[parent] || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            cursor = parent;
        }

        for node in chain.into_iter().rev() {
            if resolved[node] {
                continue;
            }
            let parent_world = parent_map
                .get(&node)
                .copied()
                .filter(|parent| *parent < local_matrices.len() && resolved[*parent])
                .map(|parent| worlds[parent])
                .unwrap_or_else(Matrix4::identity);
            worlds[node] = parent_world * local_matrices[node];
            resolved[node] = true;
        }
    }

    worlds
}

/// World-space node origins in glTF metres.
pub(crate) fn compute_node_world_positions(json: &Value) -> Vec<Vector3<f32>> {
    let nodes = json
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let parent_map = collect_parent_index_map_from_json(json);
    let locals: Vec<Matrix4<f32>> = nodes.iter().map(node_to_local_matrix).collect();
    compute_node_world_matrices(&locals, &parent_map)
        .iter()
        .map(|world| Vector3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]))
        .collect()
}

/// glTF (right-handed, metres) → PMX (left-handed, MMD units).
pub(crate) fn to_pmx_position(position: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(-position.x, position.y, position.z) * MIKU_METER
}

pub(crate) fn to_pmx_direction(direction: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(-direction.x, direction.y, direction.z)
}

// ─── VRM extension helpers ────────────────────────────────────────────────────

/// Humanoid bone role → node index, from VRM 0.x or VRMC_vrm 1.0.
pub(crate) fn extract_humanoid_bone_nodes(json: &Value) -> HashMap<String, usize> {
    let mut mapping = HashMap::<String, usize>::new();

    if let Some(vrmc_humanoid) = json
        .pointer("/extensions/VRMC_vrm/humanoid/humanBones")
        .and_then(Value::as_object)
    {
        for (bone_name, value) in vrmc_humanoid {
            if let Some(node_index) = value.get("node").and_then(Value::as_u64) {
                mapping.insert(bone_name.clone(), node_index as usize);
            }
        }
    }

    if let Some(vrm_humanoid) = json
        .pointer("/extensions/VRM/humanoid/humanBones")
        .and_then(Value::as_array)
    {
        for value in vrm_humanoid {
            let bone_name = value.get("bone").and_then(Value::as_str);
            let node_index = value.get("node").and_then(Value::as_u64);
            if let (Some(bone_name), Some(node_index)) = (bone_name, node_index) {
                mapping
                    .entry(bone_name.to_string())
                    .or_insert(node_index as usize);
            }
        }
    }

    mapping
}

/// Model title from VRM metadata.
pub(crate) fn extract_model_name(json: &Value) -> Option<String> {
    json.pointer("/extensions/VRM/meta/title")
        .or_else(|| json.pointer("/extensions/VRMC_vrm/meta/name"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(ToOwned::to_owned)
}

/// Author from VRM metadata or the asset copyright.
pub(crate) fn extract_author(json: &Value) -> Option<String> {
    json.pointer("/extensions/VRM/meta/author")
        .or_else(|| json.pointer("/extensions/VRMC_vrm/meta/authors/0"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .or_else(|| {
            json.pointer("/asset/copyright")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
}
