use std::collections::HashMap;

use nalgebra::Vector3;
use serde_json::Value;

use super::gltf_utils::collect_parent_index_map_from_json;
use super::reader::SourceAsset;
use super::skeleton::Skeleton;
use super::taxonomy::Taxonomy;
use crate::error::ConvertError;
use crate::pmx::SkinDeform;

const MAX_INFLUENCES: usize = 4;
const MIN_WEIGHT: f32 = 1e-7;

// ─── Joint slot lookup ────────────────────────────────────────────────────────

/// Bone of `node`, or of its nearest ancestor that has one.
pub(crate) fn enclosing_bone(
    node: usize,
    parent_map: &HashMap<usize, usize>,
    skeleton: &Skeleton,
) -> Option<usize> {
    let mut cursor = Some(node);
    let mut steps = 0;
    while let Some(node) = cursor {
        if let Some(bone) = skeleton.node_bones.get(&node) {
            return Some(*bone);
        }
        if steps > parent_map.len() {
            break;
        }
        cursor = parent_map.get(&node).copied();
        steps += 1;
    }
    None
}

/// Skin joint slot → bone index for one `skins[]` entry.
///
/// Joints that point at nodes without a bone (mesh carriers) climb to the
/// nearest ancestor that has one.
pub(crate) fn joint_bone_table(
    asset: &SourceAsset,
    skin_index: usize,
    skeleton: &Skeleton,
) -> Vec<Option<usize>> {
    let parent_map = collect_parent_index_map_from_json(&asset.json);
    asset
        .array("skins")
        .get(skin_index)
        .and_then(|skin| skin.get("joints"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .map(|joint| {
            joint
                .as_u64()
                .and_then(|node| enclosing_bone(node as usize, &parent_map, skeleton))
        })
        .collect()
}

// ─── Remapper ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TwistSegment {
    start: Vector3<f32>,
    end: Vector3<f32>,
    bones: Vec<usize>,
}

impl TwistSegment {
    /// Split one influence by where the vertex projects onto the segment.
    fn split(&self, position: &Vector3<f32>, weight: f32) -> Vec<(usize, f32)> {
        let axis = self.end - self.start;
        let length_sq = axis.norm_squared();
        let count = self.bones.len();
        if count == 0 {
            return Vec::new();
        }
        if length_sq < 1e-12 || count == 1 {
            return vec![(self.bones[0], weight)];
        }

        let t = (position - self.start).dot(&axis) / length_sq;
        let last = count - 1;
        if t <= 0.0 {
            return vec![(self.bones[0], weight)];
        }
        if t >= last as f32 / count as f32 {
            return vec![(self.bones[last], weight)];
        }

        let scaled = t * count as f32;
        let segment = (scaled.floor() as usize).min(last - 1);
        let fraction = scaled - segment as f32;
        vec![
            (self.bones[segment], weight * (1.0 - fraction)),
            (self.bones[segment + 1], weight * fraction),
        ]
    }
}

/// Turns raw joint influences into normalized canonical deforms.
#[derive(Debug, Clone)]
pub struct WeightRemapper {
    folds: HashMap<usize, usize>,
    twists: HashMap<usize, TwistSegment>,
    shadows: HashMap<usize, usize>,
    fallback: usize,
}

impl WeightRemapper {
    /// Resolves the taxonomy's remapping tables to skeleton indices. A table
    /// entry naming a bone the skeleton lacks is an `UnresolvedBone` error.
    pub fn new(skeleton: &Skeleton, taxonomy: &Taxonomy) -> Result<Self, ConvertError> {
        let lookup = |owner: &str, name: &str| {
            skeleton
                .index_of(name)
                .ok_or_else(|| ConvertError::UnresolvedBone {
                    bone: owner.to_string(),
                    reference: name.to_string(),
                })
        };

        let folds = taxonomy
            .folds
            .iter()
            .map(|pair| Ok((lookup(&pair.to, &pair.from)?, lookup(&pair.from, &pair.to)?)))
            .collect::<Result<HashMap<_, _>, ConvertError>>()?;

        let mut twists = HashMap::new();
        for chain in &taxonomy.twist_chains {
            let bones = chain
                .bones
                .iter()
                .map(|bone| lookup(&chain.from, bone))
                .collect::<Result<Vec<_>, _>>()?;
            let Some(first) = bones.first().copied() else {
                continue;
            };
            let start = skeleton.position(lookup(&chain.from, &chain.from)?);
            let end = skeleton.position(lookup(&chain.from, &chain.to)?);
            twists.insert(first, TwistSegment { start, end, bones });
        }

        let shadows = taxonomy
            .shadow_pairs
            .iter()
            .map(|pair| Ok((lookup(&pair.to, &pair.from)?, lookup(&pair.from, &pair.to)?)))
            .collect::<Result<HashMap<_, _>, ConvertError>>()?;

        let fallback = lookup("fallback", &taxonomy.fallback_bone)?;

        Ok(Self {
            folds,
            twists,
            shadows,
            fallback,
        })
    }

    /// Bone that takes vertices left with no usable influence.
    pub fn fallback_bone(&self) -> usize {
        self.fallback
    }

    pub fn fallback(&self) -> SkinDeform {
        SkinDeform::Bdef1 {
            bone: self.fallback,
        }
    }

    // Bounded by the table size so a folding loop cannot spin.
    fn fold(&self, bone: usize) -> usize {
        let mut current = bone;
        for _ in 0..=self.folds.len() {
            match self.folds.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => break,
            }
        }
        current
    }

    /// Normalized deform for `(bone, weight)` influences, or `None` when no
    /// influence survives filtering.
    ///
    /// Each influence is folded onto its canonical bone, split across a twist
    /// chain by the vertex position along the arm, then moved off any shadow
    /// bone. Weights for the same bone merge. The four heaviest are kept and
    /// renormalized.
    pub fn remap(&self, influences: &[(usize, f32)], position: &Vector3<f32>) -> Option<SkinDeform> {
        let mut merged: Vec<(usize, f32)> = Vec::with_capacity(MAX_INFLUENCES * 2);
        let mut add = |bone: usize, weight: f32| {
            if weight <= 0.0 {
                return;
            }
            match merged.iter_mut().find(|(existing, _)| *existing == bone) {
                Some((_, total)) => *total += weight,
                None => merged.push((bone, weight)),
            }
        };

        for &(bone, weight) in influences {
            if !weight.is_finite() || weight <= MIN_WEIGHT {
                continue;
            }
            let bone = self.fold(bone);
            let parts = match self.twists.get(&bone) {
                Some(segment) => segment.split(position, weight),
                None => vec![(bone, weight)],
            };
            for (bone, weight) in parts {
                let bone = self.shadows.get(&bone).copied().unwrap_or(bone);
                add(bone, weight);
            }
        }

        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(MAX_INFLUENCES);
        let total: f32 = merged.iter().map(|(_, weight)| weight).sum();
        if merged.is_empty() || total <= MIN_WEIGHT {
            return None;
        }
        for (_, weight) in &mut merged {
            *weight /= total;
        }

        Some(pack(&merged))
    }

    /// Remap one vertex's joint/weight quad through a skin's joint table.
    pub fn remap_quad(
        &self,
        joints: [u16; 4],
        weights: [f32; 4],
        table: &[Option<usize>],
        position: &Vector3<f32>,
    ) -> Option<SkinDeform> {
        let influences: Vec<(usize, f32)> = joints
            .iter()
            .zip(weights)
            .filter_map(|(joint, weight)| {
                table
                    .get(*joint as usize)
                    .copied()
                    .flatten()
                    .map(|bone| (bone, weight))
            })
            .collect();
        self.remap(&influences, position)
    }
}

fn pack(influences: &[(usize, f32)]) -> SkinDeform {
    match influences {
        [(bone, _)] => SkinDeform::Bdef1 { bone: *bone },
        [(first, weight), (second, _)] => SkinDeform::Bdef2 {
            bones: [*first, *second],
            weight: *weight,
        },
        _ => {
            let mut bones = [influences[0].0; 4];
            let mut weights = [0.0f32; 4];
            for (slot, (bone, weight)) in influences.iter().take(MAX_INFLUENCES).enumerate() {
                bones[slot] = *bone;
                weights[slot] = *weight;
            }
            SkinDeform::Bdef4 { bones, weights }
        }
    }
}
