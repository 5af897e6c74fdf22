use std::collections::{HashMap, HashSet};

use nalgebra::Vector3;
use serde::Serialize;
use serde_json::Value;

use super::gltf_utils::{
    collect_parent_index_map_from_json, collect_root_nodes, compute_node_world_positions,
    extract_humanoid_bone_nodes, node_children, to_pmx_position,
};
use super::reader::SourceAsset;
use super::taxonomy::{BoneRole, BoneSpec, EffectSpec, IkSpec, Placement, TailSpec, Taxonomy};
use crate::error::ConvertError;
use crate::pmx::{Bone, BoneEffect, BoneFlags, BoneTail, Ik, IkLink};

/// Length of a synthesized display end when no child can be pointed at.
const DEFAULT_TAIL_LENGTH: f32 = 1.0;
/// Raw node naming convention used to pick display-end children.
const CHAIN_MARKER: &str = "Bip";

// ─── Output ───────────────────────────────────────────────────────────────────

/// Conversion-side facts about a finalized bone.
#[derive(Debug, Clone, Serialize)]
pub struct BoneInfo {
    pub role: BoneRole,
    pub source_node: Option<usize>,
    pub node_name: Option<String>,
    /// Part of the canonical table (as opposed to a passed-through source bone).
    pub canonical: bool,
    pub display: Option<String>,
    /// Canonical bone whose source node is missing.
    pub hidden: bool,
}

/// Finalized skeleton: dense bone arena plus the node lookup used by skinning.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
    pub info: Vec<BoneInfo>,
    /// Source node index → bone index.
    pub node_bones: HashMap<usize, usize>,
    names: HashMap<String, usize>,
}

impl Skeleton {
    /// Bone index by canonical (Japanese) or passed-through source name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Head position in output units; the origin for an unknown index.
    pub fn position(&self, index: usize) -> Vector3<f32> {
        self.bones
            .get(index)
            .map(|bone| bone.position)
            .unwrap_or_else(Vector3::zeros)
    }

    /// Bones that are neither canonical nor synthesized, in traversal order.
    pub fn unclassified(&self) -> impl Iterator<Item = usize> + '_ {
        self.info
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.canonical)
            .map(|(index, _)| index)
    }

    /// Canonical bones whose source node was not found.
    pub fn missing_sources(&self) -> Vec<String> {
        self.info
            .iter()
            .zip(&self.bones)
            .filter(|(info, _)| info.hidden)
            .map(|(_, bone)| bone.name.clone())
            .collect()
    }
}

// ─── Phase 1: source walk ─────────────────────────────────────────────────────

/// A bone discovered while walking the node graph, still keyed by name.
#[derive(Debug, Clone)]
struct WalkedBone {
    name: String,
    node: usize,
    parent: Option<String>,
    /// First child bone that follows the same naming convention.
    tail_child: Option<String>,
    canonical: bool,
}

/// Result of phase 1: walked bones in visit order and the node → bone map.
#[derive(Debug, Default)]
struct SourceWalk {
    bones: Vec<WalkedBone>,
    node_bones: HashMap<usize, String>,
}

impl SourceWalk {
    fn find(&self, name: &str) -> Option<&WalkedBone> {
        self.bones.iter().find(|bone| bone.name == name)
    }
}

/// Depth-first walk over `nodes[].children`, starting from the scene roots
/// and then sweeping nodes no root reaches.
struct SourceWalker<'a> {
    json: &'a Value,
    taxonomy: &'a Taxonomy,
    /// Node → canonical name through humanoid roles, first table entry wins.
    humanoid: HashMap<usize, String>,
    visited: Vec<bool>,
    /// Nodes on the current recursion path, for cycle detection.
    path: Vec<usize>,
    walk: SourceWalk,
}

impl<'a> SourceWalker<'a> {
    fn new(json: &'a Value, taxonomy: &'a Taxonomy) -> Self {
        let roles = extract_humanoid_bone_nodes(json);
        let mut humanoid = HashMap::<usize, String>::new();
        for spec in &taxonomy.bones {
            if let Some(node) = spec.source.as_ref().and_then(|source| roles.get(source)) {
                humanoid.entry(*node).or_insert_with(|| spec.name.clone());
            }
        }
        let node_count = json
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        Self {
            json,
            taxonomy,
            humanoid,
            visited: vec![false; node_count],
            path: Vec::new(),
            walk: SourceWalk::default(),
        }
    }

    fn node(&self, index: usize) -> Option<&'a Value> {
        self.json
            .get("nodes")
            .and_then(Value::as_array)
            .and_then(|nodes| nodes.get(index))
    }

    /// Node name, or `node_<index>` when it is missing or empty.
    fn raw_name(&self, index: usize) -> String {
        self.node(index)
            .and_then(|node| node.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("node_{index}"))
    }

    /// Canonical name when the node is tagged or known, else its raw name.
    fn resolve_name(&self, index: usize) -> (String, bool) {
        if let Some(canonical) = self.humanoid.get(&index) {
            return (canonical.clone(), true);
        }
        let raw = self.raw_name(index);
        if let Some(canonical) = self.taxonomy.synonym(&raw) {
            return (canonical.to_string(), true);
        }
        if let Some(spec) = self.taxonomy.bone_for_source(&raw) {
            return (spec.name.clone(), true);
        }
        if self.taxonomy.bone(&raw).is_some() {
            return (raw, true);
        }
        (raw, false)
    }

    fn run(mut self) -> Result<SourceWalk, ConvertError> {
        let parent_map = collect_parent_index_map_from_json(self.json);
        let roots = collect_root_nodes(self.json, &parent_map);
        let leftovers: Vec<usize> = (0..self.visited.len()).collect();

        for node in roots.into_iter().chain(leftovers) {
            if node < self.visited.len() && !self.visited[node] {
                self.visit(node, None)?;
            }
        }
        Ok(self.walk)
    }

    /// Visit one node and its subtree under `parent_bone`.
    ///
    /// Each bone name is recorded once; a later node resolving to the same
    /// name only maps onto the existing bone. The display end points at the
    /// first child bone, except that a `Bip` chain bone never points at a
    /// child outside the chain (e.g. a hair or accessory root).
    fn visit(&mut self, index: usize, parent_bone: Option<String>) -> Result<(), ConvertError> {
        if self.path.contains(&index) {
            return Err(ConvertError::CyclicBone(self.raw_name(index)));
        }
        if index >= self.visited.len() || self.visited[index] {
            return Ok(());
        }
        self.visited[index] = true;
        self.path.push(index);

        let Some(node) = self.node(index) else {
            self.path.pop();
            return Ok(());
        };

        // Mesh carriers are not bones; their children hang off the enclosing bone.
        let is_mesh = node.get("mesh").is_some() && !self.humanoid.contains_key(&index);
        let mut own_slot = None;
        let current_bone = if is_mesh {
            parent_bone.clone()
        } else {
            let (name, canonical) = self.resolve_name(index);
            if self.walk.find(&name).is_none() {
                self.walk.bones.push(WalkedBone {
                    name: name.clone(),
                    node: index,
                    parent: parent_bone.clone(),
                    tail_child: None,
                    canonical,
                });
                own_slot = Some(self.walk.bones.len() - 1);
            }
            self.walk.node_bones.insert(index, name.clone());
            Some(name)
        };

        let own_raw = self.raw_name(index);
        for child in node_children(node) {
            self.visit(child, current_bone.clone())?;

            let Some(slot) = own_slot else { continue };
            if self.walk.bones[slot].tail_child.is_some() {
                continue;
            }
            let Some(child_bone) = self.walk.node_bones.get(&child).cloned() else {
                continue;
            };
            if Some(&child_bone) == current_bone.as_ref() {
                continue;
            }
            let child_raw = self.raw_name(child);
            let same_convention = !own_raw.contains(CHAIN_MARKER)
                || child_raw.contains(CHAIN_MARKER);
            if same_convention {
                self.walk.bones[slot].tail_child = Some(child_bone);
            }
        }

        self.path.pop();
        Ok(())
    }
}

// ─── Phase 1: descriptors ─────────────────────────────────────────────────────

/// Display end before bone names are resolved to indices.
#[derive(Debug, Clone, PartialEq)]
enum TailRef {
    None,
    Bone(String),
    Offset(Vector3<f32>),
}

/// Name-keyed bone before index resolution.
#[derive(Debug, Clone)]
struct BoneDescriptor {
    name: String,
    english_name: String,
    source_node: Option<usize>,
    parent: Option<String>,
    tail: TailRef,
    position: Vector3<f32>,
    role: BoneRole,
    display: Option<String>,
    effect: Option<EffectSpec>,
    ik: Option<IkSpec>,
    layer: i32,
    local_axes: bool,
    fixed_axis: Option<Vector3<f32>>,
    canonical: bool,
    hidden: bool,
}

/// Memoized placement of table bones, resolving `Placement` references
/// between bones on demand.
struct PositionResolver<'a> {
    specs: HashMap<&'a str, &'a BoneSpec>,
    /// Canonical bone → world position of its source node (output units).
    sourced: HashMap<String, Vector3<f32>>,
    memo: HashMap<String, Vector3<f32>>,
    visiting: HashSet<String>,
}

impl<'a> PositionResolver<'a> {
    /// Position of the closest table ancestor backed by a source node.
    fn nearest_sourced_ancestor(&self, spec: &BoneSpec) -> Vector3<f32> {
        let mut cursor = spec.parent.as_deref();
        let mut steps = 0;
        while let Some(name) = cursor {
            if let Some(position) = self.sourced.get(name) {
                return *position;
            }
            let Some(parent) = self.specs.get(name) else {
                break;
            };
            if parent.placement == Placement::Origin || steps > self.specs.len() {
                break;
            }
            cursor = parent.parent.as_deref();
            steps += 1;
        }
        Vector3::zeros()
    }

    /// Position of table bone `name`.
    ///
    /// `requested_by` names the bone whose placement referenced `name`, for
    /// the unresolved-reference error. A placement chain that comes back to a
    /// bone still being resolved is a cycle.
    fn resolve(&mut self, name: &str, requested_by: &str) -> Result<Vector3<f32>, ConvertError> {
        if let Some(position) = self.memo.get(name) {
            return Ok(*position);
        }
        let spec = *self
            .specs
            .get(name)
            .ok_or_else(|| ConvertError::UnresolvedBone {
                bone: requested_by.to_string(),
                reference: name.to_string(),
            })?;
        if !self.visiting.insert(name.to_string()) {
            return Err(ConvertError::CyclicBone(name.to_string()));
        }

        let position = match &spec.placement {
            Placement::Source => match self.sourced.get(name) {
                Some(position) => *position,
                None => self.nearest_sourced_ancestor(spec),
            },
            Placement::Origin => Vector3::zeros(),
            Placement::LegMidHeight { upper, lower } => {
                let upper = self.resolve(upper, name)?;
                let lower = self.resolve(lower, name)?;
                Vector3::new(0.0, (upper.y + lower.y) / 2.0, 0.0)
            }
            Placement::Copy(other) => self.resolve(other, name)?,
            Placement::Floor(other) => {
                let other = self.resolve(other, name)?;
                Vector3::new(other.x, 0.0, other.z)
            }
            Placement::Lerp { from, to, ratio } => {
                let from = self.resolve(from, name)?;
                let to = self.resolve(to, name)?;
                from + (to - from) * *ratio
            }
        };

        self.visiting.remove(name);
        self.memo.insert(name.to_string(), position);
        Ok(position)
    }
}

/// Unit-length display offset continuing the parent → bone direction,
/// straight up when there is no usable parent.
fn continue_direction(position: &Vector3<f32>, parent: Option<&Vector3<f32>>) -> Vector3<f32> {
    parent
        .map(|parent| position - parent)
        .filter(|direction| direction.norm() > 1e-6)
        .map(|direction| direction.normalize() * DEFAULT_TAIL_LENGTH)
        .unwrap_or_else(|| Vector3::new(0.0, DEFAULT_TAIL_LENGTH, 0.0))
}

/// Phase 1b: one descriptor per table bone, in table order, followed by the
/// unclassified source bones in walk order.
///
/// Table bones take their position from the placement rule, their tail from
/// the walked child (for `TailSpec::Auto`) or the table. A table bone with a
/// humanoid source that the walk did not find is kept but marked hidden.
/// Unclassified bones keep their source position and hang off their walked
/// parent, or the table root when they have none.
fn build_descriptors(
    asset: &SourceAsset,
    taxonomy: &Taxonomy,
    walk: &SourceWalk,
) -> Result<Vec<BoneDescriptor>, ConvertError> {
    let world = compute_node_world_positions(&asset.json);
    let node_position = |node: usize| {
        world
            .get(node)
            .map(to_pmx_position)
            .unwrap_or_else(Vector3::zeros)
    };

    let mut resolver = PositionResolver {
        specs: taxonomy
            .bones
            .iter()
            .map(|spec| (spec.name.as_str(), spec))
            .collect(),
        sourced: walk
            .bones
            .iter()
            .filter(|bone| bone.canonical)
            .map(|bone| (bone.name.clone(), node_position(bone.node)))
            .collect(),
        memo: HashMap::new(),
        visiting: HashSet::new(),
    };

    let mut descriptors = Vec::with_capacity(taxonomy.bones.len() + walk.bones.len());
    for spec in &taxonomy.bones {
        let walked = walk.find(&spec.name).filter(|bone| bone.canonical);
        let position = resolver.resolve(&spec.name, &spec.name)?;

        let tail = match &spec.tail {
            TailSpec::Auto => match walked.and_then(|bone| bone.tail_child.clone()) {
                Some(child) => TailRef::Bone(child),
                None => {
                    let parent = match &spec.parent {
                        Some(parent) => Some(resolver.resolve(parent, &spec.name)?),
                        None => None,
                    };
                    TailRef::Offset(continue_direction(&position, parent.as_ref()))
                }
            },
            TailSpec::None => TailRef::None,
            TailSpec::Bone(bone) => TailRef::Bone(bone.clone()),
            TailSpec::Offset(offset) => TailRef::Offset(Vector3::from(*offset)),
        };

        let fixed_axis = match (&spec.placement, spec.role.has_fixed_axis()) {
            (Placement::Lerp { from, to, .. }, true) => {
                let axis = resolver.resolve(to, &spec.name)? - resolver.resolve(from, &spec.name)?;
                (axis.norm() > 1e-6).then(|| axis.normalize())
            }
            _ => None,
        };

        let hidden = spec.source.is_some() && walked.is_none();
        descriptors.push(BoneDescriptor {
            name: spec.name.clone(),
            english_name: spec.english_name.clone(),
            source_node: walked.map(|bone| bone.node),
            parent: spec.parent.clone(),
            tail,
            position,
            role: spec.role,
            display: spec.display.clone(),
            effect: spec.effect.clone(),
            ik: spec.ik.clone(),
            layer: spec.layer,
            local_axes: spec.local_axes,
            fixed_axis,
            canonical: true,
            hidden,
        });
    }

    let root = taxonomy.root_name().map(ToOwned::to_owned);
    for bone in walk.bones.iter().filter(|bone| !bone.canonical) {
        let position = node_position(bone.node);
        let parent = bone.parent.clone().or_else(|| root.clone());
        let tail = match &bone.tail_child {
            Some(child) => TailRef::Bone(child.clone()),
            None => {
                let parent_position = walk
                    .find(parent.as_deref().unwrap_or_default())
                    .map(|parent| node_position(parent.node))
                    .or_else(|| {
                        parent
                            .as_deref()
                            .and_then(|name| resolver.memo.get(name).copied())
                    });
                TailRef::Offset(continue_direction(&position, parent_position.as_ref()))
            }
        };
        descriptors.push(BoneDescriptor {
            name: bone.name.clone(),
            english_name: bone.name.clone(),
            source_node: Some(bone.node),
            parent,
            tail,
            position,
            role: BoneRole::Generic,
            display: None,
            effect: None,
            ik: None,
            layer: 0,
            local_axes: false,
            fixed_axis: None,
            canonical: false,
            hidden: false,
        });
    }

    Ok(descriptors)
}

// ─── Phase 2: finalize ────────────────────────────────────────────────────────

/// Local X along head → tail and Z perpendicular to it and world up.
fn local_axes_for(position: &Vector3<f32>, tail: &Vector3<f32>) -> Option<(Vector3<f32>, Vector3<f32>)> {
    let x = tail - position;
    if x.norm() < 1e-6 {
        return None;
    }
    let x = x.normalize();
    let z = x.cross(&Vector3::y());
    let z = if z.norm() < 1e-6 {
        x.cross(&Vector3::z())
    } else {
        z
    };
    Some((x, z.normalize()))
}

/// Phase 2: resolve every name reference to a dense index and emit bones.
///
/// Fails on a parent, tail, effect or IK reference to a bone that does not
/// exist, and on any parent chain that loops. Bones with an effect source get
/// the external-rotation flag unless their role already carries one.
fn finalize(
    descriptors: Vec<BoneDescriptor>,
    walk: &SourceWalk,
    asset: &SourceAsset,
) -> Result<Skeleton, ConvertError> {
    let names: HashMap<String, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| (descriptor.name.clone(), index))
        .collect();
    let lookup = |bone: &str, reference: &str| {
        names
            .get(reference)
            .copied()
            .ok_or_else(|| ConvertError::UnresolvedBone {
                bone: bone.to_string(),
                reference: reference.to_string(),
            })
    };

    let parents: Vec<Option<usize>> = descriptors
        .iter()
        .map(|descriptor| {
            descriptor
                .parent
                .as_deref()
                .map(|parent| lookup(&descriptor.name, parent))
                .transpose()
        })
        .collect::<Result<_, _>>()?;

    for (index, descriptor) in descriptors.iter().enumerate() {
        let mut cursor = parents[index];
        let mut steps = 0;
        while let Some(parent) = cursor {
            if parent == index || steps > descriptors.len() {
                return Err(ConvertError::CyclicBone(descriptor.name.clone()));
            }
            cursor = parents[parent];
            steps += 1;
        }
    }

    let mut bones = Vec::with_capacity(descriptors.len());
    let mut info = Vec::with_capacity(descriptors.len());
    for (index, descriptor) in descriptors.iter().enumerate() {
        let name = descriptor.name.as_str();

        let tail = match &descriptor.tail {
            TailRef::None => BoneTail::Bone(None),
            TailRef::Bone(target) => BoneTail::Bone(Some(lookup(name, target)?)),
            TailRef::Offset(offset) => BoneTail::Offset(*offset),
        };
        let tail_position = match &tail {
            BoneTail::Bone(Some(target)) => Some(descriptors[*target].position),
            BoneTail::Offset(offset) => Some(descriptor.position + offset),
            BoneTail::Bone(None) => None,
        };

        let effect = descriptor
            .effect
            .as_ref()
            .map(|effect| {
                lookup(name, &effect.source).map(|parent| BoneEffect {
                    parent,
                    factor: effect.factor,
                })
            })
            .transpose()?;

        let ik = descriptor
            .ik
            .as_ref()
            .map(|ik| -> Result<Ik, ConvertError> {
                let links = ik
                    .links
                    .iter()
                    .map(|link| -> Result<IkLink, ConvertError> {
                        Ok(IkLink {
                            bone: lookup(name, &link.bone)?,
                            limits: link.limit_deg.map(|(min, max)| {
                                (
                                    Vector3::from(min).map(f32::to_radians),
                                    Vector3::from(max).map(f32::to_radians),
                                )
                            }),
                        })
                    })
                    .collect::<Result<Vec<_>, ConvertError>>()?;
                Ok(Ik {
                    target: lookup(name, &ik.target)?,
                    loop_count: ik.loop_count,
                    limit_angle: ik.limit_deg.to_radians(),
                    links,
                })
            })
            .transpose()?;

        let mut flags = descriptor.role.base_flags();
        if descriptor.hidden {
            flags.remove(BoneFlags::VISIBLE | BoneFlags::MANIPULABLE);
        }
        if effect.is_some()
            && !flags.intersects(BoneFlags::EXTERNAL_ROTATION | BoneFlags::EXTERNAL_TRANSLATION)
        {
            flags.insert(BoneFlags::EXTERNAL_ROTATION);
        }

        let local_axes = if descriptor.local_axes {
            tail_position.and_then(|tail| local_axes_for(&descriptor.position, &tail))
        } else {
            None
        };

        bones.push(Bone {
            name: descriptor.name.clone(),
            english_name: descriptor.english_name.clone(),
            position: descriptor.position,
            parent: parents[index],
            layer: descriptor.layer,
            flags,
            tail,
            effect,
            fixed_axis: descriptor.fixed_axis,
            local_axes,
            external_key: None,
            ik,
        });
        info.push(BoneInfo {
            role: descriptor.role,
            source_node: descriptor.source_node,
            node_name: descriptor
                .source_node
                .and_then(|node| asset.node_name(node))
                .map(ToOwned::to_owned),
            canonical: descriptor.canonical,
            display: descriptor.display.clone(),
            hidden: descriptor.hidden,
        });
    }

    let node_bones = walk
        .node_bones
        .iter()
        .filter_map(|(node, name)| names.get(name).map(|index| (*node, *index)))
        .collect();

    Ok(Skeleton {
        bones,
        info,
        node_bones,
        names,
    })
}

/// Build the canonical skeleton from the source node graph.
///
/// Runs in two phases. The first walks the node graph and produces
/// name-keyed descriptors: humanoid-tagged and known nodes become table
/// bones, all other non-mesh nodes pass through as generic bones, and
/// synthesized table bones (IK, parents, twist and cancel bones) are placed
/// from their placement rule. The second phase resolves names to indices.
///
/// The result is a dense arena in which every index reference is valid and
/// no bone is its own ancestor.
pub fn build_skeleton(asset: &SourceAsset, taxonomy: &Taxonomy) -> Result<Skeleton, ConvertError> {
    if asset.json.get("nodes").and_then(Value::as_array).is_none() {
        return Err(ConvertError::MissingKey("nodes".to_string()));
    }
    let walk = SourceWalker::new(&asset.json, taxonomy).run()?;
    let descriptors = build_descriptors(asset, taxonomy, &walk)?;
    finalize(descriptors, &walk, asset)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::convert::taxonomy::BoneSpec;

    fn asset(json: Value) -> SourceAsset {
        SourceAsset {
            json,
            bin: Vec::new(),
        }
    }

    fn humanoid_asset() -> SourceAsset {
        asset(json!({
            "scenes": [{"nodes": [0]}],
            "nodes": [
                {"name": "Root", "children": [1]},
                {"name": "J_Bip_C_Hips", "translation": [0.0, 1.0, 0.0], "children": [2, 3, 5]},
                {"name": "J_Bip_C_Spine", "translation": [0.0, 0.1, 0.0], "children": [4]},
                {"name": "J_Bip_L_UpperLeg", "translation": [0.1, -0.1, 0.0], "children": [6]},
                {"name": "J_Bip_C_Head", "translation": [0.0, 0.5, 0.0], "children": [7]},
                {"name": "Body", "mesh": 0, "children": [8]},
                {"name": "J_Bip_L_LowerLeg", "translation": [0.0, -0.4, 0.0]},
                {"name": "J_Sec_Hair1_01", "translation": [0.0, 0.1, -0.1], "children": [9]},
                {"name": "Loose"},
                {"name": "J_Sec_Hair2_01", "translation": [0.0, -0.1, 0.0]}
            ],
            "extensions": {"VRM": {"humanoid": {"humanBones": [
                {"bone": "hips", "node": 1},
                {"bone": "spine", "node": 2},
                {"bone": "leftUpperLeg", "node": 3},
                {"bone": "head", "node": 4},
                {"bone": "leftLowerLeg", "node": 6}
            ]}}}
        }))
    }

    fn parent_chain_terminates(skeleton: &Skeleton) {
        for (index, bone) in skeleton.bones.iter().enumerate() {
            let mut cursor = bone.parent;
            let mut steps = 0;
            while let Some(parent) = cursor {
                assert!(parent < skeleton.bones.len(), "bone {index} parent out of range");
                cursor = skeleton.bones[parent].parent;
                steps += 1;
                assert!(steps <= skeleton.bones.len(), "bone {index} loops");
            }
        }
    }

    #[test]
    fn given_cyclic_node_children_when_building_then_cyclic_bone_is_rejected() {
        let asset = asset(json!({
            "nodes": [
                {"name": "A", "children": [1]},
                {"name": "B", "children": [2]},
                {"name": "C", "children": [0]}
            ]
        }));

        let error = build_skeleton(&asset, &Taxonomy::default()).expect_err("cycle must fail");

        assert!(matches!(error, ConvertError::CyclicBone(_)));
    }

    #[test]
    fn given_humanoid_asset_when_building_then_canonical_bones_lead_and_resolve() {
        let skeleton = build_skeleton(&humanoid_asset(), &Taxonomy::default()).expect("skeleton");

        assert_eq!(skeleton.bones[0].name, "全ての親");
        assert_eq!(skeleton.bones[0].parent, None);
        parent_chain_terminates(&skeleton);

        let head = skeleton.index_of("頭").expect("head");
        assert_eq!(skeleton.info[head].source_node, Some(4));
        assert_eq!(skeleton.node_bones.get(&4), Some(&head));
        let hips = skeleton.index_of("下半身").expect("lower body");
        assert_eq!(skeleton.node_bones.get(&1), Some(&hips));
        assert_eq!(skeleton.node_bones.get(&0), Some(&0));
    }

    #[test]
    fn given_unclassified_chain_when_building_then_it_follows_canonical_bones_in_walk_order() {
        let taxonomy = Taxonomy::default();
        let skeleton = build_skeleton(&humanoid_asset(), &taxonomy).expect("skeleton");

        let hair = skeleton.index_of("J_Sec_Hair1_01").expect("hair root");
        let hair_tip = skeleton.index_of("J_Sec_Hair2_01").expect("hair tip");
        assert!(hair >= taxonomy.bones.len());
        assert!(hair_tip > hair);
        assert_eq!(skeleton.bones[hair].parent, skeleton.index_of("頭"));
        assert_eq!(skeleton.bones[hair].tail, BoneTail::Bone(Some(hair_tip)));

        // Mesh nodes vanish; their children hang off the enclosing bone.
        assert!(skeleton.index_of("Body").is_none());
        let loose = skeleton.index_of("Loose").expect("loose bone");
        assert_eq!(skeleton.bones[loose].parent, skeleton.index_of("下半身"));
    }

    #[test]
    fn given_missing_upper_chest_when_building_then_bone_is_hidden_at_parent_position() {
        let skeleton = build_skeleton(&humanoid_asset(), &Taxonomy::default()).expect("skeleton");

        let upper_chest = skeleton.index_of("上半身3").expect("upper chest");
        let chest = skeleton.index_of("上半身2").expect("chest");
        let flags = skeleton.bones[upper_chest].flags;
        assert!(!flags.contains(BoneFlags::VISIBLE));
        assert!(!flags.contains(BoneFlags::MANIPULABLE));
        assert_eq!(skeleton.bones[upper_chest].position, skeleton.bones[chest].position);
        assert!(skeleton.missing_sources().contains(&"上半身3".to_string()));
    }

    #[test]
    fn given_leg_bones_when_placing_center_then_height_is_mean_of_leg_and_knee() {
        let skeleton = build_skeleton(&humanoid_asset(), &Taxonomy::default()).expect("skeleton");

        let center = skeleton.bones[skeleton.index_of("センター").expect("center")].position;
        let leg = skeleton.bones[skeleton.index_of("左足").expect("leg")].position;
        let knee = skeleton.bones[skeleton.index_of("左ひざ").expect("knee")].position;

        assert!((center.y - (leg.y + knee.y) / 2.0).abs() < 1e-5);
        assert_eq!(center.x, 0.0);
        assert_eq!(center.z, 0.0);
        // Leg sits at 0.9 m, mirrored on X.
        assert!((leg - Vector3::new(-1.25, 11.25, 0.0)).norm() < 1e-4);
    }

    #[test]
    fn given_arm_segment_when_building_twist_bones_then_they_sit_along_it_with_fixed_axis() {
        let asset = asset(json!({
            "nodes": [
                {"name": "J_Bip_C_Hips", "translation": [0.0, 1.0, 0.0], "children": [1]},
                {"name": "J_Bip_L_UpperArm", "translation": [0.2, 0.4, 0.0], "children": [2]},
                {"name": "J_Bip_L_LowerArm", "translation": [0.3, 0.0, 0.0]}
            ],
            "extensions": {"VRM": {"humanoid": {"humanBones": [
                {"bone": "hips", "node": 0},
                {"bone": "leftUpperArm", "node": 1},
                {"bone": "leftLowerArm", "node": 2}
            ]}}}
        }));

        let skeleton = build_skeleton(&asset, &Taxonomy::default()).expect("skeleton");

        let twist_index = skeleton.index_of("左腕捩").expect("twist");
        let twist = &skeleton.bones[twist_index];
        assert!((twist.position - Vector3::new(-4.375, 17.5, 0.0)).norm() < 1e-4);
        let axis = twist.fixed_axis.expect("fixed axis");
        assert!((axis - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-5);
        assert!(twist.wire_flags().contains(BoneFlags::FIXED_AXIS));

        let sub = &skeleton.bones[skeleton.index_of("左腕捩1").expect("sub twist")];
        assert!((sub.position - Vector3::new(-3.4375, 17.5, 0.0)).norm() < 1e-4);
        assert!(sub.flags.contains(BoneFlags::EXTERNAL_ROTATION));
        assert!(!sub.flags.contains(BoneFlags::VISIBLE));
        let effect = sub.effect.expect("effect");
        assert_eq!(effect.parent, twist_index);
        assert!((effect.factor - 0.25).abs() < 1e-6);
    }

    #[test]
    fn given_missing_arm_chain_when_building_then_placeholders_fall_back_to_torso() {
        let skeleton = build_skeleton(&humanoid_asset(), &Taxonomy::default()).expect("skeleton");

        let arm = skeleton.bones[skeleton.index_of("左腕").expect("arm")].position;
        let spine = skeleton.bones[skeleton.index_of("上半身").expect("spine")].position;
        assert_eq!(arm, spine);
    }

    #[test]
    fn given_leg_ik_when_building_then_chain_targets_ankle_with_knee_clamp() {
        let skeleton = build_skeleton(&humanoid_asset(), &Taxonomy::default()).expect("skeleton");

        let ik_bone = &skeleton.bones[skeleton.index_of("左足ＩＫ").expect("leg ik")];
        let ik = ik_bone.ik.as_ref().expect("ik block");
        assert_eq!(Some(ik.target), skeleton.index_of("左足首"));
        assert_eq!(ik.loop_count, 40);
        assert_eq!(ik.links.len(), 2);
        assert_eq!(Some(ik.links[0].bone), skeleton.index_of("左ひざ"));
        let (min, max) = ik.links[0].limits.expect("knee clamp");
        assert!((min.x - (-180.0f32).to_radians()).abs() < 1e-6);
        assert!((max.x - (-0.5f32).to_radians()).abs() < 1e-6);
        assert!(ik.links[1].limits.is_none());
        assert!(ik_bone.wire_flags().contains(BoneFlags::IK));
    }

    #[test]
    fn given_table_parent_that_does_not_exist_when_building_then_unresolved_bone_is_reported() {
        let mut taxonomy = Taxonomy::default();
        taxonomy.bones.push(BoneSpec::new("尻尾", "tail", Some("存在しない")));

        let error = build_skeleton(&humanoid_asset(), &taxonomy).expect_err("must fail");

        match error {
            ConvertError::UnresolvedBone { bone, reference } => {
                assert_eq!(bone, "尻尾");
                assert_eq!(reference, "存在しない");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn given_table_parents_forming_a_loop_when_building_then_cyclic_bone_is_reported() {
        let mut taxonomy = Taxonomy::default();
        taxonomy.bones.push(BoneSpec {
            placement: Placement::Origin,
            ..BoneSpec::new("甲", "a", Some("乙"))
        });
        taxonomy.bones.push(BoneSpec {
            placement: Placement::Origin,
            ..BoneSpec::new("乙", "b", Some("甲"))
        });

        let error = build_skeleton(&humanoid_asset(), &taxonomy).expect_err("must fail");

        assert!(matches!(error, ConvertError::CyclicBone(_)));
    }

    #[test]
    fn given_json_without_nodes_when_building_then_missing_key_is_reported() {
        let error = build_skeleton(&asset(json!({})), &Taxonomy::default()).expect_err("must fail");

        assert!(matches!(error, ConvertError::MissingKey(key) if key == "nodes"));
    }
}
