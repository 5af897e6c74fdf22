//! In-memory PMX 2.0 model assembled by the conversion stages.
//!
//! Cross references are plain indices into the sibling vectors of
//! [`PmxModel`]; `None` is written as `-1`.

pub mod writer;

use bitflags::bitflags;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bone flag bits (2-byte field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BoneFlags: u16 {
        const TAIL_IS_BONE = 0x0001;
        const ROTATABLE = 0x0002;
        const TRANSLATABLE = 0x0004;
        const VISIBLE = 0x0008;
        const MANIPULABLE = 0x0010;
        const IK = 0x0020;
        const EXTERNAL_ROTATION = 0x0100;
        const EXTERNAL_TRANSLATION = 0x0200;
        const FIXED_AXIS = 0x0400;
        const LOCAL_AXES = 0x0800;
        const AFTER_PHYSICS = 0x1000;
        const EXTERNAL_PARENT = 0x2000;
    }
}

bitflags! {
    /// Material drawing flag bits (1-byte field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MaterialFlags: u8 {
        const DOUBLE_SIDED = 0x01;
        const GROUND_SHADOW = 0x02;
        const SELF_SHADOW_MAP = 0x04;
        const SELF_SHADOW = 0x08;
        const EDGE = 0x10;
    }
}

/// Complete output model.
#[derive(Debug, Clone, Default)]
pub struct PmxModel {
    pub name: String,
    pub english_name: String,
    pub comment: String,
    pub english_comment: String,
    pub vertices: Vec<Vertex>,
    /// Flat triangle list, three entries per face.
    pub indices: Vec<u32>,
    pub textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<Bone>,
    pub morphs: Vec<Morph>,
    pub display_frames: Vec<DisplayFrame>,
    pub rigid_bodies: Vec<RigidBody>,
    pub joints: Vec<Joint>,
}

// ─── Vertices ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub uv: Vector2<f32>,
    pub deform: SkinDeform,
    pub edge_scale: f32,
}

/// Skinning assignment of one vertex. Weights always sum to one.
#[derive(Debug, Clone, PartialEq)]
pub enum SkinDeform {
    Bdef1 { bone: usize },
    /// `weight` belongs to `bones[0]`; `bones[1]` receives the remainder.
    Bdef2 { bones: [usize; 2], weight: f32 },
    Bdef4 { bones: [usize; 4], weights: [f32; 4] },
}

impl SkinDeform {
    /// Bone/weight pairs in declaration order, including zero-weight padding.
    pub fn influences(&self) -> Vec<(usize, f32)> {
        match self {
            SkinDeform::Bdef1 { bone } => vec![(*bone, 1.0)],
            SkinDeform::Bdef2 { bones, weight } => {
                vec![(bones[0], *weight), (bones[1], 1.0 - *weight)]
            }
            SkinDeform::Bdef4 { bones, weights } => bones
                .iter()
                .copied()
                .zip(weights.iter().copied())
                .collect(),
        }
    }

    /// Total weight this deform gives to `bone`.
    pub fn weight_of(&self, bone: usize) -> f32 {
        self.influences()
            .iter()
            .filter(|(index, _)| *index == bone)
            .map(|(_, weight)| *weight)
            .sum()
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            SkinDeform::Bdef1 { .. } => 0,
            SkinDeform::Bdef2 { .. } => 1,
            SkinDeform::Bdef4 { .. } => 2,
        }
    }
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SphereMode {
    Disabled = 0,
    Multiply = 1,
    Add = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toon {
    /// One of the viewer's built-in `toon01..toon10` ramps (0-based).
    Shared(u8),
    /// Index into the model texture table.
    Texture(Option<usize>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub english_name: String,
    pub diffuse: [f32; 3],
    pub alpha: f32,
    pub specular: [f32; 3],
    pub specular_factor: f32,
    pub ambient: [f32; 3],
    pub flags: MaterialFlags,
    pub edge_color: [f32; 4],
    pub edge_size: f32,
    pub texture: Option<usize>,
    pub sphere_texture: Option<usize>,
    pub sphere_mode: SphereMode,
    pub toon: Toon,
    pub comment: String,
    /// Number of face indices (three per triangle) drawn with this material.
    pub face_count: u32,
}

// ─── Bones ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BoneTail {
    Offset(Vector3<f32>),
    Bone(Option<usize>),
}

/// "External parent" style inheritance: rotation and/or translation of
/// `parent` applied with `factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneEffect {
    pub parent: usize,
    pub factor: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkLink {
    pub bone: usize,
    /// Lower and upper rotation limits in radians.
    pub limits: Option<(Vector3<f32>, Vector3<f32>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ik {
    pub target: usize,
    pub loop_count: i32,
    /// Per-iteration angle limit in radians.
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    pub english_name: String,
    pub position: Vector3<f32>,
    pub parent: Option<usize>,
    pub layer: i32,
    pub flags: BoneFlags,
    pub tail: BoneTail,
    pub effect: Option<BoneEffect>,
    pub fixed_axis: Option<Vector3<f32>>,
    /// Local X and Z axes.
    pub local_axes: Option<(Vector3<f32>, Vector3<f32>)>,
    pub external_key: Option<i32>,
    pub ik: Option<Ik>,
}

impl Bone {
    /// Flags as serialized: structural bits follow the optional blocks that are
    /// actually present.
    pub fn wire_flags(&self) -> BoneFlags {
        let mut flags = self.flags;
        flags.set(
            BoneFlags::TAIL_IS_BONE,
            matches!(self.tail, BoneTail::Bone(_)),
        );
        flags.set(BoneFlags::IK, self.ik.is_some());
        flags.set(BoneFlags::FIXED_AXIS, self.fixed_axis.is_some());
        flags.set(BoneFlags::LOCAL_AXES, self.local_axes.is_some());
        flags.set(BoneFlags::EXTERNAL_PARENT, self.external_key.is_some());
        if self.effect.is_none() {
            flags.remove(BoneFlags::EXTERNAL_ROTATION | BoneFlags::EXTERNAL_TRANSLATION);
        }
        flags
    }
}

// ─── Morphs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MorphPanel {
    System = 0,
    Eyebrow = 1,
    Eye = 2,
    Mouth = 3,
    Other = 4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexOffset {
    pub vertex: usize,
    pub delta: Vector3<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupOffset {
    pub morph: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MorphKind {
    Group(Vec<GroupOffset>),
    Vertex(Vec<VertexOffset>),
}

impl MorphKind {
    pub fn type_tag(&self) -> u8 {
        match self {
            MorphKind::Group(_) => 0,
            MorphKind::Vertex(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Morph {
    pub name: String,
    pub english_name: String,
    pub panel: MorphPanel,
    pub kind: MorphKind,
}

// ─── Display frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayItem {
    Bone(usize),
    Morph(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub name: String,
    pub english_name: String,
    pub special: bool,
    pub items: Vec<DisplayItem>,
}

// ─── Physics ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidShape {
    Sphere = 0,
    Box = 1,
    Capsule = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidMode {
    Static = 0,
    Dynamic = 1,
    DynamicFollowsBone = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub name: String,
    pub english_name: String,
    pub bone: Option<usize>,
    /// Collision group, 0..=15.
    pub group: u8,
    /// On-disk mask: bit `n` set means the body collides with group `n`.
    pub collision_mask: u16,
    pub shape: RigidShape,
    pub size: Vector3<f32>,
    pub position: Vector3<f32>,
    /// Euler angles in radians.
    pub rotation: Vector3<f32>,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: RigidMode,
}

/// Spring 6-DOF joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub english_name: String,
    pub body_a: usize,
    pub body_b: usize,
    pub position: Vector3<f32>,
    pub rotation: Vector3<f32>,
    pub translation_min: Vector3<f32>,
    pub translation_max: Vector3<f32>,
    pub rotation_min: Vector3<f32>,
    pub rotation_max: Vector3<f32>,
    pub spring_translation: Vector3<f32>,
    pub spring_rotation: Vector3<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(tail: BoneTail) -> Bone {
        Bone {
            name: "頭".to_string(),
            english_name: "head".to_string(),
            position: Vector3::zeros(),
            parent: None,
            layer: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::EXTERNAL_ROTATION,
            tail,
            effect: None,
            fixed_axis: None,
            local_axes: None,
            external_key: None,
            ik: None,
        }
    }

    #[test]
    fn given_bone_tail_when_computing_wire_flags_then_tail_bit_follows_variant() {
        let by_bone = bone(BoneTail::Bone(Some(1)));
        let by_offset = bone(BoneTail::Offset(Vector3::y()));

        assert!(by_bone.wire_flags().contains(BoneFlags::TAIL_IS_BONE));
        assert!(!by_offset.wire_flags().contains(BoneFlags::TAIL_IS_BONE));
    }

    #[test]
    fn given_external_flag_without_effect_when_computing_wire_flags_then_flag_is_dropped() {
        let flags = bone(BoneTail::Bone(None)).wire_flags();

        assert!(!flags.contains(BoneFlags::EXTERNAL_ROTATION));
        assert!(flags.contains(BoneFlags::ROTATABLE));
    }

    #[test]
    fn given_bdef2_when_listing_influences_then_weights_sum_to_one() {
        let deform = SkinDeform::Bdef2 {
            bones: [3, 5],
            weight: 0.25,
        };

        let total: f32 = deform.influences().iter().map(|(_, weight)| weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((deform.weight_of(5) - 0.75).abs() < 1e-6);
    }
}
