use std::collections::{BTreeSet, HashMap};

use nalgebra::{Matrix3, Vector3};

use super::skeleton::Skeleton;
use super::taxonomy::{
    BodyMode, BodyParams, BodyTemplate, BoneFamily, ExplicitBody, FamilyDefaults, JointLimits, PhysicsTables,
    ShapeKind,
};
use crate::pmx::{BoneTail, Joint, RigidBody, RigidMode, RigidShape, Vertex};

/// Smallest half-extent a fitted shape may have.
const MIN_HALF_EXTENT: f32 = 0.05;
/// Cross-axis half-extent relative to bone length when no vertices are bound.
const EMPTY_CLOUD_RATIO: f32 = 0.25;
const DEGENERATE_LENGTH: f32 = 1e-4;

/// Rigid bodies and joints for the finished skeleton.
#[derive(Debug, Default)]
pub struct PhysicsAssembly {
    pub rigid_bodies: Vec<RigidBody>,
    pub joints: Vec<Joint>,
}

/// Vertices whose dominant influence on a bone reaches `threshold`.
#[derive(Debug, Default)]
struct Cloud {
    positions: Vec<Vector3<f32>>,
    normal_sum: Vector3<f32>,
}

impl Cloud {
    fn centroid(&self) -> Option<Vector3<f32>> {
        if self.positions.is_empty() {
            return None;
        }
        let sum: Vector3<f32> = self.positions.iter().sum();
        Some(sum / self.positions.len() as f32)
    }

    fn half_diagonal(&self) -> Option<f32> {
        let first = self.positions.first()?;
        let (min, max) = self
            .positions
            .iter()
            .fold((*first, *first), |(min, max), position| {
                (min.inf(position), max.sup(position))
            });
        Some((max - min).norm() * 0.5)
    }

    /// Largest distance from `center` along `axis`.
    fn half_extent(&self, center: &Vector3<f32>, axis: &Vector3<f32>) -> Option<f32> {
        self.positions
            .iter()
            .map(|position| (position - center).dot(axis).abs())
            .reduce(f32::max)
    }
}

fn collect_clouds(bone_count: usize, vertices: &[Vertex], threshold: f32) -> Vec<Cloud> {
    let mut clouds: Vec<Cloud> = (0..bone_count).map(|_| Cloud::default()).collect();
    for vertex in vertices {
        let dominant = vertex
            .deform
            .influences()
            .into_iter()
            .filter(|(bone, _)| *bone < bone_count)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((bone, weight)) = dominant
            && weight >= threshold
        {
            clouds[bone].positions.push(vertex.position);
            clouds[bone].normal_sum += vertex.normal;
        }
    }
    clouds
}

// ─── Chain position ───────────────────────────────────────────────────────────

/// Hop counts of a bone inside its same-family chain.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChainPosition {
    from_root: usize,
    to_tip: usize,
}

impl ChainPosition {
    fn length(self) -> usize {
        self.from_root + self.to_tip
    }

    /// 0 at the chain root, 1 at the tip.
    fn fraction(self) -> f32 {
        if self.length() == 0 {
            0.0
        } else {
            self.from_root as f32 / self.length() as f32
        }
    }
}

fn chain_positions(skeleton: &Skeleton, families: &[BoneFamily]) -> Vec<ChainPosition> {
    let count = skeleton.bones.len();
    let same_family_parent = |index: usize| {
        skeleton.bones[index]
            .parent
            .filter(|parent| *parent < count && families[*parent] == families[index])
    };

    let mut from_root = vec![0usize; count];
    for (index, hops) in from_root.iter_mut().enumerate() {
        let mut cursor = index;
        let mut steps = 0;
        while let Some(parent) = same_family_parent(cursor) {
            steps += 1;
            cursor = parent;
            if steps > count {
                break;
            }
        }
        *hops = steps;
    }

    // Deepest bones first so every child is settled before its parent.
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|index| std::cmp::Reverse(from_root[*index]));
    let mut to_tip = vec![0usize; count];
    for index in order {
        if let Some(parent) = same_family_parent(index) {
            to_tip[parent] = to_tip[parent].max(to_tip[index] + 1);
        }
    }

    from_root
        .into_iter()
        .zip(to_tip)
        .map(|(from_root, to_tip)| ChainPosition { from_root, to_tip })
        .collect()
}

/// Mass follows the squared tip distance; damping runs linearly root to tip.
fn interpolate_params(defaults: &FamilyDefaults, position: ChainPosition) -> BodyParams {
    let root = defaults.root;
    let tip = defaults.tip;
    let ratio = (position.to_tip + 1) as f32 / (position.length() + 1) as f32;
    let t = position.fraction();
    BodyParams {
        mass: root.mass * ratio * ratio,
        linear_damping: root.linear_damping + (tip.linear_damping - root.linear_damping) * t,
        angular_damping: root.angular_damping + (tip.angular_damping - root.angular_damping) * t,
        restitution: root.restitution,
        friction: root.friction,
    }
}

// ─── Shape fitting ────────────────────────────────────────────────────────────

/// Euler angles (x, y, z) of `m = Ry · Rx · Rz`.
pub(crate) fn euler_yxz(m: &Matrix3<f32>) -> Vector3<f32> {
    let x = (-m[(1, 2)]).clamp(-1.0, 1.0).asin();
    let y = m[(0, 2)].atan2(m[(2, 2)]);
    let z = m[(1, 0)].atan2(m[(1, 1)]);
    Vector3::new(x, y, z)
}

/// Orthonormal frame with `y` along the bone, `z` as close to `reference` as possible.
pub(crate) fn bone_frame(axis: &Vector3<f32>, reference: &Vector3<f32>) -> Matrix3<f32> {
    let y = axis.normalize();
    let project = |candidate: Vector3<f32>| {
        let flattened = candidate - y * candidate.dot(&y);
        (flattened.norm() > 1e-4).then(|| flattened.normalize())
    };
    let z = project(*reference)
        .or_else(|| project(Vector3::z()))
        .or_else(|| project(Vector3::x()))
        .unwrap_or_else(Vector3::z);
    let x = y.cross(&z);
    Matrix3::from_columns(&[x, y, z])
}

struct FittedShape {
    shape: RigidShape,
    size: Vector3<f32>,
    position: Vector3<f32>,
    rotation: Vector3<f32>,
}

/// World position the bone points at, or its head when it has no tail.
fn tail_position(skeleton: &Skeleton, index: usize) -> Vector3<f32> {
    let bone = &skeleton.bones[index];
    match &bone.tail {
        BoneTail::Offset(offset) => bone.position + offset,
        BoneTail::Bone(Some(target)) => skeleton.position(*target),
        BoneTail::Bone(None) => bone.position,
    }
}

/// Sphere centred on the vertex cloud.
///
/// The radius comes from the distance between the two named bones when both
/// are visible, then from the cloud's half diagonal, then from half the bone
/// length.
fn fit_sphere(
    skeleton: &Skeleton,
    index: usize,
    cloud: &Cloud,
    template: &BodyTemplate,
    radius_from: Option<&(String, String)>,
) -> FittedShape {
    let head = skeleton.position(index);
    let tail = tail_position(skeleton, index);
    let between = radius_from.and_then(|(a, b)| {
        let a = skeleton.index_of(a).filter(|i| !skeleton.info[*i].hidden)?;
        let b = skeleton.index_of(b).filter(|i| !skeleton.info[*i].hidden)?;
        Some((skeleton.position(a) - skeleton.position(b)).norm())
    });
    let radius = between
        .or_else(|| cloud.half_diagonal())
        .unwrap_or_else(|| (tail - head).norm() * 0.5)
        * template.size_factor;

    FittedShape {
        shape: RigidShape::Sphere,
        size: Vector3::new(radius.max(MIN_HALF_EXTENT), 0.0, 0.0),
        position: cloud.centroid().unwrap_or((head + tail) * 0.5),
        rotation: Vector3::zeros(),
    }
}

/// Box or capsule spanning head to tail, sized from the cloud's spread across
/// the bone axis. A zero-length bone is stood upright on the cloud instead.
fn fit_segment(skeleton: &Skeleton, index: usize, cloud: &Cloud, template: &BodyTemplate) -> FittedShape {
    let head = skeleton.position(index);
    let tail = tail_position(skeleton, index);
    let mut axis = tail - head;
    let mut center = (head + tail) * 0.5;
    let mut length = axis.norm();
    if length < DEGENERATE_LENGTH {
        axis = Vector3::y();
        center = cloud.centroid().unwrap_or(head);
        length = cloud
            .half_extent(&center, &axis)
            .map(|half| half * 2.0)
            .unwrap_or(MIN_HALF_EXTENT * 2.0);
    }

    let frame = bone_frame(&axis, &cloud.normal_sum);
    let fallback = length * EMPTY_CLOUD_RATIO;
    let half_x = cloud
        .half_extent(&center, &frame.column(0).into_owned())
        .unwrap_or(fallback);
    let half_z = cloud
        .half_extent(&center, &frame.column(2).into_owned())
        .unwrap_or(fallback);
    let half_x = (half_x * template.size_factor).max(MIN_HALF_EXTENT);
    let half_z = (half_z * template.size_factor).max(MIN_HALF_EXTENT);

    let (shape, size) = match template.shape {
        ShapeKind::Box => (
            RigidShape::Box,
            Vector3::new(half_x, (length * 0.5).max(MIN_HALF_EXTENT), half_z),
        ),
        _ => (
            RigidShape::Capsule,
            Vector3::new(half_x.max(half_z), length.max(MIN_HALF_EXTENT), 0.0),
        ),
    };

    FittedShape {
        shape,
        size,
        position: center,
        rotation: euler_yxz(&frame),
    }
}

// ─── Synthesis ────────────────────────────────────────────────────────────────

struct BodyPlan<'a> {
    bone: usize,
    template: &'a BodyTemplate,
    params: BodyParams,
    joint: &'a JointLimits,
    radius_from: Option<&'a (String, String)>,
    family: Option<&'a FamilyDefaults>,
}

/// Tabulated bones always get a body; other bones need a family entry and
/// at least one weighted vertex. Hidden bones never do.
fn plan_body<'a>(
    skeleton: &Skeleton,
    index: usize,
    cloud: &Cloud,
    tables: &'a PhysicsTables,
    families: &[BoneFamily],
    chain: ChainPosition,
) -> Option<BodyPlan<'a>> {
    if skeleton.info[index].hidden {
        return None;
    }
    let bone = &skeleton.bones[index];
    if let Some(ExplicitBody {
        template,
        params,
        joint,
        radius_from,
        ..
    }) = tables.explicit_for(&bone.name)
    {
        return Some(BodyPlan {
            bone: index,
            template,
            params: *params,
            joint,
            radius_from: radius_from.as_ref(),
            family: None,
        });
    }
    if cloud.positions.is_empty() {
        return None;
    }
    let defaults = tables.family_defaults(families[index])?;
    Some(BodyPlan {
        bone: index,
        template: &defaults.template,
        params: interpolate_params(defaults, chain),
        joint: &defaults.joint,
        radius_from: None,
        family: Some(defaults),
    })
}

fn joint_between(
    name: String,
    english_name: String,
    body_a: usize,
    body_b: usize,
    position: Vector3<f32>,
    limits: &JointLimits,
) -> Joint {
    let radians = |degrees: [f32; 3]| Vector3::from(degrees.map(f32::to_radians));
    Joint {
        name,
        english_name,
        body_a,
        body_b,
        position,
        rotation: Vector3::zeros(),
        translation_min: Vector3::from(limits.translation_min),
        translation_max: Vector3::from(limits.translation_max),
        rotation_min: radians(limits.rotation_min_deg),
        rotation_max: radians(limits.rotation_max_deg),
        spring_translation: Vector3::from(limits.spring_translation),
        spring_rotation: Vector3::from(limits.spring_rotation),
    }
}

/// Bodies for tabulated bones and bones with a vertex cloud, joined to the
/// nearest embodied ancestor.
pub fn synthesize_physics(skeleton: &Skeleton, vertices: &[Vertex], tables: &PhysicsTables) -> PhysicsAssembly {
    let count = skeleton.bones.len();
    let clouds = collect_clouds(count, vertices, tables.cloud_threshold);
    let families: Vec<BoneFamily> = (0..count)
        .map(|index| {
            let name = skeleton.info[index]
                .node_name
                .as_deref()
                .unwrap_or(&skeleton.bones[index].name);
            tables.family_of(name)
        })
        .collect();
    let chains = chain_positions(skeleton, &families);

    let plans: Vec<BodyPlan> = (0..count)
        .filter_map(|index| plan_body(skeleton, index, &clouds[index], tables, &families, chains[index]))
        .collect();

    let mut assembly = PhysicsAssembly::default();
    let mut body_of_bone: HashMap<usize, usize> = HashMap::new();
    for plan in &plans {
        let bone = &skeleton.bones[plan.bone];
        let cloud = &clouds[plan.bone];
        let fitted = match plan.template.shape {
            ShapeKind::Sphere => fit_sphere(skeleton, plan.bone, cloud, plan.template, plan.radius_from),
            ShapeKind::Box | ShapeKind::Capsule => fit_segment(skeleton, plan.bone, cloud, plan.template),
        };
        body_of_bone.insert(plan.bone, assembly.rigid_bodies.len());
        assembly.rigid_bodies.push(RigidBody {
            name: bone.name.clone(),
            english_name: bone.english_name.clone(),
            bone: Some(plan.bone),
            group: plan.template.group.min(15),
            collision_mask: plan.template.collision_mask(),
            shape: fitted.shape,
            size: fitted.size,
            position: fitted.position,
            rotation: fitted.rotation,
            mass: plan.params.mass,
            linear_damping: plan.params.linear_damping,
            angular_damping: plan.params.angular_damping,
            restitution: plan.params.restitution,
            friction: plan.params.friction,
            mode: RigidMode::from(plan.template.mode),
        });
    }

    for plan in &plans {
        if plan.template.mode == BodyMode::Static {
            continue;
        }
        let Some(ancestor) = nearest_embodied_ancestor(skeleton, plan.bone, &body_of_bone) else {
            continue;
        };
        let (body_a, body_b) = (body_of_bone[&ancestor], body_of_bone[&plan.bone]);
        assembly.joints.push(named_joint(&assembly.rigid_bodies, body_a, body_b, plan.joint));
    }

    for defaults in tables.families.iter().filter(|defaults| defaults.lateral_joints) {
        for (body_a, body_b) in lateral_pairs(skeleton, &plans, &chains, &body_of_bone, defaults) {
            assembly
                .joints
                .push(named_joint(&assembly.rigid_bodies, body_a, body_b, &defaults.joint));
        }
    }

    assembly
}

fn named_joint(bodies: &[RigidBody], body_a: usize, body_b: usize, limits: &JointLimits) -> Joint {
    let (a, b) = (&bodies[body_a], &bodies[body_b]);
    joint_between(
        format!("{}|{}", a.name, b.name),
        format!("{}|{}", a.english_name, b.english_name),
        body_a,
        body_b,
        b.position,
        limits,
    )
}

/// Closest ancestor that already owns a rigid body.
fn nearest_embodied_ancestor(
    skeleton: &Skeleton,
    bone: usize,
    body_of_bone: &HashMap<usize, usize>,
) -> Option<usize> {
    let mut cursor = skeleton.bones[bone].parent;
    let mut steps = 0;
    while let Some(parent) = cursor {
        if body_of_bone.contains_key(&parent) {
            return Some(parent);
        }
        steps += 1;
        if steps > skeleton.bones.len() {
            return None;
        }
        cursor = skeleton.bones.get(parent).and_then(|bone| bone.parent);
    }
    None
}

/// Each family body linked to its nearest neighbour at the same chain depth.
fn lateral_pairs(
    skeleton: &Skeleton,
    plans: &[BodyPlan],
    chains: &[ChainPosition],
    body_of_bone: &HashMap<usize, usize>,
    defaults: &FamilyDefaults,
) -> Vec<(usize, usize)> {
    let mut by_depth: HashMap<usize, Vec<usize>> = HashMap::new();
    for plan in plans {
        if plan.family.is_some_and(|family| family.family == defaults.family) {
            by_depth
                .entry(chains[plan.bone].from_root)
                .or_default()
                .push(plan.bone);
        }
    }

    let mut pairs = BTreeSet::new();
    for bones in by_depth.values() {
        for &bone in bones {
            let position = skeleton.position(bone);
            let nearest = bones
                .iter()
                .copied()
                .filter(|other| *other != bone)
                .min_by(|a, b| {
                    let da = (skeleton.position(*a) - position).norm_squared();
                    let db = (skeleton.position(*b) - position).norm_squared();
                    da.total_cmp(&db)
                });
            if let Some(other) = nearest {
                let (a, b) = (body_of_bone[&bone], body_of_bone[&other]);
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use nalgebra::{Rotation3, Vector2};
    use serde_json::json;

    use super::*;
    use crate::convert::{reader::SourceAsset, skeleton::build_skeleton, taxonomy::Taxonomy};
    use crate::pmx::SkinDeform;

    fn skeleton() -> Skeleton {
        let asset = SourceAsset {
            json: json!({
                "nodes": [
                    {"name": "J_Bip_C_Hips", "translation": [0.0, 1.0, 0.0], "children": [1, 5, 6]},
                    {"name": "J_Bip_C_Head", "translation": [0.0, 0.5, 0.0], "children": [2, 4]},
                    {"name": "J_Sec_Hair1_01", "translation": [0.0, 0.1, -0.1], "children": [3]},
                    {"name": "J_Sec_Hair1_02", "translation": [0.0, -0.1, 0.0], "children": [7]},
                    {"name": "J_Sec_Hair2_01", "translation": [0.1, 0.1, -0.1]},
                    {"name": "J_Sec_L_Skirt_01", "translation": [0.1, -0.1, 0.0]},
                    {"name": "J_Sec_R_Skirt_01", "translation": [-0.1, -0.1, 0.0]},
                    {"name": "J_Sec_Hair1_03", "translation": [0.0, -0.1, 0.0]}
                ],
                "extensions": {"VRM": {"humanoid": {"humanBones": [
                    {"bone": "hips", "node": 0},
                    {"bone": "head", "node": 1}
                ]}}}
            }),
            bin: Vec::new(),
        };
        build_skeleton(&asset, &Taxonomy::default()).expect("skeleton")
    }

    fn vertex_on(skeleton: &Skeleton, bone: usize, offset: Vector3<f32>) -> Vertex {
        Vertex {
            position: skeleton.position(bone) + offset,
            normal: Vector3::z(),
            uv: Vector2::zeros(),
            deform: SkinDeform::Bdef1 { bone },
            edge_scale: 1.0,
        }
    }

    fn cloud_vertices(skeleton: &Skeleton, names: &[&str]) -> Vec<Vertex> {
        names
            .iter()
            .flat_map(|name| {
                let bone = skeleton.index_of(name).expect("bone");
                [
                    vertex_on(skeleton, bone, Vector3::new(0.2, 0.0, 0.0)),
                    vertex_on(skeleton, bone, Vector3::new(-0.2, 0.0, 0.0)),
                ]
            })
            .collect()
    }

    fn body<'a>(assembly: &'a PhysicsAssembly, name: &str) -> Option<&'a RigidBody> {
        assembly.rigid_bodies.iter().find(|body| body.name == name)
    }

    #[test]
    fn given_bone_without_vertices_or_entry_when_synthesizing_then_no_body_or_joint_refers_to_it() {
        let skeleton = skeleton();
        let vertices = cloud_vertices(&skeleton, &["J_Sec_Hair1_01", "J_Sec_Hair1_02", "J_Sec_Hair1_03"]);

        let assembly = synthesize_physics(&skeleton, &vertices, &PhysicsTables::default());

        assert!(body(&assembly, "J_Sec_Hair2_01").is_none());
        let bare = skeleton.index_of("J_Sec_Hair2_01").expect("bone");
        assert!(assembly.rigid_bodies.iter().all(|body| body.bone != Some(bare)));
        for joint in &assembly.joints {
            assert!(joint.body_a < assembly.rigid_bodies.len());
            assert!(joint.body_b < assembly.rigid_bodies.len());
            assert!(!joint.name.contains("J_Sec_Hair2_01"));
        }
    }

    #[test]
    fn given_hair_chain_when_synthesizing_then_joints_reach_nearest_embodied_ancestor() {
        let skeleton = skeleton();
        let vertices = cloud_vertices(&skeleton, &["J_Sec_Hair1_01", "J_Sec_Hair1_02", "J_Sec_Hair1_03"]);

        let assembly = synthesize_physics(&skeleton, &vertices, &PhysicsTables::default());

        let names: Vec<&str> = assembly.joints.iter().map(|joint| joint.name.as_str()).collect();
        assert!(names.contains(&"頭|J_Sec_Hair1_01"));
        assert!(names.contains(&"J_Sec_Hair1_01|J_Sec_Hair1_02"));
        assert!(names.contains(&"J_Sec_Hair1_02|J_Sec_Hair1_03"));

        let joint = assembly
            .joints
            .iter()
            .find(|joint| joint.name == "頭|J_Sec_Hair1_01")
            .expect("joint");
        assert!((joint.rotation_max.x - 20f32.to_radians()).abs() < 1e-6);
        assert_eq!(joint.translation_min, Vector3::zeros());
    }

    #[test]
    fn given_hair_chain_when_synthesizing_then_mass_falls_with_square_of_tip_distance() {
        let skeleton = skeleton();
        let vertices = cloud_vertices(&skeleton, &["J_Sec_Hair1_01", "J_Sec_Hair1_02", "J_Sec_Hair1_03"]);

        let assembly = synthesize_physics(&skeleton, &vertices, &PhysicsTables::default());

        let root = body(&assembly, "J_Sec_Hair1_01").expect("root");
        let middle = body(&assembly, "J_Sec_Hair1_02").expect("middle");
        let tip = body(&assembly, "J_Sec_Hair1_03").expect("tip");
        assert!((root.mass - 1.0).abs() < 1e-6);
        assert!((middle.mass - 4.0 / 9.0).abs() < 1e-6);
        assert!((tip.mass - 1.0 / 9.0).abs() < 1e-6);
        assert!((root.linear_damping - 0.5).abs() < 1e-6);
        assert!((middle.linear_damping - 0.7).abs() < 1e-6);
        assert!((tip.linear_damping - 0.9).abs() < 1e-6);
        assert_eq!(root.mode, RigidMode::Dynamic);
        assert_eq!(root.shape, RigidShape::Capsule);
        assert_eq!(root.group, 1);
        assert_eq!(root.collision_mask & (1 << 1), 0);
    }

    #[test]
    fn given_explicit_entries_when_synthesizing_then_tabulated_bones_get_static_bodies() {
        let skeleton = skeleton();

        let assembly = synthesize_physics(&skeleton, &[], &PhysicsTables::default());

        let head = body(&assembly, "頭").expect("head");
        assert_eq!(head.shape, RigidShape::Sphere);
        assert_eq!(head.mode, RigidMode::Static);
        assert!(body(&assembly, "下半身").is_some());
        // 首 has no source node in this asset.
        assert!(body(&assembly, "首").is_none());
        assert!(assembly.joints.is_empty());
    }

    #[test]
    fn given_two_skirt_panels_when_synthesizing_then_a_lateral_joint_links_them() {
        let skeleton = skeleton();
        let vertices = cloud_vertices(&skeleton, &["J_Sec_L_Skirt_01", "J_Sec_R_Skirt_01"]);

        let assembly = synthesize_physics(&skeleton, &vertices, &PhysicsTables::default());

        let lateral: Vec<&Joint> = assembly
            .joints
            .iter()
            .filter(|joint| joint.name.contains("L_Skirt") && joint.name.contains("R_Skirt"))
            .collect();
        assert_eq!(lateral.len(), 1);
        assert_eq!(
            assembly
                .joints
                .iter()
                .filter(|joint| joint.name.starts_with("下半身|"))
                .count(),
            2
        );
        assert_eq!(body(&assembly, "J_Sec_L_Skirt_01").expect("skirt").shape, RigidShape::Box);
    }

    #[test]
    fn given_composed_rotation_when_extracting_yxz_then_angles_round_trip() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.3)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), 0.2)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), 0.1);

        let angles = euler_yxz(rotation.matrix());

        assert!((angles - Vector3::new(0.2, 0.3, 0.1)).norm() < 1e-5);
    }

    #[test]
    fn given_vertical_bone_and_forward_normals_when_framing_then_frame_is_identity() {
        let frame = bone_frame(&Vector3::new(0.0, 2.0, 0.0), &Vector3::new(0.0, 0.0, 3.0));

        assert!((frame - Matrix3::identity()).norm() < 1e-6);
        assert!(euler_yxz(&frame).norm() < 1e-6);
    }
}
