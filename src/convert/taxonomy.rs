//! Canonical bone taxonomy and physics tuning tables.
//!
//! Everything here is plain data. The built-in [`Default`] tables target
//! VRoid-style humanoids and the MMD semi-standard bone set; callers can load
//! replacements from JSON (see [`crate::settings`]).

use serde::{Deserialize, Serialize};

use crate::pmx::{BoneFlags, MorphPanel, RigidMode, RigidShape};

// ─── Bone roles ───────────────────────────────────────────────────────────────

/// Behaviour class of a canonical bone, assigned once in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BoneRole {
    Root,
    Center,
    ShoulderCancel,
    ArmTwist,
    ArmTwistSub,
    LegIK,
    ToeIK,
    WaistCancel,
    ShadowLeg,
    DisplayOnly,
    #[default]
    Generic,
}

impl BoneRole {
    /// Flags before data-driven bits (IK, fixed axis, local axes, tail) are added.
    pub fn base_flags(self) -> BoneFlags {
        let control = BoneFlags::ROTATABLE | BoneFlags::VISIBLE | BoneFlags::MANIPULABLE;
        match self {
            BoneRole::Root | BoneRole::Center | BoneRole::LegIK | BoneRole::ToeIK => {
                control | BoneFlags::TRANSLATABLE
            }
            BoneRole::Generic | BoneRole::ArmTwist => control,
            BoneRole::ArmTwistSub | BoneRole::ShoulderCancel | BoneRole::WaistCancel => {
                BoneFlags::ROTATABLE | BoneFlags::EXTERNAL_ROTATION
            }
            BoneRole::ShadowLeg => {
                BoneFlags::ROTATABLE | BoneFlags::VISIBLE | BoneFlags::EXTERNAL_ROTATION
            }
            BoneRole::DisplayOnly => BoneFlags::ROTATABLE,
        }
    }

    /// Twist bones carry a fixed rotation axis along their segment.
    pub fn has_fixed_axis(self) -> bool {
        matches!(self, BoneRole::ArmTwist | BoneRole::ArmTwistSub)
    }
}

// ─── Bone descriptors ─────────────────────────────────────────────────────────

/// How a bone's position is derived.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Placement {
    /// World position of the source node; the parent's position when absent.
    #[default]
    Source,
    Origin,
    /// X = Z = 0, Y = mean height of two bones.
    LegMidHeight { upper: String, lower: String },
    Copy(String),
    /// Position of a bone projected onto the floor.
    Floor(String),
    /// `from + (to - from) * ratio`; ratios above 1 extrapolate.
    Lerp { from: String, to: String, ratio: f32 },
}

/// Display end of a bone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum TailSpec {
    /// First child sharing the naming convention, else continue the parent direction.
    #[default]
    Auto,
    None,
    Bone(String),
    /// Offset in output units.
    Offset([f32; 3]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub source: String,
    pub factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IkLinkSpec {
    pub bone: String,
    /// Lower and upper rotation limits in degrees.
    #[serde(default)]
    pub limit_deg: Option<([f32; 3], [f32; 3])>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IkSpec {
    pub target: String,
    pub loop_count: i32,
    pub limit_deg: f32,
    pub links: Vec<IkLinkSpec>,
}

/// One canonical bone of the output taxonomy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoneSpec {
    pub name: String,
    pub english_name: String,
    /// Humanoid role (`leftUpperArm`) or raw node name feeding this bone.
    /// `None` marks a synthesized bone.
    pub source: Option<String>,
    pub parent: Option<String>,
    pub tail: TailSpec,
    pub role: BoneRole,
    /// Display group name.
    pub display: Option<String>,
    pub placement: Placement,
    pub effect: Option<EffectSpec>,
    pub ik: Option<IkSpec>,
    pub layer: i32,
    pub local_axes: bool,
}

impl BoneSpec {
    pub fn new(name: &str, english_name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            english_name: english_name.to_string(),
            parent: parent.map(ToOwned::to_owned),
            ..Self::default()
        }
    }

    fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    fn role(mut self, role: BoneRole) -> Self {
        self.role = role;
        self
    }

    fn display(mut self, display: &str) -> Self {
        self.display = Some(display.to_string());
        self
    }

    fn placed(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    fn tail(mut self, tail: TailSpec) -> Self {
        self.tail = tail;
        self
    }

    fn tail_bone(self, bone: &str) -> Self {
        self.tail(TailSpec::Bone(bone.to_string()))
    }

    fn effect(mut self, source: &str, factor: f32) -> Self {
        self.effect = Some(EffectSpec {
            source: source.to_string(),
            factor,
        });
        self
    }

    fn ik(mut self, ik: IkSpec) -> Self {
        self.ik = Some(ik);
        self
    }

    fn layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    fn local_axes(mut self) -> Self {
        self.local_axes = true;
        self
    }
}

// ─── Remapping tables ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonePair {
    pub from: String,
    pub to: String,
}

impl BonePair {
    fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// A limb segment `from → to` whose weight on `bones[0]` is spread over
/// `bones` by the vertex's position along the segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistChain {
    pub from: String,
    pub to: String,
    pub bones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphPair {
    pub name: String,
    pub english_name: String,
    pub panel: MorphPanel,
    /// Morph names referenced with weight 1.
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayGroup {
    pub name: String,
    pub english_name: String,
}

/// Canonical skeleton and the remapping rules that go with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    /// Canonical bones in output order. The first `Root` bone parents every
    /// unclassified root.
    pub bones: Vec<BoneSpec>,
    /// Raw node name → canonical bone name.
    pub synonyms: Vec<BonePair>,
    /// Weight folds applied before twist redistribution.
    pub folds: Vec<BonePair>,
    pub twist_chains: Vec<TwistChain>,
    /// Weight substitution onto alternate-deform bones.
    pub shadow_pairs: Vec<BonePair>,
    /// Receives vertices with no usable influence.
    pub fallback_bone: String,
    pub morph_pairs: Vec<MorphPair>,
    pub display_groups: Vec<DisplayGroup>,
}

impl Taxonomy {
    pub fn bone(&self, name: &str) -> Option<&BoneSpec> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    /// Canonical bone fed by a humanoid role or raw node name.
    pub fn bone_for_source(&self, source: &str) -> Option<&BoneSpec> {
        self.bones
            .iter()
            .find(|bone| bone.source.as_deref() == Some(source))
    }

    pub fn synonym(&self, node_name: &str) -> Option<&str> {
        self.synonyms
            .iter()
            .find(|pair| pair.from == node_name)
            .map(|pair| pair.to.as_str())
    }

    /// Name of the bone that parents unclassified roots.
    pub fn root_name(&self) -> Option<&str> {
        self.bones
            .iter()
            .find(|bone| bone.role == BoneRole::Root)
            .or_else(|| self.bones.first())
            .map(|bone| bone.name.as_str())
    }
}

struct Side {
    jp: &'static str,
    vrm: &'static str,
    en: &'static str,
}

const SIDES: [Side; 2] = [
    Side {
        jp: "左",
        vrm: "left",
        en: "_L",
    },
    Side {
        jp: "右",
        vrm: "right",
        en: "_R",
    },
];

const DISPLAY_CENTER: &str = "センター";
const DISPLAY_UPPER: &str = "体(上)";
const DISPLAY_ARM: &str = "腕";
const DISPLAY_FINGER: &str = "指";
const DISPLAY_LOWER: &str = "体(下)";
const DISPLAY_LEG: &str = "足";

fn core_bones() -> Vec<BoneSpec> {
    vec![
        BoneSpec::new("全ての親", "master", None)
            .role(BoneRole::Root)
            .placed(Placement::Origin)
            .tail(TailSpec::Offset([0.0, 1.0, 0.0])),
        BoneSpec::new("センター", "center", Some("全ての親"))
            .role(BoneRole::Center)
            .display(DISPLAY_CENTER)
            .placed(Placement::LegMidHeight {
                upper: "左足".to_string(),
                lower: "左ひざ".to_string(),
            })
            .tail(TailSpec::Offset([0.0, -1.0, 0.0])),
        BoneSpec::new("グルーブ", "groove", Some("センター"))
            .role(BoneRole::Center)
            .display(DISPLAY_CENTER)
            .placed(Placement::LegMidHeight {
                upper: "左足".to_string(),
                lower: "左ひざ".to_string(),
            })
            .tail(TailSpec::Offset([0.0, 1.0, 0.0])),
        BoneSpec::new("腰", "waist", Some("グルーブ"))
            .display(DISPLAY_LOWER)
            .placed(Placement::Copy("下半身".to_string()))
            .tail(TailSpec::Offset([0.0, -1.0, 0.0])),
        BoneSpec::new("上半身", "upper body", Some("腰"))
            .source("spine")
            .display(DISPLAY_UPPER),
        BoneSpec::new("上半身2", "upper body2", Some("上半身"))
            .source("chest")
            .display(DISPLAY_UPPER),
        BoneSpec::new("上半身3", "upper body3", Some("上半身2"))
            .source("upperChest")
            .display(DISPLAY_UPPER),
        BoneSpec::new("首", "neck", Some("上半身3"))
            .source("neck")
            .display(DISPLAY_UPPER)
            .tail_bone("頭"),
        BoneSpec::new("頭", "head", Some("首"))
            .source("head")
            .display(DISPLAY_UPPER)
            .tail(TailSpec::Offset([0.0, 1.5, 0.0])),
        BoneSpec::new("左目", "eye_L", Some("頭"))
            .source("leftEye")
            .display(DISPLAY_UPPER)
            .tail(TailSpec::Offset([0.0, 0.0, -1.0])),
        BoneSpec::new("右目", "eye_R", Some("頭"))
            .source("rightEye")
            .display(DISPLAY_UPPER)
            .tail(TailSpec::Offset([0.0, 0.0, -1.0])),
        BoneSpec::new("下半身", "lower body", Some("腰"))
            .source("hips")
            .display(DISPLAY_LOWER)
            .tail(TailSpec::Offset([0.0, -1.0, 0.0])),
    ]
}

fn lerp(from: &str, to: &str, ratio: f32) -> Placement {
    Placement::Lerp {
        from: from.to_string(),
        to: to.to_string(),
        ratio,
    }
}

fn arm_bones(side: &Side) -> Vec<BoneSpec> {
    let jp = side.jp;
    let en = side.en;
    let name = |base: &str| format!("{jp}{base}");
    let english = |base: &str| format!("{base}{en}");
    let role = |base: &str| format!("{}{base}", side.vrm);

    let mut bones = vec![
        BoneSpec::new(&name("肩P"), &english("shoulderP"), Some("上半身3"))
            .display(DISPLAY_ARM)
            .placed(Placement::Copy(name("肩")))
            .tail(TailSpec::None),
        BoneSpec::new(&name("肩"), &english("shoulder"), Some(&name("肩P")))
            .source(&role("Shoulder"))
            .display(DISPLAY_ARM)
            .tail_bone(&name("腕")),
        BoneSpec::new(&name("肩C"), &english("shoulderC"), Some(&name("肩")))
            .role(BoneRole::ShoulderCancel)
            .placed(Placement::Copy(name("腕")))
            .effect(&name("肩P"), -1.0)
            .tail(TailSpec::None),
        BoneSpec::new(&name("腕"), &english("arm"), Some(&name("肩C")))
            .source(&role("UpperArm"))
            .display(DISPLAY_ARM)
            .tail_bone(&name("ひじ"))
            .local_axes(),
    ];
    bones.extend(twist_bones(side, "腕", "ひじ", "arm twist", &name("腕")));
    bones.push(
        BoneSpec::new(&name("ひじ"), &english("elbow"), Some(&name("腕捩")))
            .source(&role("LowerArm"))
            .display(DISPLAY_ARM)
            .tail_bone(&name("手首"))
            .local_axes(),
    );
    bones.extend(twist_bones(side, "手", "手首", "wrist twist", &name("ひじ")));
    bones.push(
        BoneSpec::new(&name("手首"), &english("wrist"), Some(&name("手捩")))
            .source(&role("Hand"))
            .display(DISPLAY_ARM)
            .tail_bone(&name("中指１"))
            .local_axes(),
    );
    bones.extend(finger_bones(side));
    bones
}

/// Main twist bone at the segment midpoint plus three followers at ¼, ½, ¾.
fn twist_bones(
    side: &Side,
    prefix: &str,
    segment_end: &str,
    english_base: &str,
    segment_start: &str,
) -> Vec<BoneSpec> {
    let jp = side.jp;
    let main = format!("{jp}{prefix}捩");
    let end = format!("{jp}{segment_end}");

    let mut bones = vec![
        BoneSpec::new(&main, &format!("{english_base}{}", side.en), Some(segment_start))
            .role(BoneRole::ArmTwist)
            .display(DISPLAY_ARM)
            .placed(lerp(segment_start, &end, 0.5))
            .tail(TailSpec::None),
    ];
    for step in 1..=3 {
        let ratio = step as f32 * 0.25;
        bones.push(
            BoneSpec::new(
                &format!("{main}{step}"),
                &format!("{english_base}{step}{}", side.en),
                Some(segment_start),
            )
            .role(BoneRole::ArmTwistSub)
            .placed(lerp(segment_start, &end, ratio))
            .effect(&main, ratio)
            .tail(TailSpec::None),
        );
    }
    bones
}

fn finger_bones(side: &Side) -> Vec<BoneSpec> {
    const FINGERS: [(&str, &str, &str, [&str; 3]); 5] = [
        ("親指", "thumb", "Thumb", ["０", "１", "２"]),
        ("人指", "index", "Index", ["１", "２", "３"]),
        ("中指", "middle", "Middle", ["１", "２", "３"]),
        ("薬指", "ring", "Ring", ["１", "２", "３"]),
        ("小指", "little", "Little", ["１", "２", "３"]),
    ];
    const SEGMENTS: [&str; 3] = ["Proximal", "Intermediate", "Distal"];

    let jp = side.jp;
    let hand = format!("{jp}手首");
    let mut bones = Vec::new();
    for (finger, english, vrm, digits) in FINGERS {
        let names: Vec<String> = digits
            .iter()
            .map(|digit| format!("{jp}{finger}{digit}"))
            .collect();
        let tip = format!("{jp}{finger}先");

        for (segment, name) in names.iter().enumerate() {
            let parent = if segment == 0 {
                hand.clone()
            } else {
                names[segment - 1].clone()
            };
            let tail = names.get(segment + 1).unwrap_or(&tip);
            bones.push(
                BoneSpec::new(
                    name,
                    &format!("{english}{}{}", segment + 1, side.en),
                    Some(&parent),
                )
                .source(&format!("{}{vrm}{}", side.vrm, SEGMENTS[segment]))
                .display(DISPLAY_FINGER)
                .tail_bone(tail)
                .local_axes(),
            );
        }
        bones.push(
            BoneSpec::new(&tip, &format!("{english} tip{}", side.en), Some(&names[2]))
                .role(BoneRole::DisplayOnly)
                .placed(lerp(&names[1], &names[2], 2.0))
                .tail(TailSpec::None),
        );
    }
    bones
}

fn leg_bones(side: &Side) -> Vec<BoneSpec> {
    let jp = side.jp;
    let name = |base: &str| format!("{jp}{base}");
    let english = |base: &str| format!("{base}{}", side.en);
    let role = |base: &str| format!("{}{base}", side.vrm);
    let cancel = format!("腰キャンセル{jp}");

    vec![
        BoneSpec::new(&cancel, &english("waist cancel"), Some("下半身"))
            .role(BoneRole::WaistCancel)
            .placed(Placement::Copy(name("足")))
            .effect("腰", -1.0)
            .tail(TailSpec::None),
        BoneSpec::new(&name("足"), &english("leg"), Some(&cancel))
            .source(&role("UpperLeg"))
            .display(DISPLAY_LEG)
            .tail_bone(&name("ひざ")),
        BoneSpec::new(&name("ひざ"), &english("knee"), Some(&name("足")))
            .source(&role("LowerLeg"))
            .display(DISPLAY_LEG)
            .tail_bone(&name("足首")),
        BoneSpec::new(&name("足首"), &english("ankle"), Some(&name("ひざ")))
            .source(&role("Foot"))
            .display(DISPLAY_LEG)
            .tail_bone(&name("つま先")),
        BoneSpec::new(&name("つま先"), &english("toe"), Some(&name("足首")))
            .role(BoneRole::DisplayOnly)
            .placed(lerp(&name("足首"), &name("足先EX"), 2.0))
            .tail(TailSpec::None),
        BoneSpec::new(&name("足IK親"), &english("leg IK parent"), Some("全ての親"))
            .role(BoneRole::LegIK)
            .display(DISPLAY_LEG)
            .placed(Placement::Floor(name("足首")))
            .tail(TailSpec::Offset([0.0, 0.0, 1.0])),
        BoneSpec::new(&name("足ＩＫ"), &english("leg IK"), Some(&name("足IK親")))
            .role(BoneRole::LegIK)
            .display(DISPLAY_LEG)
            .placed(Placement::Copy(name("足首")))
            .tail(TailSpec::Offset([0.0, 0.0, 1.0]))
            .ik(IkSpec {
                target: name("足首"),
                loop_count: 40,
                limit_deg: 4.0,
                links: vec![
                    IkLinkSpec {
                        bone: name("ひざ"),
                        limit_deg: Some(([-180.0, 0.0, 0.0], [-0.5, 0.0, 0.0])),
                    },
                    IkLinkSpec {
                        bone: name("足"),
                        limit_deg: None,
                    },
                ],
            }),
        BoneSpec::new(&name("つま先ＩＫ"), &english("toe IK"), Some(&name("足ＩＫ")))
            .role(BoneRole::ToeIK)
            .display(DISPLAY_LEG)
            .placed(Placement::Copy(name("つま先")))
            .tail(TailSpec::Offset([0.0, -1.0, 0.0]))
            .ik(IkSpec {
                target: name("つま先"),
                loop_count: 3,
                limit_deg: 4.0,
                links: vec![IkLinkSpec {
                    bone: name("足首"),
                    limit_deg: None,
                }],
            }),
        BoneSpec::new(&name("足D"), &english("leg D"), Some(&cancel))
            .role(BoneRole::ShadowLeg)
            .placed(Placement::Copy(name("足")))
            .effect(&name("足"), 1.0)
            .layer(1)
            .tail(TailSpec::None),
        BoneSpec::new(&name("ひざD"), &english("knee D"), Some(&name("足D")))
            .role(BoneRole::ShadowLeg)
            .placed(Placement::Copy(name("ひざ")))
            .effect(&name("ひざ"), 1.0)
            .layer(1)
            .tail(TailSpec::None),
        BoneSpec::new(&name("足首D"), &english("ankle D"), Some(&name("ひざD")))
            .role(BoneRole::ShadowLeg)
            .placed(Placement::Copy(name("足首")))
            .effect(&name("足首"), 1.0)
            .layer(1)
            .tail(TailSpec::None),
        BoneSpec::new(&name("足先EX"), &english("toe EX"), Some(&name("足首D")))
            .source(&role("Toes"))
            .display(DISPLAY_LEG)
            .layer(1),
    ]
}

fn default_morph_pairs() -> Vec<MorphPair> {
    [
        ("あ", "a", MorphPanel::Mouth, "A"),
        ("い", "i", MorphPanel::Mouth, "I"),
        ("う", "u", MorphPanel::Mouth, "U"),
        ("え", "e", MorphPanel::Mouth, "E"),
        ("お", "o", MorphPanel::Mouth, "O"),
        ("まばたき", "blink", MorphPanel::Eye, "Blink"),
        ("ウィンク", "wink", MorphPanel::Eye, "Blink_L"),
        ("ウィンク右", "wink right", MorphPanel::Eye, "Blink_R"),
        ("笑い", "joy", MorphPanel::Eye, "Joy"),
        ("怒り", "angry", MorphPanel::Eyebrow, "Angry"),
        ("困る", "sorrow", MorphPanel::Eyebrow, "Sorrow"),
        ("にこり", "fun", MorphPanel::Eyebrow, "Fun"),
    ]
    .into_iter()
    .map(|(name, english_name, panel, bind)| MorphPair {
        name: name.to_string(),
        english_name: english_name.to_string(),
        panel,
        binds: vec![bind.to_string()],
    })
    .collect()
}

impl Default for Taxonomy {
    fn default() -> Self {
        let mut bones = core_bones();
        for side in &SIDES {
            bones.extend(arm_bones(side));
        }
        for side in &SIDES {
            bones.extend(leg_bones(side));
        }

        let mut folds = vec![BonePair::new("腰", "下半身")];
        let mut twist_chains = Vec::new();
        let mut shadow_pairs = Vec::new();
        for Side { jp, .. } in &SIDES {
            folds.push(BonePair::new(&format!("{jp}つま先"), &format!("{jp}足首")));
            twist_chains.push(TwistChain {
                from: format!("{jp}腕"),
                to: format!("{jp}ひじ"),
                bones: ["腕", "腕捩1", "腕捩2", "腕捩3"]
                    .iter()
                    .map(|bone| format!("{jp}{bone}"))
                    .collect(),
            });
            twist_chains.push(TwistChain {
                from: format!("{jp}ひじ"),
                to: format!("{jp}手首"),
                bones: ["ひじ", "手捩1", "手捩2", "手捩3"]
                    .iter()
                    .map(|bone| format!("{jp}{bone}"))
                    .collect(),
            });
            for bone in ["足", "ひざ", "足首"] {
                shadow_pairs.push(BonePair::new(
                    &format!("{jp}{bone}"),
                    &format!("{jp}{bone}D"),
                ));
            }
        }

        let synonyms = [
            ("Root", "全ての親"),
            ("J_Bip_C_Hips", "下半身"),
            ("J_Bip_C_Spine", "上半身"),
            ("J_Bip_C_Chest", "上半身2"),
            ("J_Bip_C_UpperChest", "上半身3"),
            ("J_Bip_C_Neck", "首"),
            ("J_Bip_C_Head", "頭"),
        ]
        .into_iter()
        .map(|(from, to)| BonePair::new(from, to))
        .collect();

        let display_groups = [
            (DISPLAY_CENTER, "Center"),
            (DISPLAY_UPPER, "Upper body"),
            (DISPLAY_ARM, "Arms"),
            (DISPLAY_FINGER, "Fingers"),
            (DISPLAY_LOWER, "Lower body"),
            (DISPLAY_LEG, "Legs"),
        ]
        .into_iter()
        .map(|(name, english_name)| DisplayGroup {
            name: name.to_string(),
            english_name: english_name.to_string(),
        })
        .collect();

        Self {
            bones,
            synonyms,
            folds,
            twist_chains,
            shadow_pairs,
            fallback_bone: "センター".to_string(),
            morph_pairs: default_morph_pairs(),
            display_groups,
        }
    }
}

// ─── Physics tables ───────────────────────────────────────────────────────────

/// Physics family of an unclassified bone, chosen by node-name marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoneFamily {
    Hair,
    Skirt,
    Sleeve,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Sphere,
    Box,
    Capsule,
}

impl From<ShapeKind> for RigidShape {
    fn from(value: ShapeKind) -> Self {
        match value {
            ShapeKind::Sphere => RigidShape::Sphere,
            ShapeKind::Box => RigidShape::Box,
            ShapeKind::Capsule => RigidShape::Capsule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyMode {
    Static,
    Dynamic,
    DynamicFollowsBone,
}

impl From<BodyMode> for RigidMode {
    fn from(value: BodyMode) -> Self {
        match value {
            BodyMode::Static => RigidMode::Static,
            BodyMode::Dynamic => RigidMode::Dynamic,
            BodyMode::DynamicFollowsBone => RigidMode::DynamicFollowsBone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyParams {
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
}

impl BodyParams {
    const fn new(
        mass: f32,
        linear_damping: f32,
        angular_damping: f32,
        restitution: f32,
        friction: f32,
    ) -> Self {
        Self {
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
        }
    }
}

/// Shape and collision settings shared by explicit and family entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyTemplate {
    pub shape: ShapeKind,
    /// Collision group, 0..=15.
    pub group: u8,
    /// Groups this body does not collide with.
    pub exclusion: Vec<u8>,
    pub mode: BodyMode,
    /// Scales cross-axis sizes (and the eye-distance head radius).
    pub size_factor: f32,
}

impl BodyTemplate {
    fn new(shape: ShapeKind, group: u8, exclusion: &[u8], mode: BodyMode, size_factor: f32) -> Self {
        Self {
            shape,
            group,
            exclusion: exclusion.to_vec(),
            mode,
            size_factor,
        }
    }

    /// On-disk mask: every group bit except the excluded ones.
    pub fn collision_mask(&self) -> u16 {
        let excluded = self
            .exclusion
            .iter()
            .filter(|group| **group < 16)
            .fold(0u16, |mask, group| mask | (1 << group));
        !excluded
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JointLimits {
    pub translation_min: [f32; 3],
    pub translation_max: [f32; 3],
    pub rotation_min_deg: [f32; 3],
    pub rotation_max_deg: [f32; 3],
    pub spring_translation: [f32; 3],
    pub spring_rotation: [f32; 3],
}

impl JointLimits {
    fn rotation(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            rotation_min_deg: min,
            rotation_max_deg: max,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitBody {
    pub bone: String,
    pub template: BodyTemplate,
    pub params: BodyParams,
    #[serde(default)]
    pub joint: JointLimits,
    /// Size a sphere from the distance between these two bones.
    #[serde(default)]
    pub radius_from: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyDefaults {
    pub family: BoneFamily,
    pub template: BodyTemplate,
    pub root: BodyParams,
    /// Only the damping values are used; mass follows the chain position.
    pub tip: BodyParams,
    pub joint: JointLimits,
    /// Link neighbouring chains at equal depth.
    #[serde(default)]
    pub lateral_joints: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMarker {
    pub marker: String,
    pub family: BoneFamily,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsTables {
    pub explicit: Vec<ExplicitBody>,
    pub families: Vec<FamilyDefaults>,
    /// Checked in order; no match means [`BoneFamily::Other`].
    pub markers: Vec<FamilyMarker>,
    /// Minimum weight for a vertex to count toward a bone's cloud.
    pub cloud_threshold: f32,
}

impl PhysicsTables {
    pub fn explicit_for(&self, bone: &str) -> Option<&ExplicitBody> {
        self.explicit.iter().find(|entry| entry.bone == bone)
    }

    pub fn family_defaults(&self, family: BoneFamily) -> Option<&FamilyDefaults> {
        self.families.iter().find(|entry| entry.family == family)
    }

    pub fn family_of(&self, node_name: &str) -> BoneFamily {
        self.markers
            .iter()
            .find(|marker| node_name.contains(&marker.marker))
            .map(|marker| marker.family)
            .unwrap_or(BoneFamily::Other)
    }
}

const BODY_GROUP: u8 = 0;
const STATIC_PARAMS: BodyParams = BodyParams::new(1.0, 0.5, 0.5, 0.0, 0.5);

impl Default for PhysicsTables {
    fn default() -> Self {
        let body = |bone: &str, shape: ShapeKind, size_factor: f32| ExplicitBody {
            bone: bone.to_string(),
            template: BodyTemplate::new(
                shape,
                BODY_GROUP,
                &[BODY_GROUP],
                BodyMode::Static,
                size_factor,
            ),
            params: STATIC_PARAMS,
            joint: JointLimits::default(),
            radius_from: None,
        };

        let mut explicit = vec![
            ExplicitBody {
                radius_from: Some(("左目".to_string(), "右目".to_string())),
                ..body("頭", ShapeKind::Sphere, 1.6)
            },
            body("首", ShapeKind::Capsule, 0.8),
            body("上半身", ShapeKind::Box, 0.9),
            body("上半身2", ShapeKind::Box, 0.9),
            body("下半身", ShapeKind::Box, 0.9),
        ];
        for Side { jp, .. } in &SIDES {
            explicit.push(body(&format!("{jp}腕"), ShapeKind::Capsule, 0.8));
            explicit.push(body(&format!("{jp}ひじ"), ShapeKind::Capsule, 0.8));
            explicit.push(body(&format!("{jp}手首"), ShapeKind::Box, 0.8));
            explicit.push(body(&format!("{jp}足"), ShapeKind::Capsule, 0.8));
            explicit.push(body(&format!("{jp}ひざ"), ShapeKind::Capsule, 0.8));
            explicit.push(body(&format!("{jp}足首"), ShapeKind::Box, 0.8));
        }

        let families = vec![
            FamilyDefaults {
                family: BoneFamily::Hair,
                template: BodyTemplate::new(ShapeKind::Capsule, 1, &[1], BodyMode::Dynamic, 0.6),
                root: BodyParams::new(1.0, 0.5, 0.5, 0.0, 0.5),
                tip: BodyParams::new(0.2, 0.9, 0.9, 0.0, 0.5),
                joint: JointLimits::rotation([-20.0, -10.0, -20.0], [20.0, 10.0, 20.0]),
                lateral_joints: false,
            },
            FamilyDefaults {
                family: BoneFamily::Skirt,
                template: BodyTemplate::new(ShapeKind::Box, 2, &[2], BodyMode::Dynamic, 0.7),
                root: BodyParams::new(1.0, 0.5, 0.5, 0.0, 0.5),
                tip: BodyParams::new(0.3, 0.9, 0.9, 0.0, 0.5),
                joint: JointLimits::rotation([-30.0, -10.0, -20.0], [30.0, 10.0, 20.0]),
                lateral_joints: true,
            },
            FamilyDefaults {
                family: BoneFamily::Sleeve,
                template: BodyTemplate::new(ShapeKind::Capsule, 3, &[3], BodyMode::Dynamic, 0.7),
                root: BodyParams::new(0.8, 0.6, 0.6, 0.0, 0.5),
                tip: BodyParams::new(0.2, 0.9, 0.9, 0.0, 0.5),
                joint: JointLimits::rotation([-15.0, -10.0, -15.0], [15.0, 10.0, 15.0]),
                lateral_joints: false,
            },
            FamilyDefaults {
                family: BoneFamily::Other,
                template: BodyTemplate::new(ShapeKind::Sphere, 4, &[4], BodyMode::Static, 0.8),
                root: STATIC_PARAMS,
                tip: STATIC_PARAMS,
                joint: JointLimits::default(),
                lateral_joints: false,
            },
        ];

        let markers = [
            ("Hair", BoneFamily::Hair),
            ("Skirt", BoneFamily::Skirt),
            ("Sleeve", BoneFamily::Sleeve),
            ("Tops", BoneFamily::Sleeve),
        ]
        .into_iter()
        .map(|(marker, family)| FamilyMarker {
            marker: marker.to_string(),
            family,
        })
        .collect();

        Self {
            explicit,
            families,
            markers,
            cloud_threshold: 0.4,
        }
    }
}

/// Every table the conversion consumes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningTables {
    pub taxonomy: Taxonomy,
    pub physics: PhysicsTables,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn given_default_taxonomy_when_listing_bones_then_names_are_unique_and_root_first() {
        let taxonomy = Taxonomy::default();

        let names: HashSet<&str> = taxonomy.bones.iter().map(|bone| bone.name.as_str()).collect();
        assert_eq!(names.len(), taxonomy.bones.len());
        assert_eq!(taxonomy.bones[0].name, "全ての親");
        assert_eq!(taxonomy.root_name(), Some("全ての親"));
    }

    #[test]
    fn given_default_taxonomy_when_checking_references_then_every_name_resolves() {
        let taxonomy = Taxonomy::default();
        let known = |name: &str| taxonomy.bone(name).is_some();

        for bone in &taxonomy.bones {
            if let Some(parent) = &bone.parent {
                assert!(known(parent), "{} parent {parent}", bone.name);
            }
            if let TailSpec::Bone(tail) = &bone.tail {
                assert!(known(tail), "{} tail {tail}", bone.name);
            }
            if let Some(effect) = &bone.effect {
                assert!(known(&effect.source), "{} effect", bone.name);
            }
        }
        for chain in &taxonomy.twist_chains {
            assert!(known(&chain.from) && known(&chain.to));
            assert!(chain.bones.iter().all(|bone| known(bone)));
        }
        assert!(known(&taxonomy.fallback_bone));
    }

    #[test]
    fn given_twist_sub_bone_when_reading_table_then_effect_ratio_matches_position() {
        let taxonomy = Taxonomy::default();
        let sub = taxonomy.bone("左腕捩2").expect("twist sub bone");

        assert_eq!(sub.role, BoneRole::ArmTwistSub);
        let effect = sub.effect.as_ref().expect("effect");
        assert_eq!(effect.source, "左腕捩");
        assert!((effect.factor - 0.5).abs() < 1e-6);
        assert!(matches!(sub.placement, Placement::Lerp { ratio, .. } if (ratio - 0.5).abs() < 1e-6));
    }

    #[test]
    fn given_exclusion_list_when_building_mask_then_excluded_bits_are_cleared() {
        let template = BodyTemplate::new(ShapeKind::Box, 2, &[2, 4], BodyMode::Dynamic, 1.0);

        let mask = template.collision_mask();

        assert_eq!(mask & (1 << 2), 0);
        assert_eq!(mask & (1 << 4), 0);
        assert_ne!(mask & 1, 0);
    }

    #[test]
    fn given_node_names_when_classifying_family_then_markers_apply() {
        let tables = PhysicsTables::default();

        assert_eq!(tables.family_of("J_Sec_Hair1_01"), BoneFamily::Hair);
        assert_eq!(tables.family_of("J_Sec_L_SkirtBack0_01"), BoneFamily::Skirt);
        assert_eq!(tables.family_of("J_Sec_L_TopsUpperArmInside"), BoneFamily::Sleeve);
        assert_eq!(tables.family_of("J_Sec_L_Bust1"), BoneFamily::Other);
    }

    #[test]
    fn given_partial_json_when_deserializing_tables_then_missing_parts_use_defaults() {
        let json = r#"{"physics": {"cloud_threshold": 0.5}}"#;

        let tables: TuningTables = serde_json::from_str(json).expect("parse tables");

        assert_eq!(tables.taxonomy, Taxonomy::default());
        assert!((tables.physics.cloud_threshold - 0.5).abs() < 1e-6);
        assert_eq!(tables.physics.families, PhysicsTables::default().families);
    }
}
