use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::reader::SourceAsset;
use super::skeleton::Skeleton;
use super::taxonomy::Taxonomy;
use super::types::{MORPH_BIND_UNRESOLVED, ValidationIssue};
use crate::error::ConvertError;
use crate::pmx::{
    BoneFlags, DisplayFrame, DisplayItem, GroupOffset, Morph, MorphKind, MorphPanel,
};

const ROOT_FRAME: &str = "Root";
const EXPRESSION_FRAME: &str = "表情";
const OTHER_FRAME: &str = "その他";

/// Panel from VRoid blend-shape naming (`Fcl_BRW_*`, `Fcl_EYE_*`, `Fcl_MTH_*`).
pub fn panel_for_name(name: &str) -> MorphPanel {
    if name.contains("_BRW_") {
        MorphPanel::Eyebrow
    } else if name.contains("_EYE_") {
        MorphPanel::Eye
    } else if name.contains("_MTH_") {
        MorphPanel::Mouth
    } else {
        MorphPanel::Other
    }
}

// ─── Group morphs ─────────────────────────────────────────────────────────────

/// `name`, else `name_<group>`, else `name_<group>_2`, `_3`, ... until free.
fn unique_name(name: &str, group_index: usize, taken: &HashMap<String, usize>) -> String {
    if !taken.contains_key(name) {
        return name.to_string();
    }
    let base = format!("{name}_{group_index}");
    let mut candidate = base.clone();
    let mut attempt = 2;
    while taken.contains_key(&candidate) {
        candidate = format!("{base}_{attempt}");
        attempt += 1;
    }
    candidate
}

/// Vertex morphs plus blend-shape groups and the configured morph pairs.
///
/// Output order is the vertex morphs as given, then one group morph per named
/// blend-shape group, then every configured pair whose name is still free
/// and that can resolve at least one bind. Group bind weights are percentages
/// and are scaled to unit weights. A group whose name is already taken gets a
/// suffix so that no two morphs share a name.
///
/// Binds to a missing mesh target are dropped with a warning; pairs whose
/// binds all miss are skipped with an info issue. Groups that end up
/// referencing themselves fail the stage.
pub fn build_morphs(
    asset: &SourceAsset,
    vertex_morphs: Vec<Morph>,
    target_morphs: &HashMap<(usize, usize), usize>,
    taxonomy: &Taxonomy,
) -> Result<(Vec<Morph>, Vec<ValidationIssue>), ConvertError> {
    let mut morphs = vertex_morphs;
    let mut issues = Vec::new();
    let mut names: HashMap<String, usize> = morphs
        .iter()
        .enumerate()
        .map(|(index, morph)| (morph.name.clone(), index))
        .collect();
    let mut presets: HashMap<String, usize> = HashMap::new();

    let groups = asset
        .json
        .pointer("/extensions/VRM/blendShapeMaster/blendShapeGroups")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for (group_index, group) in groups.iter().enumerate() {
        let Some(name) = group
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        let binds = group
            .get("binds")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut offsets = Vec::with_capacity(binds.len());
        for bind in binds {
            let mesh = bind.get("mesh").and_then(Value::as_u64).map(|v| v as usize);
            let target = bind.get("index").and_then(Value::as_u64).map(|v| v as usize);
            let weight = bind.get("weight").and_then(Value::as_f64).unwrap_or(100.0) as f32;
            match mesh.zip(target).and_then(|key| target_morphs.get(&key)) {
                Some(morph) => offsets.push(GroupOffset {
                    morph: *morph,
                    weight: weight / 100.0,
                }),
                None => issues.push(ValidationIssue::warning(
                    MORPH_BIND_UNRESOLVED,
                    format!("blend shape group `{name}` binds a missing target {mesh:?}/{target:?}"),
                )),
            }
        }

        let morph_name = unique_name(name, group_index, &names);
        morphs.push(Morph {
            name: morph_name.clone(),
            english_name: name.to_string(),
            panel: panel_for_name(name),
            kind: MorphKind::Group(offsets),
        });
        let index = morphs.len() - 1;
        names.insert(morph_name, index);
        if let Some(preset) = group.get("presetName").and_then(Value::as_str) {
            presets.entry(preset.to_lowercase()).or_insert(index);
        }
    }

    // Pairs may reference each other, so every surviving pair name is known
    // before binds are resolved.
    let candidates: Vec<_> = taxonomy
        .morph_pairs
        .iter()
        .filter(|pair| !names.contains_key(&pair.name))
        .collect();
    let candidate_names: HashSet<&str> = candidates.iter().map(|&pair| pair.name.as_str()).collect();
    let resolvable = |bind: &str| {
        names.contains_key(bind)
            || presets.contains_key(&bind.to_lowercase())
            || candidate_names.contains(bind)
    };
    let accepted: Vec<_> = candidates
        .into_iter()
        .filter(|pair| {
            let found = pair.binds.iter().any(|bind| resolvable(bind));
            if !found {
                issues.push(ValidationIssue::info(
                    MORPH_BIND_UNRESOLVED,
                    format!("morph `{}` skipped: none of {:?} exist", pair.name, pair.binds),
                ));
            }
            found
        })
        .collect();

    let first_pair = morphs.len();
    for (offset, pair) in accepted.iter().enumerate() {
        names.insert(pair.name.clone(), first_pair + offset);
    }
    for pair in accepted {
        let offsets = pair
            .binds
            .iter()
            .filter_map(|bind| {
                names
                    .get(bind)
                    .or_else(|| presets.get(&bind.to_lowercase()))
                    .map(|morph| GroupOffset {
                        morph: *morph,
                        weight: 1.0,
                    })
            })
            .collect();
        morphs.push(Morph {
            name: pair.name.clone(),
            english_name: pair.english_name.clone(),
            panel: pair.panel,
            kind: MorphKind::Group(offsets),
        });
    }

    check_group_cycles(&morphs)?;
    Ok((morphs, issues))
}

/// Reject group morphs that reach themselves through other groups.
pub(crate) fn check_group_cycles(morphs: &[Morph]) -> Result<(), ConvertError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    fn visit(index: usize, morphs: &[Morph], marks: &mut [Mark]) -> Result<(), ConvertError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Active => return Err(ConvertError::CyclicMorph(morphs[index].name.clone())),
            Mark::Unvisited => {}
        }
        marks[index] = Mark::Active;
        if let MorphKind::Group(offsets) = &morphs[index].kind {
            for offset in offsets {
                if offset.morph < morphs.len() {
                    visit(offset.morph, morphs, marks)?;
                }
            }
        }
        marks[index] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; morphs.len()];
    for index in 0..morphs.len() {
        visit(index, morphs, &mut marks)?;
    }
    Ok(())
}

// ─── Display frames ───────────────────────────────────────────────────────────

/// `Root`, `表情`, one frame per table display group, then `その他`.
pub fn build_display_frames(skeleton: &Skeleton, morphs: &[Morph], taxonomy: &Taxonomy) -> Vec<DisplayFrame> {
    let root = taxonomy
        .root_name()
        .and_then(|name| skeleton.index_of(name))
        .unwrap_or(0);
    let visible = |index: &usize| {
        *index != root
            && skeleton.bones[*index]
                .flags
                .contains(BoneFlags::VISIBLE)
    };

    let mut frames = vec![
        DisplayFrame {
            name: ROOT_FRAME.to_string(),
            english_name: ROOT_FRAME.to_string(),
            special: true,
            items: if skeleton.bones.is_empty() {
                Vec::new()
            } else {
                vec![DisplayItem::Bone(root)]
            },
        },
        DisplayFrame {
            name: EXPRESSION_FRAME.to_string(),
            english_name: "Exp".to_string(),
            special: true,
            items: (0..morphs.len()).map(DisplayItem::Morph).collect(),
        },
    ];

    let group_names: HashSet<&str> = taxonomy
        .display_groups
        .iter()
        .map(|group| group.name.as_str())
        .collect();
    for group in &taxonomy.display_groups {
        let items: Vec<DisplayItem> = (0..skeleton.bones.len())
            .filter(visible)
            .filter(|index| skeleton.info[*index].display.as_deref() == Some(group.name.as_str()))
            .map(DisplayItem::Bone)
            .collect();
        frames.push(DisplayFrame {
            name: group.name.clone(),
            english_name: group.english_name.clone(),
            special: false,
            items,
        });
    }

    let others: Vec<DisplayItem> = (0..skeleton.bones.len())
        .filter(visible)
        .filter(|index| {
            skeleton.info[*index]
                .display
                .as_deref()
                .is_none_or(|display| !group_names.contains(display))
        })
        .map(DisplayItem::Bone)
        .collect();
    frames.push(DisplayFrame {
        name: OTHER_FRAME.to_string(),
        english_name: "Other".to_string(),
        special: false,
        items: others,
    });

    frames
}
