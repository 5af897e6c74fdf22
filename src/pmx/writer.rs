use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use nalgebra::{Vector2, Vector3};

use super::{
    Bone, BoneFlags, BoneTail, DisplayFrame, DisplayItem, Joint, Material, Morph, MorphKind,
    PmxModel, RigidBody, SkinDeform, Toon, Vertex,
};
use crate::error::ConvertError;

const PMX_MAGIC: &[u8; 4] = b"PMX ";
const PMX_VERSION: f32 = 2.0;
/// Number of globals following the header-size byte.
const HEADER_GLOBALS: u8 = 8;
const ENCODING_UTF16LE: u8 = 0;
const ADDITIONAL_UV_COUNT: u8 = 0;

/// Byte width used for each index domain of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWidths {
    pub vertex: u8,
    pub texture: u8,
    pub material: u8,
    pub bone: u8,
    pub morph: u8,
    pub rigid_body: u8,
}

impl IndexWidths {
    pub fn for_model(model: &PmxModel) -> Self {
        Self {
            vertex: index_width(model.vertices.len()),
            texture: index_width(model.textures.len()),
            material: index_width(model.materials.len()),
            bone: index_width(model.bones.len()),
            morph: index_width(model.morphs.len()),
            rigid_body: index_width(model.rigid_bodies.len()),
        }
    }
}

/// Smallest index width that can address a domain of `domain_size` items.
pub fn index_width(domain_size: usize) -> u8 {
    if domain_size <= 128 {
        1
    } else if domain_size <= 32767 {
        2
    } else {
        4
    }
}

/// What the writer had to adjust while serializing.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    pub widths: Option<IndexWidths>,
    pub bytes_written: usize,
    /// Text fields that could not be encoded and were replaced.
    pub placeholders: Vec<String>,
}

/// Serialize `model` as PMX 2.0 (UTF-16LE text, no additional UVs).
pub fn write_pmx<W: Write>(model: &PmxModel, writer: W) -> Result<WriteSummary, ConvertError> {
    let widths = IndexWidths::for_model(model);
    let mut pmx = PmxWriter {
        out: CountingWriter {
            inner: writer,
            written: 0,
        },
        widths,
        placeholders: Vec::new(),
    };

    pmx.write_header(model)?;
    pmx.write_vertices(&model.vertices)?;
    pmx.write_faces(&model.indices)?;
    pmx.write_textures(&model.textures)?;
    pmx.write_materials(&model.materials)?;
    pmx.write_bones(&model.bones)?;
    pmx.write_morphs(&model.morphs)?;
    pmx.write_display_frames(&model.display_frames)?;
    pmx.write_rigid_bodies(&model.rigid_bodies)?;
    pmx.write_joints(&model.joints)?;
    pmx.out.flush()?;

    Ok(WriteSummary {
        widths: Some(widths),
        bytes_written: pmx.out.written,
        placeholders: pmx.placeholders,
    })
}

struct CountingWriter<W> {
    inner: W,
    written: usize,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.written += written;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct PmxWriter<W: Write> {
    out: CountingWriter<W>,
    widths: IndexWidths,
    placeholders: Vec<String>,
}

/// UTF-16LE bytes of `text`, or `None` when it cannot be stored as a PMX
/// text field.
fn encode_text(text: &str) -> Option<Vec<u8>> {
    if text.contains('\0') {
        return None;
    }
    let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    i32::try_from(bytes.len()).ok()?;
    Some(bytes)
}

impl<W: Write> PmxWriter<W> {
    // ─── Primitives ───────────────────────────────────────────────────────────

    fn write_text(&mut self, text: &str, placeholder: &str) -> Result<(), ConvertError> {
        let bytes = match encode_text(text) {
            Some(bytes) => bytes,
            None => {
                self.placeholders.push(placeholder.to_string());
                placeholder
                    .encode_utf16()
                    .flat_map(u16::to_le_bytes)
                    .collect()
            }
        };
        self.out.write_i32::<LittleEndian>(bytes.len() as i32)?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    fn write_count(&mut self, count: usize) -> Result<(), ConvertError> {
        self.out.write_i32::<LittleEndian>(count as i32)?;
        Ok(())
    }

    fn write_vec2(&mut self, value: &Vector2<f32>) -> Result<(), ConvertError> {
        self.out.write_f32::<LittleEndian>(value.x)?;
        self.out.write_f32::<LittleEndian>(value.y)?;
        Ok(())
    }

    fn write_vec3(&mut self, value: &Vector3<f32>) -> Result<(), ConvertError> {
        for component in value.iter() {
            self.out.write_f32::<LittleEndian>(*component)?;
        }
        Ok(())
    }

    fn write_floats(&mut self, values: &[f32]) -> Result<(), ConvertError> {
        for value in values {
            self.out.write_f32::<LittleEndian>(*value)?;
        }
        Ok(())
    }

    /// Signed index, `None` written as -1.
    fn write_index(&mut self, width: u8, index: Option<usize>) -> Result<(), ConvertError> {
        let value = index.map(|index| index as i64).unwrap_or(-1);
        match width {
            1 => self.out.write_i8(value as i8)?,
            2 => self.out.write_i16::<LittleEndian>(value as i16)?,
            _ => self.out.write_i32::<LittleEndian>(value as i32)?,
        }
        Ok(())
    }

    /// Vertex indices are unsigned for the 1 and 2 byte widths.
    fn write_vertex_index(&mut self, index: usize) -> Result<(), ConvertError> {
        match self.widths.vertex {
            1 => self.out.write_u8(index as u8)?,
            2 => self.out.write_u16::<LittleEndian>(index as u16)?,
            _ => self.out.write_i32::<LittleEndian>(index as i32)?,
        }
        Ok(())
    }

    fn write_bone_index(&mut self, index: Option<usize>) -> Result<(), ConvertError> {
        self.write_index(self.widths.bone, index)
    }

    fn write_texture_index(&mut self, index: Option<usize>) -> Result<(), ConvertError> {
        self.write_index(self.widths.texture, index)
    }

    // ─── Sections ─────────────────────────────────────────────────────────────

    fn write_header(&mut self, model: &PmxModel) -> Result<(), ConvertError> {
        self.out.write_all(PMX_MAGIC)?;
        self.out.write_f32::<LittleEndian>(PMX_VERSION)?;
        self.out.write_u8(HEADER_GLOBALS)?;
        self.out.write_u8(ENCODING_UTF16LE)?;
        self.out.write_u8(ADDITIONAL_UV_COUNT)?;
        let widths = self.widths;
        for width in [
            widths.vertex,
            widths.texture,
            widths.material,
            widths.bone,
            widths.morph,
            widths.rigid_body,
        ] {
            self.out.write_u8(width)?;
        }

        self.write_text(&model.name, "model")?;
        self.write_text(&model.english_name, "model")?;
        self.write_text(&model.comment, "")?;
        self.write_text(&model.english_comment, "")?;
        Ok(())
    }

    fn write_vertices(&mut self, vertices: &[Vertex]) -> Result<(), ConvertError> {
        self.write_count(vertices.len())?;
        for vertex in vertices {
            self.write_vec3(&vertex.position)?;
            self.write_vec3(&vertex.normal)?;
            self.write_vec2(&vertex.uv)?;
            self.out.write_u8(vertex.deform.type_tag())?;
            match &vertex.deform {
                SkinDeform::Bdef1 { bone } => {
                    self.write_bone_index(Some(*bone))?;
                }
                SkinDeform::Bdef2 { bones, weight } => {
                    self.write_bone_index(Some(bones[0]))?;
                    self.write_bone_index(Some(bones[1]))?;
                    self.out.write_f32::<LittleEndian>(*weight)?;
                }
                SkinDeform::Bdef4 { bones, weights } => {
                    for bone in bones {
                        self.write_bone_index(Some(*bone))?;
                    }
                    self.write_floats(weights)?;
                }
            }
            self.out.write_f32::<LittleEndian>(vertex.edge_scale)?;
        }
        Ok(())
    }

    fn write_faces(&mut self, indices: &[u32]) -> Result<(), ConvertError> {
        self.write_count(indices.len())?;
        for index in indices {
            self.write_vertex_index(*index as usize)?;
        }
        Ok(())
    }

    fn write_textures(&mut self, textures: &[String]) -> Result<(), ConvertError> {
        self.write_count(textures.len())?;
        for texture in textures {
            self.write_text(texture, "")?;
        }
        Ok(())
    }

    fn write_materials(&mut self, materials: &[Material]) -> Result<(), ConvertError> {
        self.write_count(materials.len())?;
        for (index, material) in materials.iter().enumerate() {
            let placeholder = format!("material_{index}");
            self.write_text(&material.name, &placeholder)?;
            self.write_text(&material.english_name, &placeholder)?;
            self.write_floats(&material.diffuse)?;
            self.out.write_f32::<LittleEndian>(material.alpha)?;
            self.write_floats(&material.specular)?;
            self.out.write_f32::<LittleEndian>(material.specular_factor)?;
            self.write_floats(&material.ambient)?;
            self.out.write_u8(material.flags.bits())?;
            self.write_floats(&material.edge_color)?;
            self.out.write_f32::<LittleEndian>(material.edge_size)?;
            self.write_texture_index(material.texture)?;
            self.write_texture_index(material.sphere_texture)?;
            self.out.write_u8(material.sphere_mode as u8)?;
            match material.toon {
                Toon::Texture(texture) => {
                    self.out.write_u8(0)?;
                    self.write_texture_index(texture)?;
                }
                Toon::Shared(shared) => {
                    self.out.write_u8(1)?;
                    self.out.write_u8(shared)?;
                }
            }
            self.write_text(&material.comment, "")?;
            self.out.write_i32::<LittleEndian>(material.face_count as i32)?;
        }
        Ok(())
    }

    fn write_bones(&mut self, bones: &[Bone]) -> Result<(), ConvertError> {
        self.write_count(bones.len())?;
        for (index, bone) in bones.iter().enumerate() {
            let placeholder = format!("bone_{index}");
            let flags = bone.wire_flags();

            self.write_text(&bone.name, &placeholder)?;
            self.write_text(&bone.english_name, &placeholder)?;
            self.write_vec3(&bone.position)?;
            self.write_bone_index(bone.parent)?;
            self.out.write_i32::<LittleEndian>(bone.layer)?;
            self.out.write_u16::<LittleEndian>(flags.bits())?;

            match &bone.tail {
                BoneTail::Offset(offset) => self.write_vec3(offset)?,
                BoneTail::Bone(target) => self.write_bone_index(*target)?,
            }

            if flags
                .intersects(BoneFlags::EXTERNAL_ROTATION | BoneFlags::EXTERNAL_TRANSLATION)
            {
                if let Some(effect) = bone.effect {
                    self.write_bone_index(Some(effect.parent))?;
                    self.out.write_f32::<LittleEndian>(effect.factor)?;
                }
            }
            if let Some(axis) = &bone.fixed_axis {
                self.write_vec3(axis)?;
            }
            if let Some((local_x, local_z)) = &bone.local_axes {
                self.write_vec3(local_x)?;
                self.write_vec3(local_z)?;
            }
            if let Some(key) = bone.external_key {
                self.out.write_i32::<LittleEndian>(key)?;
            }
            if let Some(ik) = &bone.ik {
                self.write_bone_index(Some(ik.target))?;
                self.out.write_i32::<LittleEndian>(ik.loop_count)?;
                self.out.write_f32::<LittleEndian>(ik.limit_angle)?;
                self.write_count(ik.links.len())?;
                for link in &ik.links {
                    self.write_bone_index(Some(link.bone))?;
                    match &link.limits {
                        Some((min, max)) => {
                            self.out.write_u8(1)?;
                            self.write_vec3(min)?;
                            self.write_vec3(max)?;
                        }
                        None => self.out.write_u8(0)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn write_morphs(&mut self, morphs: &[Morph]) -> Result<(), ConvertError> {
        self.write_count(morphs.len())?;
        for (index, morph) in morphs.iter().enumerate() {
            let placeholder = format!("morph_{index}");
            self.write_text(&morph.name, &placeholder)?;
            self.write_text(&morph.english_name, &placeholder)?;
            self.out.write_u8(morph.panel as u8)?;
            self.out.write_u8(morph.kind.type_tag())?;
            match &morph.kind {
                MorphKind::Group(offsets) => {
                    self.write_count(offsets.len())?;
                    for offset in offsets {
                        self.write_index(self.widths.morph, Some(offset.morph))?;
                        self.out.write_f32::<LittleEndian>(offset.weight)?;
                    }
                }
                MorphKind::Vertex(offsets) => {
                    self.write_count(offsets.len())?;
                    for offset in offsets {
                        self.write_vertex_index(offset.vertex)?;
                        self.write_vec3(&offset.delta)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_display_frames(&mut self, frames: &[DisplayFrame]) -> Result<(), ConvertError> {
        self.write_count(frames.len())?;
        for (index, frame) in frames.iter().enumerate() {
            let placeholder = format!("frame_{index}");
            self.write_text(&frame.name, &placeholder)?;
            self.write_text(&frame.english_name, &placeholder)?;
            self.out.write_u8(u8::from(frame.special))?;
            self.write_count(frame.items.len())?;
            for item in &frame.items {
                match item {
                    DisplayItem::Bone(bone) => {
                        self.out.write_u8(0)?;
                        self.write_bone_index(Some(*bone))?;
                    }
                    DisplayItem::Morph(morph) => {
                        self.out.write_u8(1)?;
                        self.write_index(self.widths.morph, Some(*morph))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_rigid_bodies(&mut self, bodies: &[RigidBody]) -> Result<(), ConvertError> {
        self.write_count(bodies.len())?;
        for (index, body) in bodies.iter().enumerate() {
            let placeholder = format!("rigid_{index}");
            self.write_text(&body.name, &placeholder)?;
            self.write_text(&body.english_name, &placeholder)?;
            self.write_bone_index(body.bone)?;
            self.out.write_u8(body.group)?;
            self.out.write_u16::<LittleEndian>(body.collision_mask)?;
            self.out.write_u8(body.shape as u8)?;
            self.write_vec3(&body.size)?;
            self.write_vec3(&body.position)?;
            self.write_vec3(&body.rotation)?;
            self.write_floats(&[
                body.mass,
                body.linear_damping,
                body.angular_damping,
                body.restitution,
                body.friction,
            ])?;
            self.out.write_u8(body.mode as u8)?;
        }
        Ok(())
    }

    fn write_joints(&mut self, joints: &[Joint]) -> Result<(), ConvertError> {
        self.write_count(joints.len())?;
        for (index, joint) in joints.iter().enumerate() {
            let placeholder = format!("joint_{index}");
            self.write_text(&joint.name, &placeholder)?;
            self.write_text(&joint.english_name, &placeholder)?;
            // Spring 6-DOF is the only joint type of PMX 2.0.
            self.out.write_u8(0)?;
            self.write_index(self.widths.rigid_body, Some(joint.body_a))?;
            self.write_index(self.widths.rigid_body, Some(joint.body_b))?;
            for vector in [
                &joint.position,
                &joint.rotation,
                &joint.translation_min,
                &joint.translation_max,
                &joint.rotation_min,
                &joint.rotation_max,
                &joint.spring_translation,
                &joint.spring_rotation,
            ] {
                self.write_vec3(vector)?;
            }
        }
        Ok(())
    }
}
