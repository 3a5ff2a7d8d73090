use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use ash::vk;
use ash::vk::Handle;

/// Identity of a shader program. Two keys with the same shader id must describe the same
/// shader modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u64);

impl ShaderId {
    pub fn from_module(module: vk::ShaderModule) -> Self {
        Self(module.as_raw())
    }
}

/// 32-bit specialization constant values of one shader stage, keyed by constant id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecializationConstants {
    values: BTreeMap<u32, u32>,
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant(mut self, id: u32, value: u32) -> Self {
        self.values.insert(id, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<u32> {
        self.values.get(&id).copied()
    }

    /// Map entries into [`Self::data`], in ascending id order.
    pub fn map_entries(&self) -> Vec<vk::SpecializationMapEntry> {
        self.values
            .keys()
            .enumerate()
            .map(|(i, id)| {
                vk::SpecializationMapEntry::default()
                    .constant_id(*id)
                    .offset((i * size_of::<u32>()) as u32)
                    .size(size_of::<u32>())
            })
            .collect()
    }

    pub fn data(&self) -> Vec<u8> {
        let values: Vec<u32> = self.values.values().copied().collect();
        bytemuck::cast_slice(&values).to_vec()
    }

    /// Stable hash of the ids and values, for use as a key's `constant_hash`.
    pub fn constant_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl DrawMode {
    pub fn topology(&self) -> vk::PrimitiveTopology {
        match self {
            Self::Points => vk::PrimitiveTopology::POINT_LIST,
            Self::Lines => vk::PrimitiveTopology::LINE_LIST,
            Self::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Self::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Self::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    AlphaBlend,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthMode {
    /// Opaque geometry reads and writes depth, blended geometry only reads it.
    InheritFromBlendMode,
    ReadWrite,
    ReadOnly,
    WriteOnly,
    NoReadWrite,
}

impl DepthMode {
    pub fn resolve(self, blend_mode: BlendMode) -> DepthMode {
        match (self, blend_mode) {
            (Self::InheritFromBlendMode, BlendMode::Opaque) => Self::ReadWrite,
            (Self::InheritFromBlendMode, _) => Self::ReadOnly,
            (mode, _) => mode,
        }
    }

    /// (test enable, write enable, compare op) of a resolved mode.
    pub fn depth_state(&self) -> (bool, bool, vk::CompareOp) {
        match self {
            Self::ReadWrite | Self::InheritFromBlendMode => (true, true, vk::CompareOp::LESS_OR_EQUAL),
            Self::ReadOnly => (true, false, vk::CompareOp::LESS_OR_EQUAL),
            Self::WriteOnly => (true, true, vk::CompareOp::ALWAYS),
            Self::NoReadWrite => (false, false, vk::CompareOp::ALWAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
    FrontAndBack,
}

impl CullMode {
    pub fn to_vk(&self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
            Self::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

impl PolygonMode {
    pub fn to_vk(&self) -> vk::PolygonMode {
        match self {
            Self::Fill => vk::PolygonMode::FILL,
            Self::Line => vk::PolygonMode::LINE,
            Self::Point => vk::PolygonMode::POINT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindingOrder {
    Clockwise,
    CounterClockwise,
}

impl WindingOrder {
    pub fn front_face(&self) -> vk::FrontFace {
        match self {
            Self::Clockwise => vk::FrontFace::CLOCKWISE,
            Self::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// Everything that determines a graphics pipeline. Equal keys share one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderId,
    pub draw_mode: DrawMode,
    pub depth_mode: DepthMode,
    pub blend_mode: BlendMode,
    /// Hash of the specialization constants the shader is built with.
    pub constant_hash: u64,
    pub winding_order: WindingOrder,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub sample_count: vk::SampleCountFlags,
    pub sample_shading: bool,
    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,
}

impl PipelineKey {
    pub fn new(shader: ShaderId, color_format: vk::Format, depth_format: vk::Format) -> Self {
        Self {
            shader,
            draw_mode: DrawMode::Triangles,
            depth_mode: DepthMode::InheritFromBlendMode,
            blend_mode: BlendMode::Opaque,
            constant_hash: 0,
            winding_order: WindingOrder::Clockwise,
            color_format,
            depth_format,
            sample_count: vk::SampleCountFlags::TYPE_1,
            sample_shading: false,
            cull_mode: CullMode::None,
            polygon_mode: PolygonMode::Fill,
        }
    }

    pub fn with_draw_mode(mut self, draw_mode: DrawMode) -> Self {
        self.draw_mode = draw_mode;
        self
    }

    pub fn with_depth_mode(mut self, depth_mode: DepthMode) -> Self {
        self.depth_mode = depth_mode;
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_constant_hash(mut self, constant_hash: u64) -> Self {
        self.constant_hash = constant_hash;
        self
    }

    /// Keys the pipeline on the constants of both stages.
    pub fn with_constants(
        self,
        vertex: &SpecializationConstants,
        fragment: &SpecializationConstants,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        fragment.hash(&mut hasher);
        self.with_constant_hash(hasher.finish())
    }

    pub fn with_winding_order(mut self, winding_order: WindingOrder) -> Self {
        self.winding_order = winding_order;
        self
    }

    pub fn with_multisampling(mut self, sample_count: vk::SampleCountFlags, sample_shading: bool) -> Self {
        self.sample_count = sample_count;
        self.sample_shading = sample_shading;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_polygon_mode(mut self, polygon_mode: PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    /// Depth targets without a color attachment.
    pub fn is_depth_only(&self) -> bool {
        self.color_format == vk::Format::UNDEFINED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub shader: ShaderId,
    pub constant_hash: u64,
}

impl ComputePipelineKey {
    pub fn new(shader: ShaderId, constant_hash: u64) -> Self {
        Self {
            shader,
            constant_hash,
        }
    }

    pub fn with_constants(shader: ShaderId, constants: &SpecializationConstants) -> Self {
        Self::new(shader, constants.constant_hash())
    }
}
