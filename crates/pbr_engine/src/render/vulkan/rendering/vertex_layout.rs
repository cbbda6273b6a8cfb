//! Vulkan vertex input state for [`Vertex`]

use ash::vk;
use std::mem::{offset_of, size_of};

use crate::render::mesh::Vertex;

/// Single interleaved binding at index 0
pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
    [vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

/// Position, normal, texcoord and color at locations 0 to 3
pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
    let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };
    [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, texcoord)),
        attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_offsets() {
        let offsets: Vec<u32> = attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        assert_eq!(binding_descriptions()[0].stride, 44);
    }
}
