//! Vertex input layout derivation
//!
//! A render object's vertex format is described by an attribute mask; the
//! binding and attribute descriptions fall out of it deterministically.
//! Attributes always appear in the same order with fixed formats, so two
//! pipelines built from the same mask are interchangeable.

use ash::vk;

use crate::render::api::VertexAttributes;

/// Fixed attribute order with per-attribute format and byte size.
///
/// Order matters: locations and offsets are assigned by walking this list
/// and skipping absent attributes.
const ATTRIBUTE_ORDER: [(VertexAttributes, vk::Format, u32); 6] = [
    (VertexAttributes::POSITION, vk::Format::R32G32B32_SFLOAT, 12),
    (VertexAttributes::COLOR, vk::Format::R32G32B32A32_SFLOAT, 16),
    (VertexAttributes::TANGENT, vk::Format::R32G32B32_SFLOAT, 12),
    (VertexAttributes::BITANGENT, vk::Format::R32G32B32_SFLOAT, 12),
    (VertexAttributes::NORMAL, vk::Format::R32G32B32_SFLOAT, 12),
    (VertexAttributes::TEXCOORD, vk::Format::R32G32_SFLOAT, 8),
];

/// Byte stride of one vertex carrying the given attributes
pub fn vertex_stride(attributes: VertexAttributes) -> u32 {
    ATTRIBUTE_ORDER
        .iter()
        .filter(|(attr, _, _)| attributes.contains(*attr))
        .map(|(_, _, size)| size)
        .sum()
}

/// Attribute descriptions for the given mask, locations and offsets assigned
/// in the fixed order
pub fn attribute_descriptions(
    attributes: VertexAttributes,
) -> Vec<vk::VertexInputAttributeDescription> {
    let mut descriptions = Vec::new();
    let mut offset = 0;
    let mut location = 0;

    for (attr, format, size) in ATTRIBUTE_ORDER {
        if !attributes.contains(attr) {
            continue;
        }
        descriptions.push(vk::VertexInputAttributeDescription {
            binding: 0,
            location,
            format,
            offset,
        });
        offset += size;
        location += 1;
    }

    descriptions
}

/// Binding description for a single interleaved vertex buffer
pub fn binding_description(attributes: VertexAttributes) -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: vertex_stride(attributes),
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mask_strides_and_offsets() {
        let all = VertexAttributes::all();
        assert_eq!(vertex_stride(all), 12 + 16 + 12 + 12 + 12 + 8);

        let descriptions = attribute_descriptions(all);
        assert_eq!(descriptions.len(), 6);
        let offsets: Vec<u32> = descriptions.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 12, 28, 40, 52, 64]);
        let locations: Vec<u32> = descriptions.iter().map(|d| d.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn absent_attributes_are_skipped_without_gaps() {
        let mask = VertexAttributes::POSITION
            | VertexAttributes::NORMAL
            | VertexAttributes::TEXCOORD;
        let descriptions = attribute_descriptions(mask);
        assert_eq!(descriptions.len(), 3);

        // Position at 0, normal right after, texcoord after that
        assert_eq!(descriptions[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(descriptions[0].offset, 0);
        assert_eq!(descriptions[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(descriptions[1].offset, 12);
        assert_eq!(descriptions[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(descriptions[2].offset, 24);

        // Locations stay contiguous even with absent attributes
        assert_eq!(descriptions[2].location, 2);
        assert_eq!(vertex_stride(mask), 32);
    }

    #[test]
    fn derivation_is_deterministic() {
        let mask = VertexAttributes::POSITION | VertexAttributes::COLOR;
        let first = attribute_descriptions(mask);
        let second = attribute_descriptions(mask);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!((a.location, a.offset, a.format), (b.location, b.offset, b.format));
        }
    }

    #[test]
    fn binding_uses_derived_stride() {
        let mask = VertexAttributes::POSITION | VertexAttributes::COLOR;
        let binding = binding_description(mask);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 28);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn empty_mask_means_no_input() {
        assert_eq!(vertex_stride(VertexAttributes::empty()), 0);
        assert!(attribute_descriptions(VertexAttributes::empty()).is_empty());
    }
}
