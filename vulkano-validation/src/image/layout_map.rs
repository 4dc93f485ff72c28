//! Per-subresource image layout tracking.
//!
//! Every subresource of an image is given a flat index:
//!
//! ```text
//! aspect_index * array_layers * mip_levels + array_layer * mip_levels + mip_level
//! ```
//!
//! where `aspect_index` is the position of the aspect within the image's full aspect mask. A
//! rectangle of subresources (`aspects × levels × layers`) is then a small number of contiguous
//! index ranges, which is what the stores below operate on.
//!
//! Images with up to [`DENSE_LAYER_THRESHOLD`] array layers use a dense store with one slot per
//! subresource. Larger images use a range map, so that the common case of transitioning a whole
//! image stays a single entry.

use super::{ImageAspects, ImageLayout, ImageSubresource, ImageSubresourceRange};
use ash::vk;
use rangemap::RangeMap;
use std::ops::Range;

/// Images with at most this many array layers use dense layout storage.
pub const DENSE_LAYER_THRESHOLD: u32 = 16;

/// Maps the aspects of an image's full aspect mask to dense indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AspectTraits {
    mask: ImageAspects,
    bits: [ImageAspects; 3],
    count: u32,
}

impl AspectTraits {
    /// Returns the traits for an image whose full aspect mask is `mask`.
    ///
    /// The mask is expected to be one of `COLOR`, `DEPTH`, `STENCIL`, `DEPTH | STENCIL`,
    /// `PLANE_0 | PLANE_1` or `PLANE_0 | PLANE_1 | PLANE_2`.
    pub fn new(mask: ImageAspects) -> Self {
        let mut bits = [ImageAspects::empty(); 3];
        let mut count: u32 = 0;

        for (slot, aspect) in bits.iter_mut().zip(mask.iter()) {
            *slot = aspect;
            count += 1;
        }

        debug_assert_eq!(count, mask.count(), "unsupported aspect mask {:?}", mask);

        AspectTraits {
            mask,
            bits,
            count,
        }
    }

    #[inline]
    pub fn mask(&self) -> ImageAspects {
        self.mask
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Returns the index of the single aspect `aspect`, if it is part of the mask.
    #[inline]
    pub fn index_of(&self, aspect: ImageAspects) -> Option<u32> {
        self.bits[..self.count as usize]
            .iter()
            .position(|&bit| bit == aspect)
            .map(|index| index as u32)
    }

    #[inline]
    pub fn aspect_at(&self, index: u32) -> ImageAspects {
        self.bits[index as usize]
    }
}

/// Converts between subresources of one image and their flat indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceEncoder {
    aspects: AspectTraits,
    mip_levels: u32,
    array_layers: u32,
}

impl SubresourceEncoder {
    pub fn new(full_range: &ImageSubresourceRange) -> Self {
        SubresourceEncoder {
            aspects: AspectTraits::new(full_range.aspects),
            mip_levels: full_range.level_count,
            array_layers: full_range.layer_count,
        }
    }

    #[inline]
    pub fn aspects(&self) -> &AspectTraits {
        &self.aspects
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// The number of subresources in the image.
    #[inline]
    pub fn size(&self) -> u64 {
        self.aspect_size() * self.aspects.count() as u64
    }

    #[inline]
    fn aspect_size(&self) -> u64 {
        self.mip_levels as u64 * self.array_layers as u64
    }

    #[inline]
    pub fn is_dense(&self) -> bool {
        self.array_layers <= DENSE_LAYER_THRESHOLD
    }

    /// Returns the index of `subresource`, or `None` if it lies outside the image.
    pub fn encode(&self, subresource: &ImageSubresource) -> Option<u64> {
        let aspect_index = self.aspects.index_of(subresource.aspect)?;

        if subresource.mip_level >= self.mip_levels || subresource.array_layer >= self.array_layers
        {
            return None;
        }

        Some(
            aspect_index as u64 * self.aspect_size()
                + subresource.array_layer as u64 * self.mip_levels as u64
                + subresource.mip_level as u64,
        )
    }

    pub fn decode(&self, index: u64) -> ImageSubresource {
        let aspect_index = (index / self.aspect_size()) as u32;
        let within_aspect = index % self.aspect_size();

        ImageSubresource {
            aspect: self.aspects.aspect_at(aspect_index),
            mip_level: (within_aspect % self.mip_levels as u64) as u32,
            array_layer: (within_aspect / self.mip_levels as u64) as u32,
        }
    }

    /// Returns the contiguous index ranges covered by `range`, which must already be clamped to
    /// the image.
    pub fn ranges(&self, range: &ImageSubresourceRange) -> Vec<Range<u64>> {
        let levels = self.mip_levels as u64;
        let all_levels = range.base_mip_level == 0 && range.level_count == self.mip_levels;
        let mut result = Vec::new();

        for aspect in (range.aspects & self.aspects.mask()).iter() {
            let Some(aspect_index) = self.aspects.index_of(aspect) else {
                continue;
            };
            let aspect_base = aspect_index as u64 * self.aspect_size();

            if all_levels {
                let start = aspect_base + range.base_array_layer as u64 * levels;
                result.push(start..start + range.layer_count as u64 * levels);
            } else {
                for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
                    let start = aspect_base + layer as u64 * levels + range.base_mip_level as u64;
                    result.push(start..start + range.level_count as u64);
                }
            }
        }

        result
    }
}

/// Storage for one layout per subresource, any of which may be unset.
#[derive(Clone, Debug)]
pub(crate) enum LayoutStore {
    Dense(Vec<Option<ImageLayout>>),
    Sparse(RangeMap<u64, ImageLayout>),
}

impl LayoutStore {
    pub(crate) fn new(encoder: &SubresourceEncoder) -> Self {
        if encoder.is_dense() {
            LayoutStore::Dense(vec![None; encoder.size() as usize])
        } else {
            LayoutStore::Sparse(RangeMap::new())
        }
    }

    pub(crate) fn get(&self, index: u64) -> Option<ImageLayout> {
        match self {
            LayoutStore::Dense(slots) => slots.get(index as usize).copied().flatten(),
            LayoutStore::Sparse(map) => map.get(&index).copied(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            LayoutStore::Dense(slots) => slots.iter().all(Option::is_none),
            LayoutStore::Sparse(map) => map.iter().next().is_none(),
        }
    }

    /// Sets every index in `range` to `layout`. Returns whether anything changed.
    pub(crate) fn set_range(&mut self, range: Range<u64>, layout: ImageLayout) -> bool {
        if range.is_empty() {
            return false;
        }

        match self {
            LayoutStore::Dense(slots) => {
                let mut changed = false;

                for slot in &mut slots[range.start as usize..range.end as usize] {
                    changed |= *slot != Some(layout);
                    *slot = Some(layout);
                }

                changed
            }
            LayoutStore::Sparse(map) => {
                let changed = map.gaps(&range).next().is_some()
                    || map.overlapping(&range).any(|(_, &existing)| existing != layout);

                if changed {
                    map.insert(range, layout);
                }

                changed
            }
        }
    }

    /// Sets the indices in `range` that are unset in both `self` and `unless_set` to `layout`.
    pub(crate) fn fill_unset(
        &mut self,
        range: Range<u64>,
        layout: ImageLayout,
        unless_set: Option<&LayoutStore>,
    ) -> bool {
        let mut changed = false;

        for gap in self.gaps(range) {
            match unless_set {
                Some(other) => {
                    for sub_gap in other.gaps(gap) {
                        changed |= self.set_range(sub_gap, layout);
                    }
                }
                None => changed |= self.set_range(gap, layout),
            }
        }

        changed
    }

    /// Returns the unset sub-ranges of `range`.
    pub(crate) fn gaps(&self, range: Range<u64>) -> Vec<Range<u64>> {
        match self {
            LayoutStore::Dense(slots) => {
                let mut result: Vec<Range<u64>> = Vec::new();

                for index in range {
                    if slots[index as usize].is_none() {
                        match result.last_mut() {
                            Some(last) if last.end == index => last.end += 1,
                            _ => result.push(index..index + 1),
                        }
                    }
                }

                result
            }
            LayoutStore::Sparse(map) => map.gaps(&range).collect(),
        }
    }

    /// Returns the set entries as maximal runs of equal layouts, in index order.
    pub(crate) fn runs(&self) -> Vec<(Range<u64>, ImageLayout)> {
        match self {
            LayoutStore::Dense(slots) => {
                let mut result: Vec<(Range<u64>, ImageLayout)> = Vec::new();

                for (index, slot) in slots.iter().enumerate() {
                    let index = index as u64;
                    let Some(layout) = *slot else {
                        continue;
                    };

                    match result.last_mut() {
                        Some((last, last_layout)) if last.end == index && *last_layout == layout => {
                            last.end += 1;
                        }
                        _ => result.push((index..index + 1, layout)),
                    }
                }

                result
            }
            LayoutStore::Sparse(map) => map
                .iter()
                .map(|(range, &layout)| (range.clone(), layout))
                .collect(),
        }
    }
}

/// The layouts that one command buffer expects and produces for one image.
///
/// The *initial* map holds, for each subresource the command buffer touches, the layout it
/// expects the subresource to be in when the command buffer starts executing. The *current* map
/// holds the layout the subresource is in after the last recorded command.
#[derive(Clone, Debug)]
pub struct ImageSubresourceLayoutMap {
    image: vk::Image,
    encoder: SubresourceEncoder,
    current: LayoutStore,
    initial: LayoutStore,
}

impl ImageSubresourceLayoutMap {
    pub fn new(image: vk::Image, encoder: SubresourceEncoder) -> Self {
        ImageSubresourceLayoutMap {
            image,
            current: LayoutStore::new(&encoder),
            initial: LayoutStore::new(&encoder),
            encoder,
        }
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn encoder(&self) -> &SubresourceEncoder {
        &self.encoder
    }

    /// Overwrites the current layout of `range`. Returns whether anything changed.
    pub fn set_subresource_range_layout(
        &mut self,
        range: &ImageSubresourceRange,
        layout: ImageLayout,
    ) -> bool {
        let mut changed = false;

        for indices in self.encoder.ranges(range) {
            changed |= self.current.set_range(indices, layout);
        }

        changed
    }

    /// Records `expected` as the initial layout of the subresources of `range` that this command
    /// buffer has not touched yet.
    pub fn set_subresource_range_initial_layout(
        &mut self,
        range: &ImageSubresourceRange,
        expected: ImageLayout,
    ) -> bool {
        let mut changed = false;

        for indices in self.encoder.ranges(range) {
            changed |= self
                .initial
                .fill_unset(indices, expected, Some(&self.current));
        }

        changed
    }

    /// Records a transition of `range` from `old_layout` to `new_layout`.
    pub fn set_transition(
        &mut self,
        range: &ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> bool {
        let initial_changed = self.set_subresource_range_initial_layout(range, old_layout);

        self.set_subresource_range_layout(range, new_layout) | initial_changed
    }

    pub fn subresource_layout(&self, subresource: &ImageSubresource) -> Option<ImageLayout> {
        self.encoder
            .encode(subresource)
            .and_then(|index| self.current.get(index))
    }

    pub fn subresource_initial_layout(
        &self,
        subresource: &ImageSubresource,
    ) -> Option<ImageLayout> {
        self.encoder
            .encode(subresource)
            .and_then(|index| self.initial.get(index))
    }

    /// Merges the map of a secondary command buffer that executes after everything recorded so
    /// far into `self`.
    pub fn update_from(&mut self, other: &ImageSubresourceLayoutMap) -> bool {
        debug_assert_eq!(self.encoder, other.encoder);
        let mut changed = false;

        // Initial expectations of the secondary only matter where this map knows nothing yet.
        for (indices, layout) in other.initial.runs() {
            changed |= self.initial.fill_unset(indices, layout, Some(&self.current));
        }

        for (indices, layout) in other.current.runs() {
            changed |= self.current.set_range(indices, layout);
        }

        changed
    }

    /// Returns the initial expectations as runs of `(indices, layout)`.
    pub fn initial_layouts(&self) -> Vec<(Range<u64>, ImageLayout)> {
        self.initial.runs()
    }

    /// Returns the current layouts as runs of `(indices, layout)`.
    pub fn current_layouts(&self) -> Vec<(Range<u64>, ImageLayout)> {
        self.current.runs()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.initial.is_empty() && self.current.is_empty()
    }

    /// Returns the layout this map leaves `index` in, if it touches it.
    #[inline]
    pub(crate) fn current_at(&self, index: u64) -> Option<ImageLayout> {
        self.current.get(index)
    }

    #[inline]
    pub(crate) fn initial_at(&self, index: u64) -> Option<ImageLayout> {
        self.initial.get(index)
    }
}

/// The layouts that the driver believes an image's subresources are in, as established by
/// completed submissions.
#[derive(Clone, Debug)]
pub(crate) struct GlobalImageLayouts {
    encoder: SubresourceEncoder,
    layouts: LayoutStore,
}

impl GlobalImageLayouts {
    pub(crate) fn new(encoder: SubresourceEncoder) -> Self {
        GlobalImageLayouts {
            layouts: LayoutStore::new(&encoder),
            encoder,
        }
    }

    #[inline]
    pub(crate) fn get(&self, index: u64) -> Option<ImageLayout> {
        self.layouts.get(index)
    }

    pub(crate) fn get_subresource(&self, subresource: &ImageSubresource) -> Option<ImageLayout> {
        self.encoder
            .encode(subresource)
            .and_then(|index| self.layouts.get(index))
    }

    pub(crate) fn set_range(&mut self, range: &ImageSubresourceRange, layout: ImageLayout) {
        for indices in self.encoder.ranges(range) {
            self.layouts.set_range(indices, layout);
        }
    }

    /// Replaces the layouts of every subresource that `map` leaves in a known layout.
    pub(crate) fn apply(&mut self, map: &ImageSubresourceLayoutMap) {
        for (indices, layout) in map.current_layouts() {
            self.layouts.set_range(indices, layout);
        }
    }

    pub(crate) fn apply_runs(&mut self, runs: &[(Range<u64>, ImageLayout)]) {
        for (indices, layout) in runs {
            self.layouts.set_range(indices.clone(), *layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AspectTraits, ImageSubresourceLayoutMap, SubresourceEncoder};
    use crate::image::{ImageAspects, ImageLayout, ImageSubresource, ImageSubresourceRange};
    use ash::vk::{self, Handle};

    fn full_range(aspects: ImageAspects, levels: u32, layers: u32) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: layers,
        }
    }

    fn map(aspects: ImageAspects, levels: u32, layers: u32) -> ImageSubresourceLayoutMap {
        let encoder = SubresourceEncoder::new(&full_range(aspects, levels, layers));
        ImageSubresourceLayoutMap::new(vk::Image::from_raw(1), encoder)
    }

    #[test]
    fn aspect_traits() {
        let traits = AspectTraits::new(ImageAspects::DEPTH | ImageAspects::STENCIL);

        assert_eq!(traits.count(), 2);
        assert_eq!(traits.index_of(ImageAspects::DEPTH), Some(0));
        assert_eq!(traits.index_of(ImageAspects::STENCIL), Some(1));
        assert_eq!(traits.index_of(ImageAspects::COLOR), None);
    }

    #[test]
    fn encode_decode() {
        let encoder =
            SubresourceEncoder::new(&full_range(ImageAspects::DEPTH | ImageAspects::STENCIL, 3, 4));
        let subresource = ImageSubresource {
            aspect: ImageAspects::STENCIL,
            mip_level: 2,
            array_layer: 1,
        };
        let index = encoder.encode(&subresource).unwrap();

        assert_eq!(index, 12 + 3 + 2);
        assert_eq!(encoder.decode(index), subresource);
        assert_eq!(encoder.size(), 24);
    }

    #[test]
    fn range_coalescing() {
        let encoder = SubresourceEncoder::new(&full_range(ImageAspects::COLOR, 4, 8));

        let whole_levels = encoder.ranges(&ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            base_mip_level: 0,
            level_count: 4,
            base_array_layer: 2,
            layer_count: 3,
        });
        assert_eq!(whole_levels, vec![8..20]);

        let partial = encoder.ranges(&ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            base_mip_level: 1,
            level_count: 2,
            base_array_layer: 0,
            layer_count: 2,
        });
        assert_eq!(partial, vec![1..3, 5..7]);
    }

    fn check_transitions(mut map: ImageSubresourceLayoutMap, layers: u32) {
        let range = full_range(ImageAspects::COLOR, 2, layers);
        let last_subresource = ImageSubresource {
            aspect: ImageAspects::COLOR,
            mip_level: 1,
            array_layer: layers - 1,
        };
        let sequence = [
            (ImageLayout::Undefined, ImageLayout::TransferDstOptimal),
            (ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal),
            (ImageLayout::ShaderReadOnlyOptimal, ImageLayout::General),
        ];

        for (old, new) in sequence {
            map.set_transition(&range, old, new);
            assert_eq!(map.subresource_layout(&last_subresource), Some(new));
            assert_eq!(
                map.subresource_initial_layout(&last_subresource),
                Some(ImageLayout::Undefined),
            );
        }
    }

    #[test]
    fn current_follows_transitions_dense() {
        check_transitions(map(ImageAspects::COLOR, 2, 4), 4);
    }

    #[test]
    fn current_follows_transitions_sparse() {
        let map = map(ImageAspects::COLOR, 2, 64);
        assert!(!map.encoder().is_dense());
        check_transitions(map, 64);
    }

    #[test]
    fn initial_written_once() {
        for layers in [1, 32] {
            let mut map = map(ImageAspects::COLOR, 1, layers);
            let range = full_range(ImageAspects::COLOR, 1, layers);
            let sub = ImageSubresource {
                aspect: ImageAspects::COLOR,
                mip_level: 0,
                array_layer: 0,
            };

            assert!(map.set_subresource_range_initial_layout(&range, ImageLayout::General));
            assert!(!map.set_subresource_range_initial_layout(
                &range,
                ImageLayout::TransferSrcOptimal,
            ));
            assert_eq!(map.subresource_initial_layout(&sub), Some(ImageLayout::General));
            assert_eq!(map.subresource_layout(&sub), None);
        }
    }

    #[test]
    fn merge_secondary() {
        for layers in [2, 20] {
            let mut primary = map(ImageAspects::COLOR, 1, layers);
            let mut secondary = map(ImageAspects::COLOR, 1, layers);
            let first = ImageSubresourceRange {
                layer_count: 1,
                ..full_range(ImageAspects::COLOR, 1, layers)
            };
            let all = full_range(ImageAspects::COLOR, 1, layers);

            primary.set_transition(&first, ImageLayout::Undefined, ImageLayout::General);
            secondary.set_transition(
                &all,
                ImageLayout::TransferDstOptimal,
                ImageLayout::ShaderReadOnlyOptimal,
            );
            primary.update_from(&secondary);

            let layer = |array_layer| ImageSubresource {
                aspect: ImageAspects::COLOR,
                mip_level: 0,
                array_layer,
            };

            // The primary already knew layer 0, so it keeps its own expectation.
            assert_eq!(
                primary.subresource_initial_layout(&layer(0)),
                Some(ImageLayout::Undefined),
            );
            assert_eq!(
                primary.subresource_initial_layout(&layer(1)),
                Some(ImageLayout::TransferDstOptimal),
            );
            assert_eq!(
                primary.subresource_layout(&layer(0)),
                Some(ImageLayout::ShaderReadOnlyOptimal),
            );
            assert_eq!(
                primary.subresource_layout(&layer(1)),
                Some(ImageLayout::ShaderReadOnlyOptimal),
            );
        }
    }

    #[test]
    fn runs_are_minimal() {
        let mut map = map(ImageAspects::COLOR, 1, 8);
        let range = full_range(ImageAspects::COLOR, 1, 8);
        map.set_subresource_range_layout(&range, ImageLayout::General);

        assert_eq!(map.current_layouts(), vec![(0..8, ImageLayout::General)]);
    }
}
