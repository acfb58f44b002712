/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod recording;

pub use recording::{HostDevice, HostImage, RecordedCopy, RecordingCommandRecorder};

/// Texel offset inside of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Size of an image region in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3D {
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
}

/// Which aspect, mip level and array layers of an image a copy touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSubresourceLayers {
    pub aspect_mask: u32,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageSubresourceLayers {
    pub const ASPECT_COLOR: u32 = 0x1;
}

impl Default for ImageSubresourceLayers {
    /// First mip level and layer of the color aspect
    fn default() -> Self {
        Self {
            aspect_mask: Self::ASPECT_COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Region of a copy between a linear buffer and an image.
///
/// A `buffer_row_length` or `buffer_image_height` of zero means the buffer
/// data is tightly packed according to `image_extent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: usize,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: Offset3D,
    pub image_extent: Extent3D,
}

/// A module that enqueues transfer commands into a command stream.
///
/// `H` is the handle type of the staging memory backend. Commands are only
/// recorded here; submitting them and signaling the matching fence is up to
/// the caller.
pub trait CommandRecorderModule<H> {
    /// Device buffer type that is copied to or from
    type Buffer;

    /// Device image type that is copied to or from
    type Image;

    /// Copies `size` bytes from staging memory `src` to `dst`
    fn copy_buffer_to_buffer(
        &mut self,
        src: H,
        src_offset: usize,
        dst: &Self::Buffer,
        dst_offset: usize,
        size: usize,
    );

    /// Copies a region of staging memory `src` into `dst`.
    /// `region.buffer_offset` is relative to the start of `src`.
    fn copy_buffer_to_image(&mut self, src: H, dst: &Self::Image, region: &BufferImageCopy);

    /// Copies `size` bytes from `src` back into staging memory `dst`
    fn copy_buffer_to_staging(
        &mut self,
        src: &Self::Buffer,
        src_offset: usize,
        dst: H,
        dst_offset: usize,
        size: usize,
    );

    /// Copies a region of `src` back into staging memory `dst`
    fn copy_image_to_staging(&mut self, src: &Self::Image, dst: H, region: &BufferImageCopy);
}
