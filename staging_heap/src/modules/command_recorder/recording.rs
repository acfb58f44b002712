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

use std::collections::HashMap;

use log::trace;

use super::{BufferImageCopy, CommandRecorderModule, Extent3D};
use crate::{
    modules::{fence::FenceModule, memory_backend::MemoryBackendModule},
    StagingError, StagingMemoryManager, StagingResult,
};

/// A transfer command captured by `RecordingCommandRecorder`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedCopy<H> {
    BufferToBuffer {
        src: H,
        src_offset: usize,
        dst: u64,
        dst_offset: usize,
        size: usize,
    },
    BufferToImage {
        src: H,
        dst: u64,
        region: BufferImageCopy,
    },
    BufferToStaging {
        src: u64,
        src_offset: usize,
        dst: H,
        dst_offset: usize,
        size: usize,
    },
    ImageToStaging {
        src: u64,
        dst: H,
        region: BufferImageCopy,
    },
}

/// Command recorder that keeps the copies in a list instead of sending
/// them to a device.
///
/// Buffers and images are identified by plain ids. The recorded copies can
/// be executed on the host with `replay`, which makes this recorder a small
/// software copy engine.
pub struct RecordingCommandRecorder<H> {
    copies: Vec<RecordedCopy<H>>,
}

impl<H: Copy> RecordingCommandRecorder<H> {
    pub fn new() -> Self {
        Self { copies: Vec::new() }
    }

    pub fn copies(&self) -> &[RecordedCopy<H>] {
        &self.copies
    }

    pub fn take_copies(&mut self) -> Vec<RecordedCopy<H>> {
        core::mem::take(&mut self.copies)
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Executes and removes all recorded copies.
    ///
    /// Staging memory is accessed through `manager`, so the staging sets that
    /// own the copied ranges must not be released before this is called.
    /// Returns the number of executed copies.
    pub fn replay<B, F>(
        &mut self,
        manager: &mut StagingMemoryManager<B, F>,
        device: &mut HostDevice,
    ) -> StagingResult<usize>
    where
        B: MemoryBackendModule<Handle = H>,
        F: FenceModule,
    {
        let copies = self.take_copies();

        for copy in copies.iter() {
            match *copy {
                RecordedCopy::BufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let data = manager.memory_slice(src, src_offset, size)?;
                    device.buffer_range_mut(dst, dst_offset, size)?.copy_from_slice(data);
                }
                RecordedCopy::BufferToImage { src, dst, region } => {
                    let image = device.image_mut(dst)?;
                    for (buffer_offset, image_offset, len) in image.copy_rows(&region)? {
                        let data = manager.memory_slice(src, buffer_offset, len)?;
                        image.data[image_offset..image_offset + len].copy_from_slice(data);
                    }
                }
                RecordedCopy::BufferToStaging {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let data = device.buffer_range_mut(src, src_offset, size)?;
                    manager
                        .memory_slice_mut(dst, dst_offset, size)?
                        .copy_from_slice(data);
                }
                RecordedCopy::ImageToStaging { src, dst, region } => {
                    let image = device.image_mut(src)?;
                    for (buffer_offset, image_offset, len) in image.copy_rows(&region)? {
                        manager
                            .memory_slice_mut(dst, buffer_offset, len)?
                            .copy_from_slice(&image.data[image_offset..image_offset + len]);
                    }
                }
            }
        }

        trace!("replayed {} copies", copies.len());

        Ok(copies.len())
    }
}

impl<H: Copy> Default for RecordingCommandRecorder<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy> CommandRecorderModule<H> for RecordingCommandRecorder<H> {
    type Buffer = u64;
    type Image = u64;

    fn copy_buffer_to_buffer(
        &mut self,
        src: H,
        src_offset: usize,
        dst: &Self::Buffer,
        dst_offset: usize,
        size: usize,
    ) {
        self.copies.push(RecordedCopy::BufferToBuffer {
            src,
            src_offset,
            dst: *dst,
            dst_offset,
            size,
        });
    }

    fn copy_buffer_to_image(&mut self, src: H, dst: &Self::Image, region: &BufferImageCopy) {
        self.copies.push(RecordedCopy::BufferToImage {
            src,
            dst: *dst,
            region: *region,
        });
    }

    fn copy_buffer_to_staging(
        &mut self,
        src: &Self::Buffer,
        src_offset: usize,
        dst: H,
        dst_offset: usize,
        size: usize,
    ) {
        self.copies.push(RecordedCopy::BufferToStaging {
            src: *src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn copy_image_to_staging(&mut self, src: &Self::Image, dst: H, region: &BufferImageCopy) {
        self.copies.push(RecordedCopy::ImageToStaging {
            src: *src,
            dst,
            region: *region,
        });
    }
}

/// Linear host copy of a single mip level and layer of an image
pub struct HostImage {
    pub extent: Extent3D,
    pub texel_size: usize,
    pub data: Vec<u8>,
}

impl HostImage {
    pub fn new(extent: Extent3D, texel_size: usize) -> Self {
        Self {
            extent,
            texel_size,
            data: vec![0; extent.texel_count() * texel_size],
        }
    }

    /// Splits a copy region into rows of `(buffer_offset, image_offset, len)`
    fn copy_rows(&self, region: &BufferImageCopy) -> StagingResult<Vec<(usize, usize, usize)>> {
        let to_usize = |value: i32| {
            usize::try_from(value).map_err(|_| StagingError::InvalidRange {
                offset: region.buffer_offset,
                size: 0,
            })
        };

        let (x, y, z) = (
            to_usize(region.image_offset.x)?,
            to_usize(region.image_offset.y)?,
            to_usize(region.image_offset.z)?,
        );
        let copy = region.image_extent;

        if x + copy.width as usize > self.extent.width as usize
            || y + copy.height as usize > self.extent.height as usize
            || z + copy.depth as usize > self.extent.depth as usize
        {
            return Err(StagingError::InvalidRange {
                offset: region.buffer_offset,
                size: copy.texel_count() * self.texel_size,
            });
        }

        let row_length = match region.buffer_row_length {
            0 => copy.width,
            len => len,
        } as usize;
        let image_height = match region.buffer_image_height {
            0 => copy.height,
            height => height,
        } as usize;

        let width = self.extent.width as usize;
        let height = self.extent.height as usize;
        let len = copy.width as usize * self.texel_size;

        let mut rows = Vec::with_capacity(copy.height as usize * copy.depth as usize);
        for row_z in 0..copy.depth as usize {
            for row_y in 0..copy.height as usize {
                let buffer_offset =
                    region.buffer_offset + (row_z * image_height + row_y) * row_length * self.texel_size;
                let image_offset = (((z + row_z) * height + (y + row_y)) * width + x) * self.texel_size;

                rows.push((buffer_offset, image_offset, len));
            }
        }

        Ok(rows)
    }
}

/// Device side buffers and images for `RecordingCommandRecorder::replay`
#[derive(Default)]
pub struct HostDevice {
    buffers: HashMap<u64, Vec<u8>>,
    images: HashMap<u64, HostImage>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer(&mut self, id: u64, size: usize) {
        self.buffers.insert(id, vec![0; size]);
    }

    pub fn create_image(&mut self, id: u64, extent: Extent3D, texel_size: usize) {
        self.images.insert(id, HostImage::new(extent, texel_size));
    }

    pub fn buffer(&self, id: u64) -> Option<&[u8]> {
        self.buffers.get(&id).map(|buffer| buffer.as_slice())
    }

    pub fn buffer_mut(&mut self, id: u64) -> Option<&mut [u8]> {
        self.buffers.get_mut(&id).map(|buffer| buffer.as_mut_slice())
    }

    pub fn image(&self, id: u64) -> Option<&HostImage> {
        self.images.get(&id)
    }

    pub fn image_mut(&mut self, id: u64) -> StagingResult<&mut HostImage> {
        self.images
            .get_mut(&id)
            .ok_or(StagingError::InvalidState("copy references an unknown image"))
    }

    fn buffer_range_mut(&mut self, id: u64, offset: usize, size: usize) -> StagingResult<&mut [u8]> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(StagingError::InvalidState("copy references an unknown buffer"))?;

        offset
            .checked_add(size)
            .and_then(|end| buffer.get_mut(offset..end))
            .ok_or(StagingError::InvalidRange { offset, size })
    }
}
