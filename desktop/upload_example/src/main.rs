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

use env_logger::{Builder, Env};
use log::info;
use staging_heap::{
    modules::{
        command_recorder::{Extent3D, HostDevice, ImageSubresourceLayers, Offset3D, RecordingCommandRecorder},
        fence::HostFence,
        memory_backend::HeapMemoryBackend,
    },
    StagingConfig, StagingMemoryManager, StagingResult,
};

const VERTEX_BUFFER: u64 = 1;
const INDEX_BUFFER: u64 = 2;
const TEXTURE: u64 = 3;

const FRAMES_IN_FLIGHT: usize = 2;

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Debug)
        .format_module_path(false)
        .init();

    if let Err(err) = run() {
        eprintln!("upload example failed: {}", err);
        std::process::exit(1);
    }
}

fn run() -> StagingResult<()> {
    let config = StagingConfig::default()
        .with_block_size(64 * 1024)
        .with_free_on_release(false);
    let mut manager: StagingMemoryManager<HeapMemoryBackend, HostFence> =
        StagingMemoryManager::new(HeapMemoryBackend::new(), config)?;

    let mut recorder = RecordingCommandRecorder::new();
    let mut device = HostDevice::new();

    let texture_extent = Extent3D {
        width: 64,
        height: 64,
        depth: 1,
    };
    device.create_buffer(VERTEX_BUFFER, 16 * 1024);
    device.create_buffer(INDEX_BUFFER, 4 * 1024);
    device.create_image(TEXTURE, texture_extent, 4);

    let mut fences: Vec<HostFence> = Vec::new();

    for frame in 0..8u8 {
        let vertices = vec![frame; 12 * 1024];
        let indices: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let texels = vec![frame.wrapping_mul(31); texture_extent.texel_count() * 4];

        manager.cmd_to_buffer(&mut recorder, &VERTEX_BUFFER, 0, vertices.len(), Some(&vertices))?;
        manager.cmd_to_buffer(&mut recorder, &INDEX_BUFFER, 0, indices.len(), Some(&indices))?;
        manager.cmd_to_image(
            &mut recorder,
            &TEXTURE,
            Offset3D { x: 0, y: 0, z: 0 },
            texture_extent,
            ImageSubresourceLayers::default(),
            texels.len(),
            Some(&texels),
        )?;

        let fence = HostFence::new();
        manager.finalize(Some(fence.clone()))?;
        fences.push(fence);

        // "submit": execute the copies on the host
        let copies = recorder.replay(&mut manager, &mut device)?;

        // the device finishes frames with a delay
        if fences.len() > FRAMES_IN_FLIGHT {
            fences.remove(0).signal();
        }

        let released = manager.release()?;
        let utilization = manager.utilization();

        info!(
            "frame {}: {} copies, {} sets released, {} of {} bytes used ({:.1}%), {} blocks",
            frame,
            copies,
            released,
            utilization.used_bytes,
            utilization.allocated_bytes,
            utilization.ratio() * 100.0,
            manager.blocks().block_count()
        );
    }

    for fence in fences.drain(..) {
        fence.signal();
    }
    manager.release()?;

    let vertices = device.buffer(VERTEX_BUFFER).unwrap_or_default();
    info!("vertex buffer holds frame {}", vertices.first().copied().unwrap_or_default());

    let freed = manager.free_unused()?;
    info!("freed {} unused blocks", freed);

    manager.deinit()
}
