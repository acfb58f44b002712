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

use thiserror::Error;

pub type StagingResult<T> = Result<T, StagingError>;

/// Errors reported by the staging memory manager and its building blocks.
///
/// None of these are retried internally. An `AllocationFailure` means the
/// operation that needed a new block did not happen at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    /// The memory backend could not provide a new block
    #[error("could not allocate a staging block of {size} bytes: {reason}")]
    AllocationFailure { size: usize, reason: String },

    /// The manager or one of its handles is used in a way its state does not allow
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// A range passed back to a range allocator is not one it handed out
    #[error("range [{offset}, {offset} + {size}) cannot be freed")]
    InvalidRange { offset: usize, size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Data passed to a copy command does not have the announced size
    #[error("expected {expected} bytes of data, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}
