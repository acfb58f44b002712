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

pub(crate) mod slot_arena;

use crate::{StagingError, StagingResult};

#[inline]
pub(crate) const fn round_up_to_nearest(num: usize, multiple: usize) -> usize {
    ((num + multiple - 1) / multiple) * multiple
}

/// Same as `round_up_to_nearest` but returns `None` instead of overflowing
#[inline]
pub(crate) fn checked_round_up(num: usize, multiple: usize) -> Option<usize> {
    Some(num.checked_add(multiple - 1)? / multiple * multiple)
}

pub(crate) fn padding_needed_for(offset: usize, alignment: usize) -> usize {
    let misalignment = offset % alignment;
    if misalignment > 0 {
        // round up to next multiple of `alignment`
        alignment - misalignment
    } else {
        // already a multiple of `alignment`
        0
    }
}

pub(crate) fn check_alignment(alignment: usize) -> StagingResult<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(StagingError::InvalidAlignment(alignment))
    }
}
