//! Bounded frame-pointer chain walking.

use std::mem::size_of;

/// Upper bound on frames reported from one chain.
pub(crate) const MAX_FRAMES: usize = 32;

/// How far above the first frame a saved frame pointer may point.
pub(crate) const STACK_WINDOW: usize = 1024 * 1024;

const WORD: usize = size_of::<usize>();

/// Where a frame keeps its caller's frame pointer and its return address,
/// in words relative to the frame pointer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLayout {
    saved_fp: isize,
    return_addr: isize,
}

#[allow(dead_code)]
impl FrameLayout {
    /// `[fp]` holds the caller's frame pointer, `[fp + 1]` the return address.
    pub(crate) const FP_THEN_RETURN: Self = Self {
        saved_fp: 0,
        return_addr: 1,
    };

    /// APCS frames: `[fp]` holds the saved link register, `[fp - 1]` the
    /// caller's frame pointer.
    pub(crate) const APCS: Self = Self {
        saved_fp: -1,
        return_addr: 0,
    };
}

/// Follow the frame chain starting at `fp`, passing each frame's index and
/// return address to `visit`. Returns how many frames were visited.
///
/// The walk stops at the first frame pointer that is null, misaligned, below
/// the starting frame or more than [`STACK_WINDOW`] above it, at the first
/// zero return address, when a saved frame pointer does not move strictly up
/// the stack, or after [`MAX_FRAMES`] frames. Errors from `visit` end the walk
/// and are returned.
///
/// # Safety
///
/// Every frame accepted by the bounds above is dereferenced. On a corrupted
/// stack this may still fault, which is only acceptable where the fault
/// handler is one-shot.
pub(crate) unsafe fn chase<E>(
    fp: usize,
    layout: FrameLayout,
    mut visit: impl FnMut(usize, usize) -> Result<(), E>,
) -> Result<usize, E> {
    let base = fp;
    let mut frame = fp;
    let mut visited = 0;

    while visited < MAX_FRAMES {
        if frame == 0 || frame % WORD != 0 || frame < base || frame - base > STACK_WINDOW {
            break;
        }
        let return_addr = read_word(frame, layout.return_addr);
        if return_addr == 0 {
            break;
        }
        visit(visited, return_addr)?;
        visited += 1;

        let next = read_word(frame, layout.saved_fp);
        if next <= frame {
            break;
        }
        frame = next;
    }
    Ok(visited)
}

unsafe fn read_word(frame: usize, offset: isize) -> usize {
    std::ptr::read_volatile((frame as *const usize).offset(offset))
}
