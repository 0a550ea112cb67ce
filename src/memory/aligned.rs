//! Cache-line aligned buffers with a stack fallback.

use std::alloc::Layout;
use std::ptr::NonNull;

use bytemuck::Zeroable;

use crate::error::{Result, TlgemmError};

/// Alignment of every buffer handed out by this module.
pub const CACHE_LINE_SIZE: usize = 64;

/// Capacity of the stack fallback accumulator. Matches the largest row
/// count in the built-in shape table (8640).
pub const STACK_FALLBACK_ROWS: usize = 8640;

/// Zero-initialised heap buffer aligned to [`CACHE_LINE_SIZE`].
pub struct AlignedBuf<T: Zeroable + Copy> {
    ptr: NonNull<T>,
    len: usize,
    layout: Option<Layout>,
}

impl<T: Zeroable + Copy> AlignedBuf<T> {
    /// Allocate `len` zeroed elements, or `None` if the allocator refuses.
    pub fn try_zeroed(len: usize) -> Option<Self> {
        if len == 0 || std::mem::size_of::<T>() == 0 {
            return Some(Self {
                ptr: NonNull::dangling(),
                len,
                layout: None,
            });
        }

        let size = len.checked_mul(std::mem::size_of::<T>())?;
        let align = std::mem::align_of::<T>().max(CACHE_LINE_SIZE);
        let layout = Layout::from_size_align(size, align).ok()?;

        // SAFETY: layout has nonzero size. The all-zero bit pattern is a
        // valid `T` because `T: Zeroable`.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw)?;

        Some(Self {
            ptr,
            len,
            layout: Some(layout),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: ptr is valid for len initialised elements (or dangling with len 0 / ZST).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Zeroable + Copy> Drop for AlignedBuf<T> {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: allocated in try_zeroed with exactly this layout.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

// SAFETY: AlignedBuf uniquely owns its allocation, like Vec<T>.
unsafe impl<T: Zeroable + Copy + Send> Send for AlignedBuf<T> {}
unsafe impl<T: Zeroable + Copy + Sync> Sync for AlignedBuf<T> {}

#[repr(C, align(64))]
struct StackLines([i32; STACK_FALLBACK_ROWS]);

/// Run `f` over a zeroed, cache-line aligned `i32` accumulator of `len` slots.
///
/// The buffer comes from the heap; if that allocation fails it comes from a
/// fixed-size stack array instead. A request larger than
/// [`STACK_FALLBACK_ROWS`] that also fails on the heap is rejected.
pub fn with_zeroed_accumulator<R>(len: usize, f: impl FnOnce(&mut [i32]) -> R) -> Result<R> {
    with_accumulator_from(AlignedBuf::try_zeroed(len), len, f)
}

pub(crate) fn with_accumulator_from<R>(
    heap: Option<AlignedBuf<i32>>,
    len: usize,
    f: impl FnOnce(&mut [i32]) -> R,
) -> Result<R> {
    match heap {
        Some(mut buf) => Ok(f(buf.as_mut_slice())),
        None => {
            if len > STACK_FALLBACK_ROWS {
                return Err(TlgemmError::AccumulatorTooLarge {
                    requested: len,
                    capacity: STACK_FALLBACK_ROWS,
                });
            }
            log::warn!(
                "accumulator allocation of {} rows failed, using stack fallback",
                len
            );
            let mut stack = StackLines([0; STACK_FALLBACK_ROWS]);
            Ok(f(&mut stack.0[..len]))
        }
    }
}
