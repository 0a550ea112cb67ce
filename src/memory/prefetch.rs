//! Advisory cache prefetch hints.
//!
//! Both hints touch only the first byte of the slice and never fault, so
//! they are safe to call on any slice. On targets without a hint they
//! compile to nothing.

/// Hint that `data` will be read soon (temporal, all cache levels).
#[inline(always)]
pub fn prefetch_read<T>(data: &[T]) {
    if data.is_empty() {
        return;
    }
    let ptr = data.as_ptr();

    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
        // SAFETY: prefetch never dereferences architecturally; ptr is in bounds.
        unsafe { _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8) };
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: PRFM is a hint and cannot fault.
        unsafe {
            std::arch::asm!(
                "prfm pldl1keep, [{0}]",
                in(reg) ptr,
                options(nostack, readonly, preserves_flags)
            );
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let _ = ptr;
}

/// Hint that `data` will be written soon.
#[inline(always)]
pub fn prefetch_write<T>(data: &[T]) {
    if data.is_empty() {
        return;
    }
    let ptr = data.as_ptr();

    // x86 has no portable write hint without PRFCHW; use the read hint.
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
        // SAFETY: see prefetch_read.
        unsafe { _mm_prefetch::<_MM_HINT_T0>(ptr as *const i8) };
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: PRFM is a hint and cannot fault.
        unsafe {
            std::arch::asm!(
                "prfm pstl1keep, [{0}]",
                in(reg) ptr,
                options(nostack, readonly, preserves_flags)
            );
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let _ = ptr;
}
