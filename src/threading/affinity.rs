//! Core detection and thread pinning.

/// Logical cores visible to this process.
pub fn detected_core_count() -> usize {
    num_cpus::get().max(1)
}

/// Worker count for a given cap: `min(max_threads, cores)`, at least 1.
pub fn optimal_thread_count(max_threads: usize) -> usize {
    max_threads.min(detected_core_count()).max(1)
}

/// Pin the calling thread to one logical core.
///
/// Returns `false` if the kernel rejects the mask or the platform has no
/// affinity API. Callers treat that as "run unpinned".
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> bool {
    if core >= libc::CPU_SETSIZE as usize {
        return false;
    }
    // SAFETY: cpuset is a plain bitmask initialised by CPU_ZERO; pid 0 is the calling thread.
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core, &mut cpuset);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset) == 0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core: usize) -> bool {
    false
}
