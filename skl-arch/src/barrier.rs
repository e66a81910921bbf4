// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory ordering primitives.
//!
//! The IOMMU setup sequence and command submission path both require a
//! store-store barrier between writes that must be observed by the IOMMU in
//! program order. No load barriers are needed anywhere in this loader.

/// Store-store barrier: CPU writes issued before this call are guaranteed to
/// be visible to observers (here, the IOMMU reading its own MMIO registers)
/// before any write issued after it.
#[inline(always)]
pub fn wmb() {
    // SAFETY: `sfence` has no preconditions; it only orders memory
    // operations and never faults.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!("sfence", options(nostack, preserves_flags));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::Release);
}
