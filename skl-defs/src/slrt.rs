// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secure Launch Resource Table wire format.
//!
//! Layout and field order are bit-exact with the bootloader's SLRT producer;
//! see `include/slrt.h` in the reference secure-kernel-loader sources. All
//! structs are read directly out of bootloader-owned memory, so every type
//! here derives [`FromBytes`] and [`Unaligned`] rather than relying on the
//! compiler's native struct layout.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Bootloader identifiers recognized in [`SlrBlContext::bootloader`].
pub const SLR_BOOTLOADER_INVALID: u16 = 0;
pub const SLR_BOOTLOADER_GRUB: u16 = 1;

/// Event log formats carried in [`SlrEntryLogInfo::format`].
pub const SLR_DRTM_TPM12_LOG: u16 = 1;
pub const SLR_DRTM_TPM20_LOG: u16 = 2;

/// SLRT entry tags.
pub const SLR_ENTRY_INVALID: u16 = 0x0000;
pub const SLR_ENTRY_DL_INFO: u16 = 0x0001;
pub const SLR_ENTRY_LOG_INFO: u16 = 0x0002;
pub const SLR_ENTRY_ENTRY_POLICY: u16 = 0x0003;
pub const SLR_ENTRY_INTEL_INFO: u16 = 0x0004;
pub const SLR_ENTRY_AMD_INFO: u16 = 0x0005;
pub const SLR_ENTRY_ARM_INFO: u16 = 0x0006;
pub const SLR_ENTRY_UEFI_INFO: u16 = 0x0007;
pub const SLR_ENTRY_UEFI_CONFIG: u16 = 0x0008;
pub const SLR_ENTRY_END: u16 = 0xffff;

/// Common header prefixing every SLRT entry.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrEntryHeader {
    pub tag: u16,
    pub size: u16,
}

/// Primary Secure Launch Resource Table header. The bootloader places this
/// at the address held by the linker symbol `bootloader_data`; it is
/// followed immediately by a sequence of tagged entries, terminated by one
/// with `tag == SLR_ENTRY_END`.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrTableHeader {
    pub magic: u32,
    pub revision: u16,
    pub architecture: u16,
    pub size: u32,
    pub max_size: u32,
}

/// Boot loader launch context, embedded in [`SlrEntryDlInfo`].
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrBlContext {
    pub bootloader: u16,
    pub reserved: [u16; 3],
    pub context: u64,
}

/// DRTM Dynamic Launch Configuration (`SLR_ENTRY_DL_INFO`, singleton).
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrEntryDlInfo {
    pub hdr: SlrEntryHeader,
    pub dce_size: u32,
    pub dce_base: u64,
    pub dlme_size: u64,
    pub dlme_base: u64,
    /// Offset from `dlme_base` of the DLME entry point.
    pub dlme_entry: u64,
    pub bl_context: SlrBlContext,
    pub dl_handler: u64,
}

/// TPM Log Information (`SLR_ENTRY_LOG_INFO`, singleton).
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrEntryLogInfo {
    pub hdr: SlrEntryHeader,
    pub format: u16,
    pub reserved: [u16; 3],
    pub size: u32,
    pub addr: u64,
}

/// AMD platform info (`SLR_ENTRY_AMD_INFO`, singleton). Carries the
/// bootloader-provided DMA-safe relocation region the server IOMMU path
/// copies the device table, event log, and command buffer into, the
/// address of the completion flag word the client path polls, and the
/// count of [`SlrIommuIvhd`] descriptors trailing this fixed header within
/// the same entry (`device_count` entries, `entry.hdr.size -
/// size_of::<SlrEntryAmdInfo>()` bytes long).
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrEntryAmdInfo {
    pub hdr: SlrEntryHeader,
    pub device_count: u32,
    pub dma_area_addr: u64,
    pub dma_area_size: u64,
    pub completion_flag_addr: u64,
}

/// One IVHD-like IOMMU device descriptor trailing a [`SlrEntryAmdInfo`]
/// entry. `base_address` shares the capability BAR's convention: bit 0 is
/// the firmware enable bit, bits 63:14 the MMIO base.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct SlrIommuIvhd {
    pub device_id: u16,
    pub reserved: u16,
    pub base_address: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn header_sizes_are_bit_exact() {
        assert_eq!(size_of::<SlrEntryHeader>(), 4);
        assert_eq!(size_of::<SlrTableHeader>(), 16);
        assert_eq!(size_of::<SlrBlContext>(), 16);
        assert_eq!(size_of::<SlrEntryDlInfo>(), 4 + 4 + 8 + 8 + 8 + 8 + 16 + 8);
        assert_eq!(size_of::<SlrEntryLogInfo>(), 4 + 2 + 6 + 4 + 8);
        assert_eq!(size_of::<SlrEntryAmdInfo>(), 4 + 4 + 8 + 8 + 8);
        assert_eq!(size_of::<SlrIommuIvhd>(), 2 + 2 + 8);
    }
}
