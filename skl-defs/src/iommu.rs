// SPDX-License-Identifier: MIT OR Apache-2.0

//! AMD IOMMU wire format: Device Table Entry, command buffer entry, and the
//! MMIO register layout, bit-exact with `include/iommu.h` in the reference
//! secure-kernel-loader sources.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// PCI location of the IOMMU's linked-list capability.
pub const IOMMU_PCI_BUS: u8 = 0;
pub const IOMMU_PCI_DEVICE: u8 = 0;
pub const IOMMU_PCI_FUNCTION: u8 = 2;

/// Capability ID the IOMMU's PCI capability list entry is tagged with
/// (AMD's "Secure Device" capability, shared with the legacy DEV block).
pub const IOMMU_CAP_ID: u8 = 0x0f;

/// Offsets of the base-address registers within the IOMMU's PCI capability.
pub const IOMMU_CAP_BA_LOW_OFFSET: u8 = 0x04;
pub const IOMMU_CAP_BA_HIGH_OFFSET: u8 = 0x08;
pub const IOMMU_CAP_BA_LOW_ENABLE: u32 = 1 << 0;
pub const IOMMU_CAP_BA_LOW_ADDR_MASK: u32 = 0xffff_c000;

/// Indices (not byte offsets — this is an array of `u64` registers) into the
/// IOMMU's MMIO window.
pub const IOMMU_MMIO_DEVICE_TABLE_BA: usize = 0x0000 / 8;
pub const IOMMU_MMIO_COMMAND_BUF_BA: usize = 0x0008 / 8;
pub const IOMMU_MMIO_EVENT_LOG_BA: usize = 0x0010 / 8;
pub const IOMMU_MMIO_CONTROL_REGISTER: usize = 0x0018 / 8;
pub const IOMMU_MMIO_STATUS_REGISTER: usize = 0x0020 / 8;
pub const IOMMU_MMIO_EXTENDED_FEATURE: usize = 0x0030 / 8;
pub const IOMMU_MMIO_COMMAND_BUF_HEAD: usize = 0x2000 / 8;
pub const IOMMU_MMIO_COMMAND_BUF_TAIL: usize = 0x2008 / 8;
pub const IOMMU_MMIO_EVENT_LOG_HEAD: usize = 0x2010 / 8;
pub const IOMMU_MMIO_EVENT_LOG_TAIL: usize = 0x2018 / 8;

bitflags! {
    /// Control Register feature bits this loader touches. The register has
    /// many more bits (per-feature enables this loader never programs); only
    /// the ones the enable sequence in `iommu.rs` needs are modeled here.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IommuControlFlags: u64 {
        const IOMMU_EN     = 1 << 0;
        const CMD_BUF_EN   = 1 << 12;
        const EVENT_LOG_EN = 1 << 13;
    }
}

/// All feature-enable bits this loader is responsible for clearing before
/// (re)programming the device table.
pub const IOMMU_CR_ENABLE_ALL_MASK: u64 = IommuControlFlags::all().bits();
pub const IOMMU_CR_IOMMU_EN: u64 = IommuControlFlags::IOMMU_EN.bits();
pub const IOMMU_CR_CMD_BUF_EN: u64 = IommuControlFlags::CMD_BUF_EN.bits();
pub const IOMMU_CR_EVENT_LOG_EN: u64 = IommuControlFlags::EVENT_LOG_EN.bits();

bitflags! {
    /// Status Register bits this loader touches.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IommuStatusFlags: u64 {
        const EVENT_LOG_INT = 1 << 1;
    }
}
pub const IOMMU_SR_EVENT_LOG_INT: u64 = IommuStatusFlags::EVENT_LOG_INT.bits();

bitflags! {
    /// Extended Feature Register bits this loader reads.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IommuExtendedFeatureFlags: u64 {
        const IA_SUP = 1 << 6;
    }
}
pub const IOMMU_EF_IA_SUP: u64 = IommuExtendedFeatureFlags::IA_SUP.bits();

pub const COMPLETION_WAIT: u32 = 0x01;
pub const INVALIDATE_IOMMU_ALL: u32 = 0x08;

/// "done" marker `COMPLETION_WAIT` stores into the completion flag.
pub const COMPLETION_WAIT_MARKER: u32 = 0x656e_6f64;

pub const PAGE_SIZE: usize = 4096;
/// Device table size (2 pages), divided into 16-byte entries.
pub const DEVICE_TABLE_BYTES: usize = 2 * PAGE_SIZE;
pub const DEVICE_TABLE_ENTRIES: usize = DEVICE_TABLE_BYTES / core::mem::size_of::<IommuDte>();
pub const EVENT_LOG_BYTES: usize = PAGE_SIZE;

bitflags! {
    /// First quadword flags of a Device Table Entry.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IommuDteFlags: u64 {
        /// Entry is valid and may be consulted by the IOMMU.
        const V  = 1 << 0;
        /// Translation information (quadword 0/1 address-translation fields)
        /// is valid. Set alongside `V` with no translation programmed, this
        /// loader's blocked-by-default entries simply have nothing to
        /// translate against, so every device transaction aborts.
        const TV = 1 << 1;
    }
}
pub const IOMMU_DTE_Q0_V: u64 = IommuDteFlags::V.bits();
pub const IOMMU_DTE_Q0_TV: u64 = IommuDteFlags::TV.bits();

/// One Device Table Entry. Every entry this loader ships is initialized to
/// `{V=1, TV=1}`: valid, but with no translation configured, so every
/// device-originated transaction is blocked until explicitly translated.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct IommuDte {
    pub a: u64,
    pub b: u64,
}

impl IommuDte {
    pub const BLOCKED: IommuDte = IommuDte {
        a: IOMMU_DTE_Q0_V | IOMMU_DTE_Q0_TV,
        b: 0,
    };
}

/// One 16-byte IOMMU command entry.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct IommuCommand {
    pub u0: u32,
    pub u1: u32,
    pub opcode: u32,
    pub u2: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn entry_sizes_are_bit_exact() {
        assert_eq!(size_of::<IommuDte>(), 16);
        assert_eq!(size_of::<IommuCommand>(), 16);
    }

    #[test]
    fn device_table_has_512_entries() {
        assert_eq!(DEVICE_TABLE_ENTRIES, 512);
    }

    #[test]
    fn blocked_dte_has_v_and_tv_set() {
        let dte = IommuDte::BLOCKED;
        assert_eq!({ dte.a } & (IOMMU_DTE_Q0_V | IOMMU_DTE_Q0_TV), 3);
    }

    #[test]
    fn control_enable_all_mask_covers_every_flag() {
        assert_eq!(
            IOMMU_CR_ENABLE_ALL_MASK,
            IOMMU_CR_IOMMU_EN | IOMMU_CR_CMD_BUF_EN | IOMMU_CR_EVENT_LOG_EN
        );
    }
}
