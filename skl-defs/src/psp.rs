// SPDX-License-Identifier: MIT OR Apache-2.0

//! AMD PSP C2P mailbox wire format: register bit layout and the closed set
//! of DRTM status codes the PSP can return. Bit-exact with `include/psp.h`
//! in the reference secure-kernel-loader sources.

use bitfield_struct::bitfield;

pub const DRTM_MBOX_READY_MASK: u32 = 1 << 31;
pub const DRTM_MBOX_CMD_SHIFT: u32 = 16;

/// `c2pmsg_72`'s packed layout: a 16-bit status code in the low half, the
/// command byte at bits 23:16 (`DRTM_MBOX_CMD_SHIFT`), 7 reserved bits, and
/// the `READY` bit in the top position. The CPU writes `command` (status and
/// reserved bits left zero) to submit, and reads the whole word back to pick
/// up `ready`/`status` once the PSP has serviced it.
#[bitfield(u32)]
pub struct Psp72Register {
    #[bits(16)]
    pub status: u16,
    pub command: u8,
    #[bits(7)]
    __reserved: u8,
    pub ready: bool,
}

/// DRTM command codes accepted by `c2pmsg_72`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrtmCommand {
    GetCapability = 0x1,
    TmrSetup = 0x2,
    TmrRelease = 0x3,
    Launch = 0x4,
    GetTcgLogs = 0x7,
    TpmLocalityAccess = 0x8,
    GetTmrDescriptors = 0x9,
    AllocateSharedMemory = 0xA,
    ExtendOsslDigest = 0xB,
    GetIvrsTableInfo = 0xC,
}

impl DrtmCommand {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Status codes echoed in the low 16 bits of `c2pmsg_72` after a command
/// completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrtmStatus {
    NoError,
    NotSupported,
    LaunchError,
    TmrSetupFailed,
    TmrDestroyFailed,
    GetTcgLogsFailed,
    OutOfResources,
    Generic,
    InvalidServiceId,
    MemoryUnaligned,
    MinimumSize,
    GetTmrDescriptorFailed,
    ExtendOsslDigestFailed,
    SetupNotAllowed,
    GetIvrsTableFailed,
    Undefined(u32),
}

impl DrtmStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0000_0000 => Self::NoError,
            0x0000_0001 => Self::NotSupported,
            0x0000_0002 => Self::LaunchError,
            0x0000_0003 => Self::TmrSetupFailed,
            0x0000_0004 => Self::TmrDestroyFailed,
            0x0000_0007 => Self::GetTcgLogsFailed,
            0x0000_0008 => Self::OutOfResources,
            0x0000_0009 => Self::Generic,
            0x0000_000A => Self::InvalidServiceId,
            0x0000_000B => Self::MemoryUnaligned,
            0x0000_000C => Self::MinimumSize,
            0x0000_000D => Self::GetTmrDescriptorFailed,
            0x0000_000E => Self::ExtendOsslDigestFailed,
            0x0000_000F => Self::SetupNotAllowed,
            0x0000_0010 => Self::GetIvrsTableFailed,
            other => Self::Undefined(other),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::NoError)
    }
}

/// PSP generations recognized by the DRTM mailbox probe. Only `V2`/`V3`
/// expose the mailbox window this loader speaks; `V1` and devices tagged
/// `None` (PSP-less) both fail discovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PspVersion {
    None,
    V1,
    V2,
    V3,
}

/// One entry of the static (vendor, device) allow-list used to recognize a
/// PSP-capable AMD Server/IO-hub function during PCI scan.
#[derive(Copy, Clone, Debug)]
pub struct PciPspDevice {
    pub vendor_id: u16,
    pub device_id: u16,
    pub version: PspVersion,
}

pub const AMD_VENDOR_ID: u16 = 0x1022;

pub const PSP_DEVICE_LIST: &[PciPspDevice] = &[
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x1537,
        version: PspVersion::None,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x1456,
        version: PspVersion::V1,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x1468,
        version: PspVersion::None,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x1486,
        version: PspVersion::V2,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x15DF,
        version: PspVersion::V3,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x1649,
        version: PspVersion::V2,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x14CA,
        version: PspVersion::V3,
    },
    PciPspDevice {
        vendor_id: AMD_VENDOR_ID,
        device_id: 0x15C7,
        version: PspVersion::None,
    },
];

/// SMN index/data register pair at `(bus=0, dev=0, func=0)` used to reach
/// the PSP BAR through the IOHC back door.
pub const SMN_INDEX_OFFSET: u8 = 0xB8;
pub const SMN_DATA_OFFSET: u8 = 0xBC;

pub const IOHC0NBCFG_SMNBASE: u32 = 0x13B0_0000;
pub const PSP_BASE_ADDR_LO_SMN_ADDRESS: u32 = IOHC0NBCFG_SMNBASE + 0x102E0;

/// Byte offsets of the four C2P mailbox registers from the discovered PSP
/// MMIO base.
pub const C2PMSG_72_OFFSET: u32 = 0x10A20;
pub const C2PMSG_93_OFFSET: u32 = 0x10A74;
pub const C2PMSG_94_OFFSET: u32 = 0x10A78;
pub const C2PMSG_95_OFFSET: u32 = 0x10A7C;

/// Staging address the PSP requires the DLME image to be relocated to
/// before `EXTEND_OSSL_DIGEST` will read it.
pub const DRTM_OSSL_RELOC_ADDR: u64 = 0x0800_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_known_codes() {
        assert!(DrtmStatus::from_code(0).is_success());
        assert_eq!(DrtmStatus::from_code(0xB), DrtmStatus::MemoryUnaligned);
        assert_eq!(DrtmStatus::from_code(0x1234), DrtmStatus::Undefined(0x1234));
    }

    #[test]
    fn only_none_marked_devices_lack_a_psp() {
        for dev in PSP_DEVICE_LIST {
            if dev.device_id == 0x1486 {
                assert_eq!(dev.version, PspVersion::V2);
            }
        }
    }
}
