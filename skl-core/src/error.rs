// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the secure kernel loader core.
//!
//! Every variant corresponds to one row of the error-handling table: what
//! the caller does with it (reboot, halt, log-and-continue) is a decision
//! for the orchestrator and the entry binary, not for this type.

use core::fmt;

use skl_defs::psp::DrtmStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SklError {
    /// The SLRT's `DL_INFO` entry is missing, malformed, or fails one of
    /// `validate_dl_info`'s bounds checks.
    BadBootloaderData,
    /// A singleton SLRT tag (`DL_INFO`, `LOG_INFO`) appeared more than
    /// once.
    DuplicateSingletonEntry,
    /// The bootloader-declared event log buffer is smaller than the
    /// minimum size for the active TPM family.
    LogBufferTooSmall,
    /// The event log buffer overlaps the measured SLB range.
    LogBufferOverlapsSlb,
    /// The SLRT `LOG_INFO` format tag does not match the TPM family in use.
    LogFormatMismatch,
    /// Appending a record would exceed the event log's declared size.
    LogBufferFull,
    /// No IOMMU capability was found, or it is disabled by firmware.
    IommuCapabilityAbsent,
    /// Server-path integrity check: command buffer or device table
    /// contents changed between submission and completion of
    /// `INVALIDATE_IOMMU_ALL`. This is fatal: tampering with the command
    /// buffer or device table while the IOMMU is draining them means the
    /// hardware may already be acting on attacker-controlled state, so
    /// callers must halt, not merely propagate the error.
    IommuHashMismatch,
    /// The bootloader-provided DMA-safe relocation area is too small to
    /// hold the device table, event log, and command buffer.
    IommuDmaAreaTooSmall,
    /// No recognized PSP device was found on the PCI bus.
    PspNotPresent,
    /// A recognized AMD SP device was found, but it does not carry a PSP
    /// (`PspVersion::None`) or uses an unsupported mailbox layout
    /// (`PspVersion::V1`).
    PspUnsupportedVersion,
    /// The PSP mailbox never asserted `READY` before the bounded retry
    /// budget was exhausted.
    PspTimeout,
    /// The PSP completed a command but reported a nonzero status.
    PspCommandFailed(DrtmStatus),
    /// `EXTEND_OSSL_DIGEST`'s image size does not fit in 32 bits.
    DlmeImageTooLarge,
}

impl fmt::Display for SklError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SklError::BadBootloaderData => write!(f, "Bad bootloader data format"),
            SklError::DuplicateSingletonEntry => {
                write!(f, "SLRT contains a duplicate singleton entry")
            }
            SklError::LogBufferTooSmall => write!(f, "Event log buffer smaller than minimum size"),
            SklError::LogBufferOverlapsSlb => {
                write!(f, "Event log buffer overlaps the measured SLB")
            }
            SklError::LogFormatMismatch => {
                write!(f, "Event log format does not match TPM family")
            }
            SklError::LogBufferFull => write!(f, "Event log buffer is full"),
            SklError::IommuCapabilityAbsent => {
                write!(f, "IOMMU capability not present, DMA attacks possible")
            }
            SklError::IommuHashMismatch => {
                write!(f, "IOMMU command buffer or device table hash mismatch")
            }
            SklError::IommuDmaAreaTooSmall => {
                write!(f, "Bootloader IOMMU DMA area too small")
            }
            SklError::PspNotPresent => write!(f, "No PSP found on PCI bus"),
            SklError::PspUnsupportedVersion => write!(f, "PSP present but unsupported version"),
            SklError::PspTimeout => write!(f, "PSP mailbox command timed out"),
            SklError::PspCommandFailed(status) => {
                write!(f, "PSP command failed with status {status:?}")
            }
            SklError::DlmeImageTooLarge => write!(f, "DLME image too large to relocate"),
        }
    }
}

impl core::error::Error for SklError {}
