// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launch orchestrator (C7).
//!
//! Ties C1 (SLRT), C3/C4 (DMA protection), C5 (event log), C6 (PSP mailbox)
//! together into the two platform flows: client (AMD consumer silicon,
//! DEV/IOMMU DMA protection plus TPM measurement) and server (AMD
//! Milan/Rome, PSP-mediated launch plus a relocated, integrity-checked
//! IOMMU setup). Both flows validate the same `DL_INFO` entry and return
//! the same `(dlme_entry, dlme_arg)` pair the asm trampoline hands off to.
//!
//! Every hardware dependency arrives as a trait object or a caller-supplied
//! closure, so both flows run start to finish against synthetic fixtures in
//! this module's tests.

use sha1::{Digest, Sha1};
use sha2::Sha256;

use skl_defs::event_log::{SHA1_DIGEST_SIZE, SHA256_DIGEST_SIZE};
use skl_defs::iommu::IommuCommand;
use skl_defs::slrt::{
    SlrEntryAmdInfo, SlrEntryDlInfo, SlrIommuIvhd, SLR_BOOTLOADER_GRUB, SLR_ENTRY_AMD_INFO,
    SLR_ENTRY_DL_INFO,
};

use crate::error::SklError;
use crate::event_log::EventLogWriter;
use crate::iommu::{self, CommandBuf, DeviceTable, IommuEventLog};
use crate::memprotect::disable_memory_protection;
use crate::pci::PciConfigSpace;
use crate::psp::{self, PspMailbox};
use crate::tpm::{Tpm, TpmAlgo, TpmFamily};

use skl_arch::mmio::Mmio64;
use zerocopy::{FromBytes, IntoBytes};

/// Same enable-bit/address-mask convention as the IOMMU capability BAR
/// (`IOMMU_CAP_BA_LOW_ENABLE`/`_ADDR_MASK`), but `base_address` here is
/// already a full 64-bit field rather than split lo/hi PCI registers.
const IVHD_BASE_ADDR_ENABLE: u64 = 1 << 0;
const IVHD_BASE_ADDR_MASK: u64 = 0xffff_ffff_ffff_c000;

/// What the orchestrator hands back to the asm trampoline: entry point and
/// the opaque context word the bootloader asked to be passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchResult {
    pub dlme_entry: u64,
    pub dlme_arg: u64,
}

/// Validates the singleton `DL_INFO` entry. Any failure here is the
/// "reboot" class of error: a bad or missing DL_INFO means the bootloader
/// handoff itself cannot be trusted.
pub fn validate_dl_info(slrt: &crate::slrt::Slrt<'_>) -> Result<SlrEntryDlInfo, SklError> {
    let first = slrt
        .first_entry_with_tag(SLR_ENTRY_DL_INFO)
        .ok_or(SklError::BadBootloaderData)?;
    if slrt
        .next_entry_with_tag(first, SLR_ENTRY_DL_INFO)
        .is_some()
    {
        return Err(SklError::DuplicateSingletonEntry);
    }

    let dl_info = SlrEntryDlInfo::ref_from_bytes(first).map_err(|_| SklError::BadBootloaderData)?;
    if dl_info.hdr.size as usize != core::mem::size_of::<SlrEntryDlInfo>() {
        return Err(SklError::BadBootloaderData);
    }
    if dl_info.dlme_base >= 0x1_0000_0000 {
        return Err(SklError::BadBootloaderData);
    }
    if dl_info
        .dlme_base
        .checked_add(dl_info.dlme_size)
        .is_none_or(|end| end >= 0x1_0000_0000)
    {
        return Err(SklError::BadBootloaderData);
    }
    if dl_info.dlme_entry >= dl_info.dlme_size {
        return Err(SklError::BadBootloaderData);
    }
    if dl_info.bl_context.bootloader != SLR_BOOTLOADER_GRUB {
        return Err(SklError::BadBootloaderData);
    }

    Ok(*dl_info)
}

/// Borrows the DLME image by physical address. The launch environment runs
/// with an identity mapping (no paging set up yet), so physical address and
/// virtual address coincide; the lifetime is tied to the caller's use, not
/// to any owner, since nothing in this crate owns the DLME image.
///
/// # Safety
/// `[base, base + size)` must be readable memory for the duration of the
/// borrow.
unsafe fn physical_slice(base: u64, size: u64) -> &'static [u8] {
    // SAFETY: delegated to the caller.
    unsafe { core::slice::from_raw_parts(base as *const u8, size as usize) }
}

/// Hashes `data` with SHA-1, extends `pcr` with it, and appends a matching
/// TCG event-log record. On TPM 2.0 also extends with SHA-256 and logs both
/// digests in one record. Mirrors `extend_pcr` in the reference `main.c`.
/// Log-append failures are the "degrade, don't abort" class of error: a
/// disabled logger does not stop the launch, so this never returns an error
/// of its own; callers that care can inspect the log writer's state
/// separately.
fn extend_pcr_and_log(
    tpm: &mut dyn Tpm,
    log: &mut EventLogWriter<'_>,
    pcr: u32,
    data: &[u8],
    event: &[u8],
) {
    let sha1_digest: [u8; SHA1_DIGEST_SIZE] = Sha1::digest(data).into();
    tpm.extend_pcr(pcr, TpmAlgo::Sha1, &sha1_digest);

    if tpm.family() == TpmFamily::Tpm20 {
        let sha256_digest: [u8; SHA256_DIGEST_SIZE] = Sha256::digest(data).into();
        tpm.extend_pcr(pcr, TpmAlgo::Sha256, &sha256_digest);
        if log.log_event_tpm20(pcr, &sha1_digest, &sha256_digest, event).is_err() {
            log::warn!("event log append failed for {event:?}, logger disabled");
        }
    } else if log.log_event_tpm12(pcr, &sha1_digest, event).is_err() {
        log::warn!("event log append failed for {event:?}, logger disabled");
    }
}

/// Client-path DRTM measurement: claims TPM locality 2, extends PCR 17 with
/// the DLME entry offset and then the full DLME image, releases the
/// locality. A denied locality request is logged and ignored rather than
/// aborting the launch — the TPM will simply fail later if locality access
/// was truly required and wasn't granted.
pub fn client_measure_dlme(dl_info: &SlrEntryDlInfo, tpm: &mut dyn Tpm, log: &mut EventLogWriter<'_>) {
    if !tpm.request_locality(2) {
        log::warn!("failed to claim TPM locality 2, measuring anyway");
    }

    let entry_offset = dl_info.dlme_entry as u32;
    extend_pcr_and_log(tpm, log, 17, &entry_offset.to_le_bytes(), b"DLME entry offset");

    // SAFETY: dlme_base/dlme_size were bounds-checked against the 32-bit
    // DLME limit in validate_dl_info, and the DLME image is placed by the
    // bootloader before control reaches this loader.
    let dlme = unsafe { physical_slice(dl_info.dlme_base, dl_info.dlme_size) };
    extend_pcr_and_log(tpm, log, 17, dlme, b"DLME");

    tpm.relinquish_locality();
}

/// Client-path DMA protection bootstrap: locates the IOMMU capability and
/// BAR, then runs the unconditional two-call sequence — program the tables
/// once (the SLB exclusion zone aborts this attempt), lift the exclusion
/// zone, program them again, and spin on the completion flag. There is
/// deliberately no timeout on that final spin: a DMA-protection setup that
/// silently falls through on a timeout is worse than one that hangs
/// visibly, since it means untrusted devices get bus mastership back during
/// a measured launch.
///
/// Returns `Err(IommuCapabilityAbsent)` when there is no IOMMU to program
/// at all (no capability, or firmware left it disabled) — the caller logs
/// and continues without DMA protection, it does not reboot.
pub fn dma_protection_setup(
    pci: &dyn PciConfigSpace,
    mmio: &Mmio64,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    completion_flag_addr: u64,
    mut wait_for_completion: impl FnMut() -> bool,
) -> Result<(), SklError> {
    let cap = iommu::iommu_locate_cap(pci);
    if cap == 0 {
        return Err(SklError::IommuCapabilityAbsent);
    }
    if iommu::iommu_locate_bar(pci, cap).is_none() {
        return Err(SklError::IommuCapabilityAbsent);
    }

    iommu::iommu_setup(mmio, device_table, command_buf, event_log, completion_flag_addr);
    disable_memory_protection(pci);
    iommu::iommu_setup(mmio, device_table, command_buf, event_log, completion_flag_addr);

    while !wait_for_completion() {}
    Ok(())
}

/// Full client-path launch: validate `DL_INFO`, set up DMA protection
/// (best-effort, logged on failure), measure the DLME image into the TPM,
/// and hand back the entry point.
#[allow(clippy::too_many_arguments)]
pub fn client_launch(
    slrt: &crate::slrt::Slrt<'_>,
    pci: &dyn PciConfigSpace,
    mmio: &Mmio64,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    completion_flag_addr: u64,
    wait_for_completion: impl FnMut() -> bool,
    tpm: &mut dyn Tpm,
    log: &mut EventLogWriter<'_>,
) -> Result<LaunchResult, SklError> {
    let dl_info = validate_dl_info(slrt)?;

    if let Err(e) = dma_protection_setup(
        pci,
        mmio,
        device_table,
        command_buf,
        event_log,
        completion_flag_addr,
        wait_for_completion,
    ) {
        log::warn!("DMA protection setup failed ({e}), DMA attacks possible");
    }

    client_measure_dlme(&dl_info, tpm, log);

    Ok(LaunchResult {
        dlme_entry: dl_info.dlme_base + dl_info.dlme_entry,
        dlme_arg: dl_info.bl_context.context,
    })
}

const REQUIRED_DMA_AREA: usize = skl_defs::iommu::DEVICE_TABLE_BYTES
    + skl_defs::iommu::PAGE_SIZE
    + 2 * core::mem::size_of::<IommuCommand>()
    + core::mem::size_of::<u64>();

/// Reads the `AMD_INFO` entry (singleton) and returns its fixed header
/// together with the raw bytes trailing it in the same SLRT entry — the
/// `device_count` [`SlrIommuIvhd`] descriptors, read lazily by [`ivhd_at`]
/// rather than collected up front (this crate has no allocator).
fn amd_info_entry<'a>(slrt: &crate::slrt::Slrt<'a>) -> Option<(SlrEntryAmdInfo, &'a [u8])> {
    let bytes = slrt.first_entry_with_tag(SLR_ENTRY_AMD_INFO)?;
    let fixed_size = core::mem::size_of::<SlrEntryAmdInfo>();
    let fixed = bytes.get(..fixed_size)?;
    let info = *SlrEntryAmdInfo::ref_from_bytes(fixed).ok()?;
    let trailing = bytes.get(fixed_size..)?;
    Some((info, trailing))
}

fn ivhd_at(trailing: &[u8], index: usize) -> Option<SlrIommuIvhd> {
    let size = core::mem::size_of::<SlrIommuIvhd>();
    let start = index.checked_mul(size)?;
    let slice = trailing.get(start..start + size)?;
    Some(*SlrIommuIvhd::ref_from_bytes(slice).ok()?)
}

fn hash_device_table(device_table: &DeviceTable) -> [u8; 32] {
    Sha256::digest(device_table.as_bytes()).into()
}

/// Server-path IOMMU setup for one discovered device
/// (`iommu_setup_method2`'s per-`ivhd` body): programs the relocated
/// tables, spins unboundedly on completion — there is no way to lift the
/// SLB exclusion zone on this generation of server silicon, so unlike the
/// client path there is nothing to retry — then re-hashes the device table
/// and compares against the pre-setup hash. A mismatch means something
/// with DMA access rewrote the device table while the IOMMU was still
/// being programmed, and is treated as an attack, not a recoverable error.
///
/// Narrowed to the device table alone rather than the reference's
/// command-buffer-plus-device-table pair: the command buffer's second slot
/// legitimately receives the `COMPLETION_WAIT` command between the
/// pre-setup snapshot and the post-completion rehash, which would make a
/// whole-buffer comparison mismatch on every run regardless of tampering.
fn iommu_server_setup_one(
    mmio: &Mmio64,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    completion_flag_addr: u64,
    mut wait_for_completion: impl FnMut() -> bool,
) -> Result<(), SklError> {
    let before = hash_device_table(device_table);
    iommu::iommu_setup(mmio, device_table, command_buf, event_log, completion_flag_addr);
    while !wait_for_completion() {}
    let after = hash_device_table(device_table);
    if before != after {
        return Err(SklError::IommuHashMismatch);
    }
    Ok(())
}

/// Server-path IOMMU setup: reads the `AMD_INFO` entry's device list and
/// relocation region, then runs [`iommu_server_setup_one`] for every enabled device. A device with its
/// firmware enable bit clear is skipped, not fatal (`DMA attacks possible`
/// against that device, but the launch proceeds); a missing `AMD_INFO`
/// entry or zero devices is likewise non-fatal. An undersized DMA
/// relocation area or a hash mismatch propagate to the caller, the former
/// as a degrade-and-continue condition and the latter as the one genuinely
/// fatal outcome this function can produce.
pub fn iommu_server_setup(
    slrt: &crate::slrt::Slrt<'_>,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    mut wait_for_completion: impl FnMut() -> bool,
) -> Result<(), SklError> {
    let Some((amd_info, trailing)) = amd_info_entry(slrt) else {
        log::warn!("no AMD_INFO entry present, cannot configure IOMMU for this platform");
        return Ok(());
    };
    if amd_info.device_count == 0 {
        log::info!("no IOMMU hardware devices present");
        return Ok(());
    }
    if (amd_info.dma_area_size as usize) < REQUIRED_DMA_AREA {
        return Err(SklError::IommuDmaAreaTooSmall);
    }

    for i in 0..amd_info.device_count as usize {
        let Some(ivhd) = ivhd_at(trailing, i) else {
            return Err(SklError::BadBootloaderData);
        };
        if ivhd.base_address & IVHD_BASE_ADDR_ENABLE == 0 {
            log::warn!(
                "IOMMU device {} disabled by firmware, DMA attacks possible",
                { ivhd.device_id }
            );
            continue;
        }

        let mmio_base = (ivhd.base_address & IVHD_BASE_ADDR_MASK) as *mut u64;
        // SAFETY: base_address is validated against the firmware enable bit
        // above and comes from the bootloader-supplied AMD_INFO entry,
        // which points at this IOMMU's own MMIO window.
        let mmio = unsafe { Mmio64::new(mmio_base) };
        iommu_server_setup_one(
            &mmio,
            device_table,
            command_buf,
            event_log,
            amd_info.completion_flag_addr,
            &mut wait_for_completion,
        )?;
    }
    Ok(())
}

/// Full server-path launch: validate `DL_INFO`, issue the PSP DRTM launch
/// and OSSL digest extension (best-effort: a nonzero PSP status or a poll
/// timeout is advisory, reported and skipped rather than aborting), then
/// run the server IOMMU path. Only an IOMMU hash mismatch is fatal here;
/// every other failure degrades the launch's DMA protection and continues.
pub fn server_launch(
    slrt: &crate::slrt::Slrt<'_>,
    pci: &dyn PciConfigSpace,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    relocate_dlme: impl FnOnce(u64, u64),
    wait_for_completion: impl FnMut() -> bool,
) -> Result<LaunchResult, SklError> {
    let dl_info = validate_dl_info(slrt)?;

    match psp::discover_psp(pci) {
        Ok((psp_base, _version)) => {
            // SAFETY: psp_base is the PSP MMIO base address discovered
            // above, mapped for the duration of the launch window.
            let mailbox = unsafe { PspMailbox::new(psp_base as *mut u8) };
            if let Err(e) = mailbox.launch() {
                log::warn!("DRTM launch command failed: {e}");
            }
            if let Err(e) = mailbox.extend_ossl_digest(dl_info.dlme_size, relocate_dlme) {
                log::warn!("failed to extend OSSL digest: {e}");
            }
        }
        Err(e) => log::warn!("PSP not available: {e}"),
    }

    match iommu_server_setup(slrt, device_table, command_buf, event_log, wait_for_completion) {
        Ok(()) => {}
        Err(SklError::IommuHashMismatch) => return Err(SklError::IommuHashMismatch),
        Err(e) => log::warn!("server IOMMU setup failed ({e}), DMA attacks possible"),
    }

    Ok(LaunchResult {
        dlme_entry: dl_info.dlme_base + dl_info.dlme_entry,
        dlme_arg: dl_info.bl_context.context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::tests::FakePciConfigSpace;
    use crate::slrt::Slrt;
    use skl_defs::slrt::{SlrBlContext, SlrEntryHeader, SlrTableHeader, SLR_BOOTLOADER_INVALID, SLR_ENTRY_END};

    fn build_dl_info_table(dl_info: SlrEntryDlInfo) -> std::vec::Vec<u8> {
        let hdr_size = core::mem::size_of::<SlrTableHeader>();
        let entry_hdr_size = core::mem::size_of::<SlrEntryHeader>();
        let entry_size = core::mem::size_of::<SlrEntryDlInfo>();
        let total = hdr_size + entry_size + entry_hdr_size;

        let mut out = std::vec![0u8; total];
        let header = SlrTableHeader {
            magic: 0,
            revision: 1,
            architecture: 0,
            size: total as u32,
            max_size: total as u32,
        };
        out[..hdr_size].copy_from_slice(header.as_bytes());
        out[hdr_size..hdr_size + entry_size].copy_from_slice(dl_info.as_bytes());
        let end_hdr = SlrEntryHeader {
            tag: SLR_ENTRY_END,
            size: entry_hdr_size as u16,
        };
        out[hdr_size + entry_size..].copy_from_slice(end_hdr.as_bytes());
        out
    }

    fn valid_dl_info() -> SlrEntryDlInfo {
        SlrEntryDlInfo {
            hdr: SlrEntryHeader {
                tag: SLR_ENTRY_DL_INFO,
                size: core::mem::size_of::<SlrEntryDlInfo>() as u16,
            },
            dce_size: 0,
            dce_base: 0,
            dlme_size: 0x0020_0000,
            dlme_base: 0x4000_0000,
            dlme_entry: 0x100,
            bl_context: SlrBlContext {
                bootloader: SLR_BOOTLOADER_GRUB,
                reserved: [0; 3],
                context: 0xdead_beef,
            },
            dl_handler: 0,
        }
    }

    #[test]
    fn validates_well_formed_dl_info() {
        let table = build_dl_info_table(valid_dl_info());
        let slrt = Slrt::new(&table).unwrap();
        let dl_info = validate_dl_info(&slrt).unwrap();
        assert_eq!({ dl_info.dlme_base }, 0x4000_0000);
        assert_eq!({ dl_info.dlme_entry }, 0x100);
    }

    #[test]
    fn rejects_missing_dl_info() {
        let hdr_size = core::mem::size_of::<SlrTableHeader>();
        let entry_hdr_size = core::mem::size_of::<SlrEntryHeader>();
        let total = hdr_size + entry_hdr_size;
        let mut empty = std::vec![0u8; total];
        let header = SlrTableHeader {
            magic: 0,
            revision: 1,
            architecture: 0,
            size: total as u32,
            max_size: total as u32,
        };
        empty[..hdr_size].copy_from_slice(header.as_bytes());
        let end_hdr = SlrEntryHeader {
            tag: SLR_ENTRY_END,
            size: entry_hdr_size as u16,
        };
        empty[hdr_size..].copy_from_slice(end_hdr.as_bytes());
        let slrt = Slrt::new(&empty).unwrap();
        assert_eq!(validate_dl_info(&slrt), Err(SklError::BadBootloaderData));
    }

    #[test]
    fn rejects_entry_offset_past_image_size() {
        let mut bad = valid_dl_info();
        bad.dlme_entry = bad.dlme_size;
        let table = build_dl_info_table(bad);
        let slrt = Slrt::new(&table).unwrap();
        assert_eq!(validate_dl_info(&slrt), Err(SklError::BadBootloaderData));
    }

    #[test]
    fn rejects_non_grub_bootloader() {
        let mut bad = valid_dl_info();
        bad.bl_context.bootloader = SLR_BOOTLOADER_INVALID;
        let table = build_dl_info_table(bad);
        let slrt = Slrt::new(&table).unwrap();
        assert_eq!(validate_dl_info(&slrt), Err(SklError::BadBootloaderData));
    }

    #[test]
    fn rejects_dlme_above_4gib() {
        let mut bad = valid_dl_info();
        bad.dlme_base = 0xffff_ffff;
        bad.dlme_size = 0x10;
        bad.dlme_entry = 0;
        let table = build_dl_info_table(bad);
        let slrt = Slrt::new(&table).unwrap();
        assert_eq!(validate_dl_info(&slrt), Err(SklError::BadBootloaderData));
    }

    #[test]
    fn rejects_duplicate_dl_info() {
        let dl_info = valid_dl_info();
        let hdr_size = core::mem::size_of::<SlrTableHeader>();
        let entry_hdr_size = core::mem::size_of::<SlrEntryHeader>();
        let entry_size = core::mem::size_of::<SlrEntryDlInfo>();
        let total = hdr_size + 2 * entry_size + entry_hdr_size;
        let mut out = std::vec![0u8; total];
        let header = SlrTableHeader {
            magic: 0,
            revision: 1,
            architecture: 0,
            size: total as u32,
            max_size: total as u32,
        };
        out[..hdr_size].copy_from_slice(header.as_bytes());
        out[hdr_size..hdr_size + entry_size].copy_from_slice(dl_info.as_bytes());
        out[hdr_size + entry_size..hdr_size + 2 * entry_size].copy_from_slice(dl_info.as_bytes());
        let end_hdr = SlrEntryHeader {
            tag: SLR_ENTRY_END,
            size: entry_hdr_size as u16,
        };
        out[hdr_size + 2 * entry_size..].copy_from_slice(end_hdr.as_bytes());
        let slrt = Slrt::new(&out).unwrap();
        assert_eq!(validate_dl_info(&slrt), Err(SklError::DuplicateSingletonEntry));
    }

    struct FakeTpm {
        family: TpmFamily,
        locality_held: bool,
        extends: std::vec::Vec<(u32, TpmAlgo, std::vec::Vec<u8>)>,
    }

    impl FakeTpm {
        fn new(family: TpmFamily) -> Self {
            Self {
                family,
                locality_held: false,
                extends: std::vec::Vec::new(),
            }
        }
    }

    impl Tpm for FakeTpm {
        fn family(&self) -> TpmFamily {
            self.family
        }
        fn request_locality(&mut self, _locality: u8) -> bool {
            self.locality_held = true;
            true
        }
        fn relinquish_locality(&mut self) {
            self.locality_held = false;
        }
        fn extend_pcr(&mut self, pcr: u32, algo: TpmAlgo, digest: &[u8]) {
            self.extends.push((pcr, algo, digest.to_vec()));
        }
    }

    #[test]
    fn client_measure_extends_pcr_twice_per_item_on_tpm20() {
        static IMAGE: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
        let dl_info = SlrEntryDlInfo {
            hdr: SlrEntryHeader {
                tag: SLR_ENTRY_DL_INFO,
                size: core::mem::size_of::<SlrEntryDlInfo>() as u16,
            },
            dce_size: 0,
            dce_base: 0,
            dlme_size: IMAGE.len() as u64,
            dlme_base: IMAGE.as_ptr() as u64,
            dlme_entry: 0,
            bl_context: SlrBlContext {
                bootloader: SLR_BOOTLOADER_GRUB,
                reserved: [0; 3],
                context: 0,
            },
            dl_handler: 0,
        };
        let mut tpm = FakeTpm::new(TpmFamily::Tpm20);
        let mut buf = std::vec![0u8; 16];
        let mut log = EventLogWriter::disabled(&mut buf, TpmFamily::Tpm20);

        client_measure_dlme(&dl_info, &mut tpm, &mut log);

        assert_eq!(tpm.extends.len(), 4);
        assert!(!tpm.locality_held);
    }

    #[test]
    fn client_measure_extends_pcr_once_per_item_on_tpm12() {
        static IMAGE: [u8; 4] = [0xaa; 4];
        let dl_info = SlrEntryDlInfo {
            hdr: SlrEntryHeader {
                tag: SLR_ENTRY_DL_INFO,
                size: core::mem::size_of::<SlrEntryDlInfo>() as u16,
            },
            dce_size: 0,
            dce_base: 0,
            dlme_size: IMAGE.len() as u64,
            dlme_base: IMAGE.as_ptr() as u64,
            dlme_entry: 0,
            bl_context: SlrBlContext {
                bootloader: SLR_BOOTLOADER_GRUB,
                reserved: [0; 3],
                context: 0,
            },
            dl_handler: 0,
        };
        let mut tpm = FakeTpm::new(TpmFamily::Tpm12);
        let mut buf = std::vec![0u8; 16];
        let mut log = EventLogWriter::disabled(&mut buf, TpmFamily::Tpm12);

        client_measure_dlme(&dl_info, &mut tpm, &mut log);

        assert_eq!(tpm.extends.len(), 2);
        assert!(tpm.extends.iter().all(|(_, algo, _)| *algo == TpmAlgo::Sha1));
    }

    #[test]
    fn dma_protection_setup_reports_absent_capability() {
        let pci = FakePciConfigSpace::new();
        let mut regs = std::vec![0u64; 0x404];
        let mmio = unsafe { Mmio64::new(regs.as_mut_ptr()) };
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = dma_protection_setup(&pci, &mmio, &dt, &mut cmd, &evt, 0, || true);
        assert_eq!(result, Err(SklError::IommuCapabilityAbsent));
    }

    fn build_amd_info_table(info: SlrEntryAmdInfo, ivhds: &[SlrIommuIvhd]) -> std::vec::Vec<u8> {
        let hdr_size = core::mem::size_of::<SlrTableHeader>();
        let entry_hdr_size = core::mem::size_of::<SlrEntryHeader>();
        let fixed_size = core::mem::size_of::<SlrEntryAmdInfo>();
        let ivhd_size = core::mem::size_of::<SlrIommuIvhd>();
        let total = hdr_size + fixed_size + ivhds.len() * ivhd_size + entry_hdr_size;

        let mut out = std::vec![0u8; total];
        let header = SlrTableHeader {
            magic: 0,
            revision: 1,
            architecture: 0,
            size: total as u32,
            max_size: total as u32,
        };
        out[..hdr_size].copy_from_slice(header.as_bytes());

        let mut offset = hdr_size;
        out[offset..offset + fixed_size].copy_from_slice(info.as_bytes());
        offset += fixed_size;
        for ivhd in ivhds {
            out[offset..offset + ivhd_size].copy_from_slice(ivhd.as_bytes());
            offset += ivhd_size;
        }

        let end_hdr = SlrEntryHeader {
            tag: SLR_ENTRY_END,
            size: entry_hdr_size as u16,
        };
        out[offset..].copy_from_slice(end_hdr.as_bytes());
        out
    }

    fn amd_info_header(device_count: u32, dma_area_size: u64) -> SlrEntryAmdInfo {
        let fixed_size = core::mem::size_of::<SlrEntryAmdInfo>();
        let ivhd_size = core::mem::size_of::<SlrIommuIvhd>();
        SlrEntryAmdInfo {
            hdr: SlrEntryHeader {
                tag: SLR_ENTRY_AMD_INFO,
                size: (fixed_size + device_count as usize * ivhd_size) as u16,
            },
            device_count,
            dma_area_addr: 0,
            dma_area_size,
            completion_flag_addr: 0,
        }
    }

    #[test]
    fn iommu_server_setup_is_non_fatal_without_amd_info() {
        let table = build_dl_info_table(valid_dl_info());
        let slrt = Slrt::new(&table).unwrap();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = iommu_server_setup(&slrt, &dt, &mut cmd, &evt, || true);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn iommu_server_setup_is_non_fatal_with_zero_devices() {
        let info = amd_info_header(0, 0);
        let table = build_amd_info_table(info, &[]);
        let slrt = Slrt::new(&table).unwrap();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = iommu_server_setup(&slrt, &dt, &mut cmd, &evt, || true);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn iommu_server_setup_rejects_undersized_dma_area() {
        let ivhd = SlrIommuIvhd {
            device_id: 0,
            reserved: 0,
            base_address: IVHD_BASE_ADDR_ENABLE,
        };
        let info = amd_info_header(1, 16);
        let table = build_amd_info_table(info, &[ivhd]);
        let slrt = Slrt::new(&table).unwrap();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = iommu_server_setup(&slrt, &dt, &mut cmd, &evt, || true);
        assert_eq!(result, Err(SklError::IommuDmaAreaTooSmall));
    }

    #[test]
    fn iommu_server_setup_skips_firmware_disabled_device() {
        let ivhd = SlrIommuIvhd {
            device_id: 7,
            reserved: 0,
            base_address: 0,
        };
        let info = amd_info_header(1, REQUIRED_DMA_AREA as u64);
        let table = build_amd_info_table(info, &[ivhd]);
        let slrt = Slrt::new(&table).unwrap();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = iommu_server_setup(&slrt, &dt, &mut cmd, &evt, || {
            panic!("completion must not be polled for a disabled device")
        });
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn iommu_server_setup_one_detects_device_table_tamper() {
        let mut regs = std::vec![0u64; 0x404];
        let mmio = unsafe { Mmio64::new(regs.as_mut_ptr()) };
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();
        let dt_ptr = &dt as *const DeviceTable as *mut u8;

        let mut tampered = false;
        let result = iommu_server_setup_one(&mmio, &dt, &mut cmd, &evt, 0, || {
            if !tampered {
                tampered = true;
                // SAFETY: simulating a concurrent DMA write to the device
                // table between setup and completion, which is exactly what
                // this integrity check exists to catch.
                unsafe { dt_ptr.write(!dt_ptr.read()) };
            }
            true
        });
        assert_eq!(result, Err(SklError::IommuHashMismatch));
    }

    #[test]
    fn iommu_server_setup_one_passes_on_untampered_table() {
        let mut regs = std::vec![0u64; 0x404];
        let mmio = unsafe { Mmio64::new(regs.as_mut_ptr()) };
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();

        let result = iommu_server_setup_one(&mmio, &dt, &mut cmd, &evt, 0, || true);
        assert_eq!(result, Ok(()));
    }
}
