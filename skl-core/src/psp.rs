// SPDX-License-Identifier: MIT OR Apache-2.0

//! AMD PSP C2P mailbox client (C6) — the server/AMD Milan-Rome DRTM path.
//!
//! Discovery proceeds in two stages mirrored from the reference `psp.c`:
//! walk every PCI function looking for an allow-listed AMD `(vendor,
//! device)` pair tagged with a [`PspVersion`], then read the PSP's MMIO
//! base address through an SMN (System Management Network) back door
//! rather than a standard PCI BAR. [`PspMailbox`] owns the four discovered
//! C2P registers and the bounded-retry command protocol; `orchestrator.rs`
//! is the only caller outside of tests.

use skl_arch::mmio::Mmio32;
use skl_arch::port::io_delay;
use skl_defs::psp::{
    DrtmCommand, DrtmStatus, PciPspDevice, Psp72Register, PspVersion, C2PMSG_72_OFFSET,
    C2PMSG_93_OFFSET, C2PMSG_94_OFFSET, C2PMSG_95_OFFSET, DRTM_OSSL_RELOC_ADDR,
    PSP_BASE_ADDR_LO_SMN_ADDRESS, PSP_DEVICE_LIST, SMN_DATA_OFFSET, SMN_INDEX_OFFSET,
};

use crate::error::SklError;
use crate::pci::{pci_devfn, PciConfigSpace, Width, PCI_BUSMAX, PCI_FUNCMAX, PCI_SLOTMAX};

/// SMN index/data pair lives at `(bus=0, dev=0, func=0)`.
const SMN_BUS: u8 = 0;
const SMN_DEVFN: u8 = 0;

/// Looks up `(vendor_id, device_id)` in the static PSP allow-list,
/// regardless of whether the matched entry carries a PSP.
pub fn lookup_psp_device(vendor_id: u16, device_id: u16) -> Option<&'static PciPspDevice> {
    PSP_DEVICE_LIST
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.device_id == device_id)
}

/// A recognized allow-list match tagged `PspVersion::None` is an AMD SP
/// device that does not carry a PSP at all; treat it the same as "no
/// match", matching the reference `is_drtm_device`'s short-circuit.
fn is_drtm_device(vendor_id: u16, device_id: u16) -> Option<PspVersion> {
    match lookup_psp_device(vendor_id, device_id)?.version {
        PspVersion::None => None,
        version => Some(version),
    }
}

fn smn_register_read(pci: &dyn PciConfigSpace, address: u32) -> u32 {
    pci.write(SMN_BUS, SMN_DEVFN, SMN_INDEX_OFFSET, Width::Dword, address);
    pci.read(SMN_BUS, SMN_DEVFN, SMN_DATA_OFFSET, Width::Dword)
        .unwrap_or(0)
}

/// Walks every PCI function looking for a recognized PSP-capable device,
/// then reads its MMIO base address via the SMN back door. Only
/// `PspVersion::V2`/`V3` expose the mailbox layout [`PspMailbox`] speaks;
/// `V1` (and any allow-listed device carrying no PSP) is reported as
/// [`SklError::PspUnsupportedVersion`]/[`SklError::PspNotPresent`].
pub fn discover_psp(pci: &dyn PciConfigSpace) -> Result<(u64, PspVersion), SklError> {
    let mut found = None;
    'outer: for bus in 0..PCI_BUSMAX {
        let bus = bus as u8;
        for slot in 0..PCI_SLOTMAX {
            for func in 0..PCI_FUNCMAX {
                let devfn = pci_devfn(slot, func);
                let Some(vendor_id) = pci.read(bus, devfn, 0x00, Width::Word) else {
                    return Err(SklError::PspNotPresent);
                };
                let Some(device_id) = pci.read(bus, devfn, 0x02, Width::Word) else {
                    return Err(SklError::PspNotPresent);
                };
                if let Some(version) = is_drtm_device(vendor_id as u16, device_id as u16) {
                    found = Some(version);
                    break 'outer;
                }
            }
        }
    }

    let version = found.ok_or(SklError::PspNotPresent)?;
    if !matches!(version, PspVersion::V2 | PspVersion::V3) {
        return Err(SklError::PspUnsupportedVersion);
    }

    let base_lo = smn_register_read(pci, PSP_BASE_ADDR_LO_SMN_ADDRESS);
    let base = (base_lo & 0xfff0_0000) as u64;
    if base == 0 {
        return Err(SklError::PspNotPresent);
    }
    Ok((base, version))
}

/// The PSP C2P mailbox: four 32-bit MMIO registers at fixed offsets from
/// the discovered PSP base address.
#[derive(Clone, Copy, Debug)]
pub struct PspMailbox {
    mmio: Mmio32,
}

impl PspMailbox {
    /// # Safety
    /// `base` must be the PSP MMIO base address returned by
    /// [`discover_psp`], mapped as uncached device memory for at least
    /// `C2PMSG_95_OFFSET + 4` bytes.
    pub unsafe fn new(base: *mut u8) -> Self {
        // SAFETY: delegated to the caller.
        Self {
            mmio: unsafe { Mmio32::new(base) },
        }
    }

    fn reg(&self) -> Psp72Register {
        Psp72Register::from(self.mmio.read(C2PMSG_72_OFFSET))
    }

    fn is_ready(&self) -> bool {
        self.reg().ready()
    }

    /// Polls `c2pmsg_72` for `READY` across up to 50 retries with a busy-wait
    /// between each, returning the status code once the PSP reports ready.
    fn wait_for_ready(&self) -> Result<DrtmStatus, SklError> {
        const RETRIES: u32 = 50;
        const DELAY_ITERS: u32 = 100_000;
        for _ in 0..RETRIES {
            let reg = self.reg();
            if reg.ready() {
                return Ok(DrtmStatus::from_code(reg.status() as u32));
            }
            for _ in 0..DELAY_ITERS {
                io_delay();
            }
        }
        Err(SklError::PspTimeout)
    }

    fn submit(&self, command: DrtmCommand) -> Result<(), SklError> {
        if !self.is_ready() {
            return Err(SklError::PspTimeout);
        }
        let word = Psp72Register::new().with_command(command.code() as u8);
        self.mmio.write(C2PMSG_72_OFFSET, word.into());
        let status = self.wait_for_ready()?;
        if !status.is_success() {
            return Err(SklError::PspCommandFailed(status));
        }
        Ok(())
    }

    pub fn get_capability(&self) -> Result<(), SklError> {
        self.submit(DrtmCommand::GetCapability)
    }

    pub fn launch(&self) -> Result<(), SklError> {
        self.submit(DrtmCommand::Launch)
    }

    /// Relocates the DLME image to the fixed PSP staging address and issues
    /// `EXTEND_OSSL_DIGEST`. `relocate(dest, size)` performs the actual
    /// copy; this method only validates readiness, programs the mailbox
    /// parameters, and issues the command, matching the ready-check,
    /// memcpy, then-program-registers ordering of the reference
    /// `drtm_extend_ossl_digest`.
    pub fn extend_ossl_digest(
        &self,
        size: u64,
        relocate: impl FnOnce(u64, u64),
    ) -> Result<(), SklError> {
        if size > u32::MAX as u64 {
            return Err(SklError::DlmeImageTooLarge);
        }
        if !self.is_ready() {
            return Err(SklError::PspTimeout);
        }

        relocate(DRTM_OSSL_RELOC_ADDR, size);

        self.mmio.write(C2PMSG_93_OFFSET, size as u32);
        self.mmio
            .write(C2PMSG_94_OFFSET, (DRTM_OSSL_RELOC_ADDR & 0xffff_ffff) as u32);
        self.mmio
            .write(C2PMSG_95_OFFSET, (DRTM_OSSL_RELOC_ADDR >> 32) as u32);
        let word = Psp72Register::new().with_command(DrtmCommand::ExtendOsslDigest.code() as u8);
        self.mmio.write(C2PMSG_72_OFFSET, word.into());

        let status = self.wait_for_ready()?;
        if !status.is_success() {
            return Err(SklError::PspCommandFailed(status));
        }
        Ok(())
    }
}
