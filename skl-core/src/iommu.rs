// SPDX-License-Identifier: MIT OR Apache-2.0

//! AMD IOMMU driver (C4).
//!
//! Owns the three tables the IOMMU consumes (device table, command buffer,
//! its own hardware event log — distinct from the TCG measurement log in
//! `event_log.rs`) and the register-programming sequence in
//! [`iommu_setup`]. The two call-site policies (client retry-after-lift vs.
//! server two-hash verify) live in `orchestrator.rs`, which is the only
//! thing that knows whether these tables live in the SLB or in a relocated
//! DMA area.

use skl_arch::barrier::wmb;
use skl_arch::mmio::Mmio64;
use skl_defs::iommu::*;

use crate::pci::{pci_devfn, pci_locate_capability, PciConfigSpace, Width};

/// Locates the IOMMU's PCI capability, 0 if absent (no IOMMU on this
/// platform, or BIOS hid it).
pub fn iommu_locate_cap(pci: &dyn PciConfigSpace) -> u8 {
    let devfn = pci_devfn(IOMMU_PCI_DEVICE, IOMMU_PCI_FUNCTION);
    pci_locate_capability(pci, IOMMU_PCI_BUS, devfn, IOMMU_CAP_ID)
}

/// Reads the IOMMU's 64-bit MMIO base address out of its capability's
/// BA_LOW/BA_HIGH registers. Returns `None` if AGESA never enabled the
/// capability (`BA_LOW` bit 0 clear) — this is the "IOMMU disabled by
/// firmware" case callers report and proceed without DMA protection.
pub fn iommu_locate_bar(pci: &dyn PciConfigSpace, cap: u8) -> Option<u64> {
    let devfn = pci_devfn(IOMMU_PCI_DEVICE, IOMMU_PCI_FUNCTION);
    let low = pci.read(IOMMU_PCI_BUS, devfn, cap + IOMMU_CAP_BA_LOW_OFFSET, Width::Dword)?;
    if low & IOMMU_CAP_BA_LOW_ENABLE == 0 {
        return None;
    }
    let high = pci.read(IOMMU_PCI_BUS, devfn, cap + IOMMU_CAP_BA_HIGH_OFFSET, Width::Dword)?;
    Some(((high as u64) << 32) | (low & IOMMU_CAP_BA_LOW_ADDR_MASK) as u64)
}

/// The Device Table: fixed, page-aligned, every entry initialized to
/// `{V=1, TV=1}` (valid, no translation — blocks all device DMA until
/// explicitly translated).
#[derive(Debug)]
#[repr(C, align(4096))]
pub struct DeviceTable(pub [IommuDte; DEVICE_TABLE_ENTRIES]);

impl Default for DeviceTable {
    fn default() -> Self {
        Self([IommuDte::BLOCKED; DEVICE_TABLE_ENTRIES])
    }
}

impl DeviceTable {
    pub fn as_bytes(&self) -> &[u8] {
        zerocopy::IntoBytes::as_bytes(&self.0[..])
    }
}

/// Two 16-byte IOMMU commands, 16-byte aligned. The IOMMU requires a
/// minimum 4 KiB command buffer; rather than spend a page on two entries,
/// this is declared to the hardware as an 8 KiB buffer (tolerating a page
/// crossing) with Head/Tail pre-advanced past it.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct CommandBuf(pub [IommuCommand; 2]);

impl Default for CommandBuf {
    fn default() -> Self {
        Self([IommuCommand::default(); 2])
    }
}

impl CommandBuf {
    pub fn as_bytes(&self) -> &[u8] {
        zerocopy::IntoBytes::as_bytes(&self.0[..])
    }
}

/// The IOMMU's own hardware event log (errors, etc.), distinct from the TCG
/// measurement log this loader writes for the DLME.
#[repr(C, align(4096))]
pub struct IommuEventLog(pub [u8; EVENT_LOG_BYTES]);

impl Default for IommuEventLog {
    fn default() -> Self {
        Self([0u8; EVENT_LOG_BYTES])
    }
}

impl core::fmt::Debug for IommuEventLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IommuEventLog")
            .field("0", &format_args!("[u8; {}]", EVENT_LOG_BYTES))
            .finish()
    }
}

/// Appends one command to `buf` at the IOMMU's current Tail offset and
/// advances Tail. A store-store barrier separates the command write from
/// the Tail update, matching the ordering the hardware requires.
fn send_command(mmio: &Mmio64, cmd_phys: u64, buf: &mut CommandBuf, cmd: IommuCommand) {
    let tail = mmio.read(IOMMU_MMIO_COMMAND_BUF_TAIL);
    let slot = ((tail.wrapping_sub(cmd_phys & 0xff0)) / 16) as usize;
    buf.0[slot % buf.0.len()] = cmd;
    wmb();
    let next_tail = tail + core::mem::size_of::<IommuCommand>() as u64;
    mmio.write(IOMMU_MMIO_COMMAND_BUF_TAIL, next_tail);
}

/// Result of one `iommu_setup` call, observable for server-path hashing and
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IommuSetupOutcome {
    pub invalidate_all_sent: bool,
}

/// Programs the IOMMU's device table, command buffer, and (hardware) event
/// log base addresses and brings the feature set up, per the nine-step
/// sequence the hardware requires in order. `completion_flag_addr` is the
/// physical address of a caller-owned `u64` the final `COMPLETION_WAIT`
/// command stores a "done" marker into; the caller polls it.
///
/// This function cannot itself detect a master-abort or a cache-flush
/// failure — those surface as the completion flag never being set (client
/// path) or a post-hoc hash mismatch (server path); both are the caller's
/// responsibility.
pub fn iommu_setup(
    mmio: &Mmio64,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log: &IommuEventLog,
    completion_flag_addr: u64,
) -> IommuSetupOutcome {
    let dt_phys = device_table as *const _ as u64;
    let cmd_phys = command_buf as *const _ as u64;
    let evt_phys = event_log as *const _ as u64;

    mmio.update(IOMMU_MMIO_CONTROL_REGISTER, |cr| cr & !IOMMU_CR_ENABLE_ALL_MASK);
    wmb();

    mmio.write(IOMMU_MMIO_DEVICE_TABLE_BA, dt_phys | 1);

    mmio.write(
        IOMMU_MMIO_COMMAND_BUF_BA,
        (cmd_phys & !0xfff) | (0x9u64 << 56),
    );
    let cmd_head_tail = cmd_phys & 0xff0;
    mmio.write(IOMMU_MMIO_COMMAND_BUF_HEAD, cmd_head_tail);
    mmio.write(IOMMU_MMIO_COMMAND_BUF_TAIL, cmd_head_tail);

    mmio.write(IOMMU_MMIO_EVENT_LOG_BA, evt_phys | (0x8u64 << 56));
    mmio.write(IOMMU_MMIO_EVENT_LOG_HEAD, 0);
    mmio.write(IOMMU_MMIO_EVENT_LOG_TAIL, 0);

    mmio.update(IOMMU_MMIO_STATUS_REGISTER, |sr| sr & !IOMMU_SR_EVENT_LOG_INT);
    wmb();

    mmio.update(IOMMU_MMIO_CONTROL_REGISTER, |cr| {
        cr | IOMMU_CR_CMD_BUF_EN | IOMMU_CR_EVENT_LOG_EN
    });
    wmb();

    mmio.update(IOMMU_MMIO_CONTROL_REGISTER, |cr| cr | IOMMU_CR_IOMMU_EN);

    let mut invalidate_all_sent = false;
    if mmio.read(IOMMU_MMIO_EXTENDED_FEATURE) & IOMMU_EF_IA_SUP != 0 {
        send_command(
            mmio,
            cmd_phys,
            command_buf,
            IommuCommand {
                opcode: INVALIDATE_IOMMU_ALL,
                ..Default::default()
            },
        );
        invalidate_all_sent = true;
    }

    // Real address is below 4 GiB: the SLB (client path) and bootloader DMA
    // area (server path) both fit in 32 bits, so the high word is always 0.
    send_command(
        mmio,
        cmd_phys,
        command_buf,
        IommuCommand {
            u0: (completion_flag_addr as u32) | 1,
            u1: 0,
            opcode: COMPLETION_WAIT,
            u2: COMPLETION_WAIT_MARKER,
        },
    );

    IommuSetupOutcome { invalidate_all_sent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::tests::FakePciConfigSpace;

    #[test]
    fn locate_bar_is_none_when_firmware_disabled_it() {
        let pci = FakePciConfigSpace::new();
        let devfn = pci_devfn(IOMMU_PCI_DEVICE, IOMMU_PCI_FUNCTION);
        pci.set_dword(IOMMU_PCI_BUS, devfn, 0x40 + IOMMU_CAP_BA_LOW_OFFSET, 0);
        assert_eq!(iommu_locate_bar(&pci, 0x40), None);
    }

    #[test]
    fn locate_bar_combines_high_and_masked_low() {
        let pci = FakePciConfigSpace::new();
        let devfn = pci_devfn(IOMMU_PCI_DEVICE, IOMMU_PCI_FUNCTION);
        pci.set_dword(
            IOMMU_PCI_BUS,
            devfn,
            0x40 + IOMMU_CAP_BA_LOW_OFFSET,
            IOMMU_CAP_BA_LOW_ENABLE | 0xfeed_0000,
        );
        pci.set_dword(IOMMU_PCI_BUS, devfn, 0x40 + IOMMU_CAP_BA_HIGH_OFFSET, 0x1);
        let bar = iommu_locate_bar(&pci, 0x40).unwrap();
        assert_eq!(bar, (1u64 << 32) | 0xfeed_0000);
    }

    fn fake_mmio() -> (Vec<u64>, Mmio64) {
        let mut regs = std::vec![0u64; 0x404];
        let mmio = unsafe { Mmio64::new(regs.as_mut_ptr()) };
        (regs, mmio)
    }

    #[test]
    fn setup_programs_bases_and_enables_iommu() {
        let (regs, mmio) = fake_mmio();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();
        let mut flag: u64 = 0;

        let outcome = iommu_setup(&mmio, &dt, &mut cmd, &evt, &mut flag as *mut u64 as u64);

        assert!(!outcome.invalidate_all_sent, "IASup clear in the fake, no bit set");
        let cr = regs[IOMMU_MMIO_CONTROL_REGISTER];
        assert_eq!(cr & IOMMU_CR_IOMMU_EN, IOMMU_CR_IOMMU_EN);
        assert_eq!(cr & IOMMU_CR_CMD_BUF_EN, IOMMU_CR_CMD_BUF_EN);
        assert_eq!(cr & IOMMU_CR_EVENT_LOG_EN, IOMMU_CR_EVENT_LOG_EN);
        assert_eq!(regs[IOMMU_MMIO_DEVICE_TABLE_BA] & 1, 1);
    }

    #[test]
    fn invalidate_all_sent_when_ia_sup_advertised() {
        let (mut regs, _mmio) = fake_mmio();
        regs[IOMMU_MMIO_EXTENDED_FEATURE] = IOMMU_EF_IA_SUP;
        let mmio = unsafe { Mmio64::new(regs.as_mut_ptr()) };
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();
        let mut flag: u64 = 0;

        let outcome = iommu_setup(&mmio, &dt, &mut cmd, &evt, &mut flag as *mut u64 as u64);
        assert!(outcome.invalidate_all_sent);
        assert_eq!(cmd.0[0].opcode, INVALIDATE_IOMMU_ALL);
        assert_eq!(cmd.0[1].opcode, COMPLETION_WAIT);
        assert_eq!(cmd.0[1].u2, COMPLETION_WAIT_MARKER);
    }

    #[test]
    fn command_buf_tail_advances_by_16_per_command() {
        let (regs, mmio) = fake_mmio();
        let dt = DeviceTable::default();
        let mut cmd = CommandBuf::default();
        let evt = IommuEventLog::default();
        let mut flag: u64 = 0;
        let cmd_phys = &cmd as *const _ as u64;

        iommu_setup(&mmio, &dt, &mut cmd, &evt, &mut flag as *mut u64 as u64);

        let tail = regs[IOMMU_MMIO_COMMAND_BUF_TAIL];
        let head = cmd_phys & 0xff0;
        assert_eq!(tail - head, 16);
    }
}
