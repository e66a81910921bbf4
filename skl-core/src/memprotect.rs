// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-SKINIT memory-protection controller (C3).
//!
//! SKINIT's device-exclusion zone keeps every device from touching the SLB
//! until this is called. Two independent strategies disable it depending on
//! CPU family; both are tried in order and both are idempotent, since
//! calling either one again once the enable bit is already clear is a no-op.

use crate::dev;
use crate::pci::{pci_devfn, PciConfigSpace, Width};

/// Family 17h+ Data Fabric memory-controller function carrying
/// `MEMPROT_CR`, at bus 0, device `0x18 + cpu_node`, function 0.
pub const MCH_PCI_BUS: u8 = 0;
pub const MCH_PCI_DEVICE: u8 = 0x18;
pub const MCH_PCI_FUNCTION: u8 = 0;

const VIDDID_OFFSET: u8 = 0x00;
const MEMPROT_CR_OFFSET: u8 = 0x118;
const MEMPROT_EN: u32 = 1 << 0;

/// Clears the post-SKINIT DMA exclusion zone. Tries the legacy DEV path
/// first (present on older families); falls back to the Family 17h+
/// `MEMPROT_CR` register when no DEV capability is found on node 0. Neither
/// branch reports failure: absence of the register just means there was
/// nothing to undo.
pub fn disable_memory_protection(pci: &dyn PciConfigSpace) {
    let mut cpu_node: u8 = 0;
    let mut dev_cap = dev::dev_locate(pci, cpu_node);

    if dev_cap != 0 {
        loop {
            dev::dev_disable_sl(pci, cpu_node, dev_cap);

            cpu_node += 1;
            if cpu_node == dev::MAX_CPU_NODES {
                break;
            }
            dev_cap = dev::dev_locate(pci, cpu_node);
            if dev_cap == 0 {
                break;
            }
        }
        return;
    }

    while cpu_node < dev::MAX_CPU_NODES {
        let devfn = pci_devfn(MCH_PCI_DEVICE + cpu_node, MCH_PCI_FUNCTION);
        let Some(vid_did) = pci.read(MCH_PCI_BUS, devfn, VIDDID_OFFSET, Width::Dword) else {
            break;
        };
        if vid_did == 0xffff_ffff {
            break;
        }

        let cr = pci
            .read(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, Width::Dword)
            .unwrap_or(0);
        pci.write(
            MCH_PCI_BUS,
            devfn,
            MEMPROT_CR_OFFSET,
            Width::Dword,
            cr & !MEMPROT_EN,
        );

        cpu_node += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pci::tests::FakePciConfigSpace;

    #[test]
    fn absent_hardware_is_a_no_op() {
        let pci = FakePciConfigSpace::new();
        disable_memory_protection(&pci);
    }

    #[test]
    fn falls_back_to_mempprot_cr_when_no_dev_capability() {
        let pci = FakePciConfigSpace::new();
        let devfn = pci_devfn(MCH_PCI_DEVICE, MCH_PCI_FUNCTION);
        pci.set_dword(MCH_PCI_BUS, devfn, VIDDID_OFFSET, 0x1022_1450);
        pci.set_dword(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, 0xffff_ffff);

        disable_memory_protection(&pci);

        let cr = pci
            .read(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, Width::Dword)
            .unwrap();
        assert_eq!(cr & MEMPROT_EN, 0);
    }

    #[test]
    fn is_idempotent() {
        let pci = FakePciConfigSpace::new();
        let devfn = pci_devfn(MCH_PCI_DEVICE, MCH_PCI_FUNCTION);
        pci.set_dword(MCH_PCI_BUS, devfn, VIDDID_OFFSET, 0x1022_1450);
        pci.set_dword(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, 0xffff_ffff);

        disable_memory_protection(&pci);
        let after_first = pci
            .read(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, Width::Dword)
            .unwrap();
        disable_memory_protection(&pci);
        let after_second = pci
            .read(MCH_PCI_BUS, devfn, MEMPROT_CR_OFFSET, Width::Dword)
            .unwrap();
        assert_eq!(after_first, after_second);
    }
}
