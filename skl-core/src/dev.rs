// SPDX-License-Identifier: MIT OR Apache-2.0

//! Legacy AMD Device Exclusion Vector (DEV) controller.
//!
//! DEV predates the IOMMU and is only present on older CPU families; it is
//! reached through a PCI capability on each CPU node's northbridge function,
//! using an OP/DATA register pair indirection rather than a flat MMIO
//! window. [`disable_memory_protection`] in `memprotect.rs` is the only
//! caller outside of tests.

use crate::pci::{pci_devfn, pci_locate_capability, PciConfigSpace, Width};

/// PCI location of the per-node DEV capability: bus 0, device `0x18 +
/// cpu_node`, function 3 (the same northbridge function family/17h+ uses
/// for `MEMPROT_CR`, see `memprotect.rs`).
pub const DEV_PCI_BUS: u8 = 0;
pub const DEV_PCI_DEVICE: u8 = 0x18;
pub const DEV_PCI_FUNCTION: u8 = 3;

/// Hard limit on discoverable CPU nodes: slot numbers only have 5 bits and
/// node scanning starts at `DEV_PCI_DEVICE` (`0x18`).
pub const MAX_CPU_NODES: u8 = 8;

/// OP/DATA register pair offset from the DEV capability pointer.
const DEV_OP_OFFSET: u8 = 0x04;
const DEV_DATA_OFFSET: u8 = 0x08;

/// DEV control register function index (selects the control register
/// through the OP/DATA indirection, vs. base address or capability
/// registers at other function indices).
const DEV_CR: u32 = 0x02;
const DEV_CR_SL_DEV_EN_MASK: u32 = 1 << 0;

/// Capability ID the DEV PCI capability list entry is tagged with.
const DEV_CAP_ID: u8 = 0x0f;

/// Locates the DEV capability for a CPU node, 0 if absent.
pub fn dev_locate(pci: &dyn PciConfigSpace, cpu_node: u8) -> u8 {
    let devfn = pci_devfn(DEV_PCI_DEVICE + cpu_node, DEV_PCI_FUNCTION);
    pci_locate_capability(pci, DEV_PCI_BUS, devfn, DEV_CAP_ID)
}

fn dev_select(pci: &dyn PciConfigSpace, cpu_node: u8, dev_cap: u8, function: u32, index: u32) {
    let devfn = pci_devfn(DEV_PCI_DEVICE + cpu_node, DEV_PCI_FUNCTION);
    let selector = ((function & 0xff) << 8) | (index & 0xff);
    pci.write(
        DEV_PCI_BUS,
        devfn,
        dev_cap + DEV_OP_OFFSET,
        Width::Dword,
        selector,
    );
}

pub fn dev_read(pci: &dyn PciConfigSpace, cpu_node: u8, dev_cap: u8, function: u32, index: u32) -> u32 {
    dev_select(pci, cpu_node, dev_cap, function, index);
    let devfn = pci_devfn(DEV_PCI_DEVICE + cpu_node, DEV_PCI_FUNCTION);
    pci.read(DEV_PCI_BUS, devfn, dev_cap + DEV_DATA_OFFSET, Width::Dword)
        .unwrap_or(0)
}

pub fn dev_write(pci: &dyn PciConfigSpace, cpu_node: u8, dev_cap: u8, function: u32, index: u32, value: u32) {
    dev_select(pci, cpu_node, dev_cap, function, index);
    let devfn = pci_devfn(DEV_PCI_DEVICE + cpu_node, DEV_PCI_FUNCTION);
    pci.write(DEV_PCI_BUS, devfn, dev_cap + DEV_DATA_OFFSET, Width::Dword, value);
}

/// Clears `SL_DEV_EN` in the DEV control register for one CPU node.
pub fn dev_disable_sl(pci: &dyn PciConfigSpace, cpu_node: u8, dev_cap: u8) {
    let cr = dev_read(pci, cpu_node, dev_cap, DEV_CR, 0);
    dev_write(pci, cpu_node, dev_cap, DEV_CR, 0, cr & !DEV_CR_SL_DEV_EN_MASK);
}
