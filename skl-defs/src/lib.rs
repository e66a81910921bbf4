// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-format and ABI definitions shared between the secure kernel loader
//! core and the bootloader / firmware that launches it: the Secure Launch
//! Resource Table, TCG event log record formats, and the AMD PSP mailbox
//! layout. No logic lives here, only bit-exact struct layouts and the
//! constants needed to interpret them.

#![no_std]

pub mod event_log;
pub mod iommu;
pub mod psp;
pub mod slrt;
