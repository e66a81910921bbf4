// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level x86 primitives used by the secure kernel loader: I/O port
//! access, volatile MMIO register windows, and the memory barriers the
//! IOMMU programming sequence depends on.

#![no_std]

pub mod barrier;
pub mod mmio;
pub mod port;
