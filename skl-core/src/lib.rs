// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secure kernel loader core: C1–C7 of the measured-launch pipeline that
//! runs after AMD SKINIT has handed control to the Secure Loader Block.
//!
//! Every hardware-facing seam (PCI configuration space, MMIO, the TPM
//! command/response library) is a trait in this crate, so the orchestration
//! logic in [`orchestrator`] can be exercised with synthetic implementations
//! under `cargo test` on a normal host. The entry binary supplies the real
//! implementations and owns the only `unsafe` hardware access outside of
//! `skl-arch`.

#![no_std]

pub mod dev;
pub mod error;
pub mod event_log;
pub mod iommu;
pub mod memprotect;
pub mod orchestrator;
pub mod pci;
pub mod psp;
pub mod slrt;
pub mod tpm;

pub use error::SklError;
