// SPDX-License-Identifier: MIT OR Apache-2.0

//! TIS-style TPM locality interface.
//!
//! The wire protocol for actually sending a TPM command and parsing its
//! response is an external collaborator (out of scope here, same as PCI
//! config space I/O is for `skl-core`): [`TpmCommand`] is the narrow seam a
//! real command library plugs into. This module only drives the locality
//! register window every TIS-compliant TPM exposes at a fixed MMIO address,
//! which is the minimum real work needed to claim locality 2 before handing
//! off to that collaborator.

use skl_core::tpm::{Tpm, TpmAlgo, TpmFamily};

use skl_arch::mmio::Mmio32;
use skl_arch::port::io_delay;

/// Standard LPC/MMIO TIS base address for locality 0; each locality gets
/// its own 4 KiB window at `TIS_BASE + locality * 0x1000`.
const TIS_BASE: u64 = 0xfed4_0000;
const LOCALITY_STRIDE: u64 = 0x1000;

const ACCESS: u32 = 0x00;
const STS: u32 = 0x18;

const ACCESS_REQUEST_USE: u32 = 1 << 1;
const ACCESS_ACTIVE_LOCALITY: u32 = 1 << 5;

/// Sends an encoded TPM command and returns the response bytes. A
/// production binary supplies the real command/response transport; tests
/// supply a fake that records what was sent.
pub trait TpmCommand {
    fn extend_pcr(&mut self, pcr: u32, algo: TpmAlgo, digest: &[u8]);
}

/// Placeholder transport: no TPM command/response library is wired into
/// this image, so every extend is logged and dropped rather than sent.
/// Replace with a real `TpmCommand` once one is linked in.
#[derive(Debug)]
pub struct UnimplementedCommands;

impl TpmCommand for UnimplementedCommands {
    fn extend_pcr(&mut self, pcr: u32, _algo: TpmAlgo, _digest: &[u8]) {
        log::warn!("no TPM command transport linked in, PCR {pcr} extend dropped");
    }
}

pub struct TisTpm<'a> {
    mmio: Mmio32,
    family: TpmFamily,
    commands: &'a mut dyn TpmCommand,
}

impl core::fmt::Debug for TisTpm<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TisTpm")
            .field("mmio", &self.mmio)
            .field("family", &self.family)
            .field(
                "commands",
                &format_args!("{:?}", &*self.commands as *const dyn TpmCommand),
            )
            .finish()
    }
}

impl<'a> TisTpm<'a> {
    /// # Safety
    /// The standard TIS MMIO window at `TIS_BASE` must be mapped and owned
    /// exclusively by this loader for the duration of the launch.
    pub unsafe fn new(family: TpmFamily, commands: &'a mut dyn TpmCommand) -> Self {
        Self {
            // SAFETY: delegated to the caller.
            mmio: unsafe { Mmio32::new(TIS_BASE as *mut u8) },
            family,
            commands,
        }
    }

    fn locality_window(&self, locality: u8) -> Mmio32 {
        let addr = TIS_BASE + locality as u64 * LOCALITY_STRIDE;
        // SAFETY: every locality window lives within the TIS MMIO region
        // established valid at construction.
        unsafe { Mmio32::new(addr as *mut u8) }
    }
}

impl Tpm for TisTpm<'_> {
    fn family(&self) -> TpmFamily {
        self.family
    }

    fn request_locality(&mut self, locality: u8) -> bool {
        let window = self.locality_window(locality);
        window.write(ACCESS, ACCESS_REQUEST_USE);

        const RETRIES: u32 = 1000;
        for _ in 0..RETRIES {
            if window.read(ACCESS) & ACCESS_ACTIVE_LOCALITY != 0 {
                return true;
            }
            io_delay();
        }
        false
    }

    fn relinquish_locality(&mut self) {
        // Writing 1 to activeLocality relinquishes it per the TIS locality
        // protocol; there is no locality index stored here to relinquish
        // against other than the one the orchestrator always requests.
        let window = self.locality_window(2);
        window.write(ACCESS, ACCESS_ACTIVE_LOCALITY);
        let _ = self.mmio.read(STS);
    }

    fn extend_pcr(&mut self, pcr: u32, algo: TpmAlgo, digest: &[u8]) {
        self.commands.extend_pcr(pcr, algo, digest);
    }
}
