// SPDX-License-Identifier: MIT OR Apache-2.0

//! The TPM command/response library is an external collaborator (outside
//! this crate's scope): this module only defines the narrow interface the
//! orchestrator and event log writer consume from it.

/// Which event log format a concrete [`Tpm`] implementation speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TpmFamily {
    Tpm12,
    Tpm20,
}

/// Digest algorithm identifiers accepted by [`Tpm::extend_pcr`], matching
/// the `TPM_ALG_*` identifiers carried in the TCG event log.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TpmAlgo {
    Sha1,
    Sha256,
}

/// A TPM device handle. Concrete implementations own the actual command
/// transport (LPC, CRB, or whatever the platform exposes) and are supplied
/// by the entry binary, not by this crate.
pub trait Tpm {
    fn family(&self) -> TpmFamily;

    /// Requests exclusive access to `locality` (the orchestrator always
    /// asks for locality 2, the one DRTM establishes).
    fn request_locality(&mut self, locality: u8) -> bool;

    fn relinquish_locality(&mut self);

    /// Extends `pcr` with `digest`, whose length must match `algo`.
    fn extend_pcr(&mut self, pcr: u32, algo: TpmAlgo, digest: &[u8]);
}
