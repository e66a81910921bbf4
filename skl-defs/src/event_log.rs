// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCG-compliant event log record formats, bit-exact with the reference
//! secure-kernel-loader's `event_log.c`. Two TPM families are supported:
//! TPM 1.2 (`tpm12_*`) and TPM 2.0 (`tpm20_*`).
//!
//! The "Spec ID" header records are written once per log by
//! [`skl_core::event_log`](../../skl_core/event_log/index.html); the
//! constants here are the exact bytes that end up in bootloader-supplied
//! memory, so every layout detail (including the Intel-TXT compatibility
//! quirk on `pcr_events_offset`) must match what downstream consumers
//! (the DLME's own event log parser) expect.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const SHA1_DIGEST_SIZE: usize = 20;
pub const SHA256_DIGEST_SIZE: usize = 32;

pub const EV_NO_ACTION: u32 = 0x3;
pub const EV_TYPE_SLAUNCH: u32 = 0x502;

pub const TPM_ALG_SHA1: u16 = 0x04;
pub const TPM_ALG_SHA256: u16 = 0x0B;

const HASH_COUNT: u32 = 2;

/// For compatibility with Intel TXT log consumers.
pub const TPM12_EVTLOG_SIGNATURE: &[u8; 20] = b"TXT Event Container\0";

fn signature16(s: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..s.len()].copy_from_slice(s);
    out
}

/// Inner "TXT Event Container" header embedded as the TPM 1.2 Spec ID
/// record's vendor-info payload.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm12EventLogHeader {
    pub signature: [u8; 20],
    pub reserved: [u8; 12],
    pub container_ver_major: u8,
    pub container_ver_minor: u8,
    pub pcr_event_ver_major: u8,
    pub pcr_event_ver_minor: u8,
    pub container_size: u32,
    /// Deliberately measured from `signature` above, not from the event log
    /// buffer base, to match what Intel TXT produces; the DLME relocates
    /// its `evtlog_base` accordingly. Do not "fix" this.
    pub pcr_events_offset: u32,
    pub next_event_offset: u32,
}

/// "TXT event log pointer 2.1" element, the TPM 2.0 Spec ID record's
/// vendor-info payload.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct TxtEventLogPointer21 {
    pub phys_addr: u64,
    pub allocated_event_container_size: u32,
    pub first_record_offset: u32,
    pub next_record_offset: u32,
}

/// Fields common to both families' Spec ID event payloads.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct CommonSpecIdEvent {
    pub signature: [u8; 16],
    pub platform_class: u32,
    pub spec_ver_minor: u8,
    pub spec_ver_major: u8,
    pub errata: u8,
    /// Reserved (must be 0) for spec revision 1.21 / must be 2 for 2.0.
    pub uintn_size: u8,
}

#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm12SpecIdEvent {
    pub common: CommonSpecIdEvent,
    pub vendor_info_size: u8,
    pub hdr: Tpm12EventLogHeader,
}

#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm20DigestSize {
    pub id: u16,
    pub size: u16,
}

#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm20DigestSizes {
    pub number_of_algorithms: u32,
    pub digest_sizes: [Tpm20DigestSize; 2],
}

#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm20SpecIdEvent {
    pub common: CommonSpecIdEvent,
    pub sizes: Tpm20DigestSizes,
    pub vendor_info_size: u8,
    pub el: TxtEventLogPointer21,
}

/// TPM 1.2 measurement record header; also reused verbatim as the format of
/// the log's leading `EV_NO_ACTION` header record for *both* families.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm12Event {
    pub pcr: u32,
    pub event_type: u32,
    pub digest: [u8; SHA1_DIGEST_SIZE],
    pub event_size: u32,
}

/// Layout-equivalent to `TPML_DIGEST_VALUES`, but little-endian as the event
/// log expects.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct EvLogHash {
    pub count: u32,
    pub sha1_id: u16,
    pub sha1_hash: [u8; SHA1_DIGEST_SIZE],
    pub sha256_id: u16,
    pub sha256_hash: [u8; SHA256_DIGEST_SIZE],
}

#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C, packed)]
pub struct Tpm20Event {
    pub pcr: u32,
    pub event_type: u32,
    pub digests: EvLogHash,
    pub event_size: u32,
}

/// Builds the fixed TPM 1.2 Spec ID Event00 payload, with
/// `pcr_events_offset`/`next_event_offset` pre-set as in the reference
/// implementation (the "next" field is overwritten in place as events are
/// appended).
pub fn tpm12_id_struct() -> Tpm12SpecIdEvent {
    let hdr_size = core::mem::size_of::<Tpm12EventLogHeader>() as u32;
    Tpm12SpecIdEvent {
        common: CommonSpecIdEvent {
            signature: signature16(b"Spec ID Event00"),
            platform_class: 0,
            spec_ver_minor: 2,
            spec_ver_major: 1,
            errata: 1,
            uintn_size: 0,
        },
        vendor_info_size: core::mem::size_of::<Tpm12EventLogHeader>() as u8,
        hdr: Tpm12EventLogHeader {
            signature: *TPM12_EVTLOG_SIGNATURE,
            reserved: [0; 12],
            container_ver_major: 1,
            container_ver_minor: 0,
            pcr_event_ver_major: 1,
            pcr_event_ver_minor: 0,
            container_size: 0,
            pcr_events_offset: hdr_size,
            next_event_offset: hdr_size,
        },
    }
}

/// Builds the fixed TPM 2.0 Spec ID Event03 payload.
pub fn tpm20_id_struct() -> Tpm20SpecIdEvent {
    let initial_next_record_offset =
        (core::mem::size_of::<Tpm20SpecIdEvent>() + core::mem::size_of::<Tpm12Event>()) as u32;
    Tpm20SpecIdEvent {
        common: CommonSpecIdEvent {
            signature: signature16(b"Spec ID Event03"),
            platform_class: 0,
            spec_ver_minor: 0,
            spec_ver_major: 2,
            errata: 0,
            uintn_size: 2,
        },
        sizes: Tpm20DigestSizes {
            number_of_algorithms: HASH_COUNT,
            digest_sizes: [
                Tpm20DigestSize {
                    id: TPM_ALG_SHA1,
                    size: SHA1_DIGEST_SIZE as u16,
                },
                Tpm20DigestSize {
                    id: TPM_ALG_SHA256,
                    size: SHA256_DIGEST_SIZE as u16,
                },
            ],
        },
        vendor_info_size: core::mem::size_of::<TxtEventLogPointer21>() as u8,
        el: TxtEventLogPointer21 {
            phys_addr: 0,
            allocated_event_container_size: 0,
            first_record_offset: 0,
            next_record_offset: initial_next_record_offset,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn record_sizes_are_bit_exact() {
        assert_eq!(size_of::<Tpm12EventLogHeader>(), 48);
        assert_eq!(size_of::<TxtEventLogPointer21>(), 20);
        assert_eq!(size_of::<CommonSpecIdEvent>(), 24);
        assert_eq!(size_of::<Tpm12SpecIdEvent>(), 73);
        assert_eq!(size_of::<Tpm20DigestSizes>(), 12);
        assert_eq!(size_of::<Tpm20SpecIdEvent>(), 57);
        assert_eq!(size_of::<Tpm12Event>(), 32);
        assert_eq!(size_of::<EvLogHash>(), 60);
        assert_eq!(size_of::<Tpm20Event>(), 72);
    }

    #[test]
    fn tpm12_header_offsets_match_txt_quirk() {
        let id = tpm12_id_struct();
        let hdr_size = size_of::<Tpm12EventLogHeader>() as u32;
        assert_eq!({ id.hdr.pcr_events_offset }, hdr_size);
        assert_eq!({ id.hdr.next_event_offset }, hdr_size);
    }

    #[test]
    fn tpm20_digest_ids_fixed() {
        let id = tpm20_id_struct();
        assert_eq!({ id.sizes.number_of_algorithms }, 2);
        assert_eq!({ id.sizes.digest_sizes[0].id }, TPM_ALG_SHA1);
        assert_eq!({ id.sizes.digest_sizes[1].id }, TPM_ALG_SHA256);
    }
}
