// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCG event log writer (C5).
//!
//! Populates the bootloader-allocated buffer described by the SLRT
//! `LOG_INFO` entry with a TCG-compliant measurement log: one `EV_NO_ACTION`
//! header record carrying the family's "Spec ID" structure, followed by the
//! `SKINIT` measurement record produced by `event_log_init`, followed by
//! whatever the orchestrator appends afterwards (DLME entry offset, DLME
//! image).

use skl_defs::event_log::*;
use skl_defs::slrt::{SlrEntryLogInfo, SLR_DRTM_TPM12_LOG, SLR_DRTM_TPM20_LOG, SLR_ENTRY_LOG_INFO};
use zerocopy::{FromBytes, IntoBytes};

use crate::error::SklError;
use crate::slrt::Slrt;
use crate::tpm::TpmFamily;

/// Owns the cursor into a bootloader-provided buffer and permanently
/// disables itself (by collapsing the limit to the cursor) on the first
/// failure: a broken event log degrades the launch, it never aborts it.
#[derive(Debug)]
pub struct EventLogWriter<'a> {
    buf: &'a mut [u8],
    cursor: usize,
    limit: usize,
    family: TpmFamily,
}

fn has_enough_space(cursor: usize, limit: usize, n: usize) -> bool {
    limit.saturating_sub(cursor) > n
}

impl<'a> EventLogWriter<'a> {
    /// Validates the SLRT `LOG_INFO` entry against `buf` (the same region
    /// it describes, already sliced out by the caller) and the measured
    /// range `[slb_start, slb_start + slb_size)`, then writes the header
    /// record and the `SKINIT` measurement. On any validation failure the
    /// writer is returned already self-disabled (`limit == cursor == 0`);
    /// callers still get a writer back, but every subsequent append fails.
    pub fn init(
        slrt: &Slrt<'_>,
        buf: &'a mut [u8],
        family: TpmFamily,
        slb_start: u64,
        slb_size: u64,
        sha1_of_slb: [u8; SHA1_DIGEST_SIZE],
        sha256_of_slb: Option<[u8; SHA256_DIGEST_SIZE]>,
    ) -> Result<Self, (Self, SklError)> {
        let disabled = |buf: &'a mut [u8]| EventLogWriter {
            buf,
            cursor: 0,
            limit: 0,
            family,
        };

        let info_bytes = match slrt.first_entry_with_tag(SLR_ENTRY_LOG_INFO) {
            Some(b) => b,
            None => return Err((disabled(buf), SklError::BadBootloaderData)),
        };
        if slrt
            .next_entry_with_tag(info_bytes, SLR_ENTRY_LOG_INFO)
            .is_some()
        {
            return Err((disabled(buf), SklError::DuplicateSingletonEntry));
        }
        let Ok(info) = SlrEntryLogInfo::ref_from_bytes(info_bytes) else {
            return Err((disabled(buf), SklError::BadBootloaderData));
        };

        let expected_format = match family {
            TpmFamily::Tpm12 => SLR_DRTM_TPM12_LOG,
            TpmFamily::Tpm20 => SLR_DRTM_TPM20_LOG,
        };
        if info.format != expected_format {
            return Err((disabled(buf), SklError::LogFormatMismatch));
        }

        let min_size = core::mem::size_of::<Tpm12Event>()
            + match family {
                TpmFamily::Tpm12 => {
                    core::mem::size_of::<Tpm12SpecIdEvent>() + 2 * core::mem::size_of::<Tpm12Event>()
                }
                TpmFamily::Tpm20 => {
                    core::mem::size_of::<Tpm20SpecIdEvent>() + 2 * core::mem::size_of::<Tpm20Event>()
                }
            };
        if (info.size as usize) < min_size {
            return Err((disabled(buf), SklError::LogBufferTooSmall));
        }
        if buf.len() < info.size as usize {
            return Err((disabled(buf), SklError::LogBufferTooSmall));
        }

        let buf_start = info.addr;
        let buf_end = info.addr + info.size as u64;
        let overlaps_slb = !(buf_end <= slb_start || slb_start + slb_size <= buf_start);
        if overlaps_slb {
            return Err((disabled(buf), SklError::LogBufferOverlapsSlb));
        }

        let size = info.size as usize;
        let buf = &mut buf[..size];
        buf.fill(0);

        let mut writer = EventLogWriter {
            buf,
            cursor: 0,
            limit: size,
            family,
        };

        let id_struct_size = match family {
            TpmFamily::Tpm12 => core::mem::size_of::<Tpm12SpecIdEvent>(),
            TpmFamily::Tpm20 => core::mem::size_of::<Tpm20SpecIdEvent>(),
        };
        let header = Tpm12Event {
            pcr: 0,
            event_type: EV_NO_ACTION,
            digest: [0; SHA1_DIGEST_SIZE],
            event_size: id_struct_size as u32,
        };
        writer.raw_write(header.as_bytes());

        match family {
            TpmFamily::Tpm12 => {
                let mut id = tpm12_id_struct();
                id.hdr.container_size = size as u32;
                writer.raw_write(id.as_bytes());
            }
            TpmFamily::Tpm20 => {
                let mut id = tpm20_id_struct();
                id.el.allocated_event_container_size = size as u32;
                id.el.phys_addr = buf_start;
                writer.raw_write(id.as_bytes());
            }
        }

        match (family, sha256_of_slb) {
            (TpmFamily::Tpm12, _) => {
                if let Err(e) = writer.log_event_tpm12(17, &sha1_of_slb, b"SKINIT") {
                    return Err((writer, e));
                }
            }
            (TpmFamily::Tpm20, Some(sha256)) => {
                if let Err(e) = writer.log_event_tpm20(17, &sha1_of_slb, &sha256, b"SKINIT") {
                    return Err((writer, e));
                }
            }
            (TpmFamily::Tpm20, None) => {
                return Err((writer, SklError::BadBootloaderData));
            }
        }

        Ok(writer)
    }

    /// Permanently-disabled writer usable as a no-op sink (used when init
    /// fails before a real buffer can be validated).
    pub fn disabled(buf: &'a mut [u8], family: TpmFamily) -> Self {
        EventLogWriter {
            buf,
            cursor: 0,
            limit: 0,
            family,
        }
    }

    fn raw_write(&mut self, data: &[u8]) {
        self.buf[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
    }

    pub fn log_event_tpm12(
        &mut self,
        pcr: u32,
        sha1: &[u8; SHA1_DIGEST_SIZE],
        event: &[u8],
    ) -> Result<(), SklError> {
        if self.family != TpmFamily::Tpm12 {
            return Err(SklError::LogFormatMismatch);
        }
        let record_size = core::mem::size_of::<Tpm12Event>() + event.len();
        if !has_enough_space(self.cursor, self.limit, record_size) {
            self.limit = self.cursor;
            return Err(SklError::LogBufferFull);
        }

        self.bump_next_event_offset_tpm12(record_size as u32);

        let ev = Tpm12Event {
            pcr,
            event_type: EV_TYPE_SLAUNCH,
            digest: *sha1,
            event_size: event.len() as u32,
        };
        self.raw_write(ev.as_bytes());
        self.raw_write(event);
        Ok(())
    }

    pub fn log_event_tpm20(
        &mut self,
        pcr: u32,
        sha1: &[u8; SHA1_DIGEST_SIZE],
        sha256: &[u8; SHA256_DIGEST_SIZE],
        event: &[u8],
    ) -> Result<(), SklError> {
        if self.family != TpmFamily::Tpm20 {
            return Err(SklError::LogFormatMismatch);
        }
        let record_size = core::mem::size_of::<Tpm20Event>() + event.len();
        if !has_enough_space(self.cursor, self.limit, record_size) {
            self.limit = self.cursor;
            return Err(SklError::LogBufferFull);
        }

        self.bump_next_record_offset_tpm20(record_size as u32);

        let ev = Tpm20Event {
            pcr,
            event_type: EV_TYPE_SLAUNCH,
            digests: EvLogHash {
                count: 2,
                sha1_id: TPM_ALG_SHA1,
                sha1_hash: *sha1,
                sha256_id: TPM_ALG_SHA256,
                sha256_hash: *sha256,
            },
            event_size: event.len() as u32,
        };
        self.raw_write(ev.as_bytes());
        self.raw_write(event);
        Ok(())
    }

    /// The TPM 1.2 container header's `next_event_offset` lives right after
    /// the leading `EV_NO_ACTION` record, at a fixed offset from the buffer
    /// base. Updated before the bytes are copied, matching the reference
    /// implementation's (safe, because writes never cross `limit`)
    /// optimization of not re-reading the field back out.
    fn bump_next_event_offset_tpm12(&mut self, added: u32) {
        let header_record_size = core::mem::size_of::<Tpm12Event>();
        let Ok(id) = Tpm12SpecIdEvent::mut_from_bytes(
            &mut self.buf[header_record_size..header_record_size + core::mem::size_of::<Tpm12SpecIdEvent>()],
        ) else {
            return;
        };
        id.hdr.next_event_offset += added;
    }

    fn bump_next_record_offset_tpm20(&mut self, added: u32) {
        let header_record_size = core::mem::size_of::<Tpm12Event>();
        let Ok(id) = Tpm20SpecIdEvent::mut_from_bytes(
            &mut self.buf[header_record_size..header_record_size + core::mem::size_of::<Tpm20SpecIdEvent>()],
        ) else {
            return;
        };
        id.el.next_record_offset += added;
    }
}
