// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_std]
#![no_main]

mod reboot;
mod serial;
mod tpm;

use core::alloc::{GlobalAlloc, Layout};
use core::arch::global_asm;

use sha1::{Digest, Sha1};
use sha2::Sha256;
use zerocopy::FromBytes;

use skl_core::error::SklError;
use skl_core::event_log::EventLogWriter;
use skl_core::iommu::{self, CommandBuf, DeviceTable, IommuEventLog};
use skl_core::orchestrator::{self, client_launch, server_launch, LaunchResult};
use skl_core::pci::Cf8ConfigSpace;
use skl_core::slrt::Slrt;
use skl_core::tpm::TpmFamily;
use skl_arch::mmio::Mmio64;
use skl_defs::event_log::{SHA1_DIGEST_SIZE, SHA256_DIGEST_SIZE};
use skl_defs::iommu::{IommuCommand, IommuDte, DEVICE_TABLE_ENTRIES, EVENT_LOG_BYTES};
use skl_defs::slrt::{SlrEntryLogInfo, SLR_DRTM_TPM20_LOG, SLR_ENTRY_LOG_INFO};

use tpm::TisTpm;

// Linker-script-placed entry: lands on a single logical processor already in
// 64-bit protected mode with paging off, per the SKINIT handoff this image's
// layout (`skl.lds`) is built for. No real-mode/long-mode transition is
// needed here, unlike a bootloader that starts at reset vector.
global_asm!(
    r#"
    .section .startup.text,"ax"
    .globl base_entry
base_entry:
    movabs $_stack_top, %rsp
    xor %rbp, %rbp
    movabs $bootloader_data, %rdi
    call skl_entry
    jmp *%rax
    "#,
    options(att_syntax)
);

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo<'_>) -> ! {
    // SAFETY: raising an undefined instruction exception is always safe.
    unsafe { core::arch::asm!("ud2") }
    unreachable!("");
}

struct Alloc;

// SAFETY: required to satisfy the linkage requirements of dependencies that
// reference a global allocator symbol. This loader never allocates, so
// every method panics; that is sound because it is never called.
unsafe impl GlobalAlloc for Alloc {
    unsafe fn alloc(&self, _: Layout) -> *mut u8 {
        panic!("no allocator")
    }
    unsafe fn dealloc(&self, _: *mut u8, _: Layout) {
        panic!("no allocator")
    }
    unsafe fn alloc_zeroed(&self, _: Layout) -> *mut u8 {
        panic!("no allocator")
    }
    unsafe fn realloc(&self, _: *mut u8, _: Layout, _: usize) -> *mut u8 {
        panic!("no allocator")
    }
}

#[global_allocator]
static ALLOC: Alloc = Alloc;

/// What the asm trampoline expects back in rax:rdx. A named `#[repr(C)]`
/// struct rather than a bare tuple so the two-eightbyte INTEGER-class
/// System V return convention is guaranteed, not merely likely.
#[derive(Debug)]
#[repr(C)]
pub struct LaunchAbi {
    pub dlme_entry: u64,
    pub dlme_arg: u64,
}

impl From<LaunchResult> for LaunchAbi {
    fn from(r: LaunchResult) -> Self {
        Self {
            dlme_entry: r.dlme_entry,
            dlme_arg: r.dlme_arg,
        }
    }
}

unsafe extern "C" {
    static _start: u8;
    static _end_of_measured: u8;
}

static mut DEVICE_TABLE: DeviceTable = DeviceTable([IommuDte::BLOCKED; DEVICE_TABLE_ENTRIES]);
static mut COMMAND_BUF: CommandBuf = CommandBuf([
    IommuCommand { u0: 0, u1: 0, opcode: 0, u2: 0 },
    IommuCommand { u0: 0, u1: 0, opcode: 0, u2: 0 },
]);
static mut EVENT_LOG: IommuEventLog = IommuEventLog([0u8; EVENT_LOG_BYTES]);
static mut COMPLETION_FLAG: u64 = 0;
static mut EMPTY_LOG_BUF: [u8; 0] = [];

fn completion_flag_addr() -> u64 {
    &raw const COMPLETION_FLAG as u64
}

fn wait_for_iommu_completion() -> bool {
    // SAFETY: COMPLETION_FLAG is written only by the IOMMU's
    // `COMPLETION_WAIT` DMA and read only here, on the single logical
    // processor this loader ever runs on.
    unsafe { core::ptr::read_volatile(&raw const COMPLETION_FLAG) != 0 }
}

fn slrt_log_info(slrt: &Slrt<'_>) -> Option<SlrEntryLogInfo> {
    let bytes = slrt.first_entry_with_tag(SLR_ENTRY_LOG_INFO)?;
    SlrEntryLogInfo::ref_from_bytes(bytes).ok().copied()
}

/// Determines which TPM family's event log format to write before
/// `EventLogWriter::init` can run its own format-tag validation; defaults
/// to TPM 1.2 when `LOG_INFO` is missing or malformed; `init` will then
/// disable the writer on the resulting format mismatch rather than this
/// function guessing wrong and silently succeeding.
fn tpm_family_from_slrt(slrt: &Slrt<'_>) -> TpmFamily {
    match slrt_log_info(slrt) {
        Some(info) if info.format == SLR_DRTM_TPM20_LOG => TpmFamily::Tpm20,
        _ => TpmFamily::Tpm12,
    }
}

/// Slices out the bootloader-reserved event log buffer the `LOG_INFO` entry
/// describes. A missing or malformed entry degrades to an empty buffer;
/// `EventLogWriter::init` reports that as `LogBufferTooSmall` and returns a
/// self-disabled writer, the same degrade-don't-abort outcome as any other
/// event log failure.
fn log_buffer(slrt: &Slrt<'_>) -> &'static mut [u8] {
    match slrt_log_info(slrt) {
        // SAFETY: `addr`/`size` name a bootloader-reserved region disjoint
        // from everything else this loader touches.
        Some(info) => unsafe { core::slice::from_raw_parts_mut(info.addr as *mut u8, info.size as usize) },
        // SAFETY: a 0-length slice never gets dereferenced.
        None => unsafe { &mut *&raw mut EMPTY_LOG_BUF },
    }
}

fn slb_bounds() -> (u64, u64) {
    // SAFETY: `_start`/`_end_of_measured` are address-only linker symbols
    // placed by `skl.lds`; their value, not their pointee, is what matters.
    let start = &raw const _start as u64;
    let end = &raw const _end_of_measured as u64;
    (start, end)
}

#[cfg(feature = "amdsl")]
fn run_launch(
    slrt: &Slrt<'_>,
    pci: &Cf8ConfigSpace,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log_region: &IommuEventLog,
    _tpm: &mut TisTpm<'_>,
    _log: &mut EventLogWriter<'_>,
) -> Result<LaunchResult, SklError> {
    // Re-peeked here (in addition to the validation `server_launch` repeats
    // internally) only to recover `dlme_base` for the relocation copy the
    // PSP's `extend_ossl_digest` command requires before it can hash the
    // image; `validate_dl_info` is pure and side-effect-free, so calling it
    // twice costs nothing but a second bounds check.
    let dl_info_hint = orchestrator::validate_dl_info(slrt).ok();

    server_launch(
        slrt,
        pci,
        device_table,
        command_buf,
        event_log_region,
        move |dest, size| {
            if let Some(dl_info) = dl_info_hint {
                // SAFETY: dlme_base/size were bounds-checked by
                // validate_dl_info; dest is the PSP's fixed staging
                // address, reserved for exactly this copy.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        dl_info.dlme_base as *const u8,
                        dest as *mut u8,
                        size as usize,
                    );
                }
            }
        },
        wait_for_iommu_completion,
    )
}

#[cfg(not(feature = "amdsl"))]
fn run_launch(
    slrt: &Slrt<'_>,
    pci: &Cf8ConfigSpace,
    device_table: &DeviceTable,
    command_buf: &mut CommandBuf,
    event_log_region: &IommuEventLog,
    tpm: &mut TisTpm<'_>,
    log: &mut EventLogWriter<'_>,
) -> Result<LaunchResult, SklError> {
    let cap = iommu::iommu_locate_cap(pci);
    let bar = if cap != 0 { iommu::iommu_locate_bar(pci, cap) } else { None };
    let mmio_base = bar.unwrap_or(0) as *mut u64;
    // SAFETY: a `None` bar leaves `mmio_base` at 0, and `client_launch`'s
    // `dma_protection_setup` re-checks capability/BAR presence through
    // `pci` before this window is ever dereferenced.
    let mmio = unsafe { Mmio64::new(mmio_base) };

    client_launch(
        slrt,
        pci,
        &mmio,
        device_table,
        command_buf,
        event_log_region,
        completion_flag_addr(),
        wait_for_iommu_completion,
        tpm,
        log,
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn skl_entry(bootloader_data: *const u8) -> LaunchAbi {
    serial::init();
    log::info!("secure kernel loader starting");

    // The SLRT header's `size` field (offset 8) must be read before the
    // full table can be sliced out; `bootloader_data` only promises a valid
    // header at this point, not `header.size` bytes yet.
    // SAFETY: bootloader_data points at a live SlrTableHeader placed by the
    // bootloader before control reached this image.
    let declared_size = unsafe { u32::from_ne_bytes(*(bootloader_data.add(8) as *const [u8; 4])) };
    // SAFETY: delegated to the bootloader handoff contract; Slrt::new
    // re-validates `declared_size` against the header it finds in bounds.
    let slrt_bytes = unsafe { core::slice::from_raw_parts(bootloader_data, declared_size as usize) };
    let Some(slrt) = Slrt::new(slrt_bytes) else {
        log::error!("bootloader SLRT failed validation");
        reboot::reboot();
    };

    let pci = Cf8ConfigSpace::new();
    let family = tpm_family_from_slrt(&slrt);

    let (slb_start, slb_end) = slb_bounds();
    let slb_size = slb_end - slb_start;
    // SAFETY: [slb_start, slb_end) is this image's own measured range, as
    // placed and sized by skl.lds.
    let measured = unsafe { core::slice::from_raw_parts(slb_start as *const u8, slb_size as usize) };
    let sha1_of_slb: [u8; 20] = Sha1::digest(measured).into();
    let sha256_of_slb = matches!(family, TpmFamily::Tpm20).then(|| Sha256::digest(measured).into());

    let mut event_log = match EventLogWriter::init(
        &slrt,
        log_buffer(&slrt),
        family,
        slb_start,
        slb_size,
        sha1_of_slb,
        sha256_of_slb,
    ) {
        Ok(writer) => writer,
        Err((writer, e)) => {
            log::warn!("event log disabled before first write: {e}");
            writer
        }
    };

    let mut commands = tpm::UnimplementedCommands;
    // SAFETY: the standard TIS MMIO window is mapped by firmware before
    // SKINIT transfers control here.
    let mut tpm = unsafe { TisTpm::new(family, &mut commands) };

    // SAFETY: single logical processor, no concurrent access to these
    // statics anywhere else in the image.
    let (device_table, command_buf, event_log_region) = unsafe {
        (
            &*&raw const DEVICE_TABLE,
            &mut *&raw mut COMMAND_BUF,
            &*&raw const EVENT_LOG,
        )
    };

    let result = run_launch(
        &slrt,
        &pci,
        device_table,
        command_buf,
        event_log_region,
        &mut tpm,
        &mut event_log,
    );

    match result {
        Ok(launch) => launch.into(),
        Err(e) => {
            log::error!("launch failed, rebooting: {e}");
            reboot::reboot();
        }
    }
}
