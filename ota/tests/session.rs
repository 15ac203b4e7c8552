// Update session testing.

use std::cell::RefCell;

use boot::{Bootloader, FirmwareHeader, SlotLayout, Version, FLASH_BASE};
use ota::{OtaConfig, OtaError, OtaHooks, OtaManager, OtaState};
use simflash::{gen::GenBuilder, gen::GeneratedImage, styles, SimFlash};
use storage::ReadFlash;

const LAYOUT: SlotLayout = boot::DEFAULT_LAYOUT;

/// A bootloader over the default flash, with a factory image of the given
/// version in slot A.
fn bootloader(major: u32, minor: u32, patch: u32) -> RefCell<Bootloader<SimFlash>> {
    let factory = GenBuilder::default()
        .version(major, minor, patch)
        .seed(1)
        .build()
        .unwrap();
    let mut flash = styles::DEFAULT.build().unwrap();
    flash.install(&factory.data, LAYOUT.slot_a).unwrap();
    RefCell::new(Bootloader::new(flash, LAYOUT).unwrap())
}

fn update(size: usize, major: u32, minor: u32, patch: u32) -> GeneratedImage {
    GenBuilder::default()
        .size(size)
        .seed(2)
        .version(major, minor, patch)
        .entry_point(FLASH_BASE + LAYOUT.slot_b as u32)
        .build()
        .unwrap()
}

fn send<H: OtaHooks>(ota: &mut OtaManager<'_, SimFlash, H>, image: &GeneratedImage, chunk_size: u32) {
    ota.start_update(image.data.len() as u32, chunk_size).unwrap();
    for (n, chunk) in image.chunks(chunk_size as usize) {
        ota.receive_chunk(n, chunk).unwrap();
    }
}

#[derive(Default)]
struct Recorder {
    progress: Vec<u8>,
    statuses: Vec<(OtaState, Option<OtaError>)>,
    validated: Vec<Version>,
    reject: bool,
}

impl OtaHooks for Recorder {
    fn on_progress(&mut self, percent: u8) {
        self.progress.push(percent);
    }

    fn on_status(&mut self, state: OtaState, error: Option<OtaError>) {
        self.statuses.push((state, error));
    }

    fn on_validate(&mut self, header: &FirmwareHeader) -> bool {
        self.validated.push(header.version);
        !self.reject
    }
}

#[test]
fn end_to_end() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());

    ota.start_update(4096, 1024).unwrap();
    assert_eq!(ota.state(), OtaState::WaitingForStart);
    assert_eq!(ota.chunk_info().total_chunks, 4);
    assert!(ota.is_busy());

    for (n, chunk) in image.chunks(1024) {
        ota.receive_chunk(n, chunk).unwrap();
    }
    assert_eq!(ota.state(), OtaState::ReceivingData);
    assert_eq!(ota.chunk_info().received_bytes, 4096);
    assert_eq!(ota.chunk_info().next_expected_chunk, 4);

    ota.finalize_update().unwrap();
    assert_eq!(ota.state(), OtaState::Complete);
    assert_eq!(ota.progress_percent(), 100);
    assert!(ota.restart_required());
    assert!(ota.is_update_available());
    assert!(!ota.is_busy());
    assert_eq!(ota.firmware_header(), Some(&image.header));
    assert_eq!(ota.last_error(), None);

    // Nothing has moved yet.
    assert_eq!(boot.borrow().active_slot(), LAYOUT.slot_a);
    assert!(!boot.borrow().is_update_locked());

    ota.apply_update().unwrap();
    assert_eq!(ota.state(), OtaState::Complete);
    assert!(ota.restart_required());
    {
        let bl = boot.borrow();
        assert_eq!(bl.active_slot(), LAYOUT.slot_b);
        assert_eq!(bl.context().active_header, image.header);
        assert_eq!(bl.context().boot_count, 2);
        assert!(!bl.context().update_pending);
    }

    let hooks = ota.hooks();
    assert_eq!(hooks.progress, [0, 25, 50, 75, 100, 95, 100]);
    let states: Vec<_> = hooks.statuses.iter().map(|(s, _)| *s).collect();
    assert_eq!(
        states,
        [
            OtaState::WaitingForStart,
            OtaState::ReceivingData,
            OtaState::Validating,
            OtaState::Complete,
            OtaState::Updating,
            OtaState::Complete,
        ]
    );
    assert!(hooks.statuses.iter().all(|(_, e)| e.is_none()));
    assert_eq!(hooks.validated, [Version::new(1, 1, 0)]);

    let stats = ota.statistics();
    assert_eq!(stats.total_updates, 1);
    assert_eq!(stats.successful_updates, 1);
    assert_eq!(stats.failed_updates, 0);

    // The restarted device runs the update.
    let entry = boot.borrow_mut().boot().unwrap();
    assert_eq!(entry.slot, LAYOUT.slot_b);

    println!("{}", ota.status());
    println!("{}", ota.statistics());
}

#[test]
fn corrupted_chunk() {
    let boot = bootloader(1, 0, 0);
    let mut image = update(4096, 1, 1, 0);
    let last = image.data.len() - 1;
    image.data[last] ^= 0x01;

    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());
    send(&mut ota, &image, 1024);

    assert_eq!(ota.finalize_update(), Err(OtaError::CrcMismatch));
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::CrcMismatch));
    assert!(!ota.restart_required());
    assert!(!ota.is_update_available());
    assert_eq!(boot.borrow().active_slot(), LAYOUT.slot_a);
    assert!(!boot.borrow().is_update_locked());

    // The application never got asked.
    assert!(ota.hooks().validated.is_empty());
    assert_eq!(
        ota.hooks().statuses.last(),
        Some(&(OtaState::Error, Some(OtaError::CrcMismatch)))
    );
    assert_eq!(ota.statistics().failed_updates, 1);

    assert_eq!(ota.apply_update(), Err(OtaError::InvalidState));
}

#[test]
fn strict_ordering() {
    let boot = bootloader(1, 0, 0);
    let image = update(3000, 1, 1, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    ota.start_update(3000, 1024).unwrap();
    assert_eq!(ota.chunk_info().total_chunks, 3);

    let chunks: Vec<_> = image.chunks(1024).collect();
    assert_eq!(ota.receive_chunk(1, chunks[1].1), Err(OtaError::Communication));
    assert_eq!(ota.state(), OtaState::WaitingForStart);

    ota.receive_chunk(0, chunks[0].1).unwrap();
    assert_eq!(ota.receive_chunk(0, chunks[0].1), Err(OtaError::Communication));
    assert_eq!(ota.receive_chunk(2, chunks[2].1), Err(OtaError::Communication));
    assert_eq!(ota.chunk_info().received_chunks, 1);
    assert_eq!(ota.chunk_info().next_expected_chunk, 1);

    // Rejections leave the session usable.
    ota.receive_chunk(1, chunks[1].1).unwrap();
    ota.receive_chunk(2, chunks[2].1).unwrap();
    ota.finalize_update().unwrap();
    assert_eq!(ota.state(), OtaState::Complete);
}

#[test]
fn completeness_gate() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());

    assert_eq!(ota.finalize_update(), Err(OtaError::InvalidState));
    ota.start_update(4096, 1024).unwrap();
    assert_eq!(ota.finalize_update(), Err(OtaError::InvalidState));

    for (n, chunk) in image.chunks(1024).take(3) {
        ota.receive_chunk(n, chunk).unwrap();
    }
    assert_eq!(ota.progress_percent(), 75);
    assert_eq!(ota.finalize_update(), Err(OtaError::InvalidSize));
    assert_eq!(ota.state(), OtaState::ReceivingData);

    let (n, chunk) = image.chunks(1024).nth(3).unwrap();
    ota.receive_chunk(n, chunk).unwrap();
    ota.finalize_update().unwrap();
    assert_eq!(ota.state(), OtaState::Complete);

    // Validation only runs as part of finalizing.
    assert_eq!(ota.validate_update(), Err(OtaError::InvalidState));
}

#[test]
fn one_session_at_a_time() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    ota.start_update(4096, 1024).unwrap();

    assert_eq!(ota.start_update(4096, 1024), Err(OtaError::InvalidState));
    assert_eq!(ota.state(), OtaState::WaitingForStart);
    assert_eq!(ota.statistics().total_updates, 1);

    // The bootloader keeps its hands off the slot meanwhile.
    assert!(boot.borrow().is_update_locked());
    assert_eq!(
        boot.borrow_mut().check_update(),
        Err(boot::Error::UpdateInProgress)
    );

    // A second manager over the same bootloader cannot start either.
    let mut other = OtaManager::new(&boot, OtaConfig::default());
    assert_eq!(other.start_update(4096, 1024), Err(OtaError::InvalidState));
    assert_eq!(other.state(), OtaState::Idle);
}

#[test]
fn size_checks() {
    let boot = bootloader(1, 0, 0);
    let room = {
        let bl = boot.borrow();
        (bl.flash().capacity() - bl.update_slot()) as u32
    };
    let mut ota = OtaManager::new(&boot, OtaConfig::default());

    assert_eq!(ota.start_update(4096, 0), Err(OtaError::InvalidSize));
    assert_eq!(ota.start_update(4096, 1025), Err(OtaError::InvalidSize));
    assert_eq!(ota.start_update(0, 1024), Err(OtaError::InvalidSize));
    assert_eq!(ota.start_update(room + 1, 1024), Err(OtaError::InvalidSize));
    assert_eq!(ota.state(), OtaState::Idle);
    assert_eq!(ota.statistics().total_updates, 0);

    ota.start_update(room, 1024).unwrap();
    ota.abort_update().unwrap();

    ota.start_update(1500, 1024).unwrap();
    assert_eq!(ota.receive_chunk(0, &[]), Err(OtaError::InvalidSize));
    assert_eq!(ota.receive_chunk(0, &[0; 1025]), Err(OtaError::InvalidSize));
    ota.receive_chunk(0, &[0; 1024]).unwrap();
    // Only 476 bytes are left.
    assert_eq!(ota.receive_chunk(1, &[0; 477]), Err(OtaError::InvalidSize));
    ota.receive_chunk(1, &[0; 476]).unwrap();
    assert_eq!(ota.chunk_info().received_bytes, 1500);
    assert_eq!(ota.state(), OtaState::ReceivingData);
}

#[test]
fn smaller_configured_chunks() {
    let boot = bootloader(1, 0, 0);
    let config = OtaConfig {
        max_chunk_size: 256,
        ..OtaConfig::default()
    };
    let mut ota = OtaManager::new(&boot, config);
    assert_eq!(ota.start_update(4096, 512), Err(OtaError::InvalidSize));
    send(&mut ota, &update(4096, 1, 1, 0), 256);
    assert_eq!(ota.chunk_info().received_chunks, 16);
    ota.finalize_update().unwrap();
}

#[test]
fn odd_chunk_sizes() {
    for (size, chunk_size) in [(4096, 1023), (3001, 37), (1000, 1), (81, 1024), (4097, 4)] {
        let boot = bootloader(1, 0, 0);
        let image = update(size, 1, 1, 0);
        let mut ota = OtaManager::new(&boot, OtaConfig::default());
        send(&mut ota, &image, chunk_size);
        assert_eq!(
            ota.chunk_info().total_chunks as usize,
            size.div_ceil(chunk_size as usize)
        );
        ota.finalize_update().unwrap();

        let bl = boot.borrow();
        let written = &bl.flash().bytes()[LAYOUT.slot_b..LAYOUT.slot_b + size];
        assert_eq!(written, &image.data[..]);
    }
}

#[test]
fn abort() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());

    ota.start_update(4096, 1024).unwrap();
    let (n, chunk) = image.chunks(1024).next().unwrap();
    ota.receive_chunk(n, chunk).unwrap();

    ota.abort_update().unwrap();
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::Communication));
    assert!(ota.abort_requested());
    assert_eq!(ota.statistics().failed_updates, 1);
    assert!(!boot.borrow().is_update_locked());

    assert_eq!(ota.abort_update(), Err(OtaError::InvalidState));
    assert_eq!(ota.receive_chunk(1, chunk), Err(OtaError::InvalidState));

    // The aborted chunk is still in flash until the next session erases it.
    assert_eq!(
        &boot.borrow().flash().bytes()[LAYOUT.slot_b..LAYOUT.slot_b + 1024],
        chunk
    );
    ota.start_update(4096, 1024).unwrap();
    assert!(!ota.abort_requested());
    assert_eq!(ota.last_error(), None);
    assert!(boot.borrow().flash().bytes()[LAYOUT.slot_b..LAYOUT.slot_b + 4096]
        .iter()
        .all(|&b| b == 0xff));

    for (n, chunk) in image.chunks(1024) {
        ota.receive_chunk(n, chunk).unwrap();
    }
    ota.finalize_update().unwrap();
}

#[test]
fn abort_before_any_session() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());

    ota.abort_update().unwrap();
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::Communication));
    assert!(ota.abort_requested());
    assert_eq!(ota.statistics().failed_updates, 1);
    assert_eq!(
        ota.hooks().statuses,
        [(OtaState::Error, Some(OtaError::Communication))]
    );
    assert!(!boot.borrow().is_update_locked());

    // Error is terminal.
    assert_eq!(ota.abort_update(), Err(OtaError::InvalidState));

    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();
}

#[test]
fn no_abort_after_complete() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();
    assert_eq!(ota.abort_update(), Err(OtaError::InvalidState));
    assert_eq!(ota.state(), OtaState::Complete);
}

#[test]
fn flash_write_failure() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());

    ota.start_update(4096, 1024).unwrap();
    ota.receive_chunk(0, &image.data[..1024]).unwrap();
    // Something programs the flash behind the session's back.
    boot.borrow_mut()
        .flash_mut()
        .corrupt(LAYOUT.slot_b + 1500, 0x00)
        .unwrap();

    assert_eq!(
        ota.receive_chunk(1, &image.data[1024..2048]),
        Err(OtaError::FlashError)
    );
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::FlashError));
    assert_eq!(ota.chunk_info().received_chunks, 1);
    assert_eq!(ota.statistics().failed_updates, 1);
    assert_eq!(
        ota.hooks().statuses.last(),
        Some(&(OtaState::Error, Some(OtaError::FlashError)))
    );

    // No resuming.
    assert_eq!(
        ota.receive_chunk(1, &image.data[1024..2048]),
        Err(OtaError::InvalidState)
    );

    // A fresh session erases the damage.
    send(&mut ota, &image, 1024);
    ota.finalize_update().unwrap();
}

#[test]
fn erase_failure() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());

    boot.borrow_mut().flash_mut().set_erase_fault(true);
    assert_eq!(ota.start_update(4096, 1024), Err(OtaError::FlashError));
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::FlashError));
    assert!(!boot.borrow().is_update_locked());
    assert_eq!(ota.statistics().total_updates, 0);

    boot.borrow_mut().flash_mut().set_erase_fault(false);
    ota.start_update(4096, 1024).unwrap();
    assert_eq!(ota.state(), OtaState::WaitingForStart);
}

#[test]
fn application_veto() {
    let boot = bootloader(1, 0, 0);
    let hooks = Recorder {
        reject: true,
        ..Recorder::default()
    };
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), hooks);
    send(&mut ota, &update(4096, 1, 1, 0), 1024);

    assert_eq!(ota.finalize_update(), Err(OtaError::ValidationFailed));
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.hooks().validated, [Version::new(1, 1, 0)]);

    ota.hooks_mut().reject = false;
    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();
}

#[test]
fn declared_size_must_match() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());

    // Only the first half of a 4096 byte image.
    ota.start_update(2048, 1024).unwrap();
    ota.receive_chunk(0, &image.data[..1024]).unwrap();
    ota.receive_chunk(1, &image.data[1024..2048]).unwrap();
    assert_eq!(ota.finalize_update(), Err(OtaError::ValidationFailed));
    assert_eq!(ota.firmware_header().map(|h| h.size), Some(4096));
}

#[test]
fn bad_header() {
    // No entry point.
    let boot = bootloader(1, 0, 0);
    let image = GenBuilder::default().version(1, 1, 0).entry_point(0).build().unwrap();
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    send(&mut ota, &image, 1024);
    assert_eq!(ota.finalize_update(), Err(OtaError::ValidationFailed));

    // No header at all.
    let mut garbage = update(4096, 1, 1, 0);
    garbage.data[0] ^= 0xff;
    send(&mut ota, &garbage, 1024);
    assert_eq!(ota.finalize_update(), Err(OtaError::ValidationFailed));
    assert_eq!(ota.statistics().failed_updates, 2);
}

#[test]
fn timeout_polling() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());

    // Nothing to time out.
    assert_eq!(ota.poll_timeout(60_000), Ok(()));

    ota.start_update(4096, 1024).unwrap();
    assert_eq!(ota.poll_timeout(20_000), Ok(()));
    assert_eq!(ota.poll_timeout(20_000), Err(OtaError::Timeout));
    assert_eq!(ota.state(), OtaState::WaitingForStart);

    // Data resets the clock.
    ota.receive_chunk(0, &image.data[..1024]).unwrap();
    assert_eq!(ota.poll_timeout(29_000), Ok(()));
    assert_eq!(ota.poll_timeout(2_000), Err(OtaError::Timeout));

    // Acting on it is up to the caller.
    ota.abort_update().unwrap();
    assert_eq!(ota.poll_timeout(60_000), Ok(()));
}

#[test]
fn apply_needs_a_newer_image() {
    let boot = bootloader(2, 0, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());
    send(&mut ota, &update(4096, 1, 5, 0), 1024);
    ota.finalize_update().unwrap();

    assert_eq!(ota.apply_update(), Err(OtaError::ValidationFailed));
    assert_eq!(ota.state(), OtaState::Error);
    assert_eq!(ota.last_error(), Some(OtaError::ValidationFailed));
    assert_eq!(boot.borrow().active_slot(), LAYOUT.slot_a);
    assert_eq!(boot.borrow().context().boot_count, 1);

    let stats = ota.statistics();
    assert_eq!(stats.successful_updates, 1);
    assert_eq!(stats.failed_updates, 0);
}

#[test]
fn apply_revalidates() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();

    let at = LAYOUT.slot_b + 2000;
    let byte = boot.borrow().flash().bytes()[at];
    boot.borrow_mut().flash_mut().corrupt(at, byte ^ 0x5a).unwrap();
    assert_eq!(ota.apply_update(), Err(OtaError::CrcMismatch));
    assert_eq!(boot.borrow().active_slot(), LAYOUT.slot_a);
}

#[test]
fn sessions_after_terminal_states() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::with_hooks(&boot, OtaConfig::default(), Recorder::default());

    let mut bad = update(4096, 1, 1, 0);
    bad.data[100] ^= 0x80;
    send(&mut ota, &bad, 1024);
    assert_eq!(ota.finalize_update(), Err(OtaError::CrcMismatch));

    // Error -> Idle -> WaitingForStart.
    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();

    // Complete -> Idle -> WaitingForStart.
    send(&mut ota, &update(4096, 1, 2, 0), 1024);
    ota.finalize_update().unwrap();
    ota.apply_update().unwrap();
    assert_eq!(boot.borrow().context().active_header.version, Version::new(1, 2, 0));

    let idles = ota
        .hooks()
        .statuses
        .iter()
        .filter(|(s, _)| *s == OtaState::Idle)
        .count();
    assert_eq!(idles, 2);

    let stats = ota.statistics();
    assert_eq!(stats.total_updates, 3);
    assert_eq!(stats.successful_updates, 2);
    assert_eq!(stats.failed_updates, 1);
    assert!((stats.success_rate() - 66.666).abs() < 0.01);
}

#[test]
fn every_flash_style() {
    for flash in styles::all_flashes() {
        let mut flash = flash.unwrap();
        let factory = GenBuilder::default().seed(1).build().unwrap();
        flash.install(&factory.data, LAYOUT.slot_a).unwrap();
        let boot = RefCell::new(Bootloader::new(flash, LAYOUT).unwrap());

        let image = update(10_000, 1, 0, 1);
        let mut ota = OtaManager::new(&boot, OtaConfig::default());
        send(&mut ota, &image, 1000);
        ota.finalize_update().unwrap();
        ota.apply_update().unwrap();
        assert_eq!(boot.borrow().active_slot(), LAYOUT.slot_b);
    }
}

#[test]
fn dropped_manager_releases_update_slot() {
    let boot = bootloader(1, 0, 0);
    let image = update(4096, 1, 1, 0);
    {
        let mut ota = OtaManager::new(&boot, OtaConfig::default());
        ota.start_update(4096, 1024).unwrap();
        ota.receive_chunk(0, &image.data[..1024]).unwrap();
        assert!(boot.borrow().is_update_locked());
    }
    assert!(!boot.borrow().is_update_locked());

    // The half written image is not an update.
    assert_eq!(
        boot.borrow_mut().check_update(),
        Err(boot::Error::CrcMismatch)
    );

    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    send(&mut ota, &image, 1024);
    ota.finalize_update().unwrap();
    ota.apply_update().unwrap();
}

#[test]
fn dropping_an_idle_manager_keeps_a_held_lock() {
    let boot = bootloader(1, 0, 0);
    let mut first = OtaManager::new(&boot, OtaConfig::default());
    first.start_update(4096, 1024).unwrap();

    // Never got a session, must not release the first one's slot.
    let mut second = OtaManager::new(&boot, OtaConfig::default());
    assert_eq!(second.start_update(4096, 1024), Err(OtaError::InvalidState));
    drop(second);
    assert!(boot.borrow().is_update_locked());

    drop(first);
    assert!(!boot.borrow().is_update_locked());
}

#[test]
fn new_session_over_running_image() {
    let boot = bootloader(1, 0, 0);
    let mut ota = OtaManager::new(&boot, OtaConfig::default());
    send(&mut ota, &update(4096, 1, 1, 0), 1024);
    ota.finalize_update().unwrap();
    ota.apply_update().unwrap();
    assert_eq!(boot.borrow().active_slot(), boot.borrow().update_slot());

    // Allowed, but it wipes the image that was just applied.
    ota.start_update(4096, 1024).unwrap();
    assert!(boot.borrow().flash().bytes()[LAYOUT.slot_b..LAYOUT.slot_b + 4096]
        .iter()
        .all(|&b| b == 0xff));
    ota.abort_update().unwrap();

    // Booting now falls back to the factory image.
    let entry = boot.borrow_mut().boot().unwrap();
    assert_eq!(entry.slot, LAYOUT.slot_a);
    assert!(boot.borrow().context().rollback_requested);
}
