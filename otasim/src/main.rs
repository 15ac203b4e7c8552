//! Host side run of an over-the-air update.
//!
//! Builds a simulated flash with a factory image in slot A, streams a
//! generated update through the OTA manager, applies it, and boots.

use std::cell::RefCell;

use anyhow::{anyhow, bail, Result};
use boot::{Bootloader, Version, DEFAULT_LAYOUT, FLASH_BASE};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use ota::{OtaConfig, OtaHooks, OtaManager, OtaState, MAX_CHUNK_SIZE};
use simflash::{gen::GenBuilder, styles};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, name = "otasim")]
struct Cli {
    /// Bytes per transfer chunk.
    #[arg(long, default_value_t = MAX_CHUNK_SIZE)]
    chunk_size: u32,

    /// Size of the update image, header included.
    #[arg(long, default_value_t = 4096)]
    size: usize,

    /// Seed for the update payload.
    #[arg(long, default_value_t = 2)]
    seed: usize,

    /// Version of the update, as X.Y.Z.
    #[arg(long, value_parser = parse_version, default_value = "1.1.0")]
    version: Version,

    /// Flip one bit of the last chunk on its way in.
    #[arg(long, default_value_t = false)]
    corrupt: bool,

    /// One of off, error, warn, info, debug, trace.
    #[arg(long, value_parser = parse_level, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_version(text: &str) -> std::result::Result<Version, String> {
    let parts = text
        .trim_start_matches('v')
        .split('.')
        .map(|p| p.parse::<u32>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match parts[..] {
        [major, minor, patch] => Ok(Version::new(major, minor, patch)),
        _ => Err(format!("expected X.Y.Z, got {}", text)),
    }
}

fn parse_level(text: &str) -> std::result::Result<LevelFilter, String> {
    text.parse()
        .map_err(|_| format!("unknown log level {}", text))
}

/// Prints progress in steps of 25%.
#[derive(Default)]
struct Console {
    last_step: Option<u8>,
}

impl OtaHooks for Console {
    fn on_progress(&mut self, percent: u8) {
        let step = percent / 25;
        if self.last_step != Some(step) {
            self.last_step = Some(step);
            info!("Progress: {}%", percent);
        }
    }

    fn on_status(&mut self, state: OtaState, error: Option<ota::OtaError>) {
        match error {
            Some(e) => warn!("OTA state: {} ({})", state, e),
            None => info!("OTA state: {}", state),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level)
        .init()?;

    let layout = DEFAULT_LAYOUT;
    let factory = GenBuilder::default()
        .version(1, 0, 0)
        .seed(1)
        .entry_point(FLASH_BASE + layout.slot_a as u32)
        .build()?;
    let mut update = GenBuilder::default()
        .size(cli.size)
        .seed(cli.seed)
        .version(cli.version.major, cli.version.minor, cli.version.patch)
        .entry_point(FLASH_BASE + layout.slot_b as u32)
        .build()?;
    if cli.corrupt {
        if let Some(last) = update.data.last_mut() {
            *last ^= 0x01;
        }
    }

    let mut flash = styles::DEFAULT.build().map_err(|e| anyhow!("flash: {}", e))?;
    flash
        .install(&factory.data, layout.slot_a)
        .map_err(|e| anyhow!("factory image: {}", e))?;
    let bootloader = RefCell::new(Bootloader::new(flash, layout)?);
    println!("Factory image:\n{}", factory.header);

    let mut ota = OtaManager::with_hooks(&bootloader, OtaConfig::default(), Console::default());
    let outcome = run(&mut ota, &update, cli.chunk_size);

    println!("{}", ota.status());
    println!("{}", ota.statistics());
    println!("{}", bootloader.borrow().status());

    if let Err(e) = outcome {
        error!("Update failed: {}", e);
        info!(
            "Active slot unchanged at {:#010x}",
            boot::SlotLayout::mapped(bootloader.borrow().active_slot())
        );
        bail!("update failed: {}", e);
    }

    let entry = bootloader.borrow_mut().boot()?;
    println!(
        "Booted {} from {:#010x}: SP={:#010x} PC={:#010x}",
        bootloader.borrow().version_string(),
        boot::SlotLayout::mapped(entry.slot),
        entry.stack_pointer,
        entry.program_counter
    );
    let header_dump = bootloader
        .borrow()
        .flash()
        .dump(entry.slot, boot::HEADER_LEN)
        .map_err(|e| anyhow!("dump: {}", e))?
        .to_string();
    print!("{}", header_dump);
    Ok(())
}

fn run<H: OtaHooks>(
    manager: &mut OtaManager<'_, simflash::SimFlash, H>,
    image: &simflash::gen::GeneratedImage,
    chunk_size: u32,
) -> std::result::Result<(), ota::OtaError> {
    let total = u32::try_from(image.data.len()).map_err(|_| ota::OtaError::InvalidSize)?;
    manager.start_update(total, chunk_size)?;
    for (n, chunk) in image.chunks(chunk_size as usize) {
        manager.receive_chunk(n, chunk)?;
    }
    manager.finalize_update()?;
    manager.apply_update()?;
    if manager.restart_required() {
        info!("Restarting into the new image");
    }
    Ok(())
}
