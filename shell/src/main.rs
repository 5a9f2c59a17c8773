//! Glue: boot sequence for a BadgeVMS host build — mount filesystems,
//! register devices, initialize the application registry, start Hermes,
//! and launch the requested application (or just list what's installed).
//!
//! Grounded in `patrace/src/main.rs` for its `clap`-derived CLI shape and
//! `console::style` status output; the actual boot sequence is grounded in
//! `spec.md` §2's data-flow line (mount → register devices → init
//! AppRegistry → spawn launcher).

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use badgevms::{
    device::{fs::FatDevice, pseudo::TtyDevice, DeviceTable},
    process::{ProcessManager, SymbolTable, ROOT_PID},
    registry::{AppRegistry, Spawner},
    wifi::{ConnectionStatus, Radio, WifiCtl, WifiStation},
};

/// Boots a BadgeVMS environment rooted at a host directory and optionally
/// launches one installed application.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Root directory standing in for the device's storage; `apps`,
    /// `flash` and `sd` subdirectories are created under it.
    #[arg(long, default_value = "./badgevms-root")]
    root: PathBuf,

    /// Badgehub base URL used by OTA.
    #[arg(long, default_value = "https://badge.example.org/api/v3")]
    badgehub_url: String,

    /// Application identifier to launch after boot, if any.
    #[arg(long)]
    launch: Option<String>,
}

/// A radio collaborator that is always disconnected and scans nothing.
/// Real Wi-Fi hardware is out of scope per `spec.md` §1; this exists so
/// Hermes has something to drive on a host build.
struct NullRadio;

impl Radio for NullRadio {
    fn scan(&self, _max_results: usize) -> Vec<WifiStation> {
        Vec::new()
    }
    fn connect(&self, _ssid: &str, _psk: &str) -> Result<(), ConnectionStatus> {
        Err(ConnectionStatus::Error)
    }
    fn disconnect(&self) {}
}

fn header(text: &str) {
    println!("{}", style(text).bold().cyan());
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    header("BadgeVMS boot");
    log::info!("booting with root={}", args.root.display());

    let devices = DeviceTable::new();
    let flash_dir = args.root.join("flash");
    let sd_dir = args.root.join("sd");
    let apps_dir = args.root.join("apps");

    devices
        .register("FLASH0", Arc::new(FatDevice::mount_flash(&flash_dir)?))
        .context("registering FLASH0")?;
    devices
        .register("SD0", Arc::new(FatDevice::mount_sd(&sd_dir)?))
        .context("registering SD0")?;
    devices
        .register("TTY0", Arc::new(TtyDevice))
        .context("registering TTY0")?;
    println!("  {} device table ready", style("✓").green());

    let registry = AppRegistry::init(&apps_dir, &flash_dir, &sd_dir).context("initializing app registry")?;
    println!("  {} application registry rooted at {}", style("✓").green(), apps_dir.display());

    let hermes = WifiCtl::spawn(Arc::new(NullRadio));
    println!(
        "  {} Hermes started (status: {:?})",
        style("✓").green(),
        hermes.connection_status()
    );

    let symbols = SymbolTable::new(vec![("puts", 0x1000), ("malloc", 0x2000), ("free", 0x3000)]);
    let processes = ProcessManager::new(symbols);

    header("installed applications");
    let apps = registry.list().context("listing applications")?;
    if apps.is_empty() {
        println!("  (none)");
    }
    for app in &apps {
        println!("  {} {} {}", style(app.id()).yellow(), app.version(), app.source().label());
    }

    if let Some(id) = &args.launch {
        let pid = registry
            .launch(id, &processes as &dyn Spawner, &[])
            .with_context(|| format!("launching {id:?}"))?;
        println!("{} launched {id:?} as pid {pid}", style("→").bold(), );
        processes
            .wait(ROOT_PID, true, Some(30_000))
            .context("waiting for launched app")?;
    }

    let _ = &args.badgehub_url;
    Ok(())
}
