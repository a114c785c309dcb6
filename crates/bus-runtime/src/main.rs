//! # Bus Runtime
//!
//! Runs every extension realm on the in-memory browser and drives one
//! request through each connection of the realm matrix.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (`REALM_BUS_CONFIG` TOML file, else environment)
//! 2. Initialize logging
//! 3. Wire background and popup
//! 4. Open a page and wire its content script and inpage script
//! 5. Run the smoke scenario and print the report

use std::env;
use std::fs;

use anyhow::{Context, Result};
use tracing::{error, info, Instrument};

use bus_runtime::{run_smoke, SimulatedExtension};
use realm_bus::BusConfig;
use realm_telemetry::{init_telemetry, realm_span, TelemetryConfig};

const EXTENSION_ID: &str = "realmbusdemo";
const DEMO_PAGE: &str = "https://dapp.example/";

fn load_config() -> Result<BusConfig> {
    match env::var("REALM_BUS_CONFIG") {
        Ok(path) => {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            BusConfig::from_toml_str(&source)
                .with_context(|| format!("Invalid config file {path}"))
        }
        Err(_) => BusConfig::from_env().context("Invalid bus configuration in environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let telemetry = TelemetryConfig::for_realm("runtime");
    let _guard = init_telemetry(telemetry).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Realm Bus Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(?config, "Configuration loaded");

    let extension = SimulatedExtension::new(EXTENSION_ID, config);
    let page = extension
        .open_page(DEMO_PAGE)
        .context("Failed to wire page realms")?;

    let result = run_smoke(&extension, &page)
        .instrument(realm_span!("smoke", tab = page.tab()))
        .await;

    match result {
        Ok(report) => {
            info!("Smoke scenario passed");
            println!("{}", serde_json::to_string_pretty(&report)?);
            page.close();
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Smoke scenario failed");
            page.close();
            Err(e)
        }
    }
}
