//! Kernel module loading for the 1-Wire temperature bus

use std::fs;
use std::process::Command;

use tracing::{debug, info};

use crate::constants::timing;

/// Modules that must be present before `/sys/bus/w1/devices` is populated
pub const W1_MODULES: &[&str] = &["w1-gpio", "w1-therm"];

/// Loaded module names from /proc/modules (kernel spells them with '_')
fn loaded_modules() -> Vec<String> {
    fs::read_to_string("/proc/modules")
        .map(|s| {
            s.lines()
                .filter_map(|l| l.split_whitespace().next())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn is_loaded(loaded: &[String], module: &str) -> bool {
    let kernel_name = module.replace('-', "_");
    loaded.iter().any(|m| *m == kernel_name)
}

/// Load the 1-Wire modules. Never fatal: a board without the overlay simply
/// reports no temperature sensors.
pub fn load_w1_modules() {
    let loaded = loaded_modules();
    let mut attempted = false;

    for module in W1_MODULES {
        if is_loaded(&loaded, module) {
            debug!("Module {} already loaded", module);
            continue;
        }
        attempted = true;
        match Command::new("modprobe").arg(module).output() {
            Ok(output) => {
                if output.status.success() {
                    info!("Loaded kernel module: {}", module);
                } else {
                    debug!(
                        "Module {} not available: {}",
                        module,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
            }
            Err(e) => {
                debug!("Could not run modprobe for {}: {}", module, e);
            }
        }
    }

    // Bus masters enumerate their slaves shortly after the module appears
    if attempted {
        std::thread::sleep(timing::MODULE_SETTLE);
    }
}
