//! `vaultsync config`: show or adjust saved settings.

use anyhow::{Context, Result};
use clap::Subcommand;

use vaultsync_core::config;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the settings with the token masked.
    Show {
        /// Emit JSON instead of YAML.
        #[arg(long)]
        json: bool,
    },
    /// Change the periodic sync interval; 0 disables it.
    SetInterval {
        minutes: u64,
    },
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        ConfigCommand::Show { json } => {
            let settings = config::load_at(&home)
                .context("failed to load settings")?
                .redacted();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&settings)
                        .context("failed to render settings JSON")?
                );
            } else {
                print!(
                    "{}",
                    serde_yaml::to_string(&settings).context("failed to render settings YAML")?
                );
            }
        }
        ConfigCommand::SetInterval { minutes } => {
            let mut settings = config::load_at(&home).context("failed to load settings")?;
            settings.interval_minutes = minutes;
            config::save_at(&home, &settings).context("failed to save settings")?;
            if minutes == 0 {
                println!("✓ Periodic sync disabled");
            } else {
                println!("✓ Periodic sync every {minutes} min");
            }
            println!("  Restart the daemon to apply the new interval.");
        }
    }

    Ok(())
}
