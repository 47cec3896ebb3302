//! Config command implementation.

use anyhow::{Context, Result};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", Config::path().display());
        }
        ConfigAction::Show => {
            let config = Config::load();
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{}", content);
        }
        ConfigAction::SetUser { user } => {
            let mut config = Config::load();
            config.user_id = Some(user.clone());
            config.save()?;
            println!("Default user set to '{}'", user);
        }
        ConfigAction::SetSensor { name, address } => {
            let mut config = Config::load();
            config.sensor_name = Some(name.clone());
            config.sensor_address = address;
            config.save()?;
            match &config.sensor_address {
                Some(address) => println!("Default sensor set to '{}' ({})", name, address),
                None => println!("Default sensor set to '{}'", name),
            }
        }
    }
    Ok(())
}
