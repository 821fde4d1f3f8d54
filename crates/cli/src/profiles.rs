//! `misrecon validate` and `misrecon profiles`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use misrecon_recon::config::InsurerProfile;
use misrecon_recon::{ProfileRegistry, ReconConfig};

use crate::exit_codes::{EXIT_ERROR, EXIT_RECON_RUNTIME};
use crate::CliError;

pub fn load_config(path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        CliError::new(EXIT_RECON_RUNTIME, format!("cannot read config {}: {e}", path.display()))
    })?;
    ReconConfig::from_toml(&config_str).map_err(|e| CliError::recon(&e))
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let filters: usize = config.insurers.iter().map(|p| p.filters.len()).sum();
    eprintln!(
        "valid: '{}' with {} insurer profile(s), {} field(s), {} MIS filter(s){}",
        config.name,
        config.insurers.len(),
        config.fields.len(),
        filters,
        if config.offline.is_some() { ", offline source configured" } else { "" },
    );
    Ok(())
}

#[derive(Serialize)]
struct ProfileRow<'a> {
    id: &'a str,
    aliases: &'a [String],
    sheets: &'a [String],
    mapped_fields: Vec<&'a str>,
    filters: usize,
}

impl<'a> From<&'a InsurerProfile> for ProfileRow<'a> {
    fn from(p: &'a InsurerProfile) -> Self {
        Self {
            id: &p.id,
            aliases: &p.aliases,
            sheets: &p.sheets,
            mapped_fields: p.columns.keys().map(String::as_str).collect(),
            filters: p.filters.len(),
        }
    }
}

pub fn cmd_profiles(config_path: PathBuf, resolve: Option<String>, json: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let registry = ProfileRegistry::from_config(&config);

    if let Some(hint) = resolve {
        let profile = registry
            .resolve_profile(&hint)
            .or_else(|_| registry.resolve_from_path(Path::new(&hint)))
            .map_err(|e| CliError::recon(&e).with_hint("no alias matched; check `misrecon profiles` output"))?;
        if json {
            print_json(&ProfileRow::from(profile))?;
        } else {
            println!("{}", profile.id);
        }
        return Ok(());
    }

    if json {
        let rows: Vec<ProfileRow<'_>> = registry.profiles().iter().map(ProfileRow::from).collect();
        return print_json(&rows);
    }

    let width = registry.profiles().iter().map(|p| p.id.len()).max().unwrap_or(2).max(2);
    println!("{:<width$}  {:<8}  {:<30}  ALIASES", "ID", "FILTERS", "SHEETS");
    for p in registry.profiles() {
        let sheets = if p.sheets.is_empty() { "(first)".to_string() } else { p.sheets.join(", ") };
        println!("{:<width$}  {:<8}  {:<30}  {}", p.id, p.filters.len(), sheets, p.aliases.join(", "));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))?;
    println!("{out}");
    Ok(())
}
