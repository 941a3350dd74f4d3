//! On-disk settings: ~/.spendtrack/config.toml plus env credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use spendtrack_core::PipelineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Local JSON audit file, relative paths resolved against the cwd.
    pub json_path: String,
    /// When unset, Sheets upload is skipped.
    pub spreadsheet_id: Option<String>,
    pub sheet_range: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            output: OutputSection {
                json_path: "transactions.json".to_string(),
                spreadsheet_id: None,
                sheet_range: "Sheet1!A2:G".to_string(),
            },
        }
    }
}

pub fn spendtrack_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".spendtrack"))
}

pub fn ensure_spendtrack_home() -> Result<PathBuf> {
    let dir = spendtrack_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_spendtrack_home()?.join("config.toml"))
}

pub fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let p = match path {
        Some(p) => p,
        None => config_path()?,
    };
    if !p.exists() {
        return Ok(Settings::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    Ok(toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?)
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(settings).context("serialize settings")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_settings() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_settings(&Settings::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

/// Credentials stay out of the config file.
pub struct Credentials {
    pub gmail_token: String,
    pub gemini_api_key: String,
    pub sheets_token: Option<String>,
}

pub fn load_credentials() -> Result<Credentials> {
    Ok(Credentials {
        gmail_token: std::env::var("GMAIL_ACCESS_TOKEN")
            .context("GMAIL_ACCESS_TOKEN is not set")?,
        gemini_api_key: std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?,
        sheets_token: std::env::var("SHEETS_ACCESS_TOKEN").ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_round_trip_through_toml() {
        let settings = Settings::default();
        let s = toml::to_string_pretty(&settings).unwrap();
        let back: Settings = toml::from_str(&s).unwrap();
        assert_eq!(back.pipeline.days_back, settings.pipeline.days_back);
        assert_eq!(back.pipeline.providers.len(), settings.pipeline.providers.len());
        assert_eq!(back.output.sheet_range, "Sheet1!A2:G");
        assert!(back.output.spreadsheet_id.is_none());
    }

    #[test]
    fn test_default_pipeline_section_validates() {
        Settings::default().pipeline.validate().unwrap();
    }
}
