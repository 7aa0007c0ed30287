//! Loading and saving `memo.toml`.
//!
//! The file is always rewritten whole through a sibling `.toml.tmp` and a
//! rename. [`ConfigManager::update_section`] re-reads the file first and
//! swaps a single table in place, so a section edited by hand or by another
//! process since the last load is left as it is on disk.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, Settings};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config is not editable TOML: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings backed by one TOML file.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

impl ConfigManager {
    /// Manager for `config_path` holding default settings until loaded.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Read an existing file.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }
        self.settings = toml::from_str(&fs::read_to_string(&self.config_path)?)?;
        Ok(())
    }

    /// Read the file, writing a default one first if it is missing.
    ///
    /// A file with leftover tables or missing keys is rewritten in full.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            tracing::info!("Creating default config {}", self.config_path.display());
            self.settings = Settings::default();
            return self.save();
        }

        let content = fs::read_to_string(&self.config_path)?;
        let (settings, stale) = parse_and_clean(&content)?;
        self.settings = settings;
        if stale {
            tracing::debug!("Rewriting config {}", self.config_path.display());
            self.save()?;
        }
        Ok(())
    }

    /// Create the configured scratch directory and return it.
    pub fn ensure_scratch_dir(&self) -> ConfigResult<PathBuf> {
        let scratch = self.scratch_dir();
        fs::create_dir_all(&scratch)?;
        Ok(scratch)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.paths.scratch_dir)
    }

    pub fn save(&self) -> ConfigResult<()> {
        write_atomically(&self.config_path, &render(&self.settings)?)?;
        Ok(())
    }

    /// Write `section` from memory over the same table on disk.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let mut doc = match fs::read_to_string(&self.config_path) {
            Ok(content) if !content.trim().is_empty() => content.parse::<DocumentMut>()?,
            Ok(_) => DocumentMut::new(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => DocumentMut::new(),
            Err(e) => return Err(e.into()),
        };

        let fresh: DocumentMut = section_to_toml(&self.settings, section)?.parse()?;
        let mut table = fresh.as_table().clone();
        if let Some(existing) = doc.get(section.table_name()).and_then(Item::as_table) {
            *table.decor_mut() = existing.decor().clone();
        }
        doc[section.table_name()] = Item::Table(table);

        tracing::debug!("Updating [{}] in {}", section.table_name(), self.config_path.display());
        write_atomically(&self.config_path, &doc.to_string())?;
        Ok(())
    }
}

/// Settings from `content`, and whether the file differs from what
/// [`render`] would write for them.
fn parse_and_clean(content: &str) -> ConfigResult<(Settings, bool)> {
    let doc: DocumentMut = content.parse()?;
    let settings: Settings = toml::from_str(content)?;

    let known: Vec<&str> = ConfigSection::ALL.iter().map(|s| s.table_name()).collect();
    let has_unknown = doc.iter().any(|(key, _)| !known.contains(&key));

    // Missing defaults show up as a difference from the regenerated file.
    let stale = has_unknown || doc_values(content)? != doc_values(&render(&settings)?)?;
    Ok((settings, stale))
}

fn render(settings: &Settings) -> ConfigResult<String> {
    let mut output = String::from("# Memo finalization configuration\n");
    for section in ConfigSection::ALL {
        output.push_str(&format!("\n# {}\n[{}]\n", section.description(), section.table_name()));
        for line in section_to_toml(settings, section)?.lines() {
            output.push_str(line);
            output.push('\n');
        }
    }
    Ok(output)
}

fn section_to_toml(settings: &Settings, section: ConfigSection) -> Result<String, toml::ser::Error> {
    match section {
        ConfigSection::Tools => toml::to_string_pretty(&settings.tools),
        ConfigSection::Paths => toml::to_string_pretty(&settings.paths),
        ConfigSection::Logging => toml::to_string_pretty(&settings.logging),
        ConfigSection::Conversion => toml::to_string_pretty(&settings.conversion),
        ConfigSection::Waveform => toml::to_string_pretty(&settings.waveform),
        ConfigSection::Monitor => toml::to_string_pretty(&settings.monitor),
    }
}

/// Comment-insensitive view of a document's values.
fn doc_values(content: &str) -> ConfigResult<toml::Table> {
    Ok(toml::from_str(content)?)
}

fn write_atomically(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staged = path.with_extension("toml.tmp");
    {
        let mut file = fs::File::create(&staged)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&staged, path)
}
