//! Configuration: `alembic.ini`, database URLs and tool settings.
//!
//! The `[alembic]` section of `alembic.ini` supplies the migration
//! directory and the database URL. Tool behaviour (which `alembic` binary to
//! run, which entry points a migration must define) comes from an optional
//! `alembic-rebase.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, one_of, space0},
    combinator::{map, rest},
    sequence::{delimited, tuple},
};
use serde::Deserialize;
use thiserror::Error;

/// File name looked up next to `alembic.ini`.
pub const SETTINGS_FILE: &str = "alembic-rebase.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("alembic config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: cannot parse `{text}`", .path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("no [{0}] section found in config file")]
    MissingSection(String),

    #[error("{key} not found in [{section}] section")]
    MissingKey { section: String, key: String },

    #[error("unsupported database URL scheme '{0}' (expected postgresql)")]
    UnsupportedUrl(String),

    #[error("invalid settings file {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ============================================================================
// INI scanning
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum IniLine<'a> {
    Section(&'a str),
    Entry(&'a str, &'a str),
    Continuation(&'a str),
    Blank,
}

fn ini_section(input: &str) -> IResult<&str, IniLine<'_>> {
    map(
        delimited(char('['), take_till1(|c| c == ']'), char(']')),
        |name: &str| IniLine::Section(name.trim()),
    )(input)
}

fn ini_entry(input: &str) -> IResult<&str, IniLine<'_>> {
    map(
        tuple((
            take_till1(|c| c == '=' || c == ':'),
            one_of("=:"),
            space0,
            rest,
        )),
        |(key, _, _, value): (&str, char, &str, &str)| IniLine::Entry(key.trim(), value.trim_end()),
    )(input)
}

fn ini_line(line: &str) -> Option<IniLine<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Some(IniLine::Blank);
    }
    if line.starts_with([' ', '\t']) {
        return Some(IniLine::Continuation(trimmed));
    }

    let parsed: IResult<&str, IniLine<'_>> = alt((ini_section, ini_entry))(trimmed);
    parsed.ok().map(|(_, parsed)| parsed)
}

/// Sections and key/value pairs of an INI document, in file order.
///
/// Keys are case-insensitive, as in Python's `configparser`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDocument {
    /// Parse `text`. On failure returns the 1-based line number and text.
    pub fn parse(text: &str) -> Result<Self, (usize, String)> {
        let mut doc = IniDocument::default();

        for (index, line) in text.lines().enumerate() {
            let parsed = ini_line(line).ok_or_else(|| (index + 1, line.to_string()))?;
            match parsed {
                IniLine::Blank => {}
                IniLine::Section(name) => doc.sections.push((name.to_string(), Vec::new())),
                IniLine::Entry(key, value) => {
                    let (_, entries) = doc
                        .sections
                        .last_mut()
                        .ok_or_else(|| (index + 1, line.to_string()))?;
                    entries.push((key.to_lowercase(), value.to_string()));
                }
                IniLine::Continuation(more) => {
                    let last = doc
                        .sections
                        .last_mut()
                        .and_then(|(_, entries)| entries.last_mut());
                    match last {
                        Some((_, value)) => {
                            value.push('\n');
                            value.push_str(more);
                        }
                        None => return Err((index + 1, line.to_string())),
                    }
                }
            }
        }

        Ok(doc)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|(name, _)| name == section)
    }

    /// Last value of `key` in `section`; empty values count as absent.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.sections
            .iter()
            .filter(|(name, _)| name == section)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .last()
            .filter(|v| !v.trim().is_empty())
    }
}

// ============================================================================
// alembic.ini
// ============================================================================

/// The parts of `alembic.ini` the rebase needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlembicConfig {
    pub ini_path: PathBuf,
    pub script_location: PathBuf,
    /// Directory holding the migration artifacts.
    pub versions_dir: PathBuf,
    /// `sqlalchemy.url` as written in the file.
    pub database_url: Option<String>,
}

impl AlembicConfig {
    pub fn load(ini_path: &Path) -> Result<Self, ConfigError> {
        if !ini_path.exists() {
            return Err(ConfigError::NotFound(ini_path.to_path_buf()));
        }
        let text = fs::read_to_string(ini_path).map_err(|source| ConfigError::Read {
            path: ini_path.to_path_buf(),
            source,
        })?;
        let doc = IniDocument::parse(&text).map_err(|(line, text)| ConfigError::Syntax {
            path: ini_path.to_path_buf(),
            line,
            text,
        })?;

        let here = ini_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_document(&doc, ini_path, here)
    }

    fn from_document(doc: &IniDocument, ini_path: &Path, here: &Path) -> Result<Self, ConfigError> {
        const SECTION: &str = "alembic";

        if !doc.has_section(SECTION) {
            return Err(ConfigError::MissingSection(SECTION.to_string()));
        }

        let script_location = doc
            .get(SECTION, "script_location")
            .ok_or_else(|| ConfigError::MissingKey {
                section: SECTION.to_string(),
                key: "script_location".to_string(),
            })?;
        let script_location = resolve(here, script_location);

        let versions_dir = match doc.get(SECTION, "version_locations") {
            Some(locations) => {
                let first = locations
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .find(|s| !s.is_empty())
                    .unwrap_or(locations);
                resolve(here, first)
            }
            None => script_location.join("versions"),
        };

        let database_url = doc
            .get(SECTION, "sqlalchemy.url")
            .map(|url| expand_here(url, here));

        Ok(Self {
            ini_path: ini_path.to_path_buf(),
            script_location,
            versions_dir,
            database_url,
        })
    }

    /// The database URL, or an error naming the missing key.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey {
                section: "alembic".to_string(),
                key: "sqlalchemy.url".to_string(),
            })
    }

    /// Directory `alembic` commands must run from.
    pub fn working_dir(&self) -> &Path {
        self.ini_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

fn expand_here(value: &str, here: &Path) -> String {
    value.replace("%(here)s", &here.display().to_string())
}

fn resolve(here: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(expand_here(value.trim(), here));
    if path.is_absolute() { path } else { here.join(path) }
}

// ============================================================================
// Database URLs
// ============================================================================

/// Convert a SQLAlchemy PostgreSQL URL into one sqlx accepts.
///
/// `postgresql://`, `postgres://` and `postgresql+<driver>://` all become
/// `postgres://`.
pub fn normalize_database_url(url: &str) -> Result<String, ConfigError> {
    let (scheme, remainder) = url
        .split_once("://")
        .ok_or_else(|| ConfigError::UnsupportedUrl(url.to_string()))?;

    let dialect = scheme.split('+').next().unwrap_or(scheme);
    match dialect {
        "postgresql" | "postgres" => Ok(format!("postgres://{remainder}")),
        _ => Err(ConfigError::UnsupportedUrl(scheme.to_string())),
    }
}

/// Hide credentials and host for logging: `scheme://user@***`.
pub fn mask_database_url(url: &str) -> String {
    match url.split_once('@') {
        Some((credentials, _)) => {
            let user_end = credentials
                .rfind(':')
                .filter(|&i| credentials[..i].contains("://"))
                .unwrap_or(credentials.len());
            format!("{}@***", &credentials[..user_end])
        }
        None => match url.split_once("://") {
            Some((scheme, _)) => format!("{scheme}://***"),
            None => "***".to_string(),
        },
    }
}

// ============================================================================
// Tool settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Program used to run `alembic upgrade` / `alembic downgrade`.
    pub alembic_bin: String,
    /// Functions every migration artifact must define.
    pub entry_points: Vec<String>,
    /// Overrides `sqlalchemy.url`.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alembic_bin: "alembic".to_string(),
            entry_points: vec!["upgrade".to_string(), "downgrade".to_string()],
            database_url: None,
        }
    }
}

impl Settings {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from `explicit`, else from the first existing
    /// [`Settings::candidates`] entry, else defaults.
    pub fn load(explicit: Option<&Path>, ini_dir: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::candidates(ini_dir).into_iter().find(|p| p.is_file()),
        };

        match path {
            Some(path) => {
                let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(settings = %path.display(), "loaded settings");
                Self::parse(&text, &path)
            }
            None => Ok(Self::default()),
        }
    }

    /// `alembic-rebase.toml` next to the ini file, then the user config dir.
    pub fn candidates(ini_dir: &Path) -> Vec<PathBuf> {
        let mut candidates = vec![ini_dir.join(SETTINGS_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("alembic-rebase").join("config.toml"));
        }
        candidates
    }
}
