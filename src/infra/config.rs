use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::locate::DEFAULT_FUZZY_MAX_BYTES;
use crate::core::patch::SyntaxChoice;

/// File names probed, first hit wins.
const CONFIG_FILES: [&str; 4] = ["smelt.toml", "smelt.yaml", "smelt.json", ".smelt.toml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Extra default ignore lines, evaluated after the built-in list
    pub ignore_patterns: Vec<String>,

    /// Per-directory ignore file name
    pub ignore_file: String,

    /// Context blob generation
    pub pack: PackConfig,

    /// Proposal parsing and matching
    pub patch: PatchConfig,

    /// Blob extraction
    pub unpack: UnpackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig
{
    pub output_file: String,
    /// Larger files are replaced by a size sentinel
    pub max_file_bytes: u64,
    /// Model or tiktoken encoding used for token estimates
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig
{
    /// SEARCH texts above this size skip fuzzy matching
    pub fuzzy_max_bytes: usize,
    pub syntax: SyntaxChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackConfig
{
    pub output_dir: String,
    /// Drop the project directory from extracted paths
    pub strip_root: bool,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            ignore_patterns: Vec::new(),
            ignore_file: ".gitignore".to_string(),
            pack: PackConfig::default(),
            patch: PatchConfig::default(),
            unpack: UnpackConfig::default(),
        }
    }
}

impl Default for PackConfig
{
    fn default() -> Self
    {
        Self {
            output_file: "context.md".to_string(),
            max_file_bytes: 1024 * 1024,
            model: "o200k_base".to_string(),
        }
    }
}

impl Default for PatchConfig
{
    fn default() -> Self
    {
        Self {
            fuzzy_max_bytes: DEFAULT_FUZZY_MAX_BYTES,
            syntax: SyntaxChoice::Auto,
        }
    }
}

impl Default for UnpackConfig
{
    fn default() -> Self
    {
        Self {
            output_dir: "restored".to_string(),
            strip_root: true,
        }
    }
}

/// Load configuration from the working directory plus `SMELT_*` variables.
pub fn load_config() -> Result<Config>
{
    load_config_in(Path::new("."))
}

/// Load configuration from the first config file found in `dir`, then
/// layer `SMELT_*` environment variables (`__` separates nested keys,
/// e.g. `SMELT_PACK__MAX_FILE_BYTES`).
pub fn load_config_in(dir: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    if let Some(found) = CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
    {
        tracing::debug!(path = %found.display(), "using config file");
        builder = builder.add_source(config::File::from(found.as_path()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SMELT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let toml_string =
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")?;

    if ctx.dry_run
    {
        if !ctx.quiet
        {
            println!("Would write {}:\n{toml_string}", config_path.display());
        }
        return Ok(());
    }

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
