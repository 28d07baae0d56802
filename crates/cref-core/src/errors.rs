use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("XDG Base Directory Error: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Config file not found at '{0}'.\nRun with --config pointing at a directory containing config.toml, or create one in the default location.")]
    ConfigNotFound(PathBuf),

    #[error("Unknown data registry '{name}'.\nAvailable registries: {}", available.join(", "))]
    UnknownRegistry {
        name: String,
        available: Vec<String>,
    },
}

/// A single provider manifest that could not be loaded. Discovery collects
/// these instead of aborting, so one broken provider never hides the rest.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to read provider manifest '{path}': {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse provider manifest '{path}': {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Provider manifest '{path}' declares invalid slug '{slug}'. Slugs must match [a-z0-9][a-z0-9-]*.")]
    InvalidSlug { path: PathBuf, slug: String },

    #[error("Provider '{provider}' declares duplicate diagnostic slug '{diagnostic}'.")]
    DuplicateDiagnostic { provider: String, diagnostic: String },

    #[error("Provider '{slug}' is declared more than once (second manifest at '{path}').")]
    DuplicateProvider { slug: String, path: PathBuf },

    #[error("Diagnostic '{diagnostic}' of provider '{provider}' declares no requirements.")]
    NoRequirements { provider: String, diagnostic: String },
}

/// A diagnostic whose declared data requirement cannot be evaluated. The
/// solver skips the diagnostic and keeps the session going.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Diagnostic '{diagnostic}' has a requirement with an empty group_by list.")]
    EmptyGroupBy { diagnostic: String },

    #[error("Diagnostic '{diagnostic}' filters on facet '{facet}' with no accepted values.")]
    EmptyFilterValues { diagnostic: String, facet: String },

    #[error("Diagnostic '{diagnostic}' groups by facet '{facet}' which is not a known facet of source type '{source_type}'.")]
    UnknownGroupFacet {
        diagnostic: String,
        facet: String,
        source_type: String,
    },
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Provider '{0}' is not installed.")]
    ProviderNotFound(String),

    #[error("Diagnostic '{diagnostic}' not found in provider '{provider}'.")]
    DiagnosticNotFound { provider: String, diagnostic: String },

    #[error("Execution group {0} does not exist.")]
    GroupNotFound(i64),

    #[error("No diagnostic providers are installed under '{0}'.\nInstall at least one provider, or point paths.providers_dir at an existing installation.")]
    NoProviders(PathBuf),
}
