use crate::constants::files;
use crate::errors::DiscoveryError;
use crate::model::{is_valid_slug, DataRequirement, Diagnostic, Provider};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything discovery found: the providers that loaded plus the manifests
/// that did not. One broken provider never hides the others.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub providers: Vec<Provider>,
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderManifest {
    slug: String,
    version: String,
    /// Runtime environment prefix, relative to the provider root unless
    /// absolute. Its `bin/` directory is prepended to PATH at execution time.
    env_prefix: Option<PathBuf>,
    #[serde(default)]
    diagnostics: Vec<DiagnosticManifest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiagnosticManifest {
    slug: String,
    #[serde(default)]
    name: Option<String>,
    command: PathBuf,
    requirements: Vec<DataRequirement>,
}

/// Enumerate installed providers under `providers_dir`, one directory per
/// provider with a `provider.toml` manifest. Read-only and idempotent; safe
/// to call once per CLI invocation.
pub fn discover(providers_dir: &Path) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    let entries = match fs::read_dir(providers_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(source) => {
            report.errors.push(DiscoveryError::ManifestIo {
                path: providers_dir.to_path_buf(),
                source,
            });
            return report;
        }
    };

    let mut manifest_paths: Vec<(PathBuf, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|root| {
            let manifest = root.join(files::PROVIDER_MANIFEST);
            manifest.is_file().then_some((root, manifest))
        })
        .collect();

    // Sorted so discovery order never depends on readdir order.
    manifest_paths.sort();

    let mut seen_slugs: HashSet<String> = HashSet::new();
    for (root, manifest_path) in manifest_paths {
        match load_provider(&root, &manifest_path) {
            Ok(provider) => {
                if !seen_slugs.insert(provider.slug.clone()) {
                    report.errors.push(DiscoveryError::DuplicateProvider {
                        slug: provider.slug,
                        path: manifest_path,
                    });
                    continue;
                }
                tracing::debug!(
                    "Discovered provider '{}' with {} diagnostic(s)",
                    provider.slug,
                    provider.diagnostics.len()
                );
                report.providers.push(provider);
            }
            Err(e) => {
                tracing::warn!("Skipping provider at '{}': {}", root.display(), e);
                report.errors.push(e);
            }
        }
    }

    report
}

fn load_provider(root: &Path, manifest_path: &Path) -> Result<Provider, DiscoveryError> {
    let content = fs::read_to_string(manifest_path).map_err(|source| DiscoveryError::ManifestIo {
        path: manifest_path.to_path_buf(),
        source,
    })?;
    let manifest: ProviderManifest =
        toml::from_str(&content).map_err(|source| DiscoveryError::ManifestParse {
            path: manifest_path.to_path_buf(),
            source,
        })?;

    if !is_valid_slug(&manifest.slug) {
        return Err(DiscoveryError::InvalidSlug {
            path: manifest_path.to_path_buf(),
            slug: manifest.slug,
        });
    }

    let mut diagnostic_slugs: HashSet<&str> = HashSet::new();
    for diagnostic in &manifest.diagnostics {
        if !is_valid_slug(&diagnostic.slug) {
            return Err(DiscoveryError::InvalidSlug {
                path: manifest_path.to_path_buf(),
                slug: diagnostic.slug.clone(),
            });
        }
        if !diagnostic_slugs.insert(&diagnostic.slug) {
            return Err(DiscoveryError::DuplicateDiagnostic {
                provider: manifest.slug.clone(),
                diagnostic: diagnostic.slug.clone(),
            });
        }
        if diagnostic.requirements.is_empty() {
            return Err(DiscoveryError::NoRequirements {
                provider: manifest.slug.clone(),
                diagnostic: diagnostic.slug.clone(),
            });
        }
    }

    let env_prefix = manifest.env_prefix.map(|p| {
        if p.is_absolute() {
            p
        } else {
            root.join(p)
        }
    });

    Ok(Provider {
        slug: manifest.slug,
        version: manifest.version,
        root: root.to_path_buf(),
        env_prefix,
        diagnostics: manifest
            .diagnostics
            .into_iter()
            .map(|d| Diagnostic {
                name: d.name.unwrap_or_else(|| d.slug.clone()),
                slug: d.slug,
                command: d.command,
                requirements: d.requirements,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const GOOD_MANIFEST: &str = r#"
slug = "ilamb"
version = "1.2.0"

[[diagnostics]]
slug = "gross-primary-productivity"
command = "bin/gpp"

[[diagnostics.requirements]]
source_type = "cmip6"
group_by = ["source_id", "experiment_id"]

[[diagnostics.requirements.filters]]
facet = "variable_id"
values = ["gpp"]
"#;

    fn install(providers_dir: &Path, dir_name: &str, manifest: &str) {
        let root = providers_dir.join(dir_name);
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(files::PROVIDER_MANIFEST), manifest).unwrap();
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = discover(&dir.path().join("nope"));
        assert!(report.providers.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_discover_single_provider() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "ilamb", GOOD_MANIFEST);

        let report = discover(dir.path());
        assert!(report.errors.is_empty());
        assert_eq!(report.providers.len(), 1);

        let provider = &report.providers[0];
        assert_eq!(provider.slug, "ilamb");
        assert_eq!(provider.diagnostics.len(), 1);
        assert_eq!(
            provider.diagnostics[0].name,
            "gross-primary-productivity",
            "name defaults to the slug"
        );
    }

    #[test]
    fn test_discover_is_partial_on_broken_manifest() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "ilamb", GOOD_MANIFEST);
        install(dir.path(), "broken", "slug = [this is not toml");

        let report = discover(dir.path());
        assert_eq!(report.providers.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0],
            DiscoveryError::ManifestParse { .. }
        ));
    }

    #[test]
    fn test_discover_rejects_invalid_slug() {
        let dir = tempfile::tempdir().unwrap();
        install(
            dir.path(),
            "bad",
            "slug = \"Not_A_Slug\"\nversion = \"0.1.0\"\n",
        );

        let report = discover(dir.path());
        assert!(report.providers.is_empty());
        assert!(matches!(
            report.errors[0],
            DiscoveryError::InvalidSlug { .. }
        ));
    }

    #[test]
    fn test_discover_rejects_diagnostic_without_requirements() {
        let dir = tempfile::tempdir().unwrap();
        install(
            dir.path(),
            "pmp",
            r#"
slug = "pmp"
version = "0.9.0"

[[diagnostics]]
slug = "annual-cycle"
command = "bin/annual-cycle"
requirements = []
"#,
        );

        let report = discover(dir.path());
        assert!(report.providers.is_empty());
        assert!(matches!(
            report.errors[0],
            DiscoveryError::NoRequirements { .. }
        ));
    }

    #[test]
    fn test_discover_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "ilamb", GOOD_MANIFEST);

        let first = discover(dir.path());
        let second = discover(dir.path());
        assert_eq!(first.providers, second.providers);
    }

    #[test]
    fn test_env_prefix_resolves_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        install(
            dir.path(),
            "esmvaltool",
            r#"
slug = "esmvaltool"
version = "2.11.0"
env_prefix = "env"

[[diagnostics]]
slug = "tas-trend"
command = "bin/tas-trend"

[[diagnostics.requirements]]
source_type = "cmip6"
group_by = ["source_id"]
"#,
        );

        let report = discover(dir.path());
        let provider = &report.providers[0];
        assert_eq!(
            provider.env_prefix.as_deref(),
            Some(dir.path().join("esmvaltool").join("env").as_path())
        );
    }
}
