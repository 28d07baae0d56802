use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CMIP6_REQUIREMENTS: &str = r#"
[[diagnostics.requirements]]
source_type = "cmip6"
group_by = ["source_id", "experiment_id"]

[[diagnostics.requirements.filters]]
facet = "variable_id"
values = ["tas"]
"#;

/// One diagnostic of a fake provider: a shell script body plus the TOML of
/// its data requirements.
pub struct FakeDiagnostic {
    pub slug: String,
    pub script: String,
    pub requirements: String,
}

impl FakeDiagnostic {
    /// Diagnostic needing one cmip6 `tas` dataset per (model, experiment).
    pub fn new(slug: &str, script: &str) -> Self {
        Self {
            slug: slug.to_string(),
            script: script.to_string(),
            requirements: DEFAULT_CMIP6_REQUIREMENTS.to_string(),
        }
    }

    pub fn with_requirements(slug: &str, script: &str, requirements: &str) -> Self {
        Self {
            slug: slug.to_string(),
            script: script.to_string(),
            requirements: requirements.to_string(),
        }
    }
}

/// Isolated workspace for tests: config, data, providers, output and sample
/// dataset directories under one temp dir, with a config.toml wired up.
pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub root: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub providers_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sample_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("cref-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let config_dir = root.join("config");
        let data_dir = root.join("data");
        let providers_dir = root.join("providers");
        let output_dir = root.join("executions");
        let sample_dir = root.join("sample-data");
        for dir in [
            &config_dir,
            &data_dir,
            &providers_dir,
            &output_dir,
            &sample_dir,
        ] {
            fs::create_dir_all(dir).expect("Failed to create harness dir");
        }

        let harness = Self {
            _temp_dir: temp_dir,
            root,
            config_dir,
            data_dir,
            providers_dir,
            output_dir,
            sample_dir,
        };
        harness.write_config("");
        harness
    }

    fn write_config(&self, extra: &str) {
        let content = format!(
            r#"[paths]
data_dir = "{}"
providers_dir = "{}"
output_dir = "{}"

[executor]
concurrency = 2
grace_period_secs = 1
{}"#,
            self.data_dir.display(),
            self.providers_dir.display(),
            self.output_dir.display(),
            extra
        );
        fs::write(self.config_dir.join("config.toml"), content)
            .expect("Failed to write harness config");
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("cref.db")
    }

    /// Install a fake provider: a provider.toml manifest plus one executable
    /// shell script per diagnostic under `bin/`.
    pub fn install_provider(&self, slug: &str, version: &str, diagnostics: &[FakeDiagnostic]) {
        let provider_root = self.providers_dir.join(slug);
        let bin_dir = provider_root.join("bin");
        fs::create_dir_all(&bin_dir).expect("Failed to create provider bin dir");

        let mut manifest = format!("slug = \"{slug}\"\nversion = \"{version}\"\n");
        for diagnostic in diagnostics {
            let script_path = bin_dir.join(&diagnostic.slug);
            fs::write(&script_path, format!("#!/bin/sh\n{}\n", diagnostic.script))
                .expect("Failed to write diagnostic script");
            let mut perms = fs::metadata(&script_path)
                .expect("Failed to stat diagnostic script")
                .permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)
                .expect("Failed to chmod diagnostic script");

            manifest.push_str(&format!(
                "\n[[diagnostics]]\nslug = \"{}\"\ncommand = \"bin/{}\"\n{}",
                diagnostic.slug, diagnostic.slug, diagnostic.requirements
            ));
        }
        fs::write(provider_root.join("provider.toml"), manifest)
            .expect("Failed to write provider manifest");
    }

    /// Corrupt provider for discovery-partiality tests.
    pub fn install_broken_provider(&self, slug: &str) {
        let provider_root = self.providers_dir.join(slug);
        fs::create_dir_all(&provider_root).expect("Failed to create provider dir");
        fs::write(provider_root.join("provider.toml"), "slug = [not valid toml")
            .expect("Failed to write broken manifest");
    }

    fn write_sidecar(&self, subdir: &str, name: &str, facets: &[(&str, &str)]) -> PathBuf {
        let dir = self.sample_dir.join(subdir);
        fs::create_dir_all(&dir).expect("Failed to create dataset dir");
        let map: BTreeMap<&str, &str> = facets.iter().copied().collect();
        let path = dir.join(format!("{name}.json"));
        fs::write(
            &path,
            serde_json::to_string_pretty(&map).expect("Failed to serialize facets"),
        )
        .expect("Failed to write dataset sidecar");
        path
    }

    pub fn write_cmip6_dataset(
        &self,
        source_id: &str,
        experiment_id: &str,
        variable_id: &str,
    ) -> PathBuf {
        let name = format!("{source_id}_{experiment_id}_{variable_id}.nc");
        self.write_sidecar(
            "CMIP6",
            &name,
            &[
                ("activity_id", "CMIP"),
                ("source_id", source_id),
                ("experiment_id", experiment_id),
                ("variant_label", "r1i1p1f1"),
                ("table_id", "Amon"),
                ("variable_id", variable_id),
                ("grid_label", "gn"),
            ],
        )
    }

    pub fn write_obs4mips_dataset(&self, source_id: &str, variable_id: &str) -> PathBuf {
        let name = format!("{source_id}_{variable_id}.nc");
        self.write_sidecar(
            "obs4REF",
            &name,
            &[
                ("institution_id", "NASA-JPL"),
                ("source_id", source_id),
                ("variable_id", variable_id),
            ],
        )
    }

    pub fn write_pmp_climatology_dataset(&self, source_id: &str, variable_id: &str) -> PathBuf {
        let name = format!("{source_id}_{variable_id}.nc");
        self.write_sidecar(
            "pmp-climatology",
            &name,
            &[
                ("source_id", source_id),
                ("variable_id", variable_id),
                ("period", "1981-2010"),
            ],
        )
    }

    /// Create a fetchable registry bundle and wire it into config.toml.
    pub fn add_registry(&self, name: &str, files: &[(&str, &str)]) {
        let source = self.root.join("registries").join(name);
        fs::create_dir_all(&source).expect("Failed to create registry dir");

        let mut manifest = String::new();
        for (file_name, content) in files {
            fs::write(source.join(file_name), content).expect("Failed to write registry file");
            manifest.push_str(&format!(
                "[[files]]\npath = \"{}\"\nsha256 = \"{}\"\n\n",
                file_name,
                sha256_hex(content.as_bytes())
            ));
        }
        fs::write(source.join("manifest.toml"), manifest)
            .expect("Failed to write registry manifest");

        let extra = format!(
            "\n[registries.{}]\nsource = \"{}\"\nmanifest = \"manifest.toml\"\n",
            name,
            source.display()
        );
        self.write_config(&extra);
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn read_to_string(path: &Path) -> String {
    fs::read_to_string(path).expect("Failed to read file")
}
