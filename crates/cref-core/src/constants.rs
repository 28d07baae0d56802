pub mod markers {
    pub const SUCCESS: &str = "SUCCESS";
    pub const FAIL: &str = "FAIL";
}

pub mod logs {
    pub const STDOUT: &str = "stdout.log";
    pub const STDERR: &str = "stderr.log";
}

pub mod files {
    pub const INPUTS: &str = "inputs.json";
    pub const PROVIDER_MANIFEST: &str = "provider.toml";
    pub const DATABASE: &str = "cref.db";
}

pub mod dirs {
    pub const DATA: &str = "data";
    pub const PROVIDERS: &str = "providers";
    pub const EXECUTIONS: &str = "executions";
    pub const ENV_BIN: &str = "bin";
}

/// Facets that must be present on every dataset of a given source type.
/// The identity of a dataset is the joined values of these facets, in this
/// order.
pub mod facets {
    use crate::model::SourceType;

    pub const CMIP6_REQUIRED: &[&str] = &[
        "activity_id",
        "source_id",
        "experiment_id",
        "variant_label",
        "table_id",
        "variable_id",
        "grid_label",
    ];

    pub const OBS4MIPS_REQUIRED: &[&str] = &["institution_id", "source_id", "variable_id"];

    pub const PMP_CLIMATOLOGY_REQUIRED: &[&str] = &["source_id", "variable_id", "period"];

    pub fn required(source_type: SourceType) -> &'static [&'static str] {
        match source_type {
            SourceType::Cmip6 => CMIP6_REQUIRED,
            SourceType::Obs4Mips => OBS4MIPS_REQUIRED,
            SourceType::PmpClimatology => PMP_CLIMATOLOGY_REQUIRED,
        }
    }
}
