mod harness;

pub use harness::{
    read_to_string, sha256_hex, FakeDiagnostic, TestContext, DEFAULT_CMIP6_REQUIREMENTS,
};
