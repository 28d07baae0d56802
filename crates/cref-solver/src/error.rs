use thiserror::Error;

/// Failures constructing or persisting a solve session. Deadline expiry and
/// per-group execution failures are reported in the `SessionReport`, never
/// raised from `solve`.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error(transparent)]
    Db(#[from] cref_db::DbError),

    #[error("No diagnostic providers available; cannot construct a solve session.")]
    NoProviders,
}

pub type Result<T> = std::result::Result<T, SolverError>;
