use cref_core::constants::dirs;
use std::path::{Path, PathBuf};
use tokio::process::Command as TokioCommand;

/// How a provider's diagnostics are run: directly on the host PATH, or with
/// a provider-managed environment prefix whose `bin/` shadows the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEnv {
    Native,
    Prefix(PathBuf),
}

impl RuntimeEnv {
    pub fn from_prefix(prefix: Option<PathBuf>) -> Self {
        match prefix {
            Some(path) => RuntimeEnv::Prefix(path),
            None => RuntimeEnv::Native,
        }
    }

    /// Build the command for a diagnostic executable under this runtime.
    pub fn build_command(&self, command: &Path, args: &[String]) -> TokioCommand {
        let mut cmd = TokioCommand::new(command);
        cmd.args(args);

        if let RuntimeEnv::Prefix(prefix) = self {
            let bin_dir = prefix.join(dirs::ENV_BIN);
            if let Some(system_path) = std::env::var_os("PATH") {
                let mut paths = std::env::split_paths(&system_path).collect::<Vec<_>>();
                paths.insert(0, bin_dir);
                if let Ok(new_path) = std::env::join_paths(paths) {
                    cmd.env("PATH", new_path);
                }
            } else {
                cmd.env("PATH", bin_dir);
            }
            cmd.env("CREF_ENV_PREFIX", prefix);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_runtime_leaves_path_alone() {
        let cmd = RuntimeEnv::Native.build_command(Path::new("/bin/true"), &[]);
        let has_path_override = cmd
            .as_std()
            .get_envs()
            .any(|(k, _)| k == std::ffi::OsStr::new("PATH"));
        assert!(!has_path_override);
    }

    #[test]
    fn test_prefix_runtime_prepends_bin() {
        let runtime = RuntimeEnv::Prefix(PathBuf::from("/opt/provider-env"));
        let cmd = runtime.build_command(Path::new("/bin/true"), &[]);
        let path = cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == std::ffi::OsStr::new("PATH"))
            .and_then(|(_, v)| v)
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert!(path.starts_with("/opt/provider-env/bin"));
    }
}
