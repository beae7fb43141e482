//! Type-safe command argument contracts.
//!
//! Commands with many flags (`apt-get` probes, `ffmpeg`) are described by
//! structs implementing [`CommandArgs`] instead of ad-hoc string vectors, so
//! the argument order lives in exactly one place and can be unit-tested.

use crate::command_runner::Invocation;

/// Trait for typed command arguments.
///
/// # Contract
///
/// - `program()`: the executable name, resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `env_vars()`: environment the program requires. Commands that run
///   inside a schroot get these through `env K=V`, since schroot does not
///   forward arbitrary variables.
pub trait CommandArgs {
    fn program(&self) -> &'static str;

    fn to_cli_args(&self) -> Vec<String>;

    fn env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Full argv, prefixed with `env K=V…` when environment is required.
    fn to_argv(&self) -> Vec<String> {
        let env = self.env_vars();
        let mut argv = Vec::new();
        if !env.is_empty() {
            argv.push("env".to_string());
            argv.extend(env.into_iter().map(|(key, value)| format!("{}={}", key, value)));
        }
        argv.push(self.program().to_string());
        argv.extend(self.to_cli_args());
        argv
    }

    /// Host invocation of this command (environment passed directly).
    fn to_invocation(&self) -> Invocation {
        let mut invocation = Invocation::new(self.program()).args(self.to_cli_args());
        for (key, value) in self.env_vars() {
            invocation = invocation.env(key, value);
        }
        invocation
    }
}
