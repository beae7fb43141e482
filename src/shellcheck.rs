//! Run `shellcheck` and turn its output into a readable report.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::Result;

/// Run shellcheck on `files`. An empty report means no issues.
pub fn run_shellcheck<R: CommandRunner + ?Sized, S: AsRef<str>>(
    runner: &R,
    files: &[S],
    verbose: bool,
) -> Result<String> {
    let invocation = Invocation::new("shellcheck").args(files.iter().map(|f| f.as_ref()));
    if verbose {
        eprintln!("Running following command:\n{}", invocation.display());
    }
    let output = runner.run(&invocation)?;
    if output.success() {
        return Ok(String::new());
    }

    let code = output
        .code
        .map_or_else(|| "signal".to_string(), |code| code.to_string());
    let mut messages = Vec::new();
    if !output.stderr.is_empty() {
        messages.push(format!(
            "shellcheck exited with code {} and has unexpected output on stderr:\n{}",
            code,
            output.stderr_text().trim_end()
        ));
    }
    if !output.stdout.is_empty() {
        messages.push(format!(
            "shellcheck found issues:\n{}",
            output.stdout_text().trim_end()
        ));
    }
    if messages.is_empty() {
        messages.push(format!(
            "shellcheck exited with code {} and has no output on stdout or stderr.",
            code
        ));
    }
    Ok(messages.join("\n"))
}

/// Print the report; returns 1 when there is one.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, files: &[String], verbose: bool) -> Result<i32> {
    let report = run_shellcheck(runner, files, verbose)?;
    if report.is_empty() {
        Ok(0)
    } else {
        println!("{}", report);
        Ok(1)
    }
}
