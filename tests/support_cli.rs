use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};

/// Runs the `loadfleet` binary with logging quietened.
///
/// # Errors
///
/// Returns an error if the binary cannot be spawned.
pub fn run_loadfleet<I, S>(args: I, cwd: &Path) -> Result<Output, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = loadfleet_bin()?;
    Command::new(bin)
        .args(args)
        .current_dir(cwd)
        .env("LOADFLEET_LOG", "error")
        .output()
        .map_err(|err| format!("run loadfleet failed: {}", err))
}

/// Writes `content` to `dir/name`, creating parent directories.
///
/// # Errors
///
/// Returns an error if a directory or the file cannot be written.
pub fn write_file(dir: &Path, name: &str, content: &str) -> Result<(), String> {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| format!("mkdir failed: {}", err))?;
    }
    std::fs::write(&path, content).map_err(|err| format!("write failed: {}", err))
}

fn loadfleet_bin() -> Result<String, String> {
    option_env!("CARGO_BIN_EXE_loadfleet").map_or_else(
        || Err("CARGO_BIN_EXE_loadfleet missing at compile time.".to_owned()),
        |path| Ok(path.to_owned()),
    )
}
