use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::error::Result;

/// A text record of one launch: when it started, what it was given, when it ended.
#[derive(Debug)]
pub struct LaunchLog {
    path: PathBuf,
}

impl LaunchLog {
    /// Writes a new launch log into `dir`, next to any earlier ones.
    ///
    /// # Arguments
    /// * `dir` - The session's save path.
    /// * `regime` - The kind of launch, e.g. `train`.
    /// * `build` - Parameters the execution context was built with.
    /// * `user` - The overrides given by the operator.
    /// * `defaults` - The defaults the overrides were resolved against.
    ///
    /// # Errors
    /// Returns an io error if the file cannot be written.
    pub fn create(
        dir: &Path,
        regime: &str,
        build: &Value,
        user: &Value,
        defaults: &Value,
    ) -> Result<Self> {
        let path = free_path(dir);
        let mut file = File::create(&path)?;

        writeln!(file, "launch time: {}", chrono::Utc::now().to_rfc3339())?;
        writeln!(file, "launch regime: {regime}")?;
        for (title, params) in [
            ("build parameters", build),
            ("user specified parameters", user),
            ("default parameters", defaults),
        ] {
            writeln!(file, "{title}:")?;
            writeln!(file, "{}", serde_json::to_string_pretty(params)?)?;
        }

        log::info!("launch logged to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the finish time.
    ///
    /// # Errors
    /// Returns an io error if the file cannot be appended to.
    pub fn finish(&self) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "finish time: {}", chrono::Utc::now().to_rfc3339())?;
        Ok(())
    }
}

/// `launch_log.txt`, or `launch_log#<n>.txt` with the first free `n`.
fn free_path(dir: &Path) -> PathBuf {
    let first = dir.join("launch_log.txt");
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("launch_log#{n}.txt")))
        .find(|path| !path.exists())
        .unwrap_or(first)
}
