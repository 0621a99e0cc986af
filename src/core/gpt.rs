//! Invocation of SNAP's graph processing tool and other command line tools

use crate::types::{SarError, SarResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

/// Attempts made by every processing step before giving up
pub const STEP_ATTEMPTS: usize = 3;

fn gpt_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".ost").join("gpt"));
        paths.push(home.join("snap").join("bin").join("gpt"));
        paths.push(home.join("programs").join("snap").join("bin").join("gpt"));
    }
    for p in [
        "/home/ost/programs/snap/bin/gpt",
        "/usr/bin/gpt",
        "/opt/snap/bin/gpt",
        "/usr/local/snap/bin/gpt",
        "/usr/local/lib/snap/bin/gpt",
        "/usr/programs/snap/bin/gpt",
        "/Applications/snap/bin/gpt",
    ] {
        paths.push(PathBuf::from(p));
    }
    paths
}

/// Search `PATH` for an executable
pub fn which<S: AsRef<OsStr>>(name: S) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name.as_ref()))
        .find(|candidate| candidate.is_file())
}

/// Locate the gpt executable.
///
/// Well known install locations are tried first, then `GPT_PATH`, then `PATH`.
pub fn locate_gpt() -> SarResult<PathBuf> {
    if let Some(found) = gpt_candidates().into_iter().find(|p| p.exists()) {
        log::debug!("Using gpt at {}", found.display());
        return Ok(found);
    }

    if let Ok(env_path) = std::env::var("GPT_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        log::warn!("GPT_PATH points to {} which does not exist", path.display());
    }

    which("gpt").ok_or_else(|| {
        SarError::Config(
            "SNAP gpt executable not found. Install SNAP or set GPT_PATH".to_string(),
        )
    })
}

/// The gpt executable plus the parallelism handed to `-q`
#[derive(Debug, Clone)]
pub struct Gpt {
    pub executable: PathBuf,
    pub cpus: usize,
}

impl Gpt {
    pub fn new<P: AsRef<Path>>(executable: P, cpus: usize) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            cpus: cpus.max(1),
        }
    }

    pub fn locate(cpus: usize) -> SarResult<Self> {
        Ok(Self::new(locate_gpt()?, cpus))
    }

    /// Command for a single SNAP operator
    pub fn operator(&self, name: &str) -> GptCommand {
        GptCommand::new(&self.executable, name.to_string(), 2 * self.cpus)
    }

    /// Command for a graph XML file
    pub fn graph(&self, graph: &Path) -> GptCommand {
        GptCommand::new(&self.executable, graph.to_string_lossy().into_owned(), 2 * self.cpus)
    }
}

/// A gpt call built up from parameters, sources and a target
#[derive(Debug, Clone, PartialEq)]
pub struct GptCommand {
    pub executable: PathBuf,
    pub operator: String,
    pub parallelism: usize,
    pub params: Vec<(String, String)>,
    pub named_sources: Vec<(String, PathBuf)>,
    pub target: Option<PathBuf>,
    pub sources: Vec<PathBuf>,
}

impl GptCommand {
    fn new(executable: &Path, operator: String, parallelism: usize) -> Self {
        Self {
            executable: executable.to_path_buf(),
            operator,
            parallelism,
            params: Vec::new(),
            named_sources: Vec::new(),
            target: None,
            sources: Vec::new(),
        }
    }

    pub fn param<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param_path(self, key: &str, value: &Path) -> Self {
        let value = value.to_string_lossy().into_owned();
        self.param(key, value)
    }

    pub fn target<P: AsRef<Path>>(mut self, target: P) -> Self {
        self.target = Some(target.as_ref().to_path_buf());
        self
    }

    /// Source passed as `-S<key>=<path>`
    pub fn named_source<P: AsRef<Path>>(mut self, key: &str, source: P) -> Self {
        self.named_sources.push((key.to_string(), source.as_ref().to_path_buf()));
        self
    }

    pub fn source<P: AsRef<Path>>(mut self, source: P) -> Self {
        self.sources.push(source.as_ref().to_path_buf());
        self
    }

    /// Value of a parameter, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Argument vector, `<op> -x -q N -Pk=v ... -Sk=path ... [-t target] [sources]`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.operator.clone(),
            "-x".to_string(),
            "-q".to_string(),
            self.parallelism.to_string(),
        ];
        for (key, value) in &self.params {
            args.push(format!("-P{}={}", key, value));
        }
        for (key, source) in &self.named_sources {
            args.push(format!("-S{}={}", key, source.display()));
        }
        if let Some(target) = &self.target {
            args.push("-t".to_string());
            args.push(target.to_string_lossy().into_owned());
        }
        for source in &self.sources {
            args.push(source.to_string_lossy().into_owned());
        }
        args
    }

    /// Run once, mapping a non-zero exit to [`SarError::GptRuntime`]
    pub fn run(&self, step: &str, logfile: &Path) -> SarResult<()> {
        let code = run_command(&self.executable, &self.args(), logfile)?;
        if code != 0 {
            return Err(SarError::GptRuntime {
                step: step.to_string(),
                code,
                logfile: logfile.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Run an external program, writing its output to `logfile` when it fails.
///
/// Returns the exit code (`-1` when killed by a signal).
pub fn run_command<S: AsRef<OsStr>>(program: S, args: &[String], logfile: &Path) -> SarResult<i32> {
    let program = program.as_ref();
    log::debug!("Running {} {}", program.to_string_lossy(), args.join(" "));

    let start = Instant::now();
    let output = Command::new(program).args(args).output().map_err(|e| {
        SarError::Processing(format!("Failed to start {}: {}", program.to_string_lossy(), e))
    })?;
    let code = output.status.code().unwrap_or(-1);

    log::debug!(
        "{} finished with code {} after {:.1}s",
        program.to_string_lossy(),
        code,
        start.elapsed().as_secs_f64()
    );

    if code != 0 {
        if let Some(parent) = logfile.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut log_content = output.stderr;
        log_content.extend_from_slice(&output.stdout);
        std::fs::write(logfile, log_content)?;
    }

    Ok(code)
}

/// Retry `f` up to `attempts` times, sleeping `wait` between attempts
pub fn with_retries<T, F>(step: &str, attempts: usize, wait: Duration, mut f: F) -> SarResult<T>
where
    F: FnMut() -> SarResult<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                log::warn!("{} failed (attempt {} of {}): {}", step, attempt, attempts, e);
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_arguments_are_ordered() {
        let gpt = Gpt::new("/opt/snap/bin/gpt", 4);
        let cmd = gpt
            .operator("Multilook")
            .param("nAzLooks", 2)
            .param("nRgLooks", 2)
            .target("/tmp/out.ml")
            .source("/tmp/in.dim");

        assert_eq!(
            cmd.args(),
            vec!["Multilook", "-x", "-q", "8", "-PnAzLooks=2", "-PnRgLooks=2", "-t", "/tmp/out.ml", "/tmp/in.dim"]
        );
        assert_eq!(cmd.get("nRgLooks"), Some("2"));
    }

    #[test]
    fn values_are_not_shell_quoted() {
        let gpt = Gpt::new("gpt", 1);
        let cmd = gpt.operator("Subset").param("geoRegion", "POLYGON ((1 2, 3 4))");
        assert_eq!(cmd.args()[4], "-PgeoRegion=POLYGON ((1 2, 3 4))");
    }

    #[test]
    fn named_sources_follow_parameters() {
        let gpt = Gpt::new("gpt", 1);
        let cmd = gpt
            .operator("Subset")
            .param("copyMetadata", true)
            .named_source("source", "/tmp/in.dim")
            .target("/tmp/out");
        assert_eq!(
            cmd.args()[4..],
            ["-PcopyMetadata=true", "-Ssource=/tmp/in.dim", "-t", "/tmp/out"]
        );
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = with_retries("step", 3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(SarError::Processing("boom".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_attempts() {
        let mut calls = 0;
        let result: SarResult<()> = with_retries("step", 2, Duration::from_millis(1), || {
            calls += 1;
            Err(SarError::Processing("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_writes_logfile() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("step.errLog");
        let code = run_command("sh", &["-c".to_string(), "echo broken >&2; exit 3".to_string()], &log).unwrap();
        assert_eq!(code, 3);
        assert!(std::fs::read_to_string(&log).unwrap().contains("broken"));

        let ok_log = dir.path().join("ok.errLog");
        assert_eq!(run_command("true", &[], &ok_log).unwrap(), 0);
        assert!(!ok_log.exists());
    }
}
