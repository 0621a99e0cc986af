//! Log setup for the command line and batch runs

use crate::types::SarResult;
use env_logger::{Builder, Env, Target};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Writes every record to stdout and a processing log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()?;
        self.file.flush()
    }
}

/// Initialise the global logger.
///
/// `level` is the default filter (`RUST_LOG` still wins). Records look like
/// ` INFO (14:02:11): message`.
pub fn init_logging(level: log::LevelFilter, logfile: Option<&Path>) -> SarResult<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            " {} ({}): {}",
            record.level(),
            chrono::Local::now().format("%H:%M:%S"),
            record.args()
        )
    });

    if let Some(path) = logfile {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(TeeWriter { file })));
    } else {
        builder.target(Target::Stdout);
    }

    // a second initialisation (tests, python) keeps the first logger
    let _ = builder.try_init();
    Ok(())
}
