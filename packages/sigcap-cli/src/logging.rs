use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Optional log file that receives a copy of everything written to stderr.
///
/// The logger is installed before the session directory is known, so the
/// file is attached later with [`LogFile::open`].
#[derive(Clone, Default)]
pub struct LogFile {
    file: Arc<Mutex<Option<File>>>,
}

impl LogFile {
    /// Start copying log output to `path`, creating parent directories.
    pub fn open(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock() = Some(file);
        Ok(())
    }
}

struct Tee {
    file: LogFile,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.file.lock().as_mut() {
            // stderr stays authoritative; log file errors are dropped
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.file.lock().as_mut() {
            let _ = file.flush();
        }
        io::stderr().flush()
    }
}

/// Install the global logger. `RUST_LOG` overrides the verbosity flag.
pub fn init(verbose: u8) -> LogFile {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let file = LogFile::default();
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::default())
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(Tee { file: file.clone() })))
        .init();
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tee_copies_output_once_file_is_attached() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("session.log");
        let file = LogFile::default();
        let mut tee = Tee { file: file.clone() };

        tee.write_all(b"before\n").unwrap();
        file.open(&path).unwrap();
        tee.write_all(b"after\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    }
}
