use std::fs::File;
use std::path::{Path, PathBuf};

use simplelog::{Config, LevelFilter, WriteLogger};

/// Default log file location: `<config dir>/stagepatch/stagepatch.log`.
pub fn default_log_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagepatch")
        .join("stagepatch.log")
}

/// Install a file logger. Debug when verbose, warnings only otherwise.
///
/// Falls back to the temp dir if `path` can't be created. Returns false if
/// no log file could be opened or a logger was already installed.
pub fn init_logging(verbose: bool, path: &Path) -> bool {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(path)
        .or_else(|_| File::create(std::env::temp_dir().join("stagepatch.log")))
    {
        Ok(f) => f,
        Err(_) => return false,
    };

    if WriteLogger::init(log_level, Config::default(), log_file).is_err() {
        return false;
    }

    log::info!("stagepatch starting (log level: {:?})", log_level);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("stagepatch.log");
        init_logging(true, &path);
        assert!(path.exists());
    }
}
