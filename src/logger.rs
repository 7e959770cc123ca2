use std::fs::OpenOptions;
use std::io::{ self, Write };
use std::sync::Mutex;
use chrono::Utc;
//  order of log (Debug < Info < Warning < Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl LogLevel {
    fn as_str(&self) -> &str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Append-only detection log. Every line is also echoed to stderr when `echo` is set,
/// so interactive modes (capture, import) show progress without tailing the file.
pub struct Logger {
    file_path: Option<String>,
    file_mutex: Mutex<()>,
    echo: bool,
    min_level: LogLevel,
}

impl Logger {
    pub fn new_with_level(
        file_path: &str,
        echo: bool,
        min_level: LogLevel
    ) -> Result<Self, io::Error> {
        if let Some(dir) = std::path::Path::new(file_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        // ensure file exists
        OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(Logger {
            file_path: Some(file_path.to_string()),
            file_mutex: Mutex::new(()),
            echo,
            min_level,
        })
    }

    /// Logger that writes nowhere. Used by tests and by callers that only need the type.
    pub fn disabled() -> Self {
        Logger {
            file_path: None,
            file_mutex: Mutex::new(()),
            echo: false,
            min_level: LogLevel::Error,
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        (self.file_path.is_some() || self.echo) && level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }

        let _guard = self.file_mutex.lock().unwrap_or_else(|p| p.into_inner());

        let timestamp = Utc::now();
        let formatted_message = format!(
            "[{}] [{}] {}\n",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            level.as_str(),
            message
        );

        if self.echo {
            eprint!("{}", formatted_message);
        }
        if let Some(path) = &self.file_path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(formatted_message.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    pub fn log_fmt(&self, level: LogLevel, args: std::fmt::Arguments) -> Result<(), io::Error> {
        if !self.should_log(level) {
            return Ok(());
        }
        self.log(level, &format!("{}", args))
    }

    pub fn info(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Info, message)
    }
    pub fn warn(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Warning, message)
    }
    pub fn error(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Error, message)
    }
    pub fn debug(&self, message: &str) -> Result<(), io::Error> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Info, args)
    }
    pub fn warn_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Warning, args)
    }
    pub fn error_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Error, args)
    }
    pub fn debug_fmt(&self, args: std::fmt::Arguments) -> Result<(), io::Error> {
        self.log_fmt(LogLevel::Debug, args)
    }
}

#[macro_export]
macro_rules! log_info {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.info_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_warn {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.warn_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_error {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.error_fmt(format_args!($($arg)*))
    };
}
#[macro_export]
macro_rules! log_debug {
    (
        $logger:expr,
        $($arg:tt)*
    ) => {
        $logger.debug_fmt(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn writes_only_at_or_above_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("trigger.log");
        let logger = Logger::new_with_level(path.to_str().unwrap(), false, LogLevel::Info).unwrap();

        logger.debug("hidden").unwrap();
        logger.info("shown").unwrap();
        log_warn!(logger, "distance {:.2}", 0.25).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("hidden"));
        assert!(text.contains("[INFO] shown"));
        assert!(text.contains("[WARN] distance 0.25"));
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = Logger::disabled();
        logger.error("nowhere").unwrap();
    }
}
