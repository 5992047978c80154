use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ChronoParse(#[from] chrono::ParseError),
    #[error("{0}")]
    StoreReadonly(String),
    #[error("Invalid retain group {0:?}")]
    InvalidRetainGroup(String),
    #[error("Backup name {name:?} does not match date format {format:?}")]
    MalformedBackupName { name: String, format: String },
    #[error("Sync command `{command}` failed with {}", describe_exit_code(.code))]
    SyncFailed { command: String, code: Option<i32> },
    #[error("Hook command `{command}` failed with {}", describe_exit_code(.code))]
    HookFailed { command: String, code: Option<i32> },
    #[error("Another backuproll process{} is still running", describe_pid(.pid))]
    LockHeld { pid: Option<i32> },
    #[error("Process lock {0:?} wasn't locked in the first place")]
    NotLocked(PathBuf),
    #[error("Can't finalize an already finalized backup {0:?}")]
    AlreadyFinalized(String),
    #[error("Collection {0:?} not found")]
    CollectionNotFound(String),
    #[error("No backup found: {0}")]
    BackupNotFound(String),
    #[error("Can't resize buffer to {requested} bytes while {buffered} bytes are buffered")]
    BufferResize { requested: usize, buffered: usize },
    #[error("Archive stream was aborted")]
    ArchiveAborted,
    #[error("Choice {index} is not one of the {count} menu items")]
    InvalidSelection { index: usize, count: usize },
    #[error("{0}")]
    Config(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

/// Fieldless view of [`Error`] so callers can branch on what went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    StoreReadonly,
    InvalidRetainGroup,
    MalformedBackupName,
    SyncFailed,
    HookFailed,
    LockHeld,
    NotLocked,
    AlreadyFinalized,
    CollectionNotFound,
    BackupNotFound,
    BufferResize,
    ArchiveAborted,
    InvalidSelection,
    Config,
    Multiple,
}

fn describe_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn describe_pid(pid: &Option<i32>) -> String {
    match pid {
        Some(pid) => format!(" with PID {pid}"),
        None => String::new(),
    }
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::WalkDir(_) => ErrorKind::Io,
            Error::SerdeJson(_) | Error::SerdeYml(_) | Error::ChronoParse(_) => ErrorKind::Parse,
            Error::ValidationError(_) | Error::Config(_) => ErrorKind::Config,
            Error::StoreReadonly(_) => ErrorKind::StoreReadonly,
            Error::InvalidRetainGroup(_) => ErrorKind::InvalidRetainGroup,
            Error::MalformedBackupName { .. } => ErrorKind::MalformedBackupName,
            Error::SyncFailed { .. } => ErrorKind::SyncFailed,
            Error::HookFailed { .. } => ErrorKind::HookFailed,
            Error::LockHeld { .. } => ErrorKind::LockHeld,
            Error::NotLocked(_) => ErrorKind::NotLocked,
            Error::AlreadyFinalized(_) => ErrorKind::AlreadyFinalized,
            Error::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
            Error::BackupNotFound(_) => ErrorKind::BackupNotFound,
            Error::BufferResize { .. } => ErrorKind::BufferResize,
            Error::ArchiveAborted => ErrorKind::ArchiveAborted,
            Error::InvalidSelection { .. } => ErrorKind::InvalidSelection,
            Error::WithMsg { error, .. } => error.kind(),
            Error::WithDebugObjAndFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => match errors.as_slice() {
                [single] => single.kind(),
                _ => ErrorKind::Multiple,
            },
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
        assert_eq!(Error::from(std::io::Error::other("x")).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_with_msg() {
        let error = Error::StoreReadonly("Store is readonly".into());
        let error_with_msg = error.with_msg("Custom message");

        match &error_with_msg {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
        assert_eq!(error_with_msg.kind(), ErrorKind::StoreReadonly);
    }

    #[test]
    fn test_error_with_debug_object_and_fn_name() {
        let error = Error::InvalidRetainGroup("hourly".into());
        let error_with_debug = error.with_debug_object_and_fn_name("test_object", "test_function");

        match &error_with_debug {
            Error::WithDebugObjAndFnName { fn_name, .. } => assert_eq!(fn_name, "test_function"),
            _ => panic!("Expected WithDebugObjAndFnName error"),
        }
        assert_eq!(error_with_debug.kind(), ErrorKind::InvalidRetainGroup);
    }

    #[test]
    fn test_error_chain() {
        let error1 = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "error1"));
        let error2 = Error::LockHeld { pid: Some(42) };

        let chained = error1.chain(error2);
        match &chained {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
        assert_eq!(chained.kind(), ErrorKind::Multiple);
        assert_eq!(chained.into_iter().count(), 2);
    }

    #[test]
    fn test_sync_failed_display() {
        let error = Error::SyncFailed {
            command: "rsync -a src dst".into(),
            code: Some(23),
        };
        let error_str = error.to_string();
        assert!(error_str.contains("rsync -a src dst"));
        assert!(error_str.contains("exit code 23"));

        let error = Error::HookFailed {
            command: "stop".into(),
            code: None,
        };
        assert!(error.to_string().contains("signal"));
    }

    #[test]
    fn test_lock_held_display() {
        assert!(Error::LockHeld { pid: Some(1234) }
            .to_string()
            .contains("PID 1234"));
        assert_eq!(
            Error::LockHeld { pid: None }.to_string(),
            "Another backuproll process is still running"
        );
    }

    #[test]
    fn test_error_with_msg_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error_with_msg = Error::from(io_error).with_msg("Operation failed");
        let error_str = error_with_msg.to_string();

        assert!(error_str.contains("Operation failed"));
        assert!(error_str.contains("  file not found"));
    }
}
