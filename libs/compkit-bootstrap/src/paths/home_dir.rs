use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("APPDATA environment variable is not set")]
    AppDataMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(target_os = "windows")]
fn user_home() -> Result<PathBuf, HomeDirError> {
    env::var("USERPROFILE")
        .or_else(|_| env::var("HOME"))
        .map(PathBuf::from)
        .map_err(|_| HomeDirError::HomeMissing)
}

#[cfg(not(target_os = "windows"))]
fn user_home() -> Result<PathBuf, HomeDirError> {
    env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| HomeDirError::HomeMissing)
}

#[cfg(target_os = "windows")]
fn default_base() -> Result<PathBuf, HomeDirError> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .map_err(|_| HomeDirError::AppDataMissing)
}

#[cfg(not(target_os = "windows"))]
fn default_base() -> Result<PathBuf, HomeDirError> {
    user_home()
}

/// Expand a leading `~` to the user home.
fn expand_tilde(raw: &str) -> Result<PathBuf, HomeDirError> {
    if raw == "~" {
        return user_home();
    }
    match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        Some(rest) => Ok(user_home()?.join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Normalize and resolve the runtime home directory.
///
/// Rules:
/// - If `config_home` is provided, a leading `~` is expanded and the result
///   must be absolute.
/// - Otherwise `<base>/<default_subdir>` is used, where `<base>` is `%APPDATA%`
///   on Windows and `$HOME` elsewhere.
///
/// If `create` is true, the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = expand_tilde(&raw)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into(),
                ));
            }
            expanded
        }
        None => Path::new(&default_base()?).join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}
