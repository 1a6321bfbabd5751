use std::path::PathBuf;

use directories::ProjectDirs;

const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "sitesmith";
const APP_NAME: &str = "sitesmith";
const USERS_FILENAME: &str = "users.txt";
const SANDBOX_DIRNAME: &str = "sandbox";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not resolve user data directory")]
    MissingUserDataDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// App-local user data directory.
pub fn user_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .ok_or(Error::MissingUserDataDir)?;
    Ok(dirs.data_local_dir().to_path_buf())
}

pub fn ensure_user_data_dir() -> Result<PathBuf> {
    let dir = user_data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Default location of the credential store.
pub fn users_file_path() -> Result<PathBuf> {
    Ok(ensure_user_data_dir()?.join(USERS_FILENAME))
}

/// Default project directory the local sandbox mounts into.
pub fn sandbox_dir() -> Result<PathBuf> {
    let dir = ensure_user_data_dir()?.join(SANDBOX_DIRNAME);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
