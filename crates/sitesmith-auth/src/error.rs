#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("username and password are required")]
    MissingFields,

    #[error("username already exists")]
    AlreadyExists,

    #[error("invalid username or password")]
    InvalidCredentials,

    /// The name cannot be stored in the one-line-per-user format.
    #[error("username may not contain commas or line breaks")]
    InvalidUsername,

    #[error("password may not contain line breaks")]
    InvalidPassword,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
