use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown resource '{0}': must be one of users, articles, comments")]
    UnknownResource(String),
}
