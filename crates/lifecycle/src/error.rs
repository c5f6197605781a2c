use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record source error: {0}")]
    RecordSource(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}
