pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unable to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("block stream closed: {0}")]
    Disconnected(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid item count {0:?}")]
    InvalidTotal(String),
}
