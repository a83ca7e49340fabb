pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("intake returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{failed} of {total} series rejected")]
    Rejected { failed: usize, total: usize },

    #[error("metrics sink unavailable: {0}")]
    Unavailable(String),
}
