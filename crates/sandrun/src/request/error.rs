#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}
