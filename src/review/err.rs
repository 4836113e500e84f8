#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("access review request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("access review for {0} returned no status")]
    MissingStatus(String),
}
