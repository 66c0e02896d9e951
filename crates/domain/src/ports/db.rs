use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store rejected probe: {0}")]
    Rejected(String),
}

pub trait StoreProbe: Send + Sync {
    fn backend(&self) -> &'static str;
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
