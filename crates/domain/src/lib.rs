pub mod chat;
pub mod error;
pub mod identity;
pub mod messages;
pub mod ports;
pub mod users;
pub mod util;

#[cfg(test)]
mod testing;

pub type DomainResult<T> = Result<T, error::DomainError>;
