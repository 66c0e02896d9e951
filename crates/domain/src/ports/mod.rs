use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod auth;
pub mod chat;
pub mod db;
pub mod messages;
pub mod users;
