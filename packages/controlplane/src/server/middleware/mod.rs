pub mod worker_auth;

pub use worker_auth::*;
