pub mod broadcast;
pub mod codec;
pub mod health;
pub mod hub;
pub mod interest;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transport;
