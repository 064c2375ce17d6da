//! HTTP/1 server connections.
//!
//! This crate operates one connection at a time: accepting transports and
//! spawning tasks is the caller's business. Once a transport is connected,
//! hand it to [`conn::Builder::serve_connection`] together with a
//! [`Service`](crate::service::Service) and await the returned
//! [`conn::Connection`] until the exchange lifecycle on that transport is
//! over.

pub mod conn;
