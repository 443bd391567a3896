//! Service-side glue between the IPC server and the cache.

pub mod handler;
