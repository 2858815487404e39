//! End-to-end acquisition tests.

mod kcore;
mod lifecycle;
mod physical;
mod probe;
