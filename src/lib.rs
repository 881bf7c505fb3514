//! Purpose: Library crate for chunked stream readers used by the `chunkwise` CLI and tests.
//! Exports: `api` (readers, decoders, registry, errors) and `ingest` (source-driven streaming).
//! Role: Turns arbitrarily split byte chunks into typed records plus discovered entities.
//! Invariants: `api` is the only public path to the core modules.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
pub mod ingest;
