//! End-to-end tests for the CoreDNS compatibility harness.
//!
//! Most tests here provision a real cluster and are `#[ignore]`d by default.
//! They need `k3d`, `docker`, `kubectl` and the mesh binary on `PATH`
//! (or set through `K3D_BIN`, `KUBECTL_BIN` and `MESH_BINARY`):
//!
//! ```text
//! cargo test -p claw-dnscompat-e2e -- --ignored --test-threads=1
//! ```

#![cfg(test)]
