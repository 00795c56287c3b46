//! Startup utilities for the Tofan operator

mod crds;

pub use crds::{crd_manifests, ensure_crds, tofan_crds};
