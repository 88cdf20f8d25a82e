//! Kernel-facing primitives: cgroup v2 run scopes, namespaces, the
//! filesystem jail and process-group kill.

pub mod cgroup;
pub mod mount;
pub mod namespace;
pub mod signal;
