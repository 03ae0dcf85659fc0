//! Wire types and the socket rendezvous shared by the coordinator and
//! its workers.

use std::path::PathBuf;

pub mod pb {
    tonic::include_proto!("mapred");
}

/// Unix-domain socket the coordinator listens on. Workers compute the
/// same path. Keyed by effective uid so concurrent users on one machine
/// do not collide.
pub fn coordinator_socket_path() -> PathBuf {
    PathBuf::from(format!("/var/tmp/824-mr-{}", unsafe { libc::geteuid() }))
}
