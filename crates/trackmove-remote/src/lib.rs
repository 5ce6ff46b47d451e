pub mod remote_backend;
pub mod wire;

pub use remote_backend::{RemoteBackend, RemoteBackendConfig};
