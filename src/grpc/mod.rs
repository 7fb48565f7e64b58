//
// gRPC surface (A5, §6): an internal-network-only shortcut to the same
// credential resolution and RBAC check the REST enforcement layer (C9)
// runs, for backend applications that would otherwise have to call back
// over HTTP just to validate a token they're already holding.
//
pub mod auth_service;

pub mod pb {
    tonic::include_proto!("authgateway.v1");
}

pub use auth_service::AuthServiceImpl;
