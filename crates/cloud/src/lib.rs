//! AWS clients used by ssokube.
//!
//! - **SSO OIDC** - client registration and the device-authorization grant
//! - **SSO portal** - account and role enumeration, role credentials
//! - **EKS** - cluster inventory, signed with temporary role credentials
//!
//! Every client is reachable through a trait so callers can substitute
//! test doubles, and every client accepts an endpoint override.

pub mod eks;
pub mod error;
mod http;
pub mod models;
pub mod sigv4;
pub mod sso_oidc;
pub mod sso_portal;

pub use eks::{ClusterApi, EksClient};
pub use error::{CloudError, FailureClass};
pub use models::{
    AccountInfo, ClientRegistration, DeviceAuthorizationResponse, EksCluster, PollResponse,
    RoleCredentials, RoleInfo, TokenGrant,
};
pub use sso_oidc::{FederationClient, SsoOidcClient};
pub use sso_portal::{PortalApi, SsoPortalClient};
