//! AWS access for the pivot pipelines
//!
//! `NetworkApi` is the seam the create/purge/connect pipelines are written
//! against. `AwsNetworkApi` implements it over signed HTTPS calls to EC2,
//! ACM and STS; tests substitute an in-memory fake.

pub mod acm;
pub mod client;
pub mod ec2;
pub mod error;
pub mod profile;
pub mod signing;
pub mod sts;

pub use error::ApiError;
pub use profile::{AwsProfile, Credentials, ProfileError};

use acm::AcmClient;
use client::AwsClient;
use ec2::Ec2Client;
use sts::StsClient;

/// Who the credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: String,
    pub dhcp_options_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

/// Parameters of a certificate-authenticated Client VPN endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub client_cidr_block: String,
    pub server_certificate_arn: String,
    pub client_root_certificate_arn: String,
    pub dns_servers: Vec<String>,
    pub transport: Transport,
    pub description: String,
}

/// One security group ingress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPermission {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

impl IpPermission {
    /// Every port of `protocol` from `cidr`.
    pub fn all_ports(protocol: &str, cidr: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            from_port: 0,
            to_port: 65535,
            cidr: cidr.to_string(),
        }
    }
}

/// PEM material for an ACM import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
    pub chain: Option<String>,
}

/// Remote operations used by the pipelines.
///
/// Every call is a single attempt. Deletions of resources that no longer
/// exist fail with an error for which `ApiError::is_not_found` holds.
#[allow(async_fn_in_trait)]
pub trait NetworkApi {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError>;

    /// Fails with a `*.NotFound` error when the subnet is not visible.
    async fn describe_subnet(&self, subnet_id: &str) -> Result<Subnet, ApiError>;

    /// Every subnet visible under the credentials in use.
    async fn list_subnets(&self) -> Result<Vec<Subnet>, ApiError>;

    async fn describe_vpc(&self, vpc_id: &str) -> Result<Vpc, ApiError>;

    async fn dhcp_dns_servers(&self, dhcp_options_id: &str) -> Result<Vec<String>, ApiError>;

    /// Returns the certificate ARN.
    async fn import_certificate(&self, bundle: &CertificateBundle) -> Result<String, ApiError>;

    async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError>;

    /// Returns the endpoint ID.
    async fn create_client_vpn_endpoint(&self, spec: &EndpointSpec) -> Result<String, ApiError>;

    async fn delete_client_vpn_endpoint(&self, endpoint_id: &str) -> Result<(), ApiError>;

    /// Returns the association ID.
    async fn associate_target_network(
        &self,
        endpoint_id: &str,
        subnet_id: &str,
    ) -> Result<String, ApiError>;

    async fn disassociate_target_network(
        &self,
        endpoint_id: &str,
        association_id: &str,
    ) -> Result<(), ApiError>;

    async fn create_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError>;

    async fn delete_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError>;

    async fn authorize_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError>;

    async fn revoke_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError>;

    /// Returns the group ID.
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ApiError>;

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), ApiError>;

    async fn delete_security_group(&self, group_id: &str) -> Result<(), ApiError>;

    async fn apply_security_group(
        &self,
        endpoint_id: &str,
        vpc_id: &str,
        group_id: &str,
    ) -> Result<(), ApiError>;

    /// The endpoint's OpenVPN client configuration.
    async fn export_client_configuration(&self, endpoint_id: &str) -> Result<String, ApiError>;
}

/// `NetworkApi` over the real AWS endpoints.
#[derive(Debug, Clone)]
pub struct AwsNetworkApi {
    ec2: Ec2Client,
    acm: AcmClient,
    sts: StsClient,
    region: String,
}

impl AwsNetworkApi {
    pub fn from_profile(profile: &AwsProfile, endpoint_url: Option<String>) -> Result<Self, ApiError> {
        let client = AwsClient::new(profile, endpoint_url)?;
        Ok(Self {
            region: client.region().to_string(),
            ec2: Ec2Client::new(client.clone()),
            acm: AcmClient::new(client.clone()),
            sts: StsClient::new(client),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl NetworkApi for AwsNetworkApi {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError> {
        self.sts.get_caller_identity().await
    }

    async fn describe_subnet(&self, subnet_id: &str) -> Result<Subnet, ApiError> {
        self.ec2
            .describe_subnets(&[subnet_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ApiError::new(
                    "DescribeSubnets",
                    "InvalidSubnetID.NotFound",
                    &format!("The subnet ID '{}' does not exist", subnet_id),
                    400,
                )
            })
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, ApiError> {
        self.ec2.describe_subnets(&[]).await
    }

    async fn describe_vpc(&self, vpc_id: &str) -> Result<Vpc, ApiError> {
        self.ec2.describe_vpc(vpc_id).await
    }

    async fn dhcp_dns_servers(&self, dhcp_options_id: &str) -> Result<Vec<String>, ApiError> {
        self.ec2.dhcp_dns_servers(dhcp_options_id).await
    }

    async fn import_certificate(&self, bundle: &CertificateBundle) -> Result<String, ApiError> {
        self.acm.import_certificate(bundle).await
    }

    async fn delete_certificate(&self, arn: &str) -> Result<(), ApiError> {
        self.acm.delete_certificate(arn).await
    }

    async fn create_client_vpn_endpoint(&self, spec: &EndpointSpec) -> Result<String, ApiError> {
        self.ec2.create_client_vpn_endpoint(spec).await
    }

    async fn delete_client_vpn_endpoint(&self, endpoint_id: &str) -> Result<(), ApiError> {
        self.ec2.delete_client_vpn_endpoint(endpoint_id).await
    }

    async fn associate_target_network(
        &self,
        endpoint_id: &str,
        subnet_id: &str,
    ) -> Result<String, ApiError> {
        self.ec2.associate_target_network(endpoint_id, subnet_id).await
    }

    async fn disassociate_target_network(
        &self,
        endpoint_id: &str,
        association_id: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .disassociate_target_network(endpoint_id, association_id)
            .await
    }

    async fn create_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .create_client_vpn_route(endpoint_id, destination_cidr, subnet_id)
            .await
    }

    async fn delete_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .delete_client_vpn_route(endpoint_id, destination_cidr, subnet_id)
            .await
    }

    async fn authorize_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .authorize_client_vpn_ingress(endpoint_id, target_cidr)
            .await
    }

    async fn revoke_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .revoke_client_vpn_ingress(endpoint_id, target_cidr)
            .await
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ApiError> {
        self.ec2
            .create_security_group(vpc_id, name, description)
            .await
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), ApiError> {
        self.ec2
            .authorize_security_group_ingress(group_id, permissions)
            .await
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), ApiError> {
        self.ec2.delete_security_group(group_id).await
    }

    async fn apply_security_group(
        &self,
        endpoint_id: &str,
        vpc_id: &str,
        group_id: &str,
    ) -> Result<(), ApiError> {
        self.ec2
            .apply_security_group(endpoint_id, vpc_id, group_id)
            .await
    }

    async fn export_client_configuration(&self, endpoint_id: &str) -> Result<String, ApiError> {
        self.ec2.export_client_configuration(endpoint_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_as_str() {
        assert_eq!(Transport::Udp.as_str(), "udp");
        assert_eq!(Transport::Tcp.as_str(), "tcp");
    }

    #[test]
    fn test_all_ports_permission() {
        let perm = IpPermission::all_ports("tcp", "0.0.0.0/0");
        assert_eq!(perm.from_port, 0);
        assert_eq!(perm.to_port, 65535);
        assert_eq!(perm.cidr, "0.0.0.0/0");
    }

    #[test]
    fn test_from_profile_keeps_region() {
        let profile = AwsProfile {
            name: "default".to_string(),
            region: "ap-southeast-2".to_string(),
            credentials: Credentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
        };
        let api = AwsNetworkApi::from_profile(&profile, None).unwrap();
        assert_eq!(api.region(), "ap-southeast-2");
    }
}
