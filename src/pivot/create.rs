//! The `create` pipeline
//!
//! Steps run in a fixed order and stop at the first failure. A step whose
//! output key is already recorded is skipped, so re-running after a failure
//! resumes where the previous run stopped without re-creating anything.

use crate::aws::{CertificateBundle, EndpointSpec, IpPermission, NetworkApi, Transport};
use crate::error::PivotError;
use crate::pivot::network::{self, Ipv4Cidr};
use crate::pivot::validate;
use crate::pivot::{CreateOptions, Pivot, required};
use crate::pki::{CertificateAuthority, CertificatePaths};
use crate::state::{StateDelta, StateKey, StateRecord};
use std::path::Path;
use tracing::{debug, info, warn};

const DEFAULT_ROUTE: &str = "0.0.0.0/0";
const ENDPOINT_DESCRIPTION: &str = "vpc-vpn-pivot";
const SECURITY_GROUP_PREFIX: &str = "vpc-vpn-pivot-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    InitialChecks,
    GenerateCertificates,
    ImportServerCertificate,
    ImportClientCertificate,
    SelectClientCidr,
    SelectDnsServers,
    CreateEndpoint,
    AssociateTargetNetwork,
    CreateRoute,
    AuthorizeIngress,
    CreateSecurityGroup,
    AuthorizeSecurityGroupIngress,
    ApplySecurityGroup,
}

impl CreateStep {
    pub const ALL: [CreateStep; 13] = [
        CreateStep::InitialChecks,
        CreateStep::GenerateCertificates,
        CreateStep::ImportServerCertificate,
        CreateStep::ImportClientCertificate,
        CreateStep::SelectClientCidr,
        CreateStep::SelectDnsServers,
        CreateStep::CreateEndpoint,
        CreateStep::AssociateTargetNetwork,
        CreateStep::CreateRoute,
        CreateStep::AuthorizeIngress,
        CreateStep::CreateSecurityGroup,
        CreateStep::AuthorizeSecurityGroupIngress,
        CreateStep::ApplySecurityGroup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CreateStep::InitialChecks => "initial checks",
            CreateStep::GenerateCertificates => "certificate generation",
            CreateStep::ImportServerCertificate => "server certificate import",
            CreateStep::ImportClientCertificate => "client certificate import",
            CreateStep::SelectClientCidr => "client CIDR selection",
            CreateStep::SelectDnsServers => "DNS server selection",
            CreateStep::CreateEndpoint => "VPN endpoint creation",
            CreateStep::AssociateTargetNetwork => "target network association",
            CreateStep::CreateRoute => "route creation",
            CreateStep::AuthorizeIngress => "ingress authorization",
            CreateStep::CreateSecurityGroup => "security group creation",
            CreateStep::AuthorizeSecurityGroupIngress => "security group ingress authorization",
            CreateStep::ApplySecurityGroup => "security group application",
        }
    }

    /// The key whose presence means this step already succeeded.
    fn output(&self) -> Option<StateKey> {
        match self {
            CreateStep::InitialChecks | CreateStep::GenerateCertificates => None,
            CreateStep::ImportServerCertificate => Some(StateKey::ServerCertRemoteId),
            CreateStep::ImportClientCertificate => Some(StateKey::ClientCertRemoteId),
            CreateStep::SelectClientCidr => Some(StateKey::CidrBlock),
            CreateStep::SelectDnsServers => Some(StateKey::DnsServers),
            CreateStep::CreateEndpoint => Some(StateKey::VpnEndpointId),
            CreateStep::AssociateTargetNetwork => Some(StateKey::AssociationId),
            CreateStep::CreateRoute => Some(StateKey::RouteDestinationCidr),
            CreateStep::AuthorizeIngress => Some(StateKey::IngressTargetCidr),
            CreateStep::CreateSecurityGroup => Some(StateKey::SecurityGroupId),
            CreateStep::AuthorizeSecurityGroupIngress => {
                Some(StateKey::SecurityGroupIngressAuthorized)
            }
            CreateStep::ApplySecurityGroup => Some(StateKey::SecurityGroupApplied),
        }
    }

    pub fn is_done(&self, record: &StateRecord) -> bool {
        match self {
            CreateStep::InitialChecks => false,
            CreateStep::GenerateCertificates => {
                CertificatePaths::from_record(record).is_some_and(|paths| paths.all_exist())
            }
            step => step.output().is_some_and(|key| record.contains(key)),
        }
    }

    pub async fn execute<A: NetworkApi, C: CertificateAuthority>(
        &self,
        pivot: &Pivot<'_, A, C>,
        options: &CreateOptions,
        record: &StateRecord,
    ) -> Result<StateDelta, PivotError> {
        match self {
            CreateStep::InitialChecks => {
                validate::initial_checks(pivot.api, pivot.store, options).await
            }
            CreateStep::GenerateCertificates => generate_certificates(pivot.ca, record).await,
            CreateStep::ImportServerCertificate => {
                let paths = recorded_paths(record)?;
                let bundle = load_bundle(&paths.server_cert, &paths.server_key, &paths.ca_cert)?;
                let arn = pivot.api.import_certificate(&bundle).await?;
                info!("Imported server certificate {}", arn);
                Ok(StateDelta::new().set(StateKey::ServerCertRemoteId, arn))
            }
            CreateStep::ImportClientCertificate => {
                let paths = recorded_paths(record)?;
                let bundle = load_bundle(&paths.client_cert, &paths.client_key, &paths.ca_cert)?;
                let arn = pivot.api.import_certificate(&bundle).await?;
                info!("Imported client certificate {}", arn);
                Ok(StateDelta::new().set(StateKey::ClientCertRemoteId, arn))
            }
            CreateStep::SelectClientCidr => {
                let in_use = [
                    parse_cidr(required(record, StateKey::VpcCidrBlock)?)?,
                    parse_cidr(required(record, StateKey::SubnetCidrBlock)?)?,
                ];
                let cidr = network::select_client_cidr(&pivot.vpn.client_cidr_candidates, &in_use)
                    .ok_or_else(|| PivotError::InvalidInput {
                        kind: "client CIDR",
                        value: format!(
                            "every candidate in {:?} overlaps the VPC or a reserved range",
                            pivot.vpn.client_cidr_candidates
                        ),
                    })?;
                info!("Client address pool: {}", cidr);
                Ok(StateDelta::new().set(StateKey::CidrBlock, cidr.to_string()))
            }
            CreateStep::SelectDnsServers => select_dns(pivot, record).await,
            CreateStep::CreateEndpoint => {
                let dns_servers = record
                    .list(StateKey::DnsServers)
                    .ok_or(PivotError::MissingState(StateKey::DnsServers))?;
                let spec = EndpointSpec {
                    client_cidr_block: required(record, StateKey::CidrBlock)?.to_string(),
                    server_certificate_arn: required(record, StateKey::ServerCertRemoteId)?
                        .to_string(),
                    client_root_certificate_arn: required(record, StateKey::ClientCertRemoteId)?
                        .to_string(),
                    dns_servers: dns_servers.to_vec(),
                    transport: Transport::Udp,
                    description: ENDPOINT_DESCRIPTION.to_string(),
                };
                let endpoint_id = pivot.api.create_client_vpn_endpoint(&spec).await?;
                info!("Created Client VPN endpoint {}", endpoint_id);
                Ok(StateDelta::new().set(StateKey::VpnEndpointId, endpoint_id))
            }
            CreateStep::AssociateTargetNetwork => {
                let association_id = pivot
                    .api
                    .associate_target_network(
                        required(record, StateKey::VpnEndpointId)?,
                        required(record, StateKey::SubnetId)?,
                    )
                    .await?;
                info!("Associated target network ({})", association_id);
                Ok(StateDelta::new().set(StateKey::AssociationId, association_id))
            }
            CreateStep::CreateRoute => {
                pivot
                    .api
                    .create_client_vpn_route(
                        required(record, StateKey::VpnEndpointId)?,
                        DEFAULT_ROUTE,
                        required(record, StateKey::SubnetId)?,
                    )
                    .await?;
                info!("Created route {}", DEFAULT_ROUTE);
                Ok(StateDelta::new().set(StateKey::RouteDestinationCidr, DEFAULT_ROUTE))
            }
            CreateStep::AuthorizeIngress => {
                let target = required(record, StateKey::SubnetCidrBlock)?;
                pivot
                    .api
                    .authorize_client_vpn_ingress(required(record, StateKey::VpnEndpointId)?, target)
                    .await?;
                info!("Authorized ingress to {}", target);
                Ok(StateDelta::new().set(StateKey::IngressTargetCidr, target))
            }
            CreateStep::CreateSecurityGroup => {
                let endpoint_id = required(record, StateKey::VpnEndpointId)?;
                let group_id = pivot
                    .api
                    .create_security_group(
                        required(record, StateKey::VpcId)?,
                        &format!("{}{}", SECURITY_GROUP_PREFIX, endpoint_id),
                        &format!("Client VPN endpoint {}", endpoint_id),
                    )
                    .await?;
                info!("Created security group {}", group_id);
                Ok(StateDelta::new().set(StateKey::SecurityGroupId, group_id))
            }
            CreateStep::AuthorizeSecurityGroupIngress => {
                let permissions = [
                    IpPermission::all_ports("tcp", DEFAULT_ROUTE),
                    IpPermission::all_ports("udp", DEFAULT_ROUTE),
                ];
                pivot
                    .api
                    .authorize_security_group_ingress(
                        required(record, StateKey::SecurityGroupId)?,
                        &permissions,
                    )
                    .await?;
                Ok(StateDelta::new().set(StateKey::SecurityGroupIngressAuthorized, true))
            }
            CreateStep::ApplySecurityGroup => {
                pivot
                    .api
                    .apply_security_group(
                        required(record, StateKey::VpnEndpointId)?,
                        required(record, StateKey::VpcId)?,
                        required(record, StateKey::SecurityGroupId)?,
                    )
                    .await?;
                Ok(StateDelta::new().set(StateKey::SecurityGroupApplied, true))
            }
        }
    }
}

/// Run every create step, persisting each result before the next.
pub async fn run<A: NetworkApi, C: CertificateAuthority>(
    pivot: &Pivot<'_, A, C>,
    options: &CreateOptions,
) -> Result<(), PivotError> {
    for step in CreateStep::ALL {
        let record = pivot.store.read_all()?;
        if step.is_done(&record) {
            debug!("Skipping {}: already done", step.name());
            continue;
        }

        info!("Running {}", step.name());
        let delta = step
            .execute(pivot, options, &record)
            .await
            .map_err(|e| PivotError::stage(step.name(), e))?;
        pivot.store.apply(&delta)?;
    }

    Ok(())
}

async fn generate_certificates<C: CertificateAuthority>(
    ca: &C,
    record: &StateRecord,
) -> Result<StateDelta, PivotError> {
    // New material would not match certificates already imported
    if let Some(key) = [StateKey::ServerCertRemoteId, StateKey::ClientCertRemoteId]
        .into_iter()
        .find(|key| record.contains(*key))
    {
        let missing = CertificatePaths::from_record(record)
            .and_then(|paths| paths.first_missing().map(Path::to_path_buf))
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "certificate paths".to_string());
        return Err(PivotError::InvalidInput {
            kind: "local certificate material",
            value: format!("{} is missing but {} is still recorded; run purge", missing, key),
        });
    }

    let paths = ca.generate().await?;
    info!("Successfully created SSL certificates for the VPN");
    Ok(paths.to_delta())
}

fn recorded_paths(record: &StateRecord) -> Result<CertificatePaths, PivotError> {
    CertificatePaths::from_record(record).ok_or(PivotError::MissingState(StateKey::CaCertPath))
}

fn read_pem(path: &Path) -> Result<String, PivotError> {
    std::fs::read_to_string(path).map_err(|source| PivotError::LocalFile {
        path: path.to_path_buf(),
        source,
    })
}

fn load_bundle(cert: &Path, key: &Path, ca: &Path) -> Result<CertificateBundle, PivotError> {
    Ok(CertificateBundle {
        certificate: read_pem(cert)?,
        private_key: read_pem(key)?,
        chain: Some(read_pem(ca)?),
    })
}

fn parse_cidr(value: &str) -> Result<Ipv4Cidr, PivotError> {
    value.parse().map_err(|e: String| PivotError::InvalidInput {
        kind: "CIDR block",
        value: e,
    })
}

async fn select_dns<A: NetworkApi, C>(
    pivot: &Pivot<'_, A, C>,
    record: &StateRecord,
) -> Result<StateDelta, PivotError> {
    let vpc_cidr = record
        .text(StateKey::VpcCidrBlock)
        .and_then(|c| c.parse::<Ipv4Cidr>().ok());

    let dhcp_values = match record.text(StateKey::DhcpOptionsId) {
        Some(id) => match pivot.api.dhcp_dns_servers(id).await {
            Ok(values) => values,
            Err(e) => {
                warn!("DHCP options lookup failed, using fallback DNS: {}", e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let servers = network::select_dns_servers(
        &dhcp_values,
        vpc_cidr.as_ref(),
        &pivot.vpn.fallback_dns_servers,
    );
    info!("VPN DNS servers: {}", servers.join(", "));
    Ok(StateDelta::new().set(StateKey::DnsServers, servers))
}
