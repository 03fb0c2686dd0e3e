//! The `purge` pipeline
//!
//! Deletes recorded resources in reverse dependency order. Unlike create it
//! never stops early: every stage runs, failures are collected, and the
//! record is only reset once every stage has succeeded.

use crate::aws::NetworkApi;
use crate::error::PivotError;
use crate::pivot::{Pivot, required};
use crate::pki::CertificateAuthority;
use crate::state::{StateDelta, StateKey, StateRecord};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStep {
    RevokeIngress,
    DeleteRoute,
    DisassociateTargetNetwork,
    DeleteEndpoint,
    DeleteSecurityGroup,
    DeleteServerCertificate,
    DeleteClientCertificate,
    LocalCaCleanup,
}

/// Outcome of one purge run.
#[derive(Debug, Default)]
pub struct PurgeSummary {
    pub failed_stages: Vec<(&'static str, PivotError)>,
}

impl PurgeSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_stages.is_empty()
    }
}

impl PurgeStep {
    pub const ALL: [PurgeStep; 8] = [
        PurgeStep::RevokeIngress,
        PurgeStep::DeleteRoute,
        PurgeStep::DisassociateTargetNetwork,
        PurgeStep::DeleteEndpoint,
        PurgeStep::DeleteSecurityGroup,
        PurgeStep::DeleteServerCertificate,
        PurgeStep::DeleteClientCertificate,
        PurgeStep::LocalCaCleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PurgeStep::RevokeIngress => "ingress revocation",
            PurgeStep::DeleteRoute => "route deletion",
            PurgeStep::DisassociateTargetNetwork => "target network disassociation",
            PurgeStep::DeleteEndpoint => "VPN endpoint deletion",
            PurgeStep::DeleteSecurityGroup => "security group deletion",
            PurgeStep::DeleteServerCertificate => "server certificate deletion",
            PurgeStep::DeleteClientCertificate => "client certificate deletion",
            PurgeStep::LocalCaCleanup => "local CA cleanup",
        }
    }

    /// Keys this stage owns; the first names the resource itself.
    pub fn keys(&self) -> &'static [StateKey] {
        match self {
            PurgeStep::RevokeIngress => &[StateKey::IngressTargetCidr],
            PurgeStep::DeleteRoute => &[StateKey::RouteDestinationCidr],
            PurgeStep::DisassociateTargetNetwork => {
                &[StateKey::AssociationId, StateKey::SecurityGroupApplied]
            }
            PurgeStep::DeleteEndpoint => &[StateKey::VpnEndpointId],
            PurgeStep::DeleteSecurityGroup => &[
                StateKey::SecurityGroupId,
                StateKey::SecurityGroupIngressAuthorized,
            ],
            PurgeStep::DeleteServerCertificate => &[StateKey::ServerCertRemoteId],
            PurgeStep::DeleteClientCertificate => &[StateKey::ClientCertRemoteId],
            PurgeStep::LocalCaCleanup => &StateKey::CERTIFICATE_PATHS,
        }
    }

    /// Resources that only exist as part of the endpoint.
    fn depends_on_endpoint(&self) -> bool {
        matches!(
            self,
            PurgeStep::RevokeIngress | PurgeStep::DeleteRoute | PurgeStep::DisassociateTargetNetwork
        )
    }

    fn clear_keys(&self, record: &StateRecord) -> StateDelta {
        self.keys()
            .iter()
            .filter(|key| record.contains(**key))
            .fold(StateDelta::new(), |delta, key| delta.remove(*key))
    }

    pub async fn execute<A: NetworkApi, C: CertificateAuthority>(
        &self,
        pivot: &Pivot<'_, A, C>,
        record: &StateRecord,
    ) -> Result<StateDelta, PivotError> {
        if *self == PurgeStep::LocalCaCleanup {
            return Ok(self.local_ca_cleanup(pivot.ca, record));
        }

        let primary = self.keys()[0];
        let Some(id) = record.text(primary) else {
            info!("No {} recorded, nothing to do for {}", primary, self.name());
            return Ok(self.clear_keys(record));
        };

        let endpoint_id = record.text(StateKey::VpnEndpointId);
        if self.depends_on_endpoint() && endpoint_id.is_none() {
            warn!(
                "{} {} is recorded without a VPN endpoint; dropping stale keys",
                primary, id
            );
            return Ok(self.clear_keys(record));
        }
        let endpoint_id = endpoint_id.unwrap_or_default();

        let result = match self {
            PurgeStep::RevokeIngress => pivot.api.revoke_client_vpn_ingress(endpoint_id, id).await,
            PurgeStep::DeleteRoute => {
                let subnet_id = required(record, StateKey::SubnetId)?;
                pivot
                    .api
                    .delete_client_vpn_route(endpoint_id, id, subnet_id)
                    .await
            }
            PurgeStep::DisassociateTargetNetwork => {
                pivot
                    .api
                    .disassociate_target_network(endpoint_id, id)
                    .await
            }
            PurgeStep::DeleteEndpoint => pivot.api.delete_client_vpn_endpoint(id).await,
            PurgeStep::DeleteSecurityGroup => pivot.api.delete_security_group(id).await,
            PurgeStep::DeleteServerCertificate | PurgeStep::DeleteClientCertificate => {
                pivot.api.delete_certificate(id).await
            }
            PurgeStep::LocalCaCleanup => Ok(()),
        };

        match result {
            Ok(()) => info!("Removed {} {}", primary, id),
            Err(e) if e.is_not_found() => info!("{} {} was already gone", primary, id),
            Err(e) => return Err(e.into()),
        }
        Ok(self.clear_keys(record))
    }

    fn local_ca_cleanup<C: CertificateAuthority>(&self, ca: &C, record: &StateRecord) -> StateDelta {
        let remaining = record.remote_resources();
        if !remaining.is_empty() {
            warn!(
                "Keeping local certificates while {} remote resource(s) remain",
                remaining.len()
            );
            return StateDelta::new();
        }

        if let Err(e) = ca.cleanup() {
            warn!("Failed to remove local CA material: {}", e);
        }
        self.clear_keys(record)
    }
}

/// Run every purge stage and reset the record if all of them succeeded.
///
/// An empty record succeeds immediately without any remote call. Only a
/// state store failure aborts the run; remote failures are collected in the
/// returned summary.
pub async fn run<A: NetworkApi, C: CertificateAuthority>(
    pivot: &Pivot<'_, A, C>,
) -> Result<PurgeSummary, PivotError> {
    let mut summary = PurgeSummary::default();

    if pivot.store.read_all()?.is_empty() {
        info!("The state file is empty, nothing to purge");
        return Ok(summary);
    }

    for step in PurgeStep::ALL {
        let record = pivot.store.read_all()?;
        debug!("Running {}", step.name());

        match step.execute(pivot, &record).await {
            Ok(delta) => pivot.store.apply(&delta)?,
            Err(e) => {
                warn!("{} failed: {}", step.name(), e);
                summary.failed_stages.push((step.name(), e));
            }
        }
    }

    if summary.is_clean() {
        pivot.store.clear()?;
        info!("All resources removed, state cleared");
    }

    Ok(summary)
}
