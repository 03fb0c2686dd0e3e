//! Pre-flight checks for `create`

use crate::aws::NetworkApi;
use crate::error::PivotError;
use crate::pivot::CreateOptions;
use crate::state::{StateDelta, StateKey, StateRecord, StateStore};
use tracing::{info, warn};

/// Generated IDs are 8 or 17 lowercase hex digits after the prefix.
fn is_valid_resource_id(id: &str, prefix: &str) -> bool {
    let Some(suffix) = id.strip_prefix(prefix) else {
        return false;
    };
    matches!(suffix.len(), 8 | 17)
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// `subnet-27f3c340`, `subnet-0d326f29e157a5b79`
pub fn is_valid_subnet_id(subnet_id: &str) -> bool {
    is_valid_resource_id(subnet_id, "subnet-")
}

/// `vpc-7128c20c`, `vpc-079cac0a61aaac7a7`
pub fn is_valid_vpc_id(vpc_id: &str) -> bool {
    is_valid_resource_id(vpc_id, "vpc-")
}

/// Refuse to run over a non-empty record unless `force` is set.
///
/// Makes no remote calls and never writes the record.
pub fn ensure_no_conflict(store: &StateStore, force: bool) -> Result<StateRecord, PivotError> {
    let record = store.read_all()?;
    if !record.is_empty() && !force {
        return Err(PivotError::Conflict {
            path: store.path().to_path_buf(),
            detail: "is not empty. The target account may still hold resources from a previous \
                     create; run purge to remove them or pass --force to resume"
                .to_string(),
        });
    }
    Ok(record)
}

/// Validate the target subnet and credentials; returns the facts to record.
pub async fn initial_checks<A: NetworkApi>(
    api: &A,
    store: &StateStore,
    options: &CreateOptions,
) -> Result<StateDelta, PivotError> {
    let record = ensure_no_conflict(store, options.force)?;

    if !is_valid_subnet_id(&options.subnet_id) {
        return Err(PivotError::InvalidInput {
            kind: "subnet ID",
            value: options.subnet_id.clone(),
        });
    }

    if let Some(previous) = record.text(StateKey::SubnetId) {
        if previous != options.subnet_id && !record.remote_resources().is_empty() {
            return Err(PivotError::Conflict {
                path: store.path().to_path_buf(),
                detail: format!(
                    "holds resources for {}; run purge before targeting {}",
                    previous, options.subnet_id
                ),
            });
        }
    }

    let identity = api
        .caller_identity()
        .await
        .map_err(|e| PivotError::Credential(e.to_string()))?;
    info!("Using identity {} in account {}", identity.arn, identity.account);

    let subnet = match api.describe_subnet(&options.subnet_id).await {
        Ok(subnet) => subnet,
        Err(e) if e.is_not_found() => {
            print_visible_subnets(api).await;
            return Err(PivotError::InvalidInput {
                kind: "subnet ID",
                value: format!("{} does not exist in {}", options.subnet_id, options.region),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if !is_valid_vpc_id(&subnet.vpc_id) {
        return Err(PivotError::InvalidInput {
            kind: "VPC ID",
            value: subnet.vpc_id,
        });
    }
    let vpc = api.describe_vpc(&subnet.vpc_id).await?;

    let mut delta = StateDelta::new()
        .set(StateKey::Profile, options.profile.as_str())
        .set(StateKey::Region, options.region.as_str())
        .set(StateKey::AccountId, identity.account)
        .set(StateKey::CallerArn, identity.arn)
        .set(StateKey::VpcId, vpc.vpc_id)
        .set(StateKey::SubnetId, subnet.subnet_id)
        .set(StateKey::SubnetCidrBlock, subnet.cidr_block)
        .set(StateKey::VpcCidrBlock, vpc.cidr_block);

    delta = match vpc.dhcp_options_id {
        Some(id) => delta.set(StateKey::DhcpOptionsId, id),
        None => delta.remove(StateKey::DhcpOptionsId),
    };

    // Inputs derived from a different target are stale
    if record.text(StateKey::SubnetId) != Some(options.subnet_id.as_str()) {
        delta = delta.remove(StateKey::CidrBlock).remove(StateKey::DnsServers);
    }

    Ok(delta)
}

async fn print_visible_subnets<A: NetworkApi>(api: &A) {
    match api.list_subnets().await {
        Ok(subnets) if subnets.is_empty() => {
            println!("No subnets are visible with the current credentials.");
        }
        Ok(subnets) => {
            println!("Subnets visible with the current credentials:");
            for subnet in subnets {
                println!(
                    "  {}  {}  {}  {}",
                    subnet.subnet_id,
                    subnet.vpc_id,
                    subnet.cidr_block,
                    subnet.availability_zone.as_deref().unwrap_or("-")
                );
            }
        }
        Err(e) => warn!("Failed to list subnets: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, TEST_SUBNET_ID, options, store_in};
    use tempfile::TempDir;

    #[test]
    fn test_valid_subnet_ids() {
        assert!(is_valid_subnet_id("subnet-0d326f29e157a5b79"));
        assert!(is_valid_subnet_id("subnet-27f3c340"));
    }

    #[test]
    fn test_invalid_subnet_ids() {
        for id in [
            "",
            "subnet-",
            "subnet-27f3c34",
            "subnet-27f3c3400",
            "subnet-27F3C340",
            "subnet-27f3c34g",
            "vpc-27f3c340",
            "subnet-0d326f29e157a5b79a",
            " subnet-27f3c340",
        ] {
            assert!(!is_valid_subnet_id(id), "{:?} should be rejected", id);
        }
    }

    #[test]
    fn test_vpc_ids() {
        assert!(is_valid_vpc_id("vpc-7128c20c"));
        assert!(is_valid_vpc_id("vpc-079cac0a61aaac7a7"));
        assert!(!is_valid_vpc_id("vpc-7128c20"));
        assert!(!is_valid_vpc_id("subnet-7128c20c"));
    }

    #[tokio::test]
    async fn test_conflict_without_force_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(StateKey::Profile, "default").unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let api = FakeApi::new();
        let err = initial_checks(&api, &store, &options(TEST_SUBNET_ID, false))
            .await
            .unwrap_err();

        assert!(matches!(err, PivotError::Conflict { .. }));
        assert_eq!(api.total_calls(), 0);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_force_proceeds_over_existing_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(StateKey::Profile, "old").unwrap();

        let api = FakeApi::new();
        let delta = initial_checks(&api, &store, &options(TEST_SUBNET_ID, true))
            .await
            .unwrap();

        let mut record = store.read_all().unwrap();
        delta.apply_to(&mut record);
        assert_eq!(record.text(StateKey::Profile), Some("default"));
        assert_eq!(record.text(StateKey::SubnetId), Some(TEST_SUBNET_ID));
    }

    #[tokio::test]
    async fn test_malformed_subnet_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let api = FakeApi::new();

        let err = initial_checks(&api, &store, &options("subnet-XYZ", false))
            .await
            .unwrap_err();

        assert!(matches!(err, PivotError::InvalidInput { kind: "subnet ID", .. }));
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_subnet_lists_visible_subnets() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let api = FakeApi::new();

        let err = initial_checks(&api, &store, &options("subnet-27f3c340", false))
            .await
            .unwrap_err();

        assert!(matches!(err, PivotError::InvalidInput { .. }));
        assert_eq!(api.calls("describe_subnet"), 1);
        assert_eq!(api.calls("list_subnets"), 1);
        assert_eq!(api.calls("describe_vpc"), 0);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let api = FakeApi::new();
        api.fail("caller_identity", "InvalidClientTokenId");

        let err = initial_checks(&api, &store, &options(TEST_SUBNET_ID, false))
            .await
            .unwrap_err();

        assert!(matches!(err, PivotError::Credential(_)));
        assert_eq!(api.calls("describe_subnet"), 0);
    }

    #[tokio::test]
    async fn test_force_refuses_other_subnet_with_live_resources() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.put(StateKey::SubnetId, "subnet-27f3c340").unwrap();
        store.put(StateKey::VpnEndpointId, "cvpn-endpoint-1").unwrap();

        let api = FakeApi::new();
        let err = initial_checks(&api, &store, &options(TEST_SUBNET_ID, true))
            .await
            .unwrap_err();

        assert!(matches!(err, PivotError::Conflict { .. }));
        assert!(err.to_string().contains("subnet-27f3c340"));
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_records_target_facts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let api = FakeApi::new();

        let delta = initial_checks(&api, &store, &options(TEST_SUBNET_ID, false))
            .await
            .unwrap();
        let mut record = store.read_all().unwrap();
        delta.apply_to(&mut record);

        assert_eq!(record.text(StateKey::AccountId), Some("123456789012"));
        assert_eq!(record.text(StateKey::Region), Some("us-east-1"));
        assert_eq!(record.text(StateKey::VpcId), Some("vpc-079cac0a61aaac7a7"));
        assert_eq!(record.text(StateKey::SubnetCidrBlock), Some("10.0.1.0/24"));
        assert_eq!(record.text(StateKey::VpcCidrBlock), Some("10.0.0.0/16"));
        assert_eq!(record.text(StateKey::DhcpOptionsId), Some("dopt-19edf471"));
    }
}
