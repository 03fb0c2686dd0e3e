//! In-memory collaborators for pipeline tests

use crate::aws::{
    ApiError, CallerIdentity, CertificateBundle, EndpointSpec, IpPermission, NetworkApi, Subnet,
    Vpc,
};
use crate::pivot::CreateOptions;
use crate::pki::{CertificateAuthority, CertificatePaths, PkiError};
use crate::state::StateStore;
use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

pub const TEST_SUBNET_ID: &str = "subnet-0d326f29e157a5b79";
pub const TEST_VPC_ID: &str = "vpc-079cac0a61aaac7a7";

pub fn options(subnet_id: &str, force: bool) -> CreateOptions {
    CreateOptions {
        profile: "default".to_string(),
        region: "us-east-1".to_string(),
        subnet_id: subnet_id.to_string(),
        force,
    }
}

pub fn store_in(dir: &TempDir) -> StateStore {
    StateStore::at(dir.path().join("state"))
}

struct Failure {
    code: String,
    after: usize,
}

/// `NetworkApi` that records every call and fails on demand.
pub struct FakeApi {
    calls: Mutex<BTreeMap<&'static str, usize>>,
    log: Mutex<Vec<&'static str>>,
    failures: Mutex<BTreeMap<&'static str, Failure>>,
    endpoint_specs: Mutex<Vec<EndpointSpec>>,
    next_id: AtomicUsize,
    subnets: Vec<Subnet>,
    vpc: Vpc,
    dhcp_values: Vec<String>,
    client_configuration: String,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeMap::new()),
            endpoint_specs: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            subnets: vec![Subnet {
                subnet_id: TEST_SUBNET_ID.to_string(),
                vpc_id: TEST_VPC_ID.to_string(),
                cidr_block: "10.0.1.0/24".to_string(),
                availability_zone: Some("us-east-1a".to_string()),
            }],
            vpc: Vpc {
                vpc_id: TEST_VPC_ID.to_string(),
                cidr_block: "10.0.0.0/16".to_string(),
                dhcp_options_id: Some("dopt-19edf471".to_string()),
            },
            dhcp_values: vec!["AmazonProvidedDNS".to_string()],
            client_configuration: "client\ndev tun\nproto udp\n\
                remote cvpn-endpoint-0123.prod.clientvpn.us-east-1.amazonaws.com 443\n\
                remote-random-hostname\nnobind\n<ca>\nCA\n</ca>\n"
                .to_string(),
        }
    }

    /// Fail every later call to `op` with `code`.
    pub fn fail(&self, op: &'static str, code: &str) {
        self.fail_after(op, 0, code);
    }

    /// Let `op` succeed `after` more times, then fail with `code`.
    pub fn fail_after(&self, op: &'static str, after: usize, code: &str) {
        let after = self.calls(op) + after;
        self.failures.lock().unwrap().insert(
            op,
            Failure {
                code: code.to_string(),
                after,
            },
        );
    }

    pub fn heal(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Operations in call order since the last `reset_log`.
    pub fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    pub fn reset_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn last_endpoint_spec(&self) -> Option<EndpointSpec> {
        self.endpoint_specs.lock().unwrap().last().cloned()
    }

    fn record(&self, op: &'static str) -> Result<(), ApiError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        self.log.lock().unwrap().push(op);

        match self.failures.lock().unwrap().get(op) {
            Some(failure) if count > failure.after => Err(ApiError::new(
                op,
                &failure.code,
                "injected failure",
                400,
            )),
            _ => Ok(()),
        }
    }

    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{:017x}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl NetworkApi for FakeApi {
    async fn caller_identity(&self) -> Result<CallerIdentity, ApiError> {
        self.record("caller_identity")?;
        Ok(CallerIdentity {
            account: "123456789012".to_string(),
            arn: "arn:aws:iam::123456789012:user/tester".to_string(),
            user_id: "AIDATESTER".to_string(),
        })
    }

    async fn describe_subnet(&self, subnet_id: &str) -> Result<Subnet, ApiError> {
        self.record("describe_subnet")?;
        self.subnets
            .iter()
            .find(|s| s.subnet_id == subnet_id)
            .cloned()
            .ok_or_else(|| {
                ApiError::new("DescribeSubnets", "InvalidSubnetID.NotFound", subnet_id, 400)
            })
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, ApiError> {
        self.record("list_subnets")?;
        Ok(self.subnets.clone())
    }

    async fn describe_vpc(&self, vpc_id: &str) -> Result<Vpc, ApiError> {
        self.record("describe_vpc")?;
        if vpc_id == self.vpc.vpc_id {
            Ok(self.vpc.clone())
        } else {
            Err(ApiError::new("DescribeVpcs", "InvalidVpcID.NotFound", vpc_id, 400))
        }
    }

    async fn dhcp_dns_servers(&self, _dhcp_options_id: &str) -> Result<Vec<String>, ApiError> {
        self.record("dhcp_dns_servers")?;
        Ok(self.dhcp_values.clone())
    }

    async fn import_certificate(&self, bundle: &CertificateBundle) -> Result<String, ApiError> {
        self.record("import_certificate")?;
        assert!(bundle.chain.is_some(), "certificates are imported with the CA chain");
        Ok(format!(
            "arn:aws:acm:us-east-1:123456789012:certificate/{}",
            self.new_id("cert")
        ))
    }

    async fn delete_certificate(&self, _arn: &str) -> Result<(), ApiError> {
        self.record("delete_certificate")
    }

    async fn create_client_vpn_endpoint(&self, spec: &EndpointSpec) -> Result<String, ApiError> {
        self.record("create_client_vpn_endpoint")?;
        self.endpoint_specs.lock().unwrap().push(spec.clone());
        Ok(self.new_id("cvpn-endpoint"))
    }

    async fn delete_client_vpn_endpoint(&self, _endpoint_id: &str) -> Result<(), ApiError> {
        self.record("delete_client_vpn_endpoint")
    }

    async fn associate_target_network(
        &self,
        _endpoint_id: &str,
        _subnet_id: &str,
    ) -> Result<String, ApiError> {
        self.record("associate_target_network")?;
        Ok(self.new_id("cvpn-assoc"))
    }

    async fn disassociate_target_network(
        &self,
        _endpoint_id: &str,
        _association_id: &str,
    ) -> Result<(), ApiError> {
        self.record("disassociate_target_network")
    }

    async fn create_client_vpn_route(
        &self,
        _endpoint_id: &str,
        _destination_cidr: &str,
        _subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.record("create_client_vpn_route")
    }

    async fn delete_client_vpn_route(
        &self,
        _endpoint_id: &str,
        _destination_cidr: &str,
        _subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.record("delete_client_vpn_route")
    }

    async fn authorize_client_vpn_ingress(
        &self,
        _endpoint_id: &str,
        _target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.record("authorize_client_vpn_ingress")
    }

    async fn revoke_client_vpn_ingress(
        &self,
        _endpoint_id: &str,
        _target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.record("revoke_client_vpn_ingress")
    }

    async fn create_security_group(
        &self,
        _vpc_id: &str,
        _name: &str,
        _description: &str,
    ) -> Result<String, ApiError> {
        self.record("create_security_group")?;
        Ok(self.new_id("sg"))
    }

    async fn authorize_security_group_ingress(
        &self,
        _group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), ApiError> {
        self.record("authorize_security_group_ingress")?;
        assert_eq!(permissions.len(), 2);
        Ok(())
    }

    async fn delete_security_group(&self, _group_id: &str) -> Result<(), ApiError> {
        self.record("delete_security_group")
    }

    async fn apply_security_group(
        &self,
        _endpoint_id: &str,
        _vpc_id: &str,
        _group_id: &str,
    ) -> Result<(), ApiError> {
        self.record("apply_security_group")
    }

    async fn export_client_configuration(&self, _endpoint_id: &str) -> Result<String, ApiError> {
        self.record("export_client_configuration")?;
        Ok(self.client_configuration.clone())
    }
}

/// Certificate authority writing placeholder PEM files into a temp dir.
pub struct FakeCa {
    dir: TempDir,
    generated: AtomicUsize,
    cleaned: AtomicUsize,
    fail_cleanup: AtomicBool,
}

impl FakeCa {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            generated: AtomicUsize::new(0),
            cleaned: AtomicUsize::new(0),
            fail_cleanup: AtomicBool::new(false),
        }
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::SeqCst)
    }

    pub fn fail_cleanup(&self) {
        self.fail_cleanup.store(true, Ordering::SeqCst);
    }

    fn pki_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("pki")
    }
}

impl CertificateAuthority for FakeCa {
    async fn generate(&self) -> Result<CertificatePaths, PkiError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        let paths = CertificatePaths::in_pki(&self.pki_dir(), "client.domain.tld");
        for path in paths.all() {
            let io_err = |source| PkiError::Io {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(path, "-----BEGIN PLACEHOLDER-----\n").map_err(io_err)?;
        }
        Ok(paths)
    }

    fn cleanup(&self) -> Result<(), PkiError> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(PkiError::Io {
                path: self.pki_dir(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
            });
        }
        match std::fs::remove_dir_all(self.pki_dir()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(PkiError::Io {
                path: self.pki_dir(),
                source: e,
            }),
            _ => Ok(()),
        }
    }
}
