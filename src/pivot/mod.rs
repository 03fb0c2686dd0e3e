//! Provisioning and teardown pipelines
//!
//! `create` walks a fixed list of steps that each add one remote resource
//! (or one derived input) to the state record; `purge` walks the reverse
//! list. Every step receives the current record and returns a
//! `StateDelta`, which the driver persists before the next step runs, so an
//! interrupted run always leaves an accurate record behind.

pub mod create;
pub mod network;
pub mod purge;
pub mod validate;

pub use purge::PurgeSummary;

use crate::aws::NetworkApi;
use crate::config::VpnConfig;
use crate::error::PivotError;
use crate::pki::CertificateAuthority;
use crate::state::{StateKey, StateRecord, StateStore};

/// Arguments of the `create` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub profile: String,
    pub region: String,
    pub subnet_id: String,
    pub force: bool,
}

/// Collaborators shared by the pipelines.
pub struct Pivot<'a, A, C> {
    pub api: &'a A,
    pub ca: &'a C,
    pub store: &'a StateStore,
    pub vpn: &'a VpnConfig,
}

impl<'a, A: NetworkApi, C: CertificateAuthority> Pivot<'a, A, C> {
    pub fn new(api: &'a A, ca: &'a C, store: &'a StateStore, vpn: &'a VpnConfig) -> Self {
        Self { api, ca, store, vpn }
    }
}

/// Text value a step cannot run without.
pub(crate) fn required(record: &StateRecord, key: StateKey) -> Result<&str, PivotError> {
    record.text(key).ok_or(PivotError::MissingState(key))
}
