// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task payloads and lock-target resolution
//!
//! A payload describes the work a task performs. The scheduler never looks
//! inside a payload except to compute which [`Target`]s the task must hold
//! before it may run. Resolution is a pure function of the payload and a
//! snapshot of current resource state, so the scheduler can call it twice:
//! once before acquiring locks and once after, to detect state races.

use crate::target::Target;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error from a [`StateReader`] backend.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("vpc {0} not found")]
    VpcNotFound(String),
    #[error("state backend error: {0}")]
    Backend(String),
}

/// Error resolving the lock targets for a payload.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("error reading state for vpc {vpc_id}: {source}")]
    State {
        vpc_id: String,
        #[source]
        source: StateError,
    },
}

/// A recorded peering connection between two VPCs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringConnection {
    pub requester_vpc_id: String,
    pub accepter_vpc_id: String,
}

/// Read-only view of current resource state, consulted during target
/// resolution. Lock targets can depend on live data (a networking update
/// must also lock every current peering partner), so resolution reads
/// through this trait rather than the payload alone.
pub trait StateReader {
    /// Peering connections currently recorded for the named VPC.
    fn peering_connections(
        &self,
        region: &str,
        vpc_id: &str,
    ) -> Result<Vec<PeeringConnection>, StateError>;
}

/// Subnet connectivity class. Unroutable subnets are carved from a private
/// block that the IP management system does not track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetType {
    Public,
    Private,
    Unroutable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVpc {
    pub account_id: String,
    pub region: String,
    pub name: String,
    pub subnet_size: u8,
    pub request_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVpc {
    pub account_id: String,
    pub vpc_id: String,
    pub region: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportVpc {
    pub account_id: String,
    pub vpc_id: String,
    pub region: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnimportVpc {
    pub vpc_id: String,
    pub region: String,
}

/// Requested peering with another VPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringRequest {
    pub other_vpc_id: String,
    pub other_region: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNetworking {
    pub vpc_id: String,
    pub region: String,
    pub connect_public: bool,
    pub connect_private: bool,
    pub peering: Vec<PeeringRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDnsResolvers {
    pub vpc_id: String,
    pub region: String,
    pub resolver_rule_set_ids: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFirewall {
    pub vpc_id: String,
    pub region: String,
    pub rule_group_set_ids: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogging {
    pub vpc_id: String,
    pub region: String,
}

/// Which aspects of a VPC a verify or repair task covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySpec {
    pub networking: bool,
    pub logging: bool,
    pub resolver_rules: bool,
    pub firewall: bool,
    pub cidrs: bool,
}

impl VerifySpec {
    pub fn all() -> Self {
        VerifySpec {
            networking: true,
            logging: true,
            resolver_rules: true,
            firewall: true,
            cidrs: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyVpc {
    pub vpc_id: String,
    pub region: String,
    pub spec: VerifySpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairVpc {
    pub vpc_id: String,
    pub region: String,
    pub spec: VerifySpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSubnets {
    pub vpc_id: String,
    pub region: String,
    pub subnet_type: SubnetType,
    pub subnet_size: u8,
    pub group_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSubnets {
    pub vpc_id: String,
    pub region: String,
    pub subnet_type: SubnetType,
    pub group_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionCertificate {
    pub request_id: i64,
    pub region: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCertificate {
    pub request_id: i64,
    pub region: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRouteTables {
    pub vpc_id: String,
    pub region: String,
}

/// The work a task performs, as stored in the task's payload column.
///
/// The scheduler treats payloads as opaque except for [`lock_targets`]; the
/// executing worker dispatches on the variant.
///
/// [`lock_targets`]: TaskPayload::lock_targets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    CreateVpc(CreateVpc),
    DeleteVpc(DeleteVpc),
    ImportVpc(ImportVpc),
    UnimportVpc(UnimportVpc),
    UpdateNetworking(UpdateNetworking),
    UpdateDnsResolvers(UpdateDnsResolvers),
    UpdateFirewall(UpdateFirewall),
    UpdateLogging(UpdateLogging),
    VerifyVpc(VerifyVpc),
    RepairVpc(RepairVpc),
    AddSubnets(AddSubnets),
    RemoveSubnets(RemoveSubnets),
    ProvisionCertificate(ProvisionCertificate),
    DeleteCertificate(DeleteCertificate),
    SyncRouteTables(SyncRouteTables),
}

impl TaskPayload {
    /// The region this payload operates in.
    pub fn region(&self) -> &str {
        match self {
            TaskPayload::CreateVpc(p) => &p.region,
            TaskPayload::DeleteVpc(p) => &p.region,
            TaskPayload::ImportVpc(p) => &p.region,
            TaskPayload::UnimportVpc(p) => &p.region,
            TaskPayload::UpdateNetworking(p) => &p.region,
            TaskPayload::UpdateDnsResolvers(p) => &p.region,
            TaskPayload::UpdateFirewall(p) => &p.region,
            TaskPayload::UpdateLogging(p) => &p.region,
            TaskPayload::VerifyVpc(p) => &p.region,
            TaskPayload::RepairVpc(p) => &p.region,
            TaskPayload::AddSubnets(p) => &p.region,
            TaskPayload::RemoveSubnets(p) => &p.region,
            TaskPayload::ProvisionCertificate(p) => &p.region,
            TaskPayload::DeleteCertificate(p) => &p.region,
            TaskPayload::SyncRouteTables(p) => &p.region,
        }
    }

    /// Compute the lock targets this payload must hold before running.
    ///
    /// Pure with respect to `state`: the same payload and the same state
    /// snapshot always produce the same target set. Targets for networking
    /// updates and repairs depend on currently recorded peering partners,
    /// which is why callers re-resolve after acquiring locks.
    pub fn lock_targets(&self, state: &dyn StateReader) -> Result<Vec<Target>, ResolveError> {
        match self {
            TaskPayload::CreateVpc(_) => Ok(vec![Target::ipam_write()]),

            TaskPayload::DeleteVpc(p) => Ok(vec![Target::vpc(&p.vpc_id), Target::ipam_write()]),

            TaskPayload::UpdateNetworking(p) => {
                // Updating networking may remove existing peering connections
                // from the state or add new ones from the config, so both
                // sides of every connection get locked.
                let mut targets = vec![Target::vpc(&p.vpc_id)];
                for pcx in current_peering(state, &p.region, &p.vpc_id)? {
                    targets.push(Target::vpc(&pcx.accepter_vpc_id));
                    targets.push(Target::vpc(&pcx.requester_vpc_id));
                }
                for req in &p.peering {
                    targets.push(Target::vpc(&req.other_vpc_id));
                }
                Ok(targets)
            }

            TaskPayload::RepairVpc(p) => {
                // Repair may remove existing peering connections from the state.
                let mut targets = vec![Target::vpc(&p.vpc_id)];
                for pcx in current_peering(state, &p.region, &p.vpc_id)? {
                    targets.push(Target::vpc(&pcx.accepter_vpc_id));
                    targets.push(Target::vpc(&pcx.requester_vpc_id));
                }
                Ok(targets)
            }

            TaskPayload::AddSubnets(p) => Ok(subnet_targets(&p.vpc_id, p.subnet_type)),
            TaskPayload::RemoveSubnets(p) => Ok(subnet_targets(&p.vpc_id, p.subnet_type)),

            TaskPayload::ProvisionCertificate(_) | TaskPayload::DeleteCertificate(_) => {
                Ok(vec![Target::dns_api()])
            }

            TaskPayload::ImportVpc(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::UnimportVpc(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::UpdateDnsResolvers(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::UpdateFirewall(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::UpdateLogging(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::VerifyVpc(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
            TaskPayload::SyncRouteTables(p) => Ok(vec![Target::vpc(&p.vpc_id)]),
        }
    }
}

fn current_peering(
    state: &dyn StateReader,
    region: &str,
    vpc_id: &str,
) -> Result<Vec<PeeringConnection>, ResolveError> {
    state
        .peering_connections(region, vpc_id)
        .map_err(|source| ResolveError::State {
            vpc_id: vpc_id.to_string(),
            source,
        })
}

fn subnet_targets(vpc_id: &str, subnet_type: SubnetType) -> Vec<Target> {
    // Unroutable subnets never touch the IP management system.
    if subnet_type == SubnetType::Unroutable {
        vec![Target::vpc(vpc_id)]
    } else {
        vec![Target::vpc(vpc_id), Target::ipam_write()]
    }
}
