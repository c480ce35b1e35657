//! CiliumEgressGatewayPolicy types
//!
//! Typed access to Cilium's cluster-scoped `CiliumEgressGatewayPolicy` CRD.
//! The CRD itself is installed by Cilium; these types exist so the operator
//! can read and patch the two fields it manages: `egressGateway.egressIP`
//! and the hostname entry of `egressGateway.nodeSelector.matchLabels`.
//!
//! Only policies carrying the opt-in annotation are ever touched, and the
//! operator never creates or deletes policy objects.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation that opts a policy in to management by this operator.
pub const WATCH_ANNOTATION: &str = "egress.cilium.pandaria.io/monitored";
pub const WATCH_ANNOTATION_VALUE: &str = "true";

/// Well-known node hostname label used in the managed node selector.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cilium.io",
    version = "v2",
    kind = "CiliumEgressGatewayPolicy",
    plural = "ciliumegressgatewaypolicies",
    shortname = "cegp"
)]
#[serde(rename_all = "camelCase")]
pub struct CiliumEgressGatewayPolicySpec {
    /// Source endpoint selectors. Not interpreted by the operator but must
    /// round-trip intact through updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<EgressRule>>,

    #[serde(
        default,
        rename = "destinationCIDRs",
        skip_serializing_if = "Option::is_none"
    )]
    pub destination_cidrs: Option<Vec<String>>,

    #[serde(
        default,
        rename = "excludedCIDRs",
        skip_serializing_if = "Option::is_none"
    )]
    pub excluded_cidrs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_gateway: Option<EgressGateway>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// The gateway assignment: which node carries the traffic and which source
/// address it egresses from.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressGateway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[serde(default, rename = "egressIP", skip_serializing_if = "Option::is_none")]
    pub egress_ip: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<MatchExpression>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchExpression {
    pub key: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl CiliumEgressGatewayPolicy {
    /// Whether the policy carries the opt-in annotation.
    pub fn is_managed(&self) -> bool {
        self.annotations()
            .get(WATCH_ANNOTATION)
            .is_some_and(|v| v.as_str() == WATCH_ANNOTATION_VALUE)
    }

    /// The currently assigned egress IP, or "" when unset.
    pub fn egress_ip(&self) -> &str {
        self.spec
            .egress_gateway
            .as_ref()
            .and_then(|gw| gw.egress_ip.as_deref())
            .unwrap_or("")
    }

    /// The hostname the node selector currently matches, or "" when unset.
    pub fn selector_hostname(&self) -> &str {
        self.spec
            .egress_gateway
            .as_ref()
            .and_then(|gw| gw.node_selector.as_ref())
            .and_then(|sel| sel.match_labels.as_ref())
            .and_then(|labels| labels.get(HOSTNAME_LABEL))
            .map(String::as_str)
            .unwrap_or("")
    }
}
