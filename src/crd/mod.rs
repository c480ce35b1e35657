//! Custom resource types observed and mutated by the operator

mod egress_policy;


pub use egress_policy::{
    CiliumEgressGatewayPolicy, CiliumEgressGatewayPolicySpec, EgressGateway, EgressRule,
    LabelSelector, MatchExpression, HOSTNAME_LABEL, WATCH_ANNOTATION, WATCH_ANNOTATION_VALUE,
};
