//! Egress Gateway Operator
//!
//! This crate keeps Cilium egress gateway policies pointed at the cluster
//! node that currently holds the kube-vip services lease, reacting to node
//! health transitions and leadership changes as they happen.

pub mod controller;
pub mod crd;
pub mod error;
pub mod gateway;

pub use crate::error::{Error, Result};
