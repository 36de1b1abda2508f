//! Scan operator CRD definitions
//!
//! Kubernetes custom resources watched by the scan operator:
//! - `OperatorCommand`: durable commands addressed to the operator
//! - `SBOMSyft` / `SBOMSyftFiltered`: image SBOMs
//! - `ApplicationProfile` / `ContainerProfile`: runtime profiles
//!
//! [`metadata`] holds the annotation and label keys these objects carry.

pub mod metadata;
pub mod operator_command;
pub mod profile;
pub mod sbom;

pub use operator_command::*;
pub use profile::*;
pub use sbom::*;
