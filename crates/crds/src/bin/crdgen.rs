//! Prints the CRD manifests of the operator-owned resources as a YAML stream.

use anyhow::Context;
use crds::{ApplicationProfile, ContainerProfile, OperatorCommand, SBOMSyft, SBOMSyftFiltered};
use kube::CustomResourceExt;

fn render() -> anyhow::Result<String> {
    let crds = [
        OperatorCommand::crd(),
        SBOMSyft::crd(),
        SBOMSyftFiltered::crd(),
        ApplicationProfile::crd(),
        ContainerProfile::crd(),
    ];
    let mut out = String::new();
    for crd in &crds {
        let name = crd.metadata.name.as_deref().unwrap_or_default();
        let yaml = serde_yaml::to_string(crd).with_context(|| format!("failed to render CRD {}", name))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    print!("{}", render()?);
    Ok(())
}
