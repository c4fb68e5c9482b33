use anyhow::Context;
use kube::CustomResourceExt;
use std::{env, fs};
use tunnel_ingress_controller::crd;

fn main() -> anyhow::Result<()> {
    let current_dir = env::current_dir()?;

    let manifests = [
        (
            "credentials_crd.yaml",
            serde_yaml::to_string(&crd::credentials::Credentials::crd())?,
        ),
        ("tunnel_crd.yaml", serde_yaml::to_string(&crd::tunnel::Tunnel::crd())?),
    ];

    for (file, manifest) in manifests {
        let path = current_dir.join(file);
        fs::write(&path, manifest).with_context(|| format!("unable to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    Ok(())
}
