//! CRD installation utilities
//!
//! The operator installs its own CRDs on startup using server-side apply, so
//! the schema in the cluster always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use pangolin_common::crd::{PangolinBinding, PangolinOrganization, PangolinResource, PangolinTunnel};
use pangolin_common::retry::{retry_with_backoff, RetryConfig};
use pangolin_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

/// All kinds served by the operator, dependencies first
fn all_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "pangolinorganizations.tunnel.pangolin.io",
            crd: PangolinOrganization::crd(),
        },
        CrdDef {
            name: "pangolintunnels.tunnel.pangolin.io",
            crd: PangolinTunnel::crd(),
        },
        CrdDef {
            name: "pangolinresources.tunnel.pangolin.io",
            crd: PangolinResource::crd(),
        },
        CrdDef {
            name: "pangolinbindings.tunnel.pangolin.io",
            crd: PangolinBinding::crd(),
        },
    ]
}

/// All CRDs as a multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(|def| serde_yaml::to_string(&def.crd))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    Ok(docs.join("---\n"))
}

async fn install_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in all_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    Ok(())
}

/// Install every CRD, retrying until the API server accepts them
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    retry_with_backoff(&RetryConfig::with_max_attempts(10), "install-crds", || {
        install_crds(client)
    })
    .await?;
    tracing::info!("Pangolin CRDs installed/updated");
    Ok(())
}
