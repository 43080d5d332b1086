//! The scripted resource manager walkthrough.

use http_client::HttpClient;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{discover_active_directory_settings, ActiveDirectorySettings, ApplicationTokenProvider};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::management::{
    ExportTemplateRequest, GenericResource, ResourceGroup, ResourceManagementClient,
    DEFAULT_RESOURCE_MANAGER_ENDPOINT,
};

pub const DEFAULT_GROUP_NAME: &str = "azure-sample-group";
pub const DEFAULT_LOCATION: &str = "westus";

const KEY_VAULT_NAMESPACE: &str = "Microsoft.KeyVault";
const KEY_VAULT_TYPE: &str = "vaults";
const KEY_VAULT_API_VERSION: &str = "2015-06-01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleOptions {
    pub group_name: String,
    pub location: String,
    pub vault_name: String,
    /// Tenant the key vault grants access to.
    pub tenant_id: String,
}

impl ExampleOptions {
    /// Defaults for `settings`, with the vault named `azureSampleVault{suffix}`.
    pub fn new(settings: &Settings, vault_suffix: u32) -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            vault_name: format!("azureSampleVault{vault_suffix}"),
            tenant_id: settings.tenant_id.clone().unwrap_or_default(),
        }
    }
}

/// Build a management client whose every call, token requests included, goes
/// through `http`.
///
/// The service principal is checked before anything is sent, so missing
/// credentials fail without touching the network.
pub async fn connect(settings: &Settings, http: Arc<dyn HttpClient>) -> Result<ResourceManagementClient> {
    settings.service_principal()?;

    let (directory, base_url) = match settings.arm_endpoint.as_deref() {
        Some(endpoint) => (
            discover_active_directory_settings(http.as_ref(), endpoint).await?,
            endpoint.to_string(),
        ),
        None => (
            ActiveDirectorySettings::default(),
            DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string(),
        ),
    };

    let provider = ApplicationTokenProvider::new(settings, directory, http.clone())?;
    Ok(
        ResourceManagementClient::new(http, Arc::new(provider), settings.subscription_id.clone())
            .with_base_url(base_url)
            .with_retry_timeout(settings.retry_timeout),
    )
}

fn output_error(source: std::io::Error) -> Error {
    Error::Io {
        path: PathBuf::from("<output>"),
        source,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_item(
    out: &mut impl Write,
    name: Option<&str>,
    id: Option<&str>,
    location: &str,
    tags: &BTreeMap<String, String>,
    properties: &Map<String, Value>,
) -> std::io::Result<()> {
    writeln!(out, "\tName: {}", name.unwrap_or_default())?;
    writeln!(out, "\tId: {}", id.unwrap_or_default())?;
    writeln!(out, "\tLocation: {location}")?;
    writeln!(out, "\tTags: {tags:?}")?;
    writeln!(out, "\tProperties:")?;
    let sorted: BTreeMap<_, _> = properties.iter().collect();
    for (key, value) in sorted {
        writeln!(out, "\t\t{key}: {}", display_value(value))?;
    }
    writeln!(out, "\n")
}

fn print_group(out: &mut impl Write, group: &ResourceGroup) -> std::io::Result<()> {
    print_item(
        out,
        group.name.as_deref(),
        group.id.as_deref(),
        &group.location,
        &group.tags,
        &group.properties,
    )
}

fn print_json(out: &mut impl Write, value: &Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value)?;
    writeln!(out, "{pretty}\n\n").map_err(output_error)
}

fn key_vault_parameters(options: &ExampleOptions) -> GenericResource {
    let properties = json!({
        "sku": { "family": "A", "name": "standard" },
        "tenantId": options.tenant_id,
        "accessPolicies": [],
        "enabledForDeployment": true,
        "enabledForTemplateDeployment": true,
        "enabledForDiskEncryption": true,
    });

    GenericResource {
        location: options.location.clone(),
        properties: match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        ..GenericResource::default()
    }
}

/// List, create, tag, deploy a key vault into, re-list, export and delete a
/// resource group, printing each step to `out`.
pub async fn run_example(
    client: &ResourceManagementClient,
    options: &ExampleOptions,
    out: &mut impl Write,
) -> Result<()> {
    let group_name = options.group_name.as_str();
    let mut parameters = ResourceGroup::new(options.location.clone());

    writeln!(out, "List Resource Groups").map_err(output_error)?;
    for group in client.list_resource_groups().await? {
        print_group(out, &group).map_err(output_error)?;
    }

    writeln!(out, "Create Resource Group").map_err(output_error)?;
    let created = client.create_or_update_resource_group(group_name, &parameters).await?;
    print_group(out, &created).map_err(output_error)?;

    writeln!(out, "Modify Resource Group").map_err(output_error)?;
    parameters.tags.insert("hello".to_string(), "world".to_string());
    let modified = client.create_or_update_resource_group(group_name, &parameters).await?;
    print_group(out, &modified).map_err(output_error)?;

    writeln!(out, "Create a Key Vault via a Generic Resource Put").map_err(output_error)?;
    let vault = client
        .create_or_update_resource(
            group_name,
            KEY_VAULT_NAMESPACE,
            "",
            KEY_VAULT_TYPE,
            &options.vault_name,
            KEY_VAULT_API_VERSION,
            &key_vault_parameters(options),
        )
        .await?;
    print_json(out, &Value::Object(vault.properties))?;

    writeln!(out, "List all of the resources within the group").map_err(output_error)?;
    for group in client.list_resource_groups().await? {
        print_group(out, &group).map_err(output_error)?;
    }

    writeln!(out, "Export Resource Group Template").map_err(output_error)?;
    let exported = client.export_template(group_name, &ExportTemplateRequest::all()).await?;
    print_json(out, &exported.template)?;

    writeln!(out, "Delete Resource Group").map_err(output_error)?;
    client.delete_resource_group(group_name).await?;
    writeln!(out, "\nDeleted: {group_name}").map_err(output_error)?;

    log::info!("Example finished for resource group '{group_name}'");
    Ok(())
}
