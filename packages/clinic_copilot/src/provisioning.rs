//! Session provisioning: bind a tenant to a gateway instance and walk it
//! through the pairing handshake.
//!
//! The registry row is written before the gateway hears anything. The
//! gateway starts firing webhook events the moment an instance exists, and
//! an event that arrives before its binding would be dropped as unknown.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::evolution::{ConnectArtifact, EvolutionClient, GatewayError};
use crate::ingest::map_connection_state;
use crate::models::{InstanceStatus, MessagingInstance};
use crate::repository::CrmRepository;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Exactly one of these comes back from a provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyConnected { instance_name: String },
    PairingCode { instance_name: String, code: String },
    QrCode { instance_name: String, qr_base64: String },
}

pub struct Provisioner {
    repo: Arc<CrmRepository>,
    gateway: Arc<EvolutionClient>,
    webhook_url: String,
}

impl Provisioner {
    pub fn new(repo: Arc<CrmRepository>, gateway: Arc<EvolutionClient>, webhook_url: String) -> Self {
        Self {
            repo,
            gateway,
            webhook_url,
        }
    }

    /// Provision (or re-provision) the tenant's WhatsApp session.
    ///
    /// Every step is safe to repeat: the registry upsert and gateway create
    /// are idempotent, and webhook/settings registration simply overwrite.
    /// A run that died halfway is fixed by calling this again.
    pub async fn provision(
        &self,
        tenant_id: &str,
        label: &str,
        phone: Option<&str>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let name = instance_name_for(tenant_id, label);
        info!(tenant = tenant_id, instance = %name, "provisioning WhatsApp session");

        // Registry first, gateway second.
        self.repo.upsert_instance(tenant_id, &name).await?;

        self.gateway.create_instance(&name, phone.is_none()).await?;
        self.gateway.set_webhook(&name, &self.webhook_url).await?;
        self.gateway.set_settings(&name).await?;

        match self.gateway.connection_state(&name).await {
            Ok(state) if state == "open" => {
                self.repo
                    .update_instance_status(&name, InstanceStatus::Connected)
                    .await?;
                info!(instance = %name, "session already connected");
                return Ok(ProvisionOutcome::AlreadyConnected {
                    instance_name: name,
                });
            }
            Ok(state) => debug!(instance = %name, state = %state, "session not yet open"),
            // Some gateway builds 404 the state route until first connect.
            Err(e) => debug!(instance = %name, "connection state probe failed: {e}"),
        }

        let artifact = self.gateway.connect(&name, phone).await?;
        match artifact {
            ConnectArtifact::AlreadyConnected => {
                self.repo
                    .update_instance_status(&name, InstanceStatus::Connected)
                    .await?;
                Ok(ProvisionOutcome::AlreadyConnected {
                    instance_name: name,
                })
            }
            ConnectArtifact::PairingCode(code) => {
                self.repo
                    .update_instance_status(&name, InstanceStatus::Connecting)
                    .await?;
                Ok(ProvisionOutcome::PairingCode {
                    instance_name: name,
                    code,
                })
            }
            ConnectArtifact::QrCode(qr_base64) => {
                self.repo
                    .update_instance_status(&name, InstanceStatus::Connecting)
                    .await?;
                Ok(ProvisionOutcome::QrCode {
                    instance_name: name,
                    qr_base64,
                })
            }
        }
    }

    /// Disconnect the tenant's session. The gateway call is best effort;
    /// the registry row is kept with status disconnected so late webhook
    /// events still resolve instead of becoming unknown-instance drops.
    pub async fn logout(&self, tenant_id: &str) -> anyhow::Result<Option<String>> {
        let Some(instance) = self.repo.find_instance_by_tenant(tenant_id).await? else {
            return Ok(None);
        };
        if let Err(e) = self.gateway.logout(&instance.instance_name).await {
            warn!(instance = %instance.instance_name, "gateway logout failed: {e}");
        }
        self.repo
            .update_instance_status(&instance.instance_name, InstanceStatus::Disconnected)
            .await?;
        info!(instance = %instance.instance_name, "session logged out");
        Ok(Some(instance.instance_name))
    }

    /// Registry view of the tenant's session, refreshed against the live
    /// gateway state when the gateway is reachable.
    pub async fn refresh_status(&self, tenant_id: &str) -> anyhow::Result<Option<MessagingInstance>> {
        let Some(mut instance) = self.repo.find_instance_by_tenant(tenant_id).await? else {
            return Ok(None);
        };
        match self.gateway.connection_state(&instance.instance_name).await {
            Ok(state) if !state.is_empty() => {
                let mapped = map_connection_state(&state);
                if mapped != instance.status {
                    self.repo
                        .update_instance_status(&instance.instance_name, mapped)
                        .await?;
                    instance.status = mapped;
                }
            }
            Ok(_) => {}
            // Unreachable gateway is not evidence of a dead session.
            Err(e) => debug!(instance = %instance.instance_name, "state probe failed: {e}"),
        }
        Ok(Some(instance))
    }
}

/// Stable, collision-resistant gateway name for a tenant's session.
///
/// The label part is cosmetic and only has to be recognizable in gateway
/// dashboards; uniqueness comes from carrying the tenant id whole in the
/// suffix, so two tenants can never derive the same name. Re-provisioning
/// with the same label always derives the same name.
pub fn instance_name_for(tenant_id: &str, label: &str) -> String {
    let tenant: String = tenant_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    let mut slug = normalize_label(label);
    if slug.len() < 3 {
        // Label came out unusable (emoji-only, punctuation, too short).
        slug = tenant.chars().take(12).collect();
    }

    let mut suffix = tenant;
    if suffix.is_empty() {
        suffix.push('0');
    }

    format!("copilot_{slug}_{suffix}")
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .map(strip_diacritic)
        .map(|c| c.to_ascii_lowercase())
        .filter(char::is_ascii_alphanumeric)
        .take(24)
        .collect()
}

fn strip_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        'ý' | 'ÿ' | 'Ý' => 'y',
        _ => c,
    }
}

/// Dialable number for the send path. Brazilian local numbers (10 or 11
/// digits) get the country code prefixed; anything else is passed through
/// as digits.
pub fn normalize_outbound_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 10 || digits.len() == 11 {
        format!("55{digits}")
    } else {
        digits
    }
}
