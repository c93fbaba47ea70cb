//! Webhook notification dispatch
//!
//! Lifecycle embeds are merged with the configured per-category template
//! before dispatch: the template's presentation fields (author, footer,
//! color, image, thumbnail, fields, timestamp) override whatever the event
//! carried, while title and description always come from the event itself.
//! Dispatch is fire-and-forget; a failed delivery is logged and dropped.

use gantry_config::Webhooks;
use gantry_interfaces::RestClient;
use gantry_ipc::{Embed, LifecycleKind};
use std::sync::Arc;

/// Merge the configured template into an event embed
pub fn apply_template(mut embed: Embed, template: &Embed) -> Embed {
    if template.author.is_some() {
        embed.author = template.author.clone();
    }
    if template.footer.is_some() {
        embed.footer = template.footer.clone();
    }
    if template.color.is_some() {
        embed.color = template.color;
    }
    if template.image.is_some() {
        embed.image = template.image.clone();
    }
    if template.thumbnail.is_some() {
        embed.thumbnail = template.thumbnail.clone();
    }
    if template.fields.is_some() {
        embed.fields = template.fields.clone();
    }
    if template.timestamp.is_some() {
        embed.timestamp = template.timestamp;
    }
    embed
}

/// Dispatches lifecycle notifications to the configured webhook endpoints
#[derive(Clone)]
pub struct WebhookNotifier {
    rest: Arc<dyn RestClient>,
    webhooks: Webhooks,
}

impl WebhookNotifier {
    pub fn new(rest: Arc<dyn RestClient>, webhooks: Webhooks) -> Self {
        Self { rest, webhooks }
    }

    /// Send an embed to the endpoint configured for the category, if any
    pub fn notify(&self, kind: LifecycleKind, embed: Embed) {
        let endpoint = match kind {
            LifecycleKind::Cluster => &self.webhooks.cluster,
            LifecycleKind::Shard => &self.webhooks.shard,
        };
        let Some(endpoint) = endpoint else {
            return;
        };

        let embed = match &endpoint.embed {
            Some(template) => apply_template(embed, template),
            None => embed,
        };

        let rest = self.rest.clone();
        let id = endpoint.id.clone();
        let token = endpoint.token.clone();
        tokio::spawn(async move {
            if let Err(e) = rest.execute_webhook(&id, &token, vec![embed]).await {
                tracing::warn!("Webhook delivery failed: {}", e);
            }
        });
    }
}
