//! Discord REST (v10) implementation of the chat platform traits.

use std::sync::Arc;

use async_trait::async_trait;
use belle_core::{ChannelId, GuildId, MessageId, RoleId, UserId};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{Error, Result};
use crate::platform::{
    ActionRow, Channel, ChannelKind, ChatPlatform, Component, Embed, Guild, Message, NewChannel,
    NewMessage, Overwrite, OverwriteKind, SelectOption,
};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10/";

const TEXT_CHANNEL: u8 = 0;
const CATEGORY_CHANNEL: u8 = 4;

const ACTION_ROW: u8 = 1;
const BUTTON: u8 = 2;
const STRING_SELECT: u8 = 3;
const SECONDARY_STYLE: u8 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct WireOverwrite {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

impl From<&Overwrite> for WireOverwrite {
    fn from(overwrite: &Overwrite) -> Self {
        Self {
            id: overwrite.id.clone(),
            kind: match overwrite.kind {
                OverwriteKind::Role => 0,
                OverwriteKind::Member => 1,
            },
            allow: overwrite.allow.to_string(),
            deny: overwrite.deny.to_string(),
        }
    }
}

impl WireOverwrite {
    fn into_overwrite(self) -> Overwrite {
        Overwrite {
            kind: if self.kind == 1 {
                OverwriteKind::Member
            } else {
                OverwriteKind::Role
            },
            allow: permission_bits(&self.id, &self.allow),
            deny: permission_bits(&self.id, &self.deny),
            id: self.id,
        }
    }
}

fn permission_bits(overwrite_id: &str, raw: &str) -> u64 {
    raw.parse().unwrap_or_else(|error| {
        tracing::warn!(overwrite_id, raw, %error, "Unparseable permission bits, treating as none");
        0
    })
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireComponent {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    style: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_values: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_values: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    components: Vec<WireComponent>,
}

impl From<&Component> for WireComponent {
    fn from(component: &Component) -> Self {
        match component {
            Component::Button { custom_id, label } => Self {
                kind: BUTTON,
                custom_id: Some(custom_id.clone()),
                label: Some(label.clone()),
                style: Some(SECONDARY_STYLE),
                ..Self::default()
            },
            Component::Select {
                custom_id,
                placeholder,
                options,
            } => Self {
                kind: STRING_SELECT,
                custom_id: Some(custom_id.clone()),
                placeholder: Some(placeholder.clone()),
                options: options.clone(),
                min_values: Some(0),
                max_values: Some(options.len()),
                ..Self::default()
            },
        }
    }
}

impl WireComponent {
    fn into_component(self) -> Option<Component> {
        match self.kind {
            BUTTON => Some(Component::Button {
                custom_id: self.custom_id?,
                label: self.label.unwrap_or_default(),
            }),
            STRING_SELECT => Some(Component::Select {
                custom_id: self.custom_id?,
                placeholder: self.placeholder.unwrap_or_default(),
                options: self.options,
            }),
            _ => None,
        }
    }
}

fn rows_to_wire(rows: &[ActionRow]) -> Vec<WireComponent> {
    rows.iter()
        .map(|row| WireComponent {
            kind: ACTION_ROW,
            components: row.iter().map(WireComponent::from).collect(),
            ..WireComponent::default()
        })
        .collect()
}

fn rows_from_wire(rows: Vec<WireComponent>) -> Vec<ActionRow> {
    rows.into_iter()
        .filter(|row| row.kind == ACTION_ROW)
        .map(|row| {
            row.components
                .into_iter()
                .filter_map(WireComponent::into_component)
                .collect()
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    permission_overwrites: Vec<WireOverwrite>,
}

impl WireChannel {
    fn into_channel(self) -> Channel {
        Channel {
            id: self.id.into(),
            name: self.name.unwrap_or_default(),
            kind: if self.kind == CATEGORY_CHANNEL {
                ChannelKind::Category
            } else {
                ChannelKind::Text
            },
            parent_id: self.parent_id.map(ChannelId::from),
            overwrites: self
                .permission_overwrites
                .into_iter()
                .map(WireOverwrite::into_overwrite)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    channel_id: String,
    author: WireId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    embeds: Vec<Embed>,
    #[serde(default)]
    components: Vec<WireComponent>,
}

impl WireMessage {
    fn into_message(self) -> Message {
        Message {
            id: self.id.into(),
            channel_id: self.channel_id.into(),
            author_id: self.author.id.into(),
            content: self.content,
            pinned: self.pinned,
            embeds: self.embeds,
            components: rows_from_wire(self.components),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMember {
    #[serde(default)]
    roles: Vec<String>,
}

struct Http {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl Http {
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| Error::platform(path, e.to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token)))
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(operation, %status, body = %body, "Discord request failed");
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("resource", operation));
        }
        Err(Error::platform(operation, format!("{status}: {body}")))
    }

    async fn json<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(operation, request).await?;
        response
            .json()
            .await
            .map_err(|e| Error::platform(operation, e.to_string()))
    }

    /// Like [`Self::json`] but maps 404 to `None`.
    async fn optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Option<T>> {
        match self.json(operation, request).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// A guild reached through the REST API.
pub struct DiscordGuild {
    id: GuildId,
    http: Arc<Http>,
}

impl DiscordGuild {
    async fn patch_channel(&self, operation: &str, channel: &ChannelId, body: serde_json::Value) -> Result<()> {
        let request = self
            .http
            .request(Method::PATCH, &format!("channels/{channel}"))?
            .json(&body);
        self.http.send(operation, request).await.map(|_| ())
    }
}

#[async_trait]
impl Guild for DiscordGuild {
    fn id(&self) -> &GuildId {
        &self.id
    }

    async fn create_role(&self, name: &str) -> Result<RoleId> {
        let request = self
            .http
            .request(Method::POST, &format!("guilds/{}/roles", self.id))?
            .json(&json!({ "name": name, "mentionable": false }));
        let role: WireId = self.http.json("create_role", request).await?;
        Ok(role.id.into())
    }

    async fn delete_role(&self, role: &RoleId) -> Result<()> {
        let request = self
            .http
            .request(Method::DELETE, &format!("guilds/{}/roles/{role}", self.id))?;
        self.http.send("delete_role", request).await.map(|_| ())
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel> {
        let overwrites: Vec<WireOverwrite> = channel.overwrites.iter().map(WireOverwrite::from).collect();
        let kind = match channel.kind {
            ChannelKind::Text => TEXT_CHANNEL,
            ChannelKind::Category => CATEGORY_CHANNEL,
        };
        let request = self
            .http
            .request(Method::POST, &format!("guilds/{}/channels", self.id))?
            .json(&json!({
                "name": channel.name,
                "type": kind,
                "parent_id": channel.parent_id,
                "permission_overwrites": overwrites,
            }));
        let created: WireChannel = self.http.json("create_channel", request).await?;
        Ok(created.into_channel())
    }

    async fn delete_channel(&self, channel: &ChannelId) -> Result<()> {
        let request = self
            .http
            .request(Method::DELETE, &format!("channels/{channel}"))?;
        self.http.send("delete_channel", request).await.map(|_| ())
    }

    async fn rename_channel(&self, channel: &ChannelId, name: &str) -> Result<()> {
        self.patch_channel("rename_channel", channel, json!({ "name": name }))
            .await
    }

    async fn set_channel_parent(&self, channel: &ChannelId, parent: Option<&ChannelId>) -> Result<()> {
        self.patch_channel("set_channel_parent", channel, json!({ "parent_id": parent }))
            .await
    }

    async fn set_overwrites(&self, channel: &ChannelId, overwrites: &[Overwrite]) -> Result<()> {
        let overwrites: Vec<WireOverwrite> = overwrites.iter().map(WireOverwrite::from).collect();
        self.patch_channel(
            "set_overwrites",
            channel,
            json!({ "permission_overwrites": overwrites }),
        )
        .await
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        let request = self
            .http
            .request(Method::GET, &format!("guilds/{}/channels", self.id))?;
        let channels: Vec<WireChannel> = self.http.json("list_channels", request).await?;
        Ok(channels.into_iter().map(WireChannel::into_channel).collect())
    }

    async fn channel(&self, channel: &ChannelId) -> Result<Option<Channel>> {
        let request = self
            .http
            .request(Method::GET, &format!("channels/{channel}"))?;
        let found: Option<WireChannel> = self.http.optional("get_channel", request).await?;
        Ok(found.map(WireChannel::into_channel))
    }

    async fn pinned_messages(&self, channel: &ChannelId) -> Result<Vec<Message>> {
        let request = self
            .http
            .request(Method::GET, &format!("channels/{channel}/pins"))?;
        let messages: Vec<WireMessage> = self.http.json("pinned_messages", request).await?;
        Ok(messages.into_iter().map(WireMessage::into_message).collect())
    }

    async fn send_message(&self, channel: &ChannelId, message: NewMessage) -> Result<Message> {
        let request = self
            .http
            .request(Method::POST, &format!("channels/{channel}/messages"))?
            .json(&json!({
                "content": message.content,
                "embeds": message.embeds,
                "components": rows_to_wire(&message.components),
            }));
        let sent: WireMessage = self.http.json("send_message", request).await?;
        Ok(sent.into_message())
    }

    async fn edit_message(&self, channel: &ChannelId, message: &MessageId, body: NewMessage) -> Result<()> {
        let request = self
            .http
            .request(Method::PATCH, &format!("channels/{channel}/messages/{message}"))?
            .json(&json!({
                "content": body.content,
                "embeds": body.embeds,
                "components": rows_to_wire(&body.components),
            }));
        self.http.send("edit_message", request).await.map(|_| ())
    }

    async fn pin_message(&self, channel: &ChannelId, message: &MessageId) -> Result<()> {
        let request = self
            .http
            .request(Method::PUT, &format!("channels/{channel}/pins/{message}"))?;
        self.http.send("pin_message", request).await.map(|_| ())
    }

    async fn member_roles(&self, user: &UserId) -> Result<Option<Vec<RoleId>>> {
        let request = self
            .http
            .request(Method::GET, &format!("guilds/{}/members/{user}", self.id))?;
        let member: Option<WireMember> = self.http.optional("get_member", request).await?;
        Ok(member.map(|m| m.roles.into_iter().map(RoleId::from).collect()))
    }

    async fn add_member_role(&self, user: &UserId, role: &RoleId) -> Result<()> {
        let request = self.http.request(
            Method::PUT,
            &format!("guilds/{}/members/{user}/roles/{role}", self.id),
        )?;
        self.http.send("add_member_role", request).await.map(|_| ())
    }

    async fn remove_member_role(&self, user: &UserId, role: &RoleId) -> Result<()> {
        let request = self.http.request(
            Method::DELETE,
            &format!("guilds/{}/members/{user}/roles/{role}", self.id),
        )?;
        self.http.send("remove_member_role", request).await.map(|_| ())
    }
}

/// Chat platform backed by the Discord REST API.
pub struct DiscordPlatform {
    http: Arc<Http>,
    bot_user: UserId,
}

impl DiscordPlatform {
    /// # Errors
    ///
    /// Fails when `api_base` is not a valid URL.
    pub fn new(api_base: &str, token: impl Into<String>, bot_user: impl Into<UserId>) -> Result<Self> {
        let base = Url::parse(api_base).map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(Self {
            http: Arc::new(Http {
                client: reqwest::Client::new(),
                base,
                token: token.into(),
            }),
            bot_user: bot_user.into(),
        })
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn bot_user_id(&self) -> &UserId {
        &self.bot_user
    }

    async fn guild(&self, id: &GuildId) -> Result<Option<Arc<dyn Guild>>> {
        let request = self.http.request(Method::GET, &format!("guilds/{id}"))?;
        let found: Option<WireId> = self.http.optional("get_guild", request).await?;
        Ok(found.map(|_| {
            Arc::new(DiscordGuild {
                id: id.clone(),
                http: Arc::clone(&self.http),
            }) as Arc<dyn Guild>
        }))
    }

    async fn resolve_bearer(&self, token: &str) -> Result<Option<UserId>> {
        let url = self
            .http
            .base
            .join("users/@me")
            .map_err(|e| Error::platform("resolve_bearer", e.to_string()))?;
        let response = self.http.client.get(url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::platform("resolve_bearer", response.status().to_string()));
        }
        let user: WireId = response
            .json()
            .await
            .map_err(|e| Error::platform("resolve_bearer", e.to_string()))?;
        Ok(Some(user.id.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::VIEW_CHANNEL;

    #[test]
    fn test_overwrite_wire_format() -> std::result::Result<(), serde_json::Error> {
        let overwrite = Overwrite::deny_role(&RoleId::new("42"), VIEW_CHANNEL);
        let wire = serde_json::to_value(WireOverwrite::from(&overwrite))?;
        assert_eq!(wire, json!({ "id": "42", "type": 0, "allow": "0", "deny": "1024" }));
        Ok(())
    }

    #[test]
    fn test_channel_from_wire() -> std::result::Result<(), serde_json::Error> {
        let wire: WireChannel = serde_json::from_value(json!({
            "id": "7",
            "name": "round-one",
            "type": 4,
            "permission_overwrites": [{ "id": "9", "type": 1, "allow": "1024", "deny": "0" }],
        }))?;
        let channel = wire.into_channel();
        assert_eq!(channel.kind, ChannelKind::Category);
        assert_eq!(channel.overwrites[0].kind, OverwriteKind::Member);
        assert_eq!(channel.overwrites[0].allow, VIEW_CHANNEL);
        Ok(())
    }

    #[test]
    fn test_unparseable_permissions_read_as_none() -> std::result::Result<(), serde_json::Error> {
        let wire: WireOverwrite = serde_json::from_value(json!({
            "id": "9", "type": 0, "allow": "lots", "deny": "1024",
        }))?;
        let overwrite = wire.into_overwrite();
        assert_eq!(overwrite.allow, 0);
        assert_eq!(overwrite.deny, VIEW_CHANNEL);
        assert_eq!(overwrite.id, "9");
        Ok(())
    }

    #[test]
    fn test_components_survive_the_wire() -> std::result::Result<(), serde_json::Error> {
        let rows = vec![
            vec![Component::Select {
                custom_id: "makePuzzleVisible".into(),
                placeholder: "Pick".into(),
                options: vec![SelectOption {
                    label: "Mind Bender!".into(),
                    value: "n1".into(),
                }],
            }],
            vec![Component::Button {
                custom_id: "toggleAll".into(),
                label: "All".into(),
            }],
        ];
        let wire = serde_json::to_value(rows_to_wire(&rows))?;
        assert_eq!(wire[0]["type"], 1);
        assert_eq!(wire[0]["components"][0]["type"], 3);
        assert_eq!(wire[0]["components"][0]["min_values"], 0);
        assert_eq!(wire[0]["components"][0]["max_values"], 1);
        assert_eq!(wire[1]["components"][0]["style"], 2);

        let echoed: Vec<WireComponent> = serde_json::from_value(wire)?;
        assert_eq!(rows_from_wire(echoed), rows);
        Ok(())
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = DiscordPlatform::new("::", "token", "bot");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
