use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Disabled,
    Primary,
    Secondary,
}

/// A channel announced by the radio during config download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub index: i32,
    pub name: String,
    #[serde(skip)]
    pub passkey: Bytes,
    pub role: ChannelRole,
}

impl Channel {
    pub fn from_proto(c: &proto::Channel) -> Self {
        let settings = c.settings.clone().unwrap_or_default();
        let role = match proto::channel::Role::try_from(c.role) {
            Ok(proto::channel::Role::Primary) => ChannelRole::Primary,
            Ok(proto::channel::Role::Secondary) => ChannelRole::Secondary,
            _ => ChannelRole::Disabled,
        };
        Self {
            index: c.index,
            name: settings.name,
            passkey: settings.psk,
            role,
        }
    }

    /// Primary channels with no name use the modem preset's default name on the radio.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            if self.role == ChannelRole::Primary {
                "(default)"
            } else {
                "(unnamed)"
            }
        } else {
            &self.name
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            ChannelRole::Primary => "primary",
            ChannelRole::Secondary => "secondary",
            ChannelRole::Disabled => "disabled",
        };
        write!(
            f,
            "#{} {} ({}, {} byte key)",
            self.index,
            self.display_name(),
            role,
            self.passkey.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_proto() {
        let c = Channel::from_proto(&proto::Channel {
            index: 1,
            settings: Some(proto::ChannelSettings {
                name: "admin".into(),
                psk: Bytes::from_static(&[1, 2, 3]),
                ..Default::default()
            }),
            role: proto::channel::Role::Secondary as i32,
        });
        assert_eq!(c.index, 1);
        assert_eq!(c.role, ChannelRole::Secondary);
        assert_eq!(c.to_string(), "#1 admin (secondary, 3 byte key)");

        let primary = Channel::from_proto(&proto::Channel {
            index: 0,
            settings: None,
            role: proto::channel::Role::Primary as i32,
        });
        assert_eq!(primary.display_name(), "(default)");
    }
}
