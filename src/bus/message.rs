//! Cross-frame wire format.
//!
//! Every message travels as `{type, payload, from, to}`. The `type` string is
//! decoded once into [`BusMessage`] at the transport boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BusError;
use crate::enums::Orientation;

/// Request from the host page to load data, optionally into a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,

    #[serde(rename = "dicomWebURL", default, skip_serializing_if = "Option::is_none")]
    pub dicom_web_url: Option<String>,
    #[serde(rename = "studyInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub study_instance_uid: Option<String>,
    #[serde(rename = "seriesInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub series_instance_uid: Option<String>,
    #[serde(rename = "sopInstanceUID", default, skip_serializing_if = "Option::is_none")]
    pub sop_instance_uid: Option<String>,

    #[serde(rename = "volumeKeySuffix", default, skip_serializing_if = "Option::is_none")]
    pub volume_key_suffix: Option<String>,
    /// Older name for `volumeKeySuffix`.
    #[serde(rename = "volumeKeyUID", default, skip_serializing_if = "Option::is_none")]
    pub volume_key_uid: Option<String>,
    /// Shorthand for `volumeKeyUID`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(rename = "layoutName", default, skip_serializing_if = "Option::is_none")]
    pub layout_name: Option<String>,
    #[serde(rename = "changeLayout", default, skip_serializing_if = "Option::is_none")]
    pub change_layout: Option<ChangeLayout>,
    /// View id the requested slice is meant for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,

    /// Absolute slice index. Negative means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    /// Instance number to resolve to a slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i32>,
    /// Dense cross-volume index to resolve to a slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<u32>,
}

/// Whether the host wants its layout switched once the load lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeLayout {
    Enabled(bool),
    Auto(AutoLayout),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoLayout {
    /// Switch only when the request named no layout of its own.
    Auto,
}

impl LoadRequest {
    /// The namespace, taken from `volumeKeySuffix`, then `volumeKeyUID`,
    /// then `uid`.
    pub fn namespace(&self) -> Option<&str> {
        [&self.volume_key_suffix, &self.volume_key_uid, &self.uid]
            .into_iter()
            .find_map(|candidate| candidate.as_deref().filter(|value| !value.is_empty()))
    }

    pub fn slice_index(&self) -> Option<usize> {
        self.s.and_then(|s| usize::try_from(s).ok())
    }

    pub fn view(&self) -> Option<Orientation> {
        self.v.as_deref().and_then(Orientation::from_view_id)
    }

    /// Whether a landed load should switch the host to the volume's layout.
    pub fn changes_layout(&self) -> bool {
        match self.change_layout {
            None | Some(ChangeLayout::Enabled(true)) => true,
            Some(ChangeLayout::Enabled(false)) => false,
            Some(ChangeLayout::Auto(AutoLayout::Auto)) => self.layout_name.is_none(),
        }
    }

    /// Display name for the url at `index`: the given name, else the last
    /// path segment, else the url itself.
    pub fn name_of(&self, index: usize) -> String {
        let url = self.urls.get(index).map(String::as_str).unwrap_or("");
        if let Some(name) = self
            .names
            .as_ref()
            .and_then(|names| names.get(index))
            .filter(|name| !name.is_empty())
        {
            return name.clone();
        }
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit('/').next() {
            Some(segment) if !segment.is_empty() => segment.to_string(),
            _ => url.to_string(),
        }
    }
}

/// Slice position reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlicePosition {
    Index(u32),
    Instance { n: i32, i: u32 },
    Absolute { s: u32 },
    /// Original source path of the slice, for hosts that keep a file picker.
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicingEvent {
    pub uid: String,
    pub slice: SlicePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Load,
    Unload,
    Unselect,
    Slicing,
    Close,
    SaveSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Load(LoadRequest),
    Unload,
    Unselect,
    Slicing(SlicingEvent),
    Close,
    SaveSession(Option<Value>),
}

impl Envelope {
    pub fn from_json(json: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(self) -> Result<BusMessage, BusError> {
        let payload = self.payload;
        let required = |payload: Option<Value>| payload.ok_or(BusError::MissingPayload(self.kind));
        Ok(match self.kind {
            MessageKind::Load => BusMessage::Load(serde_json::from_value(required(payload)?)?),
            MessageKind::Slicing => {
                BusMessage::Slicing(serde_json::from_value(required(payload)?)?)
            }
            MessageKind::Unload => BusMessage::Unload,
            MessageKind::Unselect => BusMessage::Unselect,
            MessageKind::Close => BusMessage::Close,
            MessageKind::SaveSession => BusMessage::SaveSession(payload),
        })
    }
}

impl BusMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BusMessage::Load(_) => MessageKind::Load,
            BusMessage::Unload => MessageKind::Unload,
            BusMessage::Unselect => MessageKind::Unselect,
            BusMessage::Slicing(_) => MessageKind::Slicing,
            BusMessage::Close => MessageKind::Close,
            BusMessage::SaveSession(_) => MessageKind::SaveSession,
        }
    }

    pub fn into_envelope(self, from: Option<String>, to: Option<String>) -> Result<Envelope, BusError> {
        let kind = self.kind();
        let payload = match self {
            BusMessage::Load(request) => Some(serde_json::to_value(request)?),
            BusMessage::Slicing(event) => Some(serde_json::to_value(event)?),
            BusMessage::SaveSession(payload) => payload,
            BusMessage::Unload | BusMessage::Unselect | BusMessage::Close => None,
        };
        Ok(Envelope {
            kind,
            payload,
            from,
            to,
        })
    }
}
