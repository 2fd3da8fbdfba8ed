use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(PhotoId);
string_id!(PhotosetId);
string_id!(TicketId);

#[derive(Debug, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    #[serde(default, deserialize_with = "content_string")]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Photoset {
    pub id: PhotosetId,
    #[serde(default)]
    pub primary: Option<PhotoId>,
    #[serde(deserialize_with = "content_string")]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Photo {
    pub id: PhotoId,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "originalformat")]
    pub original_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Complete(PhotoId),
    Failed,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketStatus {
    pub id: TicketId,
    pub state: TicketState,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotosetListResponse {
    pub photosets: PhotosetPage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotosetPage {
    #[serde(default, deserialize_with = "flexible_u32")]
    pub pages: u32,
    #[serde(default)]
    pub photoset: Vec<Photoset>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotosetPhotosResponse {
    pub photoset: PhotoPage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotoPage {
    #[serde(default, deserialize_with = "flexible_u32")]
    pub pages: u32,
    #[serde(default)]
    pub photo: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SizesResponse {
    pub sizes: SizeList,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SizeList {
    #[serde(default)]
    pub size: Vec<Size>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Size {
    pub label: String,
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckTicketsResponse {
    pub uploader: TicketList,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TicketList {
    #[serde(default)]
    pub ticket: Vec<RawTicket>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTicket {
    pub id: TicketId,
    #[serde(default, deserialize_with = "flexible_u32")]
    pub complete: u32,
    #[serde(default, deserialize_with = "flexible_u32")]
    pub invalid: u32,
    #[serde(default)]
    pub photoid: Option<PhotoId>,
}

impl RawTicket {
    pub(crate) fn into_status(self) -> TicketStatus {
        let state = if self.invalid != 0 {
            TicketState::Invalid
        } else {
            match (self.complete, self.photoid) {
                (1, Some(photo)) => TicketState::Complete(photo),
                (2, _) => TicketState::Failed,
                _ => TicketState::Pending,
            }
        };
        TicketStatus { id: self.id, state }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatePhotosetResponse {
    pub photoset: CreatedPhotoset,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedPhotoset {
    pub id: PhotosetId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiFailure {
    #[serde(default, deserialize_with = "flexible_u32")]
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

// Flickr reports some counters as numbers and others as numeric strings.
fn flexible_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u32),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(value) => Ok(value),
        Flexible::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

// Text nodes arrive either inline or wrapped as {"_content": "..."}.
fn content_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Plain(String),
        Wrapped {
            #[serde(rename = "_content")]
            content: String,
        },
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::Plain(text) => text,
        Text::Wrapped { content } => content,
    })
}
