use std::collections::BTreeMap;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::signature::Credentials;
use crate::types::{
    ApiFailure, CheckTicketsResponse, CreatePhotosetResponse, LoginResponse, Photo, PhotoId,
    Photoset, PhotosetId, PhotosetListResponse, PhotosetPhotosResponse, SizesResponse, TicketId,
    TicketStatus, User,
};
use crate::upload::{UploadReceipt, UploadRequest, parse_upload_response};

const DEFAULT_REST_URL: &str = "https://api.flickr.com/services/rest/";
const DEFAULT_UPLOAD_URL: &str = "https://up.flickr.com/services/upload/";
const PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum FlickrError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("api error {code}: {message}")]
    Api { code: u32, message: String },
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upload response missing <{0}>")]
    MalformedUpload(&'static str),
    #[error("photo {0} has no original size")]
    MissingOriginal(PhotoId),
}

#[derive(Clone)]
pub struct FlickrClient {
    http: Client,
    rest_url: Url,
    upload_url: Url,
    credentials: Credentials,
}

impl FlickrClient {
    pub fn new(credentials: Credentials) -> Result<Self, FlickrError> {
        Ok(Self {
            http: Client::new(),
            rest_url: Url::parse(DEFAULT_REST_URL)?,
            upload_url: Url::parse(DEFAULT_UPLOAD_URL)?,
            credentials,
        })
    }

    /// Points both the REST and the upload endpoints at `base_url`.
    pub fn with_base_url(base_url: &str, credentials: Credentials) -> Result<Self, FlickrError> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            http: Client::new(),
            rest_url: base.join("/services/rest/")?,
            upload_url: base.join("/services/upload/")?,
            credentials,
        })
    }

    pub async fn test_login(&self) -> Result<User, FlickrError> {
        let payload: LoginResponse = self.get("flickr.test.login", &[]).await?;
        Ok(payload.user)
    }

    pub async fn list_photosets(&self) -> Result<Vec<Photoset>, FlickrError> {
        let per_page = PAGE_SIZE.to_string();
        let mut page = 1u32;
        let mut sets = Vec::new();
        loop {
            let page_param = page.to_string();
            let payload: PhotosetListResponse = self
                .get(
                    "flickr.photosets.getList",
                    &[("page", page_param.as_str()), ("per_page", per_page.as_str())],
                )
                .await?;
            sets.extend(payload.photosets.photoset);
            if page >= payload.photosets.pages {
                break;
            }
            page += 1;
        }
        Ok(sets)
    }

    pub async fn list_photoset_photos(
        &self,
        photoset: &PhotosetId,
    ) -> Result<Vec<Photo>, FlickrError> {
        let per_page = PAGE_SIZE.to_string();
        let mut page = 1u32;
        let mut photos = Vec::new();
        loop {
            let page_param = page.to_string();
            let payload: PhotosetPhotosResponse = self
                .get(
                    "flickr.photosets.getPhotos",
                    &[
                        ("photoset_id", photoset.as_str()),
                        ("extras", "original_format"),
                        ("page", page_param.as_str()),
                        ("per_page", per_page.as_str()),
                    ],
                )
                .await?;
            photos.extend(payload.photoset.photo);
            if page >= payload.photoset.pages {
                break;
            }
            page += 1;
        }
        Ok(photos)
    }

    pub async fn original_url(&self, photo: &PhotoId) -> Result<Url, FlickrError> {
        let payload: SizesResponse = self
            .get("flickr.photos.getSizes", &[("photo_id", photo.as_str())])
            .await?;
        let original = payload
            .sizes
            .size
            .into_iter()
            .find(|size| size.label == "Original")
            .ok_or_else(|| FlickrError::MissingOriginal(photo.clone()))?;
        Ok(Url::parse(&original.source)?)
    }

    pub async fn check_tickets(
        &self,
        tickets: &[TicketId],
    ) -> Result<Vec<TicketStatus>, FlickrError> {
        let joined = tickets
            .iter()
            .map(TicketId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let payload: CheckTicketsResponse = self
            .get("flickr.photos.upload.checkTickets", &[("tickets", joined.as_str())])
            .await?;
        Ok(payload
            .uploader
            .ticket
            .into_iter()
            .map(|ticket| ticket.into_status())
            .collect())
    }

    pub async fn create_photoset(
        &self,
        title: &str,
        primary: &PhotoId,
    ) -> Result<PhotosetId, FlickrError> {
        let payload: CreatePhotosetResponse = self
            .post(
                "flickr.photosets.create",
                &[("title", title), ("primary_photo_id", primary.as_str())],
            )
            .await?;
        Ok(payload.photoset.id)
    }

    pub async fn add_to_photoset(
        &self,
        photoset: &PhotosetId,
        photo: &PhotoId,
    ) -> Result<(), FlickrError> {
        let _: IgnoredAny = self
            .post(
                "flickr.photosets.addPhoto",
                &[("photoset_id", photoset.as_str()), ("photo_id", photo.as_str())],
            )
            .await?;
        Ok(())
    }

    pub async fn remove_from_photoset(
        &self,
        photoset: &PhotosetId,
        photo: &PhotoId,
    ) -> Result<(), FlickrError> {
        let _: IgnoredAny = self
            .post(
                "flickr.photosets.removePhoto",
                &[("photoset_id", photoset.as_str()), ("photo_id", photo.as_str())],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_photo(&self, photo: &PhotoId) -> Result<(), FlickrError> {
        let _: IgnoredAny = self
            .post("flickr.photos.delete", &[("photo_id", photo.as_str())])
            .await?;
        Ok(())
    }

    pub async fn set_photo_title(&self, photo: &PhotoId, title: &str) -> Result<(), FlickrError> {
        let _: IgnoredAny = self
            .post(
                "flickr.photos.setMeta",
                &[("photo_id", photo.as_str()), ("title", title)],
            )
            .await?;
        Ok(())
    }

    pub async fn set_photoset_title(
        &self,
        photoset: &PhotosetId,
        title: &str,
    ) -> Result<(), FlickrError> {
        let _: IgnoredAny = self
            .post(
                "flickr.photosets.editMeta",
                &[("photoset_id", photoset.as_str()), ("title", title)],
            )
            .await?;
        Ok(())
    }

    /// Uploads a photo visible to the owner only.
    pub async fn upload_photo(&self, request: UploadRequest) -> Result<UploadReceipt, FlickrError> {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), request.title.clone());
        fields.insert("is_public".to_string(), "0".to_string());
        fields.insert("is_friend".to_string(), "0".to_string());
        fields.insert("is_family".to_string(), "0".to_string());
        fields.insert("hidden".to_string(), "2".to_string());
        if request.asynchronous {
            fields.insert("async".to_string(), "1".to_string());
        }
        self.credentials.sign(&mut fields);

        let part = match request.content_length {
            Some(length) => Part::stream_with_length(request.body, length),
            None => Part::stream(request.body),
        }
        .file_name(request.file_name);
        let form = fields
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value))
            .part("photo", part);

        let response = self
            .http
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FlickrError::Http { status, body });
        }
        parse_upload_response(&body)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T, FlickrError> {
        let query = self.signed_params(method, params);
        let response = self
            .http
            .get(self.rest_url.clone())
            .query(&query)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T, FlickrError> {
        let form = self.signed_params(method, params);
        let response = self
            .http
            .post(self.rest_url.clone())
            .form(&form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn signed_params(&self, method: &str, params: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut all: BTreeMap<String, String> = params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        all.insert("method".into(), method.into());
        all.insert("format".into(), "json".into());
        all.insert("nojsoncallback".into(), "1".into());
        self.credentials.sign(&mut all);
        all
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, FlickrError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FlickrError::Http { status, body });
        }
        decode_envelope(&body)
    }
}

// Flickr answers 200 for API failures and flags them with "stat": "fail".
fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T, FlickrError> {
    let value: Value = serde_json::from_str(body)?;
    if value.get("stat").and_then(Value::as_str) == Some("fail") {
        let failure: ApiFailure = serde_json::from_value(value)?;
        return Err(FlickrError::Api {
            code: failure.code,
            message: failure.message,
        });
    }
    Ok(serde_json::from_value(value)?)
}

impl FlickrError {
    /// True when the service rejected the credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            FlickrError::Api { code, .. } => matches!(code, 96 | 97 | 98 | 99 | 100),
            FlickrError::Http { status, .. } => {
                matches!(*status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            }
            _ => false,
        }
    }
}
