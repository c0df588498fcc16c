use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILE_FIELDS: &str = "id,name,mimeType,parents,owners(emailAddress)";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,parents,owners(emailAddress))";
const DRIVES_PAGE_SIZE: u32 = 100;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments")]
    CannotBeABase,
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        error: Option<ApiErrorBody>,
        body: String,
    },
}

/// Which children a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFilter {
    Folders,
    Files,
    All,
}

impl ChildFilter {
    /// Builds the `q` expression selecting non-trashed children of `parent_id`.
    pub fn query(self, parent_id: &str) -> String {
        let parent = escape_query_literal(parent_id);
        let base = format!("'{parent}' in parents and trashed = false");
        match self {
            ChildFilter::Folders => format!("{base} and mimeType = '{FOLDER_MIME_TYPE}'"),
            ChildFilter::Files => format!("{base} and mimeType != '{FOLDER_MIME_TYPE}'"),
            ChildFilter::All => base,
        }
    }
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.file_endpoint(file_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");
        self.send(Method::GET, url, None).await
    }

    /// Fetches one page of the children of `parent_id`.
    ///
    /// With `drive_id` set the listing is scoped to that shared drive.
    pub async fn list_children_page(
        &self,
        parent_id: &str,
        filter: ChildFilter,
        page_size: u32,
        page_token: Option<&str>,
        drive_id: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", &filter.query(parent_id))
                .append_pair("fields", LIST_FIELDS)
                .append_pair("pageSize", &page_size.max(1).to_string())
                .append_pair("spaces", "drive")
                .append_pair("supportsAllDrives", "true")
                .append_pair("includeItemsFromAllDrives", "true");
            if let Some(drive_id) = drive_id {
                query
                    .append_pair("corpora", "drive")
                    .append_pair("driveId", drive_id);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        self.send(Method::GET, url, None).await
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn update_parents(
        &self,
        file_id: &str,
        update: &FileUpdate,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.file_endpoint(file_id, &[])?;
        {
            let mut query = url.query_pairs_mut();
            if !update.add_parents.is_empty() {
                query.append_pair("addParents", &update.add_parents.join(","));
            }
            if !update.remove_parents.is_empty() {
                query.append_pair("removeParents", &update.remove_parents.join(","));
            }
            query
                .append_pair("fields", FILE_FIELDS)
                .append_pair("supportsAllDrives", "true");
        }
        self.send(Method::PATCH, url, Some(serde_json::json!({})))
            .await
    }

    pub async fn transfer_ownership(
        &self,
        file_id: &str,
        email: &str,
    ) -> Result<Permission, DriveError> {
        let mut url = self.file_endpoint(file_id, &["permissions"])?;
        url.query_pairs_mut()
            .append_pair("transferOwnership", "true")
            .append_pair("supportsAllDrives", "true");
        let body = serde_json::json!({
            "role": "owner",
            "type": "user",
            "emailAddress": email,
        });
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn list_drives(&self) -> Result<Vec<SharedDrive>, DriveError> {
        let mut drives = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint("/drive/v3/drives")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &DRIVES_PAGE_SIZE.to_string());
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }
            let page: SharedDriveList = self.send(Method::GET, url, None).await?;
            drives.extend(page.drives);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(drives)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_endpoint(&self, file_id: &str, suffix: &[&str]) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.path_segments_mut()
            .map_err(|_| DriveError::CannotBeABase)?
            .push(file_id)
            .extend(suffix);
        Ok(url)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, DriveError> {
        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", self.auth_header_value());
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::handle_response(request.send().await?).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .ok()
                .map(|envelope| envelope.error);
            Err(DriveError::Api {
                status,
                error,
                body,
            })
        }
    }
}

impl DriveError {
    /// Reason code of the first structured sub-error, if the API sent one.
    pub fn first_reason(&self) -> Option<&str> {
        match self {
            DriveError::Api {
                error: Some(error), ..
            } => error.errors.first().map(|detail| detail.reason.as_str()),
            _ => None,
        }
    }
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub owners: Vec<DriveOwner>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    pub fn owner_email(&self) -> Option<&str> {
        self.owners
            .iter()
            .find_map(|owner| owner.email_address.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveOwner {
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Parent changes applied by a single `files.update` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileUpdate {
    pub add_parents: Vec<String>,
    pub remove_parents: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Permission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SharedDrive {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDriveList {
    #[serde(default)]
    pub drives: Vec<SharedDrive>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}
