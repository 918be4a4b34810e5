//! Nextcloud WebDAV connector
//!
//! Implements `RemoteStore` on top of the Nextcloud files and system-tags
//! WebDAV endpoints.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{FileSystemAccess, RemoteEntry, RemoteStore, RemoteTag};
use core_runtime::config::WebDavSettings;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::WebDavError;
use crate::types::{parse_multistatus, PropResponse};

/// Timeout for metadata requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for uploads and downloads
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

const LIST_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <oc:fileid/>
  </d:prop>
</d:propfind>"#;

const TAG_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <oc:id/>
    <oc:display-name/>
  </d:prop>
</d:propfind>"#;

const EXISTS_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:resourcetype/></d:prop>
</d:propfind>"#;

/// Nextcloud WebDAV connector
///
/// Paths given to the connector are relative to the user's files root, for
/// example `_raw/raw_photo1.jpg`.
///
/// # Example
///
/// ```ignore
/// use provider_webdav::NextcloudConnector;
///
/// let connector = NextcloudConnector::new(http_client, fs, settings);
/// let entries = connector.list("_raw").await?;
/// ```
pub struct NextcloudConnector {
    http_client: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    settings: WebDavSettings,
    /// Absolute URL of the user's files root, no trailing slash
    files_root_url: String,
    /// Decoded URL path of the files root, with trailing slash
    files_root_path: String,
}

impl NextcloudConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        settings: WebDavSettings,
    ) -> Self {
        let base = settings.base_url.trim_end_matches('/').to_string();
        let files_root_url = format!(
            "{}/remote.php/dav/files/{}",
            base,
            urlencoding::encode(&settings.username)
        );
        let files_root_path = format!(
            "{}/remote.php/dav/files/{}/",
            url_path(&base).trim_end_matches('/'),
            settings.username
        );

        Self {
            http_client,
            fs,
            settings,
            files_root_url,
            files_root_path,
        }
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    /// Absolute URL for a store-relative path
    fn file_url(&self, path: &str) -> String {
        let encoded = encode_path(path);
        if encoded.is_empty() {
            format!("{}/", self.files_root_url)
        } else {
            format!("{}/{}", self.files_root_url, encoded)
        }
    }

    fn tag_relations_url(&self, item_id: &str) -> String {
        format!(
            "{}/remote.php/dav/systemtags-relations/files/{}",
            self.base_url(),
            urlencoding::encode(item_id)
        )
    }

    /// Map a server href back to a store-relative path
    fn relative_path(&self, href: &str) -> std::result::Result<String, WebDavError> {
        let decoded = urlencoding::decode(url_path(href))
            .map_err(|e| WebDavError::InvalidPath(format!("{}: {}", href, e)))?;

        let relative = decoded
            .strip_prefix(&self.files_root_path)
            .or_else(|| decoded.strip_prefix(self.files_root_path.trim_end_matches('/')))
            .ok_or_else(|| {
                WebDavError::InvalidPath(format!("{} is outside {}", href, self.files_root_path))
            })?;

        Ok(relative.trim_matches('/').to_string())
    }

    fn request(&self, method: HttpMethod, url: impl Into<String>) -> HttpRequest {
        HttpRequest::new(method, url)
            .basic_auth(&self.settings.username, &self.settings.password)
            .timeout(REQUEST_TIMEOUT)
    }

    fn propfind(&self, url: String, depth: &str, body: &str) -> HttpRequest {
        self.request(HttpMethod::Propfind, url)
            .header("Depth", depth)
            .xml(body)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let response = self.http_client.execute(request).await?;
        debug!(method = %method, status = response.status, "WebDAV response");
        Ok(response)
    }

    fn multistatus(&self, response: &HttpResponse) -> Result<Vec<PropResponse>> {
        let body = response.text()?;
        Ok(parse_multistatus(&body)?)
    }

    fn to_entry(&self, response: &PropResponse) -> RemoteEntry {
        let path = match self.relative_path(&response.href) {
            Ok(path) if !path.is_empty() => Some(path),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Unmappable href in listing");
                None
            }
        };
        let name = path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .map(str::to_string);

        RemoteEntry {
            path,
            name,
            is_directory: response.resource_type(),
            id: response.prop("fileid").map(str::to_string),
            raw: response.describe(),
        }
    }

    async fn read_tags(&self, url: String, context: &str) -> Result<Vec<RemoteTag>> {
        let response = self.send(self.propfind(url, "1", TAG_PROPS)).await?;

        if response.status != 207 {
            return Err(status_error(HttpMethod::Propfind, context, &response));
        }

        let tags = self
            .multistatus(&response)?
            .into_iter()
            .filter_map(|entry| match (entry.prop("id"), entry.prop("display-name")) {
                (Some(id), Some(name)) => Some(RemoteTag::new(id, name)),
                (Some(id), None) => {
                    warn!(tag_id = id, "Tag without display name ignored");
                    None
                }
                // The relations collection itself carries no id
                _ => None,
            })
            .collect();

        Ok(tags)
    }
}

#[async_trait]
impl RemoteStore for NextcloudConnector {
    #[instrument(skip(self))]
    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        let directory = directory.trim_matches('/');
        let url = format!("{}/", self.file_url(directory).trim_end_matches('/'));
        let response = self.send(self.propfind(url, "1", LIST_PROPS)).await?;

        if response.status != 207 {
            return Err(status_error(HttpMethod::Propfind, directory, &response));
        }

        let entries: Vec<RemoteEntry> = self
            .multistatus(&response)?
            .iter()
            // Depth 1 includes the directory itself
            .filter(|r| self.relative_path(&r.href).map_or(true, |p| p != directory))
            .map(|r| self.to_entry(r))
            .collect();

        info!(directory, count = entries.len(), "Listed remote directory");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn get_tags(&self, item_id: &str) -> Result<Vec<RemoteTag>> {
        let tags = self.read_tags(self.tag_relations_url(item_id), item_id).await?;
        debug!(item_id, count = tags.len(), "Read item tags");
        Ok(tags)
    }

    #[instrument(skip(self))]
    async fn list_all_tags(&self) -> Result<Vec<RemoteTag>> {
        let url = format!("{}/remote.php/dav/systemtags/", self.base_url());
        self.read_tags(url, "systemtags").await
    }

    #[instrument(skip(self))]
    async fn move_item(&self, source_path: &str, destination_path: &str) -> Result<()> {
        let request = self
            .request(HttpMethod::Move, self.file_url(source_path))
            .header("Destination", self.file_url(destination_path))
            .header("Overwrite", "F");
        let response = self.send(request).await?;

        match response.status {
            201 | 204 => {
                info!(source_path, destination_path, "Moved remote item");
                Ok(())
            }
            412 => Err(BridgeError::AlreadyExists(destination_path.to_string())),
            404 => Err(BridgeError::NotFound(source_path.to_string())),
            _ => Err(status_error(HttpMethod::Move, source_path, &response)),
        }
    }

    #[instrument(skip(self))]
    async fn unassign_tag(&self, item_id: &str, tag_id: &str) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.tag_relations_url(item_id),
            urlencoding::encode(tag_id)
        );
        let response = self.send(self.request(HttpMethod::Delete, url)).await?;

        match response.status {
            200 | 204 => Ok(()),
            404 => {
                debug!(item_id, tag_id, "Tag was not assigned");
                Ok(())
            }
            _ => Err(status_error(HttpMethod::Delete, item_id, &response)),
        }
    }

    #[instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let request = self
            .request(HttpMethod::Get, self.file_url(remote_path))
            .timeout(TRANSFER_TIMEOUT);
        let response = self.send(request).await?;

        if response.status != 200 {
            return Err(status_error(HttpMethod::Get, remote_path, &response));
        }

        let size = response.body.len();
        self.fs.write_file(local_path, response.body).await?;
        debug!(remote_path, size, "Downloaded remote file");
        Ok(())
    }

    #[instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = self.fs.read_file(local_path).await?;
        let size = data.len();
        let request = self
            .request(HttpMethod::Put, self.file_url(remote_path))
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .timeout(TRANSFER_TIMEOUT);
        let response = self.send(request).await?;

        match response.status {
            200 | 201 | 204 => {
                debug!(remote_path, size, "Uploaded file");
                Ok(())
            }
            _ => Err(status_error(HttpMethod::Put, remote_path, &response)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, remote_path: &str) -> Result<()> {
        let response = self
            .send(self.request(HttpMethod::Delete, self.file_url(remote_path)))
            .await?;

        match response.status {
            200 | 204 => Ok(()),
            _ => Err(status_error(HttpMethod::Delete, remote_path, &response)),
        }
    }

    #[instrument(skip(self))]
    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let response = self
            .send(self.propfind(self.file_url(remote_path), "0", EXISTS_PROPS))
            .await?;

        match response.status {
            207 | 200 => Ok(true),
            404 => Ok(false),
            _ => Err(status_error(HttpMethod::Propfind, remote_path, &response)),
        }
    }

    /// Creates every missing ancestor, like `mkdir -p`
    #[instrument(skip(self))]
    async fn create_directory(&self, remote_path: &str) -> Result<()> {
        let mut current = String::new();

        for segment in remote_path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            let response = self
                .send(self.request(HttpMethod::Mkcol, self.file_url(&current)))
                .await?;

            match response.status {
                201 => debug!(path = %current, "Created remote directory"),
                // Method not allowed: the collection already exists
                405 => {}
                _ => return Err(status_error(HttpMethod::Mkcol, &current, &response)),
            }
        }

        Ok(())
    }
}

/// Percent-encode each segment of a store-relative path
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Path component of an absolute URL; relative input is returned as-is
fn url_path(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => url,
    }
}

fn status_error(method: HttpMethod, target: &str, response: &HttpResponse) -> BridgeError {
    let message = String::from_utf8_lossy(&response.body);
    let message = message.trim();
    warn!(method = %method, target, status = response.status, "Unexpected WebDAV status");

    WebDavError::Http {
        method: method.to_string(),
        target: target.to_string(),
        status: response.status,
        message: message.chars().take(200).collect(),
    }
    .into()
}
