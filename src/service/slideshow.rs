use crate::db::models::{FileType, FileUpload};
use crate::db::{ResilientSession, SessionBackend};
use crate::error::CorpfrontError;
use crate::service::config_store::ConfigStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

const KEY_FILE_URL: &str = "slideshow_file_url";
const KEY_FILE_NAME: &str = "slideshow_file_name";
const KEY_TYPE: &str = "slideshow_type";
const KEY_EMBED_URL: &str = "slideshow_embed_url";

pub const MIN_INTERVAL_SECS: i64 = 1;
pub const MAX_INTERVAL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlideshowKind {
    #[default]
    File,
    Url,
}

/// What the dashboard polls for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideshowState {
    pub is_active: bool,
    #[serde(rename = "type")]
    pub kind: SlideshowKind,
    pub source: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    #[serde(skip)]
    pub stored_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub interval_seconds: u32,
}

impl SlideshowState {
    fn idle(interval_seconds: u32) -> Self {
        Self {
            is_active: false,
            kind: SlideshowKind::File,
            source: None,
            file_url: None,
            file_name: None,
            stored_path: None,
            started_at: None,
            interval_seconds,
        }
    }

    fn show_file(&mut self, file_url: String, file_name: String, stored_path: Option<String>) {
        self.kind = SlideshowKind::File;
        self.source = Some(file_url.clone());
        self.file_url = Some(file_url);
        self.file_name = Some(file_name);
        self.stored_path = stored_path;
    }

    fn show_url(&mut self, embed_url: String) {
        self.kind = SlideshowKind::Url;
        self.source = Some(embed_url);
        self.file_url = None;
        self.file_name = None;
        self.stored_path = None;
    }

    fn has_source(&self) -> bool {
        self.source.is_some() || self.file_url.is_some()
    }
}

// Persisted source as found in the database.
enum PersistedSource {
    File {
        file_url: String,
        file_name: String,
        stored_path: Option<String>,
    },
    Url(String),
}

/// Presentation state for the dashboard's slideshow panel.
///
/// Whether the show is running lives only in memory; which file or URL it
/// shows is persisted through the [`ConfigStore`] so it survives restarts.
#[derive(Debug, Clone)]
pub struct SlideshowService {
    state: Arc<RwLock<SlideshowState>>,
    config: ConfigStore,
    public_base_url: String,
}

impl SlideshowService {
    pub fn new(config: ConfigStore, default_interval: u32, public_base_url: impl Into<String>) -> Self {
        let interval = clamp_interval(i64::from(default_interval));
        Self {
            state: Arc::new(RwLock::new(SlideshowState::idle(interval))),
            config,
            public_base_url: public_base_url.into(),
        }
    }

    /// Current state after reloading the persisted source.
    pub async fn state<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
    ) -> Result<SlideshowState, CorpfrontError> {
        let persisted = self.load_persisted(session).await?;
        let mut state = self.state.write().await;
        match persisted {
            Some(PersistedSource::File {
                file_url,
                file_name,
                stored_path,
            }) => state.show_file(file_url, file_name, stored_path),
            Some(PersistedSource::Url(url)) => state.show_url(url),
            None => {}
        }
        Ok(state.clone())
    }

    /// Record an uploaded presentation and make it the current source.
    pub async fn set_file<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        file_url: &str,
        file_name: &str,
        stored_path: &str,
    ) -> Result<SlideshowState, CorpfrontError> {
        let mut upload = FileUpload::new(FileType::Slideshow, file_name, stored_path);
        upload.storage_url = Some(file_url.to_string());
        session.add(upload);
        if let Err(e) = session.commit().await {
            warn!(error = %e, file_name, "failed to record slideshow upload");
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "rollback after failed upload record failed");
            }
        }

        self.config
            .set_many(
                session,
                &[
                    (KEY_FILE_URL, file_url),
                    (KEY_FILE_NAME, file_name),
                    (KEY_TYPE, "file"),
                    (KEY_EMBED_URL, ""),
                ],
            )
            .await?;

        let mut state = self.state.write().await;
        state.show_file(
            file_url.to_string(),
            file_name.to_string(),
            Some(stored_path.to_string()),
        );
        info!(file_name, "slideshow file set");
        Ok(state.clone())
    }

    /// Show an embeddable web page instead of a file.
    pub async fn set_url<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        embed_url: &str,
    ) -> Result<SlideshowState, CorpfrontError> {
        let url = embed_url.trim();
        if url.is_empty() {
            return Err(CorpfrontError::BadRequest("embed_url is required".to_string()));
        }
        if !is_valid_url(url) {
            return Err(CorpfrontError::BadRequest(
                "Invalid URL. Must be a valid http or https URL.".to_string(),
            ));
        }

        self.config
            .set_many(
                session,
                &[
                    (KEY_FILE_URL, ""),
                    (KEY_FILE_NAME, ""),
                    (KEY_TYPE, "url"),
                    (KEY_EMBED_URL, url),
                ],
            )
            .await?;

        let mut state = self.state.write().await;
        state.show_url(url.to_string());
        info!(url, "slideshow embed url set");
        Ok(state.clone())
    }

    /// Start showing the current source. `interval` is clamped to 1..=300 seconds.
    pub async fn start(&self, interval: Option<i64>) -> Result<SlideshowState, CorpfrontError> {
        let mut state = self.state.write().await;
        if !state.has_source() {
            return Err(CorpfrontError::BadRequest(
                "No presentation set. Please upload a file or set an embed URL first.".to_string(),
            ));
        }
        if let Some(secs) = interval {
            state.interval_seconds = clamp_interval(secs);
        }
        state.is_active = true;
        state.started_at = Some(Utc::now());
        info!(interval_seconds = state.interval_seconds, "slideshow started");
        Ok(state.clone())
    }

    pub async fn stop(&self) -> SlideshowState {
        let mut state = self.state.write().await;
        state.is_active = false;
        state.started_at = None;
        info!("slideshow stopped");
        state.clone()
    }

    /// Forget the current file. Idempotent.
    ///
    /// When the file was only known through the upload ledger, that ledger
    /// row is deleted as well so it does not come back on the next reload.
    pub async fn clear_file<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
    ) -> Result<(), CorpfrontError> {
        let file_url = self.config.get(session, KEY_FILE_URL).await?;
        if file_url.as_deref().and_then(uploads_relative_path).is_none()
            && let Some(upload) = last_upload(session, FileType::Slideshow).await?
        {
            session.delete(&upload)?;
            session.commit().await?;
            info!(stored_path = %upload.stored_path, "removed fallback slideshow upload");
        }

        self.config
            .set_many(
                session,
                &[
                    (KEY_FILE_URL, ""),
                    (KEY_FILE_NAME, ""),
                    (KEY_TYPE, ""),
                    (KEY_EMBED_URL, ""),
                ],
            )
            .await?;

        let mut state = self.state.write().await;
        state.kind = SlideshowKind::File;
        state.source = None;
        state.file_url = None;
        state.file_name = None;
        state.stored_path = None;
        Ok(())
    }

    async fn load_persisted<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
    ) -> Result<Option<PersistedSource>, CorpfrontError> {
        let file_url = self.config.get(session, KEY_FILE_URL).await?;
        let file_name = self.config.get(session, KEY_FILE_NAME).await?;
        let kind = self.config.get(session, KEY_TYPE).await?;
        let embed_url = self.config.get(session, KEY_EMBED_URL).await?;

        if let (Some(file_url), Some(file_name)) = (file_url, file_name) {
            return Ok(Some(PersistedSource::File {
                file_url,
                file_name,
                stored_path: None,
            }));
        }
        if kind.as_deref() == Some("url")
            && let Some(url) = embed_url
        {
            return Ok(Some(PersistedSource::Url(url)));
        }

        let Some(upload) = last_upload(session, FileType::Slideshow).await? else {
            return Ok(None);
        };
        let file_url = match upload.storage_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ if !upload.stored_path.is_empty() => {
                public_upload_url(&self.public_base_url, &upload.stored_path)
            }
            _ => return Ok(None),
        };
        let file_name = if upload.original_filename.is_empty() {
            "slideshow".to_string()
        } else {
            upload.original_filename
        };
        Ok(Some(PersistedSource::File {
            file_url,
            file_name,
            stored_path: Some(upload.stored_path),
        }))
    }
}

/// Most recent upload of `file_type`, if any.
pub async fn last_upload<B: SessionBackend>(
    session: &mut ResilientSession<B>,
    file_type: FileType,
) -> Result<Option<FileUpload>, CorpfrontError> {
    Ok(session
        .query::<FileUpload>()
        .filter_eq("file_type", file_type)
        .order_by_desc("created_at")
        .order_by_desc("id")
        .first()
        .await?)
}

pub fn clamp_interval(secs: i64) -> u32 {
    // Bounded to 1..=300 so the cast cannot truncate.
    secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS) as u32
}

fn is_valid_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

fn public_upload_url(base: &str, stored_path: &str) -> String {
    let path = stored_path.trim_start_matches('/');
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("/uploads/{path}")
    } else {
        format!("{base}/uploads/{path}")
    }
}

fn uploads_relative_path(file_url: &str) -> Option<&str> {
    let (_, rest) = file_url.split_once("/uploads/")?;
    let rest = rest.trim().trim_start_matches('/');
    (!rest.is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_are_clamped() {
        assert_eq!(clamp_interval(0), 1);
        assert_eq!(clamp_interval(-20), 1);
        assert_eq!(clamp_interval(45), 45);
        assert_eq!(clamp_interval(10_000), 300);
    }

    #[test]
    fn only_http_urls_with_a_host_are_accepted() {
        assert!(is_valid_url("https://docs.google.com/presentation/d/abc/embed"));
        assert!(is_valid_url("http://intranet.local/slides"));
        assert!(!is_valid_url("ftp://files.example.com/deck.pdf"));
        assert!(!is_valid_url("javascript:alert(1)"));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn upload_links_are_built_from_the_base_url() {
        assert_eq!(
            public_upload_url("http://localhost:8080/", "/slideshow/deck.pdf"),
            "http://localhost:8080/uploads/slideshow/deck.pdf"
        );
        assert_eq!(public_upload_url("", "deck.pdf"), "/uploads/deck.pdf");
    }

    #[test]
    fn relative_upload_path_is_extracted() {
        assert_eq!(
            uploads_relative_path("http://localhost:8080/uploads/slideshow/deck.pdf"),
            Some("slideshow/deck.pdf")
        );
        assert_eq!(uploads_relative_path("https://cdn.example.com/deck.pdf"), None);
        assert_eq!(uploads_relative_path("http://x/uploads/"), None);
    }

    #[test]
    fn state_serializes_kind_as_type() {
        let json = serde_json::to_value(SlideshowState::idle(5)).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["interval_seconds"], 5);
        assert!(json.get("stored_path").is_none());
    }
}
