use crate::db::models::{FileType, FileUpload};
use crate::db::{ResilientSession, SessionBackend};
use crate::error::CorpfrontError;
use crate::service::config_store::ConfigStore;
use crate::service::slideshow::last_upload;
use serde::{Deserialize, Serialize};
use tracing::info;

const KEY_ID: &str = "revenue_trend_file_id";
const KEY_NAME: &str = "revenue_trend_file_name";
const KEY_PATH: &str = "revenue_trend_file_path";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentRevenueFile {
    pub file_id: Option<i64>,
    pub file_name: String,
    pub file_path: String,
}

/// Pointer to the revenue workbook the trend chart is built from.
#[derive(Debug, Clone)]
pub struct RevenueFileService {
    config: ConfigStore,
}

impl RevenueFileService {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    /// The pointed-at file, else the latest revenue upload.
    pub async fn current<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
    ) -> Result<CurrentRevenueFile, CorpfrontError> {
        let file_id = self.config.get(session, KEY_ID).await?;
        let file_name = self.config.get(session, KEY_NAME).await?;
        let file_path = self.config.get(session, KEY_PATH).await?;

        if file_id.is_some() || file_name.is_some() {
            return Ok(CurrentRevenueFile {
                file_id: file_id.and_then(|id| id.parse().ok()),
                file_name: file_name.unwrap_or_default(),
                file_path: file_path.unwrap_or_default(),
            });
        }

        match last_upload(session, FileType::Revenue).await? {
            Some(upload) => Ok(CurrentRevenueFile {
                file_id: upload.id,
                file_name: upload.original_filename,
                file_path: upload.stored_path,
            }),
            None => Err(CorpfrontError::NotFound(
                "No revenue file uploaded yet".to_string(),
            )),
        }
    }

    /// Point at a processed upload.
    pub async fn set_current<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
        upload: &FileUpload,
    ) -> Result<(), CorpfrontError> {
        let id = upload.id.map(|id| id.to_string()).unwrap_or_default();
        self.config
            .set_many(
                session,
                &[
                    (KEY_ID, id.as_str()),
                    (KEY_NAME, upload.original_filename.as_str()),
                    (KEY_PATH, upload.stored_path.as_str()),
                ],
            )
            .await?;
        info!(file_id = %id, file_name = %upload.original_filename, "revenue file pointer updated");
        Ok(())
    }

    /// Blank the pointer so the next upload replaces it.
    pub async fn clear<B: SessionBackend>(
        &self,
        session: &mut ResilientSession<B>,
    ) -> Result<(), CorpfrontError> {
        self.config
            .set_many(session, &[(KEY_ID, ""), (KEY_NAME, ""), (KEY_PATH, "")])
            .await?;
        info!("revenue file pointer cleared");
        Ok(())
    }
}
