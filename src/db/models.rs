use crate::db::entity::Entity;
use crate::db::value::{Column, Row, Value};
use crate::error::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One key in the dashboard's key-value configuration table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub id: Option<i64>,
    pub config_key: String,
    pub config_value: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl ApiConfig {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            config_key: key.into(),
            config_value: Some(value.into()),
            description: None,
            is_active: true,
            updated_at: Some(Utc::now()),
            updated_by: None,
        }
    }
}

impl Entity for ApiConfig {
    const TABLE: &'static str = "api_configs";
    const COLUMNS: &'static [Column] = &[
        Column::int("id"),
        Column::text("config_key"),
        Column::text("config_value"),
        Column::text("description"),
        Column::bool("is_active"),
        Column::text("updated_at"),
        Column::text("updated_by"),
    ];

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: Some(row.get_i64("id")?),
            config_key: row.get_str("config_key")?.to_string(),
            config_value: row.get_opt_str("config_value")?.map(str::to_string),
            description: row.get_opt_str("description")?.map(str::to_string),
            is_active: row.get_bool("is_active")?,
            updated_at: row.get_opt_datetime("updated_at")?,
            updated_by: row.get_opt_str("updated_by")?.map(str::to_string),
        })
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("config_key", self.config_key.clone().into()),
            ("config_value", self.config_value.clone().into()),
            ("description", self.description.clone().into()),
            ("is_active", self.is_active.into()),
            ("updated_at", self.updated_at.into()),
            ("updated_by", self.updated_by.clone().into()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Revenue,
    Slideshow,
    Employee,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Revenue => "revenue",
            FileType::Slideshow => "slideshow",
            FileType::Employee => "employee",
            FileType::Other => "other",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "revenue" => Ok(FileType::Revenue),
            "slideshow" => Ok(FileType::Slideshow),
            "employee" => Ok(FileType::Employee),
            "other" => Ok(FileType::Other),
            other => Err(DbError::Decode {
                column: "file_type".to_string(),
                reason: format!("unknown file type `{other}`"),
            }),
        }
    }
}

impl From<FileType> for Value {
    fn from(v: FileType) -> Self {
        Value::Text(v.as_str().to_string())
    }
}

/// A row of the upload ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileUpload {
    pub id: Option<i64>,
    pub original_filename: String,
    pub stored_path: String,
    pub storage_url: Option<String>,
    pub file_type: FileType,
    pub file_size: Option<i64>,
    pub uploaded_by: Option<String>,
    pub processed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileUpload {
    pub fn new(
        file_type: FileType,
        original_filename: impl Into<String>,
        stored_path: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            original_filename: original_filename.into(),
            stored_path: stored_path.into(),
            storage_url: None,
            file_type,
            file_size: None,
            uploaded_by: None,
            processed: false,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

impl Entity for FileUpload {
    const TABLE: &'static str = "file_uploads";
    const COLUMNS: &'static [Column] = &[
        Column::int("id"),
        Column::text("original_filename"),
        Column::text("stored_path"),
        Column::text("storage_url"),
        Column::text("file_type"),
        Column::int("file_size"),
        Column::text("uploaded_by"),
        Column::bool("processed"),
        Column::text("error_message"),
        Column::text("created_at"),
    ];

    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: Some(row.get_i64("id")?),
            original_filename: row.get_str("original_filename")?.to_string(),
            stored_path: row.get_str("stored_path")?.to_string(),
            storage_url: row.get_opt_str("storage_url")?.map(str::to_string),
            file_type: row.get_str("file_type")?.parse()?,
            file_size: row.get_opt_i64("file_size")?,
            uploaded_by: row.get_opt_str("uploaded_by")?.map(str::to_string),
            processed: row.get_bool("processed")?,
            error_message: row.get_opt_str("error_message")?.map(str::to_string),
            created_at: row.get_datetime("created_at")?,
        })
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn insert_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("original_filename", self.original_filename.clone().into()),
            ("stored_path", self.stored_path.clone().into()),
            ("storage_url", self.storage_url.clone().into()),
            ("file_type", self.file_type.into()),
            ("file_size", self.file_size.into()),
            ("uploaded_by", self.uploaded_by.clone().into()),
            ("processed", self.processed.into()),
            ("error_message", self.error_message.clone().into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::value::ColumnType;

    #[test]
    fn file_type_round_trips_through_text() {
        assert_eq!("Slideshow".parse::<FileType>().unwrap(), FileType::Slideshow);
        assert_eq!(Value::from(FileType::Revenue), Value::Text("revenue".into()));
        assert!("pdf".parse::<FileType>().is_err());
    }

    #[test]
    fn api_config_reads_integer_flags() {
        let row = Row::new()
            .with("id", 3_i64)
            .with("config_key", "slideshow_type")
            .with("config_value", "url")
            .with("description", Value::Null)
            .with("is_active", 1_i64)
            .with("updated_at", Value::Null)
            .with("updated_by", Value::Null);
        let cfg = ApiConfig::from_row(&row).unwrap();
        assert_eq!(cfg.id, Some(3));
        assert!(cfg.is_active);
        assert_eq!(cfg.config_value.as_deref(), Some("url"));
        assert!(cfg.updated_at.is_none());
    }

    #[test]
    fn missing_upload_size_is_an_integer_null() {
        let upload = FileUpload::new(FileType::Slideshow, "deck.pdf", "slideshow/deck.pdf");
        let values = upload.typed_insert_values();
        let find = |name: &str| values.iter().find(|(n, _)| *n == name).map(|(_, v)| v.clone());
        assert_eq!(find("file_size"), Some(Value::TypedNull(ColumnType::Int)));
        assert_eq!(find("uploaded_by"), Some(Value::TypedNull(ColumnType::Text)));

        let stmt = upload.insert_statement();
        assert!(stmt.params.contains(&Value::TypedNull(ColumnType::Int)));
        assert!(!stmt.params.contains(&Value::Null));
    }
}
