//! Windows Search (ESE) database cross-referencing.
//!
//! `Windows.edb` keeps a property-store row per indexed file, including
//! the file's Thumb Cache ID. Joining those rows against thumbcache
//! entries recovers original paths and timestamps the caches themselves
//! never store. The database is opened read-only and reduced to an
//! in-memory map once; low-level page parsing is delegated to libesedb.
//!
//! Property-store values are stored big-endian, unlike the caches.
use crate::common::error::{Error, Result};
use crate::common::time::filetime_to_utc;
use chrono::{DateTime, Utc};
use libesedb::{EseDb, Value};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::Path;

/// Property-store tables tried in order: Windows 8+ first, then Vista/7.
const TABLE_CANDIDATES: [&str; 2] = ["SystemIndex_PropertyStore", "SystemIndex_0A"];

/// Property roles extracted from a row, matched by column-name suffix
/// (Windows Search prefixes column names with a numeric tag).
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnRole {
    CacheId,
    PathDisplay,
    ItemName,
    FileName,
    Extension,
    Size,
    DateModified,
    DateCreated,
    DateAccessed,
    MimeType,
    Image(String),
}

fn role_for(column_name: &str) -> Option<ColumnRole> {
    if column_name.ends_with("System_ThumbnailCacheId") {
        Some(ColumnRole::CacheId)
    } else if column_name.ends_with("System_ItemPathDisplay") {
        Some(ColumnRole::PathDisplay)
    } else if column_name.ends_with("System_ItemName") {
        Some(ColumnRole::ItemName)
    } else if column_name.ends_with("System_FileName") {
        Some(ColumnRole::FileName)
    } else if column_name.ends_with("System_FileExtension") {
        Some(ColumnRole::Extension)
    } else if column_name.ends_with("System_Size") {
        Some(ColumnRole::Size)
    } else if column_name.ends_with("System_DateModified") {
        Some(ColumnRole::DateModified)
    } else if column_name.ends_with("System_DateCreated") {
        Some(ColumnRole::DateCreated)
    } else if column_name.ends_with("System_DateAccessed") {
        Some(ColumnRole::DateAccessed)
    } else if column_name.ends_with("System_MIMEType") {
        Some(ColumnRole::MimeType)
    } else {
        column_name
            .split("System_Image_")
            .nth(1)
            .map(|suffix| ColumnRole::Image(suffix.to_string()))
    }
}

/// Metadata recovered for one indexed file.
#[derive(Debug, Clone, Default)]
pub struct EsedbRow {
    pub path: Option<String>,
    pub item_name: Option<String>,
    pub file_name: Option<String>,
    pub extension: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub mime: Option<String>,
    /// `System_Image_*` properties, kept verbatim for reporting
    pub image_properties: Vec<(String, String)>,
}

impl EsedbRow {
    /// Best available display name for the file.
    pub fn display_name(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .or(self.item_name.as_deref())
            .or_else(|| {
                self.path
                    .as_deref()
                    .and_then(|p| p.rsplit(['\\', '/']).next())
            })
    }
}

/// Read-only view over the property store, keyed by Thumb Cache ID.
#[derive(Debug, Default)]
pub struct EsedbView {
    rows: HashMap<u64, EsedbRow>,
}

impl EsedbView {
    /// Open the database, locate the property-store table, and reduce it
    /// to an in-memory map. The ESE handle is released before returning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = EseDb::open(path.as_ref())
            .map_err(|e| Error::EsedbUnreadable(e.to_string()))?;

        let table = TABLE_CANDIDATES
            .iter()
            .find_map(|name| db.table_by_name(name).ok())
            .ok_or(Error::EsedbSchemaMissing)?;

        // Column index -> role, resolved once per table.
        let mut roles: HashMap<usize, ColumnRole> = HashMap::new();
        for (index, column) in table
            .iter_columns()
            .map_err(|e| Error::EsedbUnreadable(e.to_string()))?
            .enumerate()
        {
            let column = column.map_err(|e| Error::EsedbUnreadable(e.to_string()))?;
            if let Ok(name) = column.name()
                && let Some(role) = role_for(&name)
            {
                roles.insert(index, role);
            }
        }
        if !roles.values().any(|r| *r == ColumnRole::CacheId) {
            return Err(Error::EsedbSchemaMissing);
        }

        let mut rows = HashMap::new();
        let records = table
            .iter_records()
            .map_err(|e| Error::EsedbUnreadable(e.to_string()))?;
        for record in records {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!("skipping unreadable ESE record: {e}");
                    continue;
                }
            };
            let values = match record.iter_values() {
                Ok(v) => v,
                Err(e) => {
                    debug!("skipping ESE record without values: {e}");
                    continue;
                }
            };

            let mut cache_id = None;
            let mut row = EsedbRow::default();
            for (index, value) in values.enumerate() {
                let Ok(value) = value else { continue };
                let Some(role) = roles.get(&index) else {
                    continue;
                };
                match role {
                    ColumnRole::CacheId => cache_id = value_to_u64(&value),
                    ColumnRole::PathDisplay => row.path = value_to_string(&value),
                    ColumnRole::ItemName => row.item_name = value_to_string(&value),
                    ColumnRole::FileName => row.file_name = value_to_string(&value),
                    ColumnRole::Extension => row.extension = value_to_string(&value),
                    ColumnRole::Size => row.size = value_to_u64(&value),
                    ColumnRole::DateModified => row.modified = value_to_time(&value),
                    ColumnRole::DateCreated => row.created = value_to_time(&value),
                    ColumnRole::DateAccessed => row.accessed = value_to_time(&value),
                    ColumnRole::MimeType => row.mime = value_to_string(&value),
                    ColumnRole::Image(name) => {
                        if let Some(text) = value_to_display(&value) {
                            row.image_properties.push((name.clone(), text));
                        }
                    }
                }
            }

            // Rows without a cache id cannot be joined and are skipped.
            if let Some(id) = cache_id {
                rows.insert(id, row);
            }
        }

        if rows.is_empty() {
            warn!("ESE property store yielded no rows with a thumbnail cache id");
        }
        Ok(EsedbView { rows })
    }

    /// Queried by the pipeline exactly once per thumbnail.
    pub fn lookup(&self, cache_id: u64) -> Option<&EsedbRow> {
        self.rows.get(&cache_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_rows(rows: HashMap<u64, EsedbRow>) -> Self {
        EsedbView { rows }
    }
}

/// Windows Search stores multi-byte integers big-endian.
fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Binary(bytes) | Value::LargeBinary(bytes) if bytes.len() >= 8 => {
            Some(u64::from_be_bytes(bytes[..8].try_into().ok()?))
        }
        Value::I64(v) => Some(*v as u64),
        Value::I32(v) => Some(*v as u64),
        Value::U32(v) => Some(u64::from(*v)),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) | Value::LargeText(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn value_to_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Binary(bytes) | Value::LargeBinary(bytes) if bytes.len() >= 8 => {
            filetime_to_utc(u64::from_be_bytes(bytes[..8].try_into().ok()?))
        }
        Value::I64(v) => filetime_to_utc(*v as u64),
        _ => None,
    }
}

fn value_to_display(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) | Value::LargeText(s) => Some(s.clone()),
        Value::I32(v) => Some(v.to_string()),
        Value::U32(v) => Some(v.to_string()),
        Value::I64(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_match_by_suffix() {
        assert_eq!(
            role_for("4396-System_ThumbnailCacheId"),
            Some(ColumnRole::CacheId)
        );
        assert_eq!(
            role_for("System_ItemPathDisplay"),
            Some(ColumnRole::PathDisplay)
        );
        assert_eq!(
            role_for("4443-System_Image_Dimensions"),
            Some(ColumnRole::Image("Dimensions".into()))
        );
        assert_eq!(role_for("System_Author"), None);
    }

    #[test]
    fn cache_id_binary_is_big_endian() {
        let bytes = 0x1A2B_3C4D_5E6F_7080u64.to_be_bytes().to_vec();
        assert_eq!(
            value_to_u64(&Value::Binary(bytes)),
            Some(0x1A2B_3C4D_5E6F_7080)
        );
    }

    #[test]
    fn display_name_prefers_file_name() {
        let row = EsedbRow {
            path: Some("C:\\Users\\x\\a.png".into()),
            item_name: Some("item".into()),
            file_name: None,
            ..Default::default()
        };
        assert_eq!(row.display_name(), Some("item"));
        let row = EsedbRow {
            path: Some("C:\\Users\\x\\a.png".into()),
            ..Default::default()
        };
        assert_eq!(row.display_name(), Some("a.png"));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = EsedbView::open("/nonexistent/Windows.edb").unwrap_err();
        assert!(matches!(err, Error::EsedbUnreadable(_)));
    }
}
