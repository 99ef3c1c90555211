//! Loading the item directory from a JSON file.
//!
//! The file is an object keyed by product id:
//!
//! ```json
//! { "10": { "category": "Produce", "emoji": "🥦" },
//!   "20": { "category": "Dairy",   "emoji": "🧀" } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use hhrec_core::{ItemDirectory, ItemInfo, ItemMap};

#[derive(Debug, thiserror::Error)]
pub enum ItemsError {
    #[error("failed to read item directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid item directory {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn parse_item_map(json: &str) -> Result<ItemMap, serde_json::Error> {
    let items: HashMap<i64, ItemInfo> = serde_json::from_str(json)?;
    Ok(ItemMap::new(items))
}

pub async fn load_item_map(path: &Path) -> Result<ItemMap, ItemsError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ItemsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_item_map(&raw).map_err(|source| ItemsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the directory for a process: from `path` when configured, empty otherwise
/// (every item then renders as unknown).
pub async fn load_directory(path: Option<&Path>) -> Result<ItemDirectory, ItemsError> {
    match path {
        Some(path) => {
            let map = load_item_map(path).await?;
            info!(items = map.len(), path = %path.display(), "item directory loaded");
            Ok(ItemDirectory::new(map))
        }
        None => {
            info!("no item directory configured, items render as unknown");
            Ok(ItemDirectory::default())
        }
    }
}

/// Re-read `path` and swap it into `directory`. On error the current mapping stays.
pub async fn reload_directory(directory: &ItemDirectory, path: &Path) -> Result<usize, ItemsError> {
    let map = load_item_map(path).await?;
    Ok(directory.reload(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_keyed_by_product_id() {
        let map = parse_item_map(
            r#"{"10": {"category": "Produce", "emoji": "🥦"}, "20": {"category": "Dairy", "emoji": "🧀"}}"#,
        )
        .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.render(10), "🥦 10 (Produce)");
        assert_eq!(map.render(30), "❓ 30 (Unknown)");
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(parse_item_map(r#"{"abc": {"category": "x", "emoji": "y"}}"#).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = load_item_map(Path::new("/definitely/not/here.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemsError::Io { .. }));
    }

    #[tokio::test]
    async fn reload_swaps_in_the_new_file() {
        let path = std::env::temp_dir().join(format!("hhrec-items-{}.json", uuid::Uuid::now_v7()));
        tokio::fs::write(&path, r#"{"1": {"category": "Bakery", "emoji": "🍞"}}"#)
            .await
            .unwrap();

        let directory = load_directory(None).await.unwrap();
        assert!(directory.snapshot().is_empty());

        let count = reload_directory(&directory, &path).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(directory.snapshot().render(1), "🍞 1 (Bakery)");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_current_mapping() {
        let directory = ItemDirectory::new(ItemMap::from_iter([(1, ItemInfo::new("Bakery", "🍞"))]));

        assert!(reload_directory(&directory, Path::new("/definitely/not/here.json")).await.is_err());
        assert_eq!(directory.snapshot().len(), 1);
    }
}
