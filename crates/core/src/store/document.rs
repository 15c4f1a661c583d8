//! Path-addressable JSON document stores.
//!
//! Paths are `/`-separated keys into one JSON tree, e.g.
//! `gamesByYear/2024/<id>`. Removing the last child of an object removes the
//! object too, so empty partitions disappear the way they do in hosted
//! realtime databases.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

/// Read-subtree / push / replace / delete contract of the durable store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whole subtree at `path`, or `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Create a child of `path` under a freshly generated key and return the key.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    /// Replace whatever is stored at `path`.
    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `path`; returns whether anything was stored there.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        (**self).read(path).await
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        (**self).push(path, value).await
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        (**self).put(path, value).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        (**self).delete(path).await
    }
}

fn new_key() -> String {
    Uuid::new_v4().simple().to_string()
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |node, key| node.get(key))
        .filter(|value| !value.is_null())
}

fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn insert(root: &mut Value, path: &str, value: Value) {
    let keys = segments(path);
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for key in parents {
        node = as_object(node)
            .entry((*key).to_string())
            .or_insert(Value::Null);
    }
    as_object(node).insert((*last).to_string(), value);
}

fn remove(node: &mut Value, keys: &[&str]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match keys {
        [] => false,
        [last] => map.remove(*last).is_some(),
        [first, rest @ ..] => {
            let Some(child) = map.get_mut(*first) else {
                return false;
            };
            let removed = remove(child, rest);
            if removed && child.as_object().map(Map::is_empty).unwrap_or(false) {
                map.remove(*first);
            }
            removed
        }
    }
}

/// Document tree held in memory; nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    tree: Arc<RwLock<Value>>,
}

impl MemoryDocumentStore {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing tree.
    pub fn with_tree(tree: Value) -> Self {
        Self {
            tree: Arc::new(RwLock::new(tree)),
        }
    }

    /// Copy of the entire tree.
    pub fn snapshot(&self) -> Value {
        self.tree.read().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(lookup(&self.tree.read(), path).cloned())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = new_key();
        insert(&mut self.tree.write(), &format!("{path}/{key}"), value);
        Ok(key)
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        insert(&mut self.tree.write(), path, value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        Ok(remove(&mut self.tree.write(), &segments(path)))
    }
}

/// Document tree persisted as a single pretty-printed JSON file.
///
/// The whole tree is kept in memory and rewritten on every mutation. A
/// mutation becomes visible only once the file has been written.
#[derive(Debug)]
pub struct JsonFileDocumentStore {
    path: PathBuf,
    tree: Mutex<Value>,
}

impl JsonFileDocumentStore {
    /// Open `path`, starting from an empty tree when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let display = path.display().to_string();
        let tree = if path.exists() {
            let contents =
                fs::read_to_string(&path).map_err(|err| StoreError::new("open", &display, err))?;
            if contents.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&contents)
                    .map_err(|err| StoreError::new("open", &display, err))?
            }
        } else {
            Value::Null
        };
        Ok(Self {
            path,
            tree: Mutex::new(tree),
        })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, operation: &'static str, tree: &Value) -> Result<(), StoreError> {
        let display = self.path.display().to_string();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::new(operation, &display, err))?;
        }
        let serialised =
            serde_json::to_vec_pretty(tree).map_err(|err| StoreError::new(operation, &display, err))?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, serialised)
            .await
            .map_err(|err| StoreError::new(operation, &display, err))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| StoreError::new(operation, &display, err))
    }
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(lookup(&*self.tree.lock().await, path).cloned())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = new_key();
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        insert(&mut next, &format!("{path}/{key}"), value);
        self.persist("push", &next).await?;
        *tree = next;
        Ok(key)
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        insert(&mut next, path, value);
        self.persist("put", &next).await?;
        *tree = next;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        if !remove(&mut next, &segments(path)) {
            return Ok(false);
        }
        self.persist("delete", &next).await?;
        *tree = next;
        Ok(true)
    }
}

/// Realtime-database style REST backend: `{base}/{path}.json`.
///
/// `POST` creates a child and answers `{"name": "<generated key>"}`.
#[derive(Debug, Clone)]
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl RestDocumentStore {
    /// Backend rooted at `base_url`, e.g. `https://<db>.firebaseio.com`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let value: Value = self
            .client
            .get(self.url(path))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| StoreError::new("read", path, err))?
            .json()
            .await
            .map_err(|err| StoreError::new("read", path, err))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let response: PushResponse = self
            .client
            .post(self.url(path))
            .json(&value)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| StoreError::new("push", path, err))?
            .json()
            .await
            .map_err(|err| StoreError::new("push", path, err))?;
        Ok(response.name)
    }

    async fn put(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.client
            .put(self.url(path))
            .json(&value)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| StoreError::new("put", path, err))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        // DELETE succeeds whether or not the path exists, so look first.
        if self.read(path).await?.is_none() {
            return Ok(false);
        }
        self.client
            .delete(self.url(path))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| StoreError::new("delete", path, err))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_push_read_delete() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        let id = store.push("gamesByYear/2024", json!({"title": "A"})).await?;

        let partition = store.read("gamesByYear/2024").await?.expect("partition");
        assert_eq!(partition[&id], json!({"title": "A"}));
        assert_eq!(
            store.read(&format!("gamesByYear/2024/{id}")).await?,
            Some(json!({"title": "A"}))
        );
        assert_eq!(store.read("gamesByYear/2023").await?, None);

        assert!(!store.delete("gamesByYear/2024/missing").await?);
        assert!(store.delete(&format!("gamesByYear/2024/{id}")).await?);
        assert_eq!(store.read("gamesByYear/2024").await?, None);
        assert_eq!(store.read("gamesByYear").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_put_replaces() -> Result<(), StoreError> {
        let store = MemoryDocumentStore::new();
        store.put("games/a", json!({"title": "Old"})).await?;
        store.put("games/a", json!({"title": "New"})).await?;
        store.put("games/b", json!({"title": "Other"})).await?;
        assert_eq!(
            store.snapshot(),
            json!({"games": {"a": {"title": "New"}, "b": {"title": "Other"}}})
        );
        Ok(())
    }

    #[tokio::test]
    async fn file_store_survives_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data/games.json");

        let id = {
            let store = JsonFileDocumentStore::open(&path)?;
            store.put("gamesByYear/2023/fixed", json!({"title": "Kept"})).await?;
            store.push("gamesByYear/2023", json!({"title": "Pushed"})).await?
        };
        assert!(path.is_file());

        let reopened = JsonFileDocumentStore::open(&path)?;
        let partition = reopened.read("gamesByYear/2023").await?.expect("partition");
        assert_eq!(partition["fixed"]["title"], json!("Kept"));
        assert_eq!(partition[&id]["title"], json!("Pushed"));

        assert!(reopened.delete("gamesByYear/2023/fixed").await?);
        let again = JsonFileDocumentStore::open(&path)?;
        assert_eq!(again.read("gamesByYear/2023/fixed").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn failed_file_write_is_not_visible() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory")?;
        let store = JsonFileDocumentStore::open(blocker.join("games.json"))?;

        let err = store
            .push("gamesByYear/2023", json!({"title": "Ghost"}))
            .await
            .expect_err("parent is a regular file");
        assert_eq!(err.operation, "push");
        assert_eq!(store.read("gamesByYear/2023").await?, None);

        assert!(store.put("gamesByYear/2023/x", json!({"title": "Ghost"})).await.is_err());
        assert_eq!(store.read("gamesByYear").await?, None);
        Ok(())
    }

    #[test]
    fn rest_urls_are_normalised() {
        let store = RestDocumentStore::new(reqwest::Client::new(), "https://db.example.com/");
        assert_eq!(
            store.url("/gamesByYear/2024/"),
            "https://db.example.com/gamesByYear/2024.json"
        );
    }
}
