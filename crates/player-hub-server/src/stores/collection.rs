//! Keyed collection store shared by media files, playlists and directories.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::broadcaster::Broadcaster;
use crate::stores::{ChangeSource, StreamEvent};

/// Item with a stable collection key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for player_hub_types::MediaFile {
    fn key(&self) -> &str {
        &self.path
    }
}

impl Keyed for player_hub_types::Playlist {
    fn key(&self) -> &str {
        &self.uuid
    }
}

impl Keyed for player_hub_types::Directory {
    fn key(&self) -> &str {
        &self.path
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CollectionChange<T> {
    Added(BTreeMap<String, T>),
    Updated(BTreeMap<String, T>),
    Removed(BTreeMap<String, T>),
}

impl<T> CollectionChange<T> {
    pub fn items(&self) -> &BTreeMap<String, T> {
        match self {
            CollectionChange::Added(items)
            | CollectionChange::Updated(items)
            | CollectionChange::Removed(items) => items,
        }
    }
}

impl<T: Serialize> StreamEvent for CollectionChange<T> {
    fn kind(&self) -> &'static str {
        match self {
            CollectionChange::Added(_) => "added",
            CollectionChange::Updated(_) => "updated",
            CollectionChange::Removed(_) => "removed",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self.items())
    }
}

struct Items<T> {
    by_key: BTreeMap<String, T>,
    revision: u64,
}

/// In-memory keyed aggregate with a revision counter.
///
/// Every effective mutation bumps the revision and emits exactly one change;
/// mutations that leave the collection as it was emit nothing.
pub struct Collection<T> {
    items: Arc<RwLock<Items<T>>>,
    broadcaster: Broadcaster<CollectionChange<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }
}

impl<T> Collection<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            items: Arc::new(RwLock::new(Items {
                by_key: BTreeMap::new(),
                revision: 0,
            })),
            broadcaster: Broadcaster::new(name),
        }
    }

    /// Copy of every item.
    pub fn all(&self) -> BTreeMap<String, T> {
        self.read(|items| items.by_key.clone())
    }

    /// Copy of every item together with the revision it belongs to.
    pub fn snapshot(&self) -> (u64, BTreeMap<String, T>) {
        self.read(|items| (items.revision, items.by_key.clone()))
    }

    pub fn revision(&self) -> u64 {
        self.read(|items| items.revision)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.read(|items| items.by_key.get(key).cloned())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read(|items| items.by_key.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.read(|items| items.by_key.len())
    }

    /// Insert `item` unless its key is already present.
    pub fn add(&self, item: T) -> bool {
        self.add_many(vec![item]) == 1
    }

    /// Insert every item whose key is not present yet; one change covers them all.
    pub fn add_many(&self, items: impl IntoIterator<Item = T>) -> usize {
        let added = self.write(|state| {
            let mut added = BTreeMap::new();
            for item in items {
                let key = item.key().to_string();
                if state.by_key.contains_key(&key) || added.contains_key(&key) {
                    continue;
                }
                added.insert(key, item);
            }
            for (key, item) in &added {
                state.by_key.insert(key.clone(), item.clone());
            }
            added
        });
        let count = added.len();
        if count > 0 {
            self.broadcaster.send(CollectionChange::Added(added));
        }
        count
    }

    /// Insert or replace `item`. Replacing with an equal value is a no-op.
    pub fn put(&self, item: T) -> bool {
        let key = item.key().to_string();
        let change = self.write(|state| match state.by_key.get(&key) {
            Some(current) if *current == item => None,
            Some(_) => {
                state.by_key.insert(key.clone(), item.clone());
                Some(CollectionChange::Updated(BTreeMap::from([(key.clone(), item.clone())])))
            }
            None => {
                state.by_key.insert(key.clone(), item.clone());
                Some(CollectionChange::Added(BTreeMap::from([(key.clone(), item.clone())])))
            }
        });
        match change {
            Some(change) => {
                self.broadcaster.send(change);
                true
            }
            None => false,
        }
    }

    /// Remove and return the item stored under `key`.
    pub fn take(&self, key: &str) -> Option<T> {
        let taken = self.write(|state| state.by_key.remove(key));
        if let Some(item) = taken.as_ref() {
            self.broadcaster.send(CollectionChange::Removed(BTreeMap::from([(
                key.to_string(),
                item.clone(),
            )])));
        }
        taken
    }

    /// Remove every item matching `predicate`; one change covers them all.
    pub fn take_where<P>(&self, mut predicate: P) -> BTreeMap<String, T>
    where
        P: FnMut(&T) -> bool,
    {
        let taken = self.write(|state| {
            let keys: Vec<String> = state
                .by_key
                .iter()
                .filter(|(_, item)| predicate(item))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| state.by_key.remove(&key).map(|item| (key, item)))
                .collect::<BTreeMap<_, _>>()
        });
        if !taken.is_empty() {
            self.broadcaster.send(CollectionChange::Removed(taken.clone()));
        }
        taken
    }

    pub fn broadcaster(&self) -> &Broadcaster<CollectionChange<T>> {
        &self.broadcaster
    }

    fn read<R>(&self, f: impl FnOnce(&Items<T>) -> R) -> R {
        match self.items.read() {
            Ok(items) => f(&items),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Apply `f` under the write lock; the revision moves only when `f`
    /// reports a change. The lock is released before the caller emits.
    fn write<R: Changed>(&self, f: impl FnOnce(&mut Items<T>) -> R) -> R {
        let mut items = match self.items.write() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcome = f(&mut items);
        if outcome.changed() {
            items.revision += 1;
        }
        outcome
    }
}

impl<T> ChangeSource for Collection<T>
where
    T: Keyed + Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    type Change = CollectionChange<T>;

    fn broadcaster(&self) -> &Broadcaster<Self::Change> {
        &self.broadcaster
    }

    fn replay(&self) -> Vec<Self::Change> {
        vec![CollectionChange::Added(self.all())]
    }
}

trait Changed {
    fn changed(&self) -> bool;
}

impl<T> Changed for Option<T> {
    fn changed(&self) -> bool {
        self.is_some()
    }
}

impl<K, V> Changed for BTreeMap<K, V> {
    fn changed(&self) -> bool {
        !self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use player_hub_types::{MediaFile, Playlist};
    use std::time::Duration;

    fn media(path: &str) -> MediaFile {
        MediaFile {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            directory: "/media".to_string(),
            ..MediaFile::default()
        }
    }

    async fn next<T>(changes: &mut tokio::sync::mpsc::Receiver<CollectionChange<T>>) -> CollectionChange<T> {
        tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .expect("change timeout")
            .expect("relay closed")
    }

    #[tokio::test]
    async fn add_emits_once_and_duplicate_is_a_no_op() {
        let files = Collection::new("mediafiles");
        let mut changes = files.broadcaster().listen("test");

        assert!(files.add(media("/media/a.mp4")));
        assert!(!files.add(media("/media/a.mp4")));
        assert!(files.add(media("/media/b.mp4")));

        match next(&mut changes).await {
            CollectionChange::Added(items) => {
                assert_eq!(items.keys().collect::<Vec<_>>(), vec!["/media/a.mp4"]);
            }
            other => panic!("unexpected change {other:?}"),
        }
        // The duplicate produced nothing: the next change is the second file.
        match next(&mut changes).await {
            CollectionChange::Added(items) => assert!(items.contains_key("/media/b.mp4")),
            other => panic!("unexpected change {other:?}"),
        }
        assert_eq!(files.len(), 2);
        assert_eq!(files.revision(), 2);
    }

    #[tokio::test]
    async fn put_distinguishes_added_updated_and_unchanged() {
        let playlists = Collection::new("playlists");
        let mut changes = playlists.broadcaster().listen("test");
        let mut list = Playlist {
            uuid: "p1".to_string(),
            name: "Evening".to_string(),
            files: vec!["/media/a.mp4".to_string()],
        };

        assert!(playlists.put(list.clone()));
        assert!(!playlists.put(list.clone()));
        list.files.push("/media/b.mp4".to_string());
        assert!(playlists.put(list.clone()));

        assert_eq!(next(&mut changes).await.items().len(), 1);
        match next(&mut changes).await {
            CollectionChange::Updated(items) => assert_eq!(items["p1"].files.len(), 2),
            other => panic!("unexpected change {other:?}"),
        }
        assert_eq!(playlists.revision(), 2);
    }

    #[tokio::test]
    async fn take_where_removes_matches_in_one_change() {
        let files = Collection::new("mediafiles");
        files.add_many(vec![media("/media/a.mp4"), media("/media/b.mp4"), media("/other/c.mp4")]);
        let mut changes = files.broadcaster().listen("test");

        let taken = files.take_where(|file| file.path.starts_with("/media/"));
        assert_eq!(taken.len(), 2);
        match next(&mut changes).await {
            CollectionChange::Removed(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected change {other:?}"),
        }
        assert!(files.exists("/other/c.mp4"));
        assert!(files.take("/media/a.mp4").is_none());
    }

    #[tokio::test]
    async fn all_returns_a_copy() {
        let files = Collection::new("mediafiles");
        files.add(media("/media/a.mp4"));
        let mut copy = files.all();
        copy.clear();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn replay_reports_current_items_as_added() {
        let files = Collection::new("mediafiles");
        files.add(media("/media/a.mp4"));
        let replay = files.replay();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].kind(), "added");
        assert!(replay[0].items().contains_key("/media/a.mp4"));
    }
}
