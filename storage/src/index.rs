//! Inverted index store pairing word→paths and path→words multimaps.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::Result;
use crate::multimap::{InMemoryMultiMap, MultiMap};
use crate::page_store::TempDirPageStore;
use crate::paged::{PagedMapConfig, PagedMultiMap};

type WordMap = Box<dyn MultiMap<String, String>>;

/// Exact-word inverted index over file paths.
///
/// Two multimaps are kept behind one read/write lock: `word_to_paths` answers
/// searches, `path_to_words` makes removal by path possible. `add` and
/// `remove` hold the write lock for the whole call, so no reader ever
/// observes a state where the two directions disagree. Serializing all
/// mutations store-wide is deliberate: tokenization and file IO dominate the
/// cost of indexing, so lock contention here is acceptable.
pub struct InvertedIndexStore {
    maps: RwLock<IndexMaps>,
}

struct IndexMaps {
    word_to_paths: WordMap,
    path_to_words: WordMap,
}

impl InvertedIndexStore {
    /// Create a store over the given multimaps.
    pub fn new(word_to_paths: WordMap, path_to_words: WordMap) -> Self {
        Self {
            maps: RwLock::new(IndexMaps {
                word_to_paths,
                path_to_words,
            }),
        }
    }

    /// Store over plain in-memory multimaps. No memory bound.
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(InMemoryMultiMap::new()),
            Box::new(InMemoryMultiMap::new()),
        )
    }

    /// Memory-tolerant store over paged multimaps with default limits.
    pub fn paged() -> Result<Self> {
        Self::paged_with_config(PagedMapConfig::default())
    }

    /// Memory-tolerant store over paged multimaps with explicit limits.
    pub fn paged_with_config(config: PagedMapConfig) -> Result<Self> {
        Ok(Self::new(
            Box::new(PagedMultiMap::with_config(
                TempDirPageStore::new()?,
                config.clone(),
            )),
            Box::new(PagedMultiMap::with_config(TempDirPageStore::new()?, config)),
        ))
    }

    /// Point-in-time snapshot of the paths associated with `word`.
    ///
    /// Unknown words yield an empty result.
    pub fn search(&self, word: &str) -> Result<Vec<PathBuf>> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        let paths = maps.word_to_paths.get(&word.to_string())?;
        Ok(paths
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    /// Associate every word of `words` with `path`.
    ///
    /// The word stream is consumed to completion under the write lock;
    /// insertions go into both maps pairwise, so the cross-consistency
    /// invariant holds even if the stream fails midway.
    pub fn add<I>(&self, words: I, path: &Path) -> Result<()>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let path_str = path.to_string_lossy().into_owned();
        let mut count = 0usize;
        for word in words {
            let word = word?;
            maps.word_to_paths.add(word.clone(), path_str.clone())?;
            maps.path_to_words.add(path_str.clone(), word)?;
            count += 1;
        }
        debug!("indexed {count} words for {path_str}");
        Ok(())
    }

    /// Remove `path` and all of its word associations.
    ///
    /// Unknown paths are a no-op.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let path_str = path.to_string_lossy().into_owned();
        if let Some(words) = maps.path_to_words.get(&path_str)? {
            for word in &words {
                maps.word_to_paths.remove_value(word, &path_str)?;
            }
        }
        maps.path_to_words.remove(&path_str)?;
        Ok(())
    }

    /// Human-readable description of the store.
    pub fn meta(&self) -> String {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        format!(
            "inverted index store\nwords: {}\npaths: {}",
            maps.word_to_paths.meta(),
            maps.path_to_words.meta()
        )
    }

    /// Human-readable summary of the current contents.
    pub fn state(&self) -> String {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        format!(
            "words: {}\npaths: {}",
            maps.word_to_paths.state(),
            maps.path_to_words.state()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn words(input: &[&str]) -> Vec<io::Result<String>> {
        input.iter().map(|w| Ok(w.to_string())).collect()
    }

    fn words_of(store: &InvertedIndexStore, path: &Path) -> Option<HashSet<String>> {
        let maps = store.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.path_to_words
            .get(&path.to_string_lossy().into_owned())
            .ok()
            .flatten()
    }

    fn sorted_search(store: &InvertedIndexStore, word: &str) -> Vec<PathBuf> {
        let mut paths = store.search(word).unwrap();
        paths.sort();
        paths
    }

    #[test]
    fn test_search_after_add() {
        let store = InvertedIndexStore::in_memory();
        store
            .add(words(&["foo", "bar", "foo"]), Path::new("a.txt"))
            .unwrap();

        assert_eq!(sorted_search(&store, "foo"), vec![PathBuf::from("a.txt")]);
        assert_eq!(sorted_search(&store, "bar"), vec![PathBuf::from("a.txt")]);
        assert_eq!(sorted_search(&store, "baz"), Vec::<PathBuf>::new());
    }

    #[test]
    fn test_both_directions_stay_consistent() {
        let store = InvertedIndexStore::in_memory();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();

        let tracked = words_of(&store, Path::new("a.txt")).unwrap();
        assert_eq!(
            tracked,
            HashSet::from(["foo".to_string(), "bar".to_string()])
        );
    }

    #[test]
    fn test_remove_clears_every_word() {
        let store = InvertedIndexStore::in_memory();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();
        store
            .add(words(&["foo"]), Path::new("b.txt"))
            .unwrap();

        store.remove(Path::new("a.txt")).unwrap();

        assert_eq!(sorted_search(&store, "bar"), Vec::<PathBuf>::new());
        assert_eq!(sorted_search(&store, "foo"), vec![PathBuf::from("b.txt")]);
        assert_eq!(words_of(&store, Path::new("a.txt")), None);
    }

    #[test]
    fn test_remove_unknown_path_is_noop() {
        let store = InvertedIndexStore::in_memory();
        store.remove(Path::new("never-added.txt")).unwrap();
    }

    #[test]
    fn test_readd_identical_content_is_idempotent() {
        let store = InvertedIndexStore::in_memory();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();

        assert_eq!(sorted_search(&store, "foo"), vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn test_remove_then_readd_reproduces_associations() {
        let store = InvertedIndexStore::in_memory();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();
        let before = words_of(&store, Path::new("a.txt")).unwrap();

        store.remove(Path::new("a.txt")).unwrap();
        store
            .add(words(&["foo", "bar"]), Path::new("a.txt"))
            .unwrap();

        assert_eq!(words_of(&store, Path::new("a.txt")).unwrap(), before);
        assert_eq!(sorted_search(&store, "foo"), vec![PathBuf::from("a.txt")]);
        assert_eq!(sorted_search(&store, "bar"), vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn test_word_stream_error_surfaces() {
        let store = InvertedIndexStore::in_memory();
        let stream: Vec<io::Result<String>> = vec![
            Ok("foo".to_string()),
            Err(io::Error::other("truncated read")),
        ];
        assert!(store.add(stream, Path::new("a.txt")).is_err());
        // The words consumed before the failure stay pairwise consistent.
        assert_eq!(sorted_search(&store, "foo"), vec![PathBuf::from("a.txt")]);
        assert!(words_of(&store, Path::new("a.txt")).unwrap().contains("foo"));
    }

    #[test]
    fn test_paged_store_behaves_like_in_memory() {
        let config = PagedMapConfig::default()
            .with_bucket_size(4)
            .with_max_resident_pages(2);
        let store = InvertedIndexStore::paged_with_config(config).unwrap();

        for i in 0..20 {
            let path = PathBuf::from(format!("file-{i}.txt"));
            let unique = format!("word-{i}");
            store
                .add(words(&[unique.as_str(), "shared"]), &path)
                .unwrap();
        }

        assert_eq!(
            sorted_search(&store, "word-7"),
            vec![PathBuf::from("file-7.txt")]
        );
        assert_eq!(store.search("shared").unwrap().len(), 20);

        store.remove(Path::new("file-7.txt")).unwrap();
        assert_eq!(sorted_search(&store, "word-7"), Vec::<PathBuf>::new());
        assert_eq!(store.search("shared").unwrap().len(), 19);
    }
}
