mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{open, test_config, write, CountingEmbedder};
use sidekick::manifest::IndexManifest;
use sidekick::paths::IndexKey;
use sidekick::retrieval::SEARCH_ERROR_MARKER;
use sidekick::{IndexOptions, IndexStatus, RemoveStatus, SidekickError};

#[tokio::test]
async fn indexing_twice_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "# Alpha\n\nRust and cargo.");
    write(&docs, "b.txt", "Beta notes about deployment.");

    let embedder = CountingEmbedder::new();
    let sk = open(test_config(tmp.path()), embedder.clone()).await;

    let first = sk.index_path(&docs, IndexOptions::default()).await;
    assert!(matches!(first, IndexStatus::Indexed { documents: 2, .. }), "{}", first);
    let key = IndexKey::for_path(&docs);
    let before = sk.retrieval().get(Some(&key)).unwrap();
    let embedded = embedder.count();

    for _ in 0..2 {
        let again = sk.index_path(&docs, IndexOptions::default()).await;
        assert!(matches!(again, IndexStatus::AlreadyIndexed(_)));
        assert!(again.to_string().starts_with("[INFO] Already indexed"));
    }
    assert_eq!(embedder.count(), embedded);
    let after = sk.retrieval().get(Some(&key)).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn force_reindex_replaces_the_store() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "Alpha");
    let config = test_config(tmp.path());
    let manifest_path = config.storage.manifest_path();
    let sk = open(config, CountingEmbedder::new()).await;

    sk.index_path(&docs, IndexOptions::default()).await;
    let key = IndexKey::for_path(&docs);
    let old = sk.retrieval().persist_location(&key).unwrap();
    assert!(old.exists());

    let status = sk.reindex(Some(&docs)).await.unwrap();
    assert!(matches!(status, IndexStatus::Indexed { .. }));

    let manifest = IndexManifest::load(&manifest_path);
    assert_eq!(manifest.len(), 1);
    let new = manifest.get(&key).unwrap();
    assert_ne!(new, &old);
    assert!(new.exists());
    assert!(!old.exists());
}

#[tokio::test]
async fn reindex_without_path_is_invalid() {
    let tmp = TempDir::new().unwrap();
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;
    assert!(matches!(
        sk.reindex(None).await,
        Err(SidekickError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn bootstrap_restores_loadable_entries() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let dirs: Vec<_> = ["one", "two", "three"]
        .iter()
        .map(|name| {
            let dir = tmp.path().join(name);
            write(&dir, "note.txt", &format!("notes for {}", name));
            dir
        })
        .collect();

    let sk = open(config.clone(), CountingEmbedder::new()).await;
    for dir in &dirs {
        assert!(sk.index_path(dir, IndexOptions::default()).await.is_ok());
    }
    sk.close().await;

    let restored = open(config.clone(), CountingEmbedder::new()).await;
    assert_eq!(restored.retrieval().len(), 3);
    restored.close().await;

    // Delete one store behind the manifest's back.
    let lost = IndexManifest::load(&config.storage.manifest_path())
        .get(&IndexKey::for_path(&dirs[1]))
        .cloned()
        .unwrap();
    std::fs::remove_dir_all(&lost).unwrap();

    let partial = open(config.clone(), CountingEmbedder::new()).await;
    assert_eq!(partial.retrieval().len(), 2);
    assert!(!partial.retrieval().has(&IndexKey::for_path(&dirs[1])));
    let listed = partial.list_indexes().await;
    assert_eq!(listed.len(), 3);
    assert_eq!(listed.iter().filter(|i| i.loaded).count(), 2);
}

#[tokio::test]
async fn corrupt_manifest_starts_empty() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write(&config.storage.vectorstore_root, "index_manifest.json", "{not json");

    let sk = open(config, CountingEmbedder::new()).await;
    assert!(sk.retrieval().is_empty());
    assert!(sk.list_indexes().await.is_empty());
}

#[tokio::test]
async fn empty_corpus_leaves_manifest_untouched() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("empty");
    write(&docs, "image.png", "not text");
    let config = test_config(tmp.path());
    let manifest_path = config.storage.manifest_path();
    let sk = open(config, CountingEmbedder::new()).await;

    let status = sk.index_path(&docs, IndexOptions::default()).await;
    assert!(matches!(status, IndexStatus::NoDocuments(_)));
    assert_eq!(status.to_string(), "❌ No readable documents found");
    assert!(!manifest_path.exists());
    assert!(sk.retrieval().is_empty());
}

#[tokio::test]
async fn missing_path_is_reported() {
    let tmp = TempDir::new().unwrap();
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;
    let status = sk
        .index_path(&tmp.path().join("nope"), IndexOptions::default())
        .await;
    assert!(status.to_string().starts_with("[ERROR] Invalid path (not found):"));
}

#[tokio::test]
async fn file_and_directory_keys_are_distinct() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "readme.md", "The sky is blue.");
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;

    assert!(sk.index_path(&docs, IndexOptions::default()).await.is_ok());
    assert!(sk
        .index_path(&docs.join("readme.md"), IndexOptions::default())
        .await
        .is_ok());
    let keys = sk.retrieval().indexed_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys.iter().filter(|k| k.is_file()).count(), 1);
}

#[tokio::test]
async fn remove_deletes_store_and_manifest_entry() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "Alpha");
    let config = test_config(tmp.path());
    let manifest_path = config.storage.manifest_path();
    let sk = open(config, CountingEmbedder::new()).await;

    sk.index_path(&docs, IndexOptions::default()).await;
    let key = IndexKey::for_path(&docs);
    let location = sk.retrieval().persist_location(&key).unwrap();

    let status = sk.remove_path(&docs).await;
    assert!(matches!(status, RemoveStatus::Removed(_)), "{}", status);
    assert!(status.to_string().starts_with("🗑️ Removed index:"));
    assert!(!location.exists());
    assert!(!sk.retrieval().has(&key));
    assert!(IndexManifest::load(&manifest_path).is_empty());

    assert!(matches!(sk.remove_path(&docs).await, RemoveStatus::NotIndexed(_)));
}

#[tokio::test]
async fn remove_works_after_the_folder_is_gone() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "Alpha");
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;
    sk.index_path(&docs, IndexOptions::default()).await;

    std::fs::remove_dir_all(&docs).unwrap();
    let status = sk.remove_path(&docs).await;
    assert!(status.is_ok(), "{}", status);
    assert!(sk.retrieval().is_empty());
}

#[tokio::test]
async fn end_to_end_search_finds_the_sky() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "sky.txt", "The sky is blue.");
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;

    assert!(sk.index_path(&docs, IndexOptions::default()).await.is_ok());
    let out = sk.search("what color is the sky", None, Some(&docs)).await;
    assert!(out.contains("sky.txt"), "{}", out);
    assert!(out.contains("blue"), "{}", out);

    let tool = sk.tools().find("search_documents").unwrap();
    let via_tool = tool
        .execute(serde_json::json!({"query": "what color is the sky"}))
        .await
        .unwrap();
    assert!(via_tool.contains("sky.txt") && via_tool.contains("blue"));
}

#[tokio::test]
async fn search_with_nothing_indexed_explains_itself() {
    let tmp = TempDir::new().unwrap();
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;
    let out = sk.search("anything", None, None).await;
    assert!(out.starts_with(SEARCH_ERROR_MARKER));
    assert!(out.contains("No indexed folder"));
}

#[tokio::test]
async fn concurrent_index_requests_build_one_store() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "Alpha beta gamma");
    let sk = Arc::new(open(test_config(tmp.path()), CountingEmbedder::new()).await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let sk = Arc::clone(&sk);
        let docs = docs.clone();
        handles.push(tokio::spawn(async move {
            sk.index_path(&docs, IndexOptions::default()).await
        }));
    }
    let mut indexed = 0;
    for h in handles {
        if matches!(h.await.unwrap(), IndexStatus::Indexed { .. }) {
            indexed += 1;
        }
    }
    assert_eq!(indexed, 1);
    let stores = std::fs::read_dir(tmp.path().join("vector_db"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert_eq!(stores, 1);
}

#[tokio::test]
async fn overlap_override_must_be_smaller_than_size() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write(&docs, "a.md", "Alpha beta gamma delta");
    let sk = open(test_config(tmp.path()), CountingEmbedder::new()).await;

    let opts = IndexOptions {
        chunk_size: Some(50),
        chunk_overlap: Some(50),
        ..IndexOptions::default()
    };
    let status = sk.index_path(&docs, opts).await;
    assert!(matches!(status, IndexStatus::ChunkingFailed(_)), "{}", status);
    assert!(sk.retrieval().is_empty());
}
