use ragcore::cache::{CacheLoad, IndexCache, DOCS_FILE, INDEX_FILE};
use ragcore::{Bm25Index, Bm25Params, CacheError, Document};
use std::collections::HashMap;
use std::fs;
use tempfile::tempdir;

type Postings = HashMap<String, Vec<u32>>;

fn toy_pair() -> (Postings, Vec<String>) {
    let mut index = HashMap::new();
    index.insert("run".to_string(), vec![0]);
    index.insert("hello".to_string(), vec![0, 1]);
    (index, vec!["run hello".to_string(), "hello world".to_string()])
}

#[test]
fn save_load_clear_scenario() {
    let root = tempdir().unwrap();
    let dir = root.path().join("tmp_cache");
    let cache = IndexCache::new(&dir);
    let (index, docs) = toy_pair();

    cache.save(&index, &docs).unwrap();
    assert!(dir.join(INDEX_FILE).is_file());
    assert!(dir.join(DOCS_FILE).is_file());

    let (loaded_index, loaded_docs) = cache.load::<Postings, String>().into_pair().unwrap();
    assert_eq!(loaded_index, index);
    assert_eq!(loaded_docs, docs);

    cache.clear().unwrap();
    assert!(matches!(cache.load::<Postings, String>(), CacheLoad::Miss));
}

#[test]
fn round_trips_a_real_index() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let docs = vec![
        Document::new("once in a blue moon - năm thì mười họa"),
        Document::new("the ball is in your court - đến lượt bạn quyết định"),
    ];
    let index = Bm25Index::build(&docs, Bm25Params::default());

    cache.save(&index, &docs).unwrap();
    let cached = cache.load::<Bm25Index, Document>().into_cached().unwrap();
    assert_eq!(cached.index, index);
    assert_eq!(cached.documents, docs);
    assert_eq!(cached.index.search("blue moon", 1)[0].doc_id, 0);
}

#[test]
fn load_without_files_is_a_miss() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path().join("never-created"));
    let outcome = cache.load::<Postings, String>();
    assert!(matches!(outcome, CacheLoad::Miss));
    assert!(outcome.into_pair().is_none());
}

#[test]
fn clear_is_idempotent() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();

    cache.clear().unwrap();
    cache.clear().unwrap();
    assert!(!dir.path().join(INDEX_FILE).exists());
    assert!(!dir.path().join(DOCS_FILE).exists());
}

#[test]
fn documents_without_index_are_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();
    fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

    match cache.load::<Postings, String>() {
        CacheLoad::Invalid(CacheError::Incomplete { missing }) => assert!(missing.ends_with(INDEX_FILE)),
        other => panic!("expected incomplete cache, got {other:?}"),
    }
}

#[test]
fn index_without_documents_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();
    fs::remove_file(dir.path().join(DOCS_FILE)).unwrap();

    assert!(cache.load::<Postings, String>().into_pair().is_none());
}

#[test]
fn second_save_replaces_the_first() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index1, docs1) = toy_pair();
    let mut index2 = HashMap::new();
    index2.insert("world".to_string(), vec![0]);
    let docs2 = vec!["world".to_string()];

    cache.save(&index1, &docs1).unwrap();
    cache.save(&index2, &docs2).unwrap();

    let (index, docs) = cache.load::<Postings, String>().into_pair().unwrap();
    assert_eq!(index, index2);
    assert_eq!(docs, docs2);
}

#[test]
fn truncated_index_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();

    let path = dir.path().join(INDEX_FILE);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    match cache.load::<Postings, String>() {
        CacheLoad::Invalid(CacheError::Decode { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected decode failure, got {other:?}"),
    }
}

#[test]
fn oversized_length_prefix_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    cache.save(&vec![1u32], &["abcd".to_string()]).unwrap();

    // 20-byte header, then the u64 sequence length, then the string length.
    let path = dir.path().join(DOCS_FILE);
    let mut bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[28..36], &4u64.to_le_bytes());
    bytes[28..36].copy_from_slice(&(1u64 << 46).to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    match cache.load::<Vec<u32>, String>() {
        CacheLoad::Invalid(CacheError::Decode { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected decode failure, got {other:?}"),
    }
}

#[test]
fn trailing_bytes_are_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();

    let path = dir.path().join(DOCS_FILE);
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(b"junk");
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(cache.load::<Postings, String>(), CacheLoad::Invalid(CacheError::Decode { .. })));
}

#[test]
fn garbage_index_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();
    fs::write(dir.path().join(INDEX_FILE), b"definitely not a cache file").unwrap();

    assert!(matches!(cache.load::<Postings, String>(), CacheLoad::Invalid(_)));
}

#[test]
fn wrong_payload_type_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    cache.save(&vec![1u8, 2, 3], &[7u8]).unwrap();

    assert!(matches!(cache.load::<Postings, String>(), CacheLoad::Invalid(_)));
}

#[cfg(unix)]
#[test]
fn unwritable_directory_keeps_previous_pair() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let cache = IndexCache::new(dir.path());
    let (index, docs) = toy_pair();
    cache.save(&index, &docs).unwrap();

    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();
    // Root ignores directory permissions; nothing to check then.
    let write_check = dir.path().join("write_check");
    if fs::write(&write_check, b"").is_ok() {
        let _ = fs::remove_file(&write_check);
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = cache.save(&HashMap::<String, Vec<u32>>::new(), &Vec::<String>::new());
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
    assert!(matches!(result, Err(CacheError::Io { .. })));

    let (loaded_index, loaded_docs) = cache.load::<Postings, String>().into_pair().unwrap();
    assert_eq!(loaded_index, index);
    assert_eq!(loaded_docs, docs);
}
