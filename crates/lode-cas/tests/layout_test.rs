//! On-disk layout compatibility with existing repositories.

use std::fs;
use tempfile::TempDir;

use lode_cas::{derive_key_for_file, storage_path, ObjectStore, DEFAULT_CHUNK_SIZE, OBJECTS_DIR};

#[test]
fn test_object_lands_at_legacy_location() {
    let temp = TempDir::new().unwrap();
    let git_dir = temp.path().join(".git");
    let store = ObjectStore::for_git_dir(&git_dir).unwrap();

    let src = temp.path().join("file1");
    fs::write(&src, "file1 data\n").unwrap();
    let key = derive_key_for_file(&src, DEFAULT_CHUNK_SIZE).unwrap();
    store.ingest(&src, &key).unwrap();

    let k = "SHA256E-s11--5eb788ac2bded6ce7112e44d68228bfecb3e569d1d745c78e1275986bbedc3cf";
    let expected = git_dir
        .join(OBJECTS_DIR)
        .join("5de")
        .join("9ee")
        .join(k)
        .join(k);
    assert!(expected.is_file(), "missing {:?}", expected);
}

#[test]
fn test_stored_object_rederives_its_own_path() {
    let temp = TempDir::new().unwrap();
    let store = ObjectStore::new(temp.path().join("objects")).unwrap();

    for (name, data) in [
        ("plain", &b"plain data\n"[..]),
        ("doc.txt", b"text"),
        ("archive.tar.gz", b"not really gzip"),
    ] {
        let src = temp.path().join(name);
        fs::write(&src, data).unwrap();
        let key = derive_key_for_file(&src, DEFAULT_CHUNK_SIZE).unwrap();
        store.ingest(&src, &key).unwrap();

        // The object file is named after its key, so hashing it again under
        // that name must land on the very same path.
        let obj = store.object_path(&key);
        let rederived = derive_key_for_file(&obj, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(rederived, key);
        assert_eq!(store.root().join(storage_path(&rederived)), obj);
    }
}
