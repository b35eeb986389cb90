//! End-to-end behaviour of the local filesystem backend through the
//! Warehouse front controller.
//!
//! Run with: `cargo test -p warehouse-storage --test local_scenarios`
#![cfg(feature = "storage-local")]

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use tempfile::TempDir;
use warehouse_storage::{
    CopyTarget, Cubby, CubbyOptions, Destination, Metadata, Source, StorageError, Warehouse,
    WarehouseConfig,
};

/// A warehouse rooted in a temporary directory.
struct TestWarehouse {
    temp_dir: TempDir,
    warehouse: Warehouse,
}

impl TestWarehouse {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(customize: impl FnOnce(WarehouseConfig) -> WarehouseConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = customize(WarehouseConfig::new("file").with_local_root(temp_dir.path()));
        let warehouse = Warehouse::from_config(config).expect("Failed to initialize warehouse");
        Self {
            temp_dir,
            warehouse,
        }
    }

    async fn cubby(&self, address: &str) -> Box<dyn Cubby> {
        self.warehouse
            .resolve_cubby(address, CubbyOptions::default())
            .await
            .expect("Failed to resolve cubby")
    }

    async fn cubby_with(&self, address: &str, options: CubbyOptions) -> Box<dyn Cubby> {
        self.warehouse
            .resolve_cubby(address, options)
            .await
            .expect("Failed to resolve cubby")
    }
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_delete_then_store_then_retrieve() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///something/beautiful").await;

    assert!(cubby.delete().await.unwrap());
    assert!(!cubby.exists().await.unwrap());

    cubby.store(Source::from(&b"12345"[..])).await.unwrap();
    assert!(cubby.exists().await.unwrap());
    assert_eq!(cubby.retrieve().await.unwrap(), Bytes::from_static(b"12345"));
}

#[tokio::test]
async fn test_round_trip_preserves_bytes() {
    let t = TestWarehouse::new();
    let payloads: [&'static [u8]; 3] = [b"", b"x", b"a/b\\c\n\r\0://\xff/"];

    for (i, payload) in payloads.into_iter().enumerate() {
        let mut cubby = t.cubby(&format!("file:///roundtrip/item-{}", i)).await;
        cubby.store(Source::from(payload)).await.unwrap();
        assert_eq!(cubby.retrieve().await.unwrap().as_ref(), payload);
        assert_eq!(cubby.filesize(true).await.unwrap(), payload.len() as u64);
    }
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///b/never-stored").await;

    assert!(cubby.delete().await.unwrap());
    assert!(cubby.delete().await.unwrap());

    cubby.store(Source::from(&b"x"[..])).await.unwrap();
    assert!(cubby.delete().await.unwrap());
    assert!(cubby.delete().await.unwrap());
}

#[tokio::test]
async fn test_missing_object_reports_not_found() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///b/ghost").await;

    assert!(matches!(cubby.retrieve().await, Err(StorageError::NotFound(_))));
    assert!(matches!(cubby.filesize(false).await, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_gzip_encoding_is_sticky() {
    let t = TestWarehouse::new();
    let mut cubby = t
        .cubby_with("file:///b/notes.txt", CubbyOptions::default().acl("private"))
        .await;

    cubby.store(Source::from(&b"first"[..])).await.unwrap();
    cubby.set_content_encoding("gzip").await.unwrap();

    let payload = b"hello hello hello hello hello";
    cubby.store(Source::from(&payload[..])).await.unwrap();

    let raw = std::fs::read(t.temp_dir.path().join("b/notes.txt")).unwrap();
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
    assert_eq!(gunzip(&raw), payload);
    assert_eq!(cubby.retrieve().await.unwrap().as_ref(), payload);
    assert_eq!(cubby.content_encoding(true).await.unwrap().as_deref(), Some("gzip"));

    // A fresh handle sees the same encoding and decodes transparently.
    let mut fresh = t.cubby("file:///b/notes.txt").await;
    assert_eq!(fresh.retrieve().await.unwrap().as_ref(), payload);
}

#[tokio::test]
async fn test_set_mimetype_requires_acl() {
    let t = TestWarehouse::new();

    let mut bare = t.cubby("file:///b/page.html").await;
    bare.store(Source::from(&b"<p>hi</p>"[..])).await.unwrap();
    assert!(matches!(
        bare.set_mimetype("text/html").await,
        Err(StorageError::MissingAcl(_))
    ));
    assert!(matches!(
        bare.set_content_encoding("gzip").await,
        Err(StorageError::MissingAcl(_))
    ));

    let mut with_acl = t
        .cubby_with("file:///b/page.html", CubbyOptions::default().acl("public-read"))
        .await;
    with_acl.set_content_encoding("identity").await.unwrap();
    assert_eq!(with_acl.set_mimetype("text/html").await.unwrap(), "text/html");

    assert_eq!(with_acl.mimetype(true).await.unwrap().as_deref(), Some("text/html"));
    assert_eq!(
        with_acl.content_encoding(true).await.unwrap().as_deref(),
        Some("identity")
    );
}

#[tokio::test]
async fn test_store_keeps_existing_content_type() {
    let t = TestWarehouse::new();

    let mut typed = t
        .cubby_with(
            "file:///b/data.json",
            CubbyOptions::default().content_type("application/json"),
        )
        .await;
    typed.store(Source::from(&b"{}"[..])).await.unwrap();

    let mut untyped = t.cubby("file:///b/data.json").await;
    untyped.store(Source::from(&b"[]"[..])).await.unwrap();
    assert_eq!(
        untyped.mimetype(true).await.unwrap().as_deref(),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_metadata_is_replaced_not_merged() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///b/doc.md").await;
    cubby.store(Source::from(&b"# doc"[..])).await.unwrap();
    assert!(cubby.metadata(true).await.unwrap().is_empty());

    let first: Metadata = [("author", "ada"), ("draft", "yes")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    cubby.set_metadata(first).await.unwrap();

    let second: Metadata = [("reviewed", "no")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    cubby.set_metadata(second.clone()).await.unwrap();

    let mut fresh = t.cubby("file:///b/doc.md").await;
    assert_eq!(fresh.metadata(false).await.unwrap(), second);
}

#[tokio::test]
async fn test_reload_flag_controls_cache() {
    let t = TestWarehouse::new();
    let mut reader = t.cubby("file:///b/size").await;
    let mut writer = t.cubby("file:///b/size").await;

    writer.store(Source::from(&b"12345"[..])).await.unwrap();
    assert_eq!(reader.filesize(false).await.unwrap(), 5);

    writer.store(Source::from(&b"1234567890"[..])).await.unwrap();
    assert_eq!(reader.filesize(false).await.unwrap(), 5);
    assert_eq!(reader.filesize(true).await.unwrap(), 10);
}

#[tokio::test]
async fn test_independent_handles_are_equal() {
    let t = TestWarehouse::new();
    let a = t.cubby("file:///b/same/key.txt").await;
    let b = t
        .cubby_with(
            "file:///b/same/key.txt",
            CubbyOptions::default().content_type("text/plain"),
        )
        .await;
    let c = t.cubby("file:///b/other.txt").await;

    assert!(*a == *b);
    assert!(*a != *c);
    assert_eq!(a.to_string(), "file:///b/same/key.txt");
    assert_eq!(a.extension(), "txt");
}

#[tokio::test]
async fn test_copy_and_move_scenario() {
    let t = TestWarehouse::new();
    let bucket = t.warehouse.resolve_bucket("file:///b1").await.unwrap();

    let mut k1 = bucket.cubby("k1", CubbyOptions::default()).await.unwrap();
    k1.store(Source::from(&b"hello"[..])).await.unwrap();
    assert_eq!(k1.filesize(false).await.unwrap(), 5);

    k1.copy_to(CopyTarget::Key("k2")).await.unwrap();
    let mut k2 = bucket.cubby("k2", CubbyOptions::default()).await.unwrap();
    assert_eq!(k2.retrieve().await.unwrap(), Bytes::from_static(b"hello"));

    let mut k3 = bucket.cubby("k3", CubbyOptions::default()).await.unwrap();
    k2.move_to(CopyTarget::Cubby(k3.as_ref())).await.unwrap();
    assert!(!k2.exists().await.unwrap());
    assert_eq!(k3.retrieve().await.unwrap(), Bytes::from_static(b"hello"));
    assert!(k1.exists().await.unwrap());
}

#[tokio::test]
async fn test_move_onto_itself_keeps_object() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///b/stay").await;
    cubby.store(Source::from(&b"here"[..])).await.unwrap();

    cubby.move_to(CopyTarget::Key("stay")).await.unwrap();
    assert!(cubby.exists().await.unwrap());
}

#[tokio::test]
async fn test_copy_onto_itself_keeps_object() {
    let t = TestWarehouse::new();
    let mut cubby = t
        .cubby_with("file:///b/same.txt", CubbyOptions::default().content_type("text/plain"))
        .await;
    cubby.store(Source::from(&b"hello"[..])).await.unwrap();

    cubby.copy_to(CopyTarget::Key("same.txt")).await.unwrap();
    assert_eq!(cubby.retrieve().await.unwrap(), Bytes::from_static(b"hello"));

    let same = t.cubby("file:///b/same.txt").await;
    cubby.copy_to(CopyTarget::Cubby(same.as_ref())).await.unwrap();
    assert_eq!(cubby.retrieve().await.unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(cubby.mimetype(true).await.unwrap().as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn test_keys_sharing_a_sidecar_prefix_keep_their_attributes() {
    let t = TestWarehouse::new();
    let mut flat = t
        .cubby_with("file:///b/x", CubbyOptions::default().content_type("text/plain"))
        .await;
    flat.store(Source::from(&b"flat"[..])).await.unwrap();

    let mut nested = t
        .cubby_with("file:///b/x.json/y", CubbyOptions::default().content_type("image/png"))
        .await;
    nested.store(Source::from(&b"nested"[..])).await.unwrap();

    let mut flat = t.cubby("file:///b/x").await;
    let mut nested = t.cubby("file:///b/x.json/y").await;
    assert_eq!(flat.mimetype(true).await.unwrap().as_deref(), Some("text/plain"));
    assert_eq!(nested.mimetype(true).await.unwrap().as_deref(), Some("image/png"));
    assert_eq!(flat.retrieve().await.unwrap(), Bytes::from_static(b"flat"));
    assert_eq!(nested.retrieve().await.unwrap(), Bytes::from_static(b"nested"));
}

#[tokio::test]
async fn test_copy_preserves_attributes() {
    let t = TestWarehouse::new();
    let mut src = t
        .cubby_with("file:///b/src.txt", CubbyOptions::default().acl("private"))
        .await;
    src.store(Source::from(&b"compress me please"[..])).await.unwrap();
    src.set_content_encoding("gzip").await.unwrap();
    src.store(Source::from(&b"compress me please"[..])).await.unwrap();

    src.copy_to(CopyTarget::Key("dst.txt")).await.unwrap();

    let mut dst = t.cubby("file:///b/dst.txt").await;
    assert_eq!(dst.content_encoding(false).await.unwrap().as_deref(), Some("gzip"));
    assert_eq!(dst.retrieve().await.unwrap().as_ref(), b"compress me please");
}

#[tokio::test]
async fn test_copy_from_missing_source_fails() {
    let t = TestWarehouse::new();
    let src = t.cubby("file:///b/missing").await;

    let result = src.copy_to(CopyTarget::Key("elsewhere")).await;
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_retrieve_destinations() {
    let t = TestWarehouse::new();
    let mut cubby = t.cubby("file:///b/dir/report.csv").await;
    cubby.store(Source::Text("a,b\n1,2\n".to_string())).await.unwrap();

    let mut buffer = Vec::new();
    cubby.retrieve_to(Destination::Buffer(&mut buffer)).await.unwrap();
    assert_eq!(buffer, b"a,b\n1,2\n");

    let out_dir = tempfile::tempdir().unwrap();
    cubby
        .retrieve_to(Destination::Path(out_dir.path().to_path_buf()))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(out_dir.path().join("dir/report.csv")).unwrap(),
        b"a,b\n1,2\n"
    );

    let file = out_dir.path().join("copy.csv");
    cubby.retrieve_to(Destination::Path(file.clone())).await.unwrap();
    assert_eq!(std::fs::read(file).unwrap(), b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_store_from_file_and_reader() {
    let t = TestWarehouse::new();
    let input = t.temp_dir.path().join("input.bin");
    std::fs::write(&input, b"from disk").unwrap();

    let mut cubby = t.cubby("file:///b/from-file").await;
    cubby.store(Source::Path(input)).await.unwrap();
    assert_eq!(cubby.retrieve().await.unwrap().as_ref(), b"from disk");

    let mut reader = std::io::Cursor::new(b"from stream".to_vec());
    cubby.store(Source::Reader(&mut reader)).await.unwrap();
    assert_eq!(cubby.retrieve().await.unwrap().as_ref(), b"from stream");
}

#[tokio::test]
async fn test_default_bucket() {
    let t = TestWarehouse::new();
    assert!(matches!(
        t.warehouse.bucket(None).await,
        Err(StorageError::MissingDefaultBucket)
    ));

    let t = TestWarehouse::with_config(|config| config.with_default_bucket("uploads"));
    let bucket = t.warehouse.bucket(None).await.unwrap();
    assert_eq!(bucket.name(), "uploads");
    assert!(t.temp_dir.path().join("uploads").is_dir());
}

#[tokio::test]
async fn test_local_url_uses_static_base() {
    let t = TestWarehouse::new();
    let cubby = t.cubby("file:///media/img/cat.png").await;
    assert_eq!(
        cubby.url(None).await.unwrap(),
        "http://localhost:5000/static/media/img/cat.png"
    );
}
