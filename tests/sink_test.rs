mod common;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use ecom_aggregates::sink::PART_FILE;
use ecom_aggregates::{output_location, Datum, ParquetDirSink, Sink, WriteMode};

use common::*;

#[test]
fn overwrite_replaces_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let location = output_location(&base, "total_price_by_product_material");
    let target = dir.path().join("total_price_by_product_material");

    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("part-old.parquet"), b"stale").unwrap();

    let sink = ParquetDirSink::new();
    sink.write(&location, &products(), WriteMode::Overwrite)
        .unwrap();

    let mut files: Vec<String> = fs::read_dir(&target)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec![PART_FILE.to_string()]);
}

#[test]
fn written_table_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let base = format!("file://{}", dir.path().display());
    let location = output_location(&base, "sales");

    let sink = ParquetDirSink::new();
    sink.write(&location, &sales(), WriteMode::Overwrite).unwrap();

    let back = sink.read(&location).unwrap();
    assert_eq!(back.column_names(), sales().column_names());
    assert_eq!(back.rows(), sales().rows());
    assert_eq!(back.datum("user_id", 3).unwrap(), Datum::from("c9"));
    assert_eq!(sink.row_count(&location).unwrap(), 4);
}

#[test]
fn second_write_wins_and_keeps_one_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let location = output_location(&base, "products");
    let sink = ParquetDirSink::new();

    for _ in 0..3 {
        sink.write(&location, &products(), WriteMode::Overwrite)
            .unwrap();
    }
    sink.write(&location, &empty_products(), WriteMode::Overwrite)
        .unwrap();

    assert_eq!(sink.row_count(&location).unwrap(), 0);
    assert_eq!(sink.read(&location).unwrap().num_rows(), 0);

    let mut entries: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries.len(), 3, "{entries:?}");
    assert!(entries[0].starts_with(".products.v-"));
    assert!(entries[1].starts_with(".products.v-"));
    assert_eq!(entries[2], "products");
    assert!(fs::symlink_metadata(dir.path().join("products"))
        .unwrap()
        .file_type()
        .is_symlink());
}

#[test]
fn readers_always_find_committed_data() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let location = output_location(&base, "products");
    let part = dir.path().join("products").join(PART_FILE);
    let sink = ParquetDirSink::new();
    sink.write(&location, &products(), WriteMode::Overwrite)
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let part = part.clone();
        thread::spawn(move || {
            let mut misses = 0usize;
            while !done.load(Ordering::SeqCst) {
                if !part.exists() {
                    misses += 1;
                }
            }
            misses
        })
    };

    for _ in 0..200 {
        sink.write(&location, &products(), WriteMode::Overwrite)
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);
    assert_eq!(reader.join().unwrap(), 0);
    assert_eq!(sink.row_count(&location).unwrap(), 3);
}

#[test]
fn remote_schemes_are_rejected() {
    let sink = ParquetDirSink::new();
    let err = sink
        .write("s3://bucket/out/products/", &products(), WriteMode::Overwrite)
        .unwrap_err();
    assert!(err.to_string().contains("s3"));
}
