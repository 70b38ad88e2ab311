use super::helpers::{open_tree, seq_key};
use crate::KvError;
use anyhow::Result;
use std::collections::BTreeSet;
use tempfile::tempdir;

// --------------------- Empty engine ---------------------

#[test]
fn empty_engine_has_nothing() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    assert!(tree.get(b"x")?.is_none());
    assert_eq!(tree.total_keys()?, 0);
    assert!(tree.keys()?.is_empty());
    assert!(tree.key_value_pairs()?.is_empty());

    let analysis = tree.analyze()?;
    assert_eq!(analysis.leaf_total, 0);
    assert_eq!(analysis.leaf_empty, 0);
    assert_eq!(analysis.leaf_prealloc, 0);
    assert!(analysis.path.ends_with("kv.pool"));
    Ok(())
}

// --------------------- get_into ---------------------

#[test]
fn get_into_reports_size_and_respects_buffer() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    tree.put(b"a", b"abcdef")?;

    // Buffer too small: failure carries the real size, buffer untouched.
    let mut small = [0xEE_u8; 3];
    match tree.get_into(b"a", &mut small) {
        Err(KvError::BufferTooSmall { size }) => assert_eq!(size, 6),
        other => panic!("expected BufferTooSmall, got {:?}", other),
    }
    assert_eq!(small, [0xEE; 3]);

    // Exact fit.
    let mut exact = [0u8; 6];
    assert_eq!(tree.get_into(b"a", &mut exact)?, Some(6));
    assert_eq!(&exact, b"abcdef");

    // Oversized buffer: only the value bytes are written.
    let mut roomy = [0xEE_u8; 10];
    assert_eq!(tree.get_into(b"a", &mut roomy)?, Some(6));
    assert_eq!(&roomy[..6], b"abcdef");
    assert_eq!(&roomy[6..], &[0xEE; 4]);
    Ok(())
}

#[test]
fn get_into_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    let mut buf = [0u8; 8];
    assert_eq!(tree.get_into(b"nope", &mut buf)?, None);
    Ok(())
}

// --------------------- Values ---------------------

#[test]
fn empty_value_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    tree.put(b"empty", b"")?;
    assert_eq!(tree.get(b"empty")?.unwrap(), b"");
    assert_eq!(tree.total_keys()?, 1);
    Ok(())
}

#[test]
fn large_value_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    let value = vec![0xAB_u8; 16 * 1024];
    tree.put(b"big", &value)?;
    assert_eq!(tree.get(b"big")?.unwrap(), value);
    Ok(())
}

#[test]
fn binary_keys_and_values() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    let key = [0x00_u8, 0xFF, 0x7F, 0x00];
    let value = [0xDE_u8, 0xAD, 0x00, 0xBE, 0xEF];
    tree.put(&key, &value)?;
    assert_eq!(tree.get(&key)?.unwrap(), value);
    Ok(())
}

// --------------------- Enumeration ---------------------

#[test]
fn keys_lists_every_live_key_once() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    for i in 0..=48 {
        tree.put(&seq_key(i), b"v")?;
    }
    tree.remove(&seq_key(7))?;
    tree.remove(&seq_key(31))?;

    let listed = tree.keys()?;
    assert_eq!(listed.len(), 47, "each live key exactly once");

    let set: BTreeSet<Vec<u8>> = listed.into_iter().collect();
    let expected: BTreeSet<Vec<u8>> = (0..=48)
        .filter(|&i| i != 7 && i != 31)
        .map(seq_key)
        .collect();
    assert_eq!(set, expected);
    Ok(())
}

#[test]
fn key_value_pairs_match_gets() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    for i in 0..60 {
        tree.put(&seq_key(i), format!("value-{}", i).as_bytes())?;
    }

    let pairs = tree.key_value_pairs()?;
    assert_eq!(pairs.len(), 60);
    for (key, value) in pairs {
        assert_eq!(tree.get(&key)?.unwrap(), value);
    }
    Ok(())
}

#[test]
fn total_keys_tracks_removals() -> Result<()> {
    let dir = tempdir()?;
    let tree = open_tree(&dir.path().join("kv.pool"));

    for i in 0..20 {
        tree.put(&seq_key(i), b"v")?;
    }
    assert_eq!(tree.total_keys()?, 20);
    for i in 0..10 {
        tree.remove(&seq_key(i))?;
    }
    assert_eq!(tree.total_keys()?, 10);
    Ok(())
}
