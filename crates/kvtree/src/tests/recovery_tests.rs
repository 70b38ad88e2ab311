use super::helpers::{check_tree, open_tree, seq_key, tree_height, LAYOUT, POOL_SIZE};
use crate::KvTree;
use anyhow::Result;
use pmem::Pool;
use std::collections::BTreeSet;
use tempfile::tempdir;

// --------------------- Reopen ---------------------

#[test]
fn reopen_preserves_single_leaf() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    {
        let tree = open_tree(&path);
        tree.put(b"a", b"1")?;
        tree.put(b"b", b"2")?;
    }

    let tree = open_tree(&path);
    assert_eq!(tree.get(b"a")?.unwrap(), b"1");
    assert_eq!(tree.get(b"b")?.unwrap(), b"2");
    assert_eq!(tree.total_keys()?, 2);
    Ok(())
}

#[test]
fn reopen_after_split_preserves_all() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    {
        let tree = open_tree(&path);
        for i in 0..=48 {
            tree.put(&seq_key(i), &seq_key(i))?;
        }
    }

    let tree = open_tree(&path);
    assert_eq!(tree.total_keys()?, 49);
    for i in 0..=48 {
        assert_eq!(tree.get(&seq_key(i))?.unwrap(), seq_key(i));
    }
    assert!(tree_height(&tree) >= 2);
    check_tree(&tree);
    Ok(())
}

#[test]
fn reopen_rebuilds_deep_trees() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    // Insertion order deliberately interleaved so the persistent list
    // order has nothing to do with key order.
    {
        let tree = open_tree(&path);
        for i in (0..1000u32).step_by(2) {
            tree.put(format!("key{:04}", i).as_bytes(), &i.to_le_bytes())?;
        }
        for i in (1..1000u32).step_by(2) {
            tree.put(format!("key{:04}", i).as_bytes(), &i.to_le_bytes())?;
        }
    }

    let tree = open_tree(&path);
    assert_eq!(tree.total_keys()?, 1000);
    check_tree(&tree);
    for i in (0..1000u32).step_by(83) {
        assert_eq!(
            tree.get(format!("key{:04}", i).as_bytes())?.unwrap(),
            i.to_le_bytes()
        );
    }
    Ok(())
}

#[test]
fn reopen_returns_same_key_set() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    let before: BTreeSet<Vec<u8>> = {
        let tree = open_tree(&path);
        for i in 0..200 {
            tree.put(format!("key{:03}", i).as_bytes(), b"v")?;
        }
        for i in (0..200).step_by(3) {
            tree.remove(format!("key{:03}", i).as_bytes())?;
        }
        tree.keys()?.into_iter().collect()
    };

    let tree = open_tree(&path);
    let after: BTreeSet<Vec<u8>> = tree.keys()?.into_iter().collect();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn reopen_empty_pool() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");
    drop(open_tree(&path));

    let tree = open_tree(&path);
    assert_eq!(tree.total_keys()?, 0);
    assert!(tree.get(b"x")?.is_none());
    Ok(())
}

// --------------------- Prealloc reuse ---------------------

#[test]
fn empty_leaves_are_preallocated_on_recovery() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    {
        let tree = open_tree(&path);
        for i in 0..=48 {
            tree.put(&seq_key(i), b"v")?;
        }
        for i in 0..=48 {
            tree.remove(&seq_key(i))?;
        }
        // Both leaves stay in the list, now empty.
        let analysis = tree.analyze()?;
        assert_eq!(analysis.leaf_total, 2);
        assert_eq!(analysis.leaf_empty, 2);
        assert_eq!(analysis.leaf_prealloc, 0);
    }

    let tree = open_tree(&path);
    assert_eq!(tree.total_keys()?, 0);
    let analysis = tree.analyze()?;
    assert_eq!(analysis.leaf_total, 2);
    assert_eq!(analysis.leaf_prealloc, 2);

    // The next insert recycles instead of allocating.
    tree.put(b"fresh", b"v")?;
    let analysis = tree.analyze()?;
    assert_eq!(analysis.leaf_total, 2);
    assert_eq!(analysis.leaf_prealloc, 1);
    assert_eq!(tree.get(b"fresh")?.unwrap(), b"v");
    Ok(())
}

// --------------------- Alternate construction forms ---------------------

#[test]
fn with_pool_adopts_registered_root() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    {
        let tree = open_tree(&path);
        tree.put(b"k", b"v")?;
    }

    let pool = Pool::open(&path, LAYOUT)?;
    let tree = KvTree::with_pool(pool)?;
    assert_eq!(tree.get(b"k")?.unwrap(), b"v");
    Ok(())
}

#[test]
fn with_root_isolates_engines_in_one_pool() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");
    let pool = Pool::create(&path, LAYOUT, POOL_SIZE)?;

    // First engine on a fresh root.
    let first = KvTree::with_root(pool, 0)?;
    first.put(b"mine", b"1")?;
    let first_root = first.root_offset();
    let pool = first.into_pool();

    // Second engine on its own root does not see the first one's data.
    let second = KvTree::with_root(pool, 0)?;
    assert_ne!(second.root_offset(), first_root);
    assert!(second.get(b"mine")?.is_none());
    second.put(b"other", b"2")?;
    let pool = second.into_pool();

    // Reattaching to the first root finds its data again.
    let tree = KvTree::with_root(pool, first_root)?;
    assert_eq!(tree.get(b"mine")?.unwrap(), b"1");
    assert!(tree.get(b"other")?.is_none());
    Ok(())
}

#[test]
fn into_pool_keeps_the_pool_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    let tree = open_tree(&path);
    tree.put(b"k", b"v")?;
    let pool = tree.into_pool();

    // Same handle, no close/reopen in between.
    let tree = KvTree::with_pool(pool)?;
    assert_eq!(tree.get(b"k")?.unwrap(), b"v");
    Ok(())
}

// --------------------- Destroy ---------------------

#[test]
fn destroy_wipes_persistent_state() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");

    let tree = open_tree(&path);
    for i in 0..=48 {
        tree.put(&seq_key(i), b"v")?;
    }
    let pool = tree.destroy()?;

    // A fresh engine over the same pool starts empty.
    let tree = KvTree::with_pool(pool)?;
    assert_eq!(tree.total_keys()?, 0);
    let analysis = tree.analyze()?;
    assert_eq!(analysis.leaf_total, 0);

    // And the pool is fully usable again.
    tree.put(b"again", b"v")?;
    assert_eq!(tree.get(b"again")?.unwrap(), b"v");
    Ok(())
}

#[test]
fn destroy_of_adopted_root_keeps_registered_root() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv.pool");
    let pool = Pool::create(&path, LAYOUT, POOL_SIZE)?;

    // First engine owns the pool's registered root.
    let first = KvTree::with_pool(pool)?;
    first.put(b"registered", b"1")?;
    let first_root = first.root_offset();
    let pool = first.into_pool();

    // Second engine lives on its own, unregistered root in the same pool.
    let second = KvTree::with_root(pool, 0)?;
    assert_ne!(second.root_offset(), first_root);
    second.put(b"tenant", b"2")?;

    // Destroying the tenant must only tear down its own root; the
    // pool's registered root stays registered.
    let pool = second.destroy()?;
    assert_eq!(pool.root(), first_root);

    let first = KvTree::with_pool(pool)?;
    assert_eq!(first.root_offset(), first_root);
    assert_eq!(first.get(b"registered")?.unwrap(), b"1");
    assert!(first.get(b"tenant")?.is_none());
    Ok(())
}
