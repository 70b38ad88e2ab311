//! # CLI - EmberKV Interactive Shell
//!
//! A REPL-style command-line interface for the EmberKV storage engine.
//! Reads commands from stdin, executes them against the engine, and
//! prints results to stdout. Designed for both interactive use and
//! scripted testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (no-op when absent)
//! KEYS               Print every live key
//! LIST               Print every key-value pair
//! COUNT              Print the number of live keys
//! ANALYZE            Print leaf statistics from the persistent pool
//! STATS              Print engine debug info
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! EMBER_POOL_PATH    Pool file path                  (default: "ember.pool")
//! EMBER_POOL_SIZE_MB Pool size on creation, in MiB   (default: 64)
//! EMBER_LAYOUT       Layout name baked into the pool (default: "emberkv")
//! ```
//!
//! The pool file is created on first start and reopened (with full
//! recovery) afterwards; `EMBER_POOL_SIZE_MB` only matters on creation.
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! EmberKV started (pool=ember.pool, layout=emberkv, keys=0)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > COUNT
//! 1
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use kvtree::KvTree;
use std::io::{self, BufRead, Write};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    // Configuration via environment variables with sensible defaults.
    //
    //  EMBER_POOL_PATH    - pool file path                  (default: "ember.pool")
    //  EMBER_POOL_SIZE_MB - pool size on creation, in MiB   (default: 64)
    //  EMBER_LAYOUT       - layout name baked into the pool (default: "emberkv")
    let pool_path = env_or("EMBER_POOL_PATH", "ember.pool");
    let size_mb: u64 = env_or("EMBER_POOL_SIZE_MB", "64").parse().unwrap_or(64);
    let layout = env_or("EMBER_LAYOUT", "emberkv");

    let tree = KvTree::open(&pool_path, &layout, size_mb * 1024 * 1024)?;

    println!(
        "EmberKV started (pool={}, layout={}, keys={})",
        pool_path,
        layout,
        tree.total_keys()?
    );
    println!("Commands: SET key value | GET key | DEL key | KEYS | LIST");
    println!("          COUNT | ANALYZE | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match tree.put(k.as_bytes(), v.as_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {}", e),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match tree.get(k.as_bytes()) {
                            Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                            Ok(None) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match tree.remove(k.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "KEYS" => match tree.keys() {
                    Ok(keys) => {
                        if keys.is_empty() {
                            println!("(empty)");
                        } else {
                            for k in &keys {
                                println!("{}", String::from_utf8_lossy(k));
                            }
                            println!("({} keys)", keys.len());
                        }
                    }
                    Err(e) => println!("ERR keys failed: {}", e),
                },
                "LIST" => match tree.key_value_pairs() {
                    Ok(pairs) => {
                        if pairs.is_empty() {
                            println!("(empty)");
                        } else {
                            for (k, v) in &pairs {
                                println!(
                                    "{} -> {}",
                                    String::from_utf8_lossy(k),
                                    String::from_utf8_lossy(v)
                                );
                            }
                            println!("({} entries)", pairs.len());
                        }
                    }
                    Err(e) => println!("ERR list failed: {}", e),
                },
                "COUNT" => match tree.total_keys() {
                    Ok(n) => println!("{}", n),
                    Err(e) => println!("ERR count failed: {}", e),
                },
                "ANALYZE" => match tree.analyze() {
                    Ok(a) => println!(
                        "leaves={} empty={} prealloc={}",
                        a.leaf_total, a.leaf_empty, a.leaf_prealloc
                    ),
                    Err(e) => println!("ERR analyze failed: {}", e),
                },
                "STATS" => {
                    println!("{:?}", tree);
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
