// src/ingest/providers/fixture.rs
//! Items from a JSON array, for dry runs and tests. Each item is emitted once;
//! when backed by a file, the file is re-read on every poll so items appended
//! while running are picked up.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ingest::types::{ItemKey, SourceItem, SourceProvider};

enum Mode {
    Static(Vec<SourceItem>),
    File(PathBuf),
}

pub struct FixtureProvider {
    mode: Mode,
    emitted: Mutex<HashSet<ItemKey>>,
}

impl FixtureProvider {
    pub fn from_items(items: Vec<SourceItem>) -> Self {
        Self {
            mode: Mode::Static(items),
            emitted: Mutex::new(HashSet::new()),
        }
    }

    /// The file must exist and parse at construction time.
    pub fn from_path(path: &Path) -> Result<Self> {
        parse_file(path)?;
        Ok(Self {
            mode: Mode::File(path.to_path_buf()),
            emitted: Mutex::new(HashSet::new()),
        })
    }
}

fn parse_file(path: &Path) -> Result<Vec<SourceItem>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
}

#[async_trait]
impl SourceProvider for FixtureProvider {
    async fn fetch_latest(&self) -> Result<Vec<SourceItem>> {
        let all = match &self.mode {
            Mode::Static(items) => items.clone(),
            Mode::File(p) => parse_file(p)?,
        };
        let mut emitted = self.emitted.lock().await;
        Ok(all
            .into_iter()
            .filter(|it| emitted.insert(it.key.clone()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
