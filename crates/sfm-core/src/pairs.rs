//! Retrieval rankings and pair selection.
//!
//! Retrieval proposes, for every image, its top-K most similar other images.
//! The pair selector turns these directed proposals into an undirected,
//! duplicate-free pair list restricted to the current image set.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PairError {
    #[error("need at least 2 images to form pairs, got {0}")]
    InsufficientImages(usize),
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: expected two image names, got '{content}'", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Ranked neighbours of one image, most similar first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRanking {
    pub image: String,
    pub neighbors: Vec<String>,
}

/// Per-image retrieval rankings in query order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rankings {
    entries: Vec<ImageRanking>,
}

impl Rankings {
    /// Append neighbours to `image`'s ranking, creating it if needed.
    pub fn push<I, S>(&mut self, image: impl Into<String>, neighbors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let image = image.into();
        let neighbors = neighbors.into_iter().map(Into::into);
        match self.entries.iter_mut().find(|e| e.image == image) {
            Some(entry) => entry.neighbors.extend(neighbors),
            None => self.entries.push(ImageRanking {
                image,
                neighbors: neighbors.collect(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRanking> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `query neighbour` lines as written by retrieval tools.
    ///
    /// Lines keep their file order, so the first neighbour listed for a
    /// query is its best match. Blank lines and `#` comments are skipped.
    pub fn from_pairs_file(path: &Path) -> Result<Self, PairError> {
        let mut rankings = Rankings::default();
        for (image, neighbor) in read_name_pairs(path)? {
            rankings.push(image, [neighbor]);
        }
        Ok(rankings)
    }
}

/// Unordered image pair, stored in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImagePair(pub String, pub String);

/// Ordered, duplicate-free list of unordered image pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairList {
    pairs: Vec<ImagePair>,
}

impl PairList {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImagePair> {
        self.pairs.iter()
    }

    /// True if `{a, b}` is in the list, in either order.
    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.pairs
            .iter()
            .any(|p| (p.0 == a && p.1 == b) || (p.0 == b && p.1 == a))
    }

    /// Write one `name0 name1` pair per line.
    pub fn write(&self, path: &Path) -> Result<(), PairError> {
        let mut out = String::new();
        for ImagePair(a, b) in &self.pairs {
            let _ = writeln!(out, "{a} {b}");
        }
        fs::write(path, out).map_err(|source| PairError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read_name_pairs(path: &Path) -> Result<Vec<(String, String)>, PairError> {
    let data = fs::read_to_string(path).map_err(|source| PairError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut pairs = Vec::new();
    for (idx, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) => pairs.push((a.to_string(), b.to_string())),
            _ => {
                return Err(PairError::Malformed {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
        }
    }
    Ok(pairs)
}

/// Build the undirected pair list from per-image top-K rankings.
///
/// `images` is the current image set in catalog order. Only the first `k`
/// neighbours of each ranking are considered; an image with fewer neighbours
/// contributes all of them. `{A, B}` appears once if A ranks B, B ranks A,
/// or both. Self pairs and names outside `images` are dropped.
pub fn select_pairs(images: &[String], rankings: &Rankings, k: usize) -> Result<PairList, PairError> {
    if images.len() < 2 {
        return Err(PairError::InsufficientImages(images.len()));
    }

    let index: HashMap<&str, usize> = images
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut queries: Vec<(usize, &ImageRanking)> = Vec::with_capacity(rankings.len());
    for ranking in rankings.iter() {
        match index.get(ranking.image.as_str()) {
            Some(&i) => queries.push((i, ranking)),
            None => warn!("ignoring ranking for unknown image '{}'", ranking.image),
        }
    }
    queries.sort_by_key(|(i, _)| *i);

    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut pairs = Vec::new();
    let mut dropped = 0usize;
    for (qi, ranking) in queries {
        for neighbor in ranking.neighbors.iter().take(k) {
            let Some(&ni) = index.get(neighbor.as_str()) else {
                dropped += 1;
                continue;
            };
            if ni == qi {
                continue;
            }
            let key = (qi.min(ni), qi.max(ni));
            if seen.insert(key) {
                pairs.push(ImagePair(images[key.0].clone(), images[key.1].clone()));
            }
        }
    }
    if dropped > 0 {
        warn!("dropped {dropped} retrieval neighbours outside the image set");
    }

    Ok(PairList { pairs })
}
