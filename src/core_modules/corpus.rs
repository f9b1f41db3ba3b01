// THEORY:
// The corpus walker mirrors a folder tree in memory so a whole training set can be
// discovered once, filled with loaded data in place, and then read back as a flat
// path -> value table. The tree is a tagged enum rather than a loosely typed map:
// a node is either a leaf slot for one file or a directory of further nodes, and
// every traversal is an explicit recursion over those two cases.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One entry of a mirrored folder tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<V> {
    /// A file. The slot starts empty and is filled by an apply pass.
    Leaf(Option<V>),
    /// A directory, keyed by full path or by entry name.
    Directory(Structure<V>),
}

/// A mirrored folder level. Keys are sorted, which fixes discovery order.
pub type Structure<V> = BTreeMap<PathBuf, Node<V>>;

/// Mirrors `folder` as a tree of empty leaves.
///
/// The returned map holds a single entry keyed by `folder` itself. With
/// `use_relative_names` the entries below it are keyed by their file or directory
/// name, otherwise by their full path.
pub fn build_structure<V>(folder: impl AsRef<Path>, use_relative_names: bool) -> Result<Structure<V>> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(Error::invalid(format!(
            "'{}' is not an existing folder",
            folder.display()
        )));
    }

    let mut structure = Structure::new();
    structure.insert(
        folder.to_path_buf(),
        Node::Directory(read_level(folder, use_relative_names)?),
    );
    debug!(folder = %folder.display(), leaves = leaf_count(&structure), "folder structure");
    Ok(structure)
}

fn read_level<V>(folder: &Path, use_relative_names: bool) -> Result<Structure<V>> {
    let mut level = Structure::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        let key = if use_relative_names {
            PathBuf::from(entry.file_name())
        } else {
            path.clone()
        };

        if path.is_dir() {
            level.insert(key, Node::Directory(read_level(&path, use_relative_names)?));
        } else if path.is_file() {
            level.insert(key, Node::Leaf(None));
        }
    }
    Ok(level)
}

/// Replaces every leaf with `f(key)`.
pub fn apply_to_keys<V, F>(structure: &mut Structure<V>, mut f: F)
where
    F: FnMut(&Path) -> V,
{
    fn walk<V, F: FnMut(&Path) -> V>(level: &mut Structure<V>, f: &mut F) {
        for (key, node) in level.iter_mut() {
            match node {
                Node::Leaf(value) => *value = Some(f(key)),
                Node::Directory(children) => walk(children, f),
            }
        }
    }
    walk(structure, &mut f);
}

/// Replaces every leaf with `f(stored value)`.
pub fn apply_to_values<V, F>(structure: &mut Structure<V>, mut f: F)
where
    F: FnMut(Option<V>) -> Option<V>,
{
    fn walk<V, F: FnMut(Option<V>) -> Option<V>>(level: &mut Structure<V>, f: &mut F) {
        for node in level.values_mut() {
            match node {
                Node::Leaf(value) => *value = f(value.take()),
                Node::Directory(children) => walk(children, f),
            }
        }
    }
    walk(structure, &mut f);
}

/// Fallible [`apply_to_keys`]: stops at and returns the first error.
///
/// Leaves visited before the failure keep their new values.
pub fn try_apply_to_keys<V, F>(structure: &mut Structure<V>, mut f: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<V>,
{
    fn walk<V, F: FnMut(&Path) -> Result<V>>(level: &mut Structure<V>, f: &mut F) -> Result<()> {
        for (key, node) in level.iter_mut() {
            match node {
                Node::Leaf(value) => *value = Some(f(key)?),
                Node::Directory(children) => walk(children, f)?,
            }
        }
        Ok(())
    }
    walk(structure, &mut f)
}

/// Collapses the tree into leaf key -> leaf value, across every depth.
///
/// With relative names, files sharing a name in different folders share a key;
/// the one visited last is kept.
pub fn flatten<V>(structure: Structure<V>) -> BTreeMap<PathBuf, Option<V>> {
    fn walk<V>(level: Structure<V>, flat: &mut BTreeMap<PathBuf, Option<V>>) {
        for (key, node) in level {
            match node {
                Node::Leaf(value) => {
                    flat.insert(key, value);
                }
                Node::Directory(children) => walk(children, flat),
            }
        }
    }
    let mut flat = BTreeMap::new();
    walk(structure, &mut flat);
    flat
}

/// Number of leaves in the tree.
pub fn leaf_count<V>(structure: &Structure<V>) -> usize {
    structure
        .values()
        .map(|node| match node {
            Node::Leaf(_) => 1,
            Node::Directory(children) => leaf_count(children),
        })
        .sum()
}
