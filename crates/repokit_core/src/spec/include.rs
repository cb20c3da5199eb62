//! Include-path resolution.
//!
//! Turns dotted navigation paths (`Lines`, `Customer.Orders`) into a tree of
//! navigations rooted at one entity descriptor. The session walks the tree
//! to eager-load related rows.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{EntityDescriptor, Navigation};
use once_cell::sync::Lazy;
use regex::Regex;

static INCLUDE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("include path pattern is valid")
});

/// One resolved navigation and the navigations loaded beneath it.
#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub navigation: Navigation,
    pub children: Vec<IncludeNode>,
}

/// Deduplicated set of include paths resolved against a root descriptor.
#[derive(Debug, Clone, Default)]
pub struct IncludeTree {
    paths: Vec<String>,
    roots: Vec<IncludeNode>,
}

impl IncludeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths in the order they were first added.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn roots(&self) -> &[IncludeNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Resolves `path` against `root` and merges it into the tree.
    ///
    /// Returns `Ok(false)` when the path was already present. A path that
    /// does not resolve leaves the tree unchanged.
    pub fn add_path(&mut self, root: &EntityDescriptor, path: &str) -> RepoResult<bool> {
        if !INCLUDE_PATH.is_match(path) {
            return Err(RepoError::mapping(format!(
                "include path `{path}` on {} is not a dotted navigation path",
                root.name
            )));
        }
        if self.paths.iter().any(|existing| existing == path) {
            return Ok(false);
        }

        let chain = resolve_chain(root, path)?;
        let mut level = &mut self.roots;
        for navigation in chain {
            let position = match level
                .iter()
                .position(|node| node.navigation.name == navigation.name)
            {
                Some(position) => position,
                None => {
                    level.push(IncludeNode {
                        navigation,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            level = &mut level[position].children;
        }

        self.paths.push(path.to_string());
        Ok(true)
    }
}

fn resolve_chain(root: &EntityDescriptor, path: &str) -> RepoResult<Vec<Navigation>> {
    let mut chain = Vec::new();
    let mut current = root;
    for segment in path.split('.') {
        let navigation = current.navigation(segment).copied().ok_or_else(|| {
            RepoError::mapping(format!(
                "include path `{path}` on {}: `{segment}` is not a navigation of {}",
                root.name, current.name
            ))
        })?;
        current = navigation.target_descriptor();
        chain.push(navigation);
    }
    Ok(chain)
}
