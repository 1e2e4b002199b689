use std::collections::BTreeMap;

/// Nested remote directories, keyed by name. An empty child map is a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTree {
    children: BTreeMap<String, DirectoryTree>,
}

impl DirectoryTree {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            children: BTreeMap::new(),
        }
    }

    /// Adds every component of a `/`-separated relative path.
    pub fn insert_path(&mut self, path: &str) {
        let mut node = self;
        for component in path.split('/').filter(|part| !part.is_empty() && *part != ".") {
            node = node.children.entry(component.to_owned()).or_default();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Absolute paths under `root`, every parent listed before its children.
    #[must_use]
    pub fn flatten(&self, root: &str) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect(root.trim_end_matches('/'), &mut paths);
        paths
    }

    fn collect(&self, base: &str, paths: &mut Vec<String>) {
        for (name, child) in &self.children {
            let path = format!("{}/{}", base, name);
            paths.push(path.clone());
            child.collect(&path, paths);
        }
    }
}
