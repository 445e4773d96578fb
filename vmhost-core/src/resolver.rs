//! Dependency resolver

use crate::registry::{parent_name, ModuleIndex};
use std::collections::BTreeSet;

/// Modules transitively required by a set of requested names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure(BTreeSet<String>);

impl DependencyClosure {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for DependencyClosure {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Compute the closure of `names` against `index`.
///
/// Each requested name is first cut back to its longest registered dotted
/// prefix; names with no registered prefix are dropped. From there the walk
/// follows declared imports, the `__init__` of packages, and the parent
/// package. Unregistered names are never added.
pub fn resolve_closure<I, S>(index: &ModuleIndex, names: I) -> DependencyClosure
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    for name in names {
        if let Some(found) = index.longest_prefix(name.as_ref()) {
            visit(index, found, &mut seen);
        }
    }
    DependencyClosure(seen)
}

fn visit(index: &ModuleIndex, name: &str, seen: &mut BTreeSet<String>) {
    let Some(descriptor) = index.get(name) else {
        return;
    };
    // 递归前先标记，环形 imports 才能终止
    if !seen.insert(name.to_string()) {
        return;
    }

    for import in &descriptor.imports {
        visit(index, import, seen);
    }
    if let Some(init) = descriptor.init_module() {
        visit(index, &init, seen);
    }
    if let Some(parent) = parent_name(name) {
        visit(index, parent, seen);
    }
}
