//! Module registry
//!
//! Built once from the index document fetched at boot and read-only
//! afterwards:
//!
//! ```json
//! {
//!   "modules": {
//!     "json": { "file": "json/", "dir": true },
//!     "json.decoder": { "file": "json/decoder.py", "imports": ["re"] }
//!   },
//!   "eager": { "site": "# site.py contents" }
//! }
//! ```

use crate::error::IndexError;
use serde::Deserialize;
use std::collections::BTreeMap;

/// One loadable library unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Path relative to the modules directory (and to the VM library root)
    pub file: String,
    /// Package directory: carries an implicit `<name>.__init__` dependency
    pub is_package: bool,
    pub imports: Vec<String>,
}

impl ModuleDescriptor {
    pub fn module(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            is_package: false,
            imports: Vec::new(),
        }
    }

    pub fn package(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            is_package: true,
            ..Self::module(name, file)
        }
    }

    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the `__init__` module of a package
    pub fn init_module(&self) -> Option<String> {
        self.is_package.then(|| format!("{}.__init__", self.name))
    }

    /// Enclosing package name (`a.b.c` -> `a.b`)
    pub fn parent(&self) -> Option<&str> {
        parent_name(&self.name)
    }
}

pub(crate) fn parent_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[..idx])
}

#[derive(Deserialize)]
struct RawIndex {
    modules: BTreeMap<String, RawEntry>,
    #[serde(default)]
    eager: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    file: String,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    imports: Vec<String>,
}

/// name -> descriptor, plus eager module contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleIndex {
    modules: BTreeMap<String, ModuleDescriptor>,
    eager: BTreeMap<String, String>,
}

impl ModuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an index document
    pub fn from_json(bytes: &[u8]) -> Result<Self, IndexError> {
        let raw: RawIndex = serde_json::from_slice(bytes)?;

        let modules = raw
            .modules
            .into_iter()
            .map(|(name, entry)| {
                let descriptor = ModuleDescriptor {
                    name: name.clone(),
                    file: entry.file,
                    is_package: entry.dir,
                    imports: entry.imports,
                };
                (name, descriptor)
            })
            .collect::<BTreeMap<_, _>>();

        if let Some(unknown) = raw.eager.keys().find(|name| !modules.contains_key(*name)) {
            return Err(IndexError::UnknownEager(unknown.clone()));
        }

        Ok(Self {
            modules,
            eager: raw.eager,
        })
    }

    /// Build an index from descriptors (tests, tooling)
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = ModuleDescriptor>,
    {
        Self {
            modules: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            eager: BTreeMap::new(),
        }
    }

    /// Flag a registered module as eager with its inline contents
    pub fn with_eager(mut self, name: impl Into<String>, contents: impl Into<String>) -> Result<Self, IndexError> {
        let name = name.into();
        if !self.modules.contains_key(&name) {
            return Err(IndexError::UnknownEager(name));
        }
        self.eager.insert(name, contents.into());
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Longest registered dotted prefix of `name` (`a.b.c` -> `a.b` -> `a`)
    pub fn longest_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        let mut candidate = name;
        loop {
            if candidate.is_empty() {
                return None;
            }
            if self.contains(candidate) {
                return Some(candidate);
            }
            candidate = parent_name(candidate)?;
        }
    }

    /// Eager modules with their inline contents, in name order
    pub fn eager(&self) -> impl Iterator<Item = (&ModuleDescriptor, &str)> {
        self.eager
            .iter()
            .filter_map(|(name, contents)| Some((self.modules.get(name)?, contents.as_str())))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
