//! vmhost Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It serves as the shared configuration vocabulary across all vmhost crates.

use serde::{Deserialize, Serialize};

/// Default linear memory size handed to the VM (128 MiB).
pub const DEFAULT_TOTAL_MEMORY: usize = 128 * 1024 * 1024;

/// Configuration for one hosted VM instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root location every fetch is relative to
    pub root: String,
    /// File name of the VM payload under the root
    pub vm_file: String,
    /// Path of the module index document under the root
    pub index_file: String,
    /// Directory (under the root) that module files are fetched from
    pub modules_dir: String,
    /// Linear memory size requested from the linker
    pub total_memory: usize,
    /// Scan evaluated source for imports and preload their modules
    pub auto_load_modules: bool,
    /// Program path reported to the VM
    pub this_program: String,
    /// Directory inside the VM filesystem that modules are installed under
    pub lib_root: String,
    /// Additional directories created in the VM filesystem at boot
    pub search_dirs: Vec<String>,
    /// Which VM flavour is hosted
    pub variant: Variant,
}

impl HostConfig {
    /// Config for a VM payload under the given root
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Root location, always terminated by a `/`
    pub fn normalized_root(&self) -> String {
        if self.root.is_empty() {
            return String::from("./");
        }
        if self.root.ends_with('/') {
            self.root.clone()
        } else {
            format!("{}/", self.root)
        }
    }

    /// Path of a module file relative to the root
    pub fn module_path(&self, file: &str) -> String {
        let dir = self.modules_dir.trim_end_matches('/');
        if dir.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", dir, file.trim_start_matches('/'))
        }
    }

    /// Whether the full-language flavour is hosted
    pub fn is_full(&self) -> bool {
        matches!(self.variant, Variant::Full(_))
    }

    /// Options of the full-language flavour, if hosted
    pub fn full_options(&self) -> Option<&FullOptions> {
        match &self.variant {
            Variant::Full(options) => Some(options),
            Variant::Minimal => None,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root: String::from("./"),
            vm_file: String::from("pypy.vm.js"),
            index_file: String::from("modules/index.json"),
            modules_dir: String::from("modules"),
            total_memory: DEFAULT_TOTAL_MEMORY,
            auto_load_modules: true,
            this_program: String::from("/lib/pypyjs/pypy.js"),
            lib_root: String::from("/lib/pypyjs/lib_pypy"),
            search_dirs: vec![
                String::from("lib/pypyjs/lib_pypy"),
                String::from("lib/pypyjs/lib-python/2.7"),
            ],
            variant: Variant::Full(FullOptions::default()),
        }
    }
}

/// VM flavour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variant {
    /// Full language runtime: home path, interop bridge, module index
    Full(FullOptions),
    /// Startup-only runtime without module management
    Minimal,
}

/// Settings specific to the full-language flavour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullOptions {
    /// Home path passed to the VM after startup
    pub home_path: String,
    /// Source executed once after startup to bring the bridge into scope
    pub bootstrap_source: String,
    /// Guest-side name of the interop bridge module
    pub bridge_module: String,
}

impl Default for FullOptions {
    fn default() -> Self {
        Self {
            home_path: String::from("/lib/pypyjs/pypy.js"),
            bootstrap_source: String::from("import js"),
            bridge_module: String::from("js"),
        }
    }
}
