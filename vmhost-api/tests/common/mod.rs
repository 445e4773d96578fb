//! 测试辅助工具
//!
//! A scripted VM and a counting transport for end-to-end interpreter tests.
//!
//! The fake VM understands one statement per line:
//! - `import a.b` / `from a.b import c`: succeeds if the module file is installed
//! - `print('text')`, `write('text')`: stdout, with `\n` escapes
//! - `name = <json>`: bind a global
//! - the get/set snippets generated by the execution bridge
//!
//! Anything else is a guest error (status 1).

#![allow(dead_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vmhost_api::vmhost_core::{
    ExecutionContext, Handle, ResultBridge, StreamMultiplexer, TransportError, VfsTransport, VmError,
    VmPtr,
};
use vmhost_api::{HostConfig, HostOptions, HostValue, Interpreter, Linker, Transport, VmInstance};
use vmhost_vfs::{MemoryFileSystem, VirtualFileSystem};

pub const LIB_ROOT: &str = "/lib/pypyjs/lib_pypy";

/// Modules the guest has without any file
const BUILTINS: &[&str] = &["js", "sys"];

pub const INDEX: &str = r##"{
    "modules": {
        "a": { "file": "a", "dir": true },
        "a.__init__": { "file": "a/__init__.py" },
        "a.sub": { "file": "a/sub", "dir": true },
        "a.sub.__init__": { "file": "a/sub/__init__.py" },
        "b": { "file": "b.py" },
        "c": { "file": "c.py", "imports": ["b"] },
        "d": { "file": "d.py", "imports": ["c"] },
        "lost": { "file": "lost.py" },
        "site": { "file": "site.py" }
    },
    "eager": { "site": "# installed at boot" }
}"##;

/// Observable side effects of every VM a linker produced
#[derive(Default)]
pub struct VmStats {
    pub allocations: AtomicUsize,
    pub frees: AtomicUsize,
    pub handles_made: AtomicUsize,
    pub handles_freed: AtomicUsize,
    pub fail_alloc: AtomicBool,
    pub executed: Mutex<Vec<String>>,
    pub home: Mutex<Option<String>>,
    pub results: Mutex<Option<Arc<ResultBridge>>>,
    pub context: Mutex<Option<ExecutionContext>>,
    pub fs: Mutex<Option<MemoryFileSystem>>,
}

impl VmStats {
    /// Buffers allocated and not yet freed
    pub fn live_buffers(&self) -> usize {
        self.allocations.load(Ordering::SeqCst) - self.frees.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn open_result_slots(&self) -> usize {
        self.results
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |results| results.open_slots())
    }
}

#[derive(Default)]
pub struct FakeLinker {
    pub stats: Arc<VmStats>,
    /// Auxiliary file the linked VM asks for
    pub memory_init: Option<String>,
    pub fail_startup: bool,
    pub home_status: i32,
}

impl FakeLinker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Linker for FakeLinker {
    type Instance = FakeVm;

    fn link(&self, payload: &[u8], context: ExecutionContext) -> Result<FakeVm, VmError> {
        if payload != b"VM" {
            return Err(VmError::Link(String::from("not a VM payload")));
        }
        *self.stats.results.lock().unwrap() = Some(Arc::clone(&context.results));
        let results = Arc::clone(&context.results);
        *self.stats.context.lock().unwrap() = Some(context);
        let fs = MemoryFileSystem::new();
        *self.stats.fs.lock().unwrap() = Some(fs.clone());
        Ok(FakeVm {
            fs,
            streams: None,
            results,
            memory: HashMap::new(),
            next_ptr: 0,
            handles: HashMap::new(),
            next_handle: 0,
            globals: HashMap::new(),
            pending_dependency: self.memory_init.clone(),
            fail_startup: self.fail_startup,
            home_status: self.home_status,
            stats: Arc::clone(&self.stats),
        })
    }
}

pub struct FakeVm {
    fs: MemoryFileSystem,
    streams: Option<Arc<StreamMultiplexer>>,
    results: Arc<ResultBridge>,
    memory: HashMap<u32, Vec<u8>>,
    next_ptr: u32,
    handles: HashMap<u32, Value>,
    next_handle: u32,
    globals: HashMap<String, Value>,
    pending_dependency: Option<String>,
    fail_startup: bool,
    home_status: i32,
    stats: Arc<VmStats>,
}

impl FakeVm {
    fn read_string(&self, ptr: VmPtr) -> String {
        let bytes = self.memory.get(&ptr.0).cloned().unwrap_or_default();
        let bytes = bytes.strip_suffix(&[0]).unwrap_or(&bytes[..]);
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn importable(&self, name: &str) -> bool {
        if BUILTINS.contains(&name) {
            return true;
        }
        let path = format!("{LIB_ROOT}/{}", name.replace('.', "/"));
        self.fs.is_file(Path::new(&format!("{path}.py")))
            || self.fs.is_file(Path::new(&format!("{path}/__init__.py")))
    }

    fn write_stdout(&self, text: &str) {
        if let Some(streams) = &self.streams {
            for byte in unescape(text).bytes() {
                streams.write_stdout(byte);
            }
        }
    }

    /// Runs one line; `false` is a guest error
    fn run_line(&mut self, line: &str) -> bool {
        if line.is_empty() || line.starts_with('#') {
            return true;
        }
        if let Some(rest) = line.strip_prefix("import ") {
            return rest.split(',').all(|name| self.importable(name.trim()));
        }
        if let Some(rest) = line.strip_prefix("from ") {
            return match rest.split_once(" import ") {
                Some((module, _)) => self.importable(module.trim()),
                None => false,
            };
        }
        if let Some(text) = quoted_arg(line, "print(") {
            self.write_stdout(&format!("{text}\n"));
            return true;
        }
        if let Some(text) = quoted_arg(line, "write(") {
            self.write_stdout(text);
            return true;
        }
        if let Some(rest) = line.strip_prefix("js.deliver(") {
            return self.deliver(rest);
        }
        if let Some(rest) = line.strip_prefix("globals()['") {
            return self.bind_handle(rest);
        }
        if let Some((name, value)) = line.split_once(" = ") {
            return match serde_json::from_str(value) {
                Ok(value) => {
                    self.globals.insert(name.trim().to_string(), value);
                    true
                }
                Err(_) => false,
            };
        }
        false
    }

    // js.deliver(<id>, js.convert(globals()['<name>']))
    fn deliver(&mut self, rest: &str) -> bool {
        let Some((id, rest)) = rest.split_once(", js.convert(globals()['") else {
            return false;
        };
        let Some(name) = rest.strip_suffix("']))") else {
            return false;
        };
        let (Ok(id), Some(value)) = (id.parse::<u64>(), self.globals.get(&unescape(name))) else {
            return false;
        };
        self.results.deliver(id, value.clone());
        true
    }

    // globals()['<name>'] = js.Value(<handle>)
    fn bind_handle(&mut self, rest: &str) -> bool {
        let Some((name, rest)) = rest.split_once("'] = js.Value(") else {
            return false;
        };
        let Some(Ok(handle)) = rest.strip_suffix(')').map(str::parse::<u32>) else {
            return false;
        };
        let Some(value) = self.handles.get(&handle).cloned() else {
            return false;
        };
        self.globals.insert(unescape(name), value);
        true
    }
}

fn quoted_arg<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?
        .strip_prefix('\'')?
        .strip_suffix("')")
}

fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

impl VmInstance for FakeVm {
    fn pending_dependency(&self) -> Option<String> {
        self.pending_dependency.clone()
    }

    fn fulfil_dependency(&mut self, contents: Vec<u8>) -> Result<(), VmError> {
        if contents != b"MEM" {
            return Err(VmError::MemoryInit(String::from("corrupt memory image")));
        }
        self.pending_dependency = None;
        Ok(())
    }

    fn init_filesystem(&mut self, streams: Arc<StreamMultiplexer>) -> Result<(), VmError> {
        self.streams = Some(streams);
        Ok(())
    }

    fn filesystem(&self) -> &dyn VirtualFileSystem {
        &self.fs
    }

    fn startup(&mut self) -> Result<(), VmError> {
        if self.fail_startup {
            return Err(VmError::Startup(String::from("abort()")));
        }
        Ok(())
    }

    fn setup_home(&mut self, path: VmPtr) -> i32 {
        let home = self.read_string(path);
        *self.stats.home.lock().unwrap() = Some(home);
        self.home_status
    }

    fn allocate(&mut self, bytes: &[u8]) -> Option<VmPtr> {
        if self.stats.fail_alloc.load(Ordering::SeqCst) {
            return None;
        }
        self.next_ptr += 16;
        self.memory.insert(self.next_ptr, bytes.to_vec());
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        Some(VmPtr(self.next_ptr))
    }

    fn free(&mut self, ptr: VmPtr) {
        if self.memory.remove(&ptr.0).is_some() {
            self.stats.frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn execute_source(&mut self, code: VmPtr) -> i32 {
        let source = self.read_string(code);
        self.stats.executed.lock().unwrap().push(source.clone());
        for line in source.lines() {
            if !self.run_line(line.trim()) {
                return 1;
            }
        }
        0
    }

    fn make_handle(&mut self, value: HostValue) -> Handle {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, value);
        self.stats.handles_made.fetch_add(1, Ordering::SeqCst);
        Handle(self.next_handle)
    }

    fn free_handle(&mut self, handle: Handle) {
        if self.handles.remove(&handle.0).is_some() {
            self.stats.handles_freed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Serves files from memory, counts fetches, yields once per fetch
pub struct CountingTransport {
    fs: MemoryFileSystem,
    inner: VfsTransport<MemoryFileSystem>,
    fetched: Mutex<Vec<String>>,
}

impl CountingTransport {
    pub fn new(files: &[(&str, &str)]) -> Arc<Self> {
        let fs = MemoryFileSystem::with_files(
            files
                .iter()
                .map(|(path, body)| (format!("/srv/{path}"), body.as_bytes().to_vec())),
        )
        .unwrap();
        Arc::new(Self {
            inner: VfsTransport::new(fs.clone(), "/srv"),
            fs,
            fetched: Mutex::new(Vec::new()),
        })
    }

    /// Payload, index and module files of the fixture registry
    pub fn standard() -> Arc<Self> {
        Self::new(&[
            ("pypy.vm.js", "VM"),
            ("modules/index.json", INDEX),
            ("modules/a/__init__.py", "from .sub import x"),
            ("modules/a/sub/__init__.py", "x = 1"),
            ("modules/b.py", "B = 1"),
            ("modules/c.py", "import b"),
            ("modules/d.py", "import c"),
            ("modules/site.py", "# fetched copy"),
        ])
    }

    /// Add or replace a served file
    pub fn put(&self, path: &str, body: &str) {
        let full = format!("/srv/{path}");
        if let Some((dir, _)) = full.rsplit_once('/') {
            self.fs.create_dir_all(Path::new(dir)).unwrap();
        }
        self.fs.write_file(Path::new(&full), body.as_bytes()).unwrap();
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

impl Transport for CountingTransport {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        self.fetched.lock().unwrap().push(path.to_string());
        tokio::task::yield_now().await;
        self.inner.fetch(path).await
    }
}

pub type TestInterpreter = Interpreter<FakeLinker, Arc<CountingTransport>>;

/// Interpreter over the standard fixture; returns the shared probes as well
pub fn interpreter(config: HostConfig) -> (TestInterpreter, Arc<VmStats>, Arc<CountingTransport>) {
    interpreter_with(config, FakeLinker::new(), CountingTransport::standard())
}

pub fn interpreter_with(
    config: HostConfig,
    linker: FakeLinker,
    transport: Arc<CountingTransport>,
) -> (TestInterpreter, Arc<VmStats>, Arc<CountingTransport>) {
    let stats = Arc::clone(&linker.stats);
    let interp = Interpreter::new(HostOptions::new(config), linker, Arc::clone(&transport));
    (interp, stats, transport)
}

/// Whether a file exists in the filesystem of the linked VM
pub fn installed(stats: &VmStats, path: &str) -> bool {
    stats
        .fs
        .lock()
        .unwrap()
        .as_ref()
        .is_some_and(|fs| fs.is_file(Path::new(path)))
}
