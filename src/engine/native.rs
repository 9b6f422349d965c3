//! Graph interpreter shipped as a shared library.
//!
//! The library exports a flat C ABI. Values cross the boundary as JSON
//! C strings; handles without a JSON form (textures, meshes, objects) never
//! reach native code. Every `unsafe` block and every `extern "C"` entry
//! point of the crate lives in this module.
//!
//! | symbol               | signature |
//! |----------------------|-----------|
//! | `bp_load`            | `(registry_json, graph_json) -> u64` (0 on failure) |
//! | `bp_execute`         | `(graph, run_key, inputs_json, user, *const HostCallbacks) -> i64` root scope, negative on failure |
//! | `bp_trigger`         | `(run_key, scope, node_id, pin) -> i64` child scope, `-1` for an unknown pin |
//! | `bp_finish`          | `(run_key, scope) -> i32` 0 on success |
//! | `bp_end_run`         | `(run_key)` optional |
//! | `bp_release`         | `(graph)` |
//! | `bp_iterate_inputs`  | `(graph, visitor, ctx)` |
//! | `bp_iterate_outputs` | `(graph, visitor, ctx)` |
//! | `bp_get_version`     | `(graph) -> *const c_char`, owned by the library |

use crate::engine::{EngineHost, GraphEngine, GraphHandle, NodeCall, PinDecl, ScopeId};
use crate::error::EngineError;
use crate::runtime::node::NodeRegistry;
use crate::runtime::scope::panic_message;
use crate::runtime::value::Value;
use dashmap::DashMap;
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Host entry points handed to `bp_execute`. `user` is the pointer passed
/// alongside them and identifies the run.
#[repr(C)]
pub struct HostCallbacks {
    pub scope_dispatched: extern "C" fn(user: *mut c_void, scope: u64),
    pub scope_completed: extern "C" fn(user: *mut c_void, scope: u64),
    pub invoke_node: extern "C" fn(
        user: *mut c_void,
        scope: u64,
        node_id: *const c_char,
        kind: *const c_char,
        params_json: *const c_char,
    ),
    pub bind_input: extern "C" fn(user: *mut c_void, node_id: *const c_char, pin: *const c_char, value_json: *const c_char),
    /// Writes the NUL-terminated JSON of an output into `out`. Returns its
    /// length without the terminator, or `-1` if unbound. Nothing is written
    /// when the length does not fit in `capacity`.
    pub read_output: extern "C" fn(
        user: *mut c_void,
        node_id: *const c_char,
        pin: *const c_char,
        out: *mut c_char,
        capacity: usize,
    ) -> isize,
}

static CALLBACKS: HostCallbacks = HostCallbacks {
    scope_dispatched: host_scope_dispatched,
    scope_completed: host_scope_completed,
    invoke_node: host_invoke_node,
    bind_input: host_bind_input,
    read_output: host_read_output,
};

type PinVisitor = extern "C" fn(ctx: *mut c_void, name: *const c_char, kind: *const c_char);

type FnLoad = unsafe extern "C" fn(*const c_char, *const c_char) -> u64;
type FnExecute = unsafe extern "C" fn(u64, *const c_char, *const c_char, *mut c_void, *const HostCallbacks) -> i64;
type FnTrigger = unsafe extern "C" fn(*const c_char, u64, *const c_char, *const c_char) -> i64;
type FnFinish = unsafe extern "C" fn(*const c_char, u64) -> i32;
type FnEndRun = unsafe extern "C" fn(*const c_char);
type FnRelease = unsafe extern "C" fn(u64);
type FnIterate = unsafe extern "C" fn(u64, PinVisitor, *mut c_void);
type FnGetVersion = unsafe extern "C" fn(u64) -> *const c_char;

struct Symbols {
    load: FnLoad,
    execute: FnExecute,
    trigger: FnTrigger,
    finish: FnFinish,
    end_run: Option<FnEndRun>,
    release: FnRelease,
    iterate_inputs: FnIterate,
    iterate_outputs: FnIterate,
    get_version: FnGetVersion,
}

struct HostSlot {
    host: Arc<dyn EngineHost>,
}

/// 原生解释器 (Native Engine)
/// [`GraphEngine`] backed by a dynamically loaded interpreter library.
pub struct NativeEngine {
    symbols: Symbols,
    // Boxed so the pointer handed to native code stays put.
    runs: DashMap<Uuid, Box<HostSlot>>,
    // Keeps the function pointers above valid; dropped last.
    _library: Library,
}

impl NativeEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initialisers; the caller chose
        // to trust this library.
        let library = unsafe { Library::new(path)? };

        // SAFETY: the types above are the library's documented ABI. The
        // copied pointers stay valid while `_library` is alive.
        let symbols = unsafe {
            Symbols {
                load: *library.get::<FnLoad>(b"bp_load\0")?,
                execute: *library.get::<FnExecute>(b"bp_execute\0")?,
                trigger: *library.get::<FnTrigger>(b"bp_trigger\0")?,
                finish: *library.get::<FnFinish>(b"bp_finish\0")?,
                end_run: library.get::<FnEndRun>(b"bp_end_run\0").ok().map(|f| *f),
                release: *library.get::<FnRelease>(b"bp_release\0")?,
                iterate_inputs: *library.get::<FnIterate>(b"bp_iterate_inputs\0")?,
                iterate_outputs: *library.get::<FnIterate>(b"bp_iterate_outputs\0")?,
                get_version: *library.get::<FnGetVersion>(b"bp_get_version\0")?,
            }
        };

        info!(path = %path.display(), "Native graph engine loaded");
        Ok(Self {
            symbols,
            runs: DashMap::new(),
            _library: library,
        })
    }

    fn pins(&self, iterate: FnIterate, graph: GraphHandle) -> Vec<PinDecl> {
        let mut pins: Vec<PinDecl> = Vec::new();
        // SAFETY: `collect_pin` only runs during this call and `pins`
        // outlives it.
        unsafe { iterate(graph.0, collect_pin, (&mut pins as *mut Vec<PinDecl>).cast()) };
        pins
    }
}

fn c_string(call: &'static str, s: &str) -> Result<CString, EngineError> {
    CString::new(s).map_err(|e| EngineError::Native {
        call,
        reason: e.to_string(),
    })
}

fn run_key(call: &'static str, instance: Uuid) -> Result<CString, EngineError> {
    c_string(call, &instance.to_string())
}

/// Values without a JSON form are left out.
fn inputs_json(inputs: &HashMap<String, Value>) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in inputs {
        match value.to_json() {
            Some(json) => {
                map.insert(name.clone(), json);
            }
            None => warn!(input = %name, kind = value.kind(), "Input cannot cross to the native engine"),
        }
    }
    serde_json::Value::Object(map).to_string()
}

impl GraphEngine for NativeEngine {
    fn load(&self, registry: &NodeRegistry, json: &str) -> Result<GraphHandle, EngineError> {
        let kinds = serde_json::to_string(&registry.kinds()).map_err(|e| EngineError::Load(e.to_string()))?;
        let kinds = c_string("bp_load", &kinds)?;
        let json = c_string("bp_load", json)?;
        // SAFETY: both strings are valid for the duration of the call.
        let handle = unsafe { (self.symbols.load)(kinds.as_ptr(), json.as_ptr()) };
        if handle == 0 {
            return Err(EngineError::Load("native engine rejected the graph".to_string()));
        }
        debug!(handle, "Native graph loaded");
        Ok(GraphHandle(handle))
    }

    fn execute(
        &self,
        graph: GraphHandle,
        instance: Uuid,
        inputs: &HashMap<String, Value>,
        host: Arc<dyn EngineHost>,
    ) -> Result<ScopeId, EngineError> {
        let key = run_key("bp_execute", instance)?;
        let inputs = c_string("bp_execute", &inputs_json(inputs))?;

        let slot = Box::new(HostSlot { host });
        let user = (&*slot as *const HostSlot).cast_mut().cast::<c_void>();
        // Registered first: callbacks may arrive before bp_execute returns.
        self.runs.insert(instance, slot);

        // SAFETY: `user` points into a box owned by `runs` until `end_run`,
        // and `CALLBACKS` is static.
        let root = unsafe { (self.symbols.execute)(graph.0, key.as_ptr(), inputs.as_ptr(), user, &CALLBACKS) };
        if root < 0 {
            self.runs.remove(&instance);
            return Err(EngineError::Native {
                call: "bp_execute",
                reason: format!("returned {root}"),
            });
        }
        Ok(root as ScopeId)
    }

    fn trigger(&self, instance: Uuid, scope: ScopeId, node_id: &str, pin: &str) -> Result<ScopeId, EngineError> {
        let key = run_key("bp_trigger", instance)?;
        let node = c_string("bp_trigger", node_id)?;
        let pin_c = c_string("bp_trigger", pin)?;
        // SAFETY: all strings outlive the call.
        let child = unsafe { (self.symbols.trigger)(key.as_ptr(), scope, node.as_ptr(), pin_c.as_ptr()) };
        match child {
            -1 => Err(EngineError::UnknownPin {
                node: node_id.to_string(),
                pin: pin.to_string(),
            }),
            c if c < 0 => Err(EngineError::Native {
                call: "bp_trigger",
                reason: format!("returned {c}"),
            }),
            c => Ok(c as ScopeId),
        }
    }

    fn finish_node(&self, instance: Uuid, scope: ScopeId) -> Result<(), EngineError> {
        let key = run_key("bp_finish", instance)?;
        // SAFETY: `key` outlives the call.
        let status = unsafe { (self.symbols.finish)(key.as_ptr(), scope) };
        if status != 0 {
            return Err(EngineError::Native {
                call: "bp_finish",
                reason: format!("returned {status} for scope {scope}"),
            });
        }
        Ok(())
    }

    fn end_run(&self, instance: Uuid) {
        if let (Some(end_run), Ok(key)) = (self.symbols.end_run, run_key("bp_end_run", instance)) {
            // SAFETY: `key` outlives the call.
            unsafe { end_run(key.as_ptr()) };
        }
        // The library no longer calls back for this run.
        self.runs.remove(&instance);
    }

    fn release(&self, graph: GraphHandle) {
        // SAFETY: plain integer handle.
        unsafe { (self.symbols.release)(graph.0) };
    }

    fn inputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.pins(self.symbols.iterate_inputs, graph)
    }

    fn outputs(&self, graph: GraphHandle) -> Vec<PinDecl> {
        self.pins(self.symbols.iterate_outputs, graph)
    }

    fn version(&self, graph: GraphHandle) -> Option<String> {
        // SAFETY: the returned string is owned by the library and valid
        // until the graph is released.
        unsafe {
            let ptr = (self.symbols.get_version)(graph.0);
            (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        if !self.runs.is_empty() {
            warn!(runs = self.runs.len(), "Native engine dropped with active runs");
        }
    }
}

// --- Trampolines ---
//
// Everything below is called from foreign code and must not unwind.

/// # Safety
/// `ptr` is null or a valid NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn with_host(user: *mut c_void, callback: &'static str, f: impl FnOnce(&dyn EngineHost)) {
    if user.is_null() {
        error!(callback, "Native engine passed a null run pointer");
        return;
    }
    // SAFETY: `user` is the slot pointer handed out by `execute`, alive
    // until `end_run`.
    let slot = unsafe { &*user.cast::<HostSlot>() };
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(slot.host.as_ref()))) {
        error!(callback, panic = %panic_message(&*panic), "Host callback panicked");
    }
}

extern "C" fn host_scope_dispatched(user: *mut c_void, scope: u64) {
    with_host(user, "scope_dispatched", |host| host.scope_dispatched(scope));
}

extern "C" fn host_scope_completed(user: *mut c_void, scope: u64) {
    with_host(user, "scope_completed", |host| host.scope_completed(scope));
}

extern "C" fn host_invoke_node(
    user: *mut c_void,
    scope: u64,
    node_id: *const c_char,
    kind: *const c_char,
    params_json: *const c_char,
) {
    with_host(user, "invoke_node", |host| {
        // SAFETY: string arguments follow the callback contract.
        let (node_id, kind, params) = unsafe { (str_arg(node_id), str_arg(kind), str_arg(params_json)) };
        let (Some(node_id), Some(kind)) = (node_id, kind) else {
            error!(scope, "invoke_node without a node id or kind");
            return;
        };
        let params = params
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or(serde_json::Value::Null);
        host.invoke_node(NodeCall {
            scope,
            node_id: node_id.to_string(),
            kind: kind.to_string(),
            params,
        });
    });
}

extern "C" fn host_bind_input(user: *mut c_void, node_id: *const c_char, pin: *const c_char, value_json: *const c_char) {
    with_host(user, "bind_input", |host| {
        // SAFETY: string arguments follow the callback contract.
        let (node_id, pin, value) = unsafe { (str_arg(node_id), str_arg(pin), str_arg(value_json)) };
        let (Some(node_id), Some(pin)) = (node_id, pin) else {
            error!("bind_input without a node id or pin");
            return;
        };
        match value.map(serde_json::from_str::<serde_json::Value>) {
            Some(Ok(json)) => host.bind_input(node_id, pin, Value::from_json(json)),
            _ => warn!(node = node_id, pin, "bind_input with a value that is not JSON"),
        }
    });
}

extern "C" fn host_read_output(
    user: *mut c_void,
    node_id: *const c_char,
    pin: *const c_char,
    out: *mut c_char,
    capacity: usize,
) -> isize {
    let mut written = -1;
    with_host(user, "read_output", |host| {
        // SAFETY: string arguments follow the callback contract.
        let (Some(node_id), Some(pin)) = (unsafe { str_arg(node_id) }, unsafe { str_arg(pin) }) else {
            return;
        };
        let Some(json) = host.read_output(node_id, pin).and_then(|v| v.to_json()) else {
            return;
        };
        let bytes = json.to_string().into_bytes();
        written = bytes.len() as isize;
        if !out.is_null() && bytes.len() < capacity {
            // SAFETY: `out` has room for `capacity` bytes and we write
            // `len + 1 <= capacity`.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), out, bytes.len());
                *out.add(bytes.len()) = 0;
            }
        }
    });
    written
}

extern "C" fn collect_pin(ctx: *mut c_void, name: *const c_char, kind: *const c_char) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        if ctx.is_null() {
            return;
        }
        // SAFETY: `ctx` is the `Vec<PinDecl>` passed by `NativeEngine::pins`.
        let pins = unsafe { &mut *ctx.cast::<Vec<PinDecl>>() };
        // SAFETY: string arguments follow the visitor contract.
        let (name, kind) = unsafe { (str_arg(name), str_arg(kind)) };
        if let Some(name) = name {
            pins.push(PinDecl {
                name: name.to_string(),
                kind: kind.unwrap_or("any").to_string(),
            });
        }
    }));
    if result.is_err() {
        error!("Pin visitor panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        panic_on_complete: bool,
        completed: Mutex<Vec<ScopeId>>,
    }

    impl EngineHost for RecordingHost {
        fn scope_dispatched(&self, _scope: ScopeId) {}

        fn scope_completed(&self, scope: ScopeId) {
            if self.panic_on_complete {
                panic!("host gave up on scope {scope}");
            }
            self.completed.lock().unwrap().push(scope);
        }

        fn invoke_node(&self, _call: NodeCall) {}

        fn bind_input(&self, _node_id: &str, _pin: &str, _value: Value) {}

        fn read_output(&self, node_id: &str, pin: &str) -> Option<Value> {
            (node_id == "n" && pin == "p").then(|| Value::from("skin"))
        }
    }

    fn slot(host: Arc<RecordingHost>) -> Box<HostSlot> {
        Box::new(HostSlot { host })
    }

    fn user(slot: &HostSlot) -> *mut c_void {
        (slot as *const HostSlot).cast_mut().cast()
    }

    #[test]
    fn test_scope_completed_reaches_host() {
        let host = Arc::new(RecordingHost::default());
        let slot = slot(host.clone());

        host_scope_completed(user(&slot), 4);
        host_scope_completed(ptr::null_mut(), 5);

        assert_eq!(*host.completed.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_panicking_host_does_not_unwind_into_caller() {
        let host = Arc::new(RecordingHost {
            panic_on_complete: true,
            ..Default::default()
        });
        let slot = slot(host.clone());

        host_scope_completed(user(&slot), 7);

        assert!(host.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_read_output_respects_capacity() {
        let slot = slot(Arc::new(RecordingHost::default()));
        let json_len = "\"skin\"".len() as isize;

        // Exactly the JSON length leaves no room for the NUL.
        let mut small = [b'x' as c_char; 6];
        let written = host_read_output(user(&slot), c"n".as_ptr(), c"p".as_ptr(), small.as_mut_ptr(), small.len());
        assert_eq!(written, json_len);
        assert!(small.iter().all(|&c| c == b'x' as c_char));

        let mut fits = [b'x' as c_char; 16];
        let written = host_read_output(user(&slot), c"n".as_ptr(), c"p".as_ptr(), fits.as_mut_ptr(), fits.len());
        assert_eq!(written, json_len);
        assert_eq!(fits[6], 0);
        // SAFETY: the buffer was NUL-terminated above.
        let text = unsafe { CStr::from_ptr(fits.as_ptr()) };
        assert_eq!(text.to_str(), Ok("\"skin\""));

        // Length only, for sizing a buffer.
        let written = host_read_output(user(&slot), c"n".as_ptr(), c"p".as_ptr(), ptr::null_mut(), 0);
        assert_eq!(written, json_len);
    }

    #[test]
    fn test_read_output_unbound_or_detached() {
        let slot = slot(Arc::new(RecordingHost::default()));
        let mut out = [0 as c_char; 16];

        let unbound = host_read_output(user(&slot), c"n".as_ptr(), c"other".as_ptr(), out.as_mut_ptr(), out.len());
        assert_eq!(unbound, -1);

        let no_pin = host_read_output(user(&slot), c"n".as_ptr(), ptr::null(), out.as_mut_ptr(), out.len());
        assert_eq!(no_pin, -1);

        let detached = host_read_output(ptr::null_mut(), c"n".as_ptr(), c"p".as_ptr(), out.as_mut_ptr(), out.len());
        assert_eq!(detached, -1);
    }

    #[test]
    fn test_collect_pin_skips_null_arguments() {
        collect_pin(ptr::null_mut(), c"skin".as_ptr(), ptr::null());

        let mut pins: Vec<PinDecl> = Vec::new();
        let ctx = (&mut pins as *mut Vec<PinDecl>).cast::<c_void>();
        collect_pin(ctx, ptr::null(), c"string".as_ptr());
        collect_pin(ctx, c"skin".as_ptr(), ptr::null());
        collect_pin(ctx, c"tint".as_ptr(), c"color".as_ptr());

        let got: Vec<(&str, &str)> = pins.iter().map(|p| (p.name.as_str(), p.kind.as_str())).collect();
        assert_eq!(got, vec![("skin", "any"), ("tint", "color")]);
    }
}
