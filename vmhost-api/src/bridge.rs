//! Execution bridge
//!
//! Text goes into VM memory as a NUL-terminated copy held by a [`VmBuffer`],
//! which frees it when dropped. Variable exchange is built from generated
//! snippets run through the same path.

use crate::error::{HostError, MarshalError};
use crate::types::ExecStatus;
use std::ffi::CString;
use std::sync::Arc;
use vmhost_core::{HostValue, ResultBridge, VmInstance, VmPtr};

/// NUL-terminated text in VM linear memory, freed on drop
pub(crate) struct VmBuffer<'a, I: VmInstance + ?Sized> {
    vm: &'a mut I,
    ptr: VmPtr,
}

impl<'a, I: VmInstance + ?Sized> VmBuffer<'a, I> {
    pub(crate) fn allocate(vm: &'a mut I, text: &str) -> Result<Self, MarshalError> {
        let text = CString::new(text).map_err(|err| MarshalError::InteriorNul(err.nul_position()))?;
        let bytes = text.as_bytes_with_nul();
        let ptr = vm
            .allocate(bytes)
            .ok_or(MarshalError::Allocation(bytes.len()))?;
        Ok(Self { vm, ptr })
    }

    pub(crate) fn execute(&mut self) -> i32 {
        self.vm.execute_source(self.ptr)
    }

    pub(crate) fn setup_home(&mut self) -> i32 {
        self.vm.setup_home(self.ptr)
    }
}

impl<I: VmInstance + ?Sized> Drop for VmBuffer<'_, I> {
    fn drop(&mut self) {
        self.vm.free(self.ptr);
    }
}

/// Escape a variable name for a single-quoted guest string literal
pub(crate) fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Run `code`; a guest error is a failed status, not an `Err`.
pub(crate) fn execute<I: VmInstance + ?Sized>(vm: &mut I, code: &str) -> Result<ExecStatus, HostError> {
    let status = VmBuffer::allocate(vm, code)?.execute();
    Ok(ExecStatus::from_code(status))
}

pub(crate) fn get_snippet(bridge_module: &str, id: u64, name: &str) -> String {
    format!(
        "{bridge_module}.deliver({id}, {bridge_module}.convert(globals()['{}']))",
        escape_name(name)
    )
}

pub(crate) fn set_snippet(bridge_module: &str, handle: vmhost_core::Handle, name: &str) -> String {
    format!(
        "globals()['{}'] = {bridge_module}.Value({handle})",
        escape_name(name)
    )
}

/// Read a guest global through the result bridge
pub(crate) fn get<I: VmInstance + ?Sized>(
    vm: &mut I,
    results: &Arc<ResultBridge>,
    bridge_module: &str,
    name: &str,
) -> Result<HostValue, HostError> {
    let mut pending = results.open();
    let code = get_snippet(bridge_module, pending.id(), name);

    let status = VmBuffer::allocate(vm, &code)?.execute();
    if status != 0 {
        return Err(HostError::Execution { status });
    }
    pending
        .take()
        .ok_or_else(|| HostError::MissingResult(name.to_string()))
}

/// Bind a guest global to a host value through a handle
pub(crate) fn set<I: VmInstance + ?Sized>(
    vm: &mut I,
    bridge_module: &str,
    name: &str,
    value: HostValue,
) -> Result<(), HostError> {
    let handle = vm.make_handle(value);
    let code = set_snippet(bridge_module, handle, name);

    let allocated = VmBuffer::allocate(&mut *vm, &code).map(|mut buffer| buffer.execute());
    let status = match allocated {
        Ok(status) => status,
        Err(err) => {
            vm.free_handle(handle);
            return Err(err.into());
        }
    };
    if status != 0 {
        vm.free_handle(handle);
        return Err(HostError::Execution { status });
    }
    Ok(())
}
