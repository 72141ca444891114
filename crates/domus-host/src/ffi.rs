//! C ABI.
//!
//! ```c
//! typedef void (*domus_tick_fn)(void *driver);
//! typedef void (*domus_set_tick_fn)(domus_tick_fn tick, void *driver);
//! typedef void (*domus_enum_fn)(const char *name, void *user_data);
//!
//! domus_host *domus_host_new(void);
//! void        domus_host_free(domus_host *host);
//! bool        domus_register_tick_sink(const domus_host *host, domus_set_tick_fn set_tick);
//! uint32_t    domus_enum_contexts(const domus_host *host, domus_enum_fn callback, void *user_data);
//! bool        domus_create(const domus_host *host, const char *name, const char *module, const char *parameters);
//! bool        domus_is_active(const domus_host *host, const char *name);
//! bool        domus_unload(const domus_host *host, const char *name);
//! bool        domus_tick(const domus_host *host);
//! ```
//!
//! Strings are NUL-terminated UTF-8. A null or non-UTF-8 argument makes the
//! call return `false` (or `0`). Panics are caught at every entry point.
//!
//! The `driver` pointer handed to `set_tick` stays valid until
//! `domus_host_free`; calling `tick` after that is undefined behavior.

use std::ffi::{CStr, CString, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use libc::c_char;

use domus_core::{LoaderConfig, TracingEcho};

use crate::{HostBridge, TickDriver, TickSink};

/// Per-drive-event tick callback handed to the host.
pub type DomusTickFn = unsafe extern "C" fn(driver: *mut c_void);
/// Host function receiving the tick callback and its driver pointer.
pub type DomusSetTickFn = unsafe extern "C" fn(tick: DomusTickFn, driver: *mut c_void);
/// Enumeration callback.
pub type DomusEnumFn = unsafe extern "C" fn(name: *const c_char, user_data: *mut c_void);

fn guarded<T>(entry: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("panic caught at {}", entry);
            fallback
        }
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // Safety: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

struct ForeignTickSink {
    set_tick: DomusSetTickFn,
}

impl TickSink for ForeignTickSink {
    fn attach(&self, driver: &TickDriver) {
        let driver = driver as *const TickDriver as *mut c_void;
        // Safety: `set_tick` is a host function taking these arguments.
        unsafe { (self.set_tick)(tick_trampoline, driver) };
    }
}

unsafe extern "C" fn tick_trampoline(driver: *mut c_void) {
    guarded("tick", (), || {
        // Safety: `driver` came from `ForeignTickSink::attach` and the host
        // has not freed the bridge that owns it.
        if let Some(driver) = unsafe { (driver as *const TickDriver).as_ref() } {
            driver.tick();
        }
    })
}

/// Create a bridge loading native modules from the default module
/// directories. Free it with [`domus_host_free`].
#[unsafe(no_mangle)]
pub extern "C" fn domus_host_new() -> *mut HostBridge {
    guarded("domus_host_new", std::ptr::null_mut(), || {
        let bridge = HostBridge::from_config(&LoaderConfig::from_env(), Arc::new(TracingEcho));
        Box::into_raw(Box::new(bridge))
    })
}

/// Free a bridge, unloading every live context.
///
/// # Safety
///
/// `host` must be null or a pointer from [`domus_host_new`] not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_host_free(host: *mut HostBridge) {
    if host.is_null() {
        return;
    }
    guarded("domus_host_free", (), || {
        // Safety: allocated by `domus_host_new` via `Box::into_raw`.
        drop(unsafe { Box::from_raw(host) });
    })
}

/// # Safety
///
/// `host` must be null or a live bridge pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_register_tick_sink(
    host: *const HostBridge,
    set_tick: Option<DomusSetTickFn>,
) -> bool {
    guarded("domus_register_tick_sink", false, || {
        // Safety: null or live per the contract above.
        let (Some(bridge), Some(set_tick)) = (unsafe { host.as_ref() }, set_tick) else {
            return false;
        };
        bridge.register_tick_sink(&ForeignTickSink { set_tick });
        true
    })
}

/// Call `callback` once per live context. Returns the number of callbacks
/// made; a name with an interior NUL cannot cross the boundary and is skipped.
///
/// # Safety
///
/// `host` must be null or a live bridge pointer. `user_data` is passed
/// through untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_enum_contexts(
    host: *const HostBridge,
    callback: Option<DomusEnumFn>,
    user_data: *mut c_void,
) -> u32 {
    guarded("domus_enum_contexts", 0, || {
        // Safety: null or live per the contract above.
        let (Some(bridge), Some(callback)) = (unsafe { host.as_ref() }, callback) else {
            return 0;
        };
        let mut delivered = 0u32;
        bridge.enumerate_contexts(
            &mut |name: &str, data: &*mut c_void| match CString::new(name) {
                Ok(name) => {
                    // Safety: host callback; `name` lives for the call.
                    unsafe { callback(name.as_ptr(), *data) };
                    delivered = delivered.saturating_add(1);
                }
                Err(_) => {
                    tracing::warn!("context name {:?} has an interior NUL; not enumerated", name)
                }
            },
            &user_data,
        );
        delivered
    })
}

/// # Safety
///
/// `host` must be null or a live bridge pointer; string arguments must be
/// null or NUL-terminated. A null `parameters` means no parameters.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_create(
    host: *const HostBridge,
    name: *const c_char,
    module: *const c_char,
    parameters: *const c_char,
) -> bool {
    guarded("domus_create", false, || {
        // Safety: pointers are null or valid per the contract above.
        let (Some(bridge), Some(name), Some(module)) =
            (unsafe { (host.as_ref(), str_arg(name), str_arg(module)) })
        else {
            return false;
        };
        let parameters = if parameters.is_null() {
            ""
        } else {
            // Safety: non-null and NUL-terminated.
            match unsafe { str_arg(parameters) } {
                Some(parameters) => parameters,
                None => return false,
            }
        };
        bridge.create(name, module, parameters)
    })
}

/// # Safety
///
/// `host` must be null or a live bridge pointer; `name` null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_is_active(host: *const HostBridge, name: *const c_char) -> bool {
    guarded("domus_is_active", false, || {
        // Safety: null or valid per the contract above.
        match unsafe { (host.as_ref(), str_arg(name)) } {
            (Some(bridge), Some(name)) => bridge.is_active(name),
            _ => false,
        }
    })
}

/// # Safety
///
/// `host` must be null or a live bridge pointer; `name` null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_unload(host: *const HostBridge, name: *const c_char) -> bool {
    guarded("domus_unload", false, || {
        // Safety: null or valid per the contract above.
        match unsafe { (host.as_ref(), str_arg(name)) } {
            (Some(bridge), Some(name)) => bridge.unload(name),
            _ => false,
        }
    })
}

/// Broadcast one tick directly, without a registered sink.
///
/// # Safety
///
/// `host` must be null or a live bridge pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_tick(host: *const HostBridge) -> bool {
    guarded("domus_tick", false, || {
        // Safety: null or live per the contract above.
        match unsafe { host.as_ref() } {
            Some(bridge) => {
                bridge.tick();
                true
            }
            None => false,
        }
    })
}
