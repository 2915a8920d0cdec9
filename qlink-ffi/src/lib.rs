// C FFI bindings for the Qontrol link
// Provides a C-compatible interface for hosts that embed the link manager

use libc::size_t;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::{Arc, Mutex};

use qlink_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use qlink_core::{
    ConnectionManager, ConnectionState, LinkConfig, LinkError, PeerAddress, TcpTransport,
};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Invoked with each lifecycle event serialized as JSON. The string is only
/// valid for the duration of the call.
pub type QlinkEventCallback = extern "C" fn(event_json: *const c_char, user_data: *mut c_void);

pub const QLINK_STATE_IDLE: c_int = 0;
pub const QLINK_STATE_CONNECTING: c_int = 1;
pub const QLINK_STATE_CONNECTED: c_int = 2;

/// Opaque handle owning a manager and the runtime its workers run on
pub struct QlinkManager {
    manager: ConnectionManager,
    runtime: Arc<Runtime>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

/// Error structure for C FFI
#[repr(C)]
pub struct QlinkErrorFfi {
    pub code: c_int,
    pub message: *mut c_char,
}

/// Result type for FFI functions
#[repr(C)]
pub struct QlinkResult {
    pub success: c_int, // 1 for success, 0 for failure
    pub error: *mut QlinkErrorFfi,
}

impl QlinkResult {
    fn ok() -> Self {
        QlinkResult {
            success: 1,
            error: ptr::null_mut(),
        }
    }

    fn err(error: LinkError) -> Self {
        QlinkResult {
            success: 0,
            error: create_error(error),
        }
    }
}

struct UserData(*mut c_void);

// The host promises `user_data` may be used from the callback thread
unsafe impl Send for UserData {}

fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn from_c_string(s: *const c_char) -> Result<String, LinkError> {
    if s.is_null() {
        return Err(LinkError::invalid_address("null string"));
    }

    CStr::from_ptr(s)
        .to_str()
        .map(str::to_string)
        .map_err(|_| LinkError::invalid_address("string is not valid UTF-8"))
}

fn create_error(err: LinkError) -> *mut QlinkErrorFfi {
    let error = Box::new(QlinkErrorFfi {
        code: err.code(),
        message: to_c_string(&err.to_string()),
    });

    Box::into_raw(error)
}

fn state_code(state: ConnectionState) -> c_int {
    match state {
        ConnectionState::Idle => QLINK_STATE_IDLE,
        ConnectionState::Connecting => QLINK_STATE_CONNECTING,
        ConnectionState::Connected => QLINK_STATE_CONNECTED,
    }
}

/// Get library version
#[no_mangle]
pub extern "C" fn qlink_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

/// Install the global log subscriber. `level` may be null for "info".
/// Returns 1 when installed, 0 when one was already present or `level` is
/// not recognised.
#[no_mangle]
pub extern "C" fn qlink_init_logging(level: *const c_char, json: c_int) -> c_int {
    let level = if level.is_null() {
        LogLevel::Info
    } else {
        match unsafe { from_c_string(level) }.as_deref() {
            Ok("trace") => LogLevel::Trace,
            Ok("debug") => LogLevel::Debug,
            Ok("info") => LogLevel::Info,
            Ok("warn") => LogLevel::Warn,
            Ok("error") => LogLevel::Error,
            _ => return 0,
        }
    };
    let format = if json != 0 {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };

    let config = LogConfig::builder().level(level).format(format).build();
    init_logging(config) as c_int
}

/// Create a manager over TCP. `config_json` may be null for defaults.
/// Returns null on a malformed config or when no runtime could be started.
#[no_mangle]
pub extern "C" fn qlink_manager_new(config_json: *const c_char) -> *mut QlinkManager {
    let config = if config_json.is_null() {
        LinkConfig::default()
    } else {
        match unsafe { from_c_string(config_json) }.and_then(|json| LinkConfig::from_json(&json)) {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected manager config: {}", e);
                return ptr::null_mut();
            }
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("qlink-worker")
        .build()
    {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            warn!("Failed to start runtime: {}", e);
            return ptr::null_mut();
        }
    };

    let manager = match ConnectionManager::with_runtime(
        Arc::new(TcpTransport::new()),
        config,
        runtime.handle().clone(),
    ) {
        Ok(manager) => manager,
        Err(e) => {
            warn!("Failed to create manager: {}", e);
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(QlinkManager {
        manager,
        runtime,
        event_pump: Mutex::new(None),
    }))
}

/// Free a manager, closing any session it holds.
///
/// Safe to call from inside the event callback: the runtime cannot be shut
/// down from one of its own threads, so there the teardown moves to a
/// short-lived thread of its own.
#[no_mangle]
pub extern "C" fn qlink_manager_free(manager: *mut QlinkManager) {
    if manager.is_null() {
        return;
    }

    let handle = unsafe { Box::from_raw(manager) };
    if let Ok(mut pump) = handle.event_pump.lock() {
        if let Some(task) = pump.take() {
            task.abort();
        }
    }

    if tokio::runtime::Handle::try_current().is_ok() {
        debug!("Manager freed on a runtime thread, tearing down off-thread");
        std::thread::spawn(move || drop(handle));
    } else {
        drop(handle);
    }
}

/// Connect to `address` ("host:port"). `name` may be null.
#[no_mangle]
pub extern "C" fn qlink_connect(
    manager: *mut QlinkManager,
    address: *const c_char,
    name: *const c_char,
) -> QlinkResult {
    if manager.is_null() {
        return QlinkResult::err(LinkError::internal("null manager"));
    }

    unsafe {
        let handle = &*manager;

        let address = match from_c_string(address) {
            Ok(address) => address,
            Err(e) => return QlinkResult::err(e),
        };
        let peer = if name.is_null() {
            PeerAddress::new(address)
        } else {
            match from_c_string(name) {
                Ok(name) => PeerAddress::with_name(address, name),
                Err(e) => return QlinkResult::err(e),
            }
        };

        handle.manager.connect(peer);
        QlinkResult::ok()
    }
}

/// Cancel any attempt and close any session
#[no_mangle]
pub extern "C" fn qlink_stop(manager: *mut QlinkManager) {
    if !manager.is_null() {
        unsafe {
            (*manager).manager.stop();
        }
    }
}

/// Current state as one of the `QLINK_STATE_*` constants, or -1 for a null handle
#[no_mangle]
pub extern "C" fn qlink_state(manager: *const QlinkManager) -> c_int {
    if manager.is_null() {
        return -1;
    }

    unsafe { state_code((*manager).manager.state()) }
}

/// Write `len` bytes to the live session, blocking until the write completes.
/// Must not be called from inside the event callback.
#[no_mangle]
pub extern "C" fn qlink_write(
    manager: *mut QlinkManager,
    data: *const u8,
    len: size_t,
) -> QlinkResult {
    if manager.is_null() {
        return QlinkResult::err(LinkError::internal("null manager"));
    }
    if data.is_null() && len > 0 {
        return QlinkResult::err(LinkError::write("null data"));
    }

    unsafe {
        let handle = &*manager;
        let bytes = if len == 0 {
            &[][..]
        } else {
            slice::from_raw_parts(data, len)
        };

        match handle.runtime.block_on(handle.manager.write(bytes)) {
            Ok(_) => QlinkResult::ok(),
            Err(e) => QlinkResult::err(e),
        }
    }
}

/// Deliver lifecycle events to `callback` from a dedicated task. Replaces
/// any previous callback; a null callback just removes it.
#[no_mangle]
pub extern "C" fn qlink_set_event_callback(
    manager: *mut QlinkManager,
    callback: Option<QlinkEventCallback>,
    user_data: *mut c_void,
) -> QlinkResult {
    if manager.is_null() {
        return QlinkResult::err(LinkError::internal("null manager"));
    }

    let handle = unsafe { &*manager };
    let mut pump = match handle.event_pump.lock() {
        Ok(pump) => pump,
        Err(_) => return QlinkResult::err(LinkError::internal("event pump lock poisoned")),
    };

    if let Some(previous) = pump.take() {
        previous.abort();
    }

    let callback = match callback {
        Some(callback) => callback,
        None => return QlinkResult::ok(),
    };

    let mut events = handle.manager.subscribe();
    let user_data = UserData(user_data);
    *pump = Some(handle.runtime.spawn(async move {
        let user_data = user_data;
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            match CString::new(json) {
                Ok(json) => callback(json.as_ptr(), user_data.0),
                Err(e) => debug!("Event JSON contained a nul byte: {}", e),
            }
        }
    }));

    QlinkResult::ok()
}

/// Link counters as JSON. Free with `qlink_string_free`.
#[no_mangle]
pub extern "C" fn qlink_stats_json(manager: *const QlinkManager) -> *mut c_char {
    if manager.is_null() {
        return ptr::null_mut();
    }

    let stats = unsafe { (*manager).manager.stats() };
    match serde_json::to_string(&stats) {
        Ok(json) => to_c_string(&json),
        Err(_) => ptr::null_mut(),
    }
}

/// Free an error structure
#[no_mangle]
pub extern "C" fn qlink_error_free(error: *mut QlinkErrorFfi) {
    if !error.is_null() {
        unsafe {
            let error = Box::from_raw(error);
            if !error.message.is_null() {
                let _ = CString::from_raw(error.message);
            }
        }
    }
}

/// Free a C string
#[no_mangle]
pub extern "C" fn qlink_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
