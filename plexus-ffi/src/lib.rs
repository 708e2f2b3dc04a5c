// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! C bindings for the Plexus telemetry client
//!
//! Firmware supplies its platform as a [`PlexusHal`] table of function
//! pointers plus an opaque context pointer; the client is an opaque
//! handle created by `plexus_init()` and released by `plexus_free()`.
//!
//! # Safety
//!
//! All functions in this module use raw pointers.
//! Callers must ensure:
//! - Strings are null-terminated and valid UTF-8
//! - Handles are not used after being freed
//! - The HAL context outlives the client
//! - Thread safety is managed by the caller

use std::ffi::{c_char, c_void, CStr, CString};

use plexus::config::{ClientConfig, MAX_ENDPOINT_LEN};
use plexus::persist::SLOT_HEADER_LEN;
use plexus::{
    Client, EncodeError, Hal, HttpRequest, InputError, PlexusError, ProtocolError, StorageError,
    TransportError,
};

/// Result codes for Plexus FFI functions
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlexusErr {
    /// Operation completed successfully
    Ok = 0,
    /// Null pointer argument
    NullPtr,
    /// Metric buffer is full
    BufferFull,
    /// String exceeds its maximum length
    StringTooLong,
    /// No data to flush
    NoData,
    /// Network or HTTP error
    Network,
    /// Authentication failed (401)
    Auth,
    /// Missing scope (403)
    Forbidden,
    /// Billing limit exceeded (402)
    Billing,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    Server,
    /// JSON serialization error
    Json,
    /// Client not initialized
    NotInitialized,
    /// HAL layer error
    Hal,
    /// Invalid argument (bad characters, etc.)
    InvalidArg,
}

impl From<&PlexusError> for PlexusErr {
    fn from(err: &PlexusError) -> Self {
        match err {
            PlexusError::Input(InputError::QueueFull { .. }) => Self::BufferFull,
            PlexusError::Input(InputError::NameTooLong { .. })
            | PlexusError::Input(InputError::StringTooLong { .. }) => Self::StringTooLong,
            PlexusError::Input(_) => Self::InvalidArg,
            PlexusError::Encode(EncodeError::BufferOverflow { .. })
            | PlexusError::Encode(EncodeError::Serialize(_)) => Self::Json,
            PlexusError::Transport(e) => match e {
                TransportError::Network => Self::Network,
                TransportError::Auth => Self::Auth,
                TransportError::Forbidden => Self::Forbidden,
                TransportError::Billing => Self::Billing,
                TransportError::RateLimited => Self::RateLimit,
                TransportError::Server { .. } => Self::Server,
                TransportError::Unsupported => Self::Hal,
            },
            PlexusError::Storage(_) => Self::Hal,
            PlexusError::Protocol(ProtocolError::MalformedResponse(_)) => Self::Json,
            PlexusError::Protocol(ProtocolError::UnsafeIdentifier(_)) => Self::InvalidArg,
            PlexusError::NoData => Self::NoData,
        }
    }
}

fn result_code(result: plexus::Result<()>) -> PlexusErr {
    match result {
        Ok(()) => PlexusErr::Ok,
        Err(e) => PlexusErr::from(&e),
    }
}

// ============================================================================
// HAL table
// ============================================================================

/// `storage_read` return value for a missing key
pub const PLEXUS_STORAGE_NOT_FOUND: i32 = 1;

/// Largest record `storage_read` is asked to return
pub const PLEXUS_STORAGE_READ_MAX: usize = 4096 + SLOT_HEADER_LEN;

/// Platform functions
///
/// `http_post`, `tick_ms` and `delay_ms` are required. Storage functions
/// are optional: supplying `storage_write` and `storage_read` enables the
/// persistent buffer, so batches that exhaust their retries survive a
/// reboot. `storage_clear` only reclaims delivered slots early.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PlexusHal {
    /// Passed back as the first argument of every call
    pub ctx: *mut c_void,
    /// POST `body`; returns the HTTP status, or a negative value on a
    /// network failure
    pub http_post: Option<
        extern "C" fn(
            ctx: *mut c_void,
            url: *const c_char,
            api_key: *const c_char,
            user_agent: *const c_char,
            body: *const u8,
            body_len: usize,
        ) -> i32,
    >,
    /// Monotonic milliseconds, wrapping at 2^32
    pub tick_ms: Option<extern "C" fn(ctx: *mut c_void) -> u32>,
    /// Milliseconds since the Unix epoch, 0 if unknown
    pub time_ms: Option<extern "C" fn(ctx: *mut c_void) -> u64>,
    /// Block or yield for `ms` milliseconds
    pub delay_ms: Option<extern "C" fn(ctx: *mut c_void, ms: u32)>,
    /// Store `data` under `key`; 0 on success
    pub storage_write:
        Option<extern "C" fn(ctx: *mut c_void, key: *const c_char, data: *const u8, len: usize) -> i32>,
    /// Read `key` into `buf`; 0 on success, [`PLEXUS_STORAGE_NOT_FOUND`]
    /// if missing, negative on error
    pub storage_read: Option<
        extern "C" fn(
            ctx: *mut c_void,
            key: *const c_char,
            buf: *mut u8,
            buf_len: usize,
            out_len: *mut usize,
        ) -> i32,
    >,
    /// Remove `key`; 0 on success
    pub storage_clear: Option<extern "C" fn(ctx: *mut c_void, key: *const c_char) -> i32>,
}

/// [`Hal`] over a C function table
struct CHal {
    table: PlexusHal,
}

impl CHal {
    fn new(table: PlexusHal) -> Option<Self> {
        (table.http_post.is_some() && table.tick_ms.is_some() && table.delay_ms.is_some())
            .then_some(Self { table })
    }

    fn has_storage(&self) -> bool {
        self.table.storage_write.is_some() && self.table.storage_read.is_some()
    }
}

impl Hal for CHal {
    fn http_post(&mut self, request: &HttpRequest<'_>) -> Result<(), TransportError> {
        let post = self.table.http_post.ok_or(TransportError::Unsupported)?;
        let (Ok(url), Ok(key), Ok(agent)) = (
            CString::new(request.url),
            CString::new(request.api_key),
            CString::new(request.user_agent),
        ) else {
            return Err(TransportError::Network);
        };
        let status = post(
            self.table.ctx,
            url.as_ptr(),
            key.as_ptr(),
            agent.as_ptr(),
            request.body.as_ptr(),
            request.body.len(),
        );
        if status < 0 {
            log::debug!("HAL post to {} failed: {}", request.url, status);
            return Err(TransportError::Network);
        }
        TransportError::from_status(u16::try_from(status).unwrap_or(u16::MAX))
    }

    fn tick_ms(&self) -> u32 {
        self.table.tick_ms.map_or(0, |f| f(self.table.ctx))
    }

    fn time_ms(&self) -> u64 {
        self.table.time_ms.map_or(0, |f| f(self.table.ctx))
    }

    fn delay_ms(&mut self, ms: u32) {
        if let Some(f) = self.table.delay_ms {
            f(self.table.ctx, ms);
        }
    }

    fn storage_write(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let write = self.table.storage_write.ok_or(StorageError::Unsupported)?;
        let c_key = CString::new(key).map_err(|_| StorageError::WriteFailed { key: key.into() })?;
        match write(self.table.ctx, c_key.as_ptr(), data.as_ptr(), data.len()) {
            0 => Ok(()),
            _ => Err(StorageError::WriteFailed { key: key.into() }),
        }
    }

    fn storage_read(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(read) = self.table.storage_read else {
            return Ok(None);
        };
        let c_key = CString::new(key).map_err(|_| StorageError::ReadFailed { key: key.into() })?;
        let mut buf = vec![0u8; PLEXUS_STORAGE_READ_MAX];
        let mut len = 0usize;
        match read(self.table.ctx, c_key.as_ptr(), buf.as_mut_ptr(), buf.len(), &mut len) {
            0 if len <= buf.len() => {
                buf.truncate(len);
                Ok(Some(buf))
            }
            PLEXUS_STORAGE_NOT_FOUND => Ok(None),
            _ => Err(StorageError::ReadFailed { key: key.into() }),
        }
    }

    fn storage_clear(&mut self, key: &str) -> Result<(), StorageError> {
        let clear = self.table.storage_clear.ok_or(StorageError::Unsupported)?;
        let c_key = CString::new(key).map_err(|_| StorageError::WriteFailed { key: key.into() })?;
        match clear(self.table.ctx, c_key.as_ptr()) {
            0 => Ok(()),
            _ => Err(StorageError::WriteFailed { key: key.into() }),
        }
    }
}

/// Opaque client handle
///
/// Created with `plexus_init()`, freed with `plexus_free()`.
/// Do not access internal fields directly.
pub struct PlexusClient {
    client: Client<CHal>,
}

/// Borrow a C string as `&str`
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str, PlexusErr> {
    if ptr.is_null() {
        return Err(PlexusErr::NullPtr);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| PlexusErr::InvalidArg)
}

macro_rules! client_mut {
    ($ptr:expr) => {{
        if $ptr.is_null() {
            return PlexusErr::NullPtr;
        }
        unsafe { &mut (*$ptr).client }
    }};
}

macro_rules! arg_str {
    ($ptr:expr) => {
        match unsafe { c_str($ptr) } {
            Ok(s) => s,
            Err(e) => return e,
        }
    };
}

// ============================================================================
// Version and Utility Functions
// ============================================================================

/// Get the library version string
///
/// The returned pointer is valid for the lifetime of the program.
#[no_mangle]
pub extern "C" fn plexus_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

/// Convert a result code to a human-readable string
///
/// The returned pointer is valid for the lifetime of the program.
#[no_mangle]
pub extern "C" fn plexus_strerror(err: PlexusErr) -> *const c_char {
    let msg: &'static [u8] = match err {
        PlexusErr::Ok => b"Success\0",
        PlexusErr::NullPtr => b"Null pointer argument\0",
        PlexusErr::BufferFull => b"Metric buffer is full\0",
        PlexusErr::StringTooLong => b"String exceeds maximum length\0",
        PlexusErr::NoData => b"No data to flush\0",
        PlexusErr::Network => b"Network error\0",
        PlexusErr::Auth => b"Authentication failed - check API key\0",
        PlexusErr::Forbidden => b"Forbidden - API key lacks a required scope\0",
        PlexusErr::Billing => b"Billing limit exceeded\0",
        PlexusErr::RateLimit => b"Rate limited - slow down\0",
        PlexusErr::Server => b"Server error\0",
        PlexusErr::Json => b"JSON error\0",
        PlexusErr::NotInitialized => b"Client not initialized\0",
        PlexusErr::Hal => b"HAL layer error\0",
        PlexusErr::InvalidArg => b"Invalid argument\0",
    };
    msg.as_ptr() as *const c_char
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create a client
///
/// # Arguments
///
/// * `api_key` - API key (null-terminated)
/// * `source_id` - Device identifier, `[A-Za-z0-9._-]` (null-terminated)
/// * `hal` - Platform function table, copied into the client. With storage
///   functions present, undelivered batches from a previous run are
///   restored and sent ahead of new data.
///
/// # Returns
///
/// A new client, or NULL if an argument is missing or invalid. The
/// client must be freed with `plexus_free()`.
///
/// # Example (C)
///
/// ```c
/// plexus_client_t* px = plexus_init("plx_xxx", "greenhouse-1", &hal);
/// if (px == NULL) {
///     // Bad arguments or incomplete HAL
/// }
/// ```
#[no_mangle]
pub extern "C" fn plexus_init(
    api_key: *const c_char,
    source_id: *const c_char,
    hal: *const PlexusHal,
) -> *mut PlexusClient {
    if hal.is_null() {
        return std::ptr::null_mut();
    }
    let (Ok(api_key), Ok(source_id)) = (unsafe { c_str(api_key) }, unsafe { c_str(source_id) })
    else {
        return std::ptr::null_mut();
    };
    let Some(hal) = CHal::new(unsafe { *hal }) else {
        log::warn!("plexus_init: HAL table lacks a required function");
        return std::ptr::null_mut();
    };
    let config = ClientConfig {
        persistent_buffer: hal.has_storage(),
        ..ClientConfig::default()
    };
    match Client::with_config(hal, api_key, source_id, config) {
        Ok(client) => Box::into_raw(Box::new(PlexusClient { client })),
        Err(e) => {
            log::warn!("plexus_init: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Free a client, first attempting to deliver anything still queued
///
/// May be NULL (no-op). The client must not be used afterwards.
#[no_mangle]
pub extern "C" fn plexus_free(client: *mut PlexusClient) {
    if client.is_null() {
        return;
    }
    let mut handle = unsafe { Box::from_raw(client) };
    if handle.client.pending_count() > 0 {
        if let Err(e) = handle.client.flush() {
            log::warn!("Final flush failed: {}", e);
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Queue a number, stamped with the HAL wall clock
#[no_mangle]
pub extern "C" fn plexus_send_number(
    client: *mut PlexusClient,
    name: *const c_char,
    value: f64,
) -> PlexusErr {
    let client = client_mut!(client);
    let name = arg_str!(name);
    result_code(client.enqueue_number(name, value))
}

/// Queue a number with an explicit timestamp (ms since the epoch)
#[no_mangle]
pub extern "C" fn plexus_send_number_ts(
    client: *mut PlexusClient,
    name: *const c_char,
    value: f64,
    timestamp_ms: u64,
) -> PlexusErr {
    let client = client_mut!(client);
    let name = arg_str!(name);
    result_code(client.enqueue_number_at(name, value, timestamp_ms))
}

/// Queue a string
#[no_mangle]
pub extern "C" fn plexus_send_string(
    client: *mut PlexusClient,
    name: *const c_char,
    value: *const c_char,
) -> PlexusErr {
    let client = client_mut!(client);
    let name = arg_str!(name);
    let value = arg_str!(value);
    result_code(client.enqueue_string(name, value))
}

/// Queue a boolean
#[no_mangle]
pub extern "C" fn plexus_send_bool(
    client: *mut PlexusClient,
    name: *const c_char,
    value: bool,
) -> PlexusErr {
    let client = client_mut!(client);
    let name = arg_str!(name);
    result_code(client.enqueue_bool(name, value))
}

/// Deliver the backlog and the queue; blocks through retry backoff
#[no_mangle]
pub extern "C" fn plexus_flush(client: *mut PlexusClient) -> PlexusErr {
    result_code(client_mut!(client).flush())
}

/// Run whatever is due; call from the main loop
#[no_mangle]
pub extern "C" fn plexus_tick(client: *mut PlexusClient) -> PlexusErr {
    result_code(client_mut!(client).tick())
}

/// Number of queued metrics, 0 if `client` is NULL
#[no_mangle]
pub extern "C" fn plexus_pending_count(client: *const PlexusClient) -> u32 {
    if client.is_null() {
        return 0;
    }
    unsafe { &(*client).client }.pending_count() as u32
}

/// Drop all queued metrics
#[no_mangle]
pub extern "C" fn plexus_clear(client: *mut PlexusClient) -> PlexusErr {
    client_mut!(client).clear();
    PlexusErr::Ok
}

/// Points delivered, 0 if `client` is NULL
#[no_mangle]
pub extern "C" fn plexus_total_sent(client: *const PlexusClient) -> u32 {
    if client.is_null() {
        return 0;
    }
    unsafe { &(*client).client }.total_sent()
}

/// Failed flushes, 0 if `client` is NULL
#[no_mangle]
pub extern "C" fn plexus_total_errors(client: *const PlexusClient) -> u32 {
    if client.is_null() {
        return 0;
    }
    unsafe { &(*client).client }.total_errors()
}

// ============================================================================
// Configuration
// ============================================================================

/// Point the client at another ingest endpoint
#[no_mangle]
pub extern "C" fn plexus_set_endpoint(
    client: *mut PlexusClient,
    endpoint: *const c_char,
) -> PlexusErr {
    let client = client_mut!(client);
    let endpoint = arg_str!(endpoint);
    if endpoint.len() >= MAX_ENDPOINT_LEN {
        return PlexusErr::StringTooLong;
    }
    result_code(client.set_endpoint(endpoint))
}

/// Change the time-based flush interval; 0 disables it
#[no_mangle]
pub extern "C" fn plexus_set_flush_interval(client: *mut PlexusClient, interval_ms: u32) -> PlexusErr {
    client_mut!(client).set_flush_interval(interval_ms);
    PlexusErr::Ok
}

/// Change the count threshold; 0 disables it
#[no_mangle]
pub extern "C" fn plexus_set_flush_count(client: *mut PlexusClient, count: u16) -> PlexusErr {
    client_mut!(client).set_flush_count(usize::from(count));
    PlexusErr::Ok
}

// ============================================================================
// Tests
// ============================================================================
