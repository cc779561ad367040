//! C ABI view of the platform adapter
//!
//! A table of nullable function pointers the host can fill in. The native
//! initializer sets file I/O, clock and logging; secure storage and download
//! stay NULL for the host to provide.

use std::ffi::{c_char, c_void, CStr};
use std::path::Path;
use std::ptr;

use super::{LogLevel, NativePlatform, PlatformAdapter, PlatformError};

pub type RacResult = i32;

pub const RAC_SUCCESS: RacResult = 0;
pub const RAC_ERROR_INVALID_ARGUMENT: RacResult = -1;
pub const RAC_ERROR_FILE_NOT_FOUND: RacResult = -2;
pub const RAC_ERROR_FILE_READ_FAILED: RacResult = -3;
pub const RAC_ERROR_FILE_WRITE_FAILED: RacResult = -4;

pub const RAC_LOG_DEBUG: i32 = 0;
pub const RAC_LOG_INFO: i32 = 1;
pub const RAC_LOG_WARNING: i32 = 2;
pub const RAC_LOG_ERROR: i32 = 3;

pub type FileExistsFn = unsafe extern "C" fn(path: *const c_char, user_data: *mut c_void) -> bool;
pub type FileReadFn = unsafe extern "C" fn(
    path: *const c_char,
    out_data: *mut *mut c_void,
    out_size: *mut usize,
    user_data: *mut c_void,
) -> RacResult;
pub type FileWriteFn = unsafe extern "C" fn(
    path: *const c_char,
    data: *const c_void,
    size: usize,
    user_data: *mut c_void,
) -> RacResult;
pub type FileDeleteFn = unsafe extern "C" fn(path: *const c_char, user_data: *mut c_void) -> RacResult;
pub type NowMsFn = unsafe extern "C" fn(user_data: *mut c_void) -> i64;
pub type LogFn = unsafe extern "C" fn(
    level: i32,
    category: *const c_char,
    message: *const c_char,
    user_data: *mut c_void,
);
pub type SecureGetFn = unsafe extern "C" fn(
    key: *const c_char,
    out_value: *mut *mut c_char,
    user_data: *mut c_void,
) -> RacResult;
pub type SecureSetFn = unsafe extern "C" fn(
    key: *const c_char,
    value: *const c_char,
    user_data: *mut c_void,
) -> RacResult;
pub type HttpDownloadFn = unsafe extern "C" fn(
    url: *const c_char,
    dest_path: *const c_char,
    user_data: *mut c_void,
) -> RacResult;

/// Host service table
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RacPlatformAdapter {
    pub file_exists: Option<FileExistsFn>,
    pub file_read: Option<FileReadFn>,
    pub file_write: Option<FileWriteFn>,
    pub file_delete: Option<FileDeleteFn>,
    pub now_ms: Option<NowMsFn>,
    pub log: Option<LogFn>,
    pub secure_get: Option<SecureGetFn>,
    pub secure_set: Option<SecureSetFn>,
    pub http_download: Option<HttpDownloadFn>,
    pub user_data: *mut c_void,
}

impl RacPlatformAdapter {
    /// All slots NULL
    pub const fn empty() -> Self {
        Self {
            file_exists: None,
            file_read: None,
            file_write: None,
            file_delete: None,
            now_ms: None,
            log: None,
            secure_get: None,
            secure_set: None,
            http_download: None,
            user_data: ptr::null_mut(),
        }
    }

    /// Native defaults for file I/O, clock and logging
    pub fn native() -> Self {
        Self {
            file_exists: Some(native_file_exists),
            file_read: Some(native_file_read),
            file_write: Some(native_file_write),
            file_delete: Some(native_file_delete),
            now_ms: Some(native_now_ms),
            log: Some(native_log),
            ..Self::empty()
        }
    }
}

impl Default for RacPlatformAdapter {
    fn default() -> Self {
        Self::empty()
    }
}

fn result_code(e: &PlatformError) -> RacResult {
    match e {
        PlatformError::InvalidArgument(_) => RAC_ERROR_INVALID_ARGUMENT,
        PlatformError::FileNotFound(_) => RAC_ERROR_FILE_NOT_FOUND,
        PlatformError::ReadFailed(_) => RAC_ERROR_FILE_READ_FAILED,
        PlatformError::WriteFailed(_) => RAC_ERROR_FILE_WRITE_FAILED,
    }
}

/// Borrows a C string as a path. NULL or non-UTF-8 yields `None`.
unsafe fn path_arg<'a>(path: *const c_char) -> Option<&'a Path> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok().map(Path::new)
}

unsafe fn text_arg<'a>(text: *const c_char, fallback: &'a str) -> &'a str {
    if text.is_null() {
        return fallback;
    }
    CStr::from_ptr(text).to_str().unwrap_or(fallback)
}

unsafe extern "C" fn native_file_exists(path: *const c_char, _user_data: *mut c_void) -> bool {
    match path_arg(path) {
        Some(path) => NativePlatform.file_exists(path),
        None => false,
    }
}

unsafe extern "C" fn native_file_read(
    path: *const c_char,
    out_data: *mut *mut c_void,
    out_size: *mut usize,
    _user_data: *mut c_void,
) -> RacResult {
    let Some(path) = path_arg(path) else {
        return RAC_ERROR_INVALID_ARGUMENT;
    };
    if out_data.is_null() || out_size.is_null() {
        return RAC_ERROR_INVALID_ARGUMENT;
    }

    match NativePlatform.file_read(path) {
        Ok(bytes) => {
            let buffer = bytes.into_boxed_slice();
            *out_size = buffer.len();
            *out_data = Box::into_raw(buffer) as *mut u8 as *mut c_void;
            RAC_SUCCESS
        }
        Err(e) => result_code(&e),
    }
}

unsafe extern "C" fn native_file_write(
    path: *const c_char,
    data: *const c_void,
    size: usize,
    _user_data: *mut c_void,
) -> RacResult {
    let Some(path) = path_arg(path) else {
        return RAC_ERROR_INVALID_ARGUMENT;
    };
    if data.is_null() {
        return RAC_ERROR_INVALID_ARGUMENT;
    }

    let bytes = std::slice::from_raw_parts(data as *const u8, size);
    match NativePlatform.file_write(path, bytes) {
        Ok(()) => RAC_SUCCESS,
        Err(e) => result_code(&e),
    }
}

unsafe extern "C" fn native_file_delete(path: *const c_char, _user_data: *mut c_void) -> RacResult {
    let Some(path) = path_arg(path) else {
        return RAC_ERROR_INVALID_ARGUMENT;
    };
    match NativePlatform.file_delete(path) {
        Ok(()) => RAC_SUCCESS,
        Err(e) => result_code(&e),
    }
}

unsafe extern "C" fn native_now_ms(_user_data: *mut c_void) -> i64 {
    NativePlatform.now_ms()
}

unsafe extern "C" fn native_log(
    level: i32,
    category: *const c_char,
    message: *const c_char,
    _user_data: *mut c_void,
) {
    let level = match level {
        RAC_LOG_ERROR => LogLevel::Error,
        RAC_LOG_WARNING => LogLevel::Warning,
        RAC_LOG_INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    };
    NativePlatform.log(level, text_arg(category, "RAC"), text_arg(message, ""));
}

/// Fills `adapter` with native defaults, leaving secure storage and download NULL.
///
/// # Safety
/// `adapter` must be NULL or point to writable memory for a `RacPlatformAdapter`.
#[no_mangle]
pub unsafe extern "C" fn rac_platform_adapter_init_native(adapter: *mut RacPlatformAdapter) {
    if adapter.is_null() {
        return;
    }
    adapter.write(RacPlatformAdapter::native());
}

/// Releases a buffer returned by the native `file_read`.
///
/// # Safety
/// `data` and `size` must come from one successful native `file_read` call and
/// must not have been freed already.
#[no_mangle]
pub unsafe extern "C" fn rac_platform_buffer_free(data: *mut c_void, size: usize) {
    if data.is_null() {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(data as *mut u8, size);
    drop(Box::from_raw(slice));
}
