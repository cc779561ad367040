//! C ABI entry points
//!
//! One process-wide [`Session`] sits behind a mutex. Hosts must still
//! serialize calls: the lock only satisfies Rust's rules for statics.
//!
//! Strings returned to the host are owned by this library and stay valid until
//! the next call to the same function.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::config::load_startup_config;
use crate::error::{status_of, SessionError};
use crate::inference::{InferenceBackend, LlamaEngine, StreamToken};
use crate::logging::init_logging;
use crate::platform::NativePlatform;
use crate::session::Session;

struct FfiState {
    session: Session<LlamaEngine>,
    last_chunk: CString,
}

static STATE: Lazy<Mutex<Option<FfiState>>> = Lazy::new(|| Mutex::new(None));
static SYSTEM_INFO: Lazy<Mutex<CString>> = Lazy::new(|| Mutex::new(CString::default()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic in a previous call must not brick the library for the host
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Borrows a C string. NULL or invalid UTF-8 is an invalid argument.
unsafe fn str_arg<'a>(text: *const c_char, name: &'static str) -> Result<&'a str, SessionError> {
    if text.is_null() {
        return Err(SessionError::InvalidArgument(name));
    }
    CStr::from_ptr(text)
        .to_str()
        .map_err(|_| SessionError::InvalidArgument(name))
}

/// Runs `op` against the session, reporting a missing session as invalid state
fn with_session<T>(
    operation: &'static str,
    op: impl FnOnce(&mut FfiState) -> Result<T, SessionError>,
) -> Result<T, SessionError> {
    let mut guard = lock(&STATE);
    match guard.as_mut() {
        Some(state) => op(state),
        None => Err(SessionError::InvalidState {
            operation,
            state: crate::session::SessionState::Uninitialized,
        }),
    }
}

fn report(operation: &str, result: Result<(), SessionError>) -> c_int {
    let status = status_of(&result);
    if let Err(e) = result {
        tracing::error!("{} failed: {}", operation, e);
    }
    status.code()
}

/// Strips interior NULs so any UTF-8 chunk can cross as a C string
fn to_c_string(text: String) -> CString {
    match CString::new(text) {
        Ok(s) => s,
        Err(e) => {
            let mut bytes = e.into_vec();
            bytes.retain(|&b| b != 0);
            CString::new(bytes).unwrap_or_default()
        }
    }
}

/// Initializes logging and the inference backend.
///
/// `plugin_dir` may be NULL; when set, backend plugins are loaded from it.
///
/// # Safety
/// `plugin_dir` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn init_ffi(plugin_dir: *const c_char) {
    init_logging();

    let plugin_dir = if plugin_dir.is_null() {
        None
    } else {
        match CStr::from_ptr(plugin_dir).to_str() {
            Ok(dir) => Some(Path::new(dir)),
            Err(_) => {
                tracing::warn!("Ignoring non UTF-8 plugin directory");
                None
            }
        }
    };

    let mut guard = lock(&STATE);
    let state = guard.get_or_insert_with(|| FfiState {
        session: Session::new(LlamaEngine::new(), load_startup_config(&NativePlatform)),
        last_chunk: CString::default(),
    });
    if let Err(e) = state.session.init_backend(plugin_dir) {
        tracing::error!("Backend initialization failed: {}", e);
    }
}

/// # Safety
/// `path` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn load_model_ffi(path: *const c_char) -> c_int {
    let result = str_arg(path, "model path")
        .and_then(|path| with_session("load model", |s| s.session.load_model(Path::new(path))));
    report("Load model", result)
}

#[no_mangle]
pub extern "C" fn prepare_session_ffi() -> c_int {
    let result = with_session("prepare session", |s| s.session.prepare_session());
    report("Prepare session", result)
}

/// # Safety
/// `prompt` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn process_system_prompt_ffi(prompt: *const c_char) -> c_int {
    let result = str_arg(prompt, "system prompt").and_then(|prompt| {
        with_session("process system prompt", |s| {
            s.session.process_system_prompt(prompt)
        })
    });
    report("Process system prompt", result)
}

/// # Safety
/// `prompt` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn process_user_prompt_ffi(prompt: *const c_char, n_predict: c_int) -> c_int {
    let result = str_arg(prompt, "user prompt").and_then(|prompt| {
        let n_predict =
            u32::try_from(n_predict).map_err(|_| SessionError::InvalidArgument("n_predict"))?;
        with_session("process user prompt", |s| {
            s.session.process_user_prompt(prompt, n_predict)
        })
    });
    report("Process user prompt", result)
}

/// Returns the next text chunk, an empty string while a character is still
/// incomplete, or NULL at end of stream and on error.
#[no_mangle]
pub extern "C" fn generate_next_token_ffi() -> *const c_char {
    let result = with_session("generate", |s| {
        Ok(match s.session.generate_next_token()? {
            StreamToken::Token(text) => {
                s.last_chunk = to_c_string(text);
                s.last_chunk.as_ptr()
            }
            StreamToken::Done => ptr::null(),
        })
    });
    match result {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::error!("Generation failed: {}", e);
            ptr::null()
        }
    }
}

#[no_mangle]
pub extern "C" fn stop_generation_ffi() {
    let _ = with_session("stop generation", |s| {
        s.session.stop_generation();
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn reset_conversation_ffi() {
    let _ = with_session("reset conversation", |s| {
        s.session.reset_conversation();
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn unload_ffi() {
    let _ = with_session("unload", |s| {
        s.session.unload();
        Ok(())
    });
}

/// Releases everything, including the session itself. Safe to call repeatedly.
#[no_mangle]
pub extern "C" fn shutdown_ffi() {
    if let Some(mut state) = lock(&STATE).take() {
        state.session.shutdown();
    }
}

#[no_mangle]
pub extern "C" fn get_system_info_ffi() -> *const c_char {
    let info = match lock(&STATE).as_ref() {
        Some(state) => state.session.system_info(),
        None => LlamaEngine::new().system_info(),
    };
    let mut cached = lock(&SYSTEM_INFO);
    *cached = to_c_string(info);
    cached.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_arguments_are_rejected() {
        unsafe {
            assert_eq!(load_model_ffi(ptr::null()), 1);
            assert_eq!(process_system_prompt_ffi(ptr::null()), 1);
            assert_eq!(process_user_prompt_ffi(ptr::null(), 5), 1);
        }
    }

    #[test]
    fn test_negative_n_predict_is_rejected() {
        let prompt = CString::new("Hi").unwrap();
        unsafe {
            assert_eq!(process_user_prompt_ffi(prompt.as_ptr(), -1), 1);
        }
    }

    #[test]
    fn test_calls_without_session() {
        shutdown_ffi();
        assert_eq!(prepare_session_ffi(), 1);
        assert!(generate_next_token_ffi().is_null());
        stop_generation_ffi();
        reset_conversation_ffi();
        unload_ffi();
        shutdown_ffi();
    }

    #[test]
    fn test_to_c_string_strips_nul() {
        assert_eq!(to_c_string("a\0b".to_string()).as_bytes(), b"ab");
        assert_eq!(to_c_string(String::new()).as_bytes(), b"");
    }
}
