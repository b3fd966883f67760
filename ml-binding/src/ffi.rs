//! FFI exports for embedding the recommender in non-Rust hosts
//!
//! Requests and responses cross the boundary as JSON strings. Failures come
//! back as `{"error": "..."}`; null is returned only when the input pointer is
//! null or not valid UTF-8. Every returned string must be released with
//! [`agri_free_string`].
//!
//! JSON values are flattened with [`fields_from_json`], the same rules the
//! HTTP server applies.

use std::ffi::{CStr, CString};
use std::ptr;
use std::str::Utf8Error;

use libc::c_char;
use serde_json::{json, Value};

use crate::config::RecommenderConfig;
use crate::encoder::{fields_from_json, Domain};
use crate::service::RecommendationService;
use crate::store::ModelContext;

// =============================================================================
// Helper functions
// =============================================================================

unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    optional_c_str(ptr).ok().flatten()
}

/// Null is `Ok(None)`; a non-null pointer must hold UTF-8
unsafe fn optional_c_str(ptr: *const c_char) -> Result<Option<String>, Utf8Error> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr).to_str().map(|s| Some(s.to_string()))
}

fn string_to_c_str(s: String) -> *mut c_char {
    CString::new(s).map(|cs| cs.into_raw()).unwrap_or(ptr::null_mut())
}

fn error_json(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

fn recommend_json(service: &RecommendationService, domain: Domain, request: &str) -> String {
    let value: Value = match serde_json::from_str(request) {
        Ok(value) => value,
        Err(e) => return error_json(format!("invalid JSON request: {}", e)),
    };
    let Some(fields) = fields_from_json(value) else {
        return error_json("request must be a JSON object");
    };
    match service.recommend(domain, &fields) {
        Ok(result) => serde_json::to_string(&result).unwrap_or_else(|e| error_json(e)),
        Err(e) => error_json(e),
    }
}

// =============================================================================
// Service lifecycle
// =============================================================================

/// Opaque handle to a loaded recommendation service
pub struct AgriServiceHandle(RecommendationService);

/// Load models and create a service.
///
/// `config_path` may be null, in which case `AGRI_RECOMMENDER_CONFIG` or the
/// built-in defaults are used. Returns null if the path is not UTF-8 or
/// loading fails.
#[no_mangle]
pub extern "C" fn agri_service_load(config_path: *const c_char) -> *mut AgriServiceHandle {
    let config = match unsafe { optional_c_str(config_path) } {
        Ok(Some(path)) => RecommenderConfig::from_file(path),
        Ok(None) => RecommenderConfig::load_from_env_and_defaults(),
        Err(e) => {
            tracing::error!("config path is not valid UTF-8: {}", e);
            return ptr::null_mut();
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load recommender config: {}", e);
            return ptr::null_mut();
        }
    };

    match ModelContext::load(&config) {
        Ok(context) => Box::into_raw(Box::new(AgriServiceHandle(RecommendationService::new(
            context,
        )))),
        Err(e) => {
            tracing::error!("failed to load recommendation models: {}", e);
            ptr::null_mut()
        }
    }
}

/// Free a service handle
#[no_mangle]
pub extern "C" fn agri_service_free(handle: *mut AgriServiceHandle) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)) };
    }
}

/// Free a string returned by this library
#[no_mangle]
pub extern "C" fn agri_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe { drop(CString::from_raw(s)) };
    }
}

// =============================================================================
// Recommendation
// =============================================================================

fn recommend_ffi(
    handle: *const AgriServiceHandle,
    fields_json: *const c_char,
    domain: Domain,
) -> *mut c_char {
    if handle.is_null() {
        return ptr::null_mut();
    }
    let request = match unsafe { c_str_to_string(fields_json) } {
        Some(s) => s,
        None => return ptr::null_mut(),
    };
    let service = unsafe { &(*handle).0 };
    string_to_c_str(recommend_json(service, domain, &request))
}

/// Recommend a crop from a JSON object of field values
#[no_mangle]
pub extern "C" fn agri_recommend_crop(
    handle: *const AgriServiceHandle,
    fields_json: *const c_char,
) -> *mut c_char {
    recommend_ffi(handle, fields_json, Domain::Crop)
}

/// Recommend a fertilizer from a JSON object of field values
#[no_mangle]
pub extern "C" fn agri_recommend_fertilizer(
    handle: *const AgriServiceHandle,
    fields_json: *const c_char,
) -> *mut c_char {
    recommend_ffi(handle, fields_json, Domain::Fertilizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        agri_free_string(ptr);
        s
    }

    #[test]
    fn test_non_object_request_reports_error_json() {
        let service = RecommendationService::new(ModelContext::default());
        let response = recommend_json(&service, Domain::Crop, "[1, 2]");
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["error"], "request must be a JSON object");
    }

    #[test]
    fn test_invalid_utf8_path_is_not_treated_as_null() {
        let invalid = CStr::from_bytes_with_nul(b"\xff\xfe\0").unwrap();

        assert!(unsafe { optional_c_str(invalid.as_ptr()) }.is_err());
        assert_eq!(unsafe { optional_c_str(ptr::null()) }, Ok(None));
        let valid = CString::new("models.yaml").unwrap();
        assert_eq!(
            unsafe { optional_c_str(valid.as_ptr()) },
            Ok(Some("models.yaml".to_string()))
        );

        assert!(agri_service_load(invalid.as_ptr()).is_null());
    }

    #[test]
    fn test_null_inputs() {
        assert!(agri_recommend_crop(ptr::null(), ptr::null()).is_null());
        agri_service_free(ptr::null_mut());
        agri_free_string(ptr::null_mut());

        let missing = CString::new("/nonexistent/recommender.yaml").unwrap();
        assert!(agri_service_load(missing.as_ptr()).is_null());
    }

    #[test]
    fn test_unavailable_domain_reports_error_json() {
        let handle = Box::into_raw(Box::new(AgriServiceHandle(RecommendationService::new(
            ModelContext::default(),
        ))));
        let request = CString::new("{}").unwrap();

        let response = take_string(agri_recommend_fertilizer(handle, request.as_ptr()));
        let value: Value = serde_json::from_str(&response).unwrap();
        assert!(value["error"].as_str().unwrap().contains("fertilizer"));

        let bad = CString::new("not json").unwrap();
        let response = take_string(agri_recommend_crop(handle, bad.as_ptr()));
        assert!(response.contains("error"));

        agri_service_free(handle);
    }
}
