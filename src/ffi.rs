//! C-compatible functions over an explicitly passed index handle.
//!
//! All functions return `1` on success and `0` on failure. Errors other than a
//! missing or duplicate key are logged, since they can't be passed through the
//! C interface.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;

use tracing::error;

use crate::{
    btree::BPlusTree,
    config::IndexConfig,
    error::{Error, Result},
    page::{Key, Tuple, TUPLE_SIZE},
};

fn status(result: Result<bool>, operation: &str) -> c_int {
    match result {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            error!(operation, error = %e, "index operation failed");
            0
        }
    }
}

unsafe fn open_into(handle: *mut *mut BPlusTree, config: &IndexConfig) -> Result<bool> {
    if handle.is_null() {
        return Err(Error::InvalidArgument("handle slot is null".to_string()));
    }
    // Reuse an already opened index
    if !(*handle).is_null() {
        return Ok(true);
    }
    let tree = BPlusTree::open(config)?;
    *handle = Box::into_raw(Box::new(tree));
    Ok(true)
}

unsafe fn tree_mut<'a>(handle: *mut BPlusTree) -> Result<&'a mut BPlusTree> {
    handle
        .as_mut()
        .ok_or_else(|| Error::InvalidArgument("handle is null".to_string()))
}

/// Open the index with the default configuration and store it in `*handle`.
///
/// Calling this again with an already opened handle does nothing.
///
/// # Safety
///
/// `handle` must point to a valid handle slot which is either null or holds a
/// handle created by this library.
#[no_mangle]
pub unsafe extern "C" fn bpt_init(handle: *mut *mut BPlusTree) -> c_int {
    status(open_into(handle, &IndexConfig::default()), "init")
}

/// Open the index at the given path with the given capacity and store it in `*handle`.
///
/// # Safety
///
/// `handle` must be valid as for [`bpt_init`] and `path` must be a valid
/// null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn bpt_open_at(
    handle: *mut *mut BPlusTree,
    path: *const c_char,
    capacity_pages: u32,
) -> c_int {
    let result = (|| {
        if path.is_null() {
            return Err(Error::InvalidArgument("path is null".to_string()));
        }
        let path = CStr::from_ptr(path)
            .to_str()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let config = IndexConfig::default()
            .path(path)
            .capacity_pages(capacity_pages.try_into()?);
        open_into(handle, &config)
    })();
    status(result, "open")
}

/// Insert `TUPLE_SIZE` bytes from `data` under the given key.
///
/// Returns `0` if the key already exists.
///
/// # Safety
///
/// `handle` must be an open handle and `data` must point to at least `TUPLE_SIZE` bytes.
#[no_mangle]
pub unsafe extern "C" fn bpt_write(handle: *mut BPlusTree, key: Key, data: *const u8) -> c_int {
    let result = tree_mut(handle).and_then(|tree| {
        if data.is_null() {
            return Err(Error::InvalidArgument("data is null".to_string()));
        }
        let data = std::slice::from_raw_parts(data, TUPLE_SIZE);
        tree.insert(key, Tuple::from_bytes(data))
    });
    status(result, "write")
}

fn into_raw_value(value: Tuple) -> *mut u8 {
    Box::into_raw(Box::new(value.into_bytes())) as *mut u8
}

/// Returns a copy of the value for the key, or null if it does not exist.
///
/// The returned buffer has `TUPLE_SIZE` bytes and must be released with [`bpt_free_value`].
///
/// # Safety
///
/// `handle` must be an open handle.
#[no_mangle]
pub unsafe extern "C" fn bpt_read(handle: *mut BPlusTree, key: Key) -> *mut u8 {
    match tree_mut(handle).and_then(|tree| tree.get(key)) {
        Ok(Some(value)) => into_raw_value(value),
        Ok(None) => ptr::null_mut(),
        Err(e) => {
            error!(key, error = %e, "read failed");
            ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `value` must be null or a buffer returned by [`bpt_read`] that was not freed before.
#[no_mangle]
pub unsafe extern "C" fn bpt_free_value(value: *mut u8) {
    if !value.is_null() {
        drop(Box::from_raw(value as *mut [u8; TUPLE_SIZE]));
    }
}

/// Remove the key. Returns `0` if it did not exist.
///
/// # Safety
///
/// `handle` must be an open handle.
#[no_mangle]
pub unsafe extern "C" fn bpt_delete(handle: *mut BPlusTree, key: Key) -> c_int {
    status(tree_mut(handle).and_then(|tree| tree.remove(key)), "delete")
}

/// Returns the values of all keys in `low..=high`, ordered by key.
///
/// The number of values is written to `*count`. If nothing matches, null is
/// returned and the count is 0. On errors, including an aborted scan, null is
/// returned and the count is -1. Release the result with [`bpt_free_range`].
///
/// # Safety
///
/// `handle` must be an open handle and `count` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn bpt_read_range(
    handle: *mut BPlusTree,
    low: Key,
    high: Key,
    count: *mut c_int,
) -> *mut *mut u8 {
    let result = tree_mut(handle).and_then(|tree| {
        let values: Result<Vec<Tuple>> = tree
            .range(low, high)?
            .map(|e| e.map(|(_, value)| value))
            .collect();
        values
    });

    let (values, n) = match result {
        Ok(values) if values.is_empty() => (ptr::null_mut(), 0),
        Ok(values) => match c_int::try_from(values.len()) {
            Ok(n) => {
                let pointers: Vec<*mut u8> = values.into_iter().map(into_raw_value).collect();
                (Box::into_raw(pointers.into_boxed_slice()) as *mut *mut u8, n)
            }
            Err(e) => {
                error!(low, high, error = %e, "too many results for range");
                (ptr::null_mut(), -1)
            }
        },
        Err(e) => {
            error!(low, high, error = %e, "range read failed");
            (ptr::null_mut(), -1)
        }
    };
    if !count.is_null() {
        *count = n;
    }
    values
}

/// # Safety
///
/// `values` must be null or returned by [`bpt_read_range`] together with `count`.
#[no_mangle]
pub unsafe extern "C" fn bpt_free_range(values: *mut *mut u8, count: c_int) {
    if values.is_null() || count <= 0 {
        return;
    }
    let len = count as usize;
    let pointers = Box::from_raw(ptr::slice_from_raw_parts_mut(values, len));
    for value in pointers.iter() {
        bpt_free_value(*value);
    }
}

/// Flush and close the index and reset `*handle` to null.
///
/// # Safety
///
/// `handle` must be valid as for [`bpt_init`].
#[no_mangle]
pub unsafe extern "C" fn bpt_close(handle: *mut *mut BPlusTree) -> c_int {
    if handle.is_null() || (*handle).is_null() {
        return 0;
    }
    let tree = *Box::from_raw(*handle);
    *handle = ptr::null_mut();
    status(tree.close().map(|_| true), "close")
}
