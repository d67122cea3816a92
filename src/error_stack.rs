//! Native error stack adapter
//!
//! GDAL reports problems through a thread-local, mutable error state rather than through return
//! codes alone. Every public operation of this crate opens an [`ErrorScope`]: it clears the
//! native error state, installs a collecting handler for the current thread and, when dropped,
//! removes the handler and clears the state again. Records collected in between are classified
//! by the operation: any record at [`CplErrType::Failure`] or worse fails the operation, while
//! warnings are logged and handed back to the caller as [`Warning`]s.
//!
//! Scopes nest. Warnings checked in an inner scope, and any record left undrained there, are
//! handed to the enclosing scope when the inner scope is dropped, so an operation built from
//! other operations reports every warning exactly once, from the outermost scope.

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void};
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

use gdal_sys::{CPLErr, CPLErrorNum};

use crate::errors::{CplErrType, OgrioError, Result};
use crate::utils::_string;

/// One record raised by the native layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub class: CplErrType,
    pub number: i32,
    pub message: String,
}

/// A non-fatal diagnostic raised by the native layer during an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub number: i32,
    pub message: String,
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "warning {}: {}", self.number, self.message)
    }
}

type RecordCell = RefCell<Vec<ErrorRecord>>;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<*const RecordCell>> = const { RefCell::new(Vec::new()) };
    static SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

unsafe extern "C" fn collect_error(
    error_type: CPLErr::Type,
    error_num: CPLErrorNum,
    error_msg_ptr: *const c_char,
) {
    let records = gdal_sys::CPLGetErrorHandlerUserData() as *const RecordCell;
    if records.is_null() {
        return;
    }
    let message = if error_msg_ptr.is_null() {
        String::new()
    } else {
        _string(error_msg_ptr)
    };
    // never unwind across the FFI boundary
    if let Ok(mut records) = (*records).try_borrow_mut() {
        records.push(ErrorRecord {
            class: error_type.into(),
            number: error_num,
            message,
        });
    }
}

/// Scoped capture of the native error stack for the current thread.
pub struct ErrorScope {
    // Boxed so the address handed to GDAL as handler user data stays stable.
    records: Box<RecordCell>,
    nested: bool,
    // Make !Sync and !Send: GDAL error handler stacks are per thread.
    _private: PhantomData<*mut c_void>,
}

impl ErrorScope {
    /// Clears the native error state and starts collecting records.
    pub fn new() -> Self {
        let records: Box<RecordCell> = Box::default();
        let records_ptr: *const RecordCell = &*records;
        unsafe {
            gdal_sys::CPLErrorReset();
            gdal_sys::CPLPushErrorHandlerEx(Some(collect_error), records_ptr as *mut c_void);
        }
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(records_ptr));
        let nested = SCOPE_DEPTH.with(|depth| {
            let outer = depth.get();
            depth.set(outer + 1);
            outer > 0
        });
        ErrorScope {
            records,
            nested,
            _private: PhantomData,
        }
    }

    /// Number of scopes currently open on this thread.
    pub fn depth() -> usize {
        SCOPE_DEPTH.with(|depth| depth.get())
    }

    /// Whether a record at failure severity or worse is pending.
    pub fn has_errors(&self) -> bool {
        self.records.borrow().iter().any(|r| r.class.is_error())
    }

    /// Removes and returns every pending record.
    pub fn drain(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    /// Number of pending records, to be passed to [`drain_since`](Self::drain_since).
    pub fn mark(&self) -> usize {
        self.records.borrow().len()
    }

    /// Removes and returns the records collected after `mark`, keeping the earlier ones.
    pub fn drain_since(&self, mark: usize) -> Vec<ErrorRecord> {
        let mut records = self.records.borrow_mut();
        let at = mark.min(records.len());
        records.split_off(at)
    }

    /// Drains pending records into an error built by `make_err` if any of them is an error;
    /// otherwise returns the warnings.
    ///
    /// `make_err` receives the worst severity observed and the error messages joined by `"; "`.
    /// In a nested scope the warnings are kept for the enclosing scope and an empty list is
    /// returned.
    pub fn check_with<F>(&self, make_err: F) -> Result<Vec<Warning>>
    where
        F: FnOnce(CplErrType, String) -> OgrioError,
    {
        let (errors, warnings) = classify(self.drain());
        if let Some((class, msg)) = errors {
            return Err(make_err(class, msg));
        }
        if self.nested {
            self.records
                .borrow_mut()
                .extend(warnings.into_iter().map(|w| ErrorRecord {
                    class: CplErrType::Warning,
                    number: w.number,
                    message: w.message,
                }));
            return Ok(Vec::new());
        }
        for warning in &warnings {
            log::warn!("GDAL {}: {}", warning.number, warning.message);
        }
        Ok(warnings)
    }

    /// Like [`check_with`](Self::check_with), reporting errors as [`OgrioError::Native`].
    pub fn check(&self) -> Result<Vec<Warning>> {
        let number = self.first_error_number();
        self.check_with(|class, msg| OgrioError::Native { class, number, msg })
    }

    /// Builds an error for a native call that signalled failure through its return value,
    /// using the collected messages or, if none were raised, a description of the call.
    pub fn failure<F>(&self, method_name: &'static str, make_err: F) -> OgrioError
    where
        F: FnOnce(CplErrType, String) -> OgrioError,
    {
        let (errors, _) = classify(self.drain());
        match errors {
            Some((class, msg)) => make_err(class, msg),
            None => make_err(
                CplErrType::Failure,
                format!("{method_name} failed without a native error message"),
            ),
        }
    }

    /// Like [`failure`](Self::failure), reporting the error as [`OgrioError::Native`].
    pub fn native_failure(&self, method_name: &'static str) -> OgrioError {
        let number = self.first_error_number();
        self.failure(method_name, |class, msg| OgrioError::Native { class, number, msg })
    }

    /// Closes the scope around an operation's result.
    ///
    /// A successful result is still turned into an error by `make_err` if error records are
    /// pending. Records pending alongside a failed result are logged and discarded.
    pub fn finish<T, F>(self, result: Result<T>, make_err: F) -> Result<(T, Vec<Warning>)>
    where
        F: FnOnce(CplErrType, String) -> OgrioError,
    {
        match result {
            Ok(value) => {
                let warnings = self.check_with(make_err)?;
                Ok((value, warnings))
            }
            Err(e) => {
                for record in self.drain() {
                    log::debug!(
                        "discarding native record after failure: {:?} {} {}",
                        record.class,
                        record.number,
                        record.message
                    );
                }
                Err(e)
            }
        }
    }

    fn first_error_number(&self) -> i32 {
        self.records
            .borrow()
            .iter()
            .find(|r| r.class.is_error())
            .map(|r| r.number)
            .unwrap_or(0)
    }
}

impl Default for ErrorScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ErrorScope {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::CPLPopErrorHandler();
            gdal_sys::CPLErrorReset();
        }
        let leftover = self.drain();
        let parent = SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.pop();
            stack.last().copied()
        });
        SCOPE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));

        match parent {
            // The parent box outlives this scope: scopes are strictly nested on one thread.
            Some(parent) => {
                if let Ok(mut records) = unsafe { (*parent).try_borrow_mut() } {
                    records.extend(leftover);
                }
            }
            None => {
                for record in leftover {
                    log_record(&record);
                }
            }
        }
    }
}

fn log_record(record: &ErrorRecord) {
    match record.class {
        CplErrType::None | CplErrType::Debug => {
            log::debug!("GDAL {}: {}", record.number, record.message)
        }
        CplErrType::Warning => log::warn!("GDAL {}: {}", record.number, record.message),
        CplErrType::Failure | CplErrType::Fatal => {
            log::error!("GDAL {}: {}", record.number, record.message)
        }
    }
}

/// Splits records into the worst error (with joined messages) and the warnings.
fn classify(records: Vec<ErrorRecord>) -> (Option<(CplErrType, String)>, Vec<Warning>) {
    let mut worst: Option<CplErrType> = None;
    let mut messages = Vec::new();
    let mut warnings = Vec::new();

    for record in records {
        match record.class {
            class if class.is_error() => {
                worst = Some(worst.map_or(class, |w| w.max(class)));
                messages.push(record.message);
            }
            CplErrType::Warning => {
                warnings.push(Warning {
                    number: record.number,
                    message: record.message,
                });
            }
            _ => log_record(&record),
        }
    }

    (worst.map(|class| (class, messages.join("; "))), warnings)
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use gdal_sys::{CPLErr, CPLError};

    use super::*;

    fn raise(class: CPLErr::Type, number: i32, msg: &str) {
        let fmt = CString::new("%s").unwrap();
        let msg = CString::new(msg).unwrap();
        unsafe { CPLError(class, number, fmt.as_ptr(), msg.as_ptr()) };
    }

    #[test]
    fn test_collects_and_classifies() {
        let scope = ErrorScope::new();
        raise(CPLErr::CE_Warning, 1, "ring not closed");
        raise(CPLErr::CE_Failure, 42, "cannot read feature");
        raise(CPLErr::CE_Failure, 43, "stream truncated");
        assert!(scope.has_errors());

        let err = scope.check().unwrap_err();
        match err {
            OgrioError::Native { class, number, msg } => {
                assert_eq!(class, CplErrType::Failure);
                assert_eq!(number, 42);
                assert_eq!(msg, "cannot read feature; stream truncated");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!scope.has_errors());
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let scope = ErrorScope::new();
        raise(CPLErr::CE_Warning, 1, "value truncated");
        let warnings = scope.check().unwrap();
        assert_eq!(
            warnings,
            vec![Warning {
                number: 1,
                message: "value truncated".to_string()
            }]
        );
    }

    #[test]
    fn test_drain_since_keeps_earlier_records() {
        let scope = ErrorScope::new();
        raise(CPLErr::CE_Warning, 1, "kept");
        let mark = scope.mark();
        raise(CPLErr::CE_Failure, 2, "recovered");
        let drained = scope.drain_since(mark);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message, "recovered");
        assert!(!scope.has_errors());

        let warnings = scope.check().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "kept");
    }

    #[test]
    fn test_native_state_cleared_on_drop() {
        {
            let _scope = ErrorScope::new();
            raise(CPLErr::CE_Failure, 7, "left behind");
        }
        let last = unsafe { gdal_sys::CPLGetLastErrorType() };
        assert_eq!(last, CPLErr::CE_None);
        assert_eq!(ErrorScope::depth(), 0);
    }

    #[test]
    fn test_nested_scope_hands_over_leftovers() {
        let outer = ErrorScope::new();
        {
            let _inner = ErrorScope::new();
            assert_eq!(ErrorScope::depth(), 2);
            raise(CPLErr::CE_Warning, 6, "inner warning");
        }
        let records = outer.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "inner warning");
    }

    #[test]
    fn test_nested_check_defers_warnings() {
        let outer = ErrorScope::new();
        {
            let inner = ErrorScope::new();
            raise(CPLErr::CE_Warning, 2, "deferred");
            assert!(inner.check().unwrap().is_empty());
        }
        let warnings = outer.check().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "deferred");
    }

    #[test]
    fn test_finish_turns_pending_errors_into_failure() {
        let scope = ErrorScope::new();
        raise(CPLErr::CE_Failure, 1, "late failure");
        let result = scope.finish(Ok(5), |class, msg| OgrioError::ReadError { class, msg });
        assert!(matches!(result, Err(OgrioError::ReadError { msg, .. }) if msg == "late failure"));
    }
}
