use libc::{LOG_EMERG, LOG_PID, LOG_USER, closelog, openlog, syslog};
use std::{ffi::CString, fmt::Display};
use tracing::error;

/// Reports a broken reactor invariant and aborts the process.
///
/// The reactor has nobody above it to return an error to: a failed accept,
/// a failed interest update or a failed wait leaves the registration table in
/// an unknown state. The message goes to the tracing subscriber and to syslog
/// (the subscriber may be writing to a closed terminal), then we abort.
#[cold]
pub fn fatal(context: &str, err: impl Display) -> ! {
    error!("{context}: {err}");
    error!("Reactor state is no longer trustworthy. Aborting.");
    let message: String = format!("aws: {context}: {err}").replace('\0', " ");
    if let Ok(message) = CString::new(message) {
        unsafe {
            openlog(std::ptr::null(), LOG_PID, LOG_USER);
            syslog(LOG_EMERG, c"%s".as_ptr(), message.as_ptr());
            closelog();
        }
    }
    std::process::abort()
}
