use std::ffi::CStr;

/// Builds the `host-device-pid` worker identity named in the spec. `device`
/// is `None` for a CPU-bound worker, `Some(index)` for a GPU-bound one.
/// `slot` distinguishes multiple worker loops sharing one device and one
/// process (`--workers-per-device` > 1), which otherwise all resolve to the
/// same host/device/pid tuple.
pub fn worker_id(device: Option<u32>, slot: u32) -> String {
    let host = hostname();
    let device_label = device.map(|d| d.to_string()).unwrap_or_else(|| "cpu".to_string());
    let pid = std::process::id();
    format!("{host}-{device_label}-{pid}-{slot}")
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid, correctly-sized out-buffer for gethostname(2).
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown-host".to_string();
    }
    // SAFETY: gethostname null-terminates on success within buf's bounds.
    let cstr = unsafe { CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    cstr.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_carries_device_pid_and_slot() {
        let id = worker_id(Some(2), 1);
        assert!(id.ends_with(&format!("-2-{}-1", std::process::id())));
    }

    #[test]
    fn cpu_worker_uses_cpu_label() {
        let id = worker_id(None, 0);
        assert!(id.contains("-cpu-"));
    }

    #[test]
    fn distinct_slots_disambiguate_same_device() {
        assert_ne!(worker_id(Some(0), 0), worker_id(Some(0), 1));
    }
}
