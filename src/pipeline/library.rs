//! Minimal `dlopen` handle.

use std::ffi::{CStr, CString, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use super::abi::{INIT_SYMBOL, PipelineInitFn};

/// An open shared object, closed on drop.
#[derive(Debug)]
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns either NULL or a NUL-terminated string valid
    // until the next dl* call on this thread.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

impl Library {
    /// Opens `path` with immediate symbol binding.
    pub fn open(path: &Path) -> Result<Self, String> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| format!("{} contains a NUL byte", path.display()))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        match NonNull::new(handle) {
            Some(handle) => {
                tracing::debug!(path = %path.display(), "shared object opened");
                Ok(Self {
                    handle,
                    path: path.to_path_buf(),
                })
            }
            None => Err(last_dl_error()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of `name`, or the loader's message when it is absent.
    pub fn symbol(&self, name: &CStr) -> Result<NonNull<c_void>, String> {
        unsafe {
            let _ = libc::dlerror();
            NonNull::new(libc::dlsym(self.handle.as_ptr(), name.as_ptr())).ok_or_else(last_dl_error)
        }
    }

    /// The pipeline constructor exported by this object.
    pub fn init_symbol(&self) -> Result<PipelineInitFn, String> {
        let sym = self.symbol(INIT_SYMBOL)?;
        // SAFETY: modules export the constructor with this exact signature.
        Ok(unsafe { std::mem::transmute::<*mut c_void, PipelineInitFn>(sym.as_ptr()) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            tracing::warn!(path = %self.path.display(), error = %last_dl_error(), "dlclose failed");
        }
    }
}
