//! Per-GPU `CudaDevice` singletons.
//!
//! A `CudaDevice` owns one default stream. Every heap and launch for a given
//! index goes through the same handle, so their work executes in issue order.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use cudarc::driver::CudaDevice;
use parking_lot::Mutex;

static REGISTRY: OnceLock<Mutex<HashMap<usize, Arc<CudaDevice>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<usize, Arc<CudaDevice>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The shared handle for GPU `device_idx`, created on first use.
pub fn get_device(device_idx: usize) -> Result<Arc<CudaDevice>, CudaError> {
    match registry().lock().entry(device_idx) {
        Entry::Occupied(slot) => Ok(Arc::clone(slot.get())),
        Entry::Vacant(slot) => {
            let device = CudaDevice::new(device_idx).map_err(|e| CudaError::DeviceInit {
                device_idx,
                msg: e.to_string(),
            })?;
            tracing::debug!("initialized cuda:{}", device_idx);
            Ok(Arc::clone(slot.insert(device)))
        }
    }
}

pub fn is_cuda_available() -> bool {
    get_device(0).is_ok()
}

/// Failures of the CUDA plumbing, before translation by the caller.
#[derive(Debug, thiserror::Error)]
pub enum CudaError {
    #[error("cuda:{device_idx} unavailable: {msg}")]
    DeviceInit { device_idx: usize, msg: String },

    #[error("NVRTC rejected module '{module}': {msg}")]
    PtxCompile { module: String, msg: String },

    #[error("loading module '{module}' failed: {msg}")]
    ModuleLoad { module: String, msg: String },

    #[error("module '{module}' has no kernel '{func}'")]
    FuncNotFound { module: String, func: String },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("allocating {nbytes} bytes failed: {msg}")]
    Alloc { nbytes: usize, msg: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("unknown device allocation #{0}")]
    UnknownHandle(u64),
}
