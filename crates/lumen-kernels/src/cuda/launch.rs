//! CUDA kernel launcher with PTX compilation and caching.
//!
//! Compiles the catalog source at runtime via NVRTC, caches loaded modules per
//! device, and launches kernels from an ordered list of 8-byte parameter slots.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::CompileOptions;
use parking_lot::Mutex;

use super::context::CudaError;

/// Registry of compiled PTX modules per device.
/// Key: (device_idx, module_name)
static LOADED: std::sync::OnceLock<Mutex<HashSet<(usize, String)>>> =
    std::sync::OnceLock::new();

fn loaded_set() -> &'static Mutex<HashSet<(usize, String)>> {
    LOADED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Reductions accumulate `double` with `atomicAdd`, which needs sm_60.
const TARGET_ARCH: &str = "compute_60";

/// Ensure a PTX module is compiled and loaded on the given device.
/// No-op if already loaded.
pub fn ensure_module(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module_name: &str,
    cu_source: &str,
    func_names: &[&'static str],
) -> Result<(), CudaError> {
    let key = (device_idx, module_name.to_string());
    let mut set = loaded_set().lock();
    if set.contains(&key) {
        return Ok(());
    }

    let opts = CompileOptions {
        arch: Some(TARGET_ARCH),
        ..Default::default()
    };
    let ptx = cudarc::nvrtc::compile_ptx_with_opts(cu_source, opts).map_err(|e| {
        CudaError::PtxCompile {
            module: module_name.to_string(),
            msg: e.to_string(),
        }
    })?;

    device
        .load_ptx(ptx, module_name, func_names)
        .map_err(|e| CudaError::ModuleLoad {
            module: module_name.to_string(),
            msg: e.to_string(),
        })?;

    tracing::debug!(
        "loaded module '{}' ({} functions) on cuda:{}",
        module_name,
        func_names.len(),
        device_idx
    );
    set.insert(key);
    Ok(())
}

/// Get a kernel function handle, loading the module if needed.
pub fn get_or_load_func(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module_name: &str,
    func_name: &str,
    cu_source: &str,
    func_names: &[&'static str],
) -> Result<CudaFunction, CudaError> {
    ensure_module(device, device_idx, module_name, cu_source, func_names)?;
    device
        .get_func(module_name, func_name)
        .ok_or_else(|| CudaError::FuncNotFound {
            module: module_name.to_string(),
            func: func_name.to_string(),
        })
}

/// Build a launch configuration from grid and block dimensions.
pub fn launch_config(grid: (u32, u32, u32), block: (u32, u32, u32)) -> LaunchConfig {
    LaunchConfig {
        grid_dim: grid,
        block_dim: block,
        shared_mem_bytes: 0,
    }
}

/// Launch `func` with one 8-byte slot per kernel parameter, in declaration order.
///
/// Each slot holds a device pointer, an integer, or a scalar's bits in its
/// low bytes; the driver reads `sizeof(param)` bytes from the slot's address.
///
/// # Safety
/// The slots must match the kernel's parameter list exactly, and every device
/// pointer must stay allocated until the launch has completed on the stream.
pub unsafe fn launch_slots(
    func: CudaFunction,
    cfg: LaunchConfig,
    slots: &mut [u64],
) -> Result<(), CudaError> {
    let mut params: Vec<*mut c_void> = slots
        .iter_mut()
        .map(|slot| slot as *mut u64 as *mut c_void)
        .collect();
    func.launch(cfg, &mut params[..])
        .map_err(|e| CudaError::Launch(e.to_string()))
}
