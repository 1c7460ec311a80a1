//! CUDA GPU backend plumbing for Lumen.
//!
//! Provides:
//! - Device context management (lazy singleton per GPU)
//! - A handle-keyed device heap with host↔device and device↔device copies
//! - NVRTC compilation of the operation catalog with per-device module caching
//! - Raw kernel launches over an ordered, type-erased parameter list

pub mod context;
pub mod memory;
pub mod launch;

pub use context::{get_device, is_cuda_available, CudaError};
pub use memory::DeviceHeap;

/// CUDA C source for every kernel in the catalog.
pub const CATALOG_CU: &str = include_str!("kernels/catalog.cu");

/// Module name the catalog is loaded under on each device.
pub const CATALOG_MODULE: &str = "lumen_catalog";

macro_rules! arith_names {
    ($sfx:literal) => {
        [
            concat!("add_", $sfx), concat!("sub_", $sfx), concat!("mul_", $sfx), concat!("div_", $sfx),
            concat!("add_scalar_", $sfx), concat!("sub_scalar_", $sfx),
            concat!("mul_scalar_", $sfx), concat!("div_scalar_", $sfx),
            concat!("fused_add_", $sfx), concat!("fused_sub_", $sfx),
            concat!("fused_mul_", $sfx), concat!("fused_div_", $sfx),
            concat!("fill_", $sfx),
            concat!("reduce_sum_", $sfx), concat!("reduce_asum_", $sfx), concat!("reduce_dot_", $sfx),
            concat!("abs_", $sfx), concat!("neg_", $sfx),
        ]
    };
}

macro_rules! float_map_names {
    ($sfx:literal) => {
        [
            concat!("sin_", $sfx), concat!("cos_", $sfx), concat!("tan_", $sfx),
            concat!("tanh_", $sfx), concat!("ceil_", $sfx), concat!("floor_", $sfx),
            concat!("exp_", $sfx), concat!("log_", $sfx), concat!("sqrt_", $sfx),
        ]
    };
}

const F32_ARITH: [&str; 18] = arith_names!("f32");
const F64_ARITH: [&str; 18] = arith_names!("f64");
const I32_ARITH: [&str; 18] = arith_names!("i32");
const I64_ARITH: [&str; 18] = arith_names!("i64");
const F32_MAP: [&str; 9] = float_map_names!("f32");
const F64_MAP: [&str; 9] = float_map_names!("f64");

/// Every function exported by [`CATALOG_CU`], grouped for module loading.
pub const CATALOG_FUNC_GROUPS: [&[&str]; 6] = [
    &F32_ARITH, &F64_ARITH, &I32_ARITH, &I64_ARITH, &F32_MAP, &F64_MAP,
];

/// Flattened list of [`CATALOG_FUNC_GROUPS`].
pub fn catalog_funcs() -> Vec<&'static str> {
    CATALOG_FUNC_GROUPS.iter().flat_map(|g| g.iter().copied()).collect()
}
