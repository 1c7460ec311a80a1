//! Host-backend integration tests for Lumen device arrays.
//! Run with: cargo test -p lumen-core -- --nocapture

use std::sync::Arc;

use lumen_core::backend::{ComputeBackend, HostBackend};
use lumen_core::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn host() -> (Arc<HostBackend>, Device) {
    init_tracing();
    let backend = Arc::new(HostBackend::new());
    let device = Device::new(backend.clone(), EngineConfig::default()).unwrap();
    (backend, device)
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() < tol,
            "element {} differs: {} vs {} (tol={})",
            i, x, y, tol
        );
    }
}

// ============================================================================
// Copy-on-write
// ============================================================================

#[test]
fn test_mutating_clone_leaves_original() {
    let (backend, device) = host();
    let a = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let mut b = a.clone();
    assert!(a.shares_buffer_with(&b));
    assert_eq!(backend.stats().device_to_device, 0);

    b.increment(10.0).unwrap();
    assert!(!a.shares_buffer_with(&b));
    assert_eq!(backend.stats().device_to_device, 1);
    assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(b.to_vec().unwrap(), vec![11.0, 12.0, 13.0]);
}

#[test]
fn test_mutating_original_leaves_clone() {
    let (_backend, device) = host();
    let mut a = DeviceArray::from_slice(&device, &[1i32, 2, 3]).unwrap();
    let b = a.clone();
    a.fill(0).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![0, 0, 0]);
    assert_eq!(b.to_vec().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_unique_owner_mutates_in_place() {
    let (backend, device) = host();
    let mut a = DeviceArray::from_slice(&device, &[1.0f64, 2.0]).unwrap();
    let handle = a.buffer().handle();
    a.multiply(3.0).unwrap();
    a.set(0, 7.0).unwrap();
    assert_eq!(a.buffer().handle(), handle);
    assert_eq!(backend.stats().allocations, 1);
}

#[test]
fn test_every_mutation_leaves_unique_buffer() {
    let (_backend, device) = host();
    let base = DeviceArray::from_slice(&device, &[4.0f32, 9.0]).unwrap();
    let other = DeviceArray::from_slice(&device, &[1.0f32, 1.0]).unwrap();

    let mutations: Vec<Box<dyn Fn(&mut DeviceArray<f32>) -> Result<()> + '_>> = vec![
        Box::new(|x: &mut DeviceArray<f32>| x.add_assign(&other)),
        Box::new(|x: &mut DeviceArray<f32>| x.sub_assign(&other)),
        Box::new(|x: &mut DeviceArray<f32>| x.mul_assign(&other)),
        Box::new(|x: &mut DeviceArray<f32>| x.div_assign(&other)),
        Box::new(|x: &mut DeviceArray<f32>| x.increment(1.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.decrement(1.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.multiply(2.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.divide(2.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.transform(UnaryFunction::Sqrt)),
        Box::new(|x: &mut DeviceArray<f32>| x.fill(5.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.set(1, 0.0)),
        Box::new(|x: &mut DeviceArray<f32>| x.assign_fused(&other, BinaryOp::Add, 2.0, &other)),
    ];
    for mutate in &mutations {
        let mut copy = base.clone();
        mutate(&mut copy).unwrap();
        assert!(copy.is_uniquely_owned());
        assert!(!copy.shares_buffer_with(&base));
    }
    assert_eq!(base.to_vec().unwrap(), vec![4.0, 9.0]);
    assert!(base.is_uniquely_owned());
}

// ============================================================================
// Reference counting
// ============================================================================

#[test]
fn test_release_all_but_one() {
    let (backend, device) = host();
    let a = DeviceArray::from_slice(&device, &[1i64, 2, 3]).unwrap();
    let copies: Vec<_> = (0..8).map(|_| a.clone()).collect();
    assert_eq!(a.reference_count(), 9);

    drop(copies);
    assert_eq!(a.reference_count(), 1);
    assert_eq!(backend.stats().frees, 0);

    drop(a);
    let stats = backend.stats();
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.invalid_frees, 0);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(backend.live_allocations(), 0);
}

#[test]
fn test_last_clone_frees_after_original_dropped() {
    let (backend, device) = host();
    let a = DeviceArray::from_slice(&device, &[1.0f32]).unwrap();
    let b = a.clone();
    drop(a);
    assert_eq!(b.get(0).unwrap(), 1.0);
    drop(b);
    assert_eq!(backend.stats().frees, 1);
}

#[test]
fn test_arrays_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DeviceArray<f32>>();
    assert_send_sync::<DeviceValue<i64>>();

    let (backend, device) = host();
    let a = DeviceArray::from_slice(&device, &[1i32, 2, 3]).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let copy = a.clone();
            std::thread::spawn(move || copy.sum().unwrap())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 6);
    }
    drop(a);
    assert_eq!(backend.live_allocations(), 0);
}

// ============================================================================
// Validation leaves operands untouched
// ============================================================================

#[test]
fn test_shape_mismatch() {
    let (backend, device) = host();
    let mut a = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let b = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0, 4.0, 5.0]).unwrap();
    let shared = a.clone();

    let err = a.add_assign(&b).unwrap_err();
    assert!(matches!(err, LumenError::ShapeMismatch { expected: 3, actual: 5 }));
    assert!(a.shares_buffer_with(&shared));
    assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(b.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(backend.stats().launches, 0);
}

#[test]
fn test_unsupported_transform() {
    let (backend, device) = host();
    let mut x = DeviceArray::from_slice(&device, &[1.0f32, 2.0]).unwrap();
    let shared = x.clone();
    assert!(matches!(
        x.transform_named("lgamma"),
        Err(LumenError::UnsupportedOperation { ref operation, dtype: DType::F32 }) if operation == "lgamma"
    ));
    assert!(x.shares_buffer_with(&shared));
    assert_eq!(x.to_vec().unwrap(), vec![1.0, 2.0]);

    let mut n = DeviceArray::from_slice(&device, &[4i32]).unwrap();
    assert!(matches!(
        n.transform_named("sqrt"),
        Err(LumenError::UnsupportedOperation { dtype: DType::I32, .. })
    ));
    assert_eq!(n.get(0).unwrap(), 4);
    assert_eq!(backend.stats().launches, 0);
}

// ============================================================================
// Element access
// ============================================================================

#[test]
fn test_round_trip() {
    let (_backend, device) = host();
    let data = [1.0f32, 2.0, 3.0, 4.0, 5.0];
    let x = DeviceArray::from_slice(&device, &data).unwrap();
    assert_eq!(x.len(), 5);
    for (i, expected) in data.iter().enumerate() {
        assert_eq!(x.get(i).unwrap(), *expected);
    }
}

#[test]
fn test_element_access_copies_one_element() {
    let (backend, device) = host();
    let mut x = DeviceArray::from_slice(&device, &[0i64; 1024]).unwrap();
    let before = backend.stats();
    x.set(512, 9).unwrap();
    assert_eq!(x.get(512).unwrap(), 9);
    let after = backend.stats();
    assert_eq!(after.host_to_device - before.host_to_device, 1);
    assert_eq!(after.device_to_host - before.device_to_host, 1);
}

// ============================================================================
// Operations
// ============================================================================

#[test]
fn test_scalar_map() {
    let (_backend, device) = host();
    let mut x = DeviceArray::from_slice(&device, &[1i32, 2, 3, 4, 5]).unwrap();
    x.increment(2).unwrap();
    assert_eq!(x.to_vec().unwrap(), vec![3, 4, 5, 6, 7]);
    x.multiply(2).unwrap();
    assert_eq!(x.to_vec().unwrap(), vec![6, 8, 10, 12, 14]);
}

#[test]
fn test_reductions() {
    let (_backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1.0f64, 2.0, 3.0, 4.0, 5.0]).unwrap();
    assert_eq!(x.sum().unwrap(), 15.0);
    let y = DeviceArray::from_slice(&device, &[-1.0f64, 2.0, -3.0, 4.0, -5.0]).unwrap();
    assert_eq!(y.abs_sum().unwrap(), 15.0);
    assert_eq!(x.dot(&x).unwrap(), 55.0);
}

#[test]
fn test_fill_idempotent() {
    let (_backend, device) = host();
    let mut once = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let mut twice = once.clone();
    once.fill(4.5).unwrap();
    twice.fill(4.5).unwrap();
    twice.fill(4.5).unwrap();
    assert_eq!(once, twice);
    assert_eq!(DeviceArray::filled(&device, 3, 4.5f32).unwrap(), once);
}

#[test]
fn test_fused_matches_sequential() {
    let (backend, device) = host();
    let left = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let right = DeviceArray::from_slice(&device, &[0.5f32, -1.0, 2.0, 8.0]).unwrap();

    let mut sequential = left.clone();
    sequential.add_assign(&right.scaled(3.0).unwrap()).unwrap();

    let mut fused = DeviceArray::<f32>::zeros(&device, 4).unwrap();
    let launches = backend.stats().launches;
    fused.assign_fused(&left, BinaryOp::Add, 3.0, &right).unwrap();
    assert_eq!(backend.stats().launches - launches, 1);
    assert_close(&fused.to_vec().unwrap(), &sequential.to_vec().unwrap(), 1e-6);
}

#[test]
fn test_integer_semantics() {
    let (_backend, device) = host();
    let mut x = DeviceArray::from_slice(&device, &[i32::MAX, 7, -7]).unwrap();
    let zeros = DeviceArray::<i32>::zeros(&device, 3).unwrap();
    let mut y = x.clone();
    y.div_assign(&zeros).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![0, 0, 0]);
    let mut z = DeviceArray::from_slice(&device, &[i32::MIN, -9]).unwrap();
    z.divide(-1).unwrap();
    assert_eq!(z.to_vec().unwrap(), vec![i32::MIN, 9]);
    x.increment(1).unwrap();
    assert_eq!(x.to_vec().unwrap(), vec![i32::MIN, 8, -6]);
}

#[test]
fn test_parallel_kernels_match_sequential() {
    init_tracing();
    let data: Vec<f32> = (0..10_000).map(|i| (i % 97) as f32 * 0.25).collect();
    let small = Device::host_with_config(EngineConfig::default().with_par_threshold(64)).unwrap();
    let large = Device::host_with_config(EngineConfig::default().with_par_threshold(1 << 30)).unwrap();

    let run = |device: &Device| {
        let mut x = DeviceArray::from_slice(device, &data).unwrap();
        x.transform(UnaryFunction::Cos).unwrap();
        x.multiply(2.0).unwrap();
        x.to_vec().unwrap()
    };
    assert_close(&run(&small), &run(&large), 1e-6);

    let ints: Vec<i64> = (0..10_000).collect();
    let a = DeviceArray::from_slice(&small, &ints).unwrap();
    assert_eq!(a.sum().unwrap(), ints.iter().sum::<i64>());
}

// ============================================================================
// Zero-length arrays and failure paths
// ============================================================================

#[test]
fn test_zero_length_never_touches_backend() {
    let (backend, device) = host();
    let mut x = DeviceArray::<f32>::from_slice(&device, &[]).unwrap();
    let y = x.clone();
    x.add_assign(&y).unwrap();
    x.increment(1.0).unwrap();
    x.transform(UnaryFunction::Log).unwrap();
    assert_eq!(x.sum().unwrap(), 0.0);
    assert_eq!(x.to_vec().unwrap(), Vec::<f32>::new());
    drop(x);
    drop(y);
    let stats = backend.stats();
    assert_eq!(stats.allocations, 0);
    assert_eq!(stats.frees, 0);
    assert_eq!(stats.launches, 0);
}

#[test]
fn test_allocation_failure() {
    init_tracing();
    let device = Device::host_with_config(EngineConfig::default().with_memory_limit(64)).unwrap();
    let a = DeviceArray::<f64>::zeros(&device, 8).unwrap();
    assert!(matches!(DeviceArray::<f64>::with_capacity(&device, 1), Err(LumenError::Allocation(_))));

    // The copy-on-write copy needs a second buffer and fails cleanly.
    let mut b = a.clone();
    assert!(matches!(b.increment(1.0), Err(LumenError::Allocation(_))));
    assert!(b.shares_buffer_with(&a));
    assert_eq!(a.to_vec().unwrap(), vec![0.0; 8]);
}

#[test]
fn test_deferred_fault_surfaces_on_synchronize() {
    let (backend, device) = host();
    let mut x = DeviceArray::from_slice(&device, &[1.0f32]).unwrap();
    x.increment(1.0).unwrap();
    backend.inject_fault("unspecified launch failure");
    assert!(matches!(device.synchronize(), Err(LumenError::Launch(_))));
    assert!(device.synchronize().is_ok());
    assert_eq!(x.get(0).unwrap(), 2.0);
}

// ============================================================================
// Manual argument lists
// ============================================================================

#[test]
fn test_manual_launch() {
    let (backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let y = DeviceArray::from_slice(&device, &[10.0f32, 20.0, 30.0]).unwrap();
    let mut out = x.clone();

    let kernel = KernelId::from_name("fused_sub_f32").unwrap();
    let args = ArgumentList::new(&kernel)
        .input(&x)
        .unwrap()
        .input(&y)
        .unwrap()
        .scalar(0.1f32)
        .unwrap()
        .output(&mut out)
        .unwrap()
        .int(3)
        .unwrap();
    device.launch(args, 3).unwrap();

    assert_eq!(x.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    assert_close(&out.to_vec().unwrap(), &[0.0, 0.0, 0.0], 1e-6);
    assert!(out.is_uniquely_owned());
    assert_eq!(backend.stats().launches, 1);
}

#[test]
fn test_mismatched_list_fails_at_construction() {
    let (backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1i32, 2]).unwrap();
    let kernel = KernelId::binary(BinaryOp::Add, DType::I32).unwrap();

    let err = ArgumentList::new(&kernel).input(&x).unwrap().scalar(1i32).unwrap_err();
    assert!(matches!(err, LumenError::ArgumentType { index: 1, .. }));

    let partial = ArgumentList::new(&kernel).input(&x).unwrap();
    assert!(matches!(device.launch(partial, 2), Err(LumenError::ArgumentType { .. })));
    assert_eq!(backend.stats().launches, 0);
}

#[test]
fn test_backend_revalidates_raw_lists() {
    let (backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1.0f64]).unwrap();
    let kernel = KernelId::map(UnaryFunction::Neg, DType::F64).unwrap();
    let args = [KernelArgument::input(&x), KernelArgument::int(1)];
    let config = lumen_core::backend::LaunchConfig::for_elements(1, 256);
    assert!(matches!(
        backend.launch(&kernel, config, &args),
        Err(LumenError::ArgumentType { index: 1, .. })
    ));
}

#[test]
fn test_raw_fill_cannot_change_clone() {
    let (backend, device) = host();
    let a = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let kernel = KernelId::fill(DType::F32).unwrap();

    let mut b = a.clone();
    let args = ArgumentList::new(&kernel)
        .output(&mut b)
        .unwrap()
        .scalar(9.0f32)
        .unwrap()
        .int(3)
        .unwrap();
    device.launch(args, 3).unwrap();
    assert_eq!(b.to_vec().unwrap(), vec![9.0, 9.0, 9.0]);

    // Straight to the backend, the writable pointer still comes from the gate.
    let mut c = a.clone();
    let args = [
        KernelArgument::output(&mut c).unwrap(),
        KernelArgument::scalar(7.0f32),
        KernelArgument::int(3),
    ];
    let config = lumen_core::backend::LaunchConfig::for_elements(3, 256);
    device.backend().launch(&kernel, config, &args).unwrap();
    assert_eq!(c.to_vec().unwrap(), vec![7.0, 7.0, 7.0]);

    assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    assert!(!a.shares_buffer_with(&b) && !a.shares_buffer_with(&c));
    assert!(a.is_uniquely_owned());
    assert_eq!(backend.stats().launches, 2);
}

#[test]
fn test_launch_count_must_match_list() {
    let (backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1.0f32, 2.0, 3.0]).unwrap();
    let mut y = DeviceArray::<f32>::zeros(&device, 3).unwrap();
    let launches = backend.stats().launches;

    let kernel = KernelId::map(UnaryFunction::Neg, DType::F32).unwrap();
    let args = ArgumentList::new(&kernel).input(&x).unwrap().output(&mut y).unwrap().int(3).unwrap();
    assert!(matches!(device.launch(args, 1), Err(LumenError::ArgumentType { index: 2, .. })));
    assert_eq!(backend.stats().launches, launches);
    assert_eq!(y.to_vec().unwrap(), vec![0.0, 0.0, 0.0]);

    let args = ArgumentList::new(&kernel).input(&x).unwrap().output(&mut y).unwrap().int(3).unwrap();
    device.launch(args, 3).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![-1.0, -2.0, -3.0]);
}

#[test]
fn test_launch_rejects_count_beyond_buffers() {
    let (backend, device) = host();
    let x = DeviceArray::from_slice(&device, &[1.0f32; 8]).unwrap();
    let mut short = DeviceArray::<f32>::zeros(&device, 2).unwrap();
    let mut wide = DeviceArray::<f32>::zeros(&device, 8).unwrap();
    let mut out = DeviceArray::<f32>::zeros(&device, 2).unwrap();
    let launches = backend.stats().launches;
    let kernel = KernelId::map(UnaryFunction::Neg, DType::F32).unwrap();

    let args = ArgumentList::new(&kernel).input(&x).unwrap().output(&mut short).unwrap().int(8).unwrap();
    assert!(matches!(device.launch(args, 8), Err(LumenError::ArgumentType { index: 1, .. })));

    let args = ArgumentList::new(&kernel).input(&short).unwrap().output(&mut wide).unwrap().int(8).unwrap();
    assert!(matches!(device.launch(args, 8), Err(LumenError::ArgumentType { index: 0, .. })));

    // The same check guards lists handed to a backend directly.
    let args = [KernelArgument::input(&x), KernelArgument::output(&mut out).unwrap(), KernelArgument::int(8)];
    let config = lumen_core::backend::LaunchConfig::for_elements(8, 256);
    assert!(matches!(
        device.backend().launch(&kernel, config, &args),
        Err(LumenError::ArgumentType { index: 1, .. })
    ));

    assert_eq!(backend.stats().launches, launches);
    assert_eq!(short.to_vec().unwrap(), vec![0.0, 0.0]);
}

// ============================================================================
// DeviceValue
// ============================================================================

#[test]
fn test_device_value() {
    let (_backend, device) = host();
    let a = DeviceValue::new(&device, 3i64).unwrap();
    let mut b = a.clone();
    b.multiply(5).unwrap();
    b.add_assign(&a).unwrap();
    assert_eq!(a.get().unwrap(), 3);
    assert_eq!(b.get().unwrap(), 18);
    assert_ne!(a, b);
    assert_eq!(b.as_array().sum().unwrap(), 18);
}
