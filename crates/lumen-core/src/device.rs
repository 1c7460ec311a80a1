use std::fmt;
use std::sync::Arc;

use crate::argument::{ArgumentList, KernelArgument};
use crate::backend::{ComputeBackend, HostBackend, LaunchConfig};
use crate::config::EngineConfig;
use crate::ops::descriptor::KernelId;
use crate::ops::engine::ElementwiseEngine;
use crate::{LumenError, Result};

/// Handle to one backend submission stream plus the engine's tuning.
///
/// Cloning is cheap; clones submit to the same stream. Everything issued
/// through one device executes in program order.
#[derive(Debug, Clone)]
pub struct Device {
    backend: Arc<dyn ComputeBackend>,
    config: Arc<EngineConfig>,
}

impl Device {
    pub fn new(backend: Arc<dyn ComputeBackend>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config: Arc::new(config),
        })
    }

    /// A fresh host reference backend with default configuration.
    pub fn host() -> Self {
        let config = EngineConfig::default();
        Self {
            backend: Arc::new(HostBackend::with_config(&config)),
            config: Arc::new(config),
        }
    }

    pub fn host_with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(HostBackend::with_config(&config));
        Self::new(backend, config)
    }

    /// The CUDA device at `device_idx`, with configuration from the environment.
    #[cfg(feature = "cuda")]
    pub fn cuda(device_idx: usize) -> Result<Self> {
        let backend = Arc::new(crate::backend::CudaBackend::new(device_idx)?);
        Self::new(backend, EngineConfig::from_env()?)
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> ElementwiseEngine {
        ElementwiseEngine::new(self.clone())
    }

    /// Whether `other` submits to the same backend stream.
    pub fn same_stream(&self, other: &Device) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.backend) as *const (),
            Arc::as_ptr(&other.backend) as *const (),
        )
    }

    /// Block until all work submitted through this device has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.backend.synchronize()
    }

    /// Launch a caller-assembled argument list over `count` elements.
    ///
    /// `count` must equal the list's trailing element-count argument, and
    /// every buffer in the list must hold at least that many elements.
    pub fn launch(&self, args: ArgumentList<'_>, count: usize) -> Result<()> {
        let declared = args.element_count();
        let (kernel, args) = args.finish()?;
        if declared != i64::try_from(count).ok() {
            return Err(LumenError::ArgumentType {
                kernel: kernel.name(),
                index: args.len() - 1,
                detail: format!(
                    "element count argument is {}, launch covers {}",
                    declared.unwrap_or_default(),
                    count
                ),
            });
        }
        self.submit(&kernel, count, &args)
    }

    pub(crate) fn submit(&self, kernel: &KernelId, count: usize, args: &[KernelArgument<'_>]) -> Result<()> {
        let config = LaunchConfig::for_elements(count, self.config.block_size);
        tracing::debug!(
            kernel = %kernel,
            elements = count,
            grid = config.grid.0,
            block = config.block.0,
            "launch on {}",
            self.backend.name()
        );
        self.backend.launch(kernel, config, args)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.backend.name())
    }
}
