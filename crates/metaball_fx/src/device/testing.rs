//! Host device whose calls can be made to fail on demand.
use std::sync::{Arc, Mutex};

use super::cpu::CpuDevice;
use super::{DensityDevice, Kernel};
use crate::error::{Error, Result};
use crate::field::layout::{GpuCorner, GpuParticle, KernelParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailAt {
    Dispatch,
    ReadCorners,
}

/// Arms failures on a [`FlakyDevice`] after it has been boxed into a grid.
#[derive(Clone, Default)]
pub(crate) struct FailSwitch(Arc<Mutex<Vec<FailAt>>>);

impl FailSwitch {
    /// The next call at `at` fails, once.
    pub(crate) fn arm(&self, at: FailAt) {
        self.0.lock().unwrap().push(at);
    }

    fn trip(&self, at: FailAt) -> Result<()> {
        let mut armed = self.0.lock().unwrap();
        match armed.iter().position(|a| *a == at) {
            Some(i) => {
                armed.remove(i);
                Err(Error::Device(format!("{at:?} lost")))
            }
            None => Ok(()),
        }
    }
}

/// [`CpuDevice`] that fails whichever calls its [`FailSwitch`] armed.
pub(crate) struct FlakyDevice {
    inner: CpuDevice,
    switch: FailSwitch,
}

pub(crate) fn flaky() -> (Box<dyn DensityDevice>, FailSwitch) {
    let switch = FailSwitch::default();
    let device = FlakyDevice {
        inner: CpuDevice::new(),
        switch: switch.clone(),
    };
    (Box::new(device), switch)
}

impl DensityDevice for FlakyDevice {
    fn label(&self) -> &str {
        "flaky"
    }

    fn write_corners(&mut self, corners: &[GpuCorner]) -> Result<()> {
        self.inner.write_corners(corners)
    }

    fn write_particles(&mut self, particles: &[GpuParticle]) -> Result<()> {
        self.inner.write_particles(particles)
    }

    fn dispatch(&mut self, kernels: &[Kernel], params: &KernelParams) -> Result<()> {
        self.switch.trip(FailAt::Dispatch)?;
        self.inner.dispatch(kernels, params)
    }

    fn read_corners(&mut self, out: &mut [GpuCorner]) -> Result<()> {
        self.switch.trip(FailAt::ReadCorners)?;
        self.inner.read_corners(out)
    }

    fn read_particles(&mut self, out: &mut [GpuParticle]) -> Result<()> {
        self.inner.read_particles(out)
    }

    fn release(&mut self) {
        self.inner.release();
    }

    fn allocation_count(&self) -> u64 {
        self.inner.allocation_count()
    }
}
