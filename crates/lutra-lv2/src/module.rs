//! A loaded plugin instance and its deferred-work bridge.
//!
//! [`Module`] wraps one native plugin: instantiation against the host
//! feature table, port connection, the run cycle, and the worker extension
//! wiring that lets the plugin push work off the real-time thread.

use crate::error::{Error, Result};
use crate::features::{Feature, FeatureArray};
use crate::metadata::PluginDescriptor;
use crate::urid::{self, SymbolMap};
use crate::world::DrainPolicy;
use lutra_lv2_sys::{
    LV2_Descriptor, LV2_Handle, LV2_Worker_Interface, LV2_Worker_Respond_Handle,
    LV2_Worker_Schedule, LV2_Worker_Schedule_Handle, LV2_Worker_Status, LV2_WORKER_ERR_NO_SPACE,
    LV2_WORKER_ERR_UNKNOWN, LV2_WORKER_SUCCESS, LV2_WORKER__interface, LV2_WORKER__schedule,
};
use lutra_rt::{WorkError, WorkHandler, WorkQueue, WorkResponder, WorkScheduler, Worker};
use parking_lot::Mutex;
use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::slice;
use std::sync::Arc;

/// Lifecycle phase of a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninstantiated,
    Instantiated,
    Active,
}

/// Outcome of the host-facing worker operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Success,
    /// The channel lacked room; the caller may retry later.
    NoSpace,
    /// The module has no live worker bridge.
    Unavailable,
}

fn work_status(result: std::result::Result<(), WorkError>) -> WorkStatus {
    match result {
        Ok(()) => WorkStatus::Success,
        Err(WorkError::NoSpace) => WorkStatus::NoSpace,
        Err(_) => WorkStatus::Unavailable,
    }
}

/// Where the queue thread delivers work: the native handle plus the
/// plugin's worker interface. Cleared before teardown so a request racing
/// the teardown is dropped instead of reaching a dead instance.
#[derive(Clone, Copy)]
struct WorkerTarget {
    handle: LV2_Handle,
    iface: LV2_Worker_Interface,
}

// Safety: the handle is only dereferenced through the plugin's own
// callbacks, which the worker contract serializes against teardown.
unsafe impl Send for WorkerTarget {}

#[derive(Default)]
struct PluginWorkerHandler {
    target: Mutex<Option<WorkerTarget>>,
}

impl WorkHandler for PluginWorkerHandler {
    fn process_request(&self, data: &[u8], responder: &WorkResponder<'_>) {
        // Copy the target out and call outside the lock: the response
        // drain on the real-time thread takes the same mutex, and the
        // plugin's work call can be arbitrarily slow. The handle stays
        // valid across the call because the queue sets the working flag
        // before dispatch and teardown waits it out after clearing the
        // target.
        let target = *self.target.lock();
        let Some(target) = target else {
            tracing::debug!("dropping work request, no live instance");
            return;
        };
        let Some(work) = target.iface.work else {
            return;
        };
        let status = unsafe {
            work(
                target.handle,
                respond_trampoline,
                responder as *const WorkResponder<'_> as *mut c_void,
                data.len() as u32,
                data.as_ptr().cast(),
            )
        };
        if status != LV2_WORKER_SUCCESS {
            tracing::warn!(status, "plugin work callback failed");
        }
    }

    fn process_response(&self, data: &[u8]) {
        // Pointer-sized copy under the lock; never blocks behind an
        // in-flight work call.
        let target = *self.target.lock();
        let Some(target) = target else {
            return;
        };
        if let Some(work_response) = target.iface.work_response {
            unsafe {
                work_response(target.handle, data.len() as u32, data.as_ptr().cast());
            }
        }
    }
}

unsafe extern "C" fn respond_trampoline(
    handle: LV2_Worker_Respond_Handle,
    size: u32,
    data: *const c_void,
) -> LV2_Worker_Status {
    if handle.is_null() || (size > 0 && data.is_null()) {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let responder = &*(handle as *const WorkResponder<'_>);
    let payload = if size == 0 {
        &[]
    } else {
        slice::from_raw_parts(data as *const u8, size as usize)
    };
    match responder.respond(payload) {
        Ok(()) => LV2_WORKER_SUCCESS,
        Err(WorkError::NoSpace) => LV2_WORKER_ERR_NO_SPACE,
        Err(_) => LV2_WORKER_ERR_UNKNOWN,
    }
}

struct SchedulePayload {
    data: LV2_Worker_Schedule,
    scheduler: WorkScheduler,
}

// Safety: the self-referential handle pointer targets the boxed payload,
// which the owning Feature pins for its whole life.
unsafe impl Send for SchedulePayload {}
unsafe impl Sync for SchedulePayload {}

unsafe extern "C" fn schedule_trampoline(
    handle: LV2_Worker_Schedule_Handle,
    size: u32,
    data: *const c_void,
) -> LV2_Worker_Status {
    if handle.is_null() || size == 0 || data.is_null() {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let payload = &*(handle as *const SchedulePayload);
    let bytes = slice::from_raw_parts(data as *const u8, size as usize);
    match payload.scheduler.schedule(bytes) {
        Ok(()) => LV2_WORKER_SUCCESS,
        Err(WorkError::NoSpace) => LV2_WORKER_ERR_NO_SPACE,
        Err(_) => LV2_WORKER_ERR_UNKNOWN,
    }
}

/// Build the worker:schedule feature around a scheduling handle. The
/// feature outlives the worker it targets; scheduling after the worker is
/// gone reports `ERR_UNKNOWN` to the plugin.
fn schedule_feature(scheduler: WorkScheduler) -> Feature {
    let mut payload = Box::new(SchedulePayload {
        data: LV2_Worker_Schedule {
            handle: ptr::null_mut(),
            schedule_work: Some(schedule_trampoline),
        },
        scheduler,
    });
    payload.data.handle = &*payload as *const SchedulePayload as *mut c_void;
    let data = &mut payload.data as *mut LV2_Worker_Schedule as *mut c_void;
    Feature::new(LV2_WORKER__schedule, data, payload)
}

/// Entry points probed once at instantiation. Optional callbacks the
/// descriptor leaves null stay `None` and their operations are no-ops.
#[derive(Clone, Copy)]
struct Capabilities {
    connect_port: Option<unsafe extern "C" fn(LV2_Handle, u32, *mut c_void)>,
    activate: Option<unsafe extern "C" fn(LV2_Handle)>,
    run: Option<unsafe extern "C" fn(LV2_Handle, u32)>,
    deactivate: Option<unsafe extern "C" fn(LV2_Handle)>,
}

impl Capabilities {
    fn probe(descriptor: &LV2_Descriptor) -> Self {
        Self {
            connect_port: descriptor.connect_port,
            activate: descriptor.activate,
            run: descriptor.run,
            deactivate: descriptor.deactivate,
        }
    }
}

/// Owns the native handle and calls `cleanup` when dropped.
struct NativeHandle {
    raw: crate::metadata::RawDescriptor,
    handle: LV2_Handle,
}

unsafe impl Send for NativeHandle {}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if let Some(cleanup) = self.raw.descriptor().cleanup {
            unsafe { cleanup(self.handle) };
        }
    }
}

struct ModuleWorker {
    handler: Arc<PluginWorkerHandler>,
    worker: Worker,
    iface: LV2_Worker_Interface,
}

impl Drop for ModuleWorker {
    fn drop(&mut self) {
        // Detach the plugin before the worker deregisters; a request
        // dispatched during teardown is then dropped, never delivered to
        // a handle about to be cleaned up.
        *self.handler.target.lock() = None;
    }
}

// Field order is drop order: the worker detaches and deregisters first,
// then the handle is cleaned up, then the feature memory the plugin may
// have read until cleanup is released.
struct Instance {
    worker: Option<ModuleWorker>,
    handle: NativeHandle,
    caps: Capabilities,
    features: FeatureArray,
}

/// One hosted plugin.
///
/// Created by [`crate::world::World::create_module`] in the
/// `Uninstantiated` state. Port connections do not survive
/// re-instantiation; after [`Module::set_sample_rate`] on a live module,
/// reconnect every port before the next run cycle.
pub struct Module {
    descriptor: Arc<PluginDescriptor>,
    symbols: Arc<SymbolMap>,
    queue: Arc<WorkQueue>,
    response_capacity: usize,
    drain: DrainPolicy,
    sample_rate: f64,
    native: Option<Instance>,
    active: bool,
}

impl Module {
    pub(crate) fn new(
        descriptor: Arc<PluginDescriptor>,
        symbols: Arc<SymbolMap>,
        queue: Arc<WorkQueue>,
        response_capacity: usize,
        drain: DrainPolicy,
    ) -> Self {
        Self {
            descriptor,
            symbols,
            queue,
            response_capacity,
            drain,
            sample_rate: 0.0,
            native: None,
            active: false,
        }
    }

    pub fn uri(&self) -> &str {
        &self.descriptor.uri
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn symbols(&self) -> &Arc<SymbolMap> {
        &self.symbols
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn port_count(&self) -> u32 {
        self.descriptor.port_count()
    }

    pub fn port(&self, index: u32) -> Option<&crate::metadata::PortInfo> {
        self.descriptor.port(index)
    }

    pub fn state(&self) -> ModuleState {
        match (&self.native, self.active) {
            (None, _) => ModuleState::Uninstantiated,
            (Some(_), false) => ModuleState::Instantiated,
            (Some(_), true) => ModuleState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a live worker bridge connects this instance to the queue.
    pub fn has_worker(&self) -> bool {
        matches!(&self.native, Some(instance) if instance.worker.is_some())
    }

    /// Bring the native instance up at `sample_rate`. A no-op when
    /// already instantiated; use [`Module::set_sample_rate`] to change
    /// the rate of a live instance.
    pub fn instantiate(&mut self, sample_rate: f64) -> Result<()> {
        if self.native.is_some() {
            return Ok(());
        }

        let mut features = FeatureArray::new();
        features.add(urid::map_feature(&self.symbols));
        features.add(urid::unmap_feature(&self.symbols));

        let mut pending_worker = None;
        if self.descriptor.provides_extension(LV2_WORKER__interface) {
            let handler = Arc::new(PluginWorkerHandler::default());
            let worker = self
                .queue
                .register(Arc::clone(&handler) as Arc<dyn WorkHandler>, self.response_capacity);
            features.add(schedule_feature(worker.scheduler()));
            pending_worker = Some((handler, worker));
        }

        let raw = self.descriptor.source.resolve(&self.descriptor.uri)?;
        let ctor = raw.descriptor().instantiate.ok_or_else(|| Error::Instantiation {
            uri: self.descriptor.uri.clone(),
            reason: "descriptor has no constructor".to_owned(),
        })?;
        let bundle = CString::new(self.descriptor.bundle_path.as_str()).unwrap_or_default();
        let handle =
            unsafe { ctor(raw.as_ptr(), sample_rate, bundle.as_ptr(), features.as_ptr()) };
        if handle.is_null() {
            return Err(Error::Instantiation {
                uri: self.descriptor.uri.clone(),
                reason: "constructor returned null".to_owned(),
            });
        }

        let caps = Capabilities::probe(raw.descriptor());

        let worker = match pending_worker {
            Some((handler, worker)) => {
                match unsafe { probe_worker_interface(raw.descriptor()) } {
                    Some(iface) if iface.work.is_some() => {
                        *handler.target.lock() = Some(WorkerTarget { handle, iface });
                        Some(ModuleWorker {
                            handler,
                            worker,
                            iface,
                        })
                    }
                    _ => {
                        // The schedule feature stays in the array; its
                        // scheduler now reports ERR_UNKNOWN to the plugin.
                        tracing::warn!(
                            uri = %self.descriptor.uri,
                            "worker extension advertised but not exported"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        tracing::debug!(uri = %self.descriptor.uri, sample_rate, "instantiated plugin");
        self.sample_rate = sample_rate;
        self.native = Some(Instance {
            worker,
            handle: NativeHandle { raw, handle },
            caps,
            features,
        });
        Ok(())
    }

    /// Tear the native instance down, deactivating first if needed.
    pub fn free(&mut self) {
        if self.native.is_some() {
            let _ = self.deactivate();
            self.native = None;
        }
    }

    pub fn activate(&mut self) -> Result<()> {
        let instance = self.native.as_ref().ok_or(Error::NotInstantiated)?;
        if self.active {
            return Ok(());
        }
        if let Some(activate) = instance.caps.activate {
            unsafe { activate(instance.handle.handle) };
        }
        self.active = true;
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<()> {
        let instance = self.native.as_ref().ok_or(Error::NotInstantiated)?;
        if !self.active {
            return Ok(());
        }
        if let Some(deactivate) = instance.caps.deactivate {
            unsafe { deactivate(instance.handle.handle) };
        }
        self.active = false;
        Ok(())
    }

    /// Rebuild the instance at a new rate. The previous native state and
    /// all port connections are discarded; an active module comes back
    /// active. A no-op when the rate is unchanged.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        if self.sample_rate == sample_rate {
            return Ok(());
        }
        if self.native.is_none() {
            self.sample_rate = sample_rate;
            return Ok(());
        }
        tracing::debug!(
            uri = %self.descriptor.uri,
            from = self.sample_rate,
            to = sample_rate,
            "re-instantiating for new sample rate"
        );
        let was_active = self.active;
        self.free();
        self.instantiate(sample_rate)?;
        if was_active {
            self.activate()?;
        }
        Ok(())
    }

    /// Hand the plugin a buffer for `port`.
    ///
    /// # Safety
    ///
    /// `data` must point at a buffer of the port's type, large enough for
    /// the block sizes passed to [`Module::run`], and stay valid until the
    /// port is reconnected or the instance torn down.
    pub unsafe fn connect_port(&mut self, port: u32, data: *mut c_void) -> Result<()> {
        let count = self.descriptor.port_count();
        if port >= count {
            return Err(Error::PortIndex { index: port, count });
        }
        let instance = self.native.as_ref().ok_or(Error::NotInstantiated)?;
        if let Some(connect) = instance.caps.connect_port {
            connect(instance.handle.handle, port, data);
        }
        Ok(())
    }

    /// One processing cycle: drain pending worker responses per the
    /// configured policy, run the plugin for `frames`, then signal end of
    /// run to the worker interface.
    pub fn run(&mut self, frames: u32) -> Result<()> {
        let instance = self.native.as_mut().ok_or(Error::NotInstantiated)?;
        if let Some(worker) = instance.worker.as_mut() {
            match self.drain {
                DrainPolicy::Single => {
                    worker.worker.process_one_response();
                }
                DrainPolicy::All => {
                    worker.worker.process_responses();
                }
            }
        }
        if let Some(run) = instance.caps.run {
            unsafe { run(instance.handle.handle, frames) };
        }
        if let Some(worker) = instance.worker.as_ref() {
            if let Some(end_run) = worker.iface.end_run {
                unsafe { end_run(instance.handle.handle) };
            }
        }
        Ok(())
    }

    /// Schedule deferred work on the plugin's behalf, as if it had called
    /// the schedule feature itself.
    pub fn schedule_work(&self, data: &[u8]) -> WorkStatus {
        match &self.native {
            Some(instance) => match &instance.worker {
                Some(worker) => work_status(worker.worker.schedule(data)),
                None => WorkStatus::Unavailable,
            },
            None => WorkStatus::Unavailable,
        }
    }

    /// Push a response frame into the module's private channel, bypassing
    /// the queue thread. Delivered on the next run cycle.
    pub fn write_work_response(&self, data: &[u8]) -> WorkStatus {
        match &self.native {
            Some(instance) => match &instance.worker {
                Some(worker) => work_status(worker.worker.write_response(data)),
                None => WorkStatus::Unavailable,
            },
            None => WorkStatus::Unavailable,
        }
    }
}

unsafe fn probe_worker_interface(descriptor: &LV2_Descriptor) -> Option<LV2_Worker_Interface> {
    let extension_data = descriptor.extension_data?;
    let uri = CString::new(LV2_WORKER__interface).unwrap_or_default();
    let iface = extension_data(uri.as_ptr() as *const c_char);
    if iface.is_null() {
        return None;
    }
    Some(*(iface as *const LV2_Worker_Interface))
}
