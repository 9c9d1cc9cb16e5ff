//! Raw LV2 ABI declarations for the lutra host.
//!
//! Hand-written equivalents of the `lv2core`, `urid`, and `worker` headers.
//! Layouts and calling conventions must stay byte-for-byte compatible with
//! the C definitions — pre-built plugin binaries are on the other side of
//! every one of these structs.

#![no_std]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use core::ffi::{c_char, c_void};

// ---------------------------------------------------------------------------
// lv2core
// ---------------------------------------------------------------------------

/// Opaque handle for a plugin instance.
pub type LV2_Handle = *mut c_void;

/// A capability the host offers to a plugin at instantiation time.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LV2_Feature {
    /// Null-terminated URI identifying the feature.
    pub URI: *const c_char,
    /// Feature-specific data, may be null.
    pub data: *mut c_void,
}

/// Plugin descriptor as returned by the `lv2_descriptor` entry point.
#[repr(C)]
pub struct LV2_Descriptor {
    pub URI: *const c_char,
    pub instantiate: Option<
        unsafe extern "C" fn(
            descriptor: *const LV2_Descriptor,
            sample_rate: f64,
            bundle_path: *const c_char,
            features: *const *const LV2_Feature,
        ) -> LV2_Handle,
    >,
    pub connect_port:
        Option<unsafe extern "C" fn(instance: LV2_Handle, port: u32, data_location: *mut c_void)>,
    pub activate: Option<unsafe extern "C" fn(instance: LV2_Handle)>,
    pub run: Option<unsafe extern "C" fn(instance: LV2_Handle, sample_count: u32)>,
    pub deactivate: Option<unsafe extern "C" fn(instance: LV2_Handle)>,
    pub cleanup: Option<unsafe extern "C" fn(instance: LV2_Handle)>,
    pub extension_data: Option<unsafe extern "C" fn(uri: *const c_char) -> *const c_void>,
}

/// Type of the `lv2_descriptor` symbol exported by plugin libraries.
pub type LV2_Descriptor_Function = unsafe extern "C" fn(index: u32) -> *const LV2_Descriptor;

/// Name of the descriptor entry point exported by plugin libraries.
pub const LV2_DESCRIPTOR_SYMBOL: &str = "lv2_descriptor";

pub const LV2_CORE_URI: &str = "http://lv2plug.in/ns/lv2core";
pub const LV2_CORE__InputPort: &str = "http://lv2plug.in/ns/lv2core#InputPort";
pub const LV2_CORE__OutputPort: &str = "http://lv2plug.in/ns/lv2core#OutputPort";
pub const LV2_CORE__AudioPort: &str = "http://lv2plug.in/ns/lv2core#AudioPort";
pub const LV2_CORE__ControlPort: &str = "http://lv2plug.in/ns/lv2core#ControlPort";
pub const LV2_CORE__CVPort: &str = "http://lv2plug.in/ns/lv2core#CVPort";
pub const LV2_ATOM__AtomPort: &str = "http://lv2plug.in/ns/ext/atom#AtomPort";
pub const LV2_EVENT__EventPort: &str = "http://lv2plug.in/ns/ext/event#EventPort";

// ---------------------------------------------------------------------------
// urid
// ---------------------------------------------------------------------------

/// An unsigned integer mapped from a URI by the host.
pub type LV2_URID = u32;

pub type LV2_URID_Map_Handle = *mut c_void;
pub type LV2_URID_Unmap_Handle = *mut c_void;

/// Host-provided URI interning callback, offered as the urid:map feature.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LV2_URID_Map {
    pub handle: LV2_URID_Map_Handle,
    pub map: Option<unsafe extern "C" fn(handle: LV2_URID_Map_Handle, uri: *const c_char) -> LV2_URID>,
}

/// Reverse of [`LV2_URID_Map`], offered as the urid:unmap feature.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LV2_URID_Unmap {
    pub handle: LV2_URID_Unmap_Handle,
    pub unmap:
        Option<unsafe extern "C" fn(handle: LV2_URID_Unmap_Handle, urid: LV2_URID) -> *const c_char>,
}

pub const LV2_URID__map: &str = "http://lv2plug.in/ns/ext/urid#map";
pub const LV2_URID__unmap: &str = "http://lv2plug.in/ns/ext/urid#unmap";

// ---------------------------------------------------------------------------
// worker
// ---------------------------------------------------------------------------

/// Status codes shared by every worker-extension call.
pub type LV2_Worker_Status = u32;
pub const LV2_WORKER_SUCCESS: LV2_Worker_Status = 0;
pub const LV2_WORKER_ERR_UNKNOWN: LV2_Worker_Status = 1;
pub const LV2_WORKER_ERR_NO_SPACE: LV2_Worker_Status = 2;

pub type LV2_Worker_Respond_Handle = *mut c_void;

/// Callback the host passes to `work` so the plugin can send a response
/// back toward the real-time thread.
pub type LV2_Worker_Respond_Function = unsafe extern "C" fn(
    handle: LV2_Worker_Respond_Handle,
    size: u32,
    data: *const c_void,
) -> LV2_Worker_Status;

/// Plugin-side worker interface, returned from `extension_data`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LV2_Worker_Interface {
    /// Called by the host's non-real-time thread to do the actual work.
    pub work: Option<
        unsafe extern "C" fn(
            instance: LV2_Handle,
            respond: LV2_Worker_Respond_Function,
            handle: LV2_Worker_Respond_Handle,
            size: u32,
            data: *const c_void,
        ) -> LV2_Worker_Status,
    >,
    /// Called by the host's real-time thread to deliver a finished response.
    pub work_response: Option<
        unsafe extern "C" fn(instance: LV2_Handle, size: u32, body: *const c_void) -> LV2_Worker_Status,
    >,
    /// Optional end-of-run hook, called after each `run` cycle.
    pub end_run: Option<unsafe extern "C" fn(instance: LV2_Handle) -> LV2_Worker_Status>,
}

pub type LV2_Worker_Schedule_Handle = *mut c_void;

/// Host-side scheduling capability, offered as the worker:schedule feature.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LV2_Worker_Schedule {
    pub handle: LV2_Worker_Schedule_Handle,
    pub schedule_work: Option<
        unsafe extern "C" fn(
            handle: LV2_Worker_Schedule_Handle,
            size: u32,
            data: *const c_void,
        ) -> LV2_Worker_Status,
    >,
}

pub const LV2_WORKER__interface: &str = "http://lv2plug.in/ns/ext/worker#interface";
pub const LV2_WORKER__schedule: &str = "http://lv2plug.in/ns/ext/worker#schedule";
