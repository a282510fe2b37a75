//! Adapter and device-class selection.
//!
//! Mirrors the two-step accelerator pick: filter adapters by a name
//! substring, then prefer a GPU-class device with an optional fallback to
//! whatever else matched. The decision itself is a pure function over
//! `(name, device type)` pairs so it stays testable without a GPU.

use wgpu::DeviceType;

use crate::diag::{diag, DiagnosticSink, Severity};
use crate::error::Error;

#[derive(Debug, Clone)]
pub(crate) struct AdapterCandidate {
    pub name: String,
    pub device_type: DeviceType,
}

fn is_gpu_class(device_type: DeviceType) -> bool {
    matches!(
        device_type,
        DeviceType::DiscreteGpu | DeviceType::IntegratedGpu | DeviceType::VirtualGpu
    )
}

/// Picks the adapter index for `filter` out of `candidates`, which must be in
/// enumeration order. First GPU-class name match wins; with `allow_fallback`
/// the first name match of any device type is accepted when no GPU matches.
pub(crate) fn pick_adapter(
    candidates: &[AdapterCandidate],
    filter: &str,
    allow_fallback: bool,
) -> Result<usize, Error> {
    let mut first_match = None;
    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.name.contains(filter) {
            continue;
        }
        if is_gpu_class(candidate.device_type) {
            return Ok(index);
        }
        if first_match.is_none() {
            first_match = Some(index);
        }
    }
    match first_match {
        Some(index) if allow_fallback => Ok(index),
        Some(_) => Err(Error::DeviceNotFound {
            filter: filter.to_owned(),
        }),
        None => Err(Error::PlatformNotFound {
            filter: filter.to_owned(),
        }),
    }
}

/// Enumerates adapters and applies [`pick_adapter`], tracing every candidate
/// through the sink.
pub(crate) fn select_adapter(
    instance: &wgpu::Instance,
    filter: &str,
    allow_fallback: bool,
    sink: &dyn DiagnosticSink,
) -> Result<wgpu::Adapter, Error> {
    let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
    let candidates: Vec<AdapterCandidate> = adapters
        .iter()
        .map(|adapter| {
            let info = adapter.get_info();
            AdapterCandidate {
                name: info.name,
                device_type: info.device_type,
            }
        })
        .collect();
    for (index, candidate) in candidates.iter().enumerate() {
        diag!(
            sink,
            Severity::Trace,
            "adapter {}: \"{}\" ({:?})",
            index,
            candidate.name,
            candidate.device_type
        );
    }
    let index = pick_adapter(&candidates, filter, allow_fallback).inspect_err(|err| {
        diag!(sink, Severity::Error, "adapter selection failed: {err}");
    })?;
    Ok(adapters.swap_remove(index))
}
