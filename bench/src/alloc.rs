// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A global allocator which counts allocations, exposed to `criterion`
//! as a [`Measurement`].
//!
//! Merging a segment into an aggregate should only ever splice
//! buffers; these measurements show when a change starts copying.

use super::MeasurementInfo;
use criterion::Criterion;
use criterion::Throughput;
use criterion::measurement::Measurement;
use criterion::measurement::ValueFormatter;
use std::alloc::GlobalAlloc;
use std::alloc::Layout;
use std::alloc::System;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[global_allocator]
static COUNTING_ALLOC: CountingAlloc = CountingAlloc::new();

// Criterion runs one benchmark at a time, so a single set of global
// counters is enough.
struct CountingAlloc {
    count: AtomicU64,
    bytes: AtomicU64,
}

impl CountingAlloc {
    const fn new() -> Self {
        Self { count: AtomicU64::new(0), bytes: AtomicU64::new(0) }
    }
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// A quantity read from the counting allocator.
pub trait AllocCounter {
    fn read() -> u64;
    fn unit() -> &'static str;
    fn label() -> &'static str;
}

/// Number of allocations.
pub struct Allocs;

/// Bytes allocated.
pub struct BytesAlloced;

impl AllocCounter for Allocs {
    fn read() -> u64 {
        COUNTING_ALLOC.count.load(Ordering::Relaxed)
    }

    fn unit() -> &'static str {
        ""
    }

    fn label() -> &'static str {
        "alloc_ct"
    }
}

impl AllocCounter for BytesAlloced {
    fn read() -> u64 {
        COUNTING_ALLOC.bytes.load(Ordering::Relaxed)
    }

    fn unit() -> &'static str {
        "B"
    }

    fn label() -> &'static str {
        "alloc_sz"
    }
}

// Per-iteration values are small, so no scaling is done.
struct Unscaled(&'static str);

impl ValueFormatter for Unscaled {
    fn scale_values(&self, _typical: f64, _values: &mut [f64]) -> &'static str {
        self.0
    }

    fn scale_throughputs(
        &self,
        _typical: f64,
        _throughput: &Throughput,
        _values: &mut [f64],
    ) -> &'static str {
        self.0
    }

    fn scale_for_machines(&self, _values: &mut [f64]) -> &'static str {
        self.0
    }
}

/// Adapts an [`AllocCounter`] into a criterion [`Measurement`].
pub struct AllocMeasure<T> {
    fmt: Unscaled,
    _counter: T,
}

impl<T: AllocCounter> Measurement for AllocMeasure<T> {
    type Intermediate = u64;
    type Value = u64;

    fn start(&self) -> Self::Intermediate {
        T::read()
    }

    fn end(&self, start: Self::Intermediate) -> Self::Value {
        T::read() - start
    }

    fn add(&self, v1: &Self::Value, v2: &Self::Value) -> Self::Value {
        v1 + v2
    }

    fn zero(&self) -> Self::Value {
        0
    }

    fn to_f64(&self, value: &Self::Value) -> f64 {
        *value as f64
    }

    fn formatter(&self) -> &dyn ValueFormatter {
        &self.fmt
    }
}

impl<T: AllocCounter> MeasurementInfo for AllocMeasure<T> {
    fn label() -> &'static str {
        T::label()
    }
}

/// A [`Criterion`] tuned for counting allocations. The counts are
/// deterministic, so few samples are needed.
pub fn alloc_crit<T: AllocCounter>(
    counter: T,
) -> Criterion<AllocMeasure<T>> {
    Criterion::default()
        .with_measurement(AllocMeasure {
            fmt: Unscaled(T::unit()),
            _counter: counter,
        })
        .sample_size(10)
        .warm_up_time(Duration::from_nanos(1))
        .measurement_time(Duration::from_micros(10))
        .nresamples(1)
        // Identical samples upset the plotting backend.
        .without_plots()
}
