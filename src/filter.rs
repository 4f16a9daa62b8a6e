//! Connection filters, traces, and cleanups (C5).
//!
//! Grounded in `examples/original_source/nsd/filter.c`. Filters run at a
//! fixed point in the request lifecycle (`FilterPhase`) and can short-
//! circuit it; traces run FIFO after a successful response; cleanups run
//! LIFO unconditionally, even if the connection was dropped.

use crate::router::glob_match;
use std::sync::Arc;

/// The lifecycle point a filter runs at, matching `Ns_FilterType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPhase {
    /// Before authorization / routing has chosen a handler.
    PreAuth,
    /// After a handler has been chosen and authorized, before it runs.
    PostAuth,
    /// After the handler has produced a response.
    Trace,
}

/// What a filter or trace tells the request pipeline to do next, matching
/// `NS_OK` / `NS_FILTER_BREAK` / `NS_FILTER_RETURN` / `NS_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Continue to the next filter in the chain.
    Ok,
    /// Stop running filters for this phase, but do not fail the request.
    /// `NsRunFilters` turns this into `Ok` before returning, same as the
    /// original — it only matters to the chain runner itself.
    Break,
    /// Stop running filters for this phase and skip the handler /
    /// remaining phases entirely (not valid for `Trace`, see
    /// `FilterChain::run`).
    Return,
    /// Abort the request with an error; the connection should respond
    /// with 500 and run cleanups.
    Error,
}

type FilterFn<C> = dyn Fn(&mut C, FilterPhase) -> Disposition + Send + Sync;
type TraceFn<C> = dyn Fn(&mut C) + Send + Sync;

struct Filter<C> {
    method: String,
    url: String,
    when: FilterPhase,
    proc: Arc<FilterFn<C>>,
}

/// Registered filters, traces, and cleanups for one server, run over a
/// per-request context `C` (the driver's request/response/connection
/// bundle).
pub struct FilterChain<C> {
    filters: Vec<Filter<C>>,
    traces: Vec<Arc<TraceFn<C>>>,
    cleanups: Vec<Arc<TraceFn<C>>>,
}

impl<C> Default for FilterChain<C> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            traces: Vec::new(),
            cleanups: Vec::new(),
        }
    }
}

impl<C> FilterChain<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filter for `method`/`url` (glob patterns allowed, as in
    /// `Ns_RegisterFilter`). `first` places it at the head of the list
    /// instead of the tail, for filters that must run before all others
    /// already registered.
    pub fn register_filter(
        &mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        when: FilterPhase,
        first: bool,
        proc: impl Fn(&mut C, FilterPhase) -> Disposition + Send + Sync + 'static,
    ) {
        let filter = Filter {
            method: method.into(),
            url: url.into(),
            when,
            proc: Arc::new(proc),
        };
        if first {
            self.filters.insert(0, filter);
        } else {
            self.filters.push(filter);
        }
    }

    /// Registers a trace, run FIFO after a successful response.
    pub fn register_trace(&mut self, proc: impl Fn(&mut C) + Send + Sync + 'static) {
        self.traces.push(Arc::new(proc));
    }

    /// Registers a cleanup, run LIFO at the end of every connection.
    pub fn register_cleanup(&mut self, proc: impl Fn(&mut C) + Send + Sync + 'static) {
        self.cleanups.push(Arc::new(proc));
    }

    /// Runs every filter registered for `when` whose method/url glob
    /// matches `method`/`url`, in registration order, stopping at the
    /// first non-`Ok` disposition.
    ///
    /// `Break` collapses to `Ok` before returning (the chain has stopped,
    /// but the caller should proceed as normal) except when `when` is
    /// `Trace`, where `Return` also collapses to `Ok` — traces cannot skip
    /// the remaining response pipeline, only filters can.
    pub fn run(&self, ctx: &mut C, when: FilterPhase, method: &str, url: &str) -> Disposition {
        for filter in &self.filters {
            if filter.when != when {
                continue;
            }
            if !glob_match(&filter.method, method) || !glob_match(&filter.url, url) {
                continue;
            }
            match (filter.proc)(ctx, when) {
                Disposition::Ok => continue,
                Disposition::Break => return Disposition::Ok,
                Disposition::Return if when == FilterPhase::Trace => return Disposition::Ok,
                other => return other,
            }
        }
        Disposition::Ok
    }

    /// Runs every trace in FIFO registration order. Traces cannot fail the
    /// request; their return value, if any, is ignored by the pipeline.
    pub fn run_traces(&self, ctx: &mut C) {
        for trace in &self.traces {
            trace(ctx);
        }
    }

    /// Runs every cleanup in LIFO registration order, unconditionally.
    pub fn run_cleanups(&self, ctx: &mut C) {
        for cleanup in self.cleanups.iter().rev() {
            cleanup(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn break_stops_chain_but_reports_ok() {
        let mut chain: FilterChain<u32> = FilterChain::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c1 = calls.clone();
        chain.register_filter("GET", "/*", FilterPhase::PreAuth, false, move |_ctx, _| {
            c1.fetch_add(1, Ordering::SeqCst);
            Disposition::Break
        });
        let c2 = calls.clone();
        chain.register_filter("GET", "/*", FilterPhase::PreAuth, false, move |_ctx, _| {
            c2.fetch_add(1, Ordering::SeqCst);
            Disposition::Ok
        });

        let mut ctx = 0u32;
        let result = chain.run(&mut ctx, FilterPhase::PreAuth, "GET", "/api/users");
        assert_eq!(result, Disposition::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn return_is_terminal_outside_trace_phase() {
        let mut chain: FilterChain<u32> = FilterChain::new();
        chain.register_filter("GET", "/*", FilterPhase::PreAuth, false, |_ctx, _| {
            Disposition::Return
        });
        let mut ctx = 0u32;
        assert_eq!(
            chain.run(&mut ctx, FilterPhase::PreAuth, "GET", "/x"),
            Disposition::Return
        );
    }

    #[test]
    fn return_collapses_to_ok_during_trace_phase() {
        let mut chain: FilterChain<u32> = FilterChain::new();
        chain.register_filter("GET", "/*", FilterPhase::Trace, false, |_ctx, _| {
            Disposition::Return
        });
        let mut ctx = 0u32;
        assert_eq!(
            chain.run(&mut ctx, FilterPhase::Trace, "GET", "/x"),
            Disposition::Ok
        );
    }

    #[test]
    fn cleanups_run_in_lifo_order() {
        let mut chain: FilterChain<Vec<u32>> = FilterChain::new();
        chain.register_cleanup(|ctx: &mut Vec<u32>| ctx.push(1));
        chain.register_cleanup(|ctx: &mut Vec<u32>| ctx.push(2));
        chain.register_cleanup(|ctx: &mut Vec<u32>| ctx.push(3));

        let mut order = Vec::new();
        chain.run_cleanups(&mut order);
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn traces_run_in_fifo_order() {
        let mut chain: FilterChain<Vec<u32>> = FilterChain::new();
        chain.register_trace(|ctx: &mut Vec<u32>| ctx.push(1));
        chain.register_trace(|ctx: &mut Vec<u32>| ctx.push(2));

        let mut order = Vec::new();
        chain.run_traces(&mut order);
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn non_matching_url_is_skipped() {
        let mut chain: FilterChain<u32> = FilterChain::new();
        chain.register_filter("GET", "/admin/*", FilterPhase::PreAuth, false, |_ctx, _| {
            Disposition::Error
        });
        let mut ctx = 0u32;
        assert_eq!(
            chain.run(&mut ctx, FilterPhase::PreAuth, "GET", "/public/index.html"),
            Disposition::Ok
        );
    }
}
