//! Structured exception handling.
//!
//! A try region is run by `EnterTryCatchFinally`, which executes the try
//! range in a nested dispatch loop. When that loop fails, the region's
//! handlers are tested in declaration order; the winner runs with the error
//! on its stack. The finally range runs on every exit from the region.

use std::fmt;

use tracing::debug;

use super::error::{Category, ErrorKind, Exception};
use super::frame::Frame;
use super::Value;

#[derive(Debug, Clone)]
pub struct FilterRegion {
    pub label: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct CatchHandler {
    pub category: Category,
    /// Entered with the caught error as the top stack value.
    pub label: usize,
    pub start: usize,
    pub end: usize,
    pub filter: Option<FilterRegion>,
}

#[derive(Debug, Clone)]
pub struct FinallyRegion {
    pub label: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct TryRegion {
    pub try_start: usize,
    pub try_end: usize,
    /// Where control continues after the region completes normally.
    pub goto_end_label: usize,
    pub handlers: Vec<CatchHandler>,
    pub finally: Option<FinallyRegion>,
}

impl fmt::Display for TryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) end L{}", self.try_start, self.try_end, self.goto_end_label)?;
        for handler in &self.handlers {
            write!(f, "; catch {:?} [{}, {})", handler.category, handler.start, handler.end)?;
            if let Some(filter) = &handler.filter {
                write!(f, " when [{}, {})", filter.start, filter.end)?;
            }
        }
        if let Some(finally) = &self.finally {
            write!(f, "; finally [{}, {})", finally.start, finally.end)?;
        }
        Ok(())
    }
}

/// Run a filter with `error` as its input. The frame is restored
/// afterwards; an error raised by the filter counts as declining.
fn run_filter(frame: &mut Frame, filter: &FilterRegion, error: &Exception) -> bool {
    let checkpoint = frame.checkpoint();
    frame.filter_verdict = None;
    let outcome = frame
        .jump_to(filter.label, Value::Error(error.clone()))
        .and_then(|_| frame.run_range(filter.start..filter.end));
    let verdict = frame.filter_verdict.take();
    frame.restore(checkpoint);
    match outcome {
        Ok(()) => verdict.unwrap_or(false),
        Err(secondary) => {
            debug!(%error, %secondary, "exception filter failed; declining");
            false
        }
    }
}

fn find_handler<'r>(frame: &mut Frame, region: &'r TryRegion, error: &Exception) -> Option<&'r CatchHandler> {
    region.handlers.iter().find(|handler| {
        if !handler.category.matches(error.kind()) {
            return false;
        }
        match &handler.filter {
            Some(filter) => {
                let accepted = run_filter(frame, filter, error);
                if !accepted {
                    debug!(%error, "exception filter declined");
                }
                accepted
            }
            None => true,
        }
    })
}

pub(crate) fn run_try(frame: &mut Frame, region_index: usize) -> Result<isize, Exception> {
    let program = frame.program().clone();
    let region = program
        .try_regions()
        .get(region_index)
        .ok_or_else(|| Exception::invalid_operation(format!("no try region {}", region_index)))?;
    let entry = frame.ip;
    let continuation_depth = frame.continuations.len();
    let saved_depth = frame.saved_pending.len();
    let inner_depth = continuation_depth + usize::from(region.finally.is_some());

    if let Some(finally) = &region.finally {
        frame.push_continuation(finally.label);
    }

    frame.ip = region.try_start;
    let mut outcome = frame.run_range(region.try_start..region.try_end);

    if let Err(error) = &outcome {
        let error = error.clone();
        frame.unwind_to(inner_depth, saved_depth);
        if let Some(handler) = find_handler(frame, region, &error) {
            debug!(%error, handler = handler.start, "caught");
            frame.clear_pending();
            frame.jump_to(handler.label, Value::Error(error.clone()))?;
            let previous = frame.handled.replace(error);
            outcome = frame.run_range(handler.start..handler.end);
            frame.handled = previous;
        }
    }

    let Some(finally) = &region.finally else {
        outcome?;
        return Ok(frame.ip as isize - entry as isize);
    };

    if let Err(error) = &outcome {
        debug!(%error, "running finally while unwinding");
        frame.unwind_to(inner_depth, saved_depth);
        frame.clear_pending();
        let label = frame.label(finally.label)?;
        frame.set_stack_depth(label.stack_depth);
        frame.ip = finally.start;
    }

    let aborted = matches!(&outcome, Err(e) if *e.kind() == ErrorKind::Aborted);
    let budget = if aborted { frame.suspend_budget() } else { None };
    frame.finally_exit = false;
    let finally_outcome = if frame.ip == finally.start {
        frame.run_range(finally.start..finally.end)
    } else {
        Ok(())
    };
    frame.resume_budget(budget);
    let exited = std::mem::take(&mut frame.finally_exit);
    frame.saved_pending.truncate(saved_depth);

    if let Err(secondary) = finally_outcome {
        frame.continuations.truncate(continuation_depth);
        return Err(secondary);
    }
    if let Err(error) = outcome {
        if exited || aborted {
            return Err(error);
        }
        debug!(%error, "finally transferred control; pending error discarded");
    }
    Ok(frame.ip as isize - entry as isize)
}

pub(crate) fn enter_finally(frame: &mut Frame, label_index: usize) -> Result<isize, Exception> {
    if frame.pending_continuation.is_none() {
        let label = frame.label(label_index)?;
        frame.set_stack_depth(label.stack_depth);
    }
    frame.save_pending();
    frame.pop_continuation()?;
    Ok(1)
}

/// Complete a finally block: resume the jump that was pending when it was
/// entered, or fall through if there was none.
pub(crate) fn leave_finally(frame: &mut Frame) -> Result<isize, Exception> {
    frame.restore_pending();
    if frame.pending_continuation.is_none() {
        frame.finally_exit = true;
        return Ok(1);
    }
    frame.yield_to_pending_continuation()
}
