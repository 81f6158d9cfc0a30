//! Ordered engine teardown.
//!
//! An engine is always brought down as stop, then unprepare, then destroy,
//! skipping the steps its state does not need. Destroying a live engine
//! directly is never attempted.

use super::engine::EngineResult;
use super::module::Module;

/// Tear down the module's engine, if any. Returns the result of `destroy`.
///
/// Failures of the earlier steps are logged and do not stop the sequence.
pub(crate) fn destroy_engine(module: &mut Module) -> EngineResult<()> {
    let Some(mut engine) = module.engine.take() else {
        return Ok(());
    };
    let handle = engine.handle();
    let state = engine.state();
    tracing::debug!(handle, ?state, "tearing down engine");

    if state.is_active() {
        if let Err(code) = engine.stop() {
            tracing::warn!(handle, ?code, "stop failed during teardown");
        }
    }
    if state.is_prepared() {
        if let Err(code) = engine.unprepare() {
            tracing::warn!(handle, ?code, "unprepare failed during teardown");
        }
    }

    let result = engine.destroy();
    if let Err(code) = result {
        tracing::warn!(handle, ?code, "destroy failed");
    }
    drop(engine);

    module.release_slot();
    tracing::info!(handle, "engine destroyed");
    result
}

/// Final cleanup after the control socket is gone.
///
/// Runs the engine teardown, stops event forwarding, and force-frees every
/// buffer the connection still has exported.
pub(crate) fn close_module(module: &mut Module) {
    module.sink.close();
    let _ = destroy_engine(module);
    let freed = module.buffers.force_free_all();
    tracing::info!(freed, "connection resources released");
}
