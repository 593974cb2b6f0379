use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::BlockStoreError;
use crate::store::BlockStore;

/// Flush-timer control block. The condvar exists so tests can stop and
/// restart the timer deterministically; `stop_flush_timer` blocks until the
/// thread has actually exited.
#[derive(Debug, Default)]
pub(crate) struct FlushTimerControl {
    pub(crate) state: Mutex<FlushTimerState>,
    pub(crate) cvar: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct FlushTimerState {
    pub(crate) running: bool,
    pub(crate) stop_requested: bool,
}

pub(crate) fn start_flush_timer(
    store: &BlockStore,
    timeout: Duration,
) -> Result<(), BlockStoreError> {
    {
        let mut state = store
            .inner
            .flush
            .state
            .lock()
            .expect("flush timer lock poisoned");
        if state.running {
            return Err(BlockStoreError::FlushTimerRunning);
        }
        state.running = true;
        state.stop_requested = false;
    }

    let weak = Arc::downgrade(&store.inner);
    std::thread::spawn(move || loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let stop = {
            let state = inner.flush.state.lock().expect("flush timer lock poisoned");
            let (state, _timeout_result) = inner
                .flush
                .cvar
                .wait_timeout(state, timeout)
                .expect("flush timer lock poisoned");
            state.stop_requested
        };
        if stop {
            let mut state = inner.flush.state.lock().expect("flush timer lock poisoned");
            state.running = false;
            state.stop_requested = false;
            inner.flush.cvar.notify_all();
            return;
        }
        if let Err(err) = inner.flush_cache() {
            tracing::warn!(error = %err, "blockstore flush failed; will retry next tick");
        }
    });
    Ok(())
}

pub(crate) fn stop_flush_timer(store: &BlockStore) {
    let mut state = store
        .inner
        .flush
        .state
        .lock()
        .expect("flush timer lock poisoned");
    if !state.running {
        return;
    }
    state.stop_requested = true;
    store.inner.flush.cvar.notify_all();
    while state.running {
        state = store
            .inner
            .flush
            .cvar
            .wait(state)
            .expect("flush timer lock poisoned");
    }
}
