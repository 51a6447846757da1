//! 按提供方划分的互斥闸门：同一提供方同时只允许一个请求在途。

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

#[derive(Debug, Default)]
struct Gate {
    busy: Mutex<bool>,
    freed: Condvar,
}

impl Gate {
    fn lock_busy(&self) -> MutexGuard<'_, bool> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) {
        let mut busy = self.lock_busy();
        while *busy {
            busy = self
                .freed
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
    }

    fn release(&self) {
        *self.lock_busy() = false;
        self.freed.notify_one();
    }
}

/// 持有期间独占对应提供方的闸门，drop 时释放（包括 panic 展开）。
#[must_use = "the gate is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GateGuard {
    gate: Option<Arc<Gate>>,
}

impl GateGuard {
    /// 未启用限流的提供方拿到的空守卫。
    fn bypass() -> Self {
        Self { gate: None }
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release();
        }
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 阻塞直到拿到 `provider` 的闸门；闸门在首次使用时创建。
    pub fn acquire(&self, provider: &str) -> GateGuard {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            gates
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Gate::default()))
                .clone()
        };
        gate.acquire();
        trace!(target: "rate_limit", provider, "acquired");
        GateGuard { gate: Some(gate) }
    }

    /// `enabled` 为 false 时直接放行，不创建闸门。
    pub fn acquire_if(&self, provider: &str, enabled: bool) -> GateGuard {
        if enabled {
            self.acquire(provider)
        } else {
            GateGuard::bypass()
        }
    }

    pub fn gate_count(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
