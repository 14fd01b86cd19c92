use std::sync::{Mutex, OnceLock};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsState {
    pub endpoint_validation_ok: u64,
    pub endpoint_validation_fail: u64,
    // RPC 调用成功/失败与时延统计（毫秒）
    pub rpc_ok: u64,
    pub rpc_err: u64,
    pub rpc_fallback: u64,
    pub rpc_latency_sum_ms: u128,
    // 简易直方图分桶（毫秒）：<50, <100, <250, <500, <1000, >=1000
    pub rpc_hist_buckets: [u64; 6],
    pub broadcast_attempts: u64,
    pub broadcast_success: u64,
    pub broadcast_fail: u64,
    pub nonces_allocated: u64,
}

fn state() -> &'static Mutex<MetricsState> {
    METRICS.get_or_init(|| Mutex::new(MetricsState::default()))
}

fn with_state<F: FnOnce(&mut MetricsState)>(f: F) {
    let mut s = match state().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    };
    f(&mut s);
}

pub fn snapshot() -> MetricsState {
    match state().lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn inc_endpoint_validation(ok: bool) {
    with_state(|s| {
        if ok {
            s.endpoint_validation_ok += 1;
        } else {
            s.endpoint_validation_fail += 1;
        }
    });
}

pub fn inc_rpc_fallback() {
    with_state(|s| s.rpc_fallback += 1);
}

pub fn observe_rpc_latency_ms(latency_ms: u128, ok: bool) {
    with_state(|s| {
        if ok {
            s.rpc_ok += 1;
        } else {
            s.rpc_err += 1;
        }
        s.rpc_latency_sum_ms += latency_ms;
        let b = if latency_ms < 50 {
            0
        } else if latency_ms < 100 {
            1
        } else if latency_ms < 250 {
            2
        } else if latency_ms < 500 {
            3
        } else if latency_ms < 1000 {
            4
        } else {
            5
        };
        s.rpc_hist_buckets[b] += 1;
    });
}

pub fn inc_broadcast_attempt() {
    with_state(|s| s.broadcast_attempts += 1);
}

pub fn inc_broadcast_result(ok: bool) {
    with_state(|s| {
        if ok {
            s.broadcast_success += 1;
        } else {
            s.broadcast_fail += 1;
        }
    });
}

pub fn add_nonces_allocated(count: u64) {
    with_state(|s| s.nonces_allocated += count);
}

pub fn render_prometheus() -> String {
    let s = snapshot();
    let mut out = String::new();

    out.push_str("# HELP disperse_endpoint_validation_total Endpoint validations\n");
    out.push_str("# TYPE disperse_endpoint_validation_total counter\n");
    out.push_str(&format!(
        "disperse_endpoint_validation_total{{result=\"ok\"}} {}\n",
        s.endpoint_validation_ok
    ));
    out.push_str(&format!(
        "disperse_endpoint_validation_total{{result=\"err\"}} {}\n",
        s.endpoint_validation_fail
    ));

    out.push_str("# HELP disperse_rpc_requests_total RPC requests\n");
    out.push_str("# TYPE disperse_rpc_requests_total counter\n");
    out.push_str(&format!(
        "disperse_rpc_requests_total{{result=\"ok\"}} {}\n",
        s.rpc_ok
    ));
    out.push_str(&format!(
        "disperse_rpc_requests_total{{result=\"err\"}} {}\n",
        s.rpc_err
    ));

    out.push_str("# HELP disperse_rpc_fallback_total Calls served by a non-first candidate\n");
    out.push_str("# TYPE disperse_rpc_fallback_total counter\n");
    out.push_str(&format!("disperse_rpc_fallback_total {}\n", s.rpc_fallback));

    out.push_str("# HELP disperse_rpc_latency_ms RPC latency histogram\n");
    out.push_str("# TYPE disperse_rpc_latency_ms histogram\n");
    let bounds = [50, 100, 250, 500, 1000];
    // le 桶为累计计数
    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += s.rpc_hist_buckets[i];
        out.push_str(&format!(
            "disperse_rpc_latency_ms_bucket{{le=\"{}\"}} {}\n",
            bound, cumulative
        ));
    }
    let total = cumulative + s.rpc_hist_buckets[bounds.len()];
    out.push_str(&format!(
        "disperse_rpc_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
        total
    ));
    out.push_str(&format!(
        "disperse_rpc_latency_ms_sum {}\n",
        s.rpc_latency_sum_ms
    ));
    out.push_str(&format!("disperse_rpc_latency_ms_count {}\n", total));

    out.push_str("# HELP disperse_broadcast_attempts_total Raw transaction submissions\n");
    out.push_str("# TYPE disperse_broadcast_attempts_total counter\n");
    out.push_str(&format!(
        "disperse_broadcast_attempts_total {}\n",
        s.broadcast_attempts
    ));

    out.push_str("# HELP disperse_broadcast_total Final per-recipient results\n");
    out.push_str("# TYPE disperse_broadcast_total counter\n");
    out.push_str(&format!(
        "disperse_broadcast_total{{result=\"ok\"}} {}\n",
        s.broadcast_success
    ));
    out.push_str(&format!(
        "disperse_broadcast_total{{result=\"err\"}} {}\n",
        s.broadcast_fail
    ));

    out.push_str("# HELP disperse_nonces_allocated_total Nonces handed out\n");
    out.push_str("# TYPE disperse_nonces_allocated_total counter\n");
    out.push_str(&format!(
        "disperse_nonces_allocated_total {}\n",
        s.nonces_allocated
    ));

    out
}
