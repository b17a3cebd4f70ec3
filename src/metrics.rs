use tracing::trace;

// Trace-based counters; the Prometheus recorder only serves what the
// exporter itself tracks.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "hermes.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn persistence_write(ok: bool, elapsed_ms: u128) {
    trace!(
        target = "hermes.metrics",
        ok = ok,
        elapsed_ms = elapsed_ms as u64,
        "snapshot_write"
    );
}

pub fn upload_finished(kind: &'static str, outcome: &'static str, attempt: u32) {
    trace!(
        target = "hermes.metrics",
        kind = kind,
        outcome = outcome,
        attempt = attempt,
        "upload_finished"
    );
}

pub fn step_transition(from: usize, to: usize, allowed: bool) {
    trace!(
        target = "hermes.metrics",
        from = from,
        to = to,
        allowed = allowed,
        "step_transition"
    );
}

pub fn submit_elapsed(outcome: &'static str, elapsed_ms: u128) {
    trace!(
        target = "hermes.metrics",
        outcome = outcome,
        elapsed_ms = elapsed_ms as u64,
        "submit_elapsed"
    );
}
