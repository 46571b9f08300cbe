use tracing::trace;

// Each helper feeds the global recorder installed in main (rendered at
// /metrics) and emits a matching trace event.

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("mintmark_requests_total", "route" => route).increment(1);
    trace!(
        target = "mintmark.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    ::metrics::histogram!("mintmark_stage_duration_ms", "stage" => stage)
        .record(elapsed_ms as f64);
    trace!(
        target = "mintmark.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn chunk_elapsed(files: usize, elapsed_ms: u128) {
    ::metrics::histogram!("mintmark_chunk_duration_ms").record(elapsed_ms as f64);
    ::metrics::histogram!("mintmark_chunk_files").record(files as f64);
    trace!(
        target = "mintmark.metrics",
        files = files as u64,
        elapsed_ms = elapsed_ms as u64,
        "chunk_elapsed"
    );
}

pub fn file_outcome(uploaded: bool) {
    let outcome = if uploaded { "uploaded" } else { "failed" };
    ::metrics::counter!("mintmark_upload_files_total", "outcome" => outcome).increment(1);
    trace!(
        target = "mintmark.metrics",
        outcome = outcome,
        "upload_files_total_inc"
    );
}

pub fn gate_outcome(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    ::metrics::counter!("mintmark_quality_gate_total", "outcome" => outcome).increment(1);
    trace!(
        target = "mintmark.metrics",
        outcome = outcome,
        "quality_gate_total_inc"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn helpers_feed_the_prometheus_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            inc_requests("/ingest");
            inc_requests("/ingest");
            gate_outcome(false);
            file_outcome(true);
            stage_elapsed("upload", 12);
            chunk_elapsed(5, 3);
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"mintmark_requests_total{route="/ingest"} 2"#),
            "{rendered}"
        );
        assert!(rendered.contains(r#"mintmark_quality_gate_total{outcome="rejected"} 1"#));
        assert!(rendered.contains(r#"mintmark_upload_files_total{outcome="uploaded"} 1"#));
        assert!(rendered.contains("mintmark_stage_duration_ms"));
        assert!(rendered.contains("mintmark_chunk_files"));
    }
}
