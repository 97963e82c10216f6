use crate::{models::DiagnosticsResponse, ws::Hub};
use axum::{extract::State, http::StatusCode, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Live hub counters plus process resource usage
pub async fn diagnostics(
    State(hub): State<Arc<Hub>>,
) -> (StatusCode, Json<DiagnosticsResponse>) {
    let counters = hub.counters().await;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Sessions: {}, Notes: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        counters.sessions,
        counters.notes
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_sessions: counters.sessions as u32,
            n_notes: counters.notes as u32,
            n_dirty_notes: counters.dirty_notes as u32,
            n_channels: counters.channels as u32,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
