use crate::{auth::auth, models::{DiagnosticsResponse, ErrorResponse}, AppState};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Live counters for rooms, connections and channels, plus system stats
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Extension(prpls): Extension<Vec<String>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Only admins may inspect the live session state
    let _ = auth::ensure_admin(&prpls)?;

    let (n_rooms, n_conn, n_pending_edits) = state.rooms.stats().await;
    let (n_presence_docs, n_presence_entries) = state.presence.stats().await;
    let n_user_channels = state.user_channels.channel_count().await;

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
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: n_conn as u32,
            n_rooms: n_rooms as u32,
            n_pending_edits: n_pending_edits as u32,
            n_presence_docs: n_presence_docs as u32,
            n_presence_entries: n_presence_entries as u32,
            n_user_channels: n_user_channels as u32,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
